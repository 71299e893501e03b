//! Clinical record entities touched by result merging.
//!
//! These mirror the subset of the record store the merge engine needs: encounters that own
//! observation trees, and orders that request a test and are discontinued once results land.

use crate::concepts::{Concept, ConceptId};
use crate::observation::Observation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use sync_types::NonEmptyText;
use uuid::Uuid;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(PatientId);
record_id!(EncounterId);
record_id!(OrderId);
record_id!(ProviderId);
record_id!(
    /// Identifier of a single observation node, grouping nodes included.
    ObservationId
);

/// A clinical visit owning a forest of observations.
///
/// Observations are only ever appended or voided.
#[derive(Clone, Debug, PartialEq)]
pub struct Encounter {
    pub id: EncounterId,
    pub patient: PatientId,
    pub encounter_datetime: DateTime<Utc>,
    observations: Vec<Observation>,
}

impl Encounter {
    pub fn new(patient: PatientId, encounter_datetime: DateTime<Utc>) -> Self {
        Self {
            id: EncounterId::new(),
            patient,
            encounter_datetime,
            observations: Vec::new(),
        }
    }

    /// Top-level observations, voided ones included.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn add_observation(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    /// Every non-voided observation node. Members of a voided group are not considered live.
    pub fn live_observations(&self) -> Vec<&Observation> {
        fn walk<'a>(obs: &'a Observation, out: &mut Vec<&'a Observation>) {
            if obs.is_voided() {
                return;
            }
            out.push(obs);
            for member in obs.group_members() {
                walk(member, out);
            }
        }

        let mut out = Vec::new();
        for obs in &self.observations {
            walk(obs, &mut out);
        }
        out
    }

    pub fn live_concepts(&self) -> HashSet<ConceptId> {
        self.live_observations()
            .into_iter()
            .map(|o| o.concept.id)
            .collect()
    }

    pub fn observation_mut(&mut self, id: ObservationId) -> Option<&mut Observation> {
        self.observations.iter_mut().find_map(|o| o.find_mut(id))
    }

    /// Voids the observation with `id`. Returns `false` if it is absent or already voided.
    pub fn void_observation(
        &mut self,
        id: ObservationId,
        reason: NonEmptyText,
        at: DateTime<Utc>,
    ) -> bool {
        self.observation_mut(id)
            .map(|obs| obs.void(reason, at))
            .unwrap_or(false)
    }

    /// Voids grouping nodes whose members have all been voided. Returns how many were voided.
    pub fn void_empty_groups(&mut self, reason: &NonEmptyText, at: DateTime<Utc>) -> usize {
        self.observations
            .iter_mut()
            .map(|o| o.void_empty_groups(reason, at))
            .sum()
    }

    /// Replaces the stored node with the same id. Returns `false` if no such node exists.
    pub fn replace_observation(&mut self, observation: Observation) -> bool {
        match self.observation_mut(observation.id) {
            Some(slot) => {
                *slot = observation;
                true
            }
            None => false,
        }
    }
}

/// A requested test.
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub id: OrderId,
    /// The ordered test, either a single test or a panel.
    pub concept: Concept,
    pub encounter: EncounterId,
    pub patient: PatientId,
    pub orderer: ProviderId,
    pub date_stopped: Option<DateTime<Utc>>,
    pub discontinue_reason: Option<String>,
}

impl Order {
    pub fn new(concept: Concept, encounter: &Encounter, orderer: ProviderId) -> Self {
        Self {
            id: OrderId::new(),
            concept,
            encounter: encounter.id,
            patient: encounter.patient,
            orderer,
            date_stopped: None,
            discontinue_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.date_stopped.is_none()
    }
}
