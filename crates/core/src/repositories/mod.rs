//! Repository collaborators.
//!
//! - [`ClinicalStore`]: the clinical record store the merge engine reads from and writes to.
//! - [`SyncRepository`]: durable storage for sync profiles, artifacts, cases, logs and tasks.
//!
//! Implementations:
//! - [`clinical::InMemoryClinicalStore`] (also a [`ConceptDictionary`](crate::ConceptDictionary))
//! - [`memory::InMemorySyncRepository`]
//! - [`files::FileSyncRepository`], JSON files under a UUID-sharded directory tree

pub mod clinical;
pub mod files;
pub mod memory;

use crate::clinical::{Encounter, EncounterId, Order, OrderId, PatientId, ProviderId};
use crate::concepts::ConceptId;
use crate::observation::Observation;
use crate::sync::{
    SyncFhirCase, SyncFhirProfile, SyncFhirProfileLog, SyncFhirResource, SyncTask, SyncTaskType,
};
use crate::SyncResult;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Query and persistence API of the clinical record store.
pub trait ClinicalStore: Send + Sync {
    fn get_encounter(&self, id: EncounterId) -> SyncResult<Option<Encounter>>;

    /// Live observations recorded for `person` under `concept`, across all encounters.
    fn get_observations_by_person_and_concept(
        &self,
        person: PatientId,
        concept: ConceptId,
    ) -> SyncResult<Vec<Observation>>;

    /// Live observations linked to `order`.
    fn get_observations_by_order(&self, order: OrderId) -> SyncResult<Vec<Observation>>;

    /// Persists the encounter with all of its observations as one unit.
    fn save_encounter(&self, encounter: &Encounter) -> SyncResult<()>;

    /// Persists a change to a single observation.
    fn save_observation(&self, observation: &Observation, change_reason: &str) -> SyncResult<()>;

    /// Stops an order and returns the stopped copy.
    fn discontinue_order(
        &self,
        order: &Order,
        reason: &str,
        date: DateTime<Utc>,
        orderer: ProviderId,
        encounter: EncounterId,
    ) -> SyncResult<Order>;
}

/// Storage for outbound sync entities.
///
/// `save_*` inserts or replaces by UUID. `all_*` return entities ordered by UUID.
pub trait SyncRepository: Send + Sync {
    fn save_profile(&self, profile: &SyncFhirProfile) -> SyncResult<()>;
    fn get_profile(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirProfile>>;
    fn all_profiles(&self) -> SyncResult<Vec<SyncFhirProfile>>;

    fn save_resource(&self, resource: &SyncFhirResource) -> SyncResult<()>;
    fn get_resource(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirResource>>;
    fn all_resources(&self) -> SyncResult<Vec<SyncFhirResource>>;
    /// Physically removes an artifact. Returns `false` if it did not exist.
    fn delete_resource(&self, uuid: Uuid) -> SyncResult<bool>;

    fn save_case(&self, case: &SyncFhirCase) -> SyncResult<()>;
    fn get_case(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirCase>>;
    fn all_cases(&self) -> SyncResult<Vec<SyncFhirCase>>;

    fn save_profile_log(&self, log: &SyncFhirProfileLog) -> SyncResult<()>;
    fn get_profile_log(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirProfileLog>>;
    fn all_profile_logs(&self) -> SyncResult<Vec<SyncFhirProfileLog>>;

    fn save_task_type(&self, task_type: &SyncTaskType) -> SyncResult<()>;
    fn get_task_type(&self, uuid: Uuid) -> SyncResult<Option<SyncTaskType>>;
    fn all_task_types(&self) -> SyncResult<Vec<SyncTaskType>>;

    fn save_task(&self, task: &SyncTask) -> SyncResult<()>;
    fn get_task(&self, uuid: Uuid) -> SyncResult<Option<SyncTask>>;
    fn all_tasks(&self) -> SyncResult<Vec<SyncTask>>;

    fn resources_by_profile(&self, profile: Uuid) -> SyncResult<Vec<SyncFhirResource>> {
        Ok(self
            .all_resources()?
            .into_iter()
            .filter(|r| r.profile() == profile)
            .collect())
    }

    /// Synced artifacts whose expiry date is strictly before `as_of`.
    fn expired_resources(&self, as_of: DateTime<Utc>) -> SyncResult<Vec<SyncFhirResource>> {
        Ok(self
            .all_resources()?
            .into_iter()
            .filter(|r| r.is_expired(as_of))
            .collect())
    }
}
