//! Observation model and builder.
//!
//! An observation is either a typed value for a concept or a pure grouping node whose members
//! are themselves observations. The two shapes are a closed enum ([`ObsContent`]), so a grouping
//! node can never carry a direct value.
//!
//! Saved observations are never deleted. Voiding records a reason and a timestamp and leaves
//! the observation in place for audit.

use crate::clinical::{EncounterId, ObservationId, Order, OrderId, PatientId};
use crate::clinical::Encounter;
use crate::concepts::{Concept, ConceptDatatype, ConceptId};
use crate::{SyncError, SyncResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use sync_types::NonEmptyText;

/// A typed observation value. The variant must match the concept datatype.
#[derive(Clone, Debug, PartialEq)]
pub enum ObsValue {
    Coded { concept: ConceptId, name: String },
    Numeric(f64),
    Boolean(bool),
    Text(String),
    Datetime(NaiveDateTime),
}

impl ObsValue {
    pub fn datatype(&self) -> ConceptDatatype {
        match self {
            ObsValue::Coded { .. } => ConceptDatatype::Coded,
            ObsValue::Numeric(_) => ConceptDatatype::Numeric,
            ObsValue::Boolean(_) => ConceptDatatype::Boolean,
            ObsValue::Text(_) => ConceptDatatype::Text,
            ObsValue::Datetime(_) => ConceptDatatype::Datetime,
        }
    }

    /// Renders the value the way it is displayed in the record.
    pub fn as_display_string(&self) -> String {
        match self {
            ObsValue::Coded { name, .. } => name.clone(),
            ObsValue::Numeric(n) => n.to_string(),
            ObsValue::Boolean(b) => b.to_string(),
            ObsValue::Text(t) => t.clone(),
            ObsValue::Datetime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ObsContent {
    Value(ObsValue),
    Group(Vec<Observation>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoidInfo {
    pub reason: NonEmptyText,
    pub date_voided: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub id: ObservationId,
    pub concept: Concept,
    pub person: PatientId,
    pub encounter: EncounterId,
    pub order: Option<OrderId>,
    pub obs_datetime: DateTime<Utc>,
    pub date_created: DateTime<Utc>,
    pub content: ObsContent,
    void: Option<VoidInfo>,
}

impl Observation {
    pub fn is_voided(&self) -> bool {
        self.void.is_some()
    }

    pub fn void_info(&self) -> Option<&VoidInfo> {
        self.void.as_ref()
    }

    pub fn value(&self) -> Option<&ObsValue> {
        match &self.content {
            ObsContent::Value(value) => Some(value),
            ObsContent::Group(_) => None,
        }
    }

    pub fn group_members(&self) -> &[Observation] {
        match &self.content {
            ObsContent::Value(_) => &[],
            ObsContent::Group(members) => members,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.content, ObsContent::Group(_))
    }

    /// Display string of the direct value; grouping nodes render as empty.
    pub fn value_as_string(&self) -> String {
        self.value()
            .map(ObsValue::as_display_string)
            .unwrap_or_default()
    }

    /// Soft-deletes this observation. Voiding an already voided observation keeps the first
    /// reason and returns `false`.
    pub fn void(&mut self, reason: NonEmptyText, at: DateTime<Utc>) -> bool {
        if self.void.is_some() {
            return false;
        }
        self.void = Some(VoidInfo {
            reason,
            date_voided: at,
        });
        true
    }

    /// Appends a member to a grouping node.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] when called on a value observation.
    pub fn add_group_member(&mut self, member: Observation) -> SyncResult<()> {
        match &mut self.content {
            ObsContent::Group(members) => {
                members.push(member);
                Ok(())
            }
            ObsContent::Value(_) => Err(SyncError::InvalidInput(format!(
                "observation {} carries a value and cannot hold group members",
                self.id
            ))),
        }
    }

    /// This observation followed by all nested members, depth first.
    pub fn flatten(&self) -> Vec<&Observation> {
        let mut out = vec![self];
        for member in self.group_members() {
            out.extend(member.flatten());
        }
        out
    }

    pub(crate) fn find_mut(&mut self, id: ObservationId) -> Option<&mut Observation> {
        if self.id == id {
            return Some(self);
        }
        match &mut self.content {
            ObsContent::Group(members) => members.iter_mut().find_map(|m| m.find_mut(id)),
            ObsContent::Value(_) => None,
        }
    }

    /// Voids grouping nodes below and including this one whose members are all voided.
    pub(crate) fn void_empty_groups(&mut self, reason: &NonEmptyText, at: DateTime<Utc>) -> usize {
        if self.is_voided() {
            return 0;
        }
        let mut voided = 0;
        let all_members_voided = match &mut self.content {
            ObsContent::Value(_) => return 0,
            ObsContent::Group(members) => {
                for member in members.iter_mut() {
                    voided += member.void_empty_groups(reason, at);
                }
                members.iter().all(Observation::is_voided)
            }
        };
        if all_members_voided && self.void(reason.clone(), at) {
            voided += 1;
        }
        voided
    }
}

/// Builds observations for one encounter and, optionally, one order.
///
/// The builder copies the identifiers it needs, so the encounter can be mutated while
/// observations are being built for it.
#[derive(Clone, Debug)]
pub struct ObservationBuilder {
    person: PatientId,
    encounter: EncounterId,
    order: Option<OrderId>,
    obs_datetime: DateTime<Utc>,
}

impl ObservationBuilder {
    pub fn for_encounter(encounter: &Encounter, order: Option<&Order>) -> Self {
        Self {
            person: encounter.patient,
            encounter: encounter.id,
            order: order.map(|o| o.id),
            obs_datetime: encounter.encounter_datetime,
        }
    }

    /// Builds a value observation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if the value variant does not match the concept
    /// datatype.
    pub fn value(&self, concept: &Concept, value: ObsValue) -> SyncResult<Observation> {
        if value.datatype() != concept.datatype {
            return Err(SyncError::InvalidInput(format!(
                "concept {} expects {:?} values, got {:?}",
                concept.id,
                concept.datatype,
                value.datatype()
            )));
        }
        Ok(self.build(concept, ObsContent::Value(value)))
    }

    /// Builds an empty grouping node.
    pub fn group(&self, concept: &Concept) -> Observation {
        self.build(concept, ObsContent::Group(Vec::new()))
    }

    fn build(&self, concept: &Concept, content: ObsContent) -> Observation {
        Observation {
            id: ObservationId::new(),
            concept: concept.clone(),
            person: self.person,
            encounter: self.encounter,
            order: self.order,
            obs_datetime: self.obs_datetime,
            date_created: Utc::now(),
            content,
            void: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn encounter() -> Encounter {
        Encounter::new(PatientId::new(), Utc::now())
    }

    fn numeric(id: u32) -> Concept {
        Concept::new(ConceptId(id), format!("numeric {id}"), ConceptDatatype::Numeric)
    }

    fn reason() -> NonEmptyText {
        NonEmptyText::new("entered in error").unwrap()
    }

    #[test]
    fn value_must_match_concept_datatype() {
        let builder = ObservationBuilder::for_encounter(&encounter(), None);
        let err = builder
            .value(&numeric(856), ObsValue::Text("1000".into()))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert!(builder.value(&numeric(856), ObsValue::Numeric(1000.0)).is_ok());
    }

    #[test]
    fn value_nodes_reject_group_members() {
        let builder = ObservationBuilder::for_encounter(&encounter(), None);
        let mut value = builder.value(&numeric(1), ObsValue::Numeric(1.0)).unwrap();
        let member = builder.value(&numeric(2), ObsValue::Numeric(2.0)).unwrap();
        assert!(value.add_group_member(member).is_err());
    }

    #[test]
    fn flatten_walks_members_depth_first() {
        let builder = ObservationBuilder::for_encounter(&encounter(), None);
        let panel = Concept::new(ConceptId(10), "panel", ConceptDatatype::Text);
        let mut group = builder.group(&panel);
        group
            .add_group_member(builder.value(&numeric(1), ObsValue::Numeric(1.0)).unwrap())
            .unwrap();
        group
            .add_group_member(builder.value(&numeric(2), ObsValue::Numeric(2.0)).unwrap())
            .unwrap();

        let concepts: Vec<u32> = group.flatten().iter().map(|o| o.concept.id.0).collect();
        assert_eq!(concepts, vec![10, 1, 2]);
        assert_eq!(group.value_as_string(), "");
    }

    #[test]
    fn void_keeps_first_reason() {
        let builder = ObservationBuilder::for_encounter(&encounter(), None);
        let mut obs = builder.value(&numeric(1), ObsValue::Numeric(1.0)).unwrap();
        assert!(obs.void(reason(), Utc::now()));
        assert!(!obs.void(NonEmptyText::new("again").unwrap(), Utc::now()));
        assert_eq!(obs.void_info().unwrap().reason.as_str(), "entered in error");
    }

    #[test]
    fn empty_groups_are_voided_once_members_are() {
        let builder = ObservationBuilder::for_encounter(&encounter(), None);
        let panel = Concept::new(ConceptId(10), "panel", ConceptDatatype::Text);
        let mut group = builder.group(&panel);
        let member = builder.value(&numeric(1), ObsValue::Numeric(1.0)).unwrap();
        let member_id = member.id;
        group.add_group_member(member).unwrap();

        assert_eq!(group.void_empty_groups(&reason(), Utc::now()), 0);
        group.find_mut(member_id).unwrap().void(reason(), Utc::now());
        assert_eq!(group.void_empty_groups(&reason(), Utc::now()), 1);
        assert!(group.is_voided());
    }

    #[test]
    fn display_strings() {
        let dt = NaiveDate::from_ymd_opt(2023, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(ObsValue::Datetime(dt).as_display_string(), "2023-05-01 00:00:00");
        assert_eq!(ObsValue::Numeric(12.5).as_display_string(), "12.5");
        assert_eq!(ObsValue::Boolean(true).as_display_string(), "true");
        assert_eq!(
            ObsValue::Coded {
                concept: ConceptId(1306),
                name: "Not detected".into()
            }
            .as_display_string(),
            "Not detected"
        );
    }
}
