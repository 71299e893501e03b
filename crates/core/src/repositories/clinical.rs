//! In-memory clinical record store.
//!
//! Holds concepts, concept sources and mappings (so it doubles as the
//! [`ConceptDictionary`]), encounters and orders behind a single `RwLock`. Used by the CLI for
//! offline runs and by tests.

use super::ClinicalStore;
use crate::clinical::{Encounter, EncounterId, Order, OrderId, PatientId, ProviderId};
use crate::concepts::{Concept, ConceptDictionary, ConceptId, ConceptSource};
use crate::observation::Observation;
use crate::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct ClinicalState {
    concepts: HashMap<ConceptId, Concept>,
    /// Keyed by source name.
    sources: HashMap<String, ConceptSource>,
    /// Keyed by (source name, code).
    mappings: HashMap<(String, String), ConceptId>,
    encounters: HashMap<EncounterId, Encounter>,
    orders: HashMap<OrderId, Order>,
}

#[derive(Default)]
pub struct InMemoryClinicalStore {
    state: RwLock<ClinicalState>,
}

impl InMemoryClinicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> SyncResult<RwLockReadGuard<'_, ClinicalState>> {
        self.state.read().map_err(|_| SyncError::LockPoisoned)
    }

    fn write(&self) -> SyncResult<RwLockWriteGuard<'_, ClinicalState>> {
        self.state.write().map_err(|_| SyncError::LockPoisoned)
    }

    pub fn add_concept(&self, concept: Concept) -> SyncResult<()> {
        self.write()?.concepts.insert(concept.id, concept);
        Ok(())
    }

    /// Registers a coding system.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if another source already uses `url`.
    pub fn add_concept_source(&self, name: &str, url: &str) -> SyncResult<()> {
        let mut state = self.write()?;
        if state
            .sources
            .values()
            .any(|s| s.url == url && s.name != name)
        {
            return Err(SyncError::InvalidInput(format!(
                "coding system '{url}' is already registered"
            )));
        }
        state.sources.insert(
            name.to_owned(),
            ConceptSource {
                name: name.to_owned(),
                url: url.to_owned(),
            },
        );
        Ok(())
    }

    /// Maps `code` in the named source to a known concept.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the source or the concept is unknown.
    pub fn add_mapping(&self, source_name: &str, code: &str, concept: ConceptId) -> SyncResult<()> {
        let mut state = self.write()?;
        if !state.sources.contains_key(source_name) {
            return Err(SyncError::not_found("concept source", source_name));
        }
        if !state.concepts.contains_key(&concept) {
            return Err(SyncError::not_found("concept", concept));
        }
        state
            .mappings
            .insert((source_name.to_owned(), code.to_owned()), concept);
        Ok(())
    }

    pub fn add_encounter(&self, encounter: Encounter) -> SyncResult<()> {
        self.write()?.encounters.insert(encounter.id, encounter);
        Ok(())
    }

    pub fn add_order(&self, order: Order) -> SyncResult<()> {
        self.write()?.orders.insert(order.id, order);
        Ok(())
    }

    pub fn get_order(&self, id: OrderId) -> SyncResult<Option<Order>> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    fn live_observations_where(
        &self,
        mut keep: impl FnMut(&Observation) -> bool,
    ) -> SyncResult<Vec<Observation>> {
        let state = self.read()?;
        Ok(state
            .encounters
            .values()
            .flat_map(|e| e.live_observations())
            .filter(|o| keep(o))
            .cloned()
            .collect())
    }
}

impl ConceptDictionary for InMemoryClinicalStore {
    fn find_concept_source_by_url(&self, url: &str) -> SyncResult<Option<ConceptSource>> {
        Ok(self
            .read()?
            .sources
            .values()
            .find(|s| s.url == url)
            .cloned())
    }

    fn find_concept_by_mapping(
        &self,
        code: &str,
        source_name: &str,
    ) -> SyncResult<Option<Concept>> {
        let state = self.read()?;
        Ok(state
            .mappings
            .get(&(source_name.to_owned(), code.to_owned()))
            .and_then(|id| state.concepts.get(id))
            .cloned())
    }

    fn get_concept(&self, id: ConceptId) -> SyncResult<Option<Concept>> {
        Ok(self.read()?.concepts.get(&id).cloned())
    }
}

impl ClinicalStore for InMemoryClinicalStore {
    fn get_encounter(&self, id: EncounterId) -> SyncResult<Option<Encounter>> {
        Ok(self.read()?.encounters.get(&id).cloned())
    }

    fn get_observations_by_person_and_concept(
        &self,
        person: PatientId,
        concept: ConceptId,
    ) -> SyncResult<Vec<Observation>> {
        self.live_observations_where(|o| o.person == person && o.concept.id == concept)
    }

    fn get_observations_by_order(&self, order: OrderId) -> SyncResult<Vec<Observation>> {
        self.live_observations_where(|o| o.order == Some(order))
    }

    fn save_encounter(&self, encounter: &Encounter) -> SyncResult<()> {
        self.write()?
            .encounters
            .insert(encounter.id, encounter.clone());
        Ok(())
    }

    fn save_observation(&self, observation: &Observation, change_reason: &str) -> SyncResult<()> {
        let mut state = self.write()?;
        let encounter = state
            .encounters
            .get_mut(&observation.encounter)
            .ok_or_else(|| SyncError::not_found("encounter", observation.encounter))?;
        if !encounter.replace_observation(observation.clone()) {
            return Err(SyncError::not_found("observation", observation.id));
        }
        tracing::debug!(observation = %observation.id, change_reason, "observation saved");
        Ok(())
    }

    fn discontinue_order(
        &self,
        order: &Order,
        reason: &str,
        date: DateTime<Utc>,
        _orderer: ProviderId,
        _encounter: EncounterId,
    ) -> SyncResult<Order> {
        let mut state = self.write()?;
        let stored = state
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| SyncError::OrderDiscontinue(format!("order {} is unknown", order.id)))?;
        if !stored.is_active() {
            return Err(SyncError::OrderDiscontinue(format!(
                "order {} is already discontinued",
                order.id
            )));
        }
        stored.date_stopped = Some(date);
        stored.discontinue_reason = Some(reason.to_owned());
        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concepts::ConceptDatatype;
    use crate::observation::{ObsValue, ObservationBuilder};
    use sync_types::NonEmptyText;

    fn numeric(id: u32) -> Concept {
        Concept::new(ConceptId(id), format!("concept {id}"), ConceptDatatype::Numeric)
    }

    #[test]
    fn coding_system_url_is_unique() {
        let store = InMemoryClinicalStore::new();
        store.add_concept_source("LOINC", "http://loinc.org").unwrap();
        assert!(store.add_concept_source("LOINC-2", "http://loinc.org").is_err());
    }

    #[test]
    fn mapping_requires_known_source_and_concept() {
        let store = InMemoryClinicalStore::new();
        store.add_concept(numeric(856)).unwrap();
        assert!(store.add_mapping("LOINC", "25836-8", ConceptId(856)).is_err());
        store.add_concept_source("LOINC", "http://loinc.org").unwrap();
        assert!(store.add_mapping("LOINC", "25836-8", ConceptId(1)).is_err());
        store.add_mapping("LOINC", "25836-8", ConceptId(856)).unwrap();
        let concept = store.find_concept_by_mapping("25836-8", "LOINC").unwrap();
        assert_eq!(concept.map(|c| c.id), Some(ConceptId(856)));
    }

    #[test]
    fn observation_queries_skip_voided() {
        let store = InMemoryClinicalStore::new();
        let mut encounter = Encounter::new(PatientId::new(), Utc::now());
        let builder = ObservationBuilder::for_encounter(&encounter, None);
        let kept = builder.value(&numeric(856), ObsValue::Numeric(10.0)).unwrap();
        let mut voided = builder.value(&numeric(856), ObsValue::Numeric(20.0)).unwrap();
        voided.void(NonEmptyText::new("wrong").unwrap(), Utc::now());
        let kept_id = kept.id;
        encounter.add_observation(kept);
        encounter.add_observation(voided);
        let patient = encounter.patient;
        store.save_encounter(&encounter).unwrap();

        let found = store
            .get_observations_by_person_and_concept(patient, ConceptId(856))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, kept_id);
    }

    #[test]
    fn save_observation_replaces_node() {
        let store = InMemoryClinicalStore::new();
        let mut encounter = Encounter::new(PatientId::new(), Utc::now());
        let builder = ObservationBuilder::for_encounter(&encounter, None);
        let mut obs = builder.value(&numeric(856), ObsValue::Numeric(10.0)).unwrap();
        encounter.add_observation(obs.clone());
        store.save_encounter(&encounter).unwrap();

        obs.void(NonEmptyText::new("wrong").unwrap(), Utc::now());
        store.save_observation(&obs, "void").unwrap();
        let stored = store.get_encounter(encounter.id).unwrap().unwrap();
        assert!(stored.observations()[0].is_voided());
    }

    #[test]
    fn discontinue_order_once() {
        let store = InMemoryClinicalStore::new();
        let encounter = Encounter::new(PatientId::new(), Utc::now());
        let order = Order::new(numeric(856), &encounter, ProviderId::new());
        store.add_order(order.clone()).unwrap();

        let now = Utc::now();
        let stopped = store
            .discontinue_order(&order, "Completed", now, order.orderer, order.encounter)
            .unwrap();
        assert_eq!(stopped.date_stopped, Some(now));
        assert_eq!(stopped.discontinue_reason.as_deref(), Some("Completed"));
        assert!(matches!(
            store.discontinue_order(&order, "Completed", now, order.orderer, order.encounter),
            Err(SyncError::OrderDiscontinue(_))
        ));
    }
}
