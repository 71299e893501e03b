//! Result merge engine.
//!
//! Merges externally produced lab results into the clinical record without duplicating data:
//!
//! - [`MergeEngine::merge_results`] translates a result bundle into grouped observations
//! - [`MergeEngine::merge_viral_load`] records a viral load result as a fixed three-member
//!   panel, replacing earlier values on the same encounter
//!
//! Each merge runs under a lock for its target encounter: guard, build, one
//! `save_encounter`, then a best-effort order discontinue. Everything that can be validated is
//! validated before the encounter is saved, so a failed merge leaves nothing behind.

mod guard;
mod results;
pub mod viral_load;

use crate::clinical::{Encounter, EncounterId, ObservationId, Order};
use crate::concepts::{ConceptDictionary, ConceptId, ConceptResolver};
use crate::constants::{
    DATE_SAMPLE_TAKEN_CONCEPT, OBS_REPLACED_REASON, ORDER_COMPLETED_REASON,
    TEST_GROUP_MARKER_CONCEPT, VL_QUALITATIVE_CONCEPT, VL_QUANTITATIVE_CONCEPT,
};
use crate::observation::{ObsValue, ObservationBuilder};
use crate::repositories::ClinicalStore;
use crate::{SyncError, SyncResult};
use chrono::{DateTime, NaiveTime, Utc};
use fhir::{ResultBundle, ResultBundleData};
use guard::MergeLocks;
use std::collections::HashSet;
use std::sync::Arc;
use sync_types::NonEmptyText;
use viral_load::ViralLoadResult;

/// Result of a merge attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// Observations were appended and the encounter saved. `added` counts every new
    /// observation node, grouping nodes included.
    Merged { encounter: Encounter, added: usize },
    /// Nothing in the input could be mapped; the encounter was not touched.
    NoResults,
    /// Results were already recorded; nothing was written.
    AlreadyMerged,
}

pub struct MergeEngine {
    store: Arc<dyn ClinicalStore>,
    resolver: ConceptResolver,
    locks: MergeLocks,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn ClinicalStore>, dictionary: Arc<dyn ConceptDictionary>) -> Self {
        Self {
            store,
            resolver: ConceptResolver::new(dictionary),
            locks: MergeLocks::default(),
        }
    }

    /// Merges a result bundle into the encounter of `order`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if the order's encounter does not exist
    /// - persistence errors from the clinical store, in which case nothing was saved
    ///
    /// Unmapped codes and malformed values are skipped, not reported as errors. A failure to
    /// discontinue the order is logged and does not change the outcome.
    pub fn merge_results(
        &self,
        bundle: &ResultBundleData,
        order: &Order,
    ) -> SyncResult<MergeOutcome> {
        self.merge(bundle, order.encounter, Some(order))
    }

    /// Merges a result bundle that is not tied to an order.
    ///
    /// The encounter counts as already merged once it carries a test group marker observation.
    pub fn merge_encounter_results(
        &self,
        bundle: &ResultBundleData,
        encounter: EncounterId,
    ) -> SyncResult<MergeOutcome> {
        self.merge(bundle, encounter, None)
    }

    /// Parses `json` as a result bundle and merges it into the encounter of `order`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Fhir`] if the bundle does not parse; otherwise as
    /// [`merge_results`](Self::merge_results).
    pub fn merge_results_json(&self, json: &str, order: &Order) -> SyncResult<MergeOutcome> {
        let bundle = ResultBundle::parse(json)?;
        self.merge_results(&bundle, order)
    }

    fn merge(
        &self,
        bundle: &ResultBundleData,
        encounter_id: EncounterId,
        order: Option<&Order>,
    ) -> SyncResult<MergeOutcome> {
        self.locks.with_lock(encounter_id, || {
            let mut encounter = self.load_encounter(encounter_id)?;
            if guard::already_merged(self.store.as_ref(), &encounter, order)? {
                tracing::info!(encounter = %encounter_id, order = ?order.map(|o| o.id), "results already merged");
                return Ok(MergeOutcome::AlreadyMerged);
            }

            let builder = ObservationBuilder::for_encounter(&encounter, order);
            let observations = results::build_observations(&self.resolver, &builder, bundle)?;
            if observations.is_empty() {
                tracing::info!(encounter = %encounter_id, "no mappable results in bundle");
                return Ok(MergeOutcome::NoResults);
            }

            let added: usize = observations.iter().map(|o| o.flatten().len()).sum();
            for observation in observations {
                encounter.add_observation(observation);
            }
            self.store.save_encounter(&encounter)?;
            tracing::info!(encounter = %encounter_id, added, "results merged");

            if let Some(order) = order {
                self.discontinue(order);
            }
            Ok(MergeOutcome::Merged { encounter, added })
        })
    }

    /// Records a viral load result on `encounter_id`.
    ///
    /// The result is grouped under the order's concept, or the default panel when there is no
    /// order. Live observations of the patient for the sample date, qualitative and
    /// quantitative concepts on this encounter are voided first, along with any grouping node
    /// they leave empty.
    ///
    /// If results are already recorded nothing is written, but a supplied order is still
    /// discontinued.
    ///
    /// # Errors
    ///
    /// - [`SyncError::UnparseableDate`] / [`SyncError::InvalidNumeric`] for bad input
    /// - [`SyncError::NotFound`] for a missing encounter or dictionary concept
    /// - persistence errors from the clinical store
    ///
    /// Input errors are raised before anything is saved.
    pub fn merge_viral_load(
        &self,
        result: &ViralLoadResult,
        encounter_id: EncounterId,
        order: Option<&Order>,
    ) -> SyncResult<MergeOutcome> {
        let parsed = result.parse()?;
        let date_concept = self.resolver.concept(DATE_SAMPLE_TAKEN_CONCEPT)?;
        let qualitative_concept = self.resolver.concept(VL_QUALITATIVE_CONCEPT)?;
        let quantitative_concept = self.resolver.concept(VL_QUANTITATIVE_CONCEPT)?;
        let answer = self.resolver.concept(parsed.outcome.concept())?;
        let group_concept = match order {
            Some(order) => order.concept.clone(),
            None => self.resolver.concept(TEST_GROUP_MARKER_CONCEPT)?,
        };
        let replaced = NonEmptyText::new(OBS_REPLACED_REASON)?;

        self.locks.with_lock(encounter_id, || {
            let mut encounter = self.load_encounter(encounter_id)?;
            if guard::already_merged(self.store.as_ref(), &encounter, order)? {
                tracing::info!(encounter = %encounter_id, "viral load already recorded");
                if let Some(order) = order {
                    self.discontinue(order);
                }
                return Ok(MergeOutcome::AlreadyMerged);
            }

            let builder = ObservationBuilder::for_encounter(&encounter, order);
            let mut group = builder.group(&group_concept);
            group.add_group_member(builder.value(
                &date_concept,
                ObsValue::Datetime(parsed.collected_on.and_time(NaiveTime::MIN)),
            )?)?;
            group.add_group_member(builder.value(
                &qualitative_concept,
                ObsValue::Coded {
                    concept: answer.id,
                    name: answer.name.clone(),
                },
            )?)?;
            group.add_group_member(
                builder.value(&quantitative_concept, ObsValue::Numeric(parsed.copies))?,
            )?;

            let now = Utc::now();
            let voided = self.void_replaced(
                &mut encounter,
                [date_concept.id, qualitative_concept.id, quantitative_concept.id],
                &replaced,
                now,
            )?;
            let emptied = encounter.void_empty_groups(&replaced, now);

            let added = group.flatten().len();
            encounter.add_observation(group);
            self.store.save_encounter(&encounter)?;
            tracing::info!(
                encounter = %encounter_id,
                outcome = %parsed.outcome,
                voided = voided + emptied,
                "viral load merged"
            );

            if let Some(order) = order {
                self.discontinue(order);
            }
            Ok(MergeOutcome::Merged { encounter, added })
        })
    }

    /// Voids one observation on an encounter and saves it. Returns `false` if the observation
    /// was already voided.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the encounter or observation does not exist, and
    /// [`SyncError::Text`] for a blank reason.
    pub fn void_observation(
        &self,
        encounter_id: EncounterId,
        observation_id: ObservationId,
        reason: &str,
    ) -> SyncResult<bool> {
        let reason = NonEmptyText::new(reason)?;
        self.locks.with_lock(encounter_id, || {
            let mut encounter = self.load_encounter(encounter_id)?;
            let observation = encounter
                .observation_mut(observation_id)
                .ok_or_else(|| SyncError::not_found("observation", observation_id))?;
            if !observation.void(reason.clone(), Utc::now()) {
                return Ok(false);
            }
            self.store.save_observation(observation, reason.as_str())?;
            Ok(true)
        })
    }

    fn load_encounter(&self, id: EncounterId) -> SyncResult<Encounter> {
        self.store
            .get_encounter(id)?
            .ok_or_else(|| SyncError::not_found("encounter", id))
    }

    fn void_replaced(
        &self,
        encounter: &mut Encounter,
        concepts: [ConceptId; 3],
        reason: &NonEmptyText,
        now: DateTime<Utc>,
    ) -> SyncResult<usize> {
        let mut ids: HashSet<ObservationId> = encounter
            .live_observations()
            .into_iter()
            .filter(|o| concepts.contains(&o.concept.id))
            .map(|o| o.id)
            .collect();
        for concept in concepts {
            for obs in self
                .store
                .get_observations_by_person_and_concept(encounter.patient, concept)?
            {
                if obs.encounter == encounter.id {
                    ids.insert(obs.id);
                }
            }
        }

        let mut voided = 0;
        for id in ids {
            if encounter.void_observation(id, reason.clone(), now) {
                voided += 1;
            }
        }
        Ok(voided)
    }

    fn discontinue(&self, order: &Order) {
        match self.store.discontinue_order(
            order,
            ORDER_COMPLETED_REASON,
            Utc::now(),
            order.orderer,
            order.encounter,
        ) {
            Ok(_) => tracing::info!(order = %order.id, "order discontinued"),
            Err(e) => tracing::error!(order = %order.id, error = %e, "failed to discontinue order"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinical::{OrderId, PatientId, ProviderId};
    use crate::concepts::{Concept, ConceptDatatype};
    use crate::observation::Observation;
    use crate::repositories::clinical::InMemoryClinicalStore;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LOINC: &str = "http://loinc.org";
    const PANEL: ConceptId = ConceptId(1000);
    const CD4: ConceptId = ConceptId(5497);
    const HIV_RESULT: ConceptId = ConceptId(2000);
    const POSITIVE: ConceptId = ConceptId(703);
    const COMMENT: ConceptId = ConceptId(4000);

    /// Delegates to the in-memory store, counting writes and optionally failing them.
    struct RecordingStore {
        inner: InMemoryClinicalStore,
        saves: AtomicUsize,
        discontinues: AtomicUsize,
        fail_saves: bool,
        fail_discontinue: bool,
    }

    impl RecordingStore {
        fn new(inner: InMemoryClinicalStore) -> Self {
            Self {
                inner,
                saves: AtomicUsize::new(0),
                discontinues: AtomicUsize::new(0),
                fail_saves: false,
                fail_discontinue: false,
            }
        }
    }

    impl ClinicalStore for RecordingStore {
        fn get_encounter(&self, id: EncounterId) -> SyncResult<Option<Encounter>> {
            self.inner.get_encounter(id)
        }

        fn get_observations_by_person_and_concept(
            &self,
            person: PatientId,
            concept: ConceptId,
        ) -> SyncResult<Vec<Observation>> {
            self.inner
                .get_observations_by_person_and_concept(person, concept)
        }

        fn get_observations_by_order(&self, order: OrderId) -> SyncResult<Vec<Observation>> {
            self.inner.get_observations_by_order(order)
        }

        fn save_encounter(&self, encounter: &Encounter) -> SyncResult<()> {
            if self.fail_saves {
                return Err(SyncError::Persistence("disk full".into()));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save_encounter(encounter)
        }

        fn save_observation(&self, observation: &Observation, reason: &str) -> SyncResult<()> {
            self.inner.save_observation(observation, reason)
        }

        fn discontinue_order(
            &self,
            order: &Order,
            reason: &str,
            date: DateTime<Utc>,
            orderer: ProviderId,
            encounter: EncounterId,
        ) -> SyncResult<Order> {
            self.discontinues.fetch_add(1, Ordering::SeqCst);
            if self.fail_discontinue {
                return Err(SyncError::OrderDiscontinue("order service offline".into()));
            }
            self.inner
                .discontinue_order(order, reason, date, orderer, encounter)
        }
    }

    struct Fixture {
        dictionary: Arc<InMemoryClinicalStore>,
        store: Arc<RecordingStore>,
        engine: MergeEngine,
        encounter: EncounterId,
    }

    fn dictionary() -> InMemoryClinicalStore {
        let d = InMemoryClinicalStore::new();
        let concepts = [
            Concept::new(PANEL, "Renal panel", ConceptDatatype::Text).with_set_members([
                ConceptId(1),
                ConceptId(2),
                ConceptId(3),
            ]),
            Concept::new(ConceptId(1), "Creatinine", ConceptDatatype::Numeric),
            Concept::new(ConceptId(2), "Urea", ConceptDatatype::Numeric),
            Concept::new(ConceptId(3), "Potassium", ConceptDatatype::Numeric),
            Concept::new(CD4, "CD4 count", ConceptDatatype::Numeric),
            Concept::new(HIV_RESULT, "HIV test result", ConceptDatatype::Coded),
            Concept::new(POSITIVE, "Positive", ConceptDatatype::Text),
            Concept::new(COMMENT, "Lab comment", ConceptDatatype::Text),
            Concept::new(TEST_GROUP_MARKER_CONCEPT, "Viral load test", ConceptDatatype::Text),
            Concept::new(DATE_SAMPLE_TAKEN_CONCEPT, "Date sample taken", ConceptDatatype::Datetime),
            Concept::new(VL_QUALITATIVE_CONCEPT, "Viral load qualitative", ConceptDatatype::Coded),
            Concept::new(VL_QUANTITATIVE_CONCEPT, "Viral load", ConceptDatatype::Numeric),
            Concept::new(ConceptId(1301), "Detected", ConceptDatatype::Text),
            Concept::new(ConceptId(1304), "Failed", ConceptDatatype::Text),
            Concept::new(ConceptId(1306), "Not detected", ConceptDatatype::Text),
        ];
        for concept in concepts {
            d.add_concept(concept).unwrap();
        }
        d.add_concept_source("LOINC", LOINC).unwrap();
        for (code, concept) in [
            ("panel", PANEL),
            ("creat", ConceptId(1)),
            ("urea", ConceptId(2)),
            ("k", ConceptId(3)),
            ("cd4", CD4),
            ("hiv", HIV_RESULT),
            ("pos", POSITIVE),
            ("comment", COMMENT),
        ] {
            d.add_mapping("LOINC", code, concept).unwrap();
        }
        d
    }

    fn fixture_with(configure: impl FnOnce(&mut RecordingStore)) -> Fixture {
        let dictionary = Arc::new(dictionary());
        let mut store = RecordingStore::new(InMemoryClinicalStore::new());
        configure(&mut store);
        let encounter = Encounter::new(PatientId::new(), Utc::now());
        let encounter_id = encounter.id;
        store.inner.add_encounter(encounter).unwrap();
        let store = Arc::new(store);
        let engine = MergeEngine::new(store.clone(), dictionary.clone());
        Fixture {
            dictionary,
            store,
            engine,
            encounter: encounter_id,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    impl Fixture {
        fn order(&self, concept: ConceptId) -> Order {
            let concept = self.dictionary.get_concept(concept).unwrap().unwrap();
            let encounter = self.stored_encounter();
            let order = Order::new(concept, &encounter, ProviderId::new());
            self.store.inner.add_order(order.clone()).unwrap();
            order
        }

        fn stored_encounter(&self) -> Encounter {
            self.store.inner.get_encounter(self.encounter).unwrap().unwrap()
        }

        fn live_count(&self, concept: ConceptId) -> usize {
            self.stored_encounter()
                .live_observations()
                .into_iter()
                .filter(|o| o.concept.id == concept)
                .count()
        }
    }

    fn coding(code: &str) -> Value {
        json!({"coding": [{"system": LOINC, "code": code}]})
    }

    fn report(code: &str, results: &[&str]) -> Value {
        let refs: Vec<Value> = results
            .iter()
            .map(|id| json!({"reference": format!("Observation/{id}")}))
            .collect();
        json!({"resource": {"resourceType": "DiagnosticReport", "code": coding(code), "result": refs}})
    }

    fn numeric_result(id: &str, code: &str, value: f64) -> Value {
        json!({"resource": {
            "resourceType": "Observation", "id": id, "code": coding(code),
            "valueQuantity": {"value": value, "unit": "mg/dL"}
        }})
    }

    fn bundle(entries: Vec<Value>) -> ResultBundleData {
        ResultBundle::from_value(json!({"resourceType": "Bundle", "type": "collection", "entry": entries}))
            .unwrap()
    }

    fn panel_bundle() -> ResultBundleData {
        bundle(vec![
            report("panel", &["a", "b", "c"]),
            numeric_result("a", "creat", 1.1),
            numeric_result("b", "urea", 30.0),
            numeric_result("c", "k", 4.2),
        ])
    }

    #[test]
    fn panel_report_is_grouped_and_order_completed() {
        let f = fixture();
        let order = f.order(PANEL);

        let outcome = f.engine.merge_results(&panel_bundle(), &order).unwrap();
        let MergeOutcome::Merged { encounter, added } = outcome else {
            panic!("expected a merge");
        };
        assert_eq!(added, 4);
        assert_eq!(encounter.observations().len(), 1);
        let group = &encounter.observations()[0];
        assert_eq!(group.concept.id, PANEL);
        assert!(group.value().is_none());
        let members: Vec<ConceptId> = group.group_members().iter().map(|m| m.concept.id).collect();
        assert_eq!(members, vec![ConceptId(1), ConceptId(2), ConceptId(3)]);
        assert!(group.flatten().iter().all(|o| o.order == Some(order.id)));

        assert_eq!(f.store.saves.load(Ordering::SeqCst), 1);
        let stopped = f.store.inner.get_order(order.id).unwrap().unwrap();
        assert_eq!(stopped.discontinue_reason.as_deref(), Some(ORDER_COMPLETED_REASON));
    }

    #[test]
    fn merging_twice_is_a_noop() {
        let f = fixture();
        let order = f.order(PANEL);
        f.engine.merge_results(&panel_bundle(), &order).unwrap();
        let after_first = f.stored_encounter();

        let second = f.engine.merge_results(&panel_bundle(), &order).unwrap();
        assert_eq!(second, MergeOutcome::AlreadyMerged);
        assert_eq!(f.stored_encounter(), after_first);
        assert_eq!(f.store.saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_panel_results_are_top_level() {
        let f = fixture();
        let order = f.order(CD4);
        let bundle = bundle(vec![report("cd4", &["x"]), numeric_result("x", "cd4", 350.0)]);

        let MergeOutcome::Merged { encounter, added } =
            f.engine.merge_results(&bundle, &order).unwrap()
        else {
            panic!("expected a merge");
        };
        assert_eq!(added, 1);
        assert_eq!(encounter.observations().len(), 1);
        let obs = &encounter.observations()[0];
        assert_eq!(obs.concept.id, CD4);
        assert_eq!(obs.value(), Some(&ObsValue::Numeric(350.0)));
    }

    #[test]
    fn unmapped_coded_value_skips_only_that_result() {
        let f = fixture();
        let order = f.order(PANEL);
        let bundle = bundle(vec![
            report("panel", &["a", "hiv-1", "hiv-2"]),
            numeric_result("a", "creat", 1.1),
            json!({"resource": {
                "resourceType": "Observation", "id": "hiv-1", "code": coding("hiv"),
                "valueCodeableConcept": coding("pos")
            }}),
            json!({"resource": {
                "resourceType": "Observation", "id": "hiv-2", "code": coding("hiv"),
                "valueCodeableConcept": coding("unknown-answer")
            }}),
        ]);

        let MergeOutcome::Merged { encounter, .. } =
            f.engine.merge_results(&bundle, &order).unwrap()
        else {
            panic!("expected a merge");
        };
        let group = &encounter.observations()[0];
        assert_eq!(group.group_members().len(), 2);
        assert_eq!(
            group.group_members()[1].value(),
            Some(&ObsValue::Coded {
                concept: POSITIVE,
                name: "Positive".into()
            })
        );
    }

    #[test]
    fn empty_and_missing_values_are_never_attached() {
        let f = fixture();
        let order = f.order(PANEL);
        let bundle = bundle(vec![
            report("panel", &["blank", "missing", "dangling", "k"]),
            json!({"resource": {
                "resourceType": "Observation", "id": "blank", "code": coding("comment"),
                "valueString": "   "
            }}),
            json!({"resource": {"resourceType": "Observation", "id": "missing", "code": coding("urea")}}),
            numeric_result("k", "k", 4.2),
        ]);

        let MergeOutcome::Merged { encounter, added } =
            f.engine.merge_results(&bundle, &order).unwrap()
        else {
            panic!("expected a merge");
        };
        assert_eq!(added, 2);
        let members = encounter.observations()[0].group_members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].concept.id, ConceptId(3));
    }

    #[test]
    fn malformed_value_skips_only_that_result() {
        let f = fixture();
        let order = f.order(PANEL);
        let bundle = bundle(vec![
            report("panel", &["a", "b", "c"]),
            numeric_result("a", "creat", 1.1),
            json!({"resource": {
                "resourceType": "Observation", "id": "b", "code": coding("urea"),
                "valueQuantity": {"value": "30.0"}
            }}),
            json!({"resource": {
                "resourceType": "Observation", "id": "c", "code": coding("k"),
                "valueQuantity": {"value": "high"}
            }}),
        ]);

        let MergeOutcome::Merged { encounter, added } =
            f.engine.merge_results(&bundle, &order).unwrap()
        else {
            panic!("expected a merge");
        };
        assert_eq!(added, 3);
        let members = encounter.observations()[0].group_members();
        let concepts: Vec<ConceptId> = members.iter().map(|m| m.concept.id).collect();
        assert_eq!(concepts, vec![ConceptId(1), ConceptId(2)]);
        assert_eq!(members[1].value(), Some(&ObsValue::Numeric(30.0)));
    }

    #[test]
    fn unmapped_report_contributes_nothing() {
        let f = fixture();
        let order = f.order(PANEL);
        let bundle = bundle(vec![
            report("not-a-test", &["a"]),
            numeric_result("a", "creat", 1.1),
        ]);

        assert_eq!(
            f.engine.merge_results(&bundle, &order).unwrap(),
            MergeOutcome::NoResults
        );
        assert_eq!(f.store.saves.load(Ordering::SeqCst), 0);
        assert!(f.store.inner.get_order(order.id).unwrap().unwrap().is_active());
    }

    #[test]
    fn reports_are_processed_independently() {
        let f = fixture();
        let bundle = bundle(vec![
            report("cd4", &["x"]),
            report("panel", &["a"]),
            numeric_result("x", "cd4", 350.0),
            numeric_result("a", "creat", 1.1),
        ]);

        let MergeOutcome::Merged { encounter, .. } =
            f.engine.merge_encounter_results(&bundle, f.encounter).unwrap()
        else {
            panic!("expected a merge");
        };
        let top: Vec<ConceptId> = encounter.observations().iter().map(|o| o.concept.id).collect();
        assert_eq!(top, vec![CD4, PANEL]);
    }

    #[test]
    fn discontinue_failure_does_not_fail_merge() {
        let f = fixture_with(|s| s.fail_discontinue = true);
        let order = f.order(PANEL);
        let outcome = f.engine.merge_results(&panel_bundle(), &order).unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        assert_eq!(f.store.discontinues.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn persistence_failure_propagates_and_leaves_order_open() {
        let f = fixture_with(|s| s.fail_saves = true);
        let order = f.order(PANEL);
        let err = f.engine.merge_results(&panel_bundle(), &order).unwrap_err();
        assert!(matches!(err, SyncError::Persistence(_)));
        assert!(f.stored_encounter().observations().is_empty());
        assert_eq!(f.store.discontinues.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn malformed_json_is_a_fhir_error() {
        let f = fixture();
        let order = f.order(PANEL);
        let err = f
            .engine
            .merge_results_json(r#"{"entry": "nope"}"#, &order)
            .unwrap_err();
        assert!(matches!(err, SyncError::Fhir(_)));
    }

    #[test]
    fn missing_encounter_is_not_found() {
        let f = fixture();
        let err = f
            .engine
            .merge_encounter_results(&panel_bundle(), EncounterId::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { entity: "encounter", .. }));
    }

    fn vl(qualitative: &str, quantitative: &str, date: &str) -> ViralLoadResult {
        ViralLoadResult {
            qualitative: qualitative.into(),
            quantitative: quantitative.into(),
            date_collected: date.into(),
        }
    }

    #[test]
    fn viral_load_replaces_earlier_values() {
        let f = fixture();
        let mut encounter = f.stored_encounter();
        let builder = ObservationBuilder::for_encounter(&encounter, None);
        let old_quantity = f.dictionary.get_concept(VL_QUANTITATIVE_CONCEPT).unwrap().unwrap();
        let old = builder
            .value(&old_quantity, ObsValue::Numeric(999.0))
            .unwrap();
        let old_id = old.id;
        encounter.add_observation(old);
        f.store.inner.save_encounter(&encounter).unwrap();

        let outcome = f
            .engine
            .merge_viral_load(&vl("Not detected", "0", "01/05/2023"), f.encounter, None)
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { added: 4, .. }));

        for concept in [
            DATE_SAMPLE_TAKEN_CONCEPT,
            VL_QUALITATIVE_CONCEPT,
            VL_QUANTITATIVE_CONCEPT,
        ] {
            assert_eq!(f.live_count(concept), 1, "concept {concept}");
        }
        let stored = f.stored_encounter();
        let old = stored.observations().iter().find(|o| o.id == old_id).unwrap();
        assert_eq!(
            old.void_info().map(|v| v.reason.as_str()),
            Some(OBS_REPLACED_REASON)
        );

        let group = stored.observations().last().unwrap();
        assert_eq!(group.concept.id, TEST_GROUP_MARKER_CONCEPT);
        assert_eq!(
            group.group_members()[1].value(),
            Some(&ObsValue::Coded {
                concept: ConceptId(1306),
                name: "Not detected".into()
            })
        );
        assert_eq!(
            group.group_members()[0].value_as_string(),
            "2023-05-01 00:00:00"
        );
    }

    #[test]
    fn viral_load_without_order_is_idempotent() {
        let f = fixture();
        let result = vl("12345 copies/mL", "12345", "2023-05-01");
        f.engine.merge_viral_load(&result, f.encounter, None).unwrap();
        assert_eq!(
            f.engine.merge_viral_load(&result, f.encounter, None).unwrap(),
            MergeOutcome::AlreadyMerged
        );
        assert_eq!(f.live_count(VL_QUANTITATIVE_CONCEPT), 1);
        assert_eq!(f.store.discontinues.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn viral_load_with_order_groups_under_order_concept() {
        let f = fixture();
        let order = f.order(TEST_GROUP_MARKER_CONCEPT);
        let result = vl("FAILED", "0", "2023-05-01");
        let MergeOutcome::Merged { encounter, .. } = f
            .engine
            .merge_viral_load(&result, f.encounter, Some(&order))
            .unwrap()
        else {
            panic!("expected a merge");
        };
        let group = encounter.observations().last().unwrap();
        assert_eq!(group.concept.id, order.concept.id);
        assert!(group.flatten().iter().all(|o| o.order == Some(order.id)));

        assert_eq!(
            f.engine
                .merge_viral_load(&result, f.encounter, Some(&order))
                .unwrap(),
            MergeOutcome::AlreadyMerged
        );
        assert_eq!(
            f.store.discontinues.load(Ordering::SeqCst),
            2,
            "order is discontinued on both calls"
        );
    }

    #[test]
    fn viral_load_input_errors_write_nothing() {
        let f = fixture();
        let err = f
            .engine
            .merge_viral_load(&vl("Detected", "10", "2023.05.01"), f.encounter, None)
            .unwrap_err();
        assert!(matches!(err, SyncError::UnparseableDate(_)));

        let err = f
            .engine
            .merge_viral_load(&vl("Detected", "ten", "2023-05-01"), f.encounter, None)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidNumeric(_)));
        assert_eq!(f.store.saves.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn void_observation_saves_single_observation() {
        let f = fixture();
        let order = f.order(CD4);
        let bundle = bundle(vec![report("cd4", &["x"]), numeric_result("x", "cd4", 350.0)]);
        let MergeOutcome::Merged { encounter, .. } =
            f.engine.merge_results(&bundle, &order).unwrap()
        else {
            panic!("expected a merge");
        };
        let id = encounter.observations()[0].id;

        assert!(f.engine.void_observation(f.encounter, id, "entered in error").unwrap());
        assert!(!f.engine.void_observation(f.encounter, id, "again").unwrap());
        assert_eq!(f.live_count(CD4), 0);
        assert!(f.engine.void_observation(f.encounter, id, "  ").is_err());
    }
}
