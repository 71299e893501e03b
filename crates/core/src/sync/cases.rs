//! Case-based grouping of sync artifacts.
//!
//! A case is identified by `(profile, patient, case_identifier)`. Artifacts added to a case are
//! shipped together as one collection bundle.

use super::artifacts::SyncArtifactService;
use super::{SyncFhirCase, SyncFhirProfile, SyncFhirResource};
use crate::clinical::PatientId;
use crate::repositories::SyncRepository;
use crate::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use fhir::CollectionBundle;
use std::sync::{Arc, Mutex};
use sync_types::NonEmptyText;
use uuid::Uuid;

pub struct CaseAggregator {
    repo: Arc<dyn SyncRepository>,
    artifacts: Arc<SyncArtifactService>,
    create_lock: Mutex<()>,
}

impl CaseAggregator {
    pub fn new(repo: Arc<dyn SyncRepository>, artifacts: Arc<SyncArtifactService>) -> Self {
        Self {
            repo,
            artifacts,
            create_lock: Mutex::new(()),
        }
    }

    /// Looks up a case by its composite key.
    pub fn get_case(
        &self,
        profile: Uuid,
        patient: PatientId,
        case_identifier: &str,
    ) -> SyncResult<Option<SyncFhirCase>> {
        let case_identifier = case_identifier.trim();
        Ok(self
            .repo
            .all_cases()?
            .into_iter()
            .find(|c| c.matches(profile, patient, case_identifier)))
    }

    /// Returns the case for the composite key, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Text`] for a blank case identifier, or a repository error.
    pub fn get_or_create_case(
        &self,
        profile: &SyncFhirProfile,
        patient: PatientId,
        case_identifier: &str,
    ) -> SyncResult<SyncFhirCase> {
        let case_identifier = NonEmptyText::new(case_identifier)?;

        let _guard = self.create_lock.lock().map_err(|_| SyncError::LockPoisoned)?;
        if let Some(existing) = self.get_case(profile.uuid, patient, case_identifier.as_str())? {
            return Ok(existing);
        }

        let case = SyncFhirCase {
            uuid: Uuid::new_v4(),
            profile: profile.uuid,
            patient,
            case_identifier,
            date_created: Utc::now(),
            last_update_date: None,
        };
        self.repo.save_case(&case)?;
        tracing::info!(case = %case.uuid, profile = %profile.uuid, "sync case created");
        Ok(case)
    }

    pub fn cases_by_profile(&self, profile: Uuid) -> SyncResult<Vec<SyncFhirCase>> {
        Ok(self
            .repo
            .all_cases()?
            .into_iter()
            .filter(|c| c.profile == profile)
            .collect())
    }

    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if no case has this UUID.
    pub fn case_by_uuid(&self, uuid: Uuid) -> SyncResult<SyncFhirCase> {
        self.repo
            .get_case(uuid)?
            .ok_or_else(|| SyncError::not_found("sync case", uuid))
    }

    pub fn all_cases(&self) -> SyncResult<Vec<SyncFhirCase>> {
        self.repo.all_cases()
    }

    /// Creates a pending artifact linked to `case` and touches the case's update date.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the case or its profile is missing.
    pub fn add_resource(
        &self,
        case: Uuid,
        resource_type: &str,
        resource: serde_json::Value,
    ) -> SyncResult<SyncFhirResource> {
        let mut stored = self.case_by_uuid(case)?;
        let profile = self
            .repo
            .get_profile(stored.profile)?
            .ok_or_else(|| SyncError::not_found("sync profile", stored.profile))?;

        let created = self
            .artifacts
            .create(&profile, resource_type, resource, Some(case))?;
        stored.last_update_date = Some(Utc::now());
        self.repo.save_case(&stored)?;
        Ok(created)
    }

    /// Pending artifacts of a case.
    pub fn case_resources(&self, case: &SyncFhirCase) -> SyncResult<Vec<SyncFhirResource>> {
        Ok(self
            .artifacts
            .unsynced(case.profile)?
            .into_iter()
            .filter(|r| r.case() == Some(case.uuid))
            .collect())
    }

    /// Renders the pending artifacts of a case as a `collection` bundle.
    pub fn case_bundle(&self, case: Uuid) -> SyncResult<serde_json::Value> {
        self.case_bundle_at(case, Utc::now())
    }

    pub fn case_bundle_at(&self, case: Uuid, now: DateTime<Utc>) -> SyncResult<serde_json::Value> {
        let case = self.case_by_uuid(case)?;
        let resources = self
            .case_resources(&case)?
            .into_iter()
            .map(|r| r.resource().clone())
            .collect();
        Ok(CollectionBundle::render(Uuid::new_v4(), now, resources)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::InMemorySyncRepository;
    use serde_json::json;
    use std::thread;

    fn setup() -> (Arc<CaseAggregator>, Arc<SyncArtifactService>, SyncFhirProfile) {
        let profile = SyncFhirProfile {
            uuid: Uuid::new_v4(),
            name: NonEmptyText::new("Case based surveillance").unwrap(),
            scheduled_task_name: None,
            resource_types: vec![
                NonEmptyText::new("Patient").unwrap(),
                NonEmptyText::new("Observation").unwrap(),
            ],
            case_based: true,
            url: None,
            enabled: true,
            duration_to_keep_synced_resources: 14,
        };
        let repo = Arc::new(InMemorySyncRepository::new());
        repo.save_profile(&profile).unwrap();
        let artifacts = Arc::new(SyncArtifactService::new(repo.clone()));
        let cases = Arc::new(CaseAggregator::new(repo, artifacts.clone()));
        (cases, artifacts, profile)
    }

    #[test]
    fn case_creation_is_idempotent() {
        let (cases, _, profile) = setup();
        let patient = PatientId::new();
        let first = cases.get_or_create_case(&profile, patient, "ART-001").unwrap();
        let second = cases.get_or_create_case(&profile, patient, " ART-001 ").unwrap();
        assert_eq!(first.uuid, second.uuid);

        let other = cases.get_or_create_case(&profile, patient, "ART-002").unwrap();
        assert_ne!(first.uuid, other.uuid);
        assert_eq!(cases.cases_by_profile(profile.uuid).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_creation_yields_one_case() {
        let (cases, _, profile) = setup();
        let patient = PatientId::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cases = cases.clone();
                let profile = profile.clone();
                thread::spawn(move || {
                    cases
                        .get_or_create_case(&profile, patient, "HTS-42")
                        .unwrap()
                        .uuid
                })
            })
            .collect();
        let uuids: Vec<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(uuids.iter().all(|u| *u == uuids[0]));
        assert_eq!(cases.all_cases().unwrap().len(), 1);
    }

    #[test]
    fn case_bundle_holds_pending_case_resources() {
        let (cases, artifacts, profile) = setup();
        let case = cases
            .get_or_create_case(&profile, PatientId::new(), "ART-001")
            .unwrap();
        assert!(case.last_update_date.is_none());

        let patient = cases
            .add_resource(case.uuid, "Patient", json!({"resourceType": "Patient", "id": "p"}))
            .unwrap();
        cases
            .add_resource(
                case.uuid,
                "Observation",
                json!({"resourceType": "Observation", "id": "o"}),
            )
            .unwrap();
        artifacts
            .create(&profile, "Observation", json!({"resourceType": "Observation", "id": "loose"}), None)
            .unwrap();
        artifacts.mark_synced(patient.uuid()).unwrap();

        let bundle = cases.case_bundle(case.uuid).unwrap();
        assert_eq!(bundle["resourceType"], "Bundle");
        assert_eq!(bundle["type"], "collection");
        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["resource"]["id"], "o");

        assert!(cases.case_by_uuid(case.uuid).unwrap().last_update_date.is_some());
    }

    #[test]
    fn shared_payload_is_linked_to_every_case() {
        let (cases, artifacts, profile) = setup();
        let first = cases
            .get_or_create_case(&profile, PatientId::new(), "ART-001")
            .unwrap();
        let second = cases
            .get_or_create_case(&profile, PatientId::new(), "ART-002")
            .unwrap();
        let organization = json!({"resourceType": "Organization", "id": "facility"});

        let a = cases
            .add_resource(first.uuid, "Organization", organization.clone())
            .unwrap();
        let b = cases
            .add_resource(second.uuid, "Organization", organization.clone())
            .unwrap();
        assert_ne!(a.uuid(), b.uuid());
        assert_eq!(a.case(), Some(first.uuid));
        assert_eq!(b.case(), Some(second.uuid));

        let again = cases
            .add_resource(second.uuid, "Organization", organization)
            .unwrap();
        assert_eq!(again.uuid(), b.uuid());
        assert_eq!(artifacts.all().unwrap().len(), 2);

        for case in [&first, &second] {
            assert_eq!(cases.case_resources(case).unwrap().len(), 1);
            let bundle = cases.case_bundle(case.uuid).unwrap();
            assert_eq!(bundle["entry"][0]["resource"]["id"], "facility");
        }
    }

    #[test]
    fn unknown_case_is_not_found() {
        let (cases, _, _) = setup();
        assert!(matches!(
            cases.add_resource(Uuid::new_v4(), "Patient", json!({})),
            Err(SyncError::NotFound { entity: "sync case", .. })
        ));
    }
}
