//! Sync profile registry and generation log.

use super::{SyncFhirProfile, SyncFhirProfileLog};
use crate::repositories::SyncRepository;
use crate::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use fhir::{SyncProfileData, SyncProfiles};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use sync_types::NonEmptyText;
use uuid::Uuid;

pub struct ProfileService {
    repo: Arc<dyn SyncRepository>,
}

impl ProfileService {
    pub fn new(repo: Arc<dyn SyncRepository>) -> Self {
        Self { repo }
    }

    pub fn save_profile(&self, profile: &SyncFhirProfile) -> SyncResult<()> {
        self.repo.save_profile(profile)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if no profile has this UUID.
    pub fn profile_by_uuid(&self, uuid: Uuid) -> SyncResult<SyncFhirProfile> {
        self.repo
            .get_profile(uuid)?
            .ok_or_else(|| SyncError::not_found("sync profile", uuid))
    }

    /// Profiles whose name matches exactly. Names are not unique.
    pub fn profiles_by_name(&self, name: &str) -> SyncResult<Vec<SyncFhirProfile>> {
        let name = name.trim();
        Ok(self
            .repo
            .all_profiles()?
            .into_iter()
            .filter(|p| p.name.as_str() == name)
            .collect())
    }

    pub fn profile_by_scheduled_task(
        &self,
        scheduled_task_name: &str,
    ) -> SyncResult<Option<SyncFhirProfile>> {
        let scheduled_task_name = scheduled_task_name.trim();
        Ok(self.repo.all_profiles()?.into_iter().find(|p| {
            p.scheduled_task_name
                .as_ref()
                .is_some_and(|t| t.as_str() == scheduled_task_name)
        }))
    }

    pub fn all_profiles(&self) -> SyncResult<Vec<SyncFhirProfile>> {
        self.repo.all_profiles()
    }

    /// Saves every profile defined in a YAML document, replacing profiles with the same UUID.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Fhir`] if the document does not match the profile schema. Nothing
    /// is saved in that case.
    pub fn import_yaml(&self, yaml_text: &str) -> SyncResult<Vec<SyncFhirProfile>> {
        let profiles: Vec<SyncFhirProfile> = SyncProfiles::parse(yaml_text)?
            .into_iter()
            .map(SyncFhirProfile::from)
            .collect();
        for profile in &profiles {
            self.repo.save_profile(profile)?;
        }
        tracing::info!(count = profiles.len(), "sync profiles imported");
        Ok(profiles)
    }

    pub fn import_file(&self, path: &Path) -> SyncResult<Vec<SyncFhirProfile>> {
        let text = fs::read_to_string(path).map_err(SyncError::FileRead)?;
        self.import_yaml(&text)
    }

    /// Renders every stored profile as a YAML profile document.
    pub fn export_yaml(&self) -> SyncResult<String> {
        let data: Vec<SyncProfileData> = self
            .repo
            .all_profiles()?
            .iter()
            .map(SyncProfileData::from)
            .collect();
        Ok(SyncProfiles::render(&data)?)
    }

    // ------------------------------------------------------------------------
    // Generation log
    // ------------------------------------------------------------------------

    pub fn save_log(&self, log: &SyncFhirProfileLog) -> SyncResult<()> {
        self.repo.save_profile_log(log)
    }

    pub fn log_by_uuid(&self, uuid: Uuid) -> SyncResult<SyncFhirProfileLog> {
        self.repo
            .get_profile_log(uuid)?
            .ok_or_else(|| SyncError::not_found("sync profile log", uuid))
    }

    pub fn all_logs(&self) -> SyncResult<Vec<SyncFhirProfileLog>> {
        self.repo.all_profile_logs()
    }

    pub fn logs_by_profile(&self, profile: Uuid) -> SyncResult<Vec<SyncFhirProfileLog>> {
        Ok(self
            .repo
            .all_profile_logs()?
            .into_iter()
            .filter(|l| l.profile == profile)
            .collect())
    }

    /// Logs for one profile and resource type, newest generation first.
    pub fn logs_by_profile_and_type(
        &self,
        profile: Uuid,
        resource_type: &str,
    ) -> SyncResult<Vec<SyncFhirProfileLog>> {
        let mut logs: Vec<SyncFhirProfileLog> = self
            .logs_by_profile(profile)?
            .into_iter()
            .filter(|l| l.resource_type.as_str() == resource_type)
            .collect();
        logs.sort_by(|a, b| b.last_generation_date.cmp(&a.last_generation_date));
        Ok(logs)
    }

    pub fn latest_log(
        &self,
        profile: Uuid,
        resource_type: &str,
    ) -> SyncResult<Option<SyncFhirProfileLog>> {
        Ok(self
            .logs_by_profile_and_type(profile, resource_type)?
            .into_iter()
            .next())
    }

    /// Appends a generation run to the log.
    pub fn record_generation(
        &self,
        profile: Uuid,
        resource_type: &str,
        number_of_resources: u64,
        at: DateTime<Utc>,
    ) -> SyncResult<SyncFhirProfileLog> {
        let log = SyncFhirProfileLog {
            uuid: Uuid::new_v4(),
            profile,
            resource_type: NonEmptyText::new(resource_type)?,
            last_generation_date: at,
            number_of_resources,
        };
        self.repo.save_profile_log(&log)?;
        Ok(log)
    }
}
