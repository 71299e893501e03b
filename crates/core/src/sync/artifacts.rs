//! Sync artifact lifecycle: pending → synced → expired → purged.
//!
//! At most one pending artifact exists per content fingerprint and case. Creating an artifact
//! whose fingerprint matches a pending one in the same case (or with no case) returns the
//! existing artifact. The same payload pending under another case gets its own artifact.

use super::{fingerprint, SyncFhirProfile, SyncFhirResource};
use crate::repositories::SyncRepository;
use crate::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use sync_types::NonEmptyText;
use uuid::Uuid;

pub struct SyncArtifactService {
    repo: Arc<dyn SyncRepository>,
    /// Serialises every read-modify-write on artifacts: create, mark-synced and purge.
    write_lock: Mutex<()>,
}

impl SyncArtifactService {
    pub fn new(repo: Arc<dyn SyncRepository>) -> Self {
        Self {
            repo,
            write_lock: Mutex::new(()),
        }
    }

    /// Records a generated resource as pending.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Text`] for a blank resource type, or a repository error.
    pub fn create(
        &self,
        profile: &SyncFhirProfile,
        resource_type: &str,
        resource: serde_json::Value,
        case: Option<Uuid>,
    ) -> SyncResult<SyncFhirResource> {
        self.create_at(profile, resource_type, resource, case, Utc::now())
    }

    pub fn create_at(
        &self,
        profile: &SyncFhirProfile,
        resource_type: &str,
        resource: serde_json::Value,
        case: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> SyncResult<SyncFhirResource> {
        let resource_type = NonEmptyText::new(resource_type)?;
        let fingerprint = fingerprint(profile.uuid, &resource_type, &resource)?;

        let _guard = self.lock_writes()?;
        if let Some(existing) = self
            .repo
            .resources_by_profile(profile.uuid)?
            .into_iter()
            .find(|r| !r.is_synced() && r.case() == case && r.fingerprint() == &fingerprint)
        {
            tracing::debug!(resource = %existing.uuid(), %fingerprint, "pending duplicate, reusing");
            return Ok(existing);
        }

        let created = SyncFhirResource::pending(profile.uuid, resource_type, resource, case, now)?;
        self.repo.save_resource(&created)?;
        tracing::debug!(
            resource = %created.uuid(),
            profile = %profile.uuid,
            resource_type = created.resource_type(),
            "sync resource created"
        );
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if no artifact has this UUID.
    pub fn get(&self, uuid: Uuid) -> SyncResult<SyncFhirResource> {
        self.repo
            .get_resource(uuid)?
            .ok_or_else(|| SyncError::not_found("sync resource", uuid))
    }

    pub fn all(&self) -> SyncResult<Vec<SyncFhirResource>> {
        self.repo.all_resources()
    }

    /// Artifacts of a profile; synced ones only when `include_synced` is set.
    pub fn list_by_profile(
        &self,
        profile: Uuid,
        include_synced: bool,
    ) -> SyncResult<Vec<SyncFhirResource>> {
        Ok(self
            .repo
            .resources_by_profile(profile)?
            .into_iter()
            .filter(|r| include_synced || !r.is_synced())
            .collect())
    }

    pub fn unsynced(&self, profile: Uuid) -> SyncResult<Vec<SyncFhirResource>> {
        self.list_by_profile(profile, false)
    }

    pub fn synced(&self, profile: Uuid) -> SyncResult<Vec<SyncFhirResource>> {
        Ok(self
            .repo
            .resources_by_profile(profile)?
            .into_iter()
            .filter(SyncFhirResource::is_synced)
            .collect())
    }

    /// Marks an artifact synced now. See [`mark_synced_at`](Self::mark_synced_at).
    pub fn mark_synced(&self, uuid: Uuid) -> SyncResult<SyncFhirResource> {
        self.mark_synced_at(uuid, Utc::now())
    }

    /// Marks an artifact synced at `now`, expiring after its profile's retention period.
    ///
    /// Marking an already synced artifact again recomputes both dates from `now`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if the artifact or its owning profile is missing, including an
    ///   artifact purged by a concurrent sweep
    /// - [`SyncError::InvalidInput`] if the profile's retention puts the expiry date out of range
    pub fn mark_synced_at(&self, uuid: Uuid, now: DateTime<Utc>) -> SyncResult<SyncFhirResource> {
        let _guard = self.lock_writes()?;
        let mut resource = self.get(uuid)?;
        let profile = self
            .repo
            .get_profile(resource.profile())?
            .ok_or_else(|| SyncError::not_found("sync profile", resource.profile()))?;

        resource.mark_synced(now, profile.retention())?;
        self.repo.save_resource(&resource)?;
        tracing::debug!(
            resource = %uuid,
            expiry = ?resource.expiry_date(),
            "sync resource marked synced"
        );
        Ok(resource)
    }

    /// Synced artifacts whose expiry date is before `as_of`.
    pub fn expired(&self, as_of: DateTime<Utc>) -> SyncResult<Vec<SyncFhirResource>> {
        self.repo.expired_resources(as_of)
    }

    /// Physically deletes an expired artifact.
    ///
    /// Expiry is checked against the stored copy, not the caller's, under the same lock as
    /// [`mark_synced_at`](Self::mark_synced_at), so a concurrent re-sync is never deleted.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if the artifact no longer exists
    /// - [`SyncError::NotExpired`] if it is pending or not yet past its expiry date
    pub fn purge(&self, uuid: Uuid, now: DateTime<Utc>) -> SyncResult<()> {
        let _guard = self.lock_writes()?;
        let stored = self.get(uuid)?;
        if !stored.is_expired(now) {
            return Err(SyncError::NotExpired(uuid));
        }
        if !self.repo.delete_resource(uuid)? {
            return Err(SyncError::not_found("sync resource", uuid));
        }
        tracing::debug!(resource = %uuid, "sync resource purged");
        Ok(())
    }

    fn lock_writes(&self) -> SyncResult<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| SyncError::LockPoisoned)
    }
}
