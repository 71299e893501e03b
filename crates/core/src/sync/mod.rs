//! Outbound sync entities and the services that manage them.
//!
//! - [`artifacts`]: generated resources and their pending → synced → expired lifecycle
//! - [`sweeper`]: periodic purge of expired artifacts
//! - [`cases`]: case-based grouping of artifacts
//! - [`profiles`]: generator profiles and their generation log
//! - [`tasks`]: legacy push work items

pub mod artifacts;
pub mod cases;
pub mod profiles;
pub mod sweeper;
pub mod tasks;

use crate::clinical::PatientId;
use crate::constants::{
    CASES_DIR_NAME, PROFILES_DIR_NAME, PROFILE_LOGS_DIR_NAME, RESOURCES_DIR_NAME,
    TASKS_DIR_NAME, TASK_TYPES_DIR_NAME,
};
use crate::{SyncError, SyncResult};
use chrono::{DateTime, Duration, Utc};
use fhir::SyncProfileData;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use sync_types::{Fingerprint, NonEmptyText};
use uuid::Uuid;

/// A persisted sync entity, addressed by UUID and stored under its own kind directory.
pub trait SyncRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Directory name under the data directory.
    const KIND: &'static str;

    fn uuid(&self) -> Uuid;
}

// ============================================================================
// Profiles
// ============================================================================

/// A generator profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFhirProfile {
    pub uuid: Uuid,
    pub name: NonEmptyText,
    pub scheduled_task_name: Option<NonEmptyText>,
    pub resource_types: Vec<NonEmptyText>,
    pub case_based: bool,
    pub url: Option<String>,
    pub enabled: bool,
    /// Retention after sync, in days.
    pub duration_to_keep_synced_resources: u32,
}

impl SyncFhirProfile {
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.duration_to_keep_synced_resources))
    }

    pub fn generates(&self, resource_type: &str) -> bool {
        self.resource_types.iter().any(|t| t.as_str() == resource_type)
    }
}

impl From<SyncProfileData> for SyncFhirProfile {
    fn from(data: SyncProfileData) -> Self {
        Self {
            uuid: data.uuid,
            name: data.name,
            scheduled_task_name: data.scheduled_task_name,
            resource_types: data.resource_types,
            case_based: data.case_based,
            url: data.url,
            enabled: data.enabled,
            duration_to_keep_synced_resources: data.retention_days,
        }
    }
}

impl From<&SyncFhirProfile> for SyncProfileData {
    fn from(profile: &SyncFhirProfile) -> Self {
        Self {
            uuid: profile.uuid,
            name: profile.name.clone(),
            scheduled_task_name: profile.scheduled_task_name.clone(),
            resource_types: profile.resource_types.clone(),
            case_based: profile.case_based,
            url: profile.url.clone(),
            enabled: profile.enabled,
            retention_days: profile.duration_to_keep_synced_resources,
        }
    }
}

impl SyncRecord for SyncFhirProfile {
    const KIND: &'static str = PROFILES_DIR_NAME;

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Lifecycle state of an artifact at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Synced,
    Expired,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
            SyncState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A generated outbound resource.
///
/// `date_synced` and `expiry_date` are only set once the artifact has been synced; the fields
/// are private so that the lifecycle methods are the only way to change them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncFhirResource {
    uuid: Uuid,
    profile: Uuid,
    resource_type: NonEmptyText,
    resource: serde_json::Value,
    fingerprint: Fingerprint,
    case: Option<Uuid>,
    date_created: DateTime<Utc>,
    synced: bool,
    date_synced: Option<DateTime<Utc>>,
    expiry_date: Option<DateTime<Utc>>,
}

impl SyncFhirResource {
    pub(crate) fn pending(
        profile: Uuid,
        resource_type: NonEmptyText,
        resource: serde_json::Value,
        case: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> SyncResult<Self> {
        let fingerprint = fingerprint(profile, &resource_type, &resource)?;
        Ok(Self {
            uuid: Uuid::new_v4(),
            profile,
            resource_type,
            resource,
            fingerprint,
            case,
            date_created: now,
            synced: false,
            date_synced: None,
            expiry_date: None,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn profile(&self) -> Uuid {
        self.profile
    }

    pub fn resource_type(&self) -> &str {
        self.resource_type.as_str()
    }

    pub fn resource(&self) -> &serde_json::Value {
        &self.resource
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn case(&self) -> Option<Uuid> {
        self.case
    }

    pub fn date_created(&self) -> DateTime<Utc> {
        self.date_created
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn date_synced(&self) -> Option<DateTime<Utc>> {
        self.date_synced
    }

    pub fn expiry_date(&self) -> Option<DateTime<Utc>> {
        self.expiry_date
    }

    /// Marks the artifact synced at `now`, expiring `retention` later. Calling it again
    /// recomputes both dates from the new `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if the expiry date is out of range. The artifact is
    /// left unchanged.
    pub(crate) fn mark_synced(&mut self, now: DateTime<Utc>, retention: Duration) -> SyncResult<()> {
        let expiry = now.checked_add_signed(retention).ok_or_else(|| {
            SyncError::InvalidInput(format!(
                "retention of {} days puts the expiry date out of range",
                retention.num_days()
            ))
        })?;
        self.synced = true;
        self.date_synced = Some(now);
        self.expiry_date = Some(expiry);
        Ok(())
    }

    /// Synced and past its expiry date.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.synced && self.expiry_date.is_some_and(|expiry| expiry < now)
    }

    pub fn state(&self, now: DateTime<Utc>) -> SyncState {
        if !self.synced {
            SyncState::Pending
        } else if self.is_expired(now) {
            SyncState::Expired
        } else {
            SyncState::Synced
        }
    }
}

impl SyncRecord for SyncFhirResource {
    const KIND: &'static str = RESOURCES_DIR_NAME;

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

/// Content hash of an artifact: SHA-256 over the profile, the resource type and the payload
/// serialized as JSON (object keys in sorted order).
pub fn fingerprint(
    profile: Uuid,
    resource_type: &NonEmptyText,
    resource: &serde_json::Value,
) -> SyncResult<Fingerprint> {
    let payload = serde_json::to_string(resource).map_err(SyncError::Serialization)?;
    let mut hasher = Sha256::new();
    hasher.update(profile.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(resource_type.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(payload.as_bytes());
    Ok(Fingerprint::parse(&hex::encode(hasher.finalize()))?)
}

// ============================================================================
// Cases
// ============================================================================

/// Groups artifacts under `(profile, patient, case_identifier)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFhirCase {
    pub uuid: Uuid,
    pub profile: Uuid,
    pub patient: PatientId,
    pub case_identifier: NonEmptyText,
    pub date_created: DateTime<Utc>,
    pub last_update_date: Option<DateTime<Utc>>,
}

impl SyncFhirCase {
    pub fn matches(&self, profile: Uuid, patient: PatientId, case_identifier: &str) -> bool {
        self.profile == profile
            && self.patient == patient
            && self.case_identifier.as_str() == case_identifier
    }
}

impl SyncRecord for SyncFhirCase {
    const KIND: &'static str = CASES_DIR_NAME;

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

// ============================================================================
// Profile generation log
// ============================================================================

/// One generation run of a profile for one resource type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFhirProfileLog {
    pub uuid: Uuid,
    pub profile: Uuid,
    pub resource_type: NonEmptyText,
    pub last_generation_date: DateTime<Utc>,
    pub number_of_resources: u64,
}

impl SyncRecord for SyncFhirProfileLog {
    const KIND: &'static str = PROFILE_LOGS_DIR_NAME;

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

// ============================================================================
// Legacy push tasks
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTaskType {
    pub uuid: Uuid,
    pub name: NonEmptyText,
    pub data_type: Option<String>,
    /// Identifier of the data item the task type pushes.
    pub data_type_id: Option<String>,
    pub url: Option<String>,
}

impl SyncRecord for SyncTaskType {
    const KIND: &'static str = TASK_TYPES_DIR_NAME;

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

/// A push work item. Delivery is tracked through `status` and `status_code`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    pub uuid: Uuid,
    /// External identifier of the pushed item, e.g. a sample or order number.
    pub sync_task: NonEmptyText,
    pub sync_task_type: Uuid,
    pub status: Option<String>,
    pub status_code: Option<u16>,
    pub sent_to_url: Option<String>,
    pub require_action: bool,
    pub action_completed: bool,
    pub date_sent: Option<DateTime<Utc>>,
}

impl SyncTask {
    pub fn awaits_action(&self) -> bool {
        self.require_action && !self.action_completed
    }
}

impl SyncRecord for SyncTask {
    const KIND: &'static str = TASKS_DIR_NAME;

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}
