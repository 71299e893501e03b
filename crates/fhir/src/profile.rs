//! Sync profile definition files.
//!
//! A sync profile describes one outbound generator: which resource types it produces, whether
//! it is case based, where it ships to, and how long synced artifacts are retained before the
//! purge sweeper removes them.
//!
//! Responsibilities:
//! - Define the public domain-level carrier [`SyncProfileData`]
//! - Define a strict YAML wire model (`deny_unknown_fields`)
//! - Validate identifiers, names and duplicate entries
//!
//! Example file:
//!
//! ```yaml
//! profiles:
//!   - uuid: "c3b9a2a0-6f2e-4a84-9f6b-3d2b0c1e7a11"
//!     name: ART Access Integration
//!     scheduled_task_name: ART Access Integration
//!     resource_types: [Patient, Encounter, Observation]
//!     case_based: true
//!     enabled: true
//!     duration_to_keep_synced_resources: 30
//! ```

use crate::{schema_mismatch, FhirError, FhirResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use sync_types::NonEmptyText;
use uuid::Uuid;

// ============================================================================
// Public domain-level types
// ============================================================================

/// Domain-level carrier for one sync profile definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncProfileData {
    /// Stable profile identifier.
    pub uuid: Uuid,

    /// Human readable profile name.
    pub name: NonEmptyText,

    /// Name of the scheduled task that drives this profile, if any.
    pub scheduled_task_name: Option<NonEmptyText>,

    /// FHIR resource types this profile generates.
    pub resource_types: Vec<NonEmptyText>,

    /// Whether resources are grouped into case-based bundles.
    pub case_based: bool,

    /// Destination endpoint for generated bundles.
    pub url: Option<String>,

    pub enabled: bool,

    /// Days to keep a resource after it has been synced.
    pub retention_days: u32,
}

// ============================================================================
// Public SyncProfiles operations
// ============================================================================

/// Profile file operations.
pub struct SyncProfiles;

impl SyncProfiles {
    /// Parse a profile file from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the YAML does not match the wire schema (unknown keys, wrong types, empty names),
    /// - a `uuid` is not a valid UUID,
    /// - two profiles share a UUID.
    pub fn parse(yaml_text: &str) -> FhirResult<Vec<SyncProfileData>> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        let wire = serde_path_to_error::deserialize::<_, ProfileFileWire>(deserializer)
            .map_err(|e| schema_mismatch("Sync profile file", e))?;

        let mut seen = HashSet::new();
        let mut profiles = Vec::with_capacity(wire.profiles.len());
        for entry in wire.profiles {
            let profile = wire_to_domain(entry)?;
            if !seen.insert(profile.uuid) {
                return Err(FhirError::InvalidInput(format!(
                    "duplicate profile uuid {}",
                    profile.uuid
                )));
            }
            profiles.push(profile);
        }
        Ok(profiles)
    }

    /// Render profiles as YAML text.
    pub fn render(profiles: &[SyncProfileData]) -> FhirResult<String> {
        let wire = ProfileFileWire {
            profiles: profiles.iter().map(domain_to_wire).collect(),
        };
        serde_yaml::to_string(&wire)
            .map_err(|e| FhirError::Translation(format!("Failed to serialize profiles: {e}")))
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ProfileFileWire {
    profiles: Vec<ProfileWire>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ProfileWire {
    uuid: String,
    name: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheduled_task_name: Option<NonEmptyText>,
    #[serde(default)]
    resource_types: Vec<NonEmptyText>,
    #[serde(default)]
    case_based: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    duration_to_keep_synced_resources: u32,
}

fn default_enabled() -> bool {
    true
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: ProfileWire) -> FhirResult<SyncProfileData> {
    let uuid = Uuid::parse_str(&wire.uuid)
        .map_err(|_| FhirError::InvalidUuid(format!("Invalid UUID in profile: {}", wire.uuid)))?;

    Ok(SyncProfileData {
        uuid,
        name: wire.name,
        scheduled_task_name: wire.scheduled_task_name,
        resource_types: wire.resource_types,
        case_based: wire.case_based,
        url: wire.url.filter(|u| !u.trim().is_empty()),
        enabled: wire.enabled,
        retention_days: wire.duration_to_keep_synced_resources,
    })
}

fn domain_to_wire(data: &SyncProfileData) -> ProfileWire {
    ProfileWire {
        uuid: data.uuid.to_string(),
        name: data.name.clone(),
        scheduled_task_name: data.scheduled_task_name.clone(),
        resource_types: data.resource_types.clone(),
        case_based: data.case_based,
        url: data.url.clone(),
        enabled: data.enabled,
        duration_to_keep_synced_resources: data.retention_days,
    }
}
