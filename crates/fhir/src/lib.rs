//! FHIR wire/boundary support for EMR sync.
//!
//! This crate provides **wire models** and **format/translation helpers** for the payloads
//! the sync core consumes and produces:
//! - inbound laboratory result bundles (JSON)
//! - outbound case-based collection bundles (JSON)
//! - sync profile definition files (YAML)
//!
//! This crate focuses on:
//! - FHIR semantic alignment for the subset of resources the merge engine reads
//! - serialisation/deserialisation with path-aware schema errors
//! - translation between wire structs and flat domain-level carriers
//!
//! It does not know about concepts, encounters or persistence; those live in `emrsync-core`.

pub mod bundle;
pub mod outbound;
pub mod profile;

// Re-export facades
pub use bundle::ResultBundle;
pub use outbound::CollectionBundle;
pub use profile::SyncProfiles;

// Re-export public domain-level types
pub use bundle::{CodingData, DiagnosticReportData, ObservationData, ResultBundleData};
pub use profile::SyncProfileData;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("invalid UUID: {0}")]
    InvalidUuid(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

/// Formats a `serde_path_to_error` failure into a [`FhirError::Translation`].
fn schema_mismatch<E: std::fmt::Display>(
    what: &str,
    err: serde_path_to_error::Error<E>,
) -> FhirError {
    let path = err.path().to_string();
    let source = err.into_inner();
    let path = if path.is_empty() {
        "<root>"
    } else {
        path.as_str()
    };
    FhirError::Translation(format!("{what} schema mismatch at {path}: {source}"))
}
