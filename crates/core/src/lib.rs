//! # emrsync core
//!
//! Core logic for moving clinical data between the EMR and external systems.
//!
//! - Merging inbound lab results (FHIR bundles and viral load results) into encounters
//! - Tracking outbound sync artifacts through pending, synced and expired states
//! - Purging expired artifacts, grouping artifacts into cases
//! - Sync profile registry, generation log and legacy task ledger
//!
//! **No process concerns**: environment variables, CLI parsing and scheduling belong in the
//! binaries. Library code receives an `Arc<CoreConfig>` and storage handles.

pub mod clinical;
pub mod concepts;
pub mod config;
pub mod constants;
pub mod error;
pub mod merge;
pub mod observation;
pub mod repositories;
pub mod sync;
pub mod uuid;

pub use clinical::{Encounter, EncounterId, ObservationId, Order, OrderId, PatientId, ProviderId};
pub use concepts::{Concept, ConceptDatatype, ConceptDictionary, ConceptId, ConceptResolver};
pub use config::CoreConfig;
pub use error::{SyncError, SyncResult};
pub use merge::viral_load::{ViralLoadOutcome, ViralLoadResult};
pub use merge::{MergeEngine, MergeOutcome};
pub use observation::{ObsContent, ObsValue, Observation};
pub use repositories::clinical::InMemoryClinicalStore;
pub use repositories::files::FileSyncRepository;
pub use repositories::memory::InMemorySyncRepository;
pub use repositories::{ClinicalStore, SyncRepository};
pub use sync::artifacts::SyncArtifactService;
pub use sync::cases::CaseAggregator;
pub use sync::profiles::ProfileService;
pub use sync::sweeper::{PurgeReport, PurgeSweeper};
pub use sync::tasks::SyncTaskService;
pub use sync::{
    SyncFhirCase, SyncFhirProfile, SyncFhirProfileLog, SyncFhirResource, SyncState, SyncTask,
    SyncTaskType,
};
