//! Constants used throughout the sync core.
//!
//! Concept identifiers refer to the local concept dictionary; directory names refer to the
//! file-backed sync store layout.

use crate::concepts::ConceptId;

/// Default directory for sync data when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "sync_data";

/// Default interval between purge sweeps.
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 3_600;

pub const PROFILES_DIR_NAME: &str = "profiles";
pub const RESOURCES_DIR_NAME: &str = "resources";
pub const CASES_DIR_NAME: &str = "cases";
pub const PROFILE_LOGS_DIR_NAME: &str = "profile_logs";
pub const TASK_TYPES_DIR_NAME: &str = "task_types";
pub const TASKS_DIR_NAME: &str = "tasks";

/// Extension of persisted record files.
pub const RECORD_FILE_EXTENSION: &str = "json";

/// Test group marker. Also the default viral load panel when no order is supplied.
pub const TEST_GROUP_MARKER_CONCEPT: ConceptId = ConceptId(165412);

/// Date the viral load sample was taken (datetime).
pub const DATE_SAMPLE_TAKEN_CONCEPT: ConceptId = ConceptId(163023);
/// Viral load qualitative result (coded).
pub const VL_QUALITATIVE_CONCEPT: ConceptId = ConceptId(1305);
/// Viral load copies/mL (numeric).
pub const VL_QUANTITATIVE_CONCEPT: ConceptId = ConceptId(856);

pub const VL_DETECTED_CONCEPT: ConceptId = ConceptId(1301);
pub const VL_FAILED_CONCEPT: ConceptId = ConceptId(1304);
pub const VL_UNDETECTED_CONCEPT: ConceptId = ConceptId(1306);

/// Reason recorded when an order is discontinued after its results are merged.
pub const ORDER_COMPLETED_REASON: &str = "Completed";

/// Void reason for observations superseded by a viral load upsert.
pub const OBS_REPLACED_REASON: &str = "Observation has been replaced or updated.";
