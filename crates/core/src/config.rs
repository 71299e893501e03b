//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services as an
//! `Arc<CoreConfig>`. Library code never reads process environment variables; the binaries do
//! that and hand the raw values to the `*_from_env_value` helpers below.

use crate::constants::{
    CASES_DIR_NAME, DEFAULT_DATA_DIR, DEFAULT_PURGE_INTERVAL_SECS, PROFILES_DIR_NAME,
    PROFILE_LOGS_DIR_NAME, RESOURCES_DIR_NAME, TASKS_DIR_NAME, TASK_TYPES_DIR_NAME,
};
use crate::{SyncError, SyncResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    profiles_file: Option<PathBuf>,
    purge_interval: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if `data_dir` is empty or `purge_interval` is zero.
    pub fn new(
        data_dir: PathBuf,
        profiles_file: Option<PathBuf>,
        purge_interval: Duration,
    ) -> SyncResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(SyncError::InvalidInput("data_dir cannot be empty".into()));
        }
        if purge_interval.is_zero() {
            return Err(SyncError::InvalidInput(
                "purge_interval must be greater than zero".into(),
            ));
        }

        Ok(Self {
            data_dir,
            profiles_file,
            purge_interval,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn profiles_file(&self) -> Option<&Path> {
        self.profiles_file.as_deref()
    }

    pub fn purge_interval(&self) -> Duration {
        self.purge_interval
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join(PROFILES_DIR_NAME)
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.data_dir.join(RESOURCES_DIR_NAME)
    }

    pub fn cases_dir(&self) -> PathBuf {
        self.data_dir.join(CASES_DIR_NAME)
    }

    pub fn profile_logs_dir(&self) -> PathBuf {
        self.data_dir.join(PROFILE_LOGS_DIR_NAME)
    }

    pub fn task_types_dir(&self) -> PathBuf {
        self.data_dir.join(TASK_TYPES_DIR_NAME)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join(TASKS_DIR_NAME)
    }
}

/// Resolve the data directory from an optional raw value.
///
/// Empty or whitespace values fall back to [`DEFAULT_DATA_DIR`].
pub fn data_dir_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Resolve the optional profile definitions file.
pub fn profiles_file_from_env_value(value: Option<String>) -> Option<PathBuf> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Parse the purge interval (whole seconds) from an optional raw value.
///
/// If `value` is `None` or empty, returns [`DEFAULT_PURGE_INTERVAL_SECS`].
pub fn purge_interval_from_env_value(value: Option<String>) -> SyncResult<Duration> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let secs = match value {
        Some(v) => v.parse::<u64>().map_err(|_| {
            SyncError::InvalidInput(format!("purge interval must be whole seconds, got '{v}'"))
        })?,
        None => DEFAULT_PURGE_INTERVAL_SECS,
    };

    Ok(Duration::from_secs(secs))
}
