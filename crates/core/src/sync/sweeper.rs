//! Purge sweeper for expired sync artifacts.

use super::artifacts::SyncArtifactService;
use crate::SyncResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub purged: Vec<Uuid>,
    /// Artifacts that could not be purged, with the reason.
    pub failed: Vec<(Uuid, String)>,
}

impl PurgeReport {
    pub fn purged_count(&self) -> usize {
        self.purged.len()
    }
}

pub struct PurgeSweeper {
    artifacts: Arc<SyncArtifactService>,
}

impl PurgeSweeper {
    pub fn new(artifacts: Arc<SyncArtifactService>) -> Self {
        Self { artifacts }
    }

    /// Purges every artifact expired as of `as_of`.
    ///
    /// Each artifact is re-checked against its stored copy before deletion. A failure on one
    /// artifact is logged and recorded in the report; the sweep carries on.
    ///
    /// # Errors
    ///
    /// Returns an error only if the expired list itself cannot be read.
    pub fn sweep(&self, as_of: DateTime<Utc>) -> SyncResult<PurgeReport> {
        let mut report = PurgeReport::default();
        for resource in self.artifacts.expired(as_of)? {
            let uuid = resource.uuid();
            match self.artifacts.purge(uuid, as_of) {
                Ok(()) => report.purged.push(uuid),
                Err(e) => {
                    tracing::warn!(resource = %uuid, error = %e, "failed to purge sync resource");
                    report.failed.push((uuid, e.to_string()));
                }
            }
        }

        tracing::info!(
            purged = report.purged.len(),
            failed = report.failed.len(),
            "purge sweep finished"
        );
        Ok(report)
    }
}
