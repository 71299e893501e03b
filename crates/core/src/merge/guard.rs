//! Idempotence guard and per-encounter merge locks.

use crate::clinical::{Encounter, EncounterId, Order};
use crate::constants::TEST_GROUP_MARKER_CONCEPT;
use crate::repositories::ClinicalStore;
use crate::{SyncError, SyncResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Whether results have already been recorded.
///
/// With an order: any live observation is linked to the order, or the order's concept or one
/// of its set members is among the encounter's live observation concepts. Without an order:
/// the encounter carries a live test group marker observation.
pub(crate) fn already_merged(
    store: &dyn ClinicalStore,
    encounter: &Encounter,
    order: Option<&Order>,
) -> SyncResult<bool> {
    let live_concepts = encounter.live_concepts();

    let Some(order) = order else {
        return Ok(live_concepts.contains(&TEST_GROUP_MARKER_CONCEPT));
    };

    if !store.get_observations_by_order(order.id)?.is_empty() {
        return Ok(true);
    }

    Ok(live_concepts.contains(&order.concept.id)
        || order
            .concept
            .set_members
            .iter()
            .any(|member| live_concepts.contains(member)))
}

/// Registry of merge locks, one per encounter being merged into.
///
/// An encounter is saved as a whole, so two orders on the same encounter must not be merged
/// at the same time. Entries are dropped once no merge holds or waits on them.
#[derive(Default)]
pub(crate) struct MergeLocks {
    locks: Mutex<HashMap<EncounterId, Arc<Mutex<()>>>>,
}

impl MergeLocks {
    pub(crate) fn with_lock<T>(
        &self,
        key: EncounterId,
        f: impl FnOnce() -> SyncResult<T>,
    ) -> SyncResult<T> {
        let lock = {
            let mut locks = self.locks.lock().map_err(|_| SyncError::LockPoisoned)?;
            Arc::clone(locks.entry(key).or_default())
        };

        let result = {
            let _guard = lock.lock().map_err(|_| SyncError::LockPoisoned)?;
            f()
        };
        drop(lock);

        let mut locks = self.locks.lock().map_err(|_| SyncError::LockPoisoned)?;
        if locks
            .get(&key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&key);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }
}
