//! Ledger of legacy push tasks and their types.

use super::{SyncTask, SyncTaskType};
use crate::repositories::SyncRepository;
use crate::{SyncError, SyncResult};
use std::sync::Arc;
use uuid::Uuid;

pub struct SyncTaskService {
    repo: Arc<dyn SyncRepository>,
}

impl SyncTaskService {
    pub fn new(repo: Arc<dyn SyncRepository>) -> Self {
        Self { repo }
    }

    pub fn save_task_type(&self, task_type: &SyncTaskType) -> SyncResult<()> {
        self.repo.save_task_type(task_type)
    }

    pub fn task_type_by_uuid(&self, uuid: Uuid) -> SyncResult<SyncTaskType> {
        self.repo
            .get_task_type(uuid)?
            .ok_or_else(|| SyncError::not_found("sync task type", uuid))
    }

    pub fn all_task_types(&self) -> SyncResult<Vec<SyncTaskType>> {
        self.repo.all_task_types()
    }

    pub fn save_task(&self, task: &SyncTask) -> SyncResult<()> {
        self.repo.save_task(task)
    }

    /// Finds a task by the identifier of the item it pushed.
    pub fn task_by_identifier(&self, sync_task: &str) -> SyncResult<Option<SyncTask>> {
        let sync_task = sync_task.trim();
        Ok(self
            .repo
            .all_tasks()?
            .into_iter()
            .find(|t| t.sync_task.as_str() == sync_task))
    }

    pub fn all_tasks(&self) -> SyncResult<Vec<SyncTask>> {
        self.repo.all_tasks()
    }

    /// Tasks of a type that require an action which has not been completed yet.
    pub fn incomplete_action_tasks(&self, task_type: Uuid) -> SyncResult<Vec<SyncTask>> {
        Ok(self
            .repo
            .all_tasks()?
            .into_iter()
            .filter(|t| t.sync_task_type == task_type && t.awaits_action())
            .collect())
    }
}
