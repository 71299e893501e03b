//! In-memory [`SyncRepository`].

use super::SyncRepository;
use crate::sync::{
    SyncFhirCase, SyncFhirProfile, SyncFhirProfileLog, SyncFhirResource, SyncRecord, SyncTask,
    SyncTaskType,
};
use crate::{SyncError, SyncResult};
use std::collections::BTreeMap;
use std::sync::RwLock;
use uuid::Uuid;

struct Table<T>(RwLock<BTreeMap<Uuid, T>>);

impl<T: SyncRecord> Table<T> {
    fn save(&self, record: &T) -> SyncResult<()> {
        self.0
            .write()
            .map_err(|_| SyncError::LockPoisoned)?
            .insert(record.uuid(), record.clone());
        Ok(())
    }

    fn get(&self, uuid: Uuid) -> SyncResult<Option<T>> {
        Ok(self
            .0
            .read()
            .map_err(|_| SyncError::LockPoisoned)?
            .get(&uuid)
            .cloned())
    }

    fn all(&self) -> SyncResult<Vec<T>> {
        Ok(self
            .0
            .read()
            .map_err(|_| SyncError::LockPoisoned)?
            .values()
            .cloned()
            .collect())
    }

    fn delete(&self, uuid: Uuid) -> SyncResult<bool> {
        Ok(self
            .0
            .write()
            .map_err(|_| SyncError::LockPoisoned)?
            .remove(&uuid)
            .is_some())
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self(RwLock::new(BTreeMap::new()))
    }
}

/// Keeps every sync entity in process memory. Contents are lost on drop.
#[derive(Default)]
pub struct InMemorySyncRepository {
    profiles: Table<SyncFhirProfile>,
    resources: Table<SyncFhirResource>,
    cases: Table<SyncFhirCase>,
    profile_logs: Table<SyncFhirProfileLog>,
    task_types: Table<SyncTaskType>,
    tasks: Table<SyncTask>,
}

impl InMemorySyncRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncRepository for InMemorySyncRepository {
    fn save_profile(&self, profile: &SyncFhirProfile) -> SyncResult<()> {
        self.profiles.save(profile)
    }

    fn get_profile(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirProfile>> {
        self.profiles.get(uuid)
    }

    fn all_profiles(&self) -> SyncResult<Vec<SyncFhirProfile>> {
        self.profiles.all()
    }

    fn save_resource(&self, resource: &SyncFhirResource) -> SyncResult<()> {
        self.resources.save(resource)
    }

    fn get_resource(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirResource>> {
        self.resources.get(uuid)
    }

    fn all_resources(&self) -> SyncResult<Vec<SyncFhirResource>> {
        self.resources.all()
    }

    fn delete_resource(&self, uuid: Uuid) -> SyncResult<bool> {
        self.resources.delete(uuid)
    }

    fn save_case(&self, case: &SyncFhirCase) -> SyncResult<()> {
        self.cases.save(case)
    }

    fn get_case(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirCase>> {
        self.cases.get(uuid)
    }

    fn all_cases(&self) -> SyncResult<Vec<SyncFhirCase>> {
        self.cases.all()
    }

    fn save_profile_log(&self, log: &SyncFhirProfileLog) -> SyncResult<()> {
        self.profile_logs.save(log)
    }

    fn get_profile_log(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirProfileLog>> {
        self.profile_logs.get(uuid)
    }

    fn all_profile_logs(&self) -> SyncResult<Vec<SyncFhirProfileLog>> {
        self.profile_logs.all()
    }

    fn save_task_type(&self, task_type: &SyncTaskType) -> SyncResult<()> {
        self.task_types.save(task_type)
    }

    fn get_task_type(&self, uuid: Uuid) -> SyncResult<Option<SyncTaskType>> {
        self.task_types.get(uuid)
    }

    fn all_task_types(&self) -> SyncResult<Vec<SyncTaskType>> {
        self.task_types.all()
    }

    fn save_task(&self, task: &SyncTask) -> SyncResult<()> {
        self.tasks.save(task)
    }

    fn get_task(&self, uuid: Uuid) -> SyncResult<Option<SyncTask>> {
        self.tasks.get(uuid)
    }

    fn all_tasks(&self) -> SyncResult<Vec<SyncTask>> {
        self.tasks.all()
    }
}
