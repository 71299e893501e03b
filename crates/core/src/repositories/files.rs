//! File-backed [`SyncRepository`].
//!
//! Each entity is one pretty-printed JSON file at
//! `<data_dir>/<kind>/<s1>/<s2>/<uuid>.json` (see [`crate::uuid`]). Writes go to a temporary
//! sibling file first and are renamed into place, so readers never observe a half-written
//! record.

use super::SyncRepository;
use crate::config::CoreConfig;
use crate::constants::RECORD_FILE_EXTENSION;
use crate::sync::{
    SyncFhirCase, SyncFhirProfile, SyncFhirProfileLog, SyncFhirResource, SyncRecord, SyncTask,
    SyncTaskType,
};
use crate::uuid::ShardableUuid;
use crate::{SyncError, SyncResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub struct FileSyncRepository {
    cfg: Arc<CoreConfig>,
}

impl FileSyncRepository {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self { cfg }
    }

    fn kind_dir<T: SyncRecord>(&self) -> PathBuf {
        self.cfg.data_dir().join(T::KIND)
    }

    fn record_path<T: SyncRecord>(&self, uuid: Uuid) -> PathBuf {
        ShardableUuid::from_uuid(uuid).sharded_file(&self.kind_dir::<T>(), RECORD_FILE_EXTENSION)
    }

    fn save<T: SyncRecord>(&self, record: &T) -> SyncResult<()> {
        let path = self.record_path::<T>(record.uuid());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SyncError::StorageDirCreation)?;
        }

        let body = serde_json::to_vec_pretty(record).map_err(SyncError::Serialization)?;
        let tmp = path.with_extension(format!("{RECORD_FILE_EXTENSION}.tmp"));
        fs::write(&tmp, body).map_err(SyncError::FileWrite)?;
        fs::rename(&tmp, &path).map_err(SyncError::FileWrite)?;
        Ok(())
    }

    fn get<T: SyncRecord>(&self, uuid: Uuid) -> SyncResult<Option<T>> {
        read_record(&self.record_path::<T>(uuid))
    }

    fn all<T: SyncRecord>(&self) -> SyncResult<Vec<T>> {
        let mut records = Vec::new();
        for path in record_files(&self.kind_dir::<T>())? {
            if let Some(record) = read_record::<T>(&path)? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.uuid());
        Ok(records)
    }

    fn delete<T: SyncRecord>(&self, uuid: Uuid) -> SyncResult<bool> {
        match fs::remove_file(self.record_path::<T>(uuid)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SyncError::FileDelete(e)),
        }
    }
}

fn read_record<T: SyncRecord>(path: &Path) -> SyncResult<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::FileRead(e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(SyncError::Deserialization)
}

/// Lists `<kind_dir>/<s1>/<s2>/<uuid>.json` files. A missing kind directory has no records;
/// files whose name is not a canonical UUID, or that sit in the wrong shard, are ignored.
fn record_files(kind_dir: &Path) -> SyncResult<Vec<PathBuf>> {
    fn subdirs(dir: &Path) -> SyncResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::FileRead(e)),
        };
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(SyncError::FileRead)?;
            if entry.file_type().map_err(SyncError::FileRead)?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    let mut files = Vec::new();
    for s1 in subdirs(kind_dir)? {
        for s2 in subdirs(&s1)? {
            for entry in fs::read_dir(&s2).map_err(SyncError::FileRead)? {
                let path = entry.map_err(SyncError::FileRead)?.path();
                let is_record = path.extension().and_then(|e| e.to_str())
                    == Some(RECORD_FILE_EXTENSION)
                    && path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(|stem| ShardableUuid::parse(stem).ok())
                        .is_some_and(|id| {
                            id.sharded_file(kind_dir, RECORD_FILE_EXTENSION) == path
                        });
                if is_record {
                    files.push(path);
                }
            }
        }
    }
    Ok(files)
}

impl SyncRepository for FileSyncRepository {
    fn save_profile(&self, profile: &SyncFhirProfile) -> SyncResult<()> {
        self.save(profile)
    }

    fn get_profile(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirProfile>> {
        self.get(uuid)
    }

    fn all_profiles(&self) -> SyncResult<Vec<SyncFhirProfile>> {
        self.all()
    }

    fn save_resource(&self, resource: &SyncFhirResource) -> SyncResult<()> {
        self.save(resource)
    }

    fn get_resource(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirResource>> {
        self.get(uuid)
    }

    fn all_resources(&self) -> SyncResult<Vec<SyncFhirResource>> {
        self.all()
    }

    fn delete_resource(&self, uuid: Uuid) -> SyncResult<bool> {
        self.delete::<SyncFhirResource>(uuid)
    }

    fn save_case(&self, case: &SyncFhirCase) -> SyncResult<()> {
        self.save(case)
    }

    fn get_case(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirCase>> {
        self.get(uuid)
    }

    fn all_cases(&self) -> SyncResult<Vec<SyncFhirCase>> {
        self.all()
    }

    fn save_profile_log(&self, log: &SyncFhirProfileLog) -> SyncResult<()> {
        self.save(log)
    }

    fn get_profile_log(&self, uuid: Uuid) -> SyncResult<Option<SyncFhirProfileLog>> {
        self.get(uuid)
    }

    fn all_profile_logs(&self) -> SyncResult<Vec<SyncFhirProfileLog>> {
        self.all()
    }

    fn save_task_type(&self, task_type: &SyncTaskType) -> SyncResult<()> {
        self.save(task_type)
    }

    fn get_task_type(&self, uuid: Uuid) -> SyncResult<Option<SyncTaskType>> {
        self.get(uuid)
    }

    fn all_task_types(&self) -> SyncResult<Vec<SyncTaskType>> {
        self.all()
    }

    fn save_task(&self, task: &SyncTask) -> SyncResult<()> {
        self.save(task)
    }

    fn get_task(&self, uuid: Uuid) -> SyncResult<Option<SyncTask>> {
        self.get(uuid)
    }

    fn all_tasks(&self) -> SyncResult<Vec<SyncTask>> {
        self.all()
    }
}
