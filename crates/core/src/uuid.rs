//! UUID and sharded-path utilities for the file-backed sync store.
//!
//! Every persisted sync entity is stored as one JSON file whose location is derived from its
//! UUID, using the *canonical* representation: **32 lowercase hexadecimal characters** (no
//! hyphens).
//!
//! ## Sharded file layout
//! For a canonical UUID `u`, an entity of a given kind lives at:
//! `<data_dir>/<kind>/<u[0..2]>/<u[2..4]>/<u>.json`
//!
//! Example:
//! `sync_data/resources/55/0e/550e8400e29b41d4a716446655440000.json`
//!
//! This keeps directory fan-out bounded as artifacts accumulate between purge sweeps.

use crate::{SyncError, SyncResult};
use std::path::{Path, PathBuf};

pub(crate) use ::uuid::Uuid;

/// Canonical UUID wrapper used to derive storage paths.
///
/// Once constructed, the contained UUID renders as 32 lowercase hex characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShardableUuid(Uuid);

impl ShardableUuid {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Validates and parses a UUID string that must already be in canonical form.
    ///
    /// Hyphenated or uppercase forms are rejected rather than normalised, so that a file name
    /// found on disk maps back to exactly one identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if `input` is not canonical.
    pub fn parse(input: &str) -> SyncResult<Self> {
        if !Self::is_canonical(input) {
            return Err(SyncError::InvalidInput(format!(
                "UUID must be 32 lowercase hex characters without hyphens, got: '{input}'"
            )));
        }
        Uuid::parse_str(input)
            .map(Self)
            .map_err(|e| SyncError::InvalidInput(format!("invalid UUID '{input}': {e}")))
    }

    /// Returns true if `input` is in canonical UUID form.
    pub fn is_canonical(input: &str) -> bool {
        input.len() == 32
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Returns `parent_dir/<s1>/<s2>/`, the shard directory for this UUID.
    pub fn shard_dir(&self, parent_dir: &Path) -> PathBuf {
        let canonical = self.0.simple().to_string();
        parent_dir.join(&canonical[0..2]).join(&canonical[2..4])
    }

    /// Returns `parent_dir/<s1>/<s2>/<uuid>.<extension>`.
    pub fn sharded_file(&self, parent_dir: &Path, extension: &str) -> PathBuf {
        self.shard_dir(parent_dir)
            .join(format!("{}.{extension}", self.0.simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_uuid_renders_canonical_file_name() {
        let path = ShardableUuid::from_uuid(Uuid::new_v4()).sharded_file(Path::new("d"), "json");
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap();
        assert!(ShardableUuid::is_canonical(stem));
    }

    #[test]
    fn parse_rejects_non_canonical_forms() {
        assert!(ShardableUuid::parse("550e8400e29b41d4a716446655440000").is_ok());
        assert!(ShardableUuid::parse("550e8400-e29b-41d4-a716-446655440000").is_err());
        assert!(ShardableUuid::parse("550E8400E29B41D4A716446655440000").is_err());
        assert!(ShardableUuid::parse("550e8400e29b41d4a71644665544000").is_err());
        assert!(ShardableUuid::parse("").is_err());
    }

    #[test]
    fn sharded_file_layout() {
        let id = ShardableUuid::parse("550e8400e29b41d4a716446655440000").unwrap();
        let path = id.sharded_file(Path::new("/sync/resources"), "json");
        assert_eq!(
            path,
            PathBuf::from("/sync/resources/55/0e/550e8400e29b41d4a716446655440000.json")
        );
        assert_eq!(
            id.shard_dir(Path::new("/sync/resources")),
            PathBuf::from("/sync/resources/55/0e")
        );
    }

    #[test]
    fn hyphenated_uuid_maps_to_same_path() {
        let uuid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let from_uuid = ShardableUuid::from_uuid(uuid);
        let parsed = ShardableUuid::parse("550e8400e29b41d4a716446655440000").unwrap();
        assert_eq!(from_uuid, parsed);
    }
}
