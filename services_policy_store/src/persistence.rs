//! Store persistence
//!
//! The committed snapshot is written as versioned JSON. Loading refuses
//! unknown format versions and snapshots that violate store invariants.

use crate::error::StoreError;
use crate::snapshot::PolicySnapshot;
use crate::store::PolicyStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Current on-disk format version
pub const STORE_FORMAT_VERSION: u32 = 1;

/// On-disk container for a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFile {
    pub format_version: u32,
    pub snapshot: PolicySnapshot,
}

impl StoreFile {
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            format_version: STORE_FORMAT_VERSION,
            snapshot,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec_pretty(self).map_err(|e| StoreError::Parse(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let file: StoreFile =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Parse(e.to_string()))?;
        if file.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(file.format_version));
        }
        file.snapshot.validate()?;
        Ok(file)
    }
}

impl PolicyStore {
    /// Writes the current snapshot to `path`
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let snapshot = self.snapshot();
        let bytes = StoreFile::new(PolicySnapshot::clone(&snapshot)).to_bytes()?;
        fs::write(path, bytes).map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), version = snapshot.version, "saved policy store");
        Ok(())
    }

    /// Loads a store previously written with [`save_to`](Self::save_to)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;
        let file = StoreFile::from_bytes(&bytes)?;
        info!(
            path = %path.display(),
            version = file.snapshot.version,
            "loaded policy store"
        );
        PolicyStore::from_snapshot(file.snapshot)
    }
}
