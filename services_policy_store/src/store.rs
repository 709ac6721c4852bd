//! Copy-on-write store of the committed datastore

use crate::error::StoreError;
use crate::model::{NodeEntry, NodePolicy};
use crate::snapshot::PolicySnapshot;
use core_types::NodeId;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

/// Versioned holder of the current [`PolicySnapshot`]
///
/// Readers clone an `Arc` and never block on writers. Writers are
/// serialized: each runs on a private draft that replaces the published
/// snapshot only if it passes [`PolicySnapshot::validate`].
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
    writer: Mutex<()>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: PolicySnapshot) -> Result<Self, StoreError> {
        snapshot.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    /// The current committed snapshot
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Committed policy of `node`; empty if the node exists but has applied nothing
    pub fn get(&self, node: NodeId) -> Option<NodePolicy> {
        let snapshot = self.snapshot();
        if !snapshot.nodes.contains_key(&node) {
            return None;
        }
        Some(snapshot.policy(node).cloned().unwrap_or_default())
    }

    pub fn node_entry(&self, node: NodeId) -> Option<NodeEntry> {
        self.snapshot().nodes.get(&node).cloned()
    }

    /// Runs `f` against a draft and publishes it if both `f` and validation succeed
    ///
    /// On error the published snapshot is untouched.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut PolicySnapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _writer = self.writer.lock();
        let mut draft = PolicySnapshot::clone(&self.current.read());
        let value = f(&mut draft)?;
        draft.validate()?;
        draft.version += 1;
        let version = draft.version;
        *self.current.write() = Arc::new(draft);
        debug!(version, "published snapshot");
        Ok(value)
    }

    /// Like [`update`](Self::update) but only if the store is still at `expected`
    pub fn put_if_version<T>(
        &self,
        expected: u64,
        f: impl FnOnce(&mut PolicySnapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.update(|draft| {
            if draft.version != expected {
                return Err(StoreError::VersionConflict {
                    expected,
                    actual: draft.version,
                });
            }
            f(draft)
        })
    }
}
