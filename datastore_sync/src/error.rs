//! Sync errors

use core_types::{NodeId, Status};
use services_policy_store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("No entry for node {0}")]
    NodeNotFound(NodeId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn status(&self) -> Status {
        match self {
            SyncError::NodeNotFound(_) => Status::NotFound,
            SyncError::Store(err) => err.status(),
        }
    }
}
