//! Administrative API errors

use crate::config::ConfigError;
use core_types::{EndpointId, NodeId, Status};
use datastore_sync::SyncError;
use identity::{AuthMode, SessionError};
use lifecycle::TrackerError;
use policy::{DenyReason, PolicyViolation};
use services_policy_store::StoreError;
use thiserror::Error;

/// Errors returned by the administrative API
///
/// Every variant maps onto a protocol [`Status`] through [`status`](Self::status).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    #[error("Access denied: {0:?}")]
    AccessDenied(DenyReason),

    #[error("Command requires a CASE session, got {0}")]
    UnsupportedAccess(AuthMode),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Administrator fabric index is null")]
    InvalidAdministratorFabricIndex,

    #[error("Node {0} is not an operational node ID")]
    InvalidNodeId(NodeId),

    #[error("Node {0} is being removed")]
    RemovalInProgress(NodeId),

    #[error("Endpoint {endpoint} already registered on node {node}")]
    DuplicateEndpoint { node: NodeId, endpoint: EndpointId },

    #[error("No such entry on node {0}")]
    EntryNotFound(NodeId),

    #[error("Entry is marked for deletion")]
    PendingDeletion,

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DatastoreError {
    pub fn status(&self) -> Status {
        match self {
            DatastoreError::AccessDenied(_) => Status::AccessDenied,
            DatastoreError::UnsupportedAccess(_) => Status::UnsupportedAccess,
            DatastoreError::InvalidCommand(_) => Status::InvalidCommand,
            DatastoreError::InvalidAdministratorFabricIndex => {
                Status::InvalidAdministratorFabricIndex
            }
            DatastoreError::EntryNotFound(_) => Status::NotFound,
            DatastoreError::InvalidNodeId(_)
            | DatastoreError::RemovalInProgress(_)
            | DatastoreError::DuplicateEndpoint { .. }
            | DatastoreError::PendingDeletion => Status::ConstraintError,
            DatastoreError::Policy(violation) => violation.status(),
            DatastoreError::Store(err) => err.status(),
            DatastoreError::Sync(err) => err.status(),
            DatastoreError::Tracker(err) => err.status(),
            DatastoreError::Session(err) => err.status(),
            DatastoreError::Config(_) => Status::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            DatastoreError::from(StoreError::IpkNotRemovable).status(),
            Status::ConstraintError
        );
        assert_eq!(
            DatastoreError::from(SyncError::NodeNotFound(NodeId::new(1))).status(),
            Status::NotFound
        );
        assert_eq!(
            DatastoreError::AccessDenied(DenyReason::NoMatchingEntry).status(),
            Status::AccessDenied
        );
        assert_eq!(
            DatastoreError::UnsupportedAccess(AuthMode::Pase).status(),
            Status::UnsupportedAccess
        );
    }
}
