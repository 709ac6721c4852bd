//! Store errors

use core_types::{EndpointId, GroupId, KeySetId, NodeId, Status};
use policy::PolicyViolation;
use thiserror::Error;

/// Errors produced by the policy store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Invalid entry: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("Node entry already exists: {0}")]
    DuplicateNode(NodeId),

    #[error("Node entry not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Endpoint {endpoint} not found on node {node}")]
    EndpointNotFound { node: NodeId, endpoint: EndpointId },

    #[error("Admin entry already exists: {0}")]
    DuplicateAdmin(NodeId),

    #[error("Admin entry not found: {0}")]
    AdminNotFound(NodeId),

    #[error("An anchor administrator already exists: {0}")]
    AnchorAdminExists(NodeId),

    #[error("Admin {0} must hold both anchor flags or neither")]
    PartialAnchorFlags(NodeId),

    #[error("Anchor administrator must be at index 0")]
    AnchorNotFirst,

    #[error("The IPK key set cannot be removed")]
    IpkNotRemovable,

    #[error("Key set already exists: {0}")]
    DuplicateKeySet(KeySetId),

    #[error("Key set not found: {0}")]
    KeySetNotFound(KeySetId),

    #[error("Key set {0} is in use and not marked for deletion")]
    KeySetInUse(KeySetId),

    #[error("Group already exists: {0}")]
    DuplicateGroup(GroupId),

    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Group {0} has no CAT to version")]
    GroupHasNoCat(GroupId),

    #[error("Group {0} is in use and not marked for deletion")]
    GroupInUse(GroupId),

    #[error("Version conflict: expected {expected}, store is at {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("Failed to access store file: {0}")]
    Io(String),

    #[error("Failed to parse store file: {0}")]
    Parse(String),

    #[error("Unsupported store format version: {0}")]
    UnsupportedVersion(u32),
}

impl StoreError {
    pub fn status(&self) -> Status {
        match self {
            StoreError::NodeNotFound(_)
            | StoreError::EndpointNotFound { .. }
            | StoreError::AdminNotFound(_)
            | StoreError::KeySetNotFound(_)
            | StoreError::GroupNotFound(_) => Status::NotFound,
            StoreError::VersionConflict { .. } => Status::Busy,
            StoreError::Io(_) | StoreError::Parse(_) | StoreError::UnsupportedVersion(_) => {
                Status::Failure
            }
            _ => Status::ConstraintError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use identity::AuthMode;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            StoreError::NodeNotFound(NodeId::new(1)).status(),
            Status::NotFound
        );
        assert_eq!(StoreError::IpkNotRemovable.status(), Status::ConstraintError);
        assert_eq!(
            StoreError::from(PolicyViolation::AdministerRequiresCase(AuthMode::Group)).status(),
            Status::ConstraintError
        );
        assert_eq!(
            StoreError::VersionConflict {
                expected: 1,
                actual: 2
            }
            .status(),
            Status::Busy
        );
    }
}
