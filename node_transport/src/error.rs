//! Transport errors

use core_types::{NodeId, Status};
use thiserror::Error;

/// Errors surfaced by a [`NodeTransport`](crate::NodeTransport)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The node answered with a failure status
    #[error("Node rejected request: {0}")]
    Rejected(Status),

    #[error("Node did not answer within the timeout")]
    Timeout,

    #[error("Node unreachable: {0}")]
    Unreachable(NodeId),
}

impl TransportError {
    pub fn status(&self) -> Status {
        match self {
            TransportError::Rejected(status) => *status,
            TransportError::Timeout | TransportError::Unreachable(_) => Status::Timeout,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.status().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Unreachable(NodeId::new(1)).is_transient());
        assert!(TransportError::Rejected(Status::Busy).is_transient());
        assert!(!TransportError::Rejected(Status::ConstraintError).is_transient());
        assert_eq!(
            TransportError::Rejected(Status::AccessDenied).status(),
            Status::AccessDenied
        );
    }
}
