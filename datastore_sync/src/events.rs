//! Settle events and pass reports

use core_types::{Instant, NodeId, Status};
use lifecycle::{RecordId, RecordType};

/// How a record left (or stayed in) the pending set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleKind {
    Committed,
    Removed,
    Retrying { next_attempt: Instant },
    Failed { status: Status },
}

/// Emitted for every apply attempt that changed a record's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleEvent {
    pub node: NodeId,
    pub record: RecordId,
    pub kind: RecordType,
    pub outcome: SettleKind,
}

/// Result of reconciling one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub node: Option<NodeId>,
    pub committed: Vec<RecordId>,
    pub removed: Vec<RecordId>,
    pub retrying: Vec<RecordId>,
    pub failed: Vec<RecordId>,
    /// The pass stopped because the node's reconciliation was cancelled
    pub cancelled: bool,
}

impl RefreshReport {
    pub fn for_node(node: NodeId) -> Self {
        Self {
            node: Some(node),
            ..Self::default()
        }
    }

    /// Number of records resolved successfully
    pub fn settled(&self) -> usize {
        self.committed.len() + self.removed.len()
    }

    /// Returns true if nothing was attempted
    pub fn is_noop(&self) -> bool {
        self.settled() == 0 && self.retrying.is_empty() && self.failed.is_empty()
    }

    /// Returns true if every attempted record settled
    pub fn is_converged(&self) -> bool {
        self.retrying.is_empty() && self.failed.is_empty() && !self.cancelled
    }

    pub(crate) fn absorb(&mut self, other: RefreshReport) {
        self.committed.extend(other.committed);
        self.removed.extend(other.removed);
        self.retrying = other.retrying;
        self.failed.extend(other.failed);
        self.cancelled |= other.cancelled;
    }
}

/// Result of one periodic review
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewReport {
    pub passes: Vec<RefreshReport>,
    /// Nodes whose removal completed during the review
    pub removed_nodes: Vec<NodeId>,
}

impl ReviewReport {
    pub fn settled(&self) -> usize {
        self.passes.iter().map(RefreshReport::settled).sum()
    }

    pub fn failed(&self) -> usize {
        self.passes.iter().map(|p| p.failed.len()).sum()
    }
}
