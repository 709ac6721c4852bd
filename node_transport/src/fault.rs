//! Deterministic fault injection for simulated nodes
//!
//! A plan is installed per node and consulted on every apply. Nothing is
//! random and nothing sleeps: delays are compared against the call's
//! timeout instead of being waited out.
//!
//! ## Example
//!
//! ```
//! use node_transport::{FaultPlan, NodeFault};
//! use core_types::{Duration, Status};
//!
//! let plan = FaultPlan::new()
//!     .with_fault(NodeFault::FailNext { count: 2, status: Status::Busy })
//!     .with_fault(NodeFault::Delay { duration: Duration::from_millis(100) });
//! assert_eq!(plan.faults().len(), 2);
//! ```

use crate::error::TransportError;
use core_types::{Duration, NodeId, Status};
use lifecycle::{RecordType, Timeout};

/// A fault a simulated node exhibits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFault {
    /// Fail the next N applies with `status`
    FailNext { count: u32, status: Status },

    /// Every call fails as if the node were offline
    Unreachable,

    /// Each apply takes `duration`; longer than the timeout is a timeout
    Delay { duration: Duration },

    /// Reject every apply of one record type with `status`
    RejectType { record_type: RecordType, status: Status },
}

/// Faults configured for one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    faults: Vec<NodeFault>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fault(mut self, fault: NodeFault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn faults(&self) -> &[NodeFault] {
        &self.faults
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub(crate) fn is_unreachable(&self) -> bool {
        self.faults.iter().any(|f| matches!(f, NodeFault::Unreachable))
    }

    /// Decides the fate of one apply, consuming one-shot faults
    pub(crate) fn check_apply(
        &mut self,
        node: NodeId,
        record_type: RecordType,
        timeout: Timeout,
    ) -> Result<(), TransportError> {
        if self.is_unreachable() {
            return Err(TransportError::Unreachable(node));
        }
        for fault in &self.faults {
            match fault {
                NodeFault::Delay { duration } if timeout.is_exceeded_by(*duration) => {
                    return Err(TransportError::Timeout);
                }
                NodeFault::RejectType {
                    record_type: rejected,
                    status,
                } if *rejected == record_type => {
                    return Err(TransportError::Rejected(*status));
                }
                _ => {}
            }
        }

        let mut failure = None;
        for fault in &mut self.faults {
            if let NodeFault::FailNext { count, status } = fault {
                if *count > 0 {
                    *count -= 1;
                    failure = Some(*status);
                    break;
                }
            }
        }
        self.faults
            .retain(|f| !matches!(f, NodeFault::FailNext { count: 0, .. }));

        match failure {
            Some(status) => Err(TransportError::Rejected(status)),
            None => Ok(()),
        }
    }
}
