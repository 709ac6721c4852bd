//! # Node Transport
//!
//! The boundary between the datastore and the nodes it configures.
//!
//! ## Philosophy
//!
//! - **Narrow**: three calls (apply a record, query applied records, send a command)
//! - **Every call is bounded**: applies carry a [`Timeout`]; expiry is a transient failure
//! - **Failures are classified at the edge**: [`TransportError::is_transient`] is the
//!   only thing the sync engine needs to decide between retry and give up
//!
//! ## Core Concepts
//!
//! - `NodeTransport`: the trait the sync engine and the datastore consume
//! - `SimulatedFleet`: an in-memory fleet of nodes that keep their own ACL/ARL,
//!   evaluate commands with the access decision engine, and follow a deterministic
//!   `FaultPlan`
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A secure channel or session handshake
//! - A wire encoding of interaction model messages

pub mod error;
pub mod fault;
pub mod simulated;

pub use error::TransportError;
pub use fault::{FaultPlan, NodeFault};
pub use simulated::{ApplyHook, NodeState, SimulatedFleet};

use core_types::NodeId;
use identity::SessionContext;
use lifecycle::{PendingRecord, RecordPayload, RecordType, Timeout};
use policy::AccessRequest;

/// Transport to the nodes of the fabric
pub trait NodeTransport: Send + Sync {
    /// Pushes one record to `node`
    ///
    /// Applying a record whose item is already in the requested state
    /// succeeds.
    fn apply(&self, node: NodeId, record: &PendingRecord, timeout: Timeout) -> Result<(), TransportError>;

    /// Reads back what `node` has applied for one record type
    fn query(&self, node: NodeId, record_type: RecordType) -> Result<Vec<RecordPayload>, TransportError>;

    /// Delivers an operational command from `session` to `node`
    ///
    /// The node authorizes the command against its own applied policy;
    /// a denial is `Rejected(AccessDenied)`.
    fn send_command(
        &self,
        session: &SessionContext,
        node: NodeId,
        request: &AccessRequest,
    ) -> Result<(), TransportError>;
}
