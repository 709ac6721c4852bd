//! # Lifecycle
//!
//! Per-record status tracking, retry scheduling, and cancellation for
//! configuration pushed to fabric nodes.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: every record is in exactly one named state
//! - **Testability first**: all scheduling runs on virtual `Instant`s
//! - **Mechanism not policy**: the tracker records outcomes, the sync engine decides
//! - **No async runtime required**: works from plain threads
//!
//! ## Core Concepts
//!
//! - `PendingRecord`: a change destined for one node, with retry bookkeeping
//! - `RecordState`: `Pending`, `PendingDeletion`, `Committed`, `CommitFailed`
//! - `LifecycleTracker`: the set of unresolved records, coalesced per `(node, key)`
//! - `RetryPolicy`: bounded exponential backoff
//! - `CancellationSource` / `CancellationToken`: abort in-flight work on node removal
//! - `Timeout`: bound on a single apply to a node

pub mod cancel;
pub mod record;
pub mod retry;
pub mod tracker;

pub use cancel::{CancellationReason, CancellationSource, CancellationToken, Timeout};
pub use record::{
    BindingEntry, BindingTarget, BindingType, GroupKeySetEntry, GroupKeyStatus, PendingRecord,
    RecordId, RecordIntent, RecordKey, RecordPayload, RecordState, RecordType,
};
pub use retry::RetryPolicy;
pub use tracker::{FailureOutcome, LifecycleTracker, SettleOutcome, TrackerError};
