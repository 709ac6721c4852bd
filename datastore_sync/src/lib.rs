//! # Datastore Sync Engine
//!
//! Reconciles what each node has applied with what the datastore wants it
//! to have.
//!
//! ## Philosophy
//!
//! - **One lane per node**: at most one apply sequence is in flight per node, and a
//!   slow node never holds up the rest of the fleet
//! - **Retry only the transient**: structural rejections surface at once; timeouts and
//!   busy nodes back off and retry until the policy is exhausted
//! - **Settle, then fold**: a record leaves the pending set before its payload joins
//!   the node's committed view, so a cancelled record is never reintroduced
//! - **Signals, not sleeps**: every settled record is broadcast to subscribers
//!
//! ## Core Concepts
//!
//! - `SyncEngine`: periodic review, RefreshNode, single passes, cancellation
//! - `SettleEvent`: what happened to one record
//! - `RefreshReport` / `ReviewReport`: what a pass or a review did

pub mod engine;
pub mod error;
pub mod events;

pub use engine::{SyncConfig, SyncEngine};
pub use error::SyncError;
pub use events::{RefreshReport, ReviewReport, SettleEvent, SettleKind};
