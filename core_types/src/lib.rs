//! # Core Types
//!
//! This crate defines the fundamental vocabulary shared by the fabric policy
//! subsystem: node and endpoint identifiers, CASE Authenticated Tags, access
//! control subjects, protocol status codes, and virtual time.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: A CAT is not a node ID, even though both fit in a `u64`.
//! - **Type safety first**: Identifiers are newtypes and cannot be swapped by accident.
//! - **Deterministic time**: `Instant` is virtual so every retry schedule is testable.
//!
//! ## Key Types
//!
//! - [`NodeId`], [`EndpointId`], [`GroupId`], [`KeySetId`]: fabric identifiers
//! - [`CaseAuthTag`]: packed `(identifier, version)` pair used as an ACE subject
//! - [`SubjectId`]: tagged subject (node, CAT, or group)
//! - [`Status`]: interaction status codes produced and consumed by the subsystem
//! - [`Instant`], [`Duration`]: virtual time

pub mod cat;
pub mod ids;
pub mod status;
pub mod time;

pub use cat::{CaseAuthTag, CatError, SubjectId};
pub use ids::{
    ClusterId, DeviceTypeId, EndpointId, FabricIndex, GroupId, KeySetId, NodeId, IPK_KEY_SET_ID,
};
pub use status::Status;
pub use time::{Duration, Instant};
