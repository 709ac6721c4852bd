//! # Policy Store Service
//!
//! The authoritative, versioned record set of the joint fabric datastore.
//!
//! ## Philosophy
//!
//! - **Committed state only**: readers see what nodes have applied, never what is pending
//! - **Single writer**: every mutation runs on a private draft under one lock and is
//!   validated before it becomes visible
//! - **Snapshots for readers**: `get` and access decisions work on an `Arc` snapshot
//!   and never wait for writers
//! - **Versioned**: every accepted write bumps a monotonic version so concurrent
//!   writers can detect each other
//!
//! ## Core Concepts
//!
//! - `PolicySnapshot`: node entries, applied node policies, admins, groups, key sets,
//!   committed CAT versions
//! - `PolicyStore`: copy-on-write holder of the current snapshot
//! - `StoreError`: write-time invariant violations and lookups that found nothing

pub mod error;
pub mod model;
pub mod persistence;
pub mod snapshot;
pub mod store;

pub use error::StoreError;
pub use model::{
    AdminEntry, AdminUpdate, CommissioningStatus, EndpointEntry, EntryState, GroupInfo,
    GroupKeySet, GroupUpdate, KeySecurityPolicy, NodeEntry, NodePolicy,
};
pub use persistence::{StoreFile, STORE_FORMAT_VERSION};
pub use snapshot::PolicySnapshot;
pub use store::PolicyStore;
