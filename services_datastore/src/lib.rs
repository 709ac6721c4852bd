//! # Joint Fabric Datastore Service
//!
//! The administrative face of the fabric datastore: commissioning and
//! removal of nodes, the admin list, groups and key sets, and the ACL,
//! ARL, group membership and binding commands that configure nodes.
//!
//! ## Philosophy
//!
//! - **Authorized, then validated, then tracked**: every command is checked against the
//!   datastore's own ACL, validated against the store, and turned into pending records
//! - **Committed state is what nodes confirmed**: commands never edit node policy directly
//! - **Revoke before forgetting**: a node loses its privileges on every peer before its
//!   entry disappears
//! - **Deterministic time**: the datastore keeps a virtual clock; nothing sleeps
//!
//! ## Core Concepts
//!
//! - `Datastore`: the facade; one `impl` block per command family
//! - `DatastoreConfig`: timeouts, retry schedule, administrator CAT
//! - `DatastoreError`: every failure, mapped onto a protocol status
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A commissioner (pairing, certificate issuance, network join)
//! - A wire protocol server

pub mod acl;
pub mod admin;
pub mod bindings;
pub mod command_gate;
pub mod commissioning;
pub mod config;
pub mod datastore;
pub mod endpoints;
pub mod error;
pub mod groups;
pub mod query;

#[cfg(test)]
mod testing;

pub use command_gate::JointFabricCommand;
pub use commissioning::RemovalOutcome;
pub use config::{
    ConfigError, ConfigLoader, DatastoreConfig, RetryConfig, CONFIG_FORMAT_VERSION,
    DATASTORE_CONFIG_NAME,
};
pub use datastore::Datastore;
pub use error::DatastoreError;
