//! # Access Policy
//!
//! This crate decides whether a session may operate on a node's data model.
//!
//! ## Philosophy
//!
//! - **Restrictions beat grants**: any matching restricting entry denies, whatever the ACL says
//! - **Decisions are pure**: same policy view, same session, same request, same answer
//! - **Invariants at write time**: entries that could never be valid are rejected before storage
//! - **CAT versions are scoped centrally**: one subject matcher, never raw integer equality
//!
//! ## Core Concepts
//!
//! - `AccessControlEntry`: privilege grant to subjects over targets
//! - `AccessRestrictionEntry`: explicit denial overriding grants for its subjects and targets
//! - `CatVersionTable`: most recently committed version per CAT identifier
//! - `AccessDecisionEngine`: evaluates a request against a `PolicyView`
//! - `AclIndex`: lookup structure keyed by `(endpoint, subject)` for large ACLs
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - Session establishment or authentication
//! - Storage of policy (see `services_policy_store`)
//! - Propagation of policy to nodes (see `datastore_sync`)

pub mod cat_versions;
pub mod engine;
pub mod entry;
pub mod index;
pub mod validate;

pub use cat_versions::CatVersionTable;
pub use engine::{
    subject_matches, AccessDecision, AccessDecisionEngine, AccessRequest, CatScope, DecisionReport,
    DenyReason, Grant, PolicyView,
};
pub use entry::{AccessControlEntry, AccessRestrictionEntry, Privilege, RequestPath, Target};
pub use index::AclIndex;
pub use validate::{
    validate_ace, validate_are, PolicyViolation, MAX_SUBJECTS_PER_ENTRY, MAX_TARGETS_PER_ENTRY,
};
