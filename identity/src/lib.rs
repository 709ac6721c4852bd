//! # Identity
//!
//! Session context primitives for the fabric policy subsystem.
//!
//! ## Philosophy
//!
//! - **Identity is explicit and contextual, not global**
//! - **Identity does NOT grant authority by itself**: the access decision engine does
//! - **Revocation is immediate**: closing a session is visible to every clone of its context
//! - **Testability first; no hidden global state**
//!
//! ## Core Concepts
//!
//! - `AuthMode`: how the peer authenticated (PASE, CASE, or group)
//! - `SessionContext`: the `{subjects, auth mode, fabric}` triple handed to every decision
//! - `SessionRegistry`: opens and closes sessions, and owns the single commissioning window
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A PASE/CASE handshake implementation
//! - Certificate validation
//! - A secure channel

use core_types::{CaseAuthTag, FabricIndex, GroupId, NodeId, Status, SubjectId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Maximum number of CATs a CASE peer may present
pub const MAX_CATS_PER_SESSION: usize = 3;

/// How the peer of a session authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    /// Passcode session, only during a commissioning window
    Pase,
    /// Certificate-authenticated operational session
    Case,
    /// Groupcast message protected by a group key
    Group,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Pase => write!(f, "PASE"),
            AuthMode::Case => write!(f, "CASE"),
            AuthMode::Group => write!(f, "Group"),
        }
    }
}

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Identity of the peer behind an incoming request
///
/// Clones share a liveness flag with the registry entry, so a closed
/// session is observed as closed everywhere at once.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: SessionId,
    auth_mode: AuthMode,
    fabric_index: FabricIndex,
    subjects: Vec<SubjectId>,
    live: Arc<AtomicBool>,
}

impl SessionContext {
    fn new(auth_mode: AuthMode, fabric_index: FabricIndex, subjects: Vec<SubjectId>) -> Self {
        Self {
            id: SessionId::new(),
            auth_mode,
            fabric_index,
            subjects,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Builds a CASE context without registering it
    ///
    /// Used by nodes that evaluate requests relayed to them, where the
    /// session itself lives elsewhere.
    pub fn case(fabric_index: FabricIndex, peer: NodeId, cats: &[CaseAuthTag]) -> Self {
        let mut subjects = vec![SubjectId::Node(peer)];
        subjects.extend(cats.iter().copied().map(SubjectId::Cat));
        Self::new(AuthMode::Case, fabric_index, subjects)
    }

    /// Builds a group context without registering it
    pub fn group(fabric_index: FabricIndex, group: GroupId, cats: &[CaseAuthTag]) -> Self {
        let mut subjects = vec![SubjectId::Group(group)];
        subjects.extend(cats.iter().copied().map(SubjectId::Cat));
        Self::new(AuthMode::Group, fabric_index, subjects)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn fabric_index(&self) -> FabricIndex {
        self.fabric_index
    }

    /// Subjects the peer authenticated as
    pub fn subjects(&self) -> &[SubjectId] {
        &self.subjects
    }

    /// CATs carried by the peer
    pub fn cats(&self) -> impl Iterator<Item = &CaseAuthTag> {
        self.subjects.iter().filter_map(SubjectId::as_cat)
    }

    /// Operational node ID of a CASE peer
    pub fn peer_node(&self) -> Option<NodeId> {
        self.subjects.iter().find_map(SubjectId::as_node)
    }

    /// Returns false once the session has been closed
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_pase(&self) -> bool {
        self.auth_mode == AuthMode::Pase
    }

    fn revoke(&self) {
        self.live.store(false, Ordering::Release);
    }
}

/// Session-related errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Commissioning window already open: {0}")]
    CommissioningWindowBusy(SessionId),

    #[error("Too many CATs presented: {count} (max {MAX_CATS_PER_SESSION})")]
    TooManyCats { count: usize },

    #[error("Operational session requires a fabric")]
    MissingFabric,

    #[error("Session not found: {0}")]
    NotFound(SessionId),
}

impl SessionError {
    pub fn status(&self) -> Status {
        match self {
            SessionError::CommissioningWindowBusy(_) => Status::Busy,
            SessionError::TooManyCats { .. } => Status::InvalidCommand,
            SessionError::MissingFabric => Status::InvalidCommand,
            SessionError::NotFound(_) => Status::NotFound,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionContext>,
    commissioning_window: Option<SessionId>,
}

/// Registry of open sessions
///
/// Owns the commissioning window: at most one PASE session exists at a
/// time, and closing it revokes the implicit administrator grant.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a commissioning window and returns its PASE session
    pub fn open_pase(&self, fabric_index: FabricIndex) -> Result<SessionContext, SessionError> {
        let mut state = self.state.lock();
        if let Some(open) = state.commissioning_window {
            return Err(SessionError::CommissioningWindowBusy(open));
        }
        let session = SessionContext::new(AuthMode::Pase, fabric_index, Vec::new());
        state.commissioning_window = Some(session.id);
        state.sessions.insert(session.id, session.clone());
        info!(session = %session.id, "commissioning window opened");
        Ok(session)
    }

    /// Registers a CASE session for `peer` carrying `cats`
    pub fn open_case(
        &self,
        fabric_index: FabricIndex,
        peer: NodeId,
        cats: &[CaseAuthTag],
    ) -> Result<SessionContext, SessionError> {
        Self::check_operational(fabric_index, cats)?;
        let session = SessionContext::case(fabric_index, peer, cats);
        self.register(session)
    }

    /// Registers a group session
    pub fn open_group(
        &self,
        fabric_index: FabricIndex,
        group: GroupId,
        cats: &[CaseAuthTag],
    ) -> Result<SessionContext, SessionError> {
        Self::check_operational(fabric_index, cats)?;
        let session = SessionContext::group(fabric_index, group, cats);
        self.register(session)
    }

    /// Closes a session, revoking it for every holder of its context
    pub fn close(&self, id: SessionId) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let session = state.sessions.remove(&id).ok_or(SessionError::NotFound(id))?;
        session.revoke();
        if state.commissioning_window == Some(id) {
            state.commissioning_window = None;
            info!(session = %id, "commissioning window closed");
        } else {
            debug!(session = %id, "session closed");
        }
        Ok(())
    }

    /// Returns the open commissioning window, if any
    pub fn commissioning_window(&self) -> Option<SessionContext> {
        let state = self.state.lock();
        state
            .commissioning_window
            .and_then(|id| state.sessions.get(&id).cloned())
    }

    pub fn get(&self, id: SessionId) -> Option<SessionContext> {
        self.state.lock().sessions.get(&id).cloned()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    fn check_operational(fabric_index: FabricIndex, cats: &[CaseAuthTag]) -> Result<(), SessionError> {
        if !fabric_index.is_assigned() {
            return Err(SessionError::MissingFabric);
        }
        if cats.len() > MAX_CATS_PER_SESSION {
            return Err(SessionError::TooManyCats { count: cats.len() });
        }
        Ok(())
    }

    fn register(&self, session: SessionContext) -> Result<SessionContext, SessionError> {
        let mut state = self.state.lock();
        state.sessions.insert(session.id, session.clone());
        debug!(session = %session.id, mode = %session.auth_mode, "session opened");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fabric() -> FabricIndex {
        FabricIndex::new(1)
    }

    #[test]
    fn test_session_id_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert!(SessionId::new().to_string().starts_with("session:"));
    }

    #[test]
    fn test_single_commissioning_window() {
        let registry = SessionRegistry::new();
        let first = registry.open_pase(FabricIndex::NONE).unwrap();
        let second = registry.open_pase(FabricIndex::NONE);
        assert_eq!(
            second.unwrap_err(),
            SessionError::CommissioningWindowBusy(first.id())
        );
        assert_eq!(registry.commissioning_window().unwrap().id(), first.id());
    }

    #[test]
    fn test_close_revokes_every_clone() {
        let registry = SessionRegistry::new();
        let pase = registry.open_pase(FabricIndex::NONE).unwrap();
        let held_elsewhere = pase.clone();
        assert!(held_elsewhere.is_live());

        registry.close(pase.id()).unwrap();

        assert!(!held_elsewhere.is_live());
        assert!(registry.commissioning_window().is_none());
        assert!(registry.open_pase(FabricIndex::NONE).is_ok());
    }

    #[test]
    fn test_case_session_subjects() {
        let registry = SessionRegistry::new();
        let cat = CaseAuthTag::new(0x1010, 1);
        let session = registry
            .open_case(fabric(), NodeId::new(0x11), &[cat])
            .unwrap();

        assert_eq!(session.auth_mode(), AuthMode::Case);
        assert_eq!(session.peer_node(), Some(NodeId::new(0x11)));
        assert_eq!(session.cats().copied().collect::<Vec<_>>(), vec![cat]);
    }

    #[test]
    fn test_too_many_cats_rejected() {
        let registry = SessionRegistry::new();
        let cats: Vec<_> = (1..=4).map(|id| CaseAuthTag::new(id, 1)).collect();
        let err = registry
            .open_case(fabric(), NodeId::new(0x11), &cats)
            .unwrap_err();
        assert_eq!(err.status(), Status::InvalidCommand);
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn test_operational_session_requires_fabric() {
        let registry = SessionRegistry::new();
        let err = registry
            .open_group(FabricIndex::NONE, GroupId::new(1), &[])
            .unwrap_err();
        assert_eq!(err, SessionError::MissingFabric);
    }

    #[test]
    fn test_close_unknown_session() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        assert_eq!(registry.close(id), Err(SessionError::NotFound(id)));
    }
}
