//! Records pushed to nodes and their state machine

use core_types::{ClusterId, EndpointId, GroupId, Instant, KeySetId, NodeId, Status};
use policy::{AccessControlEntry, AccessRestrictionEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a pending record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record:{}", self.0)
    }
}

/// Kind of node configuration a record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Acl,
    Arl,
    GroupKey,
    Binding,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Acl => write!(f, "ACL"),
            RecordType::Arl => write!(f, "ARL"),
            RecordType::GroupKey => write!(f, "GroupKey"),
            RecordType::Binding => write!(f, "Binding"),
        }
    }
}

/// Whether a group key mapping is in force on the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKeyStatus {
    Active,
    Pending,
}

/// Mapping of a group to the key set that protects it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKeySetEntry {
    pub group_id: GroupId,
    pub key_set_id: KeySetId,
    pub status: GroupKeyStatus,
}

impl GroupKeySetEntry {
    pub fn pending(group_id: GroupId, key_set_id: KeySetId) -> Self {
        Self {
            group_id,
            key_set_id,
            status: GroupKeyStatus::Pending,
        }
    }

    pub fn activated(mut self) -> Self {
        self.status = GroupKeyStatus::Active;
        self
    }
}

/// Where a binding points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingTarget {
    Unicast { node: NodeId, endpoint: EndpointId },
    Group(GroupId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingType {
    Unicast,
    Group,
}

/// A binding installed on one endpoint of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingEntry {
    /// Endpoint on the node that owns the binding
    pub endpoint: EndpointId,
    pub target: BindingTarget,
    pub cluster: Option<ClusterId>,
}

impl BindingEntry {
    pub fn unicast(endpoint: EndpointId, node: NodeId, remote: EndpointId) -> Self {
        Self {
            endpoint,
            target: BindingTarget::Unicast {
                node,
                endpoint: remote,
            },
            cluster: None,
        }
    }

    pub fn group(endpoint: EndpointId, group: GroupId) -> Self {
        Self {
            endpoint,
            target: BindingTarget::Group(group),
            cluster: None,
        }
    }

    pub fn with_cluster(mut self, cluster: ClusterId) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn binding_type(&self) -> BindingType {
        match self.target {
            BindingTarget::Unicast { .. } => BindingType::Unicast,
            BindingTarget::Group(_) => BindingType::Group,
        }
    }

    pub fn references_node(&self, node: NodeId) -> bool {
        matches!(self.target, BindingTarget::Unicast { node: n, .. } if n == node)
    }
}

/// Identity of the node-side item a record writes
///
/// Two records with the same key on the same node describe the same item;
/// the later one supersedes the earlier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    Acl(AccessControlEntry),
    Arl(u32),
    GroupKeySet(GroupId),
    GroupMembership { endpoint: EndpointId, group: GroupId },
    Binding(BindingEntry),
}

/// The configuration a record carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordPayload {
    Acl(AccessControlEntry),
    Arl(AccessRestrictionEntry),
    GroupKeySet(GroupKeySetEntry),
    GroupMembership { endpoint: EndpointId, group: GroupId },
    Binding(BindingEntry),
}

impl RecordPayload {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordPayload::Acl(_) => RecordType::Acl,
            RecordPayload::Arl(_) => RecordType::Arl,
            RecordPayload::GroupKeySet(_) | RecordPayload::GroupMembership { .. } => {
                RecordType::GroupKey
            }
            RecordPayload::Binding(_) => RecordType::Binding,
        }
    }

    pub fn key(&self) -> RecordKey {
        match self {
            RecordPayload::Acl(ace) => RecordKey::Acl(ace.clone()),
            RecordPayload::Arl(are) => RecordKey::Arl(are.entry_id),
            RecordPayload::GroupKeySet(entry) => RecordKey::GroupKeySet(entry.group_id),
            RecordPayload::GroupMembership { endpoint, group } => RecordKey::GroupMembership {
                endpoint: *endpoint,
                group: *group,
            },
            RecordPayload::Binding(binding) => RecordKey::Binding(*binding),
        }
    }

    /// Returns true if the payload grants or points at `node`
    pub fn references_node(&self, node: NodeId) -> bool {
        match self {
            RecordPayload::Acl(ace) => ace.references_node(node),
            RecordPayload::Arl(are) => are.references_node(node),
            RecordPayload::Binding(binding) => binding.references_node(node),
            RecordPayload::GroupKeySet(_) | RecordPayload::GroupMembership { .. } => false,
        }
    }
}

/// Whether the record writes or deletes its item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordIntent {
    Apply,
    Delete,
}

/// Lifecycle state of a record
///
/// ```text
/// Pending ──────────► Committed
///    │  ▲
///    └──┘ retry
/// Pending / PendingDeletion ──► CommitFailed
/// CommitFailed ──► Pending / PendingDeletion (reissue)
/// PendingDeletion ──► (removed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordState {
    Pending,
    PendingDeletion,
    Committed,
    CommitFailed,
}

impl RecordState {
    /// Initial state for a record with the given intent
    pub fn initial(intent: RecordIntent) -> Self {
        match intent {
            RecordIntent::Apply => RecordState::Pending,
            RecordIntent::Delete => RecordState::PendingDeletion,
        }
    }

    /// Checks if the transition is allowed by the state machine
    pub fn can_transition_to(&self, next: RecordState) -> bool {
        use RecordState::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Committed)
                | (Pending, CommitFailed)
                | (PendingDeletion, PendingDeletion)
                | (PendingDeletion, CommitFailed)
                | (CommitFailed, Pending)
                | (CommitFailed, PendingDeletion)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordState::Committed | RecordState::CommitFailed)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Pending => write!(f, "Pending"),
            RecordState::PendingDeletion => write!(f, "PendingDeletion"),
            RecordState::Committed => write!(f, "Committed"),
            RecordState::CommitFailed => write!(f, "CommitFailed"),
        }
    }
}

/// A change destined for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub id: RecordId,
    pub node_id: NodeId,
    pub payload: RecordPayload,
    pub intent: RecordIntent,
    pub state: RecordState,
    pub retry_count: u32,
    pub last_attempt: Option<Instant>,
    /// Earliest time the periodic review may attempt the record again
    pub next_attempt: Instant,
    /// Status of the most recent failed attempt
    pub last_status: Option<Status>,
    /// Creation order across the tracker
    pub sequence: u64,
}

impl PendingRecord {
    pub fn record_type(&self) -> RecordType {
        self.payload.record_type()
    }

    pub fn key(&self) -> RecordKey {
        self.payload.key()
    }

    pub fn is_deletion(&self) -> bool {
        self.intent == RecordIntent::Delete
    }

    /// Unresolved records are attempted by the sync engine
    pub fn is_unresolved(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::FabricIndex;
    use identity::AuthMode;
    use policy::Privilege;

    #[test]
    fn test_state_machine_transitions() {
        use RecordState::*;
        assert!(Pending.can_transition_to(Committed));
        assert!(Pending.can_transition_to(Pending));
        assert!(Pending.can_transition_to(CommitFailed));
        assert!(PendingDeletion.can_transition_to(CommitFailed));
        assert!(!PendingDeletion.can_transition_to(Committed));
        assert!(!Committed.can_transition_to(Pending));
        assert!(!CommitFailed.can_transition_to(Committed));
        assert!(CommitFailed.can_transition_to(Pending));
        assert!(!CommitFailed.can_transition_to(CommitFailed));
    }

    #[test]
    fn test_initial_state_follows_intent() {
        assert_eq!(RecordState::initial(RecordIntent::Apply), RecordState::Pending);
        assert_eq!(
            RecordState::initial(RecordIntent::Delete),
            RecordState::PendingDeletion
        );
    }

    #[test]
    fn test_payload_type_and_key() {
        let ace = AccessControlEntry::new(FabricIndex::new(1), Privilege::View, AuthMode::Case)
            .with_subject(NodeId::new(7));
        let payload = RecordPayload::Acl(ace.clone());
        assert_eq!(payload.record_type(), RecordType::Acl);
        assert_eq!(payload.key(), RecordKey::Acl(ace));
        assert!(payload.references_node(NodeId::new(7)));

        let membership = RecordPayload::GroupMembership {
            endpoint: EndpointId::new(1),
            group: GroupId::new(2),
        };
        assert_eq!(membership.record_type(), RecordType::GroupKey);
    }

    #[test]
    fn test_binding_references() {
        let unicast = BindingEntry::unicast(EndpointId::new(1), NodeId::new(9), EndpointId::new(2));
        assert_eq!(unicast.binding_type(), BindingType::Unicast);
        assert!(unicast.references_node(NodeId::new(9)));

        let group = BindingEntry::group(EndpointId::new(1), GroupId::new(3))
            .with_cluster(ClusterId::ON_OFF);
        assert_eq!(group.binding_type(), BindingType::Group);
        assert!(!group.references_node(NodeId::new(9)));
    }
}
