//! Datastore record types

use core_types::{CaseAuthTag, DeviceTypeId, EndpointId, GroupId, KeySetId, NodeId};
use lifecycle::{BindingEntry, GroupKeySetEntry};
use policy::{AccessControlEntry, AccessRestrictionEntry, Privilege};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Commissioning status of a node entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommissioningStatus {
    Pending,
    Committed,
    CommitFailed,
}

impl fmt::Display for CommissioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommissioningStatus::Pending => write!(f, "Pending"),
            CommissioningStatus::Committed => write!(f, "Committed"),
            CommissioningStatus::CommitFailed => write!(f, "CommitFailed"),
        }
    }
}

/// Endpoint of a node as known to the datastore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub endpoint_id: EndpointId,
    pub friendly_name: String,
    /// Groups the endpoint is a committed member of
    pub group_ids: BTreeSet<GroupId>,
    pub device_types: Vec<DeviceTypeId>,
}

impl EndpointEntry {
    pub fn new(endpoint_id: EndpointId) -> Self {
        Self {
            endpoint_id,
            friendly_name: String::new(),
            group_ids: BTreeSet::new(),
            device_types: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = name.into();
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceTypeId) -> Self {
        self.device_types.push(device_type);
        self
    }
}

/// A node known to the datastore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub node_id: NodeId,
    pub friendly_name: String,
    pub commissioning_status: CommissioningStatus,
    pub endpoints: BTreeMap<EndpointId, EndpointEntry>,
    /// Set once RemoveNode has revoked the node's privileges; the entry is
    /// deleted when the last revocation commits
    pub removal_in_progress: bool,
}

impl NodeEntry {
    pub fn pending(node_id: NodeId) -> Self {
        Self {
            node_id,
            friendly_name: String::new(),
            commissioning_status: CommissioningStatus::Pending,
            endpoints: BTreeMap::new(),
            removal_in_progress: false,
        }
    }
}

/// Policy a node has applied, as confirmed by successful commits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePolicy {
    pub acl: Vec<AccessControlEntry>,
    pub arl: Vec<AccessRestrictionEntry>,
    pub group_keys: BTreeMap<GroupId, GroupKeySetEntry>,
    pub bindings: Vec<BindingEntry>,
}

impl NodePolicy {
    pub fn is_empty(&self) -> bool {
        self.acl.is_empty()
            && self.arl.is_empty()
            && self.group_keys.is_empty()
            && self.bindings.is_empty()
    }
}

/// Administrator of the joint fabric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminEntry {
    pub node_id: NodeId,
    pub friendly_name: String,
    pub is_anchor_root_ca: bool,
    pub is_anchor_fabric_admin: bool,
    /// Hex-encoded operational public key
    pub public_key: String,
}

impl AdminEntry {
    pub fn new(node_id: NodeId, friendly_name: impl Into<String>) -> Self {
        Self {
            node_id,
            friendly_name: friendly_name.into(),
            is_anchor_root_ca: false,
            is_anchor_fabric_admin: false,
            public_key: String::new(),
        }
    }

    /// Marks the entry as the anchor administrator (both flags)
    pub fn anchor(mut self) -> Self {
        self.is_anchor_root_ca = true;
        self.is_anchor_fabric_admin = true;
        self
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = public_key.into();
        self
    }

    pub fn is_anchor(&self) -> bool {
        self.is_anchor_root_ca && self.is_anchor_fabric_admin
    }

    /// Exactly one anchor flag set; never a valid entry
    pub fn has_partial_anchor_flags(&self) -> bool {
        self.is_anchor_root_ca != self.is_anchor_fabric_admin
    }
}

/// Changes to an admin entry; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminUpdate {
    pub friendly_name: Option<String>,
    pub public_key: Option<String>,
}

/// Whether a group or key set may be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    Active,
    PendingDeletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySecurityPolicy {
    TrustFirst,
    CacheAndSync,
}

/// Group key set descriptor
///
/// Epoch key material never passes through the datastore; only the
/// schedule does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKeySet {
    pub key_set_id: KeySetId,
    pub security_policy: KeySecurityPolicy,
    pub epoch_start_times: Vec<u64>,
    pub state: EntryState,
}

impl GroupKeySet {
    pub fn new(key_set_id: KeySetId) -> Self {
        Self {
            key_set_id,
            security_policy: KeySecurityPolicy::TrustFirst,
            epoch_start_times: vec![0],
            state: EntryState::Active,
        }
    }
}

/// Group known to the datastore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: GroupId,
    pub friendly_name: String,
    pub key_set_id: KeySetId,
    /// CAT whose holders are members of the group, at its committed version
    pub cat: Option<CaseAuthTag>,
    pub permission: Privilege,
    pub state: EntryState,
}

impl GroupInfo {
    pub fn new(group_id: GroupId, key_set_id: KeySetId) -> Self {
        Self {
            group_id,
            friendly_name: String::new(),
            key_set_id,
            cat: None,
            permission: Privilege::Operate,
            state: EntryState::Active,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = name.into();
        self
    }

    pub fn with_cat(mut self, cat: CaseAuthTag) -> Self {
        self.cat = Some(cat);
        self
    }
}

/// Changes to a group; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupUpdate {
    pub friendly_name: Option<String>,
    pub key_set_id: Option<KeySetId>,
    pub cat_version: Option<u16>,
}
