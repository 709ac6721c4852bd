//! Committed datastore state and its write-time invariants

use crate::error::StoreError;
use crate::model::{
    AdminEntry, AdminUpdate, CommissioningStatus, EndpointEntry, EntryState, GroupInfo,
    GroupKeySet, GroupUpdate, NodeEntry, NodePolicy,
};
use core_types::{CaseAuthTag, EndpointId, GroupId, KeySetId, NodeId, IPK_KEY_SET_ID};
use lifecycle::{PendingRecord, RecordIntent, RecordPayload};
use policy::{validate_ace, validate_are, AccessControlEntry, CatVersionTable, PolicyView};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One consistent version of the committed datastore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub version: u64,
    pub nodes: BTreeMap<NodeId, NodeEntry>,
    pub policies: BTreeMap<NodeId, NodePolicy>,
    /// Anchor administrator, if any, is always first
    pub admins: Vec<AdminEntry>,
    pub key_sets: BTreeMap<KeySetId, GroupKeySet>,
    pub groups: BTreeMap<GroupId, GroupInfo>,
    pub cat_versions: CatVersionTable,
    /// ACL guarding the datastore's own administrative API
    pub datastore_acl: Vec<AccessControlEntry>,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicySnapshot {
    /// An empty datastore holding only the IPK key set
    pub fn new() -> Self {
        let mut key_sets = BTreeMap::new();
        key_sets.insert(IPK_KEY_SET_ID, GroupKeySet::new(IPK_KEY_SET_ID));
        Self {
            version: 0,
            nodes: BTreeMap::new(),
            policies: BTreeMap::new(),
            admins: Vec::new(),
            key_sets,
            groups: BTreeMap::new(),
            cat_versions: CatVersionTable::new(),
            datastore_acl: Vec::new(),
        }
    }

    /// Checks every invariant that must hold between writes
    pub fn validate(&self) -> Result<(), StoreError> {
        if !self.key_sets.contains_key(&IPK_KEY_SET_ID) {
            return Err(StoreError::IpkNotRemovable);
        }
        for (position, admin) in self.admins.iter().enumerate() {
            if admin.has_partial_anchor_flags() {
                return Err(StoreError::PartialAnchorFlags(admin.node_id));
            }
            if admin.is_anchor() && position != 0 {
                return Err(StoreError::AnchorNotFirst);
            }
        }
        let applied = self.policies.values().flat_map(|p| p.acl.iter());
        for ace in self.datastore_acl.iter().chain(applied) {
            validate_ace(ace)?;
        }
        for are in self.policies.values().flat_map(|p| p.arl.iter()) {
            validate_are(are)?;
        }
        Ok(())
    }

    // ========================================================================
    // Node entries
    // ========================================================================

    pub fn node(&self, node: NodeId) -> Result<&NodeEntry, StoreError> {
        self.nodes.get(&node).ok_or(StoreError::NodeNotFound(node))
    }

    pub fn node_mut(&mut self, node: NodeId) -> Result<&mut NodeEntry, StoreError> {
        self.nodes.get_mut(&node).ok_or(StoreError::NodeNotFound(node))
    }

    pub fn insert_node(&mut self, entry: NodeEntry) -> Result<(), StoreError> {
        if self.nodes.contains_key(&entry.node_id) {
            return Err(StoreError::DuplicateNode(entry.node_id));
        }
        self.nodes.insert(entry.node_id, entry);
        Ok(())
    }

    pub fn set_commissioning_status(
        &mut self,
        node: NodeId,
        status: CommissioningStatus,
    ) -> Result<(), StoreError> {
        self.node_mut(node)?.commissioning_status = status;
        Ok(())
    }

    /// Deletes a node entry together with its applied policy
    pub fn remove_node(&mut self, node: NodeId) -> Result<NodeEntry, StoreError> {
        let entry = self.nodes.remove(&node).ok_or(StoreError::NodeNotFound(node))?;
        self.policies.remove(&node);
        Ok(entry)
    }

    pub fn endpoint(&self, node: NodeId, endpoint: EndpointId) -> Result<&EndpointEntry, StoreError> {
        self.node(node)?
            .endpoints
            .get(&endpoint)
            .ok_or(StoreError::EndpointNotFound { node, endpoint })
    }

    pub fn endpoint_mut(
        &mut self,
        node: NodeId,
        endpoint: EndpointId,
    ) -> Result<&mut EndpointEntry, StoreError> {
        self.node_mut(node)?
            .endpoints
            .get_mut(&endpoint)
            .ok_or(StoreError::EndpointNotFound { node, endpoint })
    }

    // ========================================================================
    // Admin list
    // ========================================================================

    /// Adds an admin; an anchor goes to index 0 and must be the only one
    pub fn add_admin(&mut self, admin: AdminEntry) -> Result<(), StoreError> {
        if admin.has_partial_anchor_flags() {
            return Err(StoreError::PartialAnchorFlags(admin.node_id));
        }
        if self.admins.iter().any(|a| a.node_id == admin.node_id) {
            return Err(StoreError::DuplicateAdmin(admin.node_id));
        }
        if admin.is_anchor() {
            if let Some(existing) = self.anchor_admin() {
                return Err(StoreError::AnchorAdminExists(existing.node_id));
            }
            self.admins.insert(0, admin);
        } else {
            self.admins.push(admin);
        }
        Ok(())
    }

    pub fn update_admin(&mut self, node: NodeId, update: AdminUpdate) -> Result<(), StoreError> {
        let admin = self
            .admins
            .iter_mut()
            .find(|a| a.node_id == node)
            .ok_or(StoreError::AdminNotFound(node))?;
        if let Some(name) = update.friendly_name {
            admin.friendly_name = name;
        }
        if let Some(key) = update.public_key {
            admin.public_key = key;
        }
        Ok(())
    }

    pub fn remove_admin(&mut self, node: NodeId) -> Result<AdminEntry, StoreError> {
        let position = self
            .admins
            .iter()
            .position(|a| a.node_id == node)
            .ok_or(StoreError::AdminNotFound(node))?;
        Ok(self.admins.remove(position))
    }

    pub fn anchor_admin(&self) -> Option<&AdminEntry> {
        self.admins.first().filter(|a| a.is_anchor())
    }

    // ========================================================================
    // Key sets and groups
    // ========================================================================

    pub fn add_key_set(&mut self, key_set: GroupKeySet) -> Result<(), StoreError> {
        if self.key_sets.contains_key(&key_set.key_set_id) {
            return Err(StoreError::DuplicateKeySet(key_set.key_set_id));
        }
        self.key_sets.insert(key_set.key_set_id, key_set);
        Ok(())
    }

    pub fn mark_key_set_for_deletion(&mut self, id: KeySetId) -> Result<(), StoreError> {
        if id.is_ipk() {
            return Err(StoreError::IpkNotRemovable);
        }
        let key_set = self
            .key_sets
            .get_mut(&id)
            .ok_or(StoreError::KeySetNotFound(id))?;
        key_set.state = EntryState::PendingDeletion;
        Ok(())
    }

    /// Removes a key set that is unused or marked for deletion
    pub fn remove_key_set(&mut self, id: KeySetId) -> Result<GroupKeySet, StoreError> {
        if id.is_ipk() {
            return Err(StoreError::IpkNotRemovable);
        }
        let key_set = self.key_sets.get(&id).ok_or(StoreError::KeySetNotFound(id))?;
        if key_set.state != EntryState::PendingDeletion && self.key_set_in_use(id) {
            return Err(StoreError::KeySetInUse(id));
        }
        self.key_sets.remove(&id).ok_or(StoreError::KeySetNotFound(id))
    }

    pub fn key_set_in_use(&self, id: KeySetId) -> bool {
        self.groups.values().any(|g| g.key_set_id == id)
            || self
                .policies
                .values()
                .any(|p| p.group_keys.values().any(|k| k.key_set_id == id))
    }

    pub fn add_group(&mut self, group: GroupInfo) -> Result<(), StoreError> {
        if self.groups.contains_key(&group.group_id) {
            return Err(StoreError::DuplicateGroup(group.group_id));
        }
        if !self.key_sets.contains_key(&group.key_set_id) {
            return Err(StoreError::KeySetNotFound(group.key_set_id));
        }
        if let Some(cat) = group.cat {
            self.cat_versions.commit(cat)?;
        }
        self.groups.insert(group.group_id, group);
        Ok(())
    }

    pub fn group(&self, id: GroupId) -> Result<&GroupInfo, StoreError> {
        self.groups.get(&id).ok_or(StoreError::GroupNotFound(id))
    }

    /// Applies an update and returns the group as it was before
    ///
    /// A CAT version change is committed to the fleet version table here.
    pub fn update_group(&mut self, id: GroupId, update: GroupUpdate) -> Result<GroupInfo, StoreError> {
        if let Some(key_set_id) = update.key_set_id {
            if !self.key_sets.contains_key(&key_set_id) {
                return Err(StoreError::KeySetNotFound(key_set_id));
            }
        }
        let previous = self.group(id)?.clone();
        let mut updated = previous.clone();
        if let Some(name) = update.friendly_name {
            updated.friendly_name = name;
        }
        if let Some(key_set_id) = update.key_set_id {
            updated.key_set_id = key_set_id;
        }
        if let Some(version) = update.cat_version {
            let cat = previous
                .cat
                .map(|c| c.with_version(version))
                .ok_or(StoreError::GroupHasNoCat(id))?;
            self.cat_versions.commit(cat)?;
            updated.cat = Some(cat);
        }
        self.groups.insert(id, updated);
        Ok(previous)
    }

    pub fn mark_group_for_deletion(&mut self, id: GroupId) -> Result<(), StoreError> {
        self.groups
            .get_mut(&id)
            .ok_or(StoreError::GroupNotFound(id))?
            .state = EntryState::PendingDeletion;
        Ok(())
    }

    /// Removes a group that is unused or marked for deletion
    pub fn remove_group(&mut self, id: GroupId) -> Result<GroupInfo, StoreError> {
        let group = self.group(id)?;
        if group.state != EntryState::PendingDeletion && self.group_in_use(id) {
            return Err(StoreError::GroupInUse(id));
        }
        self.groups.remove(&id).ok_or(StoreError::GroupNotFound(id))
    }

    pub fn group_in_use(&self, id: GroupId) -> bool {
        !self.group_members(id).is_empty()
    }

    /// `(node, endpoint)` pairs with committed membership in `group`
    pub fn group_members(&self, id: GroupId) -> Vec<(NodeId, EndpointId)> {
        self.nodes
            .values()
            .flat_map(|n| {
                n.endpoints
                    .values()
                    .filter(move |e| e.group_ids.contains(&id))
                    .map(move |e| (n.node_id, e.endpoint_id))
            })
            .collect()
    }

    /// Commits a CAT version without a group update
    pub fn commit_cat_version(&mut self, cat: CaseAuthTag) -> Result<(), StoreError> {
        self.cat_versions.commit(cat).map_err(StoreError::from)
    }

    // ========================================================================
    // Applied node policy
    // ========================================================================

    pub fn policy(&self, node: NodeId) -> Option<&NodePolicy> {
        self.policies.get(&node)
    }

    /// Decision view over a node's applied policy
    pub fn view_for(&self, node: NodeId) -> Option<PolicyView<'_>> {
        self.policies
            .get(&node)
            .map(|p| PolicyView::new(&p.acl, &p.arl, &self.cat_versions))
    }

    /// Decision view over the datastore's own ACL
    pub fn datastore_view(&self) -> PolicyView<'_> {
        PolicyView::new(&self.datastore_acl, &[], &self.cat_versions)
    }

    /// Folds a successfully applied record into the node's committed view
    pub fn apply_committed(&mut self, record: &PendingRecord) -> Result<(), StoreError> {
        let node = record.node_id;
        self.node(node)?;
        let delete = record.intent == RecordIntent::Delete;

        if let RecordPayload::GroupMembership { endpoint, group } = &record.payload {
            let entry = self.endpoint_mut(node, *endpoint)?;
            if delete {
                entry.group_ids.remove(group);
            } else {
                entry.group_ids.insert(*group);
            }
            return Ok(());
        }

        let applied = self.policies.entry(node).or_default();
        match &record.payload {
            RecordPayload::Acl(ace) => {
                applied.acl.retain(|existing| existing != ace);
                if !delete {
                    validate_ace(ace)?;
                    applied.acl.push(ace.clone());
                }
            }
            RecordPayload::Arl(are) => {
                applied.arl.retain(|existing| existing.entry_id != are.entry_id);
                if !delete {
                    validate_are(are)?;
                    applied.arl.push(are.clone());
                }
            }
            RecordPayload::GroupKeySet(entry) => {
                if delete {
                    applied.group_keys.remove(&entry.group_id);
                } else {
                    applied.group_keys.insert(entry.group_id, entry.activated());
                }
            }
            RecordPayload::Binding(binding) => {
                applied.bindings.retain(|existing| existing != binding);
                if !delete {
                    applied.bindings.push(*binding);
                }
            }
            RecordPayload::GroupMembership { .. } => {}
        }
        Ok(())
    }
}
