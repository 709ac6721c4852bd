//! Endpoint metadata and group membership

use crate::datastore::Datastore;
use crate::error::DatastoreError;
use core_types::{EndpointId, GroupId, KeySetId, NodeId};
use identity::SessionContext;
use lifecycle::{GroupKeySetEntry, RecordId, RecordIntent, RecordPayload};
use services_policy_store::{EntryState, StoreError};
use tracing::debug;

impl Datastore {
    pub fn update_endpoint_for_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        endpoint: EndpointId,
        friendly_name: impl Into<String>,
    ) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        self.active_node(node)?;
        let friendly_name = friendly_name.into();
        self.store().update(|draft| {
            draft.endpoint_mut(node, endpoint)?.friendly_name = friendly_name;
            Ok(())
        })?;
        Ok(())
    }

    /// Adds `endpoint` on `node` to `group`
    ///
    /// The node also receives the group's key set mapping if it does not
    /// hold it yet; that record is tracked first so keys land before the
    /// membership.
    pub fn add_group_id_to_endpoint_for_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        endpoint: EndpointId,
        group: GroupId,
    ) -> Result<Vec<RecordId>, DatastoreError> {
        self.authorize(session)?;
        self.active_endpoint(node, endpoint)?;
        let info = self.store().snapshot().group(group)?.clone();
        if info.state != EntryState::Active {
            return Err(DatastoreError::PendingDeletion);
        }

        let mut records = Vec::new();
        let keys = RecordPayload::GroupKeySet(GroupKeySetEntry::pending(group, info.key_set_id));
        if !self.is_applied(node, &keys) && !self.has_pending_keys(node, group, info.key_set_id) {
            records.push(self.track(node, keys, RecordIntent::Apply));
        }
        let membership = RecordPayload::GroupMembership { endpoint, group };
        if !self.is_applied(node, &membership) {
            records.push(self.track(node, membership, RecordIntent::Apply));
        }
        debug!(node = %node, %endpoint, %group, records = records.len(), "group membership scheduled");
        Ok(records)
    }

    /// Removes `endpoint` on `node` from `group`
    ///
    /// When no other endpoint of the node stays in the group, the node's
    /// key set mapping for it is removed too.
    pub fn remove_group_id_from_endpoint_for_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        endpoint: EndpointId,
        group: GroupId,
    ) -> Result<Vec<RecordId>, DatastoreError> {
        self.authorize(session)?;
        let entry = self.active_node(node)?;
        let target = entry
            .endpoints
            .get(&endpoint)
            .ok_or(StoreError::EndpointNotFound { node, endpoint })?;

        let membership = RecordPayload::GroupMembership { endpoint, group };
        if !target.group_ids.contains(&group)
            && !self.has_pending(node, &membership, RecordIntent::Apply)
        {
            return Err(DatastoreError::EntryNotFound(node));
        }

        let mut records = vec![self.track(node, membership, RecordIntent::Delete)];
        let still_member = entry
            .endpoints
            .values()
            .filter(|e| e.endpoint_id != endpoint)
            .any(|e| {
                let other = RecordPayload::GroupMembership {
                    endpoint: e.endpoint_id,
                    group,
                };
                self.is_applied(node, &other) || self.has_pending(node, &other, RecordIntent::Apply)
            });
        if !still_member {
            if let Some(keys) = self.group_keys_on(node, group) {
                records.push(self.track(node, RecordPayload::GroupKeySet(keys), RecordIntent::Delete));
            }
        }
        Ok(records)
    }

    /// The key set mapping `node` holds or is about to hold for `group`
    pub(crate) fn group_keys_on(&self, node: NodeId, group: GroupId) -> Option<GroupKeySetEntry> {
        let committed = self
            .store()
            .snapshot()
            .policy(node)
            .and_then(|p| p.group_keys.get(&group).copied());
        committed.or_else(|| {
            self.tracker()
                .unresolved_for(node, None)
                .into_iter()
                .filter(|r| r.intent == RecordIntent::Apply)
                .find_map(|r| match r.payload {
                    RecordPayload::GroupKeySet(entry) if entry.group_id == group => Some(entry),
                    _ => None,
                })
        })
    }

    fn has_pending_keys(&self, node: NodeId, group: GroupId, key_set: KeySetId) -> bool {
        self.tracker().has_unresolved(node, |r| {
            r.intent == RecordIntent::Apply
                && matches!(
                    r.payload,
                    RecordPayload::GroupKeySet(entry)
                        if entry.group_id == group && entry.key_set_id == key_set
                )
        })
    }
}
