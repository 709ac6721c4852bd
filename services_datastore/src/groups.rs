//! Groups and group key sets
//!
//! Key set and group changes are committed to the store at once; the
//! per-node consequences (key set mappings, memberships, redistributed
//! CAT entries) are tracked as pending records like any other command.

use crate::datastore::Datastore;
use crate::error::DatastoreError;
use core_types::{CaseAuthTag, GroupId, KeySetId, NodeId, SubjectId};
use identity::SessionContext;
use lifecycle::{GroupKeySetEntry, RecordId, RecordIntent, RecordPayload};
use policy::AccessControlEntry;
use services_logger::AuditEvent;
use services_policy_store::{GroupInfo, GroupKeySet, GroupUpdate};
use std::collections::BTreeSet;
use tracing::info;

impl Datastore {
    // ========================================================================
    // Key sets
    // ========================================================================

    pub fn add_key_set(
        &self,
        session: &SessionContext,
        key_set: GroupKeySet,
    ) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        let key_set_id = key_set.key_set_id;
        self.store().update(|draft| draft.add_key_set(key_set))?;
        self.audit()
            .record(self.now(), AuditEvent::KeySetAdded { key_set: key_set_id });
        Ok(())
    }

    pub fn mark_key_set_for_deletion(
        &self,
        session: &SessionContext,
        key_set_id: KeySetId,
    ) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        self.store()
            .update(|draft| draft.mark_key_set_for_deletion(key_set_id))?;
        info!(%key_set_id, "key set marked for deletion");
        Ok(())
    }

    /// Removes a key set; the IPK never goes
    pub fn remove_key_set(
        &self,
        session: &SessionContext,
        key_set_id: KeySetId,
    ) -> Result<GroupKeySet, DatastoreError> {
        self.authorize(session)?;
        let removed = self.store().update(|draft| draft.remove_key_set(key_set_id))?;
        self.audit()
            .record(self.now(), AuditEvent::KeySetRemoved { key_set: key_set_id });
        Ok(removed)
    }

    // ========================================================================
    // Groups
    // ========================================================================

    pub fn add_group(&self, session: &SessionContext, group: GroupInfo) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        let group_id = group.group_id;
        let cat = group.cat;
        self.store().update(|draft| draft.add_group(group))?;

        let now = self.now();
        self.audit().record(now, AuditEvent::GroupAdded { group: group_id });
        if let Some(cat) = cat {
            self.audit().record(
                now,
                AuditEvent::CatVersionCommitted {
                    identifier: cat.identifier,
                    version: cat.version,
                },
            );
        }
        Ok(())
    }

    /// Updates a group and schedules what its members need to follow
    ///
    /// A new key set is pushed to every member node as a pending mapping.
    /// A new CAT version is committed fleet-wide and every entry naming an
    /// older version is replaced by one naming the new version.
    pub fn update_group(
        &self,
        session: &SessionContext,
        group_id: GroupId,
        update: GroupUpdate,
    ) -> Result<Vec<RecordId>, DatastoreError> {
        self.authorize(session)?;
        let previous = self.store().update(|draft| draft.update_group(group_id, update))?;
        let current = self.store().snapshot().group(group_id)?.clone();
        let now = self.now();
        let mut records = Vec::new();

        if current.key_set_id != previous.key_set_id {
            let keys = GroupKeySetEntry::pending(group_id, current.key_set_id);
            for node in self.member_nodes(group_id) {
                records.push(self.track(node, RecordPayload::GroupKeySet(keys), RecordIntent::Apply));
            }
        }

        if let (Some(old), Some(new)) = (previous.cat, current.cat) {
            if new.version != old.version {
                self.audit().record(
                    now,
                    AuditEvent::CatVersionCommitted {
                        identifier: new.identifier,
                        version: new.version,
                    },
                );
                records.extend(self.redistribute_cat(new));
            }
        }

        self.audit().record(now, AuditEvent::GroupUpdated { group: group_id });
        info!(group = %group_id, records = records.len(), "group updated");
        Ok(records)
    }

    /// Marks a group for deletion and withdraws it from every member
    pub fn mark_group_for_deletion(
        &self,
        session: &SessionContext,
        group_id: GroupId,
    ) -> Result<Vec<RecordId>, DatastoreError> {
        self.authorize(session)?;
        self.store()
            .update(|draft| draft.mark_group_for_deletion(group_id))?;

        let snapshot = self.store().snapshot();
        let mut memberships: BTreeSet<_> = snapshot
            .group_members(group_id)
            .into_iter()
            .filter(|(node, _)| !self.is_removing(*node))
            .collect();
        for record in self.tracker().all() {
            if let RecordPayload::GroupMembership { endpoint, group } = record.payload {
                if group == group_id && record.intent == RecordIntent::Apply && record.is_unresolved() {
                    memberships.insert((record.node_id, endpoint));
                }
            }
        }

        let mut records = Vec::new();
        for &(node, endpoint) in &memberships {
            let membership = RecordPayload::GroupMembership {
                endpoint,
                group: group_id,
            };
            records.push(self.track(node, membership, RecordIntent::Delete));
        }
        let nodes: BTreeSet<NodeId> = memberships.iter().map(|(node, _)| *node).collect();
        for node in nodes {
            if let Some(keys) = self.group_keys_on(node, group_id) {
                records.push(self.track(node, RecordPayload::GroupKeySet(keys), RecordIntent::Delete));
            }
        }

        self.audit()
            .record(self.now(), AuditEvent::GroupUpdated { group: group_id });
        info!(group = %group_id, records = records.len(), "group marked for deletion");
        Ok(records)
    }

    pub fn remove_group(
        &self,
        session: &SessionContext,
        group_id: GroupId,
    ) -> Result<GroupInfo, DatastoreError> {
        self.authorize(session)?;
        let removed = self.store().update(|draft| draft.remove_group(group_id))?;
        self.audit()
            .record(self.now(), AuditEvent::GroupRemoved { group: group_id });
        Ok(removed)
    }

    /// Nodes with a committed or pending membership in `group`
    fn member_nodes(&self, group: GroupId) -> BTreeSet<NodeId> {
        let mut nodes: BTreeSet<NodeId> = self
            .store()
            .snapshot()
            .group_members(group)
            .into_iter()
            .map(|(node, _)| node)
            .collect();
        nodes.extend(self.tracker().all().into_iter().filter_map(|r| match r.payload {
            RecordPayload::GroupMembership { group: g, .. }
                if g == group && r.intent == RecordIntent::Apply && r.is_unresolved() =>
            {
                Some(r.node_id)
            }
            _ => None,
        }));
        nodes.retain(|node| !self.is_removing(*node));
        nodes
    }

    /// Replaces every entry naming an older version of `cat`
    ///
    /// The replacement is tracked before the deletion of the old entry.
    fn redistribute_cat(&self, cat: CaseAuthTag) -> Vec<RecordId> {
        let snapshot = self.store().snapshot();
        let mut stale: Vec<(NodeId, AccessControlEntry)> = Vec::new();
        for (&node, policy) in &snapshot.policies {
            stale.extend(
                policy
                    .acl
                    .iter()
                    .filter(|ace| names_older(ace, &cat))
                    .map(|ace| (node, ace.clone())),
            );
        }
        for record in self.tracker().all() {
            if let RecordPayload::Acl(ace) = &record.payload {
                if record.intent == RecordIntent::Apply
                    && record.is_unresolved()
                    && names_older(ace, &cat)
                    && !stale.iter().any(|(n, a)| *n == record.node_id && a == ace)
                {
                    stale.push((record.node_id, ace.clone()));
                }
            }
        }

        let mut records = Vec::new();
        for (node, ace) in stale {
            if self.is_removing(node) {
                continue;
            }
            let replacement = with_cat_version(&ace, &cat);
            records.push(self.track(node, RecordPayload::Acl(replacement), RecordIntent::Apply));
            records.push(self.track(node, RecordPayload::Acl(ace), RecordIntent::Delete));
        }
        records
    }

    fn is_removing(&self, node: NodeId) -> bool {
        self.store()
            .node_entry(node)
            .map_or(true, |entry| entry.removal_in_progress)
    }
}

fn names_older(ace: &AccessControlEntry, cat: &CaseAuthTag) -> bool {
    ace.subjects.iter().filter_map(SubjectId::as_cat).any(|held| {
        held.identifier == cat.identifier && held.version < cat.version
    })
}

fn with_cat_version(ace: &AccessControlEntry, cat: &CaseAuthTag) -> AccessControlEntry {
    let mut replacement = ace.clone();
    replacement.subjects.clear();
    for subject in &ace.subjects {
        let subject = match subject {
            SubjectId::Cat(held) if held.identifier == cat.identifier => SubjectId::Cat(*cat),
            other => *other,
        };
        if !replacement.subjects.contains(&subject) {
            replacement.subjects.push(subject);
        }
    }
    replacement
}
