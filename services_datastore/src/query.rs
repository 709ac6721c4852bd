//! Read-only queries for audit and diagnostics
//!
//! Queries see committed state only, plus the pending record set. They
//! need no session and never block writers.

use crate::datastore::Datastore;
use crate::error::DatastoreError;
use core_types::NodeId;
use identity::SessionContext;
use lifecycle::{PendingRecord, RecordId};
use policy::{
    AccessControlEntry, AccessDecision, AccessDecisionEngine, AccessRequest,
    AccessRestrictionEntry, PolicyView,
};
use services_logger::AuditRecord;
use services_policy_store::{AdminEntry, GroupInfo, GroupKeySet, NodeEntry, NodePolicy, StoreError};

impl Datastore {
    pub fn node_entries(&self) -> Vec<NodeEntry> {
        self.store().snapshot().nodes.values().cloned().collect()
    }

    pub fn node_entry(&self, node: NodeId) -> Result<NodeEntry, DatastoreError> {
        self.store()
            .node_entry(node)
            .ok_or(StoreError::NodeNotFound(node).into())
    }

    /// What `node` has confirmed applying
    pub fn committed_policy(&self, node: NodeId) -> Result<NodePolicy, DatastoreError> {
        self.store()
            .get(node)
            .ok_or(StoreError::NodeNotFound(node).into())
    }

    pub fn acl_for(&self, node: NodeId) -> Result<Vec<AccessControlEntry>, DatastoreError> {
        Ok(self.committed_policy(node)?.acl)
    }

    pub fn arl_for(&self, node: NodeId) -> Result<Vec<AccessRestrictionEntry>, DatastoreError> {
        Ok(self.committed_policy(node)?.arl)
    }

    /// Records for `node` not yet committed, failed ones included
    pub fn pending_records(&self, node: NodeId) -> Vec<PendingRecord> {
        self.sync().pending_records(node)
    }

    pub fn all_pending_records(&self) -> Vec<PendingRecord> {
        self.tracker().all()
    }

    pub fn pending_record(&self, id: RecordId) -> Option<PendingRecord> {
        self.tracker().get(id)
    }

    pub fn admins(&self) -> Vec<AdminEntry> {
        self.store().snapshot().admins.clone()
    }

    pub fn groups(&self) -> Vec<GroupInfo> {
        self.store().snapshot().groups.values().cloned().collect()
    }

    pub fn key_sets(&self) -> Vec<GroupKeySet> {
        self.store().snapshot().key_sets.values().cloned().collect()
    }

    pub fn audit_events(&self) -> Vec<AuditRecord> {
        self.audit().events()
    }

    /// Decides `request` against the policy `node` has committed
    ///
    /// CAT entries are judged against the fleet's committed versions.
    pub fn decide_on_node(
        &self,
        node: NodeId,
        session: &SessionContext,
        request: &AccessRequest,
    ) -> Result<AccessDecision, DatastoreError> {
        let snapshot = self.store().snapshot();
        snapshot.node(node)?;
        let empty = NodePolicy::default();
        let applied = snapshot.policy(node).unwrap_or(&empty);
        let view = PolicyView::new(&applied.acl, &applied.arl, &snapshot.cat_versions);
        Ok(AccessDecisionEngine::new().decide(&view, session, request))
    }
}
