//! Node commissioning, metadata and removal

use crate::datastore::Datastore;
use crate::error::DatastoreError;
use core_types::{NodeId, SubjectId};
use datastore_sync::RefreshReport;
use identity::SessionContext;
use lifecycle::{CancellationReason, RecordIntent, RecordPayload, RecordState};
use policy::{AccessControlEntry, AccessRestrictionEntry};
use services_logger::AuditEvent;
use services_policy_store::{CommissioningStatus, EndpointEntry, NodeEntry};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// How far [`Datastore::remove_node`] got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Every peer revoked the node and the entry is gone
    Removed,
    /// Some peers still have to confirm revocation; the entry stays
    /// queryable until the periodic review finishes the removal
    RevocationPending,
}

impl Datastore {
    /// Creates a `Pending` entry for a node that is being commissioned
    pub fn add_pending_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        friendly_name: impl Into<String>,
    ) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        if !node.is_operational() {
            return Err(DatastoreError::InvalidNodeId(node));
        }
        let mut entry = NodeEntry::pending(node);
        entry.friendly_name = friendly_name.into();
        self.store().update(|draft| draft.insert_node(entry))?;
        self.audit().record(self.now(), AuditEvent::NodeAdded { node });
        info!(node = %node, "pending node added");
        Ok(())
    }

    /// Registers an endpoint discovered on the node
    pub fn add_endpoint_for_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        endpoint: EndpointEntry,
    ) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        self.active_node(node)?;
        let endpoint_id = endpoint.endpoint_id;
        let inserted = self.store().update(|draft| {
            let entry = draft.node_mut(node)?;
            if entry.endpoints.contains_key(&endpoint_id) {
                return Ok(false);
            }
            entry.endpoints.insert(endpoint_id, endpoint);
            Ok(true)
        })?;
        if !inserted {
            return Err(DatastoreError::DuplicateEndpoint {
                node,
                endpoint: endpoint_id,
            });
        }
        Ok(())
    }

    pub fn update_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        friendly_name: impl Into<String>,
    ) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        self.active_node(node)?;
        let friendly_name = friendly_name.into();
        self.store().update(|draft| {
            draft.node_mut(node)?.friendly_name = friendly_name;
            Ok(())
        })?;
        Ok(())
    }

    /// Reconciles every pending record of `node` now, ignoring backoff
    ///
    /// A `Pending` node becomes `Committed` once nothing is left to apply,
    /// or `CommitFailed` if any of its records failed.
    pub fn refresh_node(
        &self,
        session: &SessionContext,
        node: NodeId,
    ) -> Result<RefreshReport, DatastoreError> {
        self.authorize(session)?;
        let report = self.sync().refresh_node(node, self.now())?;
        self.settle_commissioning(node)?;
        Ok(report)
    }

    /// Records that finalizing commissioning failed on the node
    ///
    /// The commissioner is expected to follow up with [`remove_node`](Self::remove_node).
    pub fn mark_commissioning_failed(
        &self,
        session: &SessionContext,
        node: NodeId,
    ) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        let entry = self.active_node(node)?;
        if entry.commissioning_status == CommissioningStatus::CommitFailed {
            return Ok(());
        }
        self.store()
            .update(|draft| draft.set_commissioning_status(node, CommissioningStatus::CommitFailed))?;
        self.audit()
            .record(self.now(), AuditEvent::NodeCommitFailed { node });
        warn!(node = %node, "commissioning failed");
        Ok(())
    }

    fn settle_commissioning(&self, node: NodeId) -> Result<(), DatastoreError> {
        let entry = match self.store().node_entry(node) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        if entry.commissioning_status != CommissioningStatus::Pending || entry.removal_in_progress {
            return Ok(());
        }

        let records = self.tracker().records_for(node);
        let status = if records.iter().any(|r| r.state == RecordState::CommitFailed) {
            CommissioningStatus::CommitFailed
        } else if records.iter().all(|r| !r.is_unresolved()) {
            CommissioningStatus::Committed
        } else {
            return Ok(());
        };

        self.store()
            .update(|draft| draft.set_commissioning_status(node, status))?;
        let event = match status {
            CommissioningStatus::Committed => AuditEvent::NodeCommitted { node },
            _ => AuditEvent::NodeCommitFailed { node },
        };
        self.audit().record(self.now(), event);
        info!(node = %node, %status, "commissioning settled");
        Ok(())
    }

    /// Removes a node from the fabric
    ///
    /// Every peer first revokes entries that name the node; the entry is
    /// deleted only after all revocations commit. Until then the node stays
    /// queryable with `removal_in_progress` set and rejects new commands.
    pub fn remove_node(
        &self,
        session: &SessionContext,
        node: NodeId,
    ) -> Result<RemovalOutcome, DatastoreError> {
        self.authorize(session)?;
        let now = self.now();
        self.store().update(|draft| {
            draft.node_mut(node)?.removal_in_progress = true;
            Ok(())
        })?;
        self.sync()
            .cancel_node(node, CancellationReason::NodeRemoved, now);

        let (revocations, peers) = self.issue_revocations(node);
        self.audit()
            .record(now, AuditEvent::NodeRemovalStarted { node, revocations });
        info!(node = %node, revocations, peers = peers.len(), "node removal started");

        for peer in peers {
            self.sync().reconcile_once(peer, now);
        }

        if self.sync().finish_removal(node, now)? {
            Ok(RemovalOutcome::Removed)
        } else {
            warn!(node = %node, "revocations outstanding, removal deferred");
            Ok(RemovalOutcome::RevocationPending)
        }
    }

    /// Tracks a revocation on every peer holding or about to hold an entry
    /// that names `node`; returns the deletion count and the affected peers
    fn issue_revocations(&self, node: NodeId) -> (usize, BTreeSet<NodeId>) {
        let snapshot = self.store().snapshot();
        let mut targets: Vec<(NodeId, RecordPayload)> = Vec::new();
        for (&peer, policy) in &snapshot.policies {
            if peer == node {
                continue;
            }
            targets.extend(
                policy
                    .acl
                    .iter()
                    .filter(|ace| ace.references_node(node))
                    .map(|ace| (peer, RecordPayload::Acl(ace.clone()))),
            );
            targets.extend(
                policy
                    .arl
                    .iter()
                    .filter(|are| are.references_node(node))
                    .map(|are| (peer, RecordPayload::Arl(are.clone()))),
            );
            targets.extend(
                policy
                    .bindings
                    .iter()
                    .filter(|binding| binding.references_node(node))
                    .map(|binding| (peer, RecordPayload::Binding(*binding))),
            );
        }
        for record in self.tracker().all() {
            if record.node_id != node
                && record.intent == RecordIntent::Apply
                && record.payload.references_node(node)
                && !targets.iter().any(|(p, t)| *p == record.node_id && *t == record.payload)
            {
                targets.push((record.node_id, record.payload));
            }
        }

        let mut deletions = 0;
        let mut peers = BTreeSet::new();
        for (peer, payload) in targets {
            peers.insert(peer);
            match payload {
                RecordPayload::Acl(ace) => {
                    self.track(peer, RecordPayload::Acl(ace.clone()), RecordIntent::Delete);
                    deletions += 1;
                    if let Some(narrowed) = ace_without(&ace, node) {
                        self.track(peer, RecordPayload::Acl(narrowed), RecordIntent::Apply);
                    }
                }
                RecordPayload::Arl(are) => match are_without(&are, node) {
                    Some(narrowed) => {
                        self.track(peer, RecordPayload::Arl(narrowed), RecordIntent::Apply);
                    }
                    None => {
                        self.track(peer, RecordPayload::Arl(are), RecordIntent::Delete);
                        deletions += 1;
                    }
                },
                other => {
                    self.track(peer, other, RecordIntent::Delete);
                    deletions += 1;
                }
            }
        }
        (deletions, peers)
    }
}

/// The entry with `node` dropped from its subjects, if any subject remains
///
/// An entry whose only subject was `node` must go entirely: with no
/// subjects left it would match every caller.
fn ace_without(ace: &AccessControlEntry, node: NodeId) -> Option<AccessControlEntry> {
    let mut narrowed = ace.clone();
    narrowed.subjects.retain(|s| *s != SubjectId::Node(node));
    (!narrowed.subjects.is_empty()).then_some(narrowed)
}

fn are_without(are: &AccessRestrictionEntry, node: NodeId) -> Option<AccessRestrictionEntry> {
    let mut narrowed = are.clone();
    narrowed.subjects.retain(|s| *s != SubjectId::Node(node));
    (!narrowed.subjects.is_empty()).then_some(narrowed)
}
