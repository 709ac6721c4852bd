//! Per-node reconciliation

use crate::error::SyncError;
use crate::events::{RefreshReport, ReviewReport, SettleEvent, SettleKind};
use core_types::{Instant, NodeId, Status};
use lifecycle::{
    CancellationReason, CancellationSource, FailureOutcome, LifecycleTracker, PendingRecord,
    RetryPolicy, SettleOutcome, Timeout, TrackerError,
};
use node_transport::NodeTransport;
use parking_lot::Mutex;
use services_logger::{AuditEvent, AuditTrail};
use services_policy_store::{PolicyStore, StoreError};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Retry schedule and per-call timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    pub apply_timeout: Timeout,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            apply_timeout: Timeout::from_millis(5000),
        }
    }
}

/// Mutual exclusion and cancellation for one node
#[derive(Debug, Default)]
struct NodeLane {
    pass: Mutex<()>,
    cancel: Mutex<CancellationSource>,
}

/// Drives pending records to their nodes
pub struct SyncEngine {
    store: Arc<PolicyStore>,
    tracker: Arc<LifecycleTracker>,
    transport: Arc<dyn NodeTransport>,
    audit: Arc<AuditTrail>,
    config: SyncConfig,
    lanes: Mutex<HashMap<NodeId, Arc<NodeLane>>>,
    subscribers: Mutex<Vec<Sender<SettleEvent>>>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("lanes", &self.lanes.lock().len())
            .field("pending", &self.tracker.len())
            .finish()
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<PolicyStore>,
        tracker: Arc<LifecycleTracker>,
        transport: Arc<dyn NodeTransport>,
        audit: Arc<AuditTrail>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            transport,
            audit,
            config,
            lanes: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Receives every settle event from now on
    pub fn subscribe(&self) -> Receiver<SettleEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Every tracked record for `node`, including failed ones
    pub fn pending_records(&self, node: NodeId) -> Vec<PendingRecord> {
        self.tracker.records_for(node)
    }

    /// Forces reconciliation of every unresolved record of `node`
    ///
    /// Backoff is ignored. Transient failures are retried until they
    /// settle or exhaust the retry policy, so on return each record the
    /// node had is either resolved or `CommitFailed`.
    pub fn refresh_node(&self, node: NodeId, now: Instant) -> Result<RefreshReport, SyncError> {
        if self.store.node_entry(node).is_none() {
            return Err(SyncError::NodeNotFound(node));
        }
        let mut report = RefreshReport::for_node(node);
        for _ in 0..=self.config.retry.max_retries {
            let pass = self.run_pass(node, now, None);
            let again = !pass.retrying.is_empty() && !pass.cancelled;
            report.absorb(pass);
            if !again {
                break;
            }
        }
        info!(
            node = %node,
            settled = report.settled(),
            failed = report.failed.len(),
            "refreshed node"
        );
        Ok(report)
    }

    /// One pass over every unresolved record of `node`, ignoring backoff
    pub fn reconcile_once(&self, node: NodeId, now: Instant) -> RefreshReport {
        self.run_pass(node, now, None)
    }

    /// Attempts every due record across the fleet, one worker per node
    ///
    /// Also completes node removals whose revocations have all committed.
    pub fn periodic_review(&self, now: Instant) -> Result<ReviewReport, SyncError> {
        let due = self.tracker.due_nodes(now);
        let passes = thread::scope(|scope| {
            let workers: Vec<_> = due
                .iter()
                .map(|&node| scope.spawn(move || self.run_pass(node, now, Some(now))))
                .collect();
            workers
                .into_iter()
                .map(|worker| match worker.join() {
                    Ok(report) => report,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect::<Vec<_>>()
        });

        let mut report = ReviewReport {
            passes,
            removed_nodes: Vec::new(),
        };
        let removing: Vec<NodeId> = self
            .store
            .snapshot()
            .nodes
            .values()
            .filter(|n| n.removal_in_progress)
            .map(|n| n.node_id)
            .collect();
        for node in removing {
            if self.finish_removal(node, now)? {
                report.removed_nodes.push(node);
            }
        }
        debug!(
            nodes = due.len(),
            settled = report.settled(),
            failed = report.failed(),
            "periodic review complete"
        );
        Ok(report)
    }

    /// Returns true while any peer still has to revoke an entry referencing `node`
    ///
    /// A failed revocation counts as outstanding: the peer may still grant
    /// the node privilege.
    pub fn revocations_outstanding(&self, node: NodeId) -> bool {
        self.tracker
            .all()
            .iter()
            .any(|r| r.node_id != node && r.is_deletion() && r.payload.references_node(node))
    }

    /// Deletes the entry of a node under removal once nothing references it
    pub fn finish_removal(&self, node: NodeId, now: Instant) -> Result<bool, SyncError> {
        let removing = self
            .store
            .node_entry(node)
            .map_or(false, |entry| entry.removal_in_progress);
        if !removing || self.revocations_outstanding(node) {
            return Ok(false);
        }

        self.store.update(|draft| draft.remove_node(node))?;
        self.lanes.lock().remove(&node);
        self.audit.record(now, AuditEvent::NodeRemoved { node });
        info!(node = %node, "node entry deleted");
        Ok(true)
    }

    /// Stops reconciliation of `node` and drops its records
    ///
    /// A pass in flight observes the cancellation before its next apply or
    /// fold and stops without committing anything further.
    pub fn cancel_node(&self, node: NodeId, reason: CancellationReason, now: Instant) -> usize {
        let lane = self.lane(node);
        {
            let mut source = lane.cancel.lock();
            source.cancel(reason.clone());
            *source = CancellationSource::new();
        }
        let dropped = self.tracker.cancel_node(node).len();
        self.audit
            .record(now, AuditEvent::ReconciliationCancelled { node, dropped });
        debug!(node = %node, %reason, dropped, "reconciliation cancelled");
        dropped
    }

    fn lane(&self, node: NodeId) -> Arc<NodeLane> {
        Arc::clone(self.lanes.lock().entry(node).or_default())
    }

    fn run_pass(&self, node: NodeId, now: Instant, due_at: Option<Instant>) -> RefreshReport {
        let lane = self.lane(node);
        let _pass = lane.pass.lock();
        let token = lane.cancel.lock().token();
        let mut report = RefreshReport::for_node(node);

        for listed in self.tracker.unresolved_for(node, due_at) {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            // Superseded or dropped since the listing
            let record = match self.tracker.get(listed.id) {
                Some(record) if record.is_unresolved() => record,
                _ => continue,
            };

            match self.transport.apply(node, &record, self.config.apply_timeout) {
                Ok(()) => {
                    if token.is_cancelled() {
                        report.cancelled = true;
                        break;
                    }
                    self.settle(&record, now, &mut report);
                }
                Err(err) => {
                    debug!(node = %node, record = %record.id, error = %err, "apply failed");
                    self.fail(&record, err.status(), now, &mut report);
                }
            }
        }

        if report.cancelled {
            warn!(node = %node, "reconciliation pass aborted");
        }
        report
    }

    fn settle(&self, record: &PendingRecord, now: Instant, report: &mut RefreshReport) {
        let (record, outcome) = match self.tracker.settle(record.id) {
            Ok(settled) => settled,
            Err(TrackerError::NotFound(_)) => return,
            Err(err) => {
                warn!(record = %record.id, error = %err, "could not settle record");
                return;
            }
        };
        self.fold(&record);

        let node = record.node_id;
        let kind = record.record_type();
        let (event, settled) = match outcome {
            SettleOutcome::Committed => {
                report.committed.push(record.id);
                (
                    AuditEvent::RecordCommitted {
                        node,
                        record: record.id,
                        kind,
                    },
                    SettleKind::Committed,
                )
            }
            SettleOutcome::Removed => {
                report.removed.push(record.id);
                (
                    AuditEvent::RecordRemoved {
                        node,
                        record: record.id,
                        kind,
                    },
                    SettleKind::Removed,
                )
            }
        };
        self.audit.record(now, event);
        if record.is_deletion() {
            self.audit_revocations(&record, now);
        }
        self.emit(SettleEvent {
            node,
            record: record.id,
            kind,
            outcome: settled,
        });
    }

    /// Folds a settled record into the committed view
    ///
    /// Records for a node under removal only fold if they delete.
    fn fold(&self, record: &PendingRecord) {
        let result = self.store.update(|draft| {
            match draft.node(record.node_id) {
                Ok(entry) if entry.removal_in_progress && !record.is_deletion() => return Ok(()),
                Ok(_) => {}
                Err(StoreError::NodeNotFound(_)) => return Ok(()),
                Err(err) => return Err(err),
            }
            draft.apply_committed(record)
        });
        if let Err(err) = result {
            error!(node = %record.node_id, record = %record.id, error = %err, "failed to fold record");
        }
    }

    fn audit_revocations(&self, record: &PendingRecord, now: Instant) {
        let snapshot = self.store.snapshot();
        for removed in snapshot
            .nodes
            .values()
            .filter(|n| n.removal_in_progress && record.payload.references_node(n.node_id))
        {
            self.audit.record(
                now,
                AuditEvent::PrivilegeRevoked {
                    node: record.node_id,
                    subject: removed.node_id,
                    kind: record.record_type(),
                },
            );
        }
    }

    fn fail(&self, record: &PendingRecord, status: Status, now: Instant, report: &mut RefreshReport) {
        let node = record.node_id;
        let outcome = match self
            .tracker
            .record_failure(record.id, status, now, &self.config.retry)
        {
            Ok(outcome) => outcome,
            Err(_) => return,
        };
        let attempt = record.retry_count + 1;
        let settled = match outcome {
            FailureOutcome::Retrying { next_attempt } => {
                report.retrying.push(record.id);
                self.audit.record(
                    now,
                    AuditEvent::RetryScheduled {
                        node,
                        record: record.id,
                        attempt,
                        next_attempt,
                    },
                );
                SettleKind::Retrying { next_attempt }
            }
            FailureOutcome::Failed => {
                report.failed.push(record.id);
                self.audit.record(
                    now,
                    AuditEvent::RecordCommitFailed {
                        node,
                        record: record.id,
                        kind: record.record_type(),
                        status,
                        retries: attempt,
                    },
                );
                SettleKind::Failed { status }
            }
        };
        self.emit(SettleEvent {
            node,
            record: record.id,
            kind: record.record_type(),
            outcome: settled,
        });
    }

    fn emit(&self, event: SettleEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Duration, FabricIndex};
    use identity::AuthMode;
    use lifecycle::{RecordIntent, RecordPayload, RecordState};
    use node_transport::{FaultPlan, NodeFault, SimulatedFleet};
    use policy::{AccessControlEntry, Privilege};
    use services_policy_store::NodeEntry;

    const NODE: NodeId = NodeId::new(0x10);
    const PEER: NodeId = NodeId::new(0x20);

    struct Harness {
        fleet: Arc<SimulatedFleet>,
        store: Arc<PolicyStore>,
        tracker: Arc<LifecycleTracker>,
        audit: Arc<AuditTrail>,
        engine: Arc<SyncEngine>,
    }

    fn harness() -> Harness {
        let fleet = Arc::new(SimulatedFleet::new());
        let store = Arc::new(PolicyStore::new());
        let tracker = Arc::new(LifecycleTracker::new());
        let audit = Arc::new(AuditTrail::new());
        for node in [NODE, PEER] {
            fleet.add_node(node);
            store
                .update(|draft| draft.insert_node(NodeEntry::pending(node)))
                .unwrap();
        }
        let config = SyncConfig {
            retry: RetryPolicy::new(3, Duration::from_millis(1000), Duration::from_millis(10_000)),
            apply_timeout: Timeout::from_millis(1000),
        };
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            fleet.clone(),
            Arc::clone(&audit),
            config,
        ));
        Harness {
            fleet,
            store,
            tracker,
            audit,
            engine,
        }
    }

    fn grant(subject: NodeId) -> RecordPayload {
        RecordPayload::Acl(
            AccessControlEntry::new(FabricIndex::new(1), Privilege::Operate, AuthMode::Case)
                .with_subject(subject),
        )
    }

    #[test]
    fn test_refresh_commits_and_folds() {
        let h = harness();
        h.tracker.track(NODE, grant(PEER), RecordIntent::Apply, Instant::ZERO);

        let report = h.engine.refresh_node(NODE, Instant::ZERO).unwrap();
        assert_eq!(report.committed.len(), 1);
        assert!(report.is_converged());
        assert!(h.tracker.is_empty());
        assert_eq!(h.store.get(NODE).unwrap().acl.len(), 1);
        assert_eq!(h.fleet.state(NODE).unwrap().acl.len(), 1);
        assert!(h
            .audit
            .has_event(|e| matches!(e, AuditEvent::RecordCommitted { node, .. } if *node == NODE)));
    }

    #[test]
    fn test_refresh_unknown_node() {
        let h = harness();
        let err = h
            .engine
            .refresh_node(NodeId::new(0x99), Instant::ZERO)
            .unwrap_err();
        assert_eq!(err.status(), Status::NotFound);
    }

    #[test]
    fn test_refresh_without_records_is_noop() {
        let h = harness();
        let report = h.engine.refresh_node(NODE, Instant::ZERO).unwrap();
        assert!(report.is_noop());
        assert_eq!(h.fleet.attempts(NODE), 0);
    }

    #[test]
    fn test_review_respects_backoff() {
        let h = harness();
        h.fleet
            .set_fault_plan(
                NODE,
                FaultPlan::new().with_fault(NodeFault::FailNext {
                    count: 1,
                    status: Status::Busy,
                }),
            )
            .unwrap();
        let id = h.tracker.track(NODE, grant(PEER), RecordIntent::Apply, Instant::ZERO);

        let first = h.engine.periodic_review(Instant::ZERO).unwrap();
        assert_eq!(first.passes[0].retrying, vec![id]);

        let early = h.engine.periodic_review(Instant::from_millis(500)).unwrap();
        assert!(early.passes.is_empty());

        let later = h.engine.periodic_review(Instant::from_millis(1000)).unwrap();
        assert_eq!(later.settled(), 1);
        assert!(h.tracker.is_empty());
        assert!(h
            .audit
            .has_event(|e| matches!(e, AuditEvent::RetryScheduled { attempt: 1, .. })));
    }

    #[test]
    fn test_structural_rejection_fails_without_retry() {
        let h = harness();
        h.fleet
            .set_fault_plan(
                NODE,
                FaultPlan::new().with_fault(NodeFault::RejectType {
                    record_type: lifecycle::RecordType::Acl,
                    status: Status::ConstraintError,
                }),
            )
            .unwrap();
        let id = h.tracker.track(NODE, grant(PEER), RecordIntent::Apply, Instant::ZERO);

        let report = h.engine.refresh_node(NODE, Instant::ZERO).unwrap();
        assert_eq!(report.failed, vec![id]);
        assert_eq!(h.fleet.attempts(NODE), 1);
        assert_eq!(h.tracker.get(id).unwrap().state, RecordState::CommitFailed);
        assert!(h.store.get(NODE).unwrap().acl.is_empty());
        assert!(h.audit.has_event(|e| matches!(
            e,
            AuditEvent::RecordCommitFailed {
                status: Status::ConstraintError,
                ..
            }
        )));
    }

    #[test]
    fn test_refresh_exhausts_transient_failures() {
        let h = harness();
        h.fleet
            .set_fault_plan(NODE, FaultPlan::new().with_fault(NodeFault::Unreachable))
            .unwrap();
        let id = h.tracker.track(NODE, grant(PEER), RecordIntent::Apply, Instant::ZERO);

        let report = h.engine.refresh_node(NODE, Instant::ZERO).unwrap();
        assert_eq!(report.failed, vec![id]);
        assert!(report.retrying.is_empty());
        let record = h.tracker.get(id).unwrap();
        assert_eq!(record.state, RecordState::CommitFailed);
        assert_eq!(record.retry_count, 3);
    }

    #[test]
    fn test_timeout_is_transient() {
        let h = harness();
        h.fleet
            .set_fault_plan(
                NODE,
                FaultPlan::new().with_fault(NodeFault::Delay {
                    duration: Duration::from_millis(5000),
                }),
            )
            .unwrap();
        let id = h.tracker.track(NODE, grant(PEER), RecordIntent::Apply, Instant::ZERO);
        let report = h.engine.reconcile_once(NODE, Instant::ZERO);
        assert_eq!(report.retrying, vec![id]);
        assert_eq!(h.tracker.get(id).unwrap().last_status, Some(Status::Timeout));
    }

    #[test]
    fn test_cancel_during_apply_discards_result() {
        let h = harness();
        let engine = Arc::downgrade(&h.engine);
        h.fleet.set_apply_hook(Arc::new(move |node, _| {
            if let Some(engine) = engine.upgrade() {
                engine.cancel_node(node, CancellationReason::NodeRemoved, Instant::ZERO);
            }
        }));
        h.tracker.track(NODE, grant(PEER), RecordIntent::Apply, Instant::ZERO);
        h.tracker
            .track(NODE, grant(NodeId::new(0x30)), RecordIntent::Apply, Instant::ZERO);

        let report = h.engine.reconcile_once(NODE, Instant::ZERO);
        assert!(report.cancelled);
        assert_eq!(h.fleet.attempts(NODE), 1);
        assert!(h.tracker.is_empty());
        assert!(h.store.get(NODE).unwrap().acl.is_empty());
        assert!(h
            .audit
            .has_event(|e| matches!(e, AuditEvent::ReconciliationCancelled { dropped: 2, .. })));
    }

    #[test]
    fn test_settle_events_broadcast() {
        let h = harness();
        let events = h.engine.subscribe();
        let id = h.tracker.track(NODE, grant(PEER), RecordIntent::Apply, Instant::ZERO);
        h.engine.refresh_node(NODE, Instant::ZERO).unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.record, id);
        assert_eq!(event.outcome, SettleKind::Committed);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_finish_removal_waits_for_revocation() {
        let h = harness();
        h.store
            .update(|draft| {
                draft.node_mut(PEER)?.removal_in_progress = true;
                Ok(())
            })
            .unwrap();
        h.fleet
            .set_fault_plan(
                NODE,
                FaultPlan::new().with_fault(NodeFault::FailNext {
                    count: 1,
                    status: Status::Busy,
                }),
            )
            .unwrap();
        h.tracker.track(NODE, grant(PEER), RecordIntent::Delete, Instant::ZERO);

        let first = h.engine.periodic_review(Instant::ZERO).unwrap();
        assert!(first.removed_nodes.is_empty());
        assert!(h.store.node_entry(PEER).is_some());

        let second = h.engine.periodic_review(Instant::from_millis(1000)).unwrap();
        assert_eq!(second.removed_nodes, vec![PEER]);
        assert!(h.store.node_entry(PEER).is_none());

        let revoked = h
            .audit
            .position(|e| matches!(e, AuditEvent::PrivilegeRevoked { subject, .. } if *subject == PEER))
            .unwrap();
        let removed = h
            .audit
            .position(|e| matches!(e, AuditEvent::NodeRemoved { node } if *node == PEER))
            .unwrap();
        assert!(revoked < removed);
    }

    #[test]
    fn test_lanes_are_independent() {
        let h = harness();
        for node in [NODE, PEER] {
            h.tracker.track(node, grant(NodeId::new(0x30)), RecordIntent::Apply, Instant::ZERO);
        }
        thread::scope(|scope| {
            for node in [NODE, PEER] {
                let engine = Arc::clone(&h.engine);
                scope.spawn(move || engine.refresh_node(node, Instant::ZERO).unwrap());
            }
        });
        assert!(h.tracker.is_empty());
        assert_eq!(h.store.get(NODE).unwrap().acl.len(), 1);
        assert_eq!(h.store.get(PEER).unwrap().acl.len(), 1);
    }
}
