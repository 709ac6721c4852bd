//! Lifecycle tracker: the set of unresolved records

use crate::record::{
    PendingRecord, RecordId, RecordIntent, RecordKey, RecordPayload, RecordState,
};
use crate::retry::RetryPolicy;
use core_types::{Instant, NodeId, Status};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

/// Tracker errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: RecordId,
        from: RecordState,
        to: RecordState,
    },
}

impl TrackerError {
    pub fn status(&self) -> Status {
        match self {
            TrackerError::NotFound(_) => Status::NotFound,
            TrackerError::InvalidTransition { .. } => Status::InvalidCommand,
        }
    }
}

/// How a successful apply resolved a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// `Pending -> Committed`; the payload is now part of the node's view
    Committed,
    /// `PendingDeletion -> removed`; the item is gone from the node
    Removed,
}

/// What happened after a failed apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Transient failure; the record stays unresolved until `next_attempt`
    Retrying { next_attempt: Instant },
    /// Permanent failure or retries exhausted
    Failed,
}

#[derive(Debug, Default)]
struct TrackerState {
    records: HashMap<RecordId, PendingRecord>,
    by_key: HashMap<(NodeId, RecordKey), RecordId>,
    next_sequence: u64,
}

impl TrackerState {
    fn remove(&mut self, id: RecordId) -> Option<PendingRecord> {
        let record = self.records.remove(&id)?;
        let key = (record.node_id, record.key());
        if self.by_key.get(&key) == Some(&id) {
            self.by_key.remove(&key);
        }
        Some(record)
    }

    fn get_mut(&mut self, id: RecordId) -> Result<&mut PendingRecord, TrackerError> {
        self.records.get_mut(&id).ok_or(TrackerError::NotFound(id))
    }

    fn sorted(&self, filter: impl Fn(&PendingRecord) -> bool) -> Vec<PendingRecord> {
        let mut found: Vec<PendingRecord> = self
            .records
            .values()
            .filter(|r| filter(r))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.sequence);
        found
    }
}

/// Moves `record` to `to` if the state machine allows it
fn transition(record: &mut PendingRecord, to: RecordState) -> Result<(), TrackerError> {
    if !record.state.can_transition_to(to) {
        return Err(TrackerError::InvalidTransition {
            id: record.id,
            from: record.state,
            to,
        });
    }
    record.state = to;
    Ok(())
}

/// Tracks every record that has not yet been committed
///
/// Records are keyed per `(node, item)`: tracking a second change for the
/// same item replaces the first, whatever its state, so only the latest
/// desired value is ever pushed.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    state: Mutex<TrackerState>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a change for `node`, due immediately
    pub fn track(
        &self,
        node_id: NodeId,
        payload: RecordPayload,
        intent: RecordIntent,
        now: Instant,
    ) -> RecordId {
        let mut state = self.state.lock();
        let key = (node_id, payload.key());
        if let Some(previous) = state.by_key.get(&key).copied() {
            state.remove(previous);
            debug!(node = %node_id, record = %previous, "superseded pending record");
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let record = PendingRecord {
            id: RecordId::new(),
            node_id,
            payload,
            intent,
            state: RecordState::initial(intent),
            retry_count: 0,
            last_attempt: None,
            next_attempt: now,
            last_status: None,
            sequence,
        };
        let id = record.id;
        debug!(
            node = %node_id,
            record = %id,
            kind = %record.record_type(),
            state = %record.state,
            "tracking record"
        );
        state.by_key.insert(key, id);
        state.records.insert(id, record);
        id
    }

    pub fn get(&self, id: RecordId) -> Option<PendingRecord> {
        self.state.lock().records.get(&id).cloned()
    }

    /// Every tracked record for `node`, unresolved and failed, in creation order
    pub fn records_for(&self, node: NodeId) -> Vec<PendingRecord> {
        self.state.lock().sorted(|r| r.node_id == node)
    }

    /// Unresolved records for `node` in creation order
    ///
    /// With `due_at`, only records whose backoff has elapsed are returned.
    pub fn unresolved_for(&self, node: NodeId, due_at: Option<Instant>) -> Vec<PendingRecord> {
        self.state.lock().sorted(|r| {
            r.node_id == node
                && r.is_unresolved()
                && due_at.map_or(true, |now| r.next_attempt <= now)
        })
    }

    /// Nodes with at least one unresolved record due at `now`
    pub fn due_nodes(&self, now: Instant) -> Vec<NodeId> {
        let state = self.state.lock();
        let nodes: BTreeSet<NodeId> = state
            .records
            .values()
            .filter(|r| r.is_unresolved() && r.next_attempt <= now)
            .map(|r| r.node_id)
            .collect();
        nodes.into_iter().collect()
    }

    /// Returns true if any unresolved record for `node` satisfies `pred`
    pub fn has_unresolved(&self, node: NodeId, pred: impl Fn(&PendingRecord) -> bool) -> bool {
        self.state
            .lock()
            .records
            .values()
            .any(|r| r.node_id == node && r.is_unresolved() && pred(r))
    }

    /// Returns true if any unresolved record anywhere satisfies `pred`
    pub fn any_unresolved(&self, pred: impl Fn(&PendingRecord) -> bool) -> bool {
        self.state
            .lock()
            .records
            .values()
            .any(|r| r.is_unresolved() && pred(r))
    }

    /// Resolves a record after a successful apply and stops tracking it
    pub fn settle(&self, id: RecordId) -> Result<(PendingRecord, SettleOutcome), TrackerError> {
        let mut state = self.state.lock();
        let record = state.get_mut(id)?;
        let outcome = match record.state {
            RecordState::PendingDeletion => SettleOutcome::Removed,
            _ => {
                transition(record, RecordState::Committed)?;
                SettleOutcome::Committed
            }
        };
        let record = state.remove(id).ok_or(TrackerError::NotFound(id))?;
        Ok((record, outcome))
    }

    /// Records a failed apply
    ///
    /// Transient failures are rescheduled with backoff until the policy is
    /// exhausted; anything else fails the record at once.
    pub fn record_failure(
        &self,
        id: RecordId,
        status: Status,
        now: Instant,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome, TrackerError> {
        let mut state = self.state.lock();
        let record = state.get_mut(id)?;
        let retry_count = record.retry_count + 1;
        let retrying = status.is_transient() && !policy.is_exhausted(retry_count);
        let next = if retrying {
            record.state
        } else {
            RecordState::CommitFailed
        };
        transition(record, next)?;
        record.retry_count = retry_count;
        record.last_attempt = Some(now);
        record.last_status = Some(status);

        if retrying {
            let next_attempt = now + policy.backoff(retry_count);
            record.next_attempt = next_attempt;
            Ok(FailureOutcome::Retrying { next_attempt })
        } else {
            Ok(FailureOutcome::Failed)
        }
    }

    /// Moves a failed record back to its initial state for another attempt
    pub fn reissue(&self, id: RecordId, now: Instant) -> Result<(), TrackerError> {
        let mut state = self.state.lock();
        let record = state.get_mut(id)?;
        let to = RecordState::initial(record.intent);
        // Pending and PendingDeletion loop on themselves while retrying
        if record.state != RecordState::CommitFailed {
            return Err(TrackerError::InvalidTransition {
                id,
                from: record.state,
                to,
            });
        }
        transition(record, to)?;
        record.retry_count = 0;
        record.next_attempt = now;
        Ok(())
    }

    /// Drops a single record without applying it
    pub fn discard(&self, id: RecordId) -> Option<PendingRecord> {
        self.state.lock().remove(id)
    }

    /// Drops every record for `node`
    pub fn cancel_node(&self, node: NodeId) -> Vec<PendingRecord> {
        let mut state = self.state.lock();
        let ids: Vec<RecordId> = state
            .records
            .values()
            .filter(|r| r.node_id == node)
            .map(|r| r.id)
            .collect();
        let mut removed: Vec<PendingRecord> =
            ids.into_iter().filter_map(|id| state.remove(id)).collect();
        removed.sort_by_key(|r| r.sequence);
        removed
    }

    /// Snapshot of every tracked record in creation order
    pub fn all(&self) -> Vec<PendingRecord> {
        self.state.lock().sorted(|_| true)
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{GroupKeySetEntry, RecordType};
    use core_types::{Duration, FabricIndex, GroupId, KeySetId};
    use identity::AuthMode;
    use policy::{AccessControlEntry, Privilege};

    fn node() -> NodeId {
        NodeId::new(0x11)
    }

    fn ace(subject: u64) -> RecordPayload {
        RecordPayload::Acl(
            AccessControlEntry::new(FabricIndex::new(1), Privilege::Operate, AuthMode::Case)
                .with_subject(NodeId::new(subject)),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(1000))
    }

    #[test]
    fn test_track_and_settle() {
        let tracker = LifecycleTracker::new();
        let id = tracker.track(node(), ace(1), RecordIntent::Apply, Instant::ZERO);
        assert_eq!(tracker.get(id).unwrap().state, RecordState::Pending);

        let (record, outcome) = tracker.settle(id).unwrap();
        assert_eq!(outcome, SettleOutcome::Committed);
        assert_eq!(record.state, RecordState::Committed);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_deletion_settles_as_removed() {
        let tracker = LifecycleTracker::new();
        let id = tracker.track(node(), ace(1), RecordIntent::Delete, Instant::ZERO);
        assert_eq!(tracker.get(id).unwrap().state, RecordState::PendingDeletion);
        assert_eq!(tracker.settle(id).unwrap().1, SettleOutcome::Removed);
    }

    #[test]
    fn test_same_key_coalesces() {
        let tracker = LifecycleTracker::new();
        let first = tracker.track(node(), ace(1), RecordIntent::Apply, Instant::ZERO);
        let second = tracker.track(node(), ace(1), RecordIntent::Delete, Instant::ZERO);

        assert!(tracker.get(first).is_none());
        assert_eq!(tracker.records_for(node()).len(), 1);
        assert_eq!(tracker.get(second).unwrap().state, RecordState::PendingDeletion);
        assert_eq!(tracker.settle(first), Err(TrackerError::NotFound(first)));
    }

    #[test]
    fn test_transient_failure_backs_off_then_fails() {
        let tracker = LifecycleTracker::new();
        let id = tracker.track(node(), ace(1), RecordIntent::Apply, Instant::ZERO);
        let now = Instant::from_millis(10);

        assert_eq!(
            tracker.record_failure(id, Status::Busy, now, &policy()),
            Ok(FailureOutcome::Retrying {
                next_attempt: now + Duration::from_millis(100)
            })
        );
        assert!(tracker.due_nodes(now).is_empty());
        assert_eq!(tracker.due_nodes(Instant::from_millis(110)), vec![node()]);

        assert!(matches!(
            tracker.record_failure(id, Status::Timeout, now, &policy()),
            Ok(FailureOutcome::Retrying { .. })
        ));
        assert_eq!(
            tracker.record_failure(id, Status::Timeout, now, &policy()),
            Ok(FailureOutcome::Failed)
        );
        let record = tracker.get(id).unwrap();
        assert_eq!(record.state, RecordState::CommitFailed);
        assert_eq!(record.retry_count, 3);
        assert_eq!(record.last_status, Some(Status::Timeout));
    }

    #[test]
    fn test_structural_failure_is_immediate() {
        let tracker = LifecycleTracker::new();
        let id = tracker.track(node(), ace(1), RecordIntent::Apply, Instant::ZERO);
        assert_eq!(
            tracker.record_failure(id, Status::ConstraintError, Instant::ZERO, &policy()),
            Ok(FailureOutcome::Failed)
        );
        assert!(tracker.unresolved_for(node(), None).is_empty());
        assert_eq!(tracker.records_for(node()).len(), 1);
    }

    #[test]
    fn test_failed_record_cannot_settle_until_reissued() {
        let tracker = LifecycleTracker::new();
        let id = tracker.track(node(), ace(1), RecordIntent::Apply, Instant::ZERO);
        tracker
            .record_failure(id, Status::ConstraintError, Instant::ZERO, &policy())
            .unwrap();
        assert!(matches!(
            tracker.settle(id),
            Err(TrackerError::InvalidTransition { .. })
        ));

        tracker.reissue(id, Instant::from_millis(5)).unwrap();
        let record = tracker.get(id).unwrap();
        assert_eq!(record.state, RecordState::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(tracker.settle(id).is_ok());
    }

    #[test]
    fn test_illegal_transitions_leave_record_untouched() {
        let tracker = LifecycleTracker::new();
        let id = tracker.track(node(), ace(1), RecordIntent::Delete, Instant::ZERO);
        assert_eq!(
            tracker.reissue(id, Instant::ZERO),
            Err(TrackerError::InvalidTransition {
                id,
                from: RecordState::PendingDeletion,
                to: RecordState::PendingDeletion,
            })
        );

        tracker
            .record_failure(id, Status::ConstraintError, Instant::ZERO, &policy())
            .unwrap();
        assert_eq!(
            tracker.record_failure(id, Status::Busy, Instant::from_millis(1), &policy()),
            Err(TrackerError::InvalidTransition {
                id,
                from: RecordState::CommitFailed,
                to: RecordState::CommitFailed,
            })
        );
        let record = tracker.get(id).unwrap();
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.last_status, Some(Status::ConstraintError));

        tracker.reissue(id, Instant::from_millis(2)).unwrap();
        assert_eq!(tracker.get(id).unwrap().state, RecordState::PendingDeletion);
        assert_eq!(tracker.settle(id).unwrap().1, SettleOutcome::Removed);
    }

    #[test]
    fn test_unresolved_in_creation_order() {
        let tracker = LifecycleTracker::new();
        let a = tracker.track(node(), ace(1), RecordIntent::Apply, Instant::ZERO);
        let b = tracker.track(
            node(),
            RecordPayload::GroupKeySet(GroupKeySetEntry::pending(GroupId::new(1), KeySetId::new(2))),
            RecordIntent::Apply,
            Instant::ZERO,
        );
        let c = tracker.track(node(), ace(2), RecordIntent::Delete, Instant::ZERO);
        tracker.track(NodeId::new(0x22), ace(1), RecordIntent::Apply, Instant::ZERO);

        let ids: Vec<_> = tracker
            .unresolved_for(node(), None)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![a, b, c]);
        assert!(tracker.has_unresolved(node(), |r| r.record_type() == RecordType::GroupKey));
    }

    #[test]
    fn test_cancel_node_drops_only_that_node() {
        let tracker = LifecycleTracker::new();
        tracker.track(node(), ace(1), RecordIntent::Apply, Instant::ZERO);
        tracker.track(node(), ace(2), RecordIntent::Apply, Instant::ZERO);
        tracker.track(NodeId::new(0x22), ace(1), RecordIntent::Apply, Instant::ZERO);

        assert_eq!(tracker.cancel_node(node()).len(), 2);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.records_for(node()).is_empty());
    }
}
