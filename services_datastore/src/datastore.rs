//! The datastore facade

use crate::config::DatastoreConfig;
use crate::error::DatastoreError;
use core_types::{ClusterId, Duration, EndpointId, Instant, NodeId};
use datastore_sync::{ReviewReport, SyncEngine};
use identity::{AuthMode, SessionContext};
use lifecycle::{LifecycleTracker, RecordId, RecordIntent, RecordPayload, TrackerError};
use node_transport::NodeTransport;
use parking_lot::Mutex;
use policy::{
    AccessControlEntry, AccessDecision, AccessDecisionEngine, AccessRequest, DecisionReport,
    Privilege, RequestPath, Target,
};
use services_logger::{AuditEvent, AuditTrail};
use services_policy_store::{EndpointEntry, NodeEntry, PolicyStore};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
struct Clock {
    now: Instant,
    next_review: Instant,
}

/// Joint fabric datastore
pub struct Datastore {
    config: DatastoreConfig,
    store: Arc<PolicyStore>,
    tracker: Arc<LifecycleTracker>,
    sync: Arc<SyncEngine>,
    audit: Arc<AuditTrail>,
    engine: AccessDecisionEngine,
    clock: Mutex<Clock>,
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("config", &self.config)
            .field("version", &self.store.version())
            .field("pending", &self.tracker.len())
            .finish()
    }
}

impl Datastore {
    /// Creates an empty datastore
    pub fn new(config: DatastoreConfig, transport: Arc<dyn NodeTransport>) -> Result<Self, DatastoreError> {
        Self::with_store(config, PolicyStore::new(), transport)
    }

    /// Creates a datastore over existing committed state
    pub fn with_store(
        config: DatastoreConfig,
        store: PolicyStore,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Self, DatastoreError> {
        config.validate()?;
        let store = Arc::new(store);
        let admin_ace = Self::administrator_entry(&config);
        store.update(|draft| {
            if !draft.datastore_acl.contains(&admin_ace) {
                draft.datastore_acl.push(admin_ace);
            }
            Ok(())
        })?;

        let tracker = Arc::new(LifecycleTracker::new());
        let audit = Arc::new(AuditTrail::new());
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            transport,
            Arc::clone(&audit),
            config.sync_config(),
        ));
        let clock = Clock {
            now: Instant::ZERO,
            next_review: Instant::ZERO + config.review_interval(),
        };
        info!(
            fabric = config.fabric_index.raw(),
            endpoint = config.datastore_endpoint.raw(),
            "datastore ready"
        );
        Ok(Self {
            config,
            store,
            tracker,
            sync,
            audit,
            engine: AccessDecisionEngine::new(),
            clock: Mutex::new(clock),
        })
    }

    /// Loads committed state saved with [`save_to`](Self::save_to)
    pub fn load(
        config: DatastoreConfig,
        path: impl AsRef<Path>,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Self, DatastoreError> {
        let store = PolicyStore::load_from(path)?;
        Self::with_store(config, store, transport)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), DatastoreError> {
        Ok(self.store.save_to(path)?)
    }

    fn administrator_entry(config: &DatastoreConfig) -> AccessControlEntry {
        AccessControlEntry::new(config.fabric_index, Privilege::Administer, AuthMode::Case)
            .with_subject(config.administrator_cat)
            .with_target(Target::endpoint(config.datastore_endpoint))
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    // ========================================================================
    // Virtual time
    // ========================================================================

    pub fn now(&self) -> Instant {
        self.clock.lock().now
    }

    /// Moves the clock forward, running every periodic review that falls due
    pub fn advance(&self, duration: Duration) -> Result<Vec<ReviewReport>, DatastoreError> {
        let target = self.now() + duration;
        let mut reports = Vec::new();
        loop {
            let review_at = {
                let mut clock = self.clock.lock();
                if clock.next_review > target {
                    clock.now = target;
                    break;
                }
                let at = clock.next_review;
                clock.now = at;
                clock.next_review = at + self.config.review_interval();
                at
            };
            reports.push(self.sync.periodic_review(review_at)?);
        }
        Ok(reports)
    }

    /// Runs a periodic review now, outside the regular schedule
    pub fn periodic_review(&self) -> Result<ReviewReport, DatastoreError> {
        Ok(self.sync.periodic_review(self.now())?)
    }

    /// Gives a `CommitFailed` record a fresh set of attempts
    pub fn reissue_record(&self, session: &SessionContext, id: RecordId) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        let record = self.tracker.get(id).ok_or(TrackerError::NotFound(id))?;
        self.active_node(record.node_id)?;
        self.tracker.reissue(id, self.now())?;
        info!(node = %record.node_id, record = %id, "record reissued");
        Ok(())
    }

    // ========================================================================
    // Shared checks
    // ========================================================================

    /// Decides whether `session` may administer the datastore
    pub fn authorize_decision(&self, session: &SessionContext) -> AccessDecision {
        self.authorize_report(session).decision
    }

    fn authorize_report(&self, session: &SessionContext) -> DecisionReport {
        let snapshot = self.store.snapshot();
        let request = AccessRequest::new(
            RequestPath::new(self.config.datastore_endpoint, ClusterId::JOINT_FABRIC_DATASTORE),
            Privilege::Administer,
        );
        self.engine
            .decide_with_report(&snapshot.datastore_view(), session, &request)
    }

    /// Refusals are audited with the entries that took part in the decision
    pub(crate) fn authorize(&self, session: &SessionContext) -> Result<(), DatastoreError> {
        let report = self.authorize_report(session);
        match report.decision {
            AccessDecision::Allow { .. } => Ok(()),
            AccessDecision::Deny { reason } => {
                warn!(session = %session.id(), ?reason, "administrative command denied");
                self.audit.record(
                    self.now(),
                    AuditEvent::AdministrationDenied {
                        reason,
                        restrictions: report.matched_restrictions,
                        matched_entries: report.matched_entries.len(),
                    },
                );
                Err(DatastoreError::AccessDenied(reason))
            }
        }
    }

    /// A node entry that exists and is not being removed
    pub(crate) fn active_node(&self, node: NodeId) -> Result<NodeEntry, DatastoreError> {
        let entry = self.store.snapshot().node(node)?.clone();
        if entry.removal_in_progress {
            return Err(DatastoreError::RemovalInProgress(node));
        }
        Ok(entry)
    }

    pub(crate) fn active_endpoint(
        &self,
        node: NodeId,
        endpoint: EndpointId,
    ) -> Result<EndpointEntry, DatastoreError> {
        self.active_node(node)?;
        Ok(self.store.snapshot().endpoint(node, endpoint)?.clone())
    }

    pub(crate) fn track(&self, node: NodeId, payload: RecordPayload, intent: RecordIntent) -> RecordId {
        self.tracker.track(node, payload, intent, self.now())
    }

    /// Returns true if an unresolved record for `node` writes the same item as `payload`
    pub(crate) fn has_pending(&self, node: NodeId, payload: &RecordPayload, intent: RecordIntent) -> bool {
        let key = payload.key();
        self.tracker
            .has_unresolved(node, |r| r.intent == intent && r.key() == key)
    }

    pub(crate) fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }
}
