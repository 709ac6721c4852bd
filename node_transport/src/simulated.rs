//! In-memory simulated fleet

use crate::error::TransportError;
use crate::fault::FaultPlan;
use crate::NodeTransport;
use core_types::{EndpointId, FabricIndex, GroupId, NodeId, Status, SubjectId};
use identity::{AuthMode, SessionContext};
use lifecycle::{
    BindingEntry, GroupKeySetEntry, PendingRecord, RecordIntent, RecordPayload, RecordType,
    Timeout,
};
use parking_lot::Mutex;
use policy::{
    validate_ace, validate_are, AccessControlEntry, AccessDecisionEngine, AccessRequest,
    AccessRestrictionEntry, CatVersionTable, PolicyView, Privilege,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Configuration a simulated node has applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeState {
    pub acl: Vec<AccessControlEntry>,
    pub arl: Vec<AccessRestrictionEntry>,
    pub group_keys: BTreeMap<GroupId, GroupKeySetEntry>,
    pub memberships: BTreeSet<(EndpointId, GroupId)>,
    pub bindings: Vec<BindingEntry>,
}

impl NodeState {
    fn apply(&mut self, record: &PendingRecord) -> Result<(), TransportError> {
        let delete = record.intent == RecordIntent::Delete;
        match &record.payload {
            RecordPayload::Acl(ace) => {
                self.acl.retain(|existing| existing != ace);
                if !delete {
                    validate_ace(ace).map_err(|v| TransportError::Rejected(v.status()))?;
                    self.acl.push(ace.clone());
                }
            }
            RecordPayload::Arl(are) => {
                self.arl.retain(|existing| existing.entry_id != are.entry_id);
                if !delete {
                    validate_are(are).map_err(|v| TransportError::Rejected(v.status()))?;
                    self.arl.push(are.clone());
                }
            }
            RecordPayload::GroupKeySet(entry) => {
                if delete {
                    self.group_keys.remove(&entry.group_id);
                } else {
                    self.group_keys.insert(entry.group_id, entry.activated());
                }
            }
            RecordPayload::GroupMembership { endpoint, group } => {
                if delete {
                    self.memberships.remove(&(*endpoint, *group));
                } else {
                    self.memberships.insert((*endpoint, *group));
                }
            }
            RecordPayload::Binding(binding) => {
                self.bindings.retain(|existing| existing != binding);
                if !delete {
                    self.bindings.push(*binding);
                }
            }
        }
        Ok(())
    }

    fn payloads(&self, record_type: RecordType) -> Vec<RecordPayload> {
        match record_type {
            RecordType::Acl => self.acl.iter().cloned().map(RecordPayload::Acl).collect(),
            RecordType::Arl => self.arl.iter().cloned().map(RecordPayload::Arl).collect(),
            RecordType::GroupKey => self
                .group_keys
                .values()
                .copied()
                .map(RecordPayload::GroupKeySet)
                .chain(
                    self.memberships
                        .iter()
                        .map(|&(endpoint, group)| RecordPayload::GroupMembership { endpoint, group }),
                )
                .collect(),
            RecordType::Binding => self.bindings.iter().copied().map(RecordPayload::Binding).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct SimNode {
    state: NodeState,
    faults: FaultPlan,
    attempts: u64,
}

/// Called before each apply reaches a node, outside the fleet lock
pub type ApplyHook = Arc<dyn Fn(NodeId, &PendingRecord) + Send + Sync>;

/// A fleet of simulated nodes
///
/// Each node keeps its own applied policy and authorizes commands against
/// it with the same decision engine the datastore uses.
#[derive(Default)]
pub struct SimulatedFleet {
    nodes: Mutex<HashMap<NodeId, SimNode>>,
    hook: Mutex<Option<ApplyHook>>,
    engine: AccessDecisionEngine,
}

impl std::fmt::Debug for SimulatedFleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedFleet")
            .field("nodes", &self.nodes.lock().len())
            .finish()
    }
}

impl SimulatedFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings a factory-fresh node online; returns false if it already exists
    pub fn add_node(&self, node: NodeId) -> bool {
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&node) {
            return false;
        }
        nodes.insert(node, SimNode::default());
        debug!(node = %node, "simulated node online");
        true
    }

    pub fn remove_node(&self, node: NodeId) -> bool {
        self.nodes.lock().remove(&node).is_some()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.lock().contains_key(&node)
    }

    /// Installs the operational certificate's automatic administrator entry
    ///
    /// The commissioner's subject gets Administer over the whole node.
    pub fn add_noc(
        &self,
        node: NodeId,
        admin: SubjectId,
        fabric_index: FabricIndex,
    ) -> Result<(), TransportError> {
        let ace = AccessControlEntry::new(fabric_index, Privilege::Administer, AuthMode::Case)
            .with_subject(admin);
        self.with_node(node, |sim| {
            if !sim.state.acl.contains(&ace) {
                sim.state.acl.push(ace);
            }
        })
    }

    /// Clears everything the node has applied
    pub fn factory_reset(&self, node: NodeId) -> Result<(), TransportError> {
        self.with_node(node, |sim| {
            sim.state = NodeState::default();
        })?;
        debug!(node = %node, "factory reset");
        Ok(())
    }

    pub fn set_fault_plan(&self, node: NodeId, plan: FaultPlan) -> Result<(), TransportError> {
        self.with_node(node, |sim| sim.faults = plan)
    }

    pub fn clear_faults(&self, node: NodeId) -> Result<(), TransportError> {
        self.set_fault_plan(node, FaultPlan::new())
    }

    pub fn state(&self, node: NodeId) -> Option<NodeState> {
        self.nodes.lock().get(&node).map(|sim| sim.state.clone())
    }

    /// Number of applies that reached `node`, including failed ones
    pub fn attempts(&self, node: NodeId) -> u64 {
        self.nodes.lock().get(&node).map_or(0, |sim| sim.attempts)
    }

    pub fn set_apply_hook(&self, hook: ApplyHook) {
        *self.hook.lock() = Some(hook);
    }

    #[cfg(test)]
    fn clear_apply_hook(&self) {
        *self.hook.lock() = None;
    }

    fn with_node<T>(
        &self,
        node: NodeId,
        f: impl FnOnce(&mut SimNode) -> T,
    ) -> Result<T, TransportError> {
        let mut nodes = self.nodes.lock();
        let sim = nodes.get_mut(&node).ok_or(TransportError::Unreachable(node))?;
        Ok(f(sim))
    }
}

impl NodeTransport for SimulatedFleet {
    fn apply(&self, node: NodeId, record: &PendingRecord, timeout: Timeout) -> Result<(), TransportError> {
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(node, record);
        }

        let mut nodes = self.nodes.lock();
        let sim = nodes.get_mut(&node).ok_or(TransportError::Unreachable(node))?;
        sim.attempts += 1;
        sim.faults.check_apply(node, record.record_type(), timeout)?;
        sim.state.apply(record)?;
        debug!(
            node = %node,
            record = %record.id,
            kind = %record.record_type(),
            intent = ?record.intent,
            "applied record"
        );
        Ok(())
    }

    fn query(&self, node: NodeId, record_type: RecordType) -> Result<Vec<RecordPayload>, TransportError> {
        let nodes = self.nodes.lock();
        let sim = nodes.get(&node).ok_or(TransportError::Unreachable(node))?;
        if sim.faults.is_unreachable() {
            return Err(TransportError::Unreachable(node));
        }
        Ok(sim.state.payloads(record_type))
    }

    fn send_command(
        &self,
        session: &SessionContext,
        node: NodeId,
        request: &AccessRequest,
    ) -> Result<(), TransportError> {
        let nodes = self.nodes.lock();
        let sim = nodes.get(&node).ok_or(TransportError::Unreachable(node))?;
        if sim.faults.is_unreachable() {
            return Err(TransportError::Unreachable(node));
        }

        let cat_versions = CatVersionTable::from_acl(&sim.state.acl);
        let view = PolicyView::new(&sim.state.acl, &sim.state.arl, &cat_versions);
        let decision = self.engine.decide(&view, session, request);
        if decision.is_allow() {
            Ok(())
        } else {
            debug!(node = %node, session = %session.id(), %decision, "command denied");
            Err(TransportError::Rejected(Status::AccessDenied))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::NodeFault;
    use core_types::{CaseAuthTag, ClusterId, Instant};
    use lifecycle::LifecycleTracker;
    use policy::{RequestPath, Target};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NODE: NodeId = NodeId::new(0x100);
    const PEER: NodeId = NodeId::new(0x200);

    fn fabric() -> FabricIndex {
        FabricIndex::new(1)
    }

    fn record(payload: RecordPayload, intent: RecordIntent) -> PendingRecord {
        let tracker = LifecycleTracker::new();
        let id = tracker.track(NODE, payload, intent, Instant::ZERO);
        tracker.get(id).unwrap()
    }

    fn on_off(endpoint: u16) -> AccessRequest {
        AccessRequest::new(
            RequestPath::new(EndpointId::new(endpoint), ClusterId::ON_OFF),
            Privilege::Operate,
        )
    }

    fn operate_ace(subject: impl Into<SubjectId>) -> AccessControlEntry {
        AccessControlEntry::new(fabric(), Privilege::Operate, AuthMode::Case).with_subject(subject)
    }

    #[test]
    fn test_apply_and_query() {
        let fleet = SimulatedFleet::new();
        fleet.add_node(NODE);
        let ace = operate_ace(PEER);
        fleet
            .apply(NODE, &record(RecordPayload::Acl(ace.clone()), RecordIntent::Apply), Timeout::from_millis(100))
            .unwrap();
        assert_eq!(
            fleet.query(NODE, RecordType::Acl).unwrap(),
            vec![RecordPayload::Acl(ace.clone())]
        );

        fleet
            .apply(NODE, &record(RecordPayload::Acl(ace), RecordIntent::Delete), Timeout::from_millis(100))
            .unwrap();
        assert!(fleet.query(NODE, RecordType::Acl).unwrap().is_empty());
        assert_eq!(fleet.attempts(NODE), 2);
    }

    #[test]
    fn test_node_rejects_invalid_ace() {
        let fleet = SimulatedFleet::new();
        fleet.add_node(NODE);
        let bad = AccessControlEntry::new(fabric(), Privilege::Administer, AuthMode::Group);
        let result = fleet.apply(NODE, &record(RecordPayload::Acl(bad), RecordIntent::Apply), Timeout::from_millis(100));
        assert_eq!(result, Err(TransportError::Rejected(Status::ConstraintError)));
    }

    #[test]
    fn test_unknown_node_unreachable() {
        let fleet = SimulatedFleet::new();
        assert_eq!(
            fleet.query(NODE, RecordType::Acl),
            Err(TransportError::Unreachable(NODE))
        );
    }

    #[test]
    fn test_command_authorized_by_node_acl() {
        let fleet = SimulatedFleet::new();
        fleet.add_node(NODE);
        let session = SessionContext::case(fabric(), PEER, &[]);
        assert_eq!(
            fleet.send_command(&session, NODE, &on_off(1)),
            Err(TransportError::Rejected(Status::AccessDenied))
        );

        fleet
            .apply(NODE, &record(RecordPayload::Acl(operate_ace(PEER)), RecordIntent::Apply), Timeout::from_millis(100))
            .unwrap();
        assert!(fleet.send_command(&session, NODE, &on_off(1)).is_ok());
    }

    #[test]
    fn test_add_noc_and_factory_reset() {
        let fleet = SimulatedFleet::new();
        fleet.add_node(NODE);
        let admin_cat = CaseAuthTag::new(0xFFFD, 1);
        fleet.add_noc(NODE, SubjectId::Cat(admin_cat), fabric()).unwrap();
        fleet.add_noc(NODE, SubjectId::Cat(admin_cat), fabric()).unwrap();
        assert_eq!(fleet.state(NODE).unwrap().acl.len(), 1);

        let admin = SessionContext::case(fabric(), PEER, &[admin_cat]);
        let manage = AccessRequest::new(
            RequestPath::new(EndpointId::ROOT, ClusterId::ACCESS_CONTROL),
            Privilege::Administer,
        );
        assert!(fleet.send_command(&admin, NODE, &manage).is_ok());

        fleet.factory_reset(NODE).unwrap();
        assert_eq!(fleet.state(NODE).unwrap(), NodeState::default());
        assert!(fleet.send_command(&admin, NODE, &manage).is_err());
    }

    #[test]
    fn test_node_derives_cat_versions_from_acl() {
        let fleet = SimulatedFleet::new();
        fleet.add_node(NODE);
        let v1 = CaseAuthTag::new(0x1010, 1);
        let v2 = v1.with_version(2);
        let timeout = Timeout::from_millis(100);
        let group_ace = |cat: CaseAuthTag| {
            AccessControlEntry::new(fabric(), Privilege::Operate, AuthMode::Case)
                .with_subject(cat)
                .with_target(Target::endpoint(EndpointId::new(1)))
        };
        fleet
            .apply(NODE, &record(RecordPayload::Acl(group_ace(v1)), RecordIntent::Apply), timeout)
            .unwrap();
        let old_holder = SessionContext::case(fabric(), PEER, &[v1]);
        assert!(fleet.send_command(&old_holder, NODE, &on_off(1)).is_ok());

        fleet
            .apply(NODE, &record(RecordPayload::Acl(group_ace(v2)), RecordIntent::Apply), timeout)
            .unwrap();
        assert!(fleet.send_command(&old_holder, NODE, &on_off(1)).is_err());
        let new_holder = SessionContext::case(fabric(), PEER, &[v2]);
        assert!(fleet.send_command(&new_holder, NODE, &on_off(1)).is_ok());
    }

    #[test]
    fn test_faults_consulted_on_apply() {
        let fleet = SimulatedFleet::new();
        fleet.add_node(NODE);
        fleet
            .set_fault_plan(
                NODE,
                FaultPlan::new().with_fault(NodeFault::FailNext {
                    count: 1,
                    status: Status::Busy,
                }),
            )
            .unwrap();
        let rec = record(RecordPayload::Acl(operate_ace(PEER)), RecordIntent::Apply);
        assert_eq!(
            fleet.apply(NODE, &rec, Timeout::from_millis(100)),
            Err(TransportError::Rejected(Status::Busy))
        );
        assert!(fleet.apply(NODE, &rec, Timeout::from_millis(100)).is_ok());
        assert_eq!(fleet.state(NODE).unwrap().acl.len(), 1);
    }

    #[test]
    fn test_apply_hook_runs_before_apply() {
        let fleet = SimulatedFleet::new();
        fleet.add_node(NODE);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        fleet.set_apply_hook(Arc::new(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let rec = record(RecordPayload::Acl(operate_ace(PEER)), RecordIntent::Apply);
        fleet.apply(NODE, &rec, Timeout::from_millis(100)).unwrap();
        fleet.clear_apply_hook();
        fleet.apply(NODE, &rec, Timeout::from_millis(100)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
