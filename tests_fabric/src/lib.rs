//! Fabric Test Utilities
//!
//! Shared bootstrap for the fleet scenario suites under `tests/`.
//!
//! ## Test Philosophy
//!
//! - **Observe from the node's side**: privileges are checked with commands sent to
//!   simulated nodes, not only by reading the datastore
//! - **Deterministic failures**: all node faults come from a `FaultPlan`
//! - **Virtual time**: retries and periodic reviews run by advancing the datastore clock

use core_types::{ClusterId, EndpointId, FabricIndex, NodeId};
use datastore_sync::RefreshReport;
use identity::{AuthMode, SessionContext};
use node_transport::SimulatedFleet;
use policy::{AccessControlEntry, AccessRequest, Privilege, RequestPath, Target};
use services_datastore::{Datastore, DatastoreConfig, DatastoreError};
use services_policy_store::EndpointEntry;
use std::sync::Arc;

/// Node the commissioner runs on
pub const COMMISSIONER: NodeId = NodeId::new(0x1);

/// A datastore, the fleet it configures and an administrator session
pub struct Fabric {
    pub fleet: Arc<SimulatedFleet>,
    pub datastore: Datastore,
    pub admin: SessionContext,
}

impl Fabric {
    /// Brings `node` online and commissions it with endpoint 1
    ///
    /// The node receives the operational certificate's administrator entry
    /// for the commissioner before the datastore learns about it.
    pub fn commission(&self, node: NodeId) -> Result<RefreshReport, DatastoreError> {
        self.fleet.add_node(node);
        self.fleet
            .add_noc(node, COMMISSIONER.into(), fabric())
            .expect("node was just brought online");
        self.datastore
            .add_pending_node(&self.admin, node, format!("node {:#x}", node.raw()))?;
        self.datastore
            .add_endpoint_for_node(&self.admin, node, EndpointEntry::new(EndpointId::new(1)))?;
        self.datastore.refresh_node(&self.admin, node)
    }

    /// Commissions every node in `nodes`, panicking on failure
    pub fn commission_all(&self, nodes: &[NodeId]) {
        for &node in nodes {
            self.commission(node).unwrap();
        }
    }

    /// Schedules `ace` on `node` and drives it to the node
    pub fn grant(&self, node: NodeId, ace: AccessControlEntry) -> Result<(), DatastoreError> {
        self.datastore.add_acl_to_node(&self.admin, node, ace)?;
        self.datastore.refresh_node(&self.admin, node)?;
        Ok(())
    }
}

/// Bootstrap helper for tests with the default configuration
pub fn test_bootstrap() -> Fabric {
    bootstrap_with(DatastoreConfig::default())
}

pub fn bootstrap_with(config: DatastoreConfig) -> Fabric {
    let fleet = Arc::new(SimulatedFleet::new());
    let admin = SessionContext::case(fabric(), COMMISSIONER, &[config.administrator_cat]);
    let datastore = Datastore::new(config, fleet.clone()).unwrap();
    Fabric {
        fleet,
        datastore,
        admin,
    }
}

pub fn fabric() -> FabricIndex {
    FabricIndex::new(1)
}

/// A CASE session for `node` holding no CATs
pub fn case_session(node: NodeId) -> SessionContext {
    SessionContext::case(fabric(), node, &[])
}

/// Operate on every endpoint of a node, for `subject` over CASE
pub fn operate_ace(subject: NodeId) -> AccessControlEntry {
    AccessControlEntry::new(fabric(), Privilege::Operate, AuthMode::Case).with_subject(subject)
}

/// Operate on one endpoint, for `subject` over CASE
pub fn operate_on_endpoint(subject: NodeId, endpoint: u16) -> AccessControlEntry {
    operate_ace(subject).with_target(Target::endpoint(EndpointId::new(endpoint)))
}

/// Toggling OnOff on `endpoint`
pub fn on_off(endpoint: u16) -> AccessRequest {
    AccessRequest::new(
        RequestPath::new(EndpointId::new(endpoint), ClusterId::ON_OFF),
        Privilege::Operate,
    )
}

/// Writing the node's access control cluster
pub fn manage_acl() -> AccessRequest {
    AccessRequest::new(
        RequestPath::new(EndpointId::ROOT, ClusterId::ACCESS_CONTROL),
        Privilege::Administer,
    )
}
