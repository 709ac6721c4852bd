//! Shared unit test fixtures

use crate::config::DatastoreConfig;
use crate::datastore::Datastore;
use core_types::{EndpointId, FabricIndex, NodeId};
use identity::SessionContext;
use node_transport::SimulatedFleet;
use services_policy_store::EndpointEntry;
use std::sync::Arc;

pub const NODE: NodeId = NodeId::new(0x100);
pub const PEER: NodeId = NodeId::new(0x200);
pub const COMMISSIONER: NodeId = NodeId::new(0x1);

pub fn fleet(nodes: &[NodeId]) -> Arc<SimulatedFleet> {
    let fleet = Arc::new(SimulatedFleet::new());
    for &node in nodes {
        fleet.add_node(node);
    }
    fleet
}

pub fn datastore(fleet: &Arc<SimulatedFleet>) -> Datastore {
    Datastore::new(DatastoreConfig::default(), fleet.clone()).unwrap()
}

pub fn admin_session() -> SessionContext {
    let config = DatastoreConfig::default();
    SessionContext::case(FabricIndex::new(1), COMMISSIONER, &[config.administrator_cat])
}

/// Adds each node with endpoint 1 and refreshes it to `Committed`
pub fn commissioned(ds: &Datastore, admin: &SessionContext, nodes: &[NodeId]) {
    for &node in nodes {
        ds.add_pending_node(admin, node, format!("node {}", node.raw()))
            .unwrap();
        ds.add_endpoint_for_node(admin, node, EndpointEntry::new(EndpointId::new(1)))
            .unwrap();
        ds.refresh_node(admin, node).unwrap();
    }
}
