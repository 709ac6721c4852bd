//! Binding commands

use crate::datastore::Datastore;
use crate::error::DatastoreError;
use core_types::NodeId;
use identity::SessionContext;
use lifecycle::{BindingEntry, BindingTarget, RecordId, RecordIntent, RecordPayload};
use services_policy_store::EntryState;

impl Datastore {
    /// Schedules `binding` on `node`
    ///
    /// The local endpoint must be registered, and the target must be a known
    /// node that is not being removed or an active group.
    pub fn add_binding_to_endpoint_for_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        binding: BindingEntry,
    ) -> Result<Option<RecordId>, DatastoreError> {
        self.authorize(session)?;
        self.active_endpoint(node, binding.endpoint)?;
        match binding.target {
            BindingTarget::Unicast { node: target, .. } => {
                self.active_node(target)?;
            }
            BindingTarget::Group(group) => {
                if self.store().snapshot().group(group)?.state != EntryState::Active {
                    return Err(DatastoreError::PendingDeletion);
                }
            }
        }

        let payload = RecordPayload::Binding(binding);
        if self.is_applied(node, &payload) {
            return Ok(None);
        }
        Ok(Some(self.track(node, payload, RecordIntent::Apply)))
    }

    pub fn remove_binding_from_endpoint_for_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        binding: BindingEntry,
    ) -> Result<RecordId, DatastoreError> {
        self.authorize(session)?;
        self.active_endpoint(node, binding.endpoint)?;
        let payload = RecordPayload::Binding(binding);
        let committed = self
            .store()
            .snapshot()
            .policy(node)
            .map_or(false, |p| p.bindings.contains(&binding));
        if !committed && !self.has_pending(node, &payload, RecordIntent::Apply) {
            return Err(DatastoreError::EntryNotFound(node));
        }
        Ok(self.track(node, payload, RecordIntent::Delete))
    }
}
