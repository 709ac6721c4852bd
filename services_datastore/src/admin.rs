//! Fabric administrator list

use crate::datastore::Datastore;
use crate::error::DatastoreError;
use core_types::NodeId;
use identity::SessionContext;
use services_logger::AuditEvent;
use services_policy_store::{AdminEntry, AdminUpdate};

impl Datastore {
    /// Adds an administrator
    ///
    /// At most one anchor administrator exists and it always sits at index 0.
    pub fn add_admin(&self, session: &SessionContext, admin: AdminEntry) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        let node = admin.node_id;
        let anchor = admin.is_anchor();
        self.store().update(|draft| draft.add_admin(admin))?;
        self.audit()
            .record(self.now(), AuditEvent::AdminAdded { node, anchor });
        Ok(())
    }

    pub fn update_admin(
        &self,
        session: &SessionContext,
        node: NodeId,
        update: AdminUpdate,
    ) -> Result<(), DatastoreError> {
        self.authorize(session)?;
        self.store().update(|draft| draft.update_admin(node, update))?;
        self.audit().record(self.now(), AuditEvent::AdminUpdated { node });
        Ok(())
    }

    pub fn remove_admin(
        &self,
        session: &SessionContext,
        node: NodeId,
    ) -> Result<AdminEntry, DatastoreError> {
        self.authorize(session)?;
        let removed = self.store().update(|draft| draft.remove_admin(node))?;
        self.audit().record(self.now(), AuditEvent::AdminRemoved { node });
        Ok(removed)
    }
}
