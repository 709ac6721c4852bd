//! ACL and ARL commands

use crate::datastore::Datastore;
use crate::error::DatastoreError;
use core_types::{NodeId, SubjectId};
use identity::SessionContext;
use lifecycle::{RecordId, RecordIntent, RecordPayload};
use policy::{validate_ace, validate_are, AccessControlEntry, AccessRestrictionEntry, PolicyViolation};
use tracing::debug;

impl Datastore {
    /// Schedules `ace` for installation on `node`
    ///
    /// Returns `None` if the node already has exactly this entry and no
    /// removal of it is pending.
    pub fn add_acl_to_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        ace: AccessControlEntry,
    ) -> Result<Option<RecordId>, DatastoreError> {
        self.authorize(session)?;
        validate_ace(&ace)?;
        self.reject_stale_cats(&ace)?;
        self.active_node(node)?;

        let payload = RecordPayload::Acl(ace);
        if self.is_applied(node, &payload) {
            return Ok(None);
        }
        let id = self.track(node, payload, RecordIntent::Apply);
        debug!(node = %node, record = %id, "ACL entry scheduled");
        Ok(Some(id))
    }

    /// Schedules removal of `ace` from `node`
    pub fn remove_acl_from_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        ace: AccessControlEntry,
    ) -> Result<RecordId, DatastoreError> {
        self.authorize(session)?;
        self.active_node(node)?;
        let committed = self
            .store()
            .snapshot()
            .policy(node)
            .map_or(false, |p| p.acl.contains(&ace));
        let payload = RecordPayload::Acl(ace);
        if !committed && !self.has_pending(node, &payload, RecordIntent::Apply) {
            return Err(DatastoreError::EntryNotFound(node));
        }
        Ok(self.track(node, payload, RecordIntent::Delete))
    }

    /// Schedules `are` for installation on `node`, replacing any entry with its ID
    pub fn add_arl_to_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        are: AccessRestrictionEntry,
    ) -> Result<Option<RecordId>, DatastoreError> {
        self.authorize(session)?;
        validate_are(&are)?;
        self.active_node(node)?;

        let payload = RecordPayload::Arl(are);
        if self.is_applied(node, &payload) {
            return Ok(None);
        }
        Ok(Some(self.track(node, payload, RecordIntent::Apply)))
    }

    pub fn remove_arl_from_node(
        &self,
        session: &SessionContext,
        node: NodeId,
        entry_id: u32,
    ) -> Result<RecordId, DatastoreError> {
        self.authorize(session)?;
        self.active_node(node)?;
        let committed = self
            .store()
            .snapshot()
            .policy(node)
            .and_then(|p| p.arl.iter().find(|are| are.entry_id == entry_id).cloned());
        let pending = || {
            self.tracker()
                .unresolved_for(node, None)
                .into_iter()
                .filter(|r| r.intent == RecordIntent::Apply)
                .find_map(|r| match r.payload {
                    RecordPayload::Arl(are) if are.entry_id == entry_id => Some(are),
                    _ => None,
                })
        };
        let are = committed
            .or_else(pending)
            .ok_or(DatastoreError::EntryNotFound(node))?;
        Ok(self.track(node, RecordPayload::Arl(are), RecordIntent::Delete))
    }

    /// Rejects entries naming a CAT older than the fleet's committed version
    fn reject_stale_cats(&self, ace: &AccessControlEntry) -> Result<(), DatastoreError> {
        let snapshot = self.store().snapshot();
        for cat in ace.subjects.iter().filter_map(SubjectId::as_cat) {
            if let Some(committed) = snapshot.cat_versions.committed(cat.identifier) {
                if cat.version < committed {
                    return Err(PolicyViolation::StaleCatVersion {
                        identifier: cat.identifier,
                        version: cat.version,
                        committed,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Returns true if `payload` is committed on `node` with no removal pending
    pub(crate) fn is_applied(&self, node: NodeId, payload: &RecordPayload) -> bool {
        let snapshot = self.store().snapshot();
        let committed = match (snapshot.policy(node), payload) {
            (Some(policy), RecordPayload::Acl(ace)) => policy.acl.contains(ace),
            (Some(policy), RecordPayload::Arl(are)) => policy.arl.contains(are),
            (Some(policy), RecordPayload::Binding(binding)) => policy.bindings.contains(binding),
            (Some(policy), RecordPayload::GroupKeySet(entry)) => policy
                .group_keys
                .get(&entry.group_id)
                .map_or(false, |k| k.key_set_id == entry.key_set_id),
            (_, RecordPayload::GroupMembership { endpoint, group }) => snapshot
                .endpoint(node, *endpoint)
                .map_or(false, |e| e.group_ids.contains(group)),
            (None, _) => false,
        };
        committed && !self.has_pending(node, payload, RecordIntent::Delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{admin_session, commissioned, datastore, fleet, NODE, PEER};
    use core_types::{CaseAuthTag, EndpointId, FabricIndex, Status};
    use identity::AuthMode;
    use lifecycle::RecordState;
    use policy::{Privilege, Target};

    fn operate(subject: impl Into<SubjectId>) -> AccessControlEntry {
        AccessControlEntry::new(FabricIndex::new(1), Privilege::Operate, AuthMode::Case)
            .with_subject(subject)
            .with_target(Target::endpoint(EndpointId::new(1)))
    }

    #[test]
    fn test_add_acl_is_pending_until_refresh() {
        let fleet = fleet(&[NODE]);
        let ds = datastore(&fleet);
        let admin = admin_session();
        commissioned(&ds, &admin, &[NODE]);

        let id = ds.add_acl_to_node(&admin, NODE, operate(PEER)).unwrap().unwrap();
        assert!(ds.acl_for(NODE).unwrap().is_empty());
        let pending = ds.pending_records(NODE);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].state, RecordState::Pending);

        ds.refresh_node(&admin, NODE).unwrap();
        assert_eq!(ds.acl_for(NODE).unwrap(), vec![operate(PEER)]);
        assert!(ds.pending_records(NODE).is_empty());
        assert_eq!(ds.add_acl_to_node(&admin, NODE, operate(PEER)).unwrap(), None);
    }

    #[test]
    fn test_administer_over_group_rejected() {
        let fleet = fleet(&[NODE]);
        let ds = datastore(&fleet);
        let admin = admin_session();
        commissioned(&ds, &admin, &[NODE]);

        let bad = AccessControlEntry::new(FabricIndex::new(1), Privilege::Administer, AuthMode::Group);
        let err = ds.add_acl_to_node(&admin, NODE, bad).unwrap_err();
        assert_eq!(err.status(), Status::ConstraintError);
        assert!(ds.pending_records(NODE).is_empty());
    }

    #[test]
    fn test_stale_cat_rejected() {
        let fleet = fleet(&[NODE]);
        let ds = datastore(&fleet);
        let admin = admin_session();
        commissioned(&ds, &admin, &[NODE]);
        ds.store()
            .update(|draft| draft.commit_cat_version(CaseAuthTag::new(0x1010, 2)))
            .unwrap();

        let err = ds
            .add_acl_to_node(&admin, NODE, operate(CaseAuthTag::new(0x1010, 1)))
            .unwrap_err();
        assert!(matches!(
            err,
            DatastoreError::Policy(PolicyViolation::StaleCatVersion { committed: 2, .. })
        ));
        assert!(ds
            .add_acl_to_node(&admin, NODE, operate(CaseAuthTag::new(0x1010, 2)))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_remove_acl() {
        let fleet = fleet(&[NODE]);
        let ds = datastore(&fleet);
        let admin = admin_session();
        commissioned(&ds, &admin, &[NODE]);

        assert_eq!(
            ds.remove_acl_from_node(&admin, NODE, operate(PEER)).unwrap_err(),
            DatastoreError::EntryNotFound(NODE)
        );
        ds.add_acl_to_node(&admin, NODE, operate(PEER)).unwrap();
        ds.refresh_node(&admin, NODE).unwrap();

        ds.remove_acl_from_node(&admin, NODE, operate(PEER)).unwrap();
        assert_eq!(ds.pending_records(NODE)[0].state, RecordState::PendingDeletion);
        assert_eq!(ds.acl_for(NODE).unwrap().len(), 1);
        ds.refresh_node(&admin, NODE).unwrap();
        assert!(ds.acl_for(NODE).unwrap().is_empty());
    }

    #[test]
    fn test_arl_add_and_remove() {
        let fleet = fleet(&[NODE]);
        let ds = datastore(&fleet);
        let admin = admin_session();
        commissioned(&ds, &admin, &[NODE]);

        let are = AccessRestrictionEntry::restricting(7).with_subject(PEER);
        ds.add_arl_to_node(&admin, NODE, are.clone()).unwrap();
        ds.refresh_node(&admin, NODE).unwrap();
        assert_eq!(ds.arl_for(NODE).unwrap(), vec![are]);

        assert_eq!(
            ds.remove_arl_from_node(&admin, NODE, 8).unwrap_err(),
            DatastoreError::EntryNotFound(NODE)
        );
        ds.remove_arl_from_node(&admin, NODE, 7).unwrap();
        ds.refresh_node(&admin, NODE).unwrap();
        assert!(ds.arl_for(NODE).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_node_not_found() {
        let fleet = fleet(&[]);
        let ds = datastore(&fleet);
        let err = ds
            .add_acl_to_node(&admin_session(), NODE, operate(PEER))
            .unwrap_err();
        assert_eq!(err.status(), Status::NotFound);
    }
}
