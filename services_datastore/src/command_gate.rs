//! Joint fabric commissioning commands that only make sense over CASE

use crate::datastore::Datastore;
use crate::error::DatastoreError;
use core_types::FabricIndex;
use identity::{AuthMode, SessionContext};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointFabricCommand {
    IcacCsrRequest,
    AddIcac,
    RequestCommissioningApproval,
    CommissionNode,
    OpenJointCommissioningWindow {
        administrator_fabric_index: FabricIndex,
    },
}

impl fmt::Display for JointFabricCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JointFabricCommand::IcacCsrRequest => write!(f, "ICACCSRRequest"),
            JointFabricCommand::AddIcac => write!(f, "AddICAC"),
            JointFabricCommand::RequestCommissioningApproval => {
                write!(f, "RequestCommissioningApproval")
            }
            JointFabricCommand::CommissionNode => write!(f, "CommissionNode"),
            JointFabricCommand::OpenJointCommissioningWindow { .. } => {
                write!(f, "OpenJointCommissioningWindow")
            }
        }
    }
}

impl Datastore {
    /// Checks whether `command` may run on behalf of `session`
    ///
    /// Session type and arguments are checked before authorization, so a
    /// PASE commissioner gets the command-specific status rather than a
    /// grant.
    pub fn check_command(
        &self,
        session: &SessionContext,
        command: JointFabricCommand,
    ) -> Result<(), DatastoreError> {
        let over_case = session.auth_mode() == AuthMode::Case;
        match command {
            JointFabricCommand::IcacCsrRequest | JointFabricCommand::AddIcac if !over_case => {
                return Err(DatastoreError::InvalidCommand(format!(
                    "{} requires a CASE session",
                    command
                )));
            }
            JointFabricCommand::RequestCommissioningApproval | JointFabricCommand::CommissionNode
                if !over_case =>
            {
                return Err(DatastoreError::UnsupportedAccess(session.auth_mode()));
            }
            JointFabricCommand::OpenJointCommissioningWindow {
                administrator_fabric_index,
            } if !administrator_fabric_index.is_assigned() => {
                return Err(DatastoreError::InvalidAdministratorFabricIndex);
            }
            _ => {}
        }
        self.authorize(session)?;
        debug!(session = %session.id(), %command, "command accepted");
        Ok(())
    }
}
