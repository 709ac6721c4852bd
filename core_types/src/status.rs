//! Protocol status codes
//!
//! Every outcome that crosses the administrative boundary is reduced to one
//! of these codes. The split between permanent and transient codes drives the
//! sync engine's retry decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Interaction status returned by nodes and by the administrative API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure,
    NotFound,
    ConstraintError,
    AccessDenied,
    UnsupportedAccess,
    InvalidCommand,
    Busy,
    Timeout,
    InvalidAdministratorFabricIndex,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    /// Returns true for failures worth retrying
    ///
    /// Everything else is permanent: structural rejections, missing entries
    /// and access denials never succeed on a second attempt with the same
    /// payload.
    pub fn is_transient(&self) -> bool {
        matches!(self, Status::Busy | Status::Timeout)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::Failure => "FAILURE",
            Status::NotFound => "NOT_FOUND",
            Status::ConstraintError => "CONSTRAINT_ERROR",
            Status::AccessDenied => "ACCESS_DENIED",
            Status::UnsupportedAccess => "UNSUPPORTED_ACCESS",
            Status::InvalidCommand => "INVALID_COMMAND",
            Status::Busy => "BUSY",
            Status::Timeout => "TIMEOUT",
            Status::InvalidAdministratorFabricIndex => "INVALID_ADMINISTRATOR_FABRIC_INDEX",
        };
        f.write_str(name)
    }
}
