// Error taxonomy shared by the service manager client and the action coordinator.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single call across the process boundary to the service manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("unexpected output from service manager: {0}")]
    ParseFailure(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("service manager unavailable: {0}")]
    ManagerUnavailable(String),

    #[error("unit not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Unknown(String),
}

impl ManagerError {
    /// Short label used on the status line.
    pub fn kind(&self) -> &'static str {
        match self {
            ManagerError::Timeout(_) => "timeout",
            ManagerError::ParseFailure(_) => "parse failure",
            ManagerError::PermissionDenied(_) => "permission denied",
            ManagerError::ManagerUnavailable(_) => "manager unavailable",
            ManagerError::NotFound(_) => "not found",
            ManagerError::Unknown(_) => "error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("an action on {0} is already in progress")]
    AlreadyInProgress(String),

    #[error(transparent)]
    Rejected(#[from] ManagerError),
}
