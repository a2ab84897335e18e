// Messages flowing into and out of the coordination context.

use super::model::{LogLine, Unit, Verb};
use super::systemd::ServiceManager;
use crate::error::ManagerError;

/// Operator intents, already resolved from key events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Refresh,
    ToggleScope,
    SetSearchTerm(String),
    Select(String),
    RequestAction(String, Verb),
    ConfirmAction,
    CancelAction,
    ViewLogs(String),
    ViewStatus(String),
    CloseOverlay,
    Quit,
}

/// Work the coordination context asks to run outside itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ListUnits { seq: u64 },
    Control { id: u64, unit_name: String, verb: Verb },
    FetchLogs { seq: u64, unit_name: String, line_limit: usize },
    FetchStatus { seq: u64, unit_name: String },
}

/// The result of an `Effect`, delivered back to the coordination context.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Refreshed { seq: u64, result: Result<Vec<Unit>, ManagerError> },
    Controlled { id: u64, result: Result<(), ManagerError> },
    Logs { seq: u64, unit_name: String, result: Result<Vec<LogLine>, ManagerError> },
    Status { seq: u64, unit_name: String, result: Result<String, ManagerError> },
}

impl Effect {
    pub async fn perform(self, manager: &dyn ServiceManager) -> Completion {
        match self {
            Effect::ListUnits { seq } => Completion::Refreshed {
                seq,
                result: manager.list_units().await,
            },
            Effect::Control { id, unit_name, verb } => Completion::Controlled {
                id,
                result: manager.control_unit(&unit_name, verb).await,
            },
            Effect::FetchLogs { seq, unit_name, line_limit } => {
                let result = manager.fetch_logs(&unit_name, line_limit).await;
                Completion::Logs { seq, unit_name, result }
            }
            Effect::FetchStatus { seq, unit_name } => {
                let result = manager.fetch_status(&unit_name).await;
                Completion::Status { seq, unit_name, result }
            }
        }
    }
}
