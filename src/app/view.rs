// The read-only picture of the core handed to the renderer.

use super::actions::PendingAction;
use super::filter::FilterState;
use super::model::{LogLine, Unit};
use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub message: String,
    pub severity: Severity,
}

impl StatusLine {
    pub fn info(message: impl Into<String>) -> Self {
        Self { message: message.into(), severity: Severity::Info }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { message: message.into(), severity: Severity::Warning }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { message: message.into(), severity: Severity::Error }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    Loading { title: String },
    Logs { unit_name: String, lines: Vec<LogLine> },
    Status { unit_name: String, text: String },
}

/// Totals over the whole registry, independent of the filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub total: usize,
    pub active: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    pub units: Vec<Unit>,
    pub selected: Option<String>,
    pub confirmation: Option<PendingAction>,
    pub running: Vec<PendingAction>,
    pub status: Option<StatusLine>,
    pub refresh_error: Option<String>,
    pub filter: FilterState,
    pub counts: Counts,
    pub refreshing: bool,
    pub last_refreshed_at: Option<DateTime<Local>>,
    pub overlay: Option<Overlay>,
}

impl ViewModel {
    pub fn selected_index(&self) -> Option<usize> {
        let selected = self.selected.as_deref()?;
        self.units.iter().position(|u| u.name == selected)
    }

    pub fn selected_unit(&self) -> Option<&Unit> {
        self.selected_index().map(|i| &self.units[i])
    }

    pub fn is_running(&self, unit_name: &str) -> bool {
        self.running.iter().any(|a| a.unit_name == unit_name)
    }
}
