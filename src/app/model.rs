// Defines the core data structures for the application.

use chrono::{DateTime, Local};
use serde::Deserialize;
use std::fmt;

/// Whether the unit definition was loaded by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadState {
    Loaded,
    NotFound,
    BadSetting,
    Error,
    Masked,
    Merged,
    Stub,
}

impl LoadState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadState::Loaded => "loaded",
            LoadState::NotFound => "not-found",
            LoadState::BadSetting => "bad-setting",
            LoadState::Error => "error",
            LoadState::Masked => "masked",
            LoadState::Merged => "merged",
            LoadState::Stub => "stub",
        }
    }
}

/// Whether the unit is running, in high-level terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActiveState {
    Active,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    Reloading,
    Maintenance,
    Refreshing,
}

impl ActiveState {
    pub fn as_str(self) -> &'static str {
        match self {
            ActiveState::Active => "active",
            ActiveState::Inactive => "inactive",
            ActiveState::Failed => "failed",
            ActiveState::Activating => "activating",
            ActiveState::Deactivating => "deactivating",
            ActiveState::Reloading => "reloading",
            ActiveState::Maintenance => "maintenance",
            ActiveState::Refreshing => "refreshing",
        }
    }
}

/// Whether the unit will be started at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnabledState {
    Enabled,
    Disabled,
    Static,
    Masked,
    #[default]
    Unknown,
}

impl EnabledState {
    /// Maps a unit-file state as reported by `list-unit-files` onto the five
    /// states the UI distinguishes.
    pub fn from_unit_file_state(state: &str) -> Self {
        match state {
            "enabled" | "enabled-runtime" => EnabledState::Enabled,
            "disabled" => EnabledState::Disabled,
            "static" => EnabledState::Static,
            "masked" | "masked-runtime" => EnabledState::Masked,
            _ => EnabledState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnabledState::Enabled => "enabled",
            EnabledState::Disabled => "disabled",
            EnabledState::Static => "static",
            EnabledState::Masked => "masked",
            EnabledState::Unknown => "unknown",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(LoadState, ActiveState, EnabledState, Verb);

/// One service unit as reported by a single manager query.
///
/// `name` is the identity; every other field is replaced wholesale on each
/// refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub name: String,
    pub description: String,
    pub load_state: LoadState,
    pub active_state: ActiveState,
    pub sub_state: String, // e.g., "running", "dead", "exited"
    pub enabled_state: EnabledState,
    pub last_refreshed_at: DateTime<Local>,
}

impl Unit {
    pub fn is_active(&self) -> bool {
        self.active_state == ActiveState::Active
    }

    pub fn is_running(&self) -> bool {
        self.is_active() && self.sub_state == "running"
    }
}

/// Control operations the coordinator may issue.
///
/// Enable and disable only touch the boot-time `EnabledState`; they never
/// start or stop the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

impl Verb {
    #[cfg(test)]
    pub const ALL: [Verb; 5] = [Verb::Start, Verb::Stop, Verb::Restart, Verb::Enable, Verb::Disable];

    /// The systemctl subcommand for this verb.
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Restart => "restart",
            Verb::Enable => "enable",
            Verb::Disable => "disable",
        }
    }

    pub fn is_destructive(self) -> bool {
        matches!(self, Verb::Stop | Verb::Restart | Verb::Disable)
    }

    pub fn progressive(self) -> &'static str {
        match self {
            Verb::Start => "starting",
            Verb::Stop => "stopping",
            Verb::Restart => "restarting",
            Verb::Enable => "enabling",
            Verb::Disable => "disabling",
        }
    }
}

/// A single journal entry for a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub timestamp: Option<DateTime<Local>>,
    pub priority: Option<u8>,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "{} {}", ts.format("%b %d %H:%M:%S"), self.message),
            None => f.write_str(&self.message),
        }
    }
}
