// Runtime configuration: built-in defaults, an optional TOML file, then CLI flags.

use crate::app::systemd::ManagerScope;
use anyhow::{Context, Result, bail, ensure};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_LOG_LINES: usize = 10_000;
const MAX_SECS: u64 = 3600;

/// Keys accepted in `config.toml`. Everything is optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub sudo: Option<bool>,
    pub user: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub refresh_interval_secs: Option<u64>,
    pub log_lines: Option<usize>,
    pub elevation_program: Option<String>,
    pub systemctl: Option<String>,
    pub journalctl: Option<String>,
}

/// Values given on the command line. Boolean flags can only switch a
/// setting on.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub sudo: bool,
    pub user: bool,
    pub timeout_secs: Option<u64>,
    pub refresh_interval_secs: Option<u64>,
    pub log_lines: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Control and log calls are elevated; non-destructive verbs skip confirmation.
    pub privileged: bool,
    pub scope: ManagerScope,
    pub command_timeout: Duration,
    pub refresh_interval: Duration,
    pub log_lines: usize,
    pub elevation_program: String,
    pub systemctl: String,
    pub journalctl: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            privileged: false,
            scope: ManagerScope::System,
            command_timeout: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(2),
            log_lines: 50,
            elevation_program: "sudo".to_string(),
            systemctl: "systemctl".to_string(),
            journalctl: "journalctl".to_string(),
        }
    }
}

impl Config {
    /// Loads the file at `path`, or the default location when `path` is
    /// `None`, and applies `overrides` on top.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let file = match path {
            Some(path) => read_file(path)?,
            None => match default_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => FileConfig::default(),
            },
        };
        Self::resolve(file, overrides)
    }

    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self> {
        let defaults = Config::default();

        let user = overrides.user || file.user.unwrap_or(false);
        let timeout_secs = overrides
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or(defaults.command_timeout.as_secs());
        let interval_secs = overrides
            .refresh_interval_secs
            .or(file.refresh_interval_secs)
            .unwrap_or(defaults.refresh_interval.as_secs());
        let log_lines = overrides.log_lines.or(file.log_lines).unwrap_or(defaults.log_lines);

        ensure!(
            (1..=MAX_SECS).contains(&timeout_secs),
            "timeout must be between 1 and {MAX_SECS} seconds, got {timeout_secs}"
        );
        ensure!(
            (1..=MAX_SECS).contains(&interval_secs),
            "refresh interval must be between 1 and {MAX_SECS} seconds, got {interval_secs}"
        );
        if !(1..=MAX_LOG_LINES).contains(&log_lines) {
            bail!("log lines must be between 1 and {MAX_LOG_LINES}, got {log_lines}");
        }

        Ok(Self {
            privileged: overrides.sudo || file.sudo.unwrap_or(false),
            scope: if user { ManagerScope::User } else { ManagerScope::System },
            command_timeout: Duration::from_secs(timeout_secs),
            refresh_interval: Duration::from_secs(interval_secs),
            log_lines,
            elevation_program: file.elevation_program.unwrap_or(defaults.elevation_program),
            systemctl: file.systemctl.unwrap_or(defaults.systemctl),
            journalctl: file.journalctl.unwrap_or(defaults.journalctl),
        })
    }

    /// The elevation prefix to hand the client, if any.
    pub fn elevation(&self) -> Option<String> {
        (self.privileged && self.scope == ManagerScope::System).then(|| self.elevation_program.clone())
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("polvon").join("config.toml"))
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config file {}", path.display()))
}
