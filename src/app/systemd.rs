// Handles all interactions with the `systemctl` and `journalctl` commands.

use super::model::{ActiveState, EnabledState, LoadState, LogLine, Unit, Verb};
use crate::error::ManagerError;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const MAX_UNIT_NAME_LEN: usize = 256;

/// Which service manager instance to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerScope {
    #[default]
    System,
    User,
}

/// The process boundary to the host service manager.
///
/// Every call is a separate, timeout-bounded invocation. Implementations
/// never retry; callers decide whether to try again.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn list_units(&self) -> Result<Vec<Unit>, ManagerError>;

    async fn control_unit(&self, name: &str, verb: Verb) -> Result<(), ManagerError>;

    async fn fetch_logs(&self, name: &str, line_limit: usize) -> Result<Vec<LogLine>, ManagerError>;

    async fn fetch_status(&self, name: &str) -> Result<String, ManagerError>;
}

/// The fixed set of invocations this client is allowed to make.
#[derive(Debug, Clone, Copy)]
enum Subcommand<'a> {
    ListUnits,
    ListUnitFiles,
    Status(&'a str),
    Control(Verb, &'a str),
    Logs(&'a str, usize),
}

/// `ServiceManager` backed by systemd's command line tools.
#[derive(Debug, Clone)]
pub struct Systemctl {
    systemctl: String,
    journalctl: String,
    elevate_with: Option<String>,
    scope: ManagerScope,
    timeout: Duration,
}

impl Systemctl {
    pub fn new(timeout: Duration) -> Self {
        Self {
            systemctl: "systemctl".to_string(),
            journalctl: "journalctl".to_string(),
            elevate_with: None,
            scope: ManagerScope::System,
            timeout,
        }
    }

    pub fn with_scope(mut self, scope: ManagerScope) -> Self {
        self.scope = scope;
        self
    }

    /// Prefix control and log invocations with `<program> -n`.
    pub fn with_elevation(mut self, program: Option<String>) -> Self {
        self.elevate_with = program;
        self
    }

    pub fn with_programs(mut self, systemctl: impl Into<String>, journalctl: impl Into<String>) -> Self {
        self.systemctl = systemctl.into();
        self.journalctl = journalctl.into();
        self
    }

    fn argv(&self, subcommand: Subcommand<'_>) -> Vec<String> {
        let mut argv = Vec::new();

        let elevated = matches!(subcommand, Subcommand::Control(..) | Subcommand::Logs(..));
        if let (true, ManagerScope::System, Some(program)) =
            (elevated, self.scope, self.elevate_with.as_ref())
        {
            // Non-interactive: the terminal belongs to the UI, so a password
            // prompt must fail instead of hanging until the timeout.
            argv.push(program.clone());
            argv.push("-n".to_string());
        }

        let user = self.scope == ManagerScope::User;
        match subcommand {
            Subcommand::ListUnits => {
                argv.push(self.systemctl.clone());
                if user {
                    argv.push("--user".to_string());
                }
                argv.extend(
                    ["list-units", "--type=service", "--all", "--output=json", "--no-pager"]
                        .map(String::from),
                );
            }
            Subcommand::ListUnitFiles => {
                argv.push(self.systemctl.clone());
                if user {
                    argv.push("--user".to_string());
                }
                argv.extend(
                    ["list-unit-files", "--type=service", "--output=json", "--no-pager"]
                        .map(String::from),
                );
            }
            Subcommand::Status(name) => {
                argv.push(self.systemctl.clone());
                if user {
                    argv.push("--user".to_string());
                }
                argv.extend(["status", "--no-pager", "--"].map(String::from));
                argv.push(name.to_string());
            }
            Subcommand::Control(verb, name) => {
                argv.push(self.systemctl.clone());
                if user {
                    argv.push("--user".to_string());
                }
                argv.push(verb.as_str().to_string());
                argv.push("--".to_string());
                argv.push(name.to_string());
            }
            Subcommand::Logs(name, lines) => {
                argv.push(self.journalctl.clone());
                if user {
                    argv.push(format!("--user-unit={name}"));
                } else {
                    argv.push(format!("--unit={name}"));
                }
                argv.push("-n".to_string());
                argv.push(lines.to_string());
                argv.extend(["--output=json", "--no-pager"].map(String::from));
            }
        }
        argv
    }

    async fn invoke(&self, subcommand: Subcommand<'_>) -> Result<Output, ManagerError> {
        run_bounded(&self.argv(subcommand), self.timeout).await
    }

    async fn unit_file_states(&self) -> Result<HashMap<String, EnabledState>, ManagerError> {
        let output = self.invoke(Subcommand::ListUnitFiles).await?;
        if !output.status.success() {
            return Err(classify_failure(&output));
        }
        parse_unit_files(&output.stdout)
    }

    async fn listed_units(&self) -> Result<Vec<ListedUnit>, ManagerError> {
        let output = self.invoke(Subcommand::ListUnits).await?;
        if !output.status.success() {
            return Err(classify_failure(&output));
        }
        parse_json(&output.stdout, "list-units")
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn list_units(&self) -> Result<Vec<Unit>, ManagerError> {
        let (listed, files) = tokio::try_join!(self.listed_units(), self.unit_file_states())?;
        Ok(join_units(listed, &files, Local::now()))
    }

    async fn control_unit(&self, name: &str, verb: Verb) -> Result<(), ManagerError> {
        validate_unit_name(name)?;
        let output = self.invoke(Subcommand::Control(verb, name)).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(classify_failure(&output))
        }
    }

    async fn fetch_logs(&self, name: &str, line_limit: usize) -> Result<Vec<LogLine>, ManagerError> {
        validate_unit_name(name)?;
        let output = self.invoke(Subcommand::Logs(name, line_limit)).await?;
        if !output.status.success() {
            return Err(classify_failure(&output));
        }
        parse_journal(&output.stdout)
    }

    async fn fetch_status(&self, name: &str) -> Result<String, ManagerError> {
        validate_unit_name(name)?;
        let output = self.invoke(Subcommand::Status(name)).await?;
        // systemctl status uses exit codes 1..=3 to describe the unit's state.
        match output.status.code() {
            Some(0..=3) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            _ => Err(classify_failure(&output)),
        }
    }
}

/// Runs one external command, killing it if it outlives `timeout`.
pub(crate) async fn run_bounded(argv: &[String], timeout: Duration) -> Result<Output, ManagerError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ManagerError::Unknown("empty command line".to_string()))?;

    debug!(command = %argv.join(" "), "invoking service manager");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("LC_ALL", "C")
        .env("SYSTEMD_COLORS", "0")
        .env("SYSTEMD_PAGER", "")
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            warn!(command = %argv.join(" "), ?timeout, "service manager call timed out");
            Err(ManagerError::Timeout(timeout))
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
            Err(ManagerError::ManagerUnavailable(format!("{program} not found")))
        }
        Ok(Err(e)) => Err(ManagerError::Unknown(format!("failed to run {program}: {e}"))),
        Ok(Ok(output)) => Ok(output),
    }
}

/// Rejects names that could be read as options or split into several
/// arguments.
pub fn validate_unit_name(name: &str) -> Result<(), ManagerError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_UNIT_NAME_LEN
        && !name.starts_with('-')
        && !name.chars().any(|c| c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(ManagerError::NotFound(name.to_string()))
    }
}

const PERMISSION_MARKERS: [&str; 6] = [
    "access denied",
    "interactive authentication required",
    "permission denied",
    "a password is required",
    "not in the sudoers",
    "authentication is required",
];

// Checked before the not-found markers: `sudo: systemctl: command not found`
// is a missing manager, not a missing unit.
const UNAVAILABLE_MARKERS: [&str; 4] = [
    "not been booted with systemd",
    "failed to connect to bus",
    "failed to connect to user scope bus",
    "command not found",
];

const NOT_FOUND_MARKERS: [&str; 4] = ["not loaded", "not found", "could not be found", "does not exist"];

/// Maps a failed invocation onto the error taxonomy using its diagnostics.
fn classify_failure(output: &Output) -> ManagerError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("exited with {}", output.status));
    let lower = stderr.to_lowercase();

    if UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        ManagerError::ManagerUnavailable(detail)
    } else if PERMISSION_MARKERS.iter().any(|m| lower.contains(m)) {
        ManagerError::PermissionDenied(detail)
    } else if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        ManagerError::NotFound(detail)
    } else {
        ManagerError::Unknown(detail)
    }
}

#[derive(Debug, Deserialize)]
struct ListedUnit {
    unit: String,
    load: LoadState,
    active: ActiveState,
    sub: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ListedUnitFile {
    unit_file: String,
    state: String,
}

fn parse_json<T: serde::de::DeserializeOwned>(stdout: &[u8], what: &str) -> Result<T, ManagerError> {
    serde_json::from_slice(stdout).map_err(|e| ManagerError::ParseFailure(format!("{what}: {e}")))
}

fn parse_unit_files(stdout: &[u8]) -> Result<HashMap<String, EnabledState>, ManagerError> {
    let files: Vec<ListedUnitFile> = parse_json(stdout, "list-unit-files")?;
    Ok(files
        .into_iter()
        .map(|f| (f.unit_file, EnabledState::from_unit_file_state(&f.state)))
        .collect())
}

/// Instances such as `getty@tty1.service` have no unit file of their own;
/// they inherit the state of their template.
fn enabled_state_for(name: &str, files: &HashMap<String, EnabledState>) -> EnabledState {
    if let Some(state) = files.get(name) {
        return *state;
    }
    match (name.split_once('@'), name.rsplit_once('.')) {
        (Some((prefix, _)), Some((_, suffix))) => files
            .get(&format!("{prefix}@.{suffix}"))
            .copied()
            .unwrap_or_default(),
        _ => EnabledState::Unknown,
    }
}

fn join_units(
    listed: Vec<ListedUnit>,
    files: &HashMap<String, EnabledState>,
    now: DateTime<Local>,
) -> Vec<Unit> {
    listed
        .into_iter()
        .map(|l| Unit {
            enabled_state: enabled_state_for(&l.unit, files),
            name: l.unit,
            description: l.description,
            load_state: l.load,
            active_state: l.active,
            sub_state: l.sub,
            last_refreshed_at: now,
        })
        .collect()
}

/// Parses `journalctl --output=json`: one JSON object per line.
fn parse_journal(stdout: &[u8]) -> Result<Vec<LogLine>, ManagerError> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_journal_entry)
        .collect()
}

fn parse_journal_entry(line: &str) -> Result<LogLine, ManagerError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ManagerError::ParseFailure(format!("journal entry: {e}")))?;
    let entry = value
        .as_object()
        .ok_or_else(|| ManagerError::ParseFailure("journal entry is not an object".to_string()))?;

    let timestamp = entry
        .get("__REALTIME_TIMESTAMP")
        .and_then(Value::as_str)
        .and_then(|micros| micros.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_micros)
        .map(|ts| ts.with_timezone(&Local));

    let priority = entry
        .get("PRIORITY")
        .and_then(Value::as_str)
        .and_then(|p| p.parse::<u8>().ok());

    let message = match entry.get("MESSAGE") {
        Some(Value::String(text)) => text.clone(),
        // Non-UTF-8 messages are emitted as byte arrays.
        Some(Value::Array(bytes)) => {
            let bytes: Vec<u8> = bytes
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|b| u8::try_from(b).ok())
                .collect();
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Some(Value::Null) | None => String::new(),
        Some(other) => {
            return Err(ManagerError::ParseFailure(format!("unexpected MESSAGE field: {other}")));
        }
    };

    Ok(LogLine { timestamp, priority, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    const UNITS_JSON: &str = r#"[
        {"unit":"nginx.service","load":"loaded","active":"inactive","sub":"dead","description":"A high performance web server"},
        {"unit":"getty@tty1.service","load":"loaded","active":"active","sub":"running","description":"Getty on tty1"},
        {"unit":"ghost.service","load":"not-found","active":"inactive","sub":"dead","description":"ghost.service"}
    ]"#;

    const FILES_JSON: &str = r#"[
        {"unit_file":"nginx.service","state":"disabled","preset":"enabled"},
        {"unit_file":"getty@.service","state":"enabled","preset":"enabled"}
    ]"#;

    fn parse_units(units_json: &[u8], files_json: &[u8], now: DateTime<Local>) -> Result<Vec<Unit>, ManagerError> {
        let listed: Vec<ListedUnit> = parse_json(units_json, "list-units")?;
        let files = parse_unit_files(files_json)?;
        Ok(join_units(listed, &files, now))
    }

    fn failed_output(code: i32, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_parse_units_joins_enabled_state() {
        let now = Local::now();
        let units = parse_units(UNITS_JSON.as_bytes(), FILES_JSON.as_bytes(), now).unwrap();

        assert_eq!(units.len(), 3);
        assert_eq!(units[0].name, "nginx.service");
        assert_eq!(units[0].active_state, ActiveState::Inactive);
        assert_eq!(units[0].enabled_state, EnabledState::Disabled);
        assert_eq!(units[0].description, "A high performance web server");
        assert_eq!(units[1].enabled_state, EnabledState::Enabled);
        assert_eq!(units[2].load_state, LoadState::NotFound);
        assert_eq!(units[2].enabled_state, EnabledState::Unknown);
        assert!(units.iter().all(|u| u.last_refreshed_at == now));
    }

    #[test]
    fn test_unknown_active_state_is_a_parse_failure() {
        let json = r#"[{"unit":"x.service","load":"loaded","active":"sleeping","sub":"dead","description":""}]"#;
        let err = parse_units(json.as_bytes(), b"[]", Local::now()).unwrap_err();
        assert!(matches!(err, ManagerError::ParseFailure(_)));
    }

    #[test]
    fn test_free_text_output_is_a_parse_failure() {
        let text = "nginx.service loaded active running A high performance web server\n";
        let err = parse_units(text.as_bytes(), b"[]", Local::now()).unwrap_err();
        assert!(matches!(err, ManagerError::ParseFailure(msg) if msg.starts_with("list-units")));
    }

    #[test]
    fn test_missing_description_defaults_to_empty() {
        let json = r#"[{"unit":"x.service","load":"loaded","active":"active","sub":"exited"}]"#;
        let units = parse_units(json.as_bytes(), b"[]", Local::now()).unwrap();
        assert_eq!(units[0].description, "");
    }

    #[test]
    fn test_parse_journal_entries() {
        let out = concat!(
            r#"{"__REALTIME_TIMESTAMP":"1700000000000000","PRIORITY":"6","MESSAGE":"Started nginx."}"#,
            "\n\n",
            r#"{"PRIORITY":"3","MESSAGE":[104,105,255]}"#,
            "\n",
            r#"{"MESSAGE":null}"#,
            "\n"
        );
        let lines = parse_journal(out.as_bytes()).unwrap();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].message, "Started nginx.");
        assert_eq!(lines[0].priority, Some(6));
        assert_eq!(lines[0].timestamp.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(lines[1].message, "hi\u{fffd}");
        assert_eq!(lines[1].timestamp, None);
        assert_eq!(lines[2].message, "");
    }

    #[test]
    fn test_malformed_journal_line_is_a_parse_failure() {
        let err = parse_journal(b"-- No entries --\n").unwrap_err();
        assert!(matches!(err, ManagerError::ParseFailure(_)));
    }

    #[test]
    fn test_classify_failure() {
        let denied = failed_output(1, "Failed to start nginx.service: Access denied\nSee system logs.\n");
        assert_eq!(
            classify_failure(&denied),
            ManagerError::PermissionDenied("Failed to start nginx.service: Access denied".into())
        );

        let sudo = failed_output(1, "sudo: a password is required\n");
        assert!(matches!(classify_failure(&sudo), ManagerError::PermissionDenied(_)));

        let missing = failed_output(5, "Failed to start nope.service: Unit nope.service not found.\n");
        assert!(matches!(classify_failure(&missing), ManagerError::NotFound(_)));

        let no_bus = failed_output(1, "Failed to connect to bus: No such file or directory\n");
        assert!(matches!(classify_failure(&no_bus), ManagerError::ManagerUnavailable(_)));

        let other = failed_output(1, "Job for x.service failed because the control process exited.\n");
        assert!(matches!(classify_failure(&other), ManagerError::Unknown(_)));

        let no_program = failed_output(1, "sudo: systemctl: command not found\n");
        assert_eq!(
            classify_failure(&no_program),
            ManagerError::ManagerUnavailable("sudo: systemctl: command not found".into())
        );

        let silent = failed_output(3, "");
        assert!(matches!(classify_failure(&silent), ManagerError::Unknown(msg) if msg.contains("exit status: 3")));
    }

    #[test]
    fn test_validate_unit_name() {
        assert!(validate_unit_name("nginx.service").is_ok());
        assert!(validate_unit_name("getty@tty1.service").is_ok());
        assert!(validate_unit_name("").is_err());
        assert!(validate_unit_name("--now").is_err());
        assert!(validate_unit_name("a.service b.service").is_err());
        assert!(validate_unit_name("a\nb").is_err());
        assert!(validate_unit_name(&"x".repeat(300)).is_err());
    }

    #[test]
    fn test_control_argv_is_elevated_and_terminated() {
        let client = Systemctl::new(Duration::from_secs(5)).with_elevation(Some("sudo".into()));
        assert_eq!(
            client.argv(Subcommand::Control(Verb::Stop, "sshd.service")),
            vec!["sudo", "-n", "systemctl", "stop", "--", "sshd.service"]
        );
        assert_eq!(
            client.argv(Subcommand::ListUnits),
            vec!["systemctl", "list-units", "--type=service", "--all", "--output=json", "--no-pager"]
        );
        assert_eq!(
            client.argv(Subcommand::Logs("sshd.service", 50)),
            vec!["sudo", "-n", "journalctl", "--unit=sshd.service", "-n", "50", "--output=json", "--no-pager"]
        );
    }

    #[test]
    fn test_user_scope_never_elevates() {
        let client = Systemctl::new(Duration::from_secs(5))
            .with_scope(ManagerScope::User)
            .with_elevation(Some("sudo".into()));
        assert_eq!(
            client.argv(Subcommand::Control(Verb::Enable, "syncthing.service")),
            vec!["systemctl", "--user", "enable", "--", "syncthing.service"]
        );
        assert_eq!(
            client.argv(Subcommand::Logs("syncthing.service", 10)),
            vec!["journalctl", "--user-unit=syncthing.service", "-n", "10", "--output=json", "--no-pager"]
        );
    }

    #[tokio::test]
    async fn test_run_bounded_times_out() {
        let argv = vec!["sleep".to_string(), "5".to_string()];
        let err = run_bounded(&argv, Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, ManagerError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_missing_program_is_manager_unavailable() {
        let client = Systemctl::new(Duration::from_secs(5))
            .with_programs("/nonexistent/systemctl", "/nonexistent/journalctl");
        let err = client.list_units().await.unwrap_err();
        assert!(matches!(err, ManagerError::ManagerUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_name_never_reaches_the_process() {
        let client = Systemctl::new(Duration::from_secs(5)).with_programs("/nonexistent/systemctl", "journalctl");
        let err = client.control_unit("--force", Verb::Stop).await.unwrap_err();
        assert_eq!(err, ManagerError::NotFound("--force".into()));
    }

    #[tokio::test]
    async fn test_output_is_captured() {
        let argv = vec!["sh".to_string(), "-c".to_string(), "echo out; echo err >&2; exit 1".to_string()];
        let output = run_bounded(&argv, Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.stdout, b"out\n");
        assert!(!output.status.success());
        assert_eq!(classify_failure(&output), ManagerError::Unknown("err".into()));
    }
}
