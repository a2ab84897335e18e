use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod app;
mod config;
mod error;
mod logging;

use app::App;
use app::systemd::{ServiceManager, Systemctl};
use config::{Config, Overrides};

/// Keyboard-driven view of systemd services.
#[derive(Parser, Debug)]
#[command(name = "polvon", version, about)]
struct Cli {
    /// Elevate control and log calls with `sudo -n`
    #[arg(long)]
    sudo: bool,

    /// Talk to the per-user service manager instead of the system one
    #[arg(long)]
    user: bool,

    /// Seconds before a single systemctl/journalctl call is abandoned
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Seconds between automatic refreshes
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Journal lines shown in the logs view
    #[arg(long, value_name = "N")]
    log_lines: Option<usize>,

    /// Config file (default: <config dir>/polvon/config.toml)
    #[arg(short, long, env = "POLVON_CONFIG")]
    config: Option<PathBuf>,

    /// Log file (default: <cache dir>/polvon/polvon.log)
    #[arg(long, env = "POLVON_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(
        cli.config.as_deref(),
        Overrides {
            sudo: cli.sudo,
            user: cli.user,
            timeout_secs: cli.timeout,
            refresh_interval_secs: cli.interval,
            log_lines: cli.log_lines,
        },
    )?;
    let _guard = logging::init(cli.log_file.as_deref(), cli.verbose)?;
    info!(?config, "starting");

    let manager: Arc<dyn ServiceManager> = Arc::new(
        Systemctl::new(config.command_timeout)
            .with_scope(config.scope)
            .with_elevation(config.elevation())
            .with_programs(config.systemctl.clone(), config.journalctl.clone()),
    );

    let mut app = App::new(manager, &config);
    app.start().await?;

    let mut terminal = ratatui::init();
    let result = app.run(&mut terminal).await;
    ratatui::restore();

    result.context("Terminal session failed")
}
