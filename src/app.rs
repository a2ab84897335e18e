// The central application controller and event loop.

use anyhow::{Context, Result, bail};
use crossterm::event::{Event, EventStream};
use futures::StreamExt;
use ratatui::{DefaultTerminal, widgets::ListState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub mod actions;
pub mod filter;
pub mod intent;
pub mod keys;
pub mod model;
pub mod refresh;
pub mod registry;
pub mod systemd;
pub mod ui;
pub mod view;

#[cfg(test)]
mod fake;

use crate::config::Config;
use crate::error::{ActionError, ManagerError};
use actions::{ActionCoordinator, ActionState, ControlJob, ControlOutcome, PendingAction, Requested};
use filter::FilterState;
use intent::{Completion, Effect, Intent};
use keys::KeyMapper;
use model::ActiveState;
use refresh::{RefreshOutcome, RefreshScheduler, Trigger};
use registry::UnitRegistry;
use systemd::ServiceManager;
use view::{Counts, Overlay, StatusLine, ViewModel};

/// Owns every piece of mutable state. All mutation happens on the task that
/// runs `App::run`; manager calls run elsewhere and report back as
/// `Completion`s.
pub struct App {
    manager: Arc<dyn ServiceManager>,
    registry: UnitRegistry,
    filter: FilterState,
    selected: Option<String>,
    actions: ActionCoordinator,
    scheduler: RefreshScheduler,
    status: Option<StatusLine>,
    refresh_error: Option<String>,
    overlay: Option<Overlay>,
    overlay_seq: u64,
    log_lines: usize,
    should_quit: bool,
}

impl App {
    pub fn new(manager: Arc<dyn ServiceManager>, config: &Config) -> Self {
        // Give the client's own timeout a head start before abandoning a call.
        let deadline = config.command_timeout.saturating_add(config.command_timeout / 2);
        Self {
            manager,
            registry: UnitRegistry::new(),
            filter: FilterState::default(),
            selected: None,
            actions: ActionCoordinator::new(config.privileged, deadline),
            scheduler: RefreshScheduler::new(config.refresh_interval, deadline),
            status: None,
            refresh_error: None,
            overlay: None,
            overlay_seq: 0,
            log_lines: config.log_lines,
            should_quit: false,
        }
    }

    /// Performs the first enumeration. An unreachable service manager is
    /// fatal; any other failure leaves an empty table and a status message.
    pub async fn start(&mut self) -> Result<()> {
        let Some(seq) = self.scheduler.refresh_now(Trigger::Manual) else {
            return Ok(());
        };
        let result = self.manager.list_units().await;
        if let Err(ManagerError::ManagerUnavailable(reason)) = &result {
            bail!("cannot reach the service manager: {reason}");
        }
        self.complete(Completion::Refreshed { seq, result });
        Ok(())
    }

    pub async fn run(mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut events = EventStream::new();
        let mut keys = KeyMapper::default();
        let mut list_state = ListState::default();

        let mut ticker = tokio::time::interval(self.scheduler.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately and `start` has just refreshed.
        ticker.tick().await;

        loop {
            let view = self.view();
            terminal
                .draw(|f| ui::render(f, &view, &mut list_state, keys.is_searching()))
                .context("Failed to draw frame")?;

            let effects = tokio::select! {
                _ = ticker.tick() => self.tick(),
                Some(done) = rx.recv() => self.complete(done),
                event = events.next() => match event {
                    Some(Ok(Event::Key(key))) => match keys.resolve(key, &view) {
                        Some(intent) => self.on_intent(intent),
                        None => Vec::new(),
                    },
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(e)) => return Err(e).context("Failed to read terminal input"),
                    None => return Ok(()),
                },
            };
            dispatch(&self.manager, effects, &tx);

            if self.should_quit {
                info!("quitting");
                return Ok(());
            }
        }
    }

    /// Handles an intent, putting any rejection on the status line.
    fn on_intent(&mut self, intent: Intent) -> Vec<Effect> {
        match self.handle(intent) {
            Ok(effects) => effects,
            Err(err) => {
                self.status = Some(StatusLine::error(describe_action_error(&err)));
                Vec::new()
            }
        }
    }

    pub fn handle(&mut self, intent: Intent) -> Result<Vec<Effect>, ActionError> {
        debug!(?intent, "handling intent");
        let mut effects = Vec::new();

        match intent {
            Intent::Refresh => {
                if let Some(seq) = self.scheduler.refresh_now(Trigger::Manual) {
                    effects.push(Effect::ListUnits { seq });
                }
            }

            Intent::ToggleScope => {
                self.filter.scope = self.filter.scope.toggle();
                self.reconcile_selection();
            }

            Intent::SetSearchTerm(term) => {
                self.filter.search_term = term;
                self.reconcile_selection();
            }

            Intent::Select(name) => {
                if self.registry.snapshot().contains(&name) {
                    self.selected = Some(name);
                    self.reconcile_selection();
                }
            }

            Intent::RequestAction(name, verb) => {
                let snapshot = self.registry.snapshot();
                match self.actions.request(&name, verb, &snapshot)? {
                    Requested::NeedsConfirmation => self.status = None,
                    Requested::Run(job) => effects.push(self.launch(job)),
                }
            }

            Intent::ConfirmAction => {
                let snapshot = self.registry.snapshot();
                if let Some(job) = self.actions.confirm(&snapshot)? {
                    effects.push(self.launch(job));
                }
            }

            Intent::CancelAction => {
                if let Some(action) = self.actions.cancel() {
                    self.status = Some(StatusLine::warning(format!(
                        "{} of {} cancelled",
                        action.verb, action.unit_name
                    )));
                }
            }

            Intent::ViewLogs(name) => {
                self.require_known(&name)?;
                let seq = self.open_overlay(format!(" Logs: {name} "));
                effects.push(Effect::FetchLogs { seq, unit_name: name, line_limit: self.log_lines });
            }

            Intent::ViewStatus(name) => {
                self.require_known(&name)?;
                let seq = self.open_overlay(format!(" Status: {name} "));
                effects.push(Effect::FetchStatus { seq, unit_name: name });
            }

            Intent::CloseOverlay => {
                self.overlay_seq += 1;
                self.overlay = None;
            }

            Intent::Quit => self.should_quit = true,
        }

        Ok(effects)
    }

    pub fn complete(&mut self, completion: Completion) -> Vec<Effect> {
        let mut effects = Vec::new();

        match completion {
            Completion::Refreshed { seq, result } => {
                match self.scheduler.complete(seq, result, &mut self.registry) {
                    RefreshOutcome::Stale => return effects,
                    RefreshOutcome::Replaced { units } => {
                        debug!(units, "refresh applied");
                        self.refresh_error = None;
                        for action in self.actions.refresh_observed(seq) {
                            self.report(&action);
                        }
                    }
                    // Settling actions stay busy until a refresh succeeds.
                    RefreshOutcome::Failed(err) => {
                        self.refresh_error = Some(format!("refresh failed: {err}"));
                    }
                }
                if let Some(seq) = self.scheduler.owed_refresh() {
                    effects.push(Effect::ListUnits { seq });
                }
                self.reconcile_selection();
            }

            Completion::Controlled { id, result } => {
                let settle_after = self.scheduler.upcoming_seq();
                match self.actions.control_finished(id, result, settle_after) {
                    ControlOutcome::Settling { unit_name, verb } => {
                        debug!(unit = %unit_name, %verb, settle_after, "control call succeeded, refreshing");
                        if let Some(seq) = self.scheduler.refresh_after_action() {
                            effects.push(Effect::ListUnits { seq });
                        }
                    }
                    ControlOutcome::Failed(action) => self.report(&action),
                    ControlOutcome::Stale => {}
                }
            }

            Completion::Logs { seq, unit_name, result } => {
                if seq == self.overlay_seq {
                    match result {
                        Ok(lines) => self.overlay = Some(Overlay::Logs { unit_name, lines }),
                        Err(err) => self.overlay_failed("logs", &unit_name, &err),
                    }
                }
            }

            Completion::Status { seq, unit_name, result } => {
                if seq == self.overlay_seq {
                    match result {
                        Ok(text) => self.overlay = Some(Overlay::Status { unit_name, text }),
                        Err(err) => self.overlay_failed("status", &unit_name, &err),
                    }
                }
            }
        }

        effects
    }

    /// Periodic work: expire overdue actions and schedule a refresh.
    pub fn tick(&mut self) -> Vec<Effect> {
        for action in self.actions.expire_overdue() {
            self.report(&action);
        }
        self.scheduler
            .tick()
            .map(|seq| Effect::ListUnits { seq })
            .into_iter()
            .collect()
    }

    pub fn view(&self) -> ViewModel {
        let snapshot = self.registry.snapshot();
        let units = filter::visible(&snapshot, &self.filter).into_iter().cloned().collect();
        let initial = Counts { total: snapshot.len(), ..Counts::default() };
        let counts = snapshot.iter().fold(initial, |mut counts, unit| {
            match unit.active_state {
                ActiveState::Active => counts.active += 1,
                ActiveState::Failed => counts.failed += 1,
                _ => {}
            }
            counts
        });

        ViewModel {
            units,
            selected: self.selected.clone(),
            confirmation: self.actions.awaiting_confirmation().cloned(),
            running: self.actions.running().into_iter().cloned().collect(),
            status: self.status.clone(),
            refresh_error: self.refresh_error.clone(),
            filter: self.filter.clone(),
            counts,
            refreshing: self.scheduler.is_in_flight(),
            last_refreshed_at: snapshot.refreshed_at(),
            overlay: self.overlay.clone(),
        }
    }

    fn launch(&mut self, job: ControlJob) -> Effect {
        self.status = Some(StatusLine::info(format!("{} {}...", job.verb.progressive(), job.unit_name)));
        Effect::Control { id: job.id, unit_name: job.unit_name, verb: job.verb }
    }

    fn report(&mut self, action: &PendingAction) {
        self.status = Some(match (action.state, &action.error) {
            (ActionState::Succeeded, _) => {
                StatusLine::info(format!("{}: {} succeeded", action.unit_name, action.verb))
            }
            (_, Some(err)) => StatusLine::error(format!(
                "{}: {} failed: {}",
                action.unit_name,
                action.verb,
                describe_manager_error(err)
            )),
            (state, None) => {
                warn!(unit = %action.unit_name, ?state, "reporting action without outcome");
                return;
            }
        });
    }

    fn require_known(&self, name: &str) -> Result<(), ActionError> {
        if self.registry.snapshot().contains(name) {
            Ok(())
        } else {
            Err(ManagerError::NotFound(name.to_string()).into())
        }
    }

    fn open_overlay(&mut self, title: String) -> u64 {
        self.overlay_seq += 1;
        self.overlay = Some(Overlay::Loading { title });
        self.overlay_seq
    }

    fn overlay_failed(&mut self, what: &str, unit_name: &str, err: &ManagerError) {
        warn!(unit = unit_name, kind = err.kind(), "failed to fetch {what}");
        self.overlay = None;
        self.status = Some(StatusLine::error(format!(
            "failed to get {what} for {unit_name}: {}",
            describe_manager_error(err)
        )));
    }

    /// Keeps the selection on a visible unit, preferring the current one.
    fn reconcile_selection(&mut self) {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            self.selected = None;
            return;
        }
        let visible = filter::visible(&snapshot, &self.filter);
        let still_visible = self
            .selected
            .as_deref()
            .is_some_and(|name| visible.iter().any(|u| u.name == name));
        if !still_visible {
            self.selected = visible.first().map(|u| u.name.clone());
        }
    }
}

/// Runs each effect on its own task and routes the result back.
fn dispatch(
    manager: &Arc<dyn ServiceManager>,
    effects: Vec<Effect>,
    tx: &mpsc::UnboundedSender<Completion>,
) {
    for effect in effects {
        let manager = Arc::clone(manager);
        let tx = tx.clone();
        tokio::spawn(async move {
            let done = effect.perform(manager.as_ref()).await;
            if tx.send(done).is_err() {
                debug!("event loop gone, dropping completion");
            }
        });
    }
}

fn describe_manager_error(err: &ManagerError) -> String {
    match err {
        ManagerError::PermissionDenied(_) => format!("{err} (run with --sudo to elevate)"),
        _ => err.to_string(),
    }
}

fn describe_action_error(err: &ActionError) -> String {
    match err {
        ActionError::Rejected(inner) => describe_manager_error(inner),
        ActionError::AlreadyInProgress(_) => err.to_string(),
    }
}
