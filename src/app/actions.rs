// Supervises control operations: confirmation, in-flight tracking, outcomes.

use super::model::Verb;
use super::registry::Snapshot;
use crate::error::{ActionError, ManagerError};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    AwaitingConfirmation,
    Running,
    Succeeded,
    Failed,
}

/// One control operation on one unit. A unit with no `PendingAction` is idle.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub id: u64,
    pub unit_name: String,
    pub verb: Verb,
    pub state: ActionState,
    pub started_at: DateTime<Local>,
    pub error: Option<ManagerError>,
}

/// A control call the caller must issue to the service manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlJob {
    pub id: u64,
    pub unit_name: String,
    pub verb: Verb,
}

#[derive(Debug, PartialEq)]
pub enum Requested {
    NeedsConfirmation,
    Run(ControlJob),
}

#[derive(Debug, PartialEq)]
pub enum ControlOutcome {
    /// The call succeeded; the action completes once a refresh that
    /// started afterwards lands.
    Settling { unit_name: String, verb: Verb },
    Failed(PendingAction),
    /// No running action matches; the result is dropped.
    Stale,
}

#[derive(Debug)]
struct Entry {
    action: PendingAction,
    since: Instant,
    // Control call returned success; waiting for a refresh with at least
    // this sequence token.
    settle_after: Option<u64>,
}

#[derive(Debug)]
pub struct ActionCoordinator {
    privileged: bool,
    deadline: Duration,
    next_id: u64,
    pending: HashMap<String, Entry>,
    awaiting: Option<String>,
}

impl ActionCoordinator {
    /// `deadline` bounds how long a control call may run before the action
    /// is failed with a timeout and its eventual result ignored.
    pub fn new(privileged: bool, deadline: Duration) -> Self {
        Self {
            privileged,
            deadline,
            next_id: 0,
            pending: HashMap::new(),
            awaiting: None,
        }
    }

    /// Destructive verbs always need confirmation; without elevated
    /// privilege every verb does.
    pub fn requires_confirmation(&self, verb: Verb) -> bool {
        verb.is_destructive() || !self.privileged
    }

    /// `None` means the unit is idle.
    #[cfg(test)]
    pub fn state_of(&self, unit_name: &str) -> Option<ActionState> {
        self.pending.get(unit_name).map(|e| e.action.state)
    }

    pub fn awaiting_confirmation(&self) -> Option<&PendingAction> {
        self.awaiting
            .as_deref()
            .and_then(|name| self.pending.get(name))
            .map(|e| &e.action)
    }

    /// Actions currently executing, ordered by unit name.
    pub fn running(&self) -> Vec<&PendingAction> {
        let mut running: Vec<&PendingAction> = self
            .pending
            .values()
            .filter(|e| e.action.state == ActionState::Running)
            .map(|e| &e.action)
            .collect();
        running.sort_by(|a, b| a.unit_name.cmp(&b.unit_name));
        running
    }

    pub fn request(
        &mut self,
        unit_name: &str,
        verb: Verb,
        snapshot: &Snapshot,
    ) -> Result<Requested, ActionError> {
        if !snapshot.contains(unit_name) {
            return Err(ManagerError::NotFound(unit_name.to_string()).into());
        }
        if self.pending.contains_key(unit_name) {
            return Err(ActionError::AlreadyInProgress(unit_name.to_string()));
        }

        self.next_id += 1;
        let action = PendingAction {
            id: self.next_id,
            unit_name: unit_name.to_string(),
            verb,
            state: ActionState::Running,
            started_at: Local::now(),
            error: None,
        };

        if self.requires_confirmation(verb) {
            if let Some(previous) = self.cancel() {
                debug!(unit = %previous.unit_name, verb = %previous.verb, "superseded unconfirmed action");
            }
            debug!(unit = unit_name, %verb, "awaiting confirmation");
            self.insert(PendingAction { state: ActionState::AwaitingConfirmation, ..action });
            self.awaiting = Some(unit_name.to_string());
            Ok(Requested::NeedsConfirmation)
        } else {
            let job = self.insert(action);
            Ok(Requested::Run(job))
        }
    }

    /// Advances the action awaiting confirmation to running. The unit must
    /// still be known to the registry.
    pub fn confirm(&mut self, snapshot: &Snapshot) -> Result<Option<ControlJob>, ActionError> {
        let Some(unit_name) = self.awaiting.take() else {
            return Ok(None);
        };
        let Some(entry) = self.pending.remove(&unit_name) else {
            return Ok(None);
        };
        if !snapshot.contains(&unit_name) {
            warn!(unit = %unit_name, "unit disappeared before confirmation");
            return Err(ManagerError::NotFound(unit_name).into());
        }

        let action = PendingAction {
            state: ActionState::Running,
            started_at: Local::now(),
            ..entry.action
        };
        Ok(Some(self.insert(action)))
    }

    /// Returns the action awaiting confirmation to idle.
    pub fn cancel(&mut self) -> Option<PendingAction> {
        let unit_name = self.awaiting.take()?;
        let entry = self.pending.remove(&unit_name)?;
        debug!(unit = %unit_name, verb = %entry.action.verb, "action cancelled");
        Some(entry.action)
    }

    /// Records the result of control call `id`. On success the action keeps
    /// the unit busy until a refresh with sequence `settle_after` or later
    /// is observed.
    pub fn control_finished(
        &mut self,
        id: u64,
        result: Result<(), ManagerError>,
        settle_after: u64,
    ) -> ControlOutcome {
        let Some((unit_name, entry)) = self.pending.iter_mut().find(|(_, e)| {
            e.action.id == id && e.action.state == ActionState::Running && e.settle_after.is_none()
        })
        else {
            debug!(id, "dropping result of a retired action");
            return ControlOutcome::Stale;
        };
        let unit_name = unit_name.clone();

        match result {
            Ok(()) => {
                entry.settle_after = Some(settle_after);
                ControlOutcome::Settling { unit_name, verb: entry.action.verb }
            }
            Err(err) => {
                let mut action = entry.action.clone();
                self.pending.remove(&unit_name);
                warn!(unit = %unit_name, verb = %action.verb, error = %err, "action failed");
                action.state = ActionState::Failed;
                action.error = Some(err);
                ControlOutcome::Failed(action)
            }
        }
    }

    /// Refresh `seq` replaced the registry: every action waiting for that
    /// refresh or an earlier one is now complete.
    pub fn refresh_observed(&mut self, seq: u64) -> Vec<PendingAction> {
        let settled: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, e)| e.settle_after.is_some_and(|after| seq >= after))
            .map(|(name, _)| name.clone())
            .collect();

        let mut done: Vec<PendingAction> = settled
            .into_iter()
            .filter_map(|name| self.pending.remove(&name))
            .map(|entry| {
                info!(unit = %entry.action.unit_name, verb = %entry.action.verb, "action succeeded");
                PendingAction { state: ActionState::Succeeded, ..entry.action }
            })
            .collect();
        done.sort_by(|a, b| a.unit_name.cmp(&b.unit_name));
        done
    }

    /// Fails running actions whose control call has outlived the deadline.
    pub fn expire_overdue(&mut self) -> Vec<PendingAction> {
        let overdue: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, e)| {
                e.action.state == ActionState::Running
                    && e.settle_after.is_none()
                    && e.since.elapsed() >= self.deadline
            })
            .map(|(name, _)| name.clone())
            .collect();

        overdue
            .into_iter()
            .filter_map(|name| self.pending.remove(&name))
            .map(|entry| {
                warn!(unit = %entry.action.unit_name, "abandoning overdue action");
                PendingAction {
                    state: ActionState::Failed,
                    error: Some(ManagerError::Timeout(self.deadline)),
                    ..entry.action
                }
            })
            .collect()
    }

    fn insert(&mut self, action: PendingAction) -> ControlJob {
        let job = ControlJob {
            id: action.id,
            unit_name: action.unit_name.clone(),
            verb: action.verb,
        };
        if action.state == ActionState::Running {
            info!(unit = %job.unit_name, verb = %job.verb, "action running");
        }
        self.pending.insert(
            action.unit_name.clone(),
            Entry { action, since: Instant::now(), settle_after: None },
        );
        job
    }
}
