// Periodic and on-demand registry refresh with single-flight semantics.

use super::model::Unit;
use super::registry::UnitRegistry;
use crate::error::ManagerError;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Tick,
    Manual,
    AfterAction,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    seq: u64,
    since: Instant,
}

/// What became of a completed enumeration.
#[derive(Debug, PartialEq)]
pub enum RefreshOutcome {
    Replaced { units: usize },
    Failed(ManagerError),
    /// The refresh was abandoned before it completed; its result is dropped.
    Stale,
}

#[derive(Debug)]
pub struct RefreshScheduler {
    interval: Duration,
    deadline: Duration,
    next_seq: u64,
    in_flight: Option<InFlight>,
    // A post-action request coalesced into a flight that began before it.
    owed: bool,
}

impl RefreshScheduler {
    /// `deadline` bounds how long an enumeration may stay in flight before
    /// it is abandoned and a fresh one may start.
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline,
            next_seq: 0,
            in_flight: None,
            owed: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Periodic refresh. Returns the sequence token of a new enumeration to
    /// issue, or `None` when one is already running.
    pub fn tick(&mut self) -> Option<u64> {
        self.begin(Trigger::Tick)
    }

    pub fn refresh_now(&mut self, trigger: Trigger) -> Option<u64> {
        self.begin(trigger)
    }

    /// The sequence token the next enumeration to start will carry. Any
    /// enumeration with a token at least this large began after now.
    pub fn upcoming_seq(&self) -> u64 {
        self.next_seq + 1
    }

    /// Like `refresh_now`, but a flight already running started too early
    /// to count, so a follow-up is owed once it completes.
    pub fn refresh_after_action(&mut self) -> Option<u64> {
        let started = self.begin(Trigger::AfterAction);
        if started.is_none() {
            self.owed = true;
        }
        started
    }

    /// Starts the follow-up owed by `refresh_after_action`, if nothing is
    /// in flight.
    pub fn owed_refresh(&mut self) -> Option<u64> {
        if self.owed && self.in_flight.is_none() {
            self.begin(Trigger::AfterAction)
        } else {
            None
        }
    }

    fn begin(&mut self, trigger: Trigger) -> Option<u64> {
        if let Some(current) = self.in_flight {
            if current.since.elapsed() < self.deadline {
                debug!(seq = current.seq, ?trigger, "refresh already in flight, coalescing");
                return None;
            }
            warn!(seq = current.seq, "abandoning overdue refresh");
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        self.owed = false;
        self.in_flight = Some(InFlight { seq, since: Instant::now() });
        debug!(seq, ?trigger, "refresh started");
        Some(seq)
    }

    /// Applies the result of enumeration `seq`. Only a successful, current
    /// enumeration touches the registry.
    pub fn complete(
        &mut self,
        seq: u64,
        result: Result<Vec<Unit>, ManagerError>,
        registry: &mut UnitRegistry,
    ) -> RefreshOutcome {
        match self.in_flight {
            Some(current) if current.seq == seq => self.in_flight = None,
            _ => {
                debug!(seq, "discarding result of abandoned refresh");
                return RefreshOutcome::Stale;
            }
        }

        match result {
            Ok(units) => {
                let count = units.len();
                registry.replace(units);
                RefreshOutcome::Replaced { units: count }
            }
            Err(err) => {
                warn!(error = %err, "refresh failed, keeping previous snapshot");
                RefreshOutcome::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::model::{ActiveState, EnabledState, LoadState};
    use chrono::Local;

    fn units(names: &[&str]) -> Vec<Unit> {
        names
            .iter()
            .map(|name| Unit {
                name: name.to_string(),
                description: String::new(),
                load_state: LoadState::Loaded,
                active_state: ActiveState::Active,
                sub_state: "running".to_string(),
                enabled_state: EnabledState::Enabled,
                last_refreshed_at: Local::now(),
            })
            .collect()
    }

    fn scheduler() -> RefreshScheduler {
        RefreshScheduler::new(Duration::from_secs(2), Duration::from_secs(11))
    }

    #[test]
    fn test_requests_during_flight_are_coalesced() {
        let mut scheduler = scheduler();
        let seq = scheduler.refresh_now(Trigger::Manual).unwrap();
        assert_eq!(scheduler.refresh_now(Trigger::Manual), None);
        assert_eq!(scheduler.tick(), None);
        assert_eq!(scheduler.refresh_now(Trigger::AfterAction), None);

        let mut registry = UnitRegistry::new();
        let outcome = scheduler.complete(seq, Ok(units(&["a.service"])), &mut registry);
        assert_eq!(outcome, RefreshOutcome::Replaced { units: 1 });
        assert!(scheduler.tick().is_some());
    }

    #[test]
    fn test_failure_keeps_previous_snapshot() {
        let mut scheduler = scheduler();
        let mut registry = UnitRegistry::new();
        let seq = scheduler.tick().unwrap();
        scheduler.complete(seq, Ok(units(&["a.service", "b.service"])), &mut registry);
        let before = registry.snapshot();

        let seq = scheduler.tick().unwrap();
        let timeout = ManagerError::Timeout(Duration::from_secs(10));
        let outcome = scheduler.complete(seq, Err(timeout.clone()), &mut registry);

        assert_eq!(outcome, RefreshOutcome::Failed(timeout));
        assert_eq!(registry.snapshot().generation(), before.generation());
        assert_eq!(registry.snapshot().len(), 2);
        // The next tick retries.
        assert!(scheduler.tick().is_some());
    }

    #[test]
    fn test_unknown_sequence_is_stale() {
        let mut scheduler = scheduler();
        let mut registry = UnitRegistry::new();
        assert_eq!(
            scheduler.complete(42, Ok(units(&["a.service"])), &mut registry),
            RefreshOutcome::Stale
        );
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_coalesced_after_action_request_owes_a_follow_up() {
        let mut scheduler = scheduler();
        let mut registry = UnitRegistry::new();
        let tick = scheduler.tick().unwrap();

        let floor = scheduler.upcoming_seq();
        assert_eq!(scheduler.refresh_after_action(), None);
        assert_eq!(scheduler.owed_refresh(), None);

        scheduler.complete(tick, Ok(units(&["a.service"])), &mut registry);
        let follow_up = scheduler.owed_refresh().unwrap();
        assert!(follow_up >= floor);
        assert_eq!(scheduler.owed_refresh(), None);

        scheduler.complete(follow_up, Ok(units(&["a.service"])), &mut registry);
        assert_eq!(scheduler.owed_refresh(), None);
    }

    #[test]
    fn test_after_action_request_starts_immediately_when_idle() {
        let mut scheduler = scheduler();
        let floor = scheduler.upcoming_seq();
        assert_eq!(scheduler.refresh_after_action(), Some(floor));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_refresh_is_abandoned_and_late_result_discarded() {
        let mut scheduler = scheduler();
        let mut registry = UnitRegistry::new();
        let first = scheduler.tick().unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(scheduler.tick(), None);

        tokio::time::advance(Duration::from_secs(7)).await;
        let second = scheduler.tick().unwrap();
        assert_ne!(first, second);

        let late = scheduler.complete(first, Ok(units(&["late.service"])), &mut registry);
        assert_eq!(late, RefreshOutcome::Stale);
        assert!(registry.get("late.service").is_none());

        let fresh = scheduler.complete(second, Ok(units(&["fresh.service"])), &mut registry);
        assert_eq!(fresh, RefreshOutcome::Replaced { units: 1 });
        assert!(registry.get("fresh.service").is_some());
    }
}
