// In-memory service manager for exercising the controller.

use super::model::{ActiveState, EnabledState, LoadState, LogLine, Unit, Verb};
use super::systemd::ServiceManager;
use crate::error::ManagerError;
use async_trait::async_trait;
use chrono::Local;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn unit(name: &str, active_state: ActiveState) -> Unit {
    let sub_state = match active_state {
        ActiveState::Active => "running",
        ActiveState::Failed => "failed",
        _ => "dead",
    };
    Unit {
        name: name.to_string(),
        description: format!("{name} daemon"),
        load_state: LoadState::Loaded,
        active_state,
        sub_state: sub_state.to_string(),
        enabled_state: EnabledState::Enabled,
        last_refreshed_at: Local::now(),
    }
}

#[derive(Default)]
pub struct FakeManager {
    units: Mutex<Vec<Unit>>,
    list_error: Mutex<Option<ManagerError>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
    list_calls: AtomicUsize,
    control_calls: Mutex<Vec<(String, Verb)>>,
}

impl FakeManager {
    pub fn new(units: Vec<Unit>) -> Self {
        Self { units: Mutex::new(units), ..Self::default() }
    }

    pub fn units(&self) -> Vec<Unit> {
        self.units.lock().unwrap().clone()
    }

    pub fn set_units(&self, units: Vec<Unit>) {
        *self.units.lock().unwrap() = units;
    }

    pub fn fail_list_units(&self, err: ManagerError) {
        *self.list_error.lock().unwrap() = Some(err);
    }

    /// Makes `list_units` block until the returned gate is notified.
    pub fn hold_list_units(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn control_calls(&self) -> Vec<(String, Verb)> {
        self.control_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceManager for FakeManager {
    async fn list_units(&self) -> Result<Vec<Unit>, ManagerError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.list_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(self.units()),
        }
    }

    async fn control_unit(&self, name: &str, verb: Verb) -> Result<(), ManagerError> {
        self.control_calls.lock().unwrap().push((name.to_string(), verb));
        Ok(())
    }

    async fn fetch_logs(&self, name: &str, _line_limit: usize) -> Result<Vec<LogLine>, ManagerError> {
        Ok(vec![LogLine {
            timestamp: None,
            priority: None,
            message: format!("{name} started"),
        }])
    }

    async fn fetch_status(&self, name: &str) -> Result<String, ManagerError> {
        Ok(format!("● {name}"))
    }
}
