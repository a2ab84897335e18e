// The authoritative in-memory table of units.

use super::model::Unit;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// An immutable view of the registry as published by one refresh.
#[derive(Debug, Default)]
pub struct Snapshot {
    generation: u64,
    refreshed_at: Option<DateTime<Local>>,
    units: BTreeMap<String, Unit>,
}

impl Snapshot {
    /// Number of `replace` calls that produced this snapshot.
    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Local>> {
        self.refreshed_at
    }

    pub fn get(&self, name: &str) -> Option<&Unit> {
        self.units.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }
}

/// Owns the current snapshot and swaps it wholesale.
///
/// Readers hold an `Arc<Snapshot>` which never changes after publication,
/// so a reader sees either the old or the new table and never a mix.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    current: Arc<Snapshot>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `units` as the new table. Units absent from `units` are gone.
    pub fn replace(&mut self, units: Vec<Unit>) {
        let refreshed_at = units.iter().map(|u| u.last_refreshed_at).max();
        let mut table = BTreeMap::new();
        for unit in units {
            if let Some(previous) = table.insert(unit.name.clone(), unit) {
                debug!(unit = %previous.name, "duplicate unit in enumeration, keeping the later entry");
            }
        }

        let generation = self.current.generation + 1;
        debug!(generation, units = table.len(), "registry replaced");
        self.current = Arc::new(Snapshot {
            generation,
            refreshed_at,
            units: table,
        });
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<Unit> {
        self.current.get(name).cloned()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current)
    }
}
