// Derives the visible, ordered subset of the registry.

use super::model::Unit;
use super::registry::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    ActiveOnly,
    All,
}

impl Scope {
    pub fn toggle(self) -> Self {
        match self {
            Scope::ActiveOnly => Scope::All,
            Scope::All => Scope::ActiveOnly,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Scope::ActiveOnly => "active services",
            Scope::All => "all services",
        }
    }

    fn admits(self, unit: &Unit) -> bool {
        match self {
            Scope::ActiveOnly => unit.is_active(),
            Scope::All => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub search_term: String,
    pub scope: Scope,
}

// Folding per char (rather than `str::to_lowercase`) keeps the fold of a
// longer term an extension of the fold of its prefix.
fn fold(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).collect()
}

/// Units matching `filter`, ordered by name.
pub fn visible<'a>(snapshot: &'a Snapshot, filter: &FilterState) -> Vec<&'a Unit> {
    let needle = fold(&filter.search_term);
    let mut units: Vec<&Unit> = snapshot
        .iter()
        .filter(|unit| filter.scope.admits(unit))
        .filter(|unit| {
            needle.is_empty() || fold(&unit.name).contains(&needle) || fold(&unit.description).contains(&needle)
        })
        .collect();
    units.sort_by(|a, b| a.name.cmp(&b.name));
    units
}
