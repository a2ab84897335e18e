// Resolves terminal key events into intents.

use super::intent::Intent;
use super::model::Verb;
use super::view::ViewModel;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Mode {
    #[default]
    Browse,
    Search,
}

#[derive(Debug, Default)]
pub struct KeyMapper {
    mode: Mode,
}

impl KeyMapper {
    pub fn is_searching(&self) -> bool {
        self.mode == Mode::Search
    }

    pub fn resolve(&mut self, key: KeyEvent, view: &ViewModel) -> Option<Intent> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(Intent::Quit);
        }

        if view.confirmation.is_some() {
            return match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => Some(Intent::ConfirmAction),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Char('q') | KeyCode::Esc => {
                    Some(Intent::CancelAction)
                }
                _ => None,
            };
        }

        if view.overlay.is_some() {
            return match key.code {
                KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('l') | KeyCode::Char('v') => {
                    Some(Intent::CloseOverlay)
                }
                _ => None,
            };
        }

        match self.mode {
            Mode::Search => self.resolve_search(key, view),
            Mode::Browse => self.resolve_browse(key, view),
        }
    }

    fn resolve_search(&mut self, key: KeyEvent, view: &ViewModel) -> Option<Intent> {
        match key.code {
            KeyCode::Enter => {
                self.mode = Mode::Browse;
                None
            }
            KeyCode::Esc => {
                self.mode = Mode::Browse;
                Some(Intent::SetSearchTerm(String::new()))
            }
            KeyCode::Backspace => {
                let mut term = view.filter.search_term.clone();
                term.pop()?;
                Some(Intent::SetSearchTerm(term))
            }
            KeyCode::Char(c) => {
                let mut term = view.filter.search_term.clone();
                term.push(c);
                Some(Intent::SetSearchTerm(term))
            }
            KeyCode::Down => step(view, 1),
            KeyCode::Up => step(view, -1),
            _ => None,
        }
    }

    fn resolve_browse(&mut self, key: KeyEvent, view: &ViewModel) -> Option<Intent> {
        let selected = || view.selected_unit().map(|u| u.name.clone());
        let act = |verb| selected().map(|name| Intent::RequestAction(name, verb));

        match key.code {
            KeyCode::Char('q') => Some(Intent::Quit),
            KeyCode::Char('r') => Some(Intent::Refresh),
            KeyCode::Char('a') => Some(Intent::ToggleScope),
            KeyCode::Char('/') => {
                self.mode = Mode::Search;
                None
            }
            KeyCode::Esc if !view.filter.search_term.is_empty() => Some(Intent::SetSearchTerm(String::new())),
            KeyCode::Char('j') | KeyCode::Down => step(view, 1),
            KeyCode::Char('k') | KeyCode::Up => step(view, -1),
            KeyCode::Char('s') => act(Verb::Start),
            KeyCode::Char('S') => act(Verb::Stop),
            KeyCode::Char('R') => act(Verb::Restart),
            KeyCode::Char('e') => act(Verb::Enable),
            KeyCode::Char('d') => act(Verb::Disable),
            KeyCode::Char('v') => selected().map(Intent::ViewStatus),
            KeyCode::Char('l') => selected().map(Intent::ViewLogs),
            _ => None,
        }
    }
}

/// Moves the selection by `delta` rows, wrapping at both ends.
fn step(view: &ViewModel, delta: isize) -> Option<Intent> {
    let len = view.units.len();
    if len == 0 {
        return None;
    }
    let next = match view.selected_index() {
        Some(i) => (i as isize + delta).rem_euclid(len as isize) as usize,
        None => 0,
    };
    Some(Intent::Select(view.units[next].name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::actions::{ActionState, PendingAction};
    use crate::app::filter::FilterState;
    use crate::app::model::{ActiveState, EnabledState, LoadState, Unit};
    use crate::app::view::{Counts, ViewModel};
    use chrono::Local;

    fn view(names: &[&str], selected: Option<&str>) -> ViewModel {
        ViewModel {
            units: names
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
                .collect(),
            selected: selected.map(String::from),
            confirmation: None,
            running: Vec::new(),
            status: None,
            refresh_error: None,
            filter: FilterState::default(),
            counts: Counts::default(),
            refreshing: false,
            last_refreshed_at: None,
            overlay: None,
        }
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_action_keys_target_the_selected_unit() {
        let mut keys = KeyMapper::default();
        let v = view(&["a.service", "b.service"], Some("b.service"));
        assert_eq!(
            keys.resolve(press(KeyCode::Char('S')), &v),
            Some(Intent::RequestAction("b.service".into(), Verb::Stop))
        );
        assert_eq!(
            keys.resolve(press(KeyCode::Char('l')), &v),
            Some(Intent::ViewLogs("b.service".into()))
        );
        assert_eq!(keys.resolve(press(KeyCode::Char('s')), &view(&[], None)), None);
    }

    #[test]
    fn test_navigation_wraps() {
        let mut keys = KeyMapper::default();
        let v = view(&["a.service", "b.service", "c.service"], Some("c.service"));
        assert_eq!(keys.resolve(press(KeyCode::Char('j')), &v), Some(Intent::Select("a.service".into())));
        let v = view(&["a.service", "b.service", "c.service"], Some("a.service"));
        assert_eq!(keys.resolve(press(KeyCode::Up), &v), Some(Intent::Select("c.service".into())));
    }

    #[test]
    fn test_search_mode_edits_the_term() {
        let mut keys = KeyMapper::default();
        let mut v = view(&["a.service"], None);
        assert_eq!(keys.resolve(press(KeyCode::Char('/')), &v), None);
        assert!(keys.is_searching());

        assert_eq!(keys.resolve(press(KeyCode::Char('q')), &v), Some(Intent::SetSearchTerm("q".into())));
        v.filter.search_term = "ng".into();
        assert_eq!(keys.resolve(press(KeyCode::Char('x')), &v), Some(Intent::SetSearchTerm("ngx".into())));
        assert_eq!(keys.resolve(press(KeyCode::Backspace), &v), Some(Intent::SetSearchTerm("n".into())));
        assert_eq!(keys.resolve(press(KeyCode::Esc), &v), Some(Intent::SetSearchTerm(String::new())));
        assert!(!keys.is_searching());
    }

    #[test]
    fn test_confirmation_dialog_captures_keys() {
        let mut keys = KeyMapper::default();
        let mut v = view(&["sshd.service"], Some("sshd.service"));
        v.confirmation = Some(PendingAction {
            id: 1,
            unit_name: "sshd.service".into(),
            verb: Verb::Stop,
            state: ActionState::AwaitingConfirmation,
            started_at: Local::now(),
            error: None,
        });
        assert_eq!(keys.resolve(press(KeyCode::Char('y')), &v), Some(Intent::ConfirmAction));
        assert_eq!(keys.resolve(press(KeyCode::Esc), &v), Some(Intent::CancelAction));
        assert_eq!(keys.resolve(press(KeyCode::Char('s')), &v), None);
    }

    #[test]
    fn test_ctrl_c_always_quits() {
        let mut keys = KeyMapper::default();
        let v = view(&[], None);
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(keys.resolve(ctrl_c, &v), Some(Intent::Quit));
    }
}
