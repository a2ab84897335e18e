// Handles the rendering of widgets to the terminal frame.

use super::model::{ActiveState, Unit};
use super::view::{Overlay, Severity, ViewModel};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};

/// Main render function called every frame.
pub fn render(f: &mut Frame, view: &ViewModel, list_state: &mut ListState, searching: bool) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    list_state.select(view.selected_index());

    render_header(f, chunks[0], view, searching);
    render_service_list(f, chunks[1], view, list_state);
    render_footer(f, chunks[2], view);

    match &view.overlay {
        Some(Overlay::Loading { title }) => render_text(f, title, "Loading..."),
        Some(Overlay::Logs { unit_name, lines }) => {
            let text = if lines.is_empty() {
                "-- No entries --".to_string()
            } else {
                lines.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
            };
            render_text(f, &format!(" Logs: {unit_name} (Esc to close) "), &text)
        }
        Some(Overlay::Status { unit_name, text }) => {
            render_text(f, &format!(" Status: {unit_name} (Esc to close) "), text)
        }
        None => {}
    }

    if let Some(action) = &view.confirmation {
        render_confirmation(f, &format!("{} service '{}'?", capitalize(action.verb.as_str()), action.unit_name));
    }
}

fn render_header(f: &mut Frame, area: Rect, view: &ViewModel, searching: bool) {
    let counts = view.counts;
    let mut spans = vec![
        Span::raw(format!(
            "Total: {} | Active: {} | Failed: {} | Showing: {}",
            counts.total,
            counts.active,
            counts.failed,
            view.filter.scope.label()
        )),
    ];

    if !view.filter.search_term.is_empty() {
        spans.push(Span::raw(format!(" | Filtered: {}", view.units.len())));
    }
    if view.refreshing {
        spans.push(Span::styled(" | refreshing", Style::default().fg(Color::DarkGray)));
    }

    let title = if searching {
        format!(" Search: {}_ ", view.filter.search_term)
    } else if !view.filter.search_term.is_empty() {
        format!(" Search: {} ", view.filter.search_term)
    } else {
        " Polvon - System Service Manager ".to_string()
    };
    let title_style = if searching {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };

    let paragraph = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title(Span::styled(title, title_style)));
    f.render_widget(paragraph, area);
}

fn state_symbol(unit: &Unit) -> (&'static str, Color) {
    match unit.active_state {
        ActiveState::Active if unit.is_running() => ("●", Color::Green),
        ActiveState::Active => ("●", Color::Cyan),
        ActiveState::Failed => ("✖", Color::Red),
        ActiveState::Inactive => ("○", Color::DarkGray),
        _ => ("◐", Color::Blue),
    }
}

fn render_service_list(f: &mut Frame, area: Rect, view: &ViewModel, state: &mut ListState) {
    let items: Vec<ListItem> = view
        .units
        .iter()
        .map(|unit| {
            let (status_symbol, color) = state_symbol(unit);
            let busy = if view.is_running(&unit.name) { "…" } else { " " };

            let content = Line::from(vec![
                Span::styled(format!("{busy}{status_symbol}"), Style::default().fg(color)),
                Span::raw(format!(" {:<40}", unit.name)),
                Span::styled(
                    format!("[{}::{}] ", unit.load_state, unit.sub_state),
                    Style::default().fg(Color::Gray),
                ),
                Span::styled(format!("{:<9}", unit.enabled_state), Style::default().fg(Color::Gray)),
                Span::raw(truncate(&unit.description, 60)),
            ]);

            ListItem::new(content)
        })
        .collect();

    let title = match view.last_refreshed_at {
        Some(at) => format!(" Services (updated {}) ", at.format("%H:%M:%S")),
        None => " Services ".to_string(),
    };

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(
            Style::default()
                .add_modifier(Modifier::BOLD)
                .bg(Color::DarkGray),
        )
        .highlight_symbol(">> ");

    f.render_stateful_widget(list, area, state);
}

fn render_footer(f: &mut Frame, area: Rect, view: &ViewModel) {
    let status = view
        .refresh_error
        .as_ref()
        .map(|e| (e.as_str(), Severity::Warning))
        .or_else(|| view.status.as_ref().map(|s| (s.message.as_str(), s.severity)));

    let line = match status {
        Some((message, severity)) => {
            let color = match severity {
                Severity::Info => Color::Green,
                Severity::Warning => Color::Yellow,
                Severity::Error => Color::Red,
            };
            Line::from(Span::styled(message.to_string(), Style::default().fg(color)))
        }
        None => Line::from(vec![
            Span::raw("Nav: "),
            Span::styled("j/k ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("| Search: "),
            Span::styled("/ ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("| All: "),
            Span::styled("a ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("| View: "),
            Span::styled("v(status) l(logs) ", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("| Action: "),
            Span::styled(
                "s(start) S(stop) R(restart) e(enable) d(disable) ",
                Style::default().fg(Color::Cyan),
            ),
            Span::raw("| Quit: "),
            Span::styled("q", Style::default().fg(Color::Red)),
        ]),
    };

    let paragraph =
        Paragraph::new(line).block(Block::default().borders(Borders::ALL).title(" Controls "));

    f.render_widget(paragraph, area);
}

fn render_text(f: &mut Frame, title: &str, text: &str) {
    let area = centered_rect(90, 80, f.area());

    f.render_widget(Clear, area);

    let block = Block::default().borders(Borders::ALL).title(title.to_string());
    let content: Vec<Line> = text.lines().map(Line::from).collect();

    // Keep the newest lines in view.
    let overflow = content.len().saturating_sub(area.height.saturating_sub(2) as usize);
    let paragraph = Paragraph::new(content)
        .block(block)
        .scroll((u16::try_from(overflow).unwrap_or(u16::MAX), 0));

    f.render_widget(paragraph, area);
}

fn render_confirmation(f: &mut Frame, question: &str) {
    let area = centered_rect(50, 20, f.area());

    f.render_widget(Clear, area);

    let text = vec![
        Line::from(question.to_string()),
        Line::from(""),
        Line::from(vec![
            Span::styled("y/Enter", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
            Span::raw(" confirm   "),
            Span::styled("n/Esc", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::raw(" cancel"),
        ]),
    ];

    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(" Confirm "));

    f.render_widget(paragraph, area);
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_and_capitalize() {
        assert_eq!(truncate("short", 60), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(capitalize("restart"), "Restart");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_centered_rect_is_inside_parent() {
        let parent = Rect::new(0, 0, 100, 50);
        let popup = centered_rect(50, 20, parent);
        assert_eq!(popup.width, 50);
        assert_eq!(popup.height, 10);
        assert_eq!(popup.x, 25);
    }
}
