//! Small rendering and error-formatting helpers shared by the dialogs.

use anyhow::Error;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use crate::models::Student;

/// One list row: a checkbox while selection mode is on, then name and course,
/// then phone dimmed.
pub(crate) fn student_row_line(student: &Student, selecting: bool, checked: bool) -> Line<'static> {
    let mut spans = Vec::with_capacity(4);
    if selecting {
        let marker = if checked { "[x] " } else { "[ ] " };
        let style = if checked {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(marker, style));
    }
    spans.push(Span::raw(student.display_name()));
    if !student.phone.trim().is_empty() {
        spans.push(Span::styled(
            format!("  {}", student.phone),
            Style::default().fg(Color::DarkGray),
        ));
    }
    Line::from(spans)
}

/// Produce a rectangle centered within `area` that spans the requested percent
/// of the width and height. Used for modal dialogs.
pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(area);

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(horizontal[1]);

    vertical[1]
}

/// Extract the most relevant error message from a chained error.
pub(crate) fn surface_error(err: &Error) -> String {
    err.chain()
        .last()
        .map(|cause| cause.to_string())
        .unwrap_or_else(|| err.to_string())
}
