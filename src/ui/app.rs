//! Top-level TUI state: the student list, the modal dialogs layered over it,
//! and the footer. Commands go to the engine by student id; the list itself
//! is refreshed from engine events once per tick.

use std::mem;
use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use crossterm::event::KeyCode;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use tracing::debug;

use crate::bus::ChangeBus;
use crate::db::StudentStore;
use crate::engine::{ChannelObserver, EngineEvent, SyncEngine};
use crate::error::EngineError;
use crate::models::{Student, StudentId};
use crate::selection::SelectionMode;

use super::forms::{ConfirmBatchDelete, StudentField, StudentForm};
use super::helpers::{centered_rect, student_row_line, surface_error};
use super::screens::StudentListScreen;

/// Footer space reserved for status messages and instructions.
const FOOTER_HEIGHT: u16 = 3;
/// Rows skipped by PageUp / PageDown.
const PAGE_STEP: isize = 10;

/// Fine-grained modes layered over the student list.
enum Mode {
    Normal,
    AddingStudent(StudentForm),
    EditingStudent { original: Student, form: StudentForm },
    ConfirmBatchDelete(ConfirmBatchDelete),
    Searching(SearchState),
}

/// State for an active name filter prompt.
struct SearchState {
    query: String,
}

/// Holds the footer message text plus its severity.
struct StatusMessage {
    text: String,
    kind: StatusKind,
}

/// Severity levels shown in the footer.
enum StatusKind {
    Info,
    Error,
}

impl StatusKind {
    fn style(&self) -> Style {
        match self {
            StatusKind::Info => Style::default().fg(Color::Green),
            StatusKind::Error => Style::default().fg(Color::Red),
        }
    }
}

/// Central application state shared across the TUI.
pub struct App {
    engine: SyncEngine,
    // Registered with the engine as a weak reference; this keeps it alive.
    _observer: Arc<ChannelObserver>,
    events: Receiver<EngineEvent>,
    list: StudentListScreen,
    mode: Mode,
    status: Option<StatusMessage>,
}

impl App {
    /// Start the list engine over `store` and wire its updates into the UI.
    pub fn new(store: Arc<dyn StudentStore>, bus: ChangeBus) -> Result<Self> {
        let (observer, events) = ChannelObserver::new();
        let observer = Arc::new(observer);
        let engine = SyncEngine::start_observed(store, bus, &observer)
            .context("failed to start the student list")?;
        Ok(Self {
            engine,
            _observer: observer,
            events,
            list: StudentListScreen::new(),
            mode: Mode::Normal,
            status: None,
        })
    }

    /// Apply whatever the engine reported since the last tick.
    pub fn on_tick(&mut self) {
        for event in self.events.try_iter() {
            match event {
                EngineEvent::SnapshotChanged(snapshot) => self.list.set_snapshot(snapshot),
                EngineEvent::SelectionChanged { selected, total } => {
                    debug!(selected, total, "selection changed");
                }
                EngineEvent::SelectionModeEnded => {
                    if let Mode::ConfirmBatchDelete(_) = self.mode {
                        self.mode = Mode::Normal;
                    }
                }
                EngineEvent::RemovalFailed(id) => {
                    let name = self
                        .list
                        .rows
                        .position_of(id)
                        .and_then(|pos| self.list.rows.get(pos))
                        .map(|s| s.name.clone())
                        .unwrap_or_else(|| id.to_string());
                    self.status = Some(StatusMessage {
                        text: format!("Could not delete {name}; it is back in the list."),
                        kind: StatusKind::Error,
                    });
                }
            }
        }
    }

    /// Stop the engine before the terminal goes away.
    pub fn shutdown(&self) {
        self.engine.teardown();
    }

    pub fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        let mut exit = false;
        let mut mode = mem::replace(&mut self.mode, Mode::Normal);

        mode = match mode {
            Mode::Normal => self.handle_normal_key(code, &mut exit)?,
            Mode::AddingStudent(form) => self.handle_add_student(code, form)?,
            Mode::EditingStudent { original, form } => {
                self.handle_edit_student(code, original, form)?
            }
            Mode::ConfirmBatchDelete(confirm) => self.handle_confirm_batch(code, confirm)?,
            Mode::Searching(state) => self.handle_search(code, state)?,
        };

        self.mode = mode;
        Ok(exit)
    }

    fn handle_normal_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        match code {
            KeyCode::Char('q') => *exit = true,
            KeyCode::Esc => {
                if self.engine.cancel_selection()? {
                    self.set_status("Selection cleared.", StatusKind::Info);
                } else if self.engine.filter().is_some() {
                    self.engine.set_filter(None)?;
                    self.set_status("Filter cleared.", StatusKind::Info);
                }
            }
            KeyCode::Up => self.list.move_selection(-1),
            KeyCode::Down => self.list.move_selection(1),
            KeyCode::PageUp => self.list.move_selection(-PAGE_STEP),
            KeyCode::PageDown => self.list.move_selection(PAGE_STEP),
            KeyCode::Home => self.list.select_first(),
            KeyCode::End => self.list.select_last(),
            KeyCode::Char('d') | KeyCode::Delete => self.remove_current()?,
            KeyCode::Char(' ') => self.toggle_current()?,
            KeyCode::Char('D') => {
                let count = self.engine.pending_batch_count();
                if count == 0 {
                    self.set_status(
                        "Nothing selected. Press Space to select students.",
                        StatusKind::Error,
                    );
                } else {
                    return Ok(Mode::ConfirmBatchDelete(ConfirmBatchDelete { count }));
                }
            }
            KeyCode::Char('r') => {
                self.engine.request_reload()?;
                self.set_status("Reloading...", StatusKind::Info);
            }
            KeyCode::Char('+') => {
                self.clear_status();
                return Ok(Mode::AddingStudent(StudentForm::default()));
            }
            KeyCode::Char('e') | KeyCode::Enter => return self.open_editor(),
            KeyCode::Char('f') => {
                self.clear_status();
                return Ok(Mode::Searching(SearchState {
                    query: self.engine.filter().unwrap_or_default(),
                }));
            }
            _ => {}
        }
        Ok(Mode::Normal)
    }

    fn handle_add_student(&mut self, code: KeyCode, mut form: StudentForm) -> Result<Mode> {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                self.set_status("Add student cancelled.", StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab | KeyCode::Down => form.toggle_field(false),
            KeyCode::BackTab | KeyCode::Up => form.toggle_field(true),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.save_new_student(&form) {
                Ok(_) => keep_open = false,
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }

        if keep_open {
            Ok(Mode::AddingStudent(form))
        } else {
            Ok(Mode::Normal)
        }
    }

    fn handle_edit_student(
        &mut self,
        code: KeyCode,
        original: Student,
        mut form: StudentForm,
    ) -> Result<Mode> {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                self.set_status("Edit cancelled.", StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab | KeyCode::Down => form.toggle_field(false),
            KeyCode::BackTab | KeyCode::Up => form.toggle_field(true),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.save_existing_student(original.id, &form) {
                Ok(_) => keep_open = false,
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(ch) => {
                if form.push_char(ch) {
                    form.error = None;
                }
            }
            _ => {}
        }

        if keep_open {
            Ok(Mode::EditingStudent { original, form })
        } else {
            Ok(Mode::Normal)
        }
    }

    fn handle_confirm_batch(
        &mut self,
        code: KeyCode,
        confirm: ConfirmBatchDelete,
    ) -> Result<Mode> {
        match code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                self.set_status("Deletion cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                match self.engine.confirm_batch_remove() {
                    Ok(queued) => {
                        self.set_status(
                            format!("Deleting {queued} student(s)..."),
                            StatusKind::Info,
                        );
                        Ok(Mode::Normal)
                    }
                    Err(err) => {
                        let message = surface_error(&anyhow::Error::from(err));
                        self.set_status(message, StatusKind::Error);
                        Ok(Mode::ConfirmBatchDelete(confirm))
                    }
                }
            }
            _ => Ok(Mode::ConfirmBatchDelete(confirm)),
        }
    }

    fn handle_search(&mut self, code: KeyCode, mut state: SearchState) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.engine.set_filter(None)?;
                return Ok(Mode::Normal);
            }
            KeyCode::Enter => {
                if state.query.trim().is_empty() {
                    self.engine.set_filter(None)?;
                } else {
                    self.set_status(
                        format!("Showing names containing \"{}\".", state.query),
                        StatusKind::Info,
                    );
                }
                return Ok(Mode::Normal);
            }
            KeyCode::Up => self.list.move_selection(-1),
            KeyCode::Down => self.list.move_selection(1),
            KeyCode::Backspace => {
                state.query.pop();
                self.engine.set_filter(Some(state.query.clone()))?;
            }
            KeyCode::Char(ch) if !ch.is_control() => {
                state.query.push(ch);
                self.engine.set_filter(Some(state.query.clone()))?;
            }
            _ => {}
        }
        Ok(Mode::Searching(state))
    }

    fn remove_current(&mut self) -> Result<()> {
        let Some(student) = self.list.current_student().cloned() else {
            self.set_status("No student selected.", StatusKind::Error);
            return Ok(());
        };
        match self.engine.remove_student(student.id) {
            Ok(_) => {
                self.set_status(format!("Deleted {}.", student.name), StatusKind::Info);
            }
            Err(EngineError::NotListed(_)) => {
                self.set_status(
                    format!("{} is no longer listed.", student.name),
                    StatusKind::Error,
                );
            }
            Err(err) => return Err(err.into()),
        }
        // The engine already dropped the row; pull it from the local copy
        // too so the cursor does not land on a ghost until the event arrives.
        self.list.set_snapshot(self.engine.snapshot());
        Ok(())
    }

    fn toggle_current(&mut self) -> Result<()> {
        let Some(student) = self.list.current_student().cloned() else {
            return Ok(());
        };
        match self.engine.toggle_student(student.id) {
            Ok(_) => {
                self.list.move_selection(1);
                self.clear_status();
            }
            Err(EngineError::NotListed(_)) => {
                self.list.set_snapshot(self.engine.snapshot());
                self.set_status(
                    format!("{} is no longer listed.", student.name),
                    StatusKind::Error,
                );
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn open_editor(&mut self) -> Result<Mode> {
        let Some(id) = self.list.current_student().map(|s| s.id) else {
            self.set_status("No student selected.", StatusKind::Error);
            return Ok(Mode::Normal);
        };
        match self.engine.student(id)? {
            Some(student) => {
                self.clear_status();
                let form = StudentForm::from_student(&student);
                Ok(Mode::EditingStudent {
                    original: student,
                    form,
                })
            }
            None => {
                self.set_status("That student no longer exists.", StatusKind::Error);
                Ok(Mode::Normal)
            }
        }
    }

    fn save_new_student(&mut self, form: &StudentForm) -> Result<()> {
        let student = form.parse_inputs()?;
        let name = student.name.clone();
        let id = self.engine.add_student(student)?;
        self.list.focus_on(id);
        self.set_status(format!("Added {name}."), StatusKind::Info);
        Ok(())
    }

    fn save_existing_student(&mut self, id: StudentId, form: &StudentForm) -> Result<()> {
        let student = form.parse_inputs()?.with_id(id);
        let name = student.name.clone();
        if !self.engine.update_student(student)? {
            anyhow::bail!("That student was deleted in the meantime.");
        }
        self.list.focus_on(id);
        self.set_status(format!("Updated {name}."), StatusKind::Info);
        Ok(())
    }

    fn set_status<S: Into<String>>(&mut self, text: S, kind: StatusKind) {
        self.status = Some(StatusMessage {
            text: text.into(),
            kind,
        });
    }

    fn clear_status(&mut self) {
        self.status = None;
    }

    pub(crate) fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        let footer_height = FOOTER_HEIGHT.min(area.height);

        let (content_area, footer_area) = if area.height > footer_height {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(0), Constraint::Length(footer_height)])
                .split(area);
            (chunks[0], chunks[1])
        } else {
            (area, area)
        };

        self.draw_student_list(frame, content_area);

        if area.height >= footer_height {
            self.draw_footer(frame, footer_area);
        }

        match &self.mode {
            Mode::AddingStudent(form) => self.draw_student_form(frame, area, "Add Student", form),
            Mode::EditingStudent { form, .. } => {
                self.draw_student_form(frame, area, "Edit Student", form)
            }
            Mode::ConfirmBatchDelete(confirm) => self.draw_confirm_batch(frame, area, confirm),
            Mode::Searching(state) => self.draw_search_bar(frame, area, state),
            Mode::Normal => {}
        }
    }

    fn list_title(&self) -> String {
        let mut title = match self.engine.selection_mode() {
            SelectionMode::Active => format!(" {} selected ", self.engine.selection_title()),
            SelectionMode::Inactive => " Students ".to_string(),
        };
        if let Some(filter) = self.engine.filter() {
            title.push_str(&format!("[name contains \"{filter}\"] "));
        }
        if self.engine.is_loading() {
            title.push_str("(loading...) ");
        }
        title
    }

    fn draw_student_list(&self, frame: &mut Frame, area: Rect) {
        let selecting = self.engine.selection_mode() == SelectionMode::Active;
        let border_style = if selecting {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(border_style)
            .title(self.list_title());

        if self.list.rows.is_empty() {
            let hint = if self.engine.filter().is_some() {
                "No students match the filter. Press Esc to clear it."
            } else {
                "No students yet. Press + to add one."
            };
            let paragraph = Paragraph::new(Span::styled(hint, Style::default().fg(Color::Gray)))
                .alignment(Alignment::Center)
                .block(block)
                .wrap(Wrap { trim: true });
            frame.render_widget(paragraph, area);
            return;
        }

        let items: Vec<ListItem> = self
            .list
            .rows
            .iter()
            .map(|student| {
                ListItem::new(student_row_line(
                    student,
                    selecting,
                    self.engine.is_selected(student.id),
                ))
            })
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");
        let mut state = ListState::default().with_selected(Some(self.list.selected));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::TOP);
        frame.render_widget(block.clone(), area);
        let inner = block.inner(area);

        let status_line = if let Some(status) = &self.status {
            Line::from(vec![Span::styled(status.text.clone(), status.kind.style())])
        } else {
            Line::from("")
        };

        let instructions = self.footer_instructions();

        let paragraph = Paragraph::new(vec![status_line, instructions]).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn draw_search_bar(&self, frame: &mut Frame, area: Rect, state: &SearchState) {
        let height = 3u16.min(area.height);
        let popup_area = Rect {
            x: area.x,
            y: area.y,
            width: area.width,
            height,
        };
        frame.render_widget(Clear, popup_area);

        let block = Block::default().borders(Borders::ALL).title("Filter");
        let paragraph = Paragraph::new(Span::raw(format!("Name: {}", state.query)))
            .block(block.clone())
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, popup_area);

        let inner = block.inner(popup_area);
        let cursor_x = inner.x + "Name: ".len() as u16 + state.query.chars().count() as u16;
        frame.set_cursor_position((cursor_x, inner.y));
    }

    fn footer_instructions(&self) -> Line<'static> {
        let key_style = Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD);
        let keys: &[(&str, &str)] = match (&self.mode, self.engine.selection_mode()) {
            (Mode::Searching(_), _) => &[("[Enter]", "Keep"), ("[Esc]", "Clear")],
            (Mode::Normal, SelectionMode::Active) => &[
                ("[Space]", "Toggle"),
                ("[D]", "Delete Selected"),
                ("[Esc]", "Cancel"),
            ],
            _ => &[
                ("[↑↓]", "Navigate"),
                ("[+]", "Add"),
                ("[e]", "Edit"),
                ("[d]", "Delete"),
                ("[Space]", "Select"),
                ("[f]", "Filter"),
                ("[r]", "Reload"),
                ("[q]", "Quit"),
            ],
        };

        let mut spans = Vec::with_capacity(keys.len() * 2);
        for (key, action) in keys {
            spans.push(Span::styled(*key, key_style));
            spans.push(Span::raw(format!(" {action}   ")));
        }
        Line::from(spans)
    }

    fn draw_student_form(&self, frame: &mut Frame, area: Rect, title: &str, form: &StudentForm) {
        let popup_area = centered_rect(70, 50, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default().title(title).borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let mut lines: Vec<Line> = StudentField::ALL
            .iter()
            .map(|field| form.build_line(*field))
            .collect();
        lines.push(Line::from(""));

        if let Some(error) = &form.error {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(Color::Red),
            )));
        } else {
            lines.push(Line::from(Span::styled(
                "Enter to save • Tab to switch • Esc to cancel",
                Style::default().fg(Color::Gray),
            )));
        }

        let paragraph = Paragraph::new(lines).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);

        let row = StudentField::ALL
            .iter()
            .position(|f| *f == form.active)
            .unwrap_or_default() as u16;
        let prefix = format!("{}: ", form.active.label()).len() as u16;
        frame.set_cursor_position((
            inner.x + prefix + form.value_len(form.active) as u16,
            inner.y + row,
        ));
    }

    fn draw_confirm_batch(&self, frame: &mut Frame, area: Rect, confirm: &ConfirmBatchDelete) {
        let popup_area = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title("Confirm Deletion")
            .borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let lines = vec![
            Line::from(format!("Delete {} selected student(s)?", confirm.count)),
            Line::from("Students that cannot be deleted stay selected."),
            Line::from(""),
            Line::from(Span::styled(
                "Press Y to confirm or N / Esc to cancel.",
                Style::default().fg(Color::Gray),
            )),
        ];

        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStudentStore;
    use crate::models::NewStudent;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::{tempdir, TempDir};

    fn draft(name: &str) -> NewStudent {
        NewStudent {
            name: name.to_string(),
            ..NewStudent::default()
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn app_with(names: &[&str]) -> (TempDir, Arc<SqliteStudentStore>, App) {
        let dir = tempdir().unwrap();
        let bus = ChangeBus::new().unwrap();
        let path = dir.path().join("roster.sqlite");
        let store = Arc::new(SqliteStudentStore::open(path, bus.clone()).unwrap());
        for name in names {
            store.create(&draft(name)).unwrap();
        }
        let mut app = App::new(store.clone(), bus).unwrap();
        wait_until(|| {
            app.on_tick();
            app.list.rows.len() == names.len()
        });
        (dir, store, app)
    }

    fn stored_names(store: &SqliteStudentStore) -> Vec<String> {
        store.read_all().unwrap().into_iter().map(|s| s.name).collect()
    }

    #[test]
    fn delete_hits_the_row_under_the_cursor_even_before_the_tick() {
        let (_dir, store, mut app) = app_with(&["A", "B", "C"]);
        app.handle_key(KeyCode::Down).unwrap();
        assert_eq!(app.list.current_student().unwrap().name, "B");

        // A row sorting ahead of the cursor lands in the engine, but the UI has
        // not drained its events yet.
        store.create(&draft("AA")).unwrap();
        wait_until(|| app.engine.snapshot().len() == 4);

        let exit = app.handle_key(KeyCode::Char('d')).unwrap();
        assert!(!exit);
        wait_until(|| store.read_all().unwrap().len() == 3);
        assert_eq!(stored_names(&store), ["A", "AA", "C"]);
    }

    #[test]
    fn toggle_selects_the_row_under_the_cursor_even_before_the_tick() {
        let (_dir, store, mut app) = app_with(&["A", "B", "C"]);
        app.handle_key(KeyCode::Down).unwrap();
        let b = app.list.current_student().unwrap().id;

        store.create(&draft("AA")).unwrap();
        wait_until(|| app.engine.snapshot().len() == 4);

        app.handle_key(KeyCode::Char(' ')).unwrap();
        assert_eq!(app.engine.selected_ids(), [b]);
    }

    #[test]
    fn acting_on_a_row_that_vanished_reports_instead_of_quitting() {
        for key in [KeyCode::Char(' '), KeyCode::Char('d')] {
            let (_dir, store, mut app) = app_with(&["A", "B"]);
            app.handle_key(KeyCode::End).unwrap();
            let b = app.list.current_student().unwrap().id;

            assert!(store.delete_by_id(b).unwrap());
            wait_until(|| app.engine.snapshot().len() == 1);

            assert!(!app.handle_key(key).unwrap());
            assert!(matches!(
                app.status,
                Some(StatusMessage {
                    kind: StatusKind::Error,
                    ..
                })
            ));
            assert_eq!(app.list.current_student().unwrap().name, "A");
            assert!(app.engine.selected_ids().is_empty());
            assert_eq!(stored_names(&store), ["A"]);
        }
    }
}
