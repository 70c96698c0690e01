//! The student list screen and its cursor.

use crate::models::{Student, StudentId};
use crate::snapshot::ListSnapshot;

/// The student list as last delivered by the engine, plus the cursor.
pub(crate) struct StudentListScreen {
    pub(crate) rows: ListSnapshot,
    pub(crate) selected: usize,
    /// Row to jump to once it shows up, e.g. a student that was just added.
    focus: Option<StudentId>,
}

impl StudentListScreen {
    pub(crate) fn new() -> Self {
        Self {
            rows: ListSnapshot::empty(),
            selected: 0,
            focus: None,
        }
    }

    /// Swap in a fresh snapshot, keeping the cursor on the same student when
    /// it is still listed.
    pub(crate) fn set_snapshot(&mut self, rows: ListSnapshot) {
        let current = self.current_student().map(|s| s.id);
        self.rows = rows;

        if let Some(position) = self.focus.and_then(|id| self.rows.position_of(id)) {
            self.selected = position;
            self.focus = None;
            return;
        }
        if let Some(position) = current.and_then(|id| self.rows.position_of(id)) {
            self.selected = position;
            return;
        }
        self.ensure_in_bounds();
    }

    pub(crate) fn focus_on(&mut self, id: StudentId) {
        match self.rows.position_of(id) {
            Some(position) => self.selected = position,
            None => self.focus = Some(id),
        }
    }

    pub(crate) fn current_student(&self) -> Option<&Student> {
        self.rows.get(self.selected)
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        if self.rows.is_empty() {
            return;
        }
        let len = self.rows.len() as isize;
        let new = (self.selected as isize + offset).clamp(0, len - 1);
        self.selected = new as usize;
    }

    pub(crate) fn select_first(&mut self) {
        self.selected = 0;
    }

    pub(crate) fn select_last(&mut self) {
        self.selected = self.rows.len().saturating_sub(1);
    }

    pub(crate) fn ensure_in_bounds(&mut self) {
        if self.rows.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.rows.len() {
            self.selected = self.rows.len() - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewStudent;

    fn rows(generation: u64, entries: &[(i64, &str)]) -> ListSnapshot {
        ListSnapshot::new(
            generation,
            entries
                .iter()
                .map(|(id, name)| {
                    NewStudent {
                        name: name.to_string(),
                        ..NewStudent::default()
                    }
                    .with_id(StudentId(*id))
                })
                .collect(),
        )
    }

    #[test]
    fn cursor_follows_the_student_across_snapshots() {
        let mut screen = StudentListScreen::new();
        screen.set_snapshot(rows(1, &[(1, "A"), (2, "B"), (3, "C")]));
        screen.move_selection(2);

        screen.set_snapshot(rows(2, &[(4, "Aa"), (1, "B0"), (3, "C")]));
        assert_eq!(screen.current_student().map(|s| s.id), Some(StudentId(3)));
    }

    #[test]
    fn cursor_is_clamped_when_rows_vanish() {
        let mut screen = StudentListScreen::new();
        screen.set_snapshot(rows(1, &[(1, "A"), (2, "B"), (3, "C")]));
        screen.select_last();

        screen.set_snapshot(rows(2, &[(1, "A")]));
        assert_eq!(screen.selected, 0);

        screen.set_snapshot(rows(3, &[]));
        assert!(screen.current_student().is_none());
    }

    #[test]
    fn focus_waits_for_the_row_to_arrive() {
        let mut screen = StudentListScreen::new();
        screen.set_snapshot(rows(1, &[(1, "A"), (2, "C")]));
        screen.focus_on(StudentId(3));

        screen.set_snapshot(rows(2, &[(1, "A"), (3, "B"), (2, "C")]));
        assert_eq!(screen.selected, 1);
    }
}
