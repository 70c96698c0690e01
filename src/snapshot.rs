//! Immutable ordered views of the student table.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

use crate::models::{Student, StudentId};

/// One ordered view of students. Cloning is cheap and never copies rows;
/// every edit produces a new snapshot with a fresh generation.
#[derive(Debug, Clone)]
pub struct ListSnapshot {
    generation: u64,
    records: Arc<[Student]>,
}

impl ListSnapshot {
    /// Generation zero, no rows. What the engine shows before its first load.
    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    /// Sorts `records` by name, then id.
    pub fn new(generation: u64, records: Vec<Student>) -> Self {
        Self {
            generation,
            records: records.into(),
        }
    }

    /// Bumped by the engine on every change, so a larger value is a newer view.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Index of the row holding `id`, if it is listed.
    pub fn position_of(&self, id: StudentId) -> Option<usize> {
        self.records.iter().position(|s| s.id == id)
    }

    pub fn contains(&self, id: StudentId) -> bool {
        self.position_of(id).is_some()
    }

    /// Ids in list order.
    pub fn ids(&self) -> impl Iterator<Item = StudentId> + '_ {
        self.records.iter().map(|s| s.id)
    }

    /// Copy of this snapshot minus the row at `position`.
    pub fn without_position(&self, generation: u64, position: usize) -> Self {
        let records = self
            .records
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != position)
            .map(|(_, s)| s.clone())
            .collect();
        Self::new(generation, records)
    }

    /// Copy of this snapshot minus every row whose id is in `ids`.
    pub fn without_ids(&self, generation: u64, ids: &HashSet<StudentId>) -> Self {
        let records = self
            .records
            .iter()
            .filter(|s| !ids.contains(&s.id))
            .cloned()
            .collect();
        Self::new(generation, records)
    }

    /// Copy of this snapshot with `student` put back, preferring `hint` as its
    /// position. Returns the snapshot and the position actually used.
    pub fn with_restored(&self, generation: u64, student: Student, hint: usize) -> (Self, usize) {
        let position = self.restore_position(&student, hint);
        let mut records = self.records.to_vec();
        records.insert(position, student);
        (Self::new(generation, records), position)
    }

    /// Where `student` belongs: `hint` (clamped to the length) if that keeps the
    /// view sorted by name, otherwise the sorted insertion point. Rows that
    /// vanished or appeared since the hint was captured can shift it, so the
    /// ordering key decides.
    pub fn restore_position(&self, student: &Student, hint: usize) -> usize {
        let hint = hint.min(self.records.len());
        let after_prev = hint == 0 || self.records[hint - 1].order_key_cmp(student).is_le();
        let before_next =
            hint == self.records.len() || student.order_key_cmp(&self.records[hint]).is_le();
        if after_prev && before_next {
            hint
        } else {
            self.records
                .partition_point(|s| s.order_key_cmp(student).is_lt())
        }
    }
}

impl Default for ListSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for ListSnapshot {
    type Target = [Student];

    fn deref(&self) -> &[Student] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewStudent;
    use proptest::prelude::*;

    fn student(id: i64, name: &str) -> Student {
        NewStudent {
            name: name.to_string(),
            ..NewStudent::default()
        }
        .with_id(StudentId(id))
    }

    fn abc() -> ListSnapshot {
        ListSnapshot::new(1, vec![student(1, "A"), student(2, "B"), student(3, "C")])
    }

    fn names(snapshot: &ListSnapshot) -> Vec<&str> {
        snapshot.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn removal_produces_a_new_snapshot() {
        let original = abc();
        let trimmed = original.without_position(2, 1);

        assert_eq!(names(&original), ["A", "B", "C"]);
        assert_eq!(names(&trimmed), ["A", "C"]);
        assert_eq!(trimmed.generation(), 2);
    }

    #[test]
    fn restore_uses_original_position_when_still_ordered() {
        let trimmed = abc().without_position(2, 1);
        let (restored, position) = trimmed.with_restored(3, student(2, "B"), 1);

        assert_eq!(position, 1);
        assert_eq!(names(&restored), ["A", "B", "C"]);
    }

    #[test]
    fn restore_falls_back_to_ordering_when_neighbours_moved() {
        // A was removed after B's position was captured as 1.
        let view = ListSnapshot::new(5, vec![student(3, "C"), student(4, "D")]);
        let (restored, position) = view.with_restored(6, student(2, "B"), 1);

        assert_eq!(position, 0);
        assert_eq!(names(&restored), ["B", "C", "D"]);
    }

    #[test]
    fn restore_clamps_hint_past_the_end() {
        let view = ListSnapshot::new(1, vec![student(1, "A")]);
        assert_eq!(view.restore_position(&student(9, "Z"), 10), 1);
    }

    #[test]
    fn without_ids_drops_only_listed_rows() {
        let ids: HashSet<StudentId> = [StudentId(1), StudentId(3), StudentId(99)].into();
        let left = abc().without_ids(2, &ids);
        assert_eq!(names(&left), ["B"]);
    }

    proptest! {
        #[test]
        fn restoring_any_removed_row_keeps_the_view_sorted(
            mut raw in proptest::collection::vec("[a-e]{1,3}", 1..12),
            pick in any::<prop::sample::Index>(),
            hint_shift in 0usize..4,
        ) {
            raw.sort();
            let rows: Vec<Student> = raw
                .iter()
                .enumerate()
                .map(|(i, name)| student(i as i64 + 1, name))
                .collect();
            let mut sorted = rows.clone();
            sorted.sort_by(|a, b| a.order_key_cmp(b));
            let view = ListSnapshot::new(0, sorted);

            let position = pick.index(view.len());
            let removed = view[position].clone();
            let trimmed = view.without_position(1, position);
            let (restored, _) = trimmed.with_restored(2, removed, position + hint_shift);

            prop_assert!(restored
                .windows(2)
                .all(|pair| pair[0].order_key_cmp(&pair[1]).is_le()));
            prop_assert_eq!(restored.len(), view.len());
        }
    }
}
