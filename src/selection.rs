//! Multi-select state for batch removal, kept valid against the current view.

use std::collections::BTreeSet;

use crate::models::StudentId;
use crate::snapshot::ListSnapshot;

/// Contextual (multi-select) mode, derived from whether anything is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Inactive,
    Active,
}

/// Result of checking a selection against a new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// How many identifiers were dropped because their rows disappeared.
    pub dropped: usize,
    /// True when the selection was non-empty before and is empty now.
    pub ended: bool,
}

/// Identifiers marked for a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: BTreeSet<StudentId>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership of `id` and return the new count.
    pub fn toggle(&mut self, id: StudentId) -> usize {
        if !self.ids.remove(&id) {
            self.ids.insert(id);
        }
        self.ids.len()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Keep only the identifiers for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(StudentId) -> bool) {
        self.ids.retain(|id| keep(*id));
    }

    /// Drop every identifier that `snapshot` no longer contains.
    pub fn reconcile(&mut self, snapshot: &ListSnapshot) -> Reconciled {
        let before = self.ids.len();
        if before == 0 {
            return Reconciled {
                dropped: 0,
                ended: false,
            };
        }
        let present: BTreeSet<StudentId> = snapshot.ids().collect();
        self.ids.retain(|id| present.contains(id));
        Reconciled {
            dropped: before - self.ids.len(),
            ended: self.ids.is_empty(),
        }
    }

    /// True if `id` is marked.
    pub fn contains(&self, id: StudentId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Marked ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = StudentId> + '_ {
        self.ids.iter().copied()
    }

    /// `Active` exactly when the set is non-empty.
    pub fn mode(&self) -> SelectionMode {
        if self.ids.is_empty() {
            SelectionMode::Inactive
        } else {
            SelectionMode::Active
        }
    }
}
