//! State owned by the engine and the protocol steps that mutate it. Every
//! method here runs with the engine lock held, so each step is atomic from an
//! observer's point of view.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};

use super::observer::{ListObserver, ObserverId};
use crate::error::{EngineError, StoreError};
use crate::models::{Student, StudentId};
use crate::selection::SelectionSet;
use crate::snapshot::ListSnapshot;

/// A row taken out of the view before its delete was confirmed.
#[derive(Debug, Clone)]
pub(crate) struct PendingRemoval {
    pub(crate) student: Student,
    pub(crate) position: usize,
}

/// How a delete ended, reduced to what the view cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeleteOutcome {
    Deleted,
    /// No row matched; somebody else removed it first.
    AlreadyGone,
    Failed,
}

impl DeleteOutcome {
    pub(crate) fn from_store(id: StudentId, result: Result<bool, StoreError>) -> Self {
        match result {
            Ok(true) => DeleteOutcome::Deleted,
            Ok(false) => DeleteOutcome::AlreadyGone,
            Err(err) => {
                warn!(%id, error = %err, "failed to delete student");
                DeleteOutcome::Failed
            }
        }
    }

    pub(crate) fn removes_row(self) -> bool {
        !matches!(self, DeleteOutcome::Failed)
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    entries: Vec<(ObserverId, Weak<dyn ListObserver>)>,
}

impl Observers {
    pub(crate) fn register(&mut self, observer: Weak<dyn ListObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, observer));
        id
    }

    pub(crate) fn unregister(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Call `f` on every live observer, forgetting the ones that were dropped.
    fn each(&mut self, f: impl Fn(&dyn ListObserver)) {
        self.entries.retain(|(_, weak)| match weak.upgrade() {
            Some(observer) => {
                f(observer.as_ref());
                true
            }
            None => false,
        });
    }
}

pub(crate) struct EngineState {
    pub(crate) alive: bool,
    generation: u64,
    snapshot: ListSnapshot,
    selection: SelectionSet,
    pending: HashMap<StudentId, PendingRemoval>,
    pub(crate) filter: Option<String>,
    pub(crate) observers: Observers,
}

impl EngineState {
    pub(crate) fn new() -> Self {
        Self {
            alive: true,
            generation: 0,
            snapshot: ListSnapshot::empty(),
            selection: SelectionSet::new(),
            pending: HashMap::new(),
            filter: None,
            observers: Observers::default(),
        }
    }

    pub(crate) fn ensure_alive(&self) -> Result<(), EngineError> {
        if self.alive {
            Ok(())
        } else {
            Err(EngineError::TornDown)
        }
    }

    pub(crate) fn snapshot(&self) -> &ListSnapshot {
        &self.snapshot
    }

    pub(crate) fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Install `next` as the current snapshot and hand back the one it
    /// replaced.
    fn swap(&mut self, next: ListSnapshot) -> ListSnapshot {
        std::mem::replace(&mut self.snapshot, next)
    }

    fn student_at(&self, position: usize) -> Result<&Student, EngineError> {
        self.snapshot
            .get(position)
            .ok_or(EngineError::PositionOutOfRange {
                position,
                len: self.snapshot.len(),
            })
    }

    /// Where `id` sits in the current view.
    pub(crate) fn position_of(&self, id: StudentId) -> Result<usize, EngineError> {
        self.snapshot
            .position_of(id)
            .ok_or(EngineError::NotListed(id))
    }

    fn notify_snapshot(&mut self) {
        let snapshot = self.snapshot.clone();
        self.observers.each(|o| o.on_snapshot_changed(&snapshot));
    }

    fn notify_selection(&mut self) {
        let selected = self.selection.len();
        let total = self.snapshot.len();
        self.observers
            .each(|o| o.on_selection_changed(selected, total));
    }

    fn notify_mode_ended(&mut self) {
        self.observers.each(|o| o.on_selection_mode_ended());
    }

    /// Bring the selection back in line with the snapshot after the view
    /// changed, and tell observers about whatever moved.
    fn after_view_change(&mut self) {
        let reconciled = self.selection.reconcile(&self.snapshot);
        if reconciled.ended {
            debug!(dropped = reconciled.dropped, "selection emptied by list change");
            self.notify_mode_ended();
        } else if !self.selection.is_empty() {
            self.notify_selection();
        }
    }

    /// Reload delivery: replace the view with fresh rows, hiding any whose
    /// removal is still in flight.
    pub(crate) fn apply_load(&mut self, rows: Vec<Student>) {
        let rows: Vec<Student> = rows
            .into_iter()
            .filter(|s| !self.pending.contains_key(&s.id))
            .collect();
        let generation = self.next_generation();
        let previous = self.swap(ListSnapshot::new(generation, rows));
        debug!(
            generation,
            previous = previous.len(),
            rows = self.snapshot.len(),
            hidden = self.pending.len(),
            "snapshot replaced"
        );

        self.notify_snapshot();
        self.after_view_change();
    }

    /// Optimistic half of swipe-to-dismiss: pull the row from the view now and
    /// remember where it was.
    pub(crate) fn begin_removal(&mut self, position: usize) -> Result<StudentId, EngineError> {
        let student = self.student_at(position)?.clone();
        let id = student.id;
        let generation = self.next_generation();
        let next = self.snapshot.without_position(generation, position);
        self.swap(next);
        self.pending
            .insert(id, PendingRemoval { student, position });
        debug!(%id, position, generation, "row removed optimistically");

        self.notify_snapshot();
        self.after_view_change();
        Ok(id)
    }

    /// Second half of swipe-to-dismiss, once the store answered.
    pub(crate) fn settle_removal(&mut self, id: StudentId, outcome: DeleteOutcome) {
        let Some(pending) = self.pending.remove(&id) else {
            trace!(%id, "no pending removal to settle");
            return;
        };
        if !self.alive {
            trace!(%id, "removal settled after teardown; dropping result");
            return;
        }

        match outcome {
            DeleteOutcome::Deleted => debug!(%id, "removal confirmed"),
            DeleteOutcome::AlreadyGone => debug!(%id, "row was already gone"),
            DeleteOutcome::Failed => {
                if !self.snapshot.contains(id) {
                    let generation = self.next_generation();
                    let (next, position) =
                        self.snapshot
                            .with_restored(generation, pending.student, pending.position);
                    self.swap(next);
                    debug!(%id, position, original = pending.position, "removal rolled back");
                    self.notify_snapshot();
                    self.after_view_change();
                }
                self.observers.each(|o| o.on_removal_failed(id));
            }
        }
    }

    /// Flip the selection state of the row at `position`.
    pub(crate) fn toggle(&mut self, position: usize) -> Result<usize, EngineError> {
        let id = self.student_at(position)?.id;
        let count = self.selection.toggle(id);
        trace!(%id, count, "selection toggled");
        self.notify_selection();
        if count == 0 {
            self.notify_mode_ended();
        }
        Ok(count)
    }

    /// Returns false if nothing was selected.
    pub(crate) fn cancel_selection(&mut self) -> bool {
        if self.selection.is_empty() {
            return false;
        }
        self.selection.clear();
        self.notify_mode_ended();
        true
    }

    pub(crate) fn batch_candidates(&self) -> Vec<StudentId> {
        self.selection.iter().collect()
    }

    /// Apply the outcome of a batch delete in one step: drop the rows that
    /// went away, keep the failures visible and selected.
    pub(crate) fn settle_batch(&mut self, removed: &HashSet<StudentId>, failed: &[StudentId]) {
        if !self.alive {
            trace!("batch settled after teardown; dropping result");
            return;
        }

        if removed.iter().any(|id| self.snapshot.contains(*id)) {
            let generation = self.next_generation();
            let next = self.snapshot.without_ids(generation, removed);
            self.swap(next);
            self.notify_snapshot();
        }

        let was_active = !self.selection.is_empty();
        let snapshot = self.snapshot.clone();
        self.selection
            .retain(|id| failed.contains(&id) && snapshot.contains(id));
        debug!(
            removed = removed.len(),
            failed = failed.len(),
            still_selected = self.selection.len(),
            "batch removal settled"
        );

        if self.selection.is_empty() {
            if was_active {
                self.notify_mode_ended();
            }
        } else {
            self.notify_selection();
        }
        for id in failed {
            let id = *id;
            self.observers.each(|o| o.on_removal_failed(id));
        }
    }
}

/// Downgrade a concrete observer into the registry's trait-object form.
pub(crate) fn weak_observer<O: ListObserver + 'static>(observer: &Arc<O>) -> Weak<dyn ListObserver> {
    let weak: Weak<O> = Arc::downgrade(observer);
    weak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::observer::{ChannelObserver, EngineEvent};
    use crate::models::NewStudent;
    use crossbeam_channel::Receiver;
    use proptest::prelude::*;

    fn student(id: i64, name: &str) -> Student {
        NewStudent {
            name: name.to_string(),
            ..NewStudent::default()
        }
        .with_id(StudentId(id))
    }

    fn observed_state() -> (EngineState, Arc<ChannelObserver>, Receiver<EngineEvent>) {
        let mut state = EngineState::new();
        let (observer, events) = ChannelObserver::new();
        let observer = Arc::new(observer);
        state.observers.register(weak_observer(&observer));
        state.apply_load(vec![student(1, "A"), student(2, "B"), student(3, "C")]);
        events.try_iter().for_each(drop);
        (state, observer, events)
    }

    fn names(state: &EngineState) -> Vec<String> {
        state.snapshot().iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn failed_removal_restores_row_and_reports_once() {
        let (mut state, _observer, events) = observed_state();

        let id = state.begin_removal(1).unwrap();
        assert_eq!(names(&state), ["A", "C"]);
        state.settle_removal(id, DeleteOutcome::Failed);

        assert_eq!(names(&state), ["A", "B", "C"]);
        let failures = events
            .try_iter()
            .filter(|e| matches!(e, EngineEvent::RemovalFailed(_)))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn confirmed_removal_is_final() {
        let (mut state, _observer, _events) = observed_state();
        let id = state.begin_removal(1).unwrap();
        state.settle_removal(id, DeleteOutcome::Deleted);
        assert_eq!(names(&state), ["A", "C"]);
    }

    #[test]
    fn pending_rows_stay_hidden_across_reloads() {
        let (mut state, _observer, _events) = observed_state();
        let id = state.begin_removal(0).unwrap();

        state.apply_load(vec![student(1, "A"), student(2, "B"), student(3, "C")]);
        assert_eq!(names(&state), ["B", "C"]);

        state.settle_removal(id, DeleteOutcome::Failed);
        assert_eq!(names(&state), ["A", "B", "C"]);
    }

    #[test]
    fn rollbacks_in_any_order_restore_the_original_list() {
        let (mut state, _observer, _events) = observed_state();
        let a = state.begin_removal(0).unwrap();
        let c = state.begin_removal(1).unwrap();
        assert_eq!(names(&state), ["B"]);

        state.settle_removal(a, DeleteOutcome::Failed);
        state.settle_removal(c, DeleteOutcome::Failed);
        assert_eq!(names(&state), ["A", "B", "C"]);
    }

    #[test]
    fn removing_a_selected_row_deselects_it() {
        let (mut state, _observer, events) = observed_state();
        state.toggle(1).unwrap();
        events.try_iter().for_each(drop);

        state.begin_removal(1).unwrap();

        assert!(state.selection().is_empty());
        assert!(events
            .try_iter()
            .any(|e| matches!(e, EngineEvent::SelectionModeEnded)));
    }

    #[test]
    fn out_of_range_position_is_rejected() {
        let (mut state, _observer, _events) = observed_state();
        assert!(matches!(
            state.begin_removal(3),
            Err(EngineError::PositionOutOfRange { position: 3, len: 3 })
        ));
        assert!(state.toggle(10).is_err());
    }

    #[test]
    fn batch_keeps_failures_selected() {
        let (mut state, _observer, events) = observed_state();
        state.toggle(1).unwrap();
        state.toggle(2).unwrap();
        events.try_iter().for_each(drop);

        let removed: HashSet<StudentId> = [StudentId(2)].into();
        state.settle_batch(&removed, &[StudentId(3)]);

        assert_eq!(names(&state), ["A", "C"]);
        assert_eq!(state.batch_candidates(), [StudentId(3)]);
        let events: Vec<EngineEvent> = events.try_iter().collect();
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::SelectionChanged {
                selected: 1,
                total: 2
            }
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::SelectionModeEnded)));
    }

    #[test]
    fn settling_after_teardown_is_silent() {
        let (mut state, _observer, events) = observed_state();
        let id = state.begin_removal(0).unwrap();
        events.try_iter().for_each(drop);

        state.alive = false;
        state.settle_removal(id, DeleteOutcome::Failed);
        state.settle_batch(&HashSet::new(), &[StudentId(2)]);

        assert!(events.try_iter().next().is_none());
    }

    #[test]
    fn position_of_follows_the_current_view() {
        let (mut state, _observer, _events) = observed_state();
        state.begin_removal(0).unwrap();
        assert_eq!(state.position_of(StudentId(2)).unwrap(), 0);
        assert!(matches!(
            state.position_of(StudentId(1)),
            Err(EngineError::NotListed(StudentId(1)))
        ));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Toggle(usize),
        Remove(usize),
        Settle(usize, bool),
        Load(Vec<bool>),
        Batch(Vec<bool>),
        Cancel,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0usize..8).prop_map(Step::Toggle),
            (0usize..8).prop_map(Step::Remove),
            (0usize..8, any::<bool>()).prop_map(|(i, ok)| Step::Settle(i, ok)),
            proptest::collection::vec(any::<bool>(), 6).prop_map(Step::Load),
            proptest::collection::vec(any::<bool>(), 6).prop_map(Step::Batch),
            Just(Step::Cancel),
        ]
    }

    fn roster(keep: &[bool]) -> Vec<Student> {
        keep.iter()
            .enumerate()
            .filter(|(_, kept)| **kept)
            .map(|(i, _)| student(i as i64 + 1, &format!("S{i}")))
            .collect()
    }

    proptest! {
        #[test]
        fn selection_never_outlives_its_rows(
            steps in proptest::collection::vec(step(), 1..40),
        ) {
            let mut state = EngineState::new();
            state.apply_load(roster(&[true; 6]));
            let mut in_flight: Vec<StudentId> = Vec::new();

            for step in steps {
                match step {
                    Step::Toggle(position) => {
                        let _ = state.toggle(position);
                    }
                    Step::Remove(position) => {
                        if let Ok(id) = state.begin_removal(position) {
                            in_flight.push(id);
                        }
                    }
                    Step::Settle(index, ok) => {
                        if !in_flight.is_empty() {
                            let id = in_flight.remove(index % in_flight.len());
                            let outcome = if ok {
                                DeleteOutcome::Deleted
                            } else {
                                DeleteOutcome::Failed
                            };
                            state.settle_removal(id, outcome);
                        }
                    }
                    Step::Load(keep) => state.apply_load(roster(&keep)),
                    Step::Batch(drop_it) => {
                        let candidates = state.batch_candidates();
                        let mut removed = HashSet::new();
                        let mut failed = Vec::new();
                        for (id, dropped) in candidates.into_iter().zip(drop_it.into_iter().cycle()) {
                            if dropped {
                                removed.insert(id);
                            } else {
                                failed.push(id);
                            }
                        }
                        state.settle_batch(&removed, &failed);
                    }
                    Step::Cancel => {
                        state.cancel_selection();
                    }
                }

                let snapshot = state.snapshot();
                prop_assert!(state.selection().iter().all(|id| snapshot.contains(id)));
                prop_assert_eq!(
                    state.selection().mode() == crate::selection::SelectionMode::Active,
                    !state.selection().is_empty()
                );
            }
        }
    }
}
