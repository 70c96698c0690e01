//! The list synchronization engine.
//!
//! `SyncEngine` keeps an ordered view of the students table in memory and
//! keeps it honest: it reloads whenever the store announces a change, removes
//! rows optimistically and rolls them back if the delete fails, and keeps the
//! multi-select set valid against whatever view is current.
//!
//! Threads involved:
//! - loader threads read the table and deliver through [`AsyncLoader`];
//! - one store worker runs deletes, inserts and updates in submission order;
//! - the change bus dispatcher triggers reloads.
//!
//! Lock order is loader lock, then state lock. Nothing here calls into the
//! loader while holding the state lock.

mod observer;
mod state;

pub use observer::{ChannelObserver, EngineEvent, ListObserver, ObserverId};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, trace, warn};

use self::state::{weak_observer, DeleteOutcome, EngineState};
use crate::bus::{ChangeBus, Subscription};
use crate::db::StudentStore;
use crate::error::{EngineError, StoreError};
use crate::loader::{AsyncLoader, LoadHandle};
use crate::models::{EntityKind, NewStudent, Student, StudentId};
use crate::selection::SelectionMode;
use crate::snapshot::ListSnapshot;
use crate::worker::Worker;

type LoadResult = Result<Vec<Student>, StoreError>;

struct Shared {
    me: Weak<Shared>,
    store: Arc<dyn StudentStore>,
    bus: ChangeBus,
    state: Mutex<EngineState>,
    loader: AsyncLoader<LoadResult>,
    worker: Worker,
    subscription: Mutex<Option<Subscription>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscription(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The filter is read inside the loader's critical section, so the load
    /// that ends up live always carries the newest filter.
    fn start_reload(&self) -> Result<LoadHandle, EngineError> {
        let store = Arc::clone(&self.store);
        let handle = self.loader.start_with(|| {
            let state = self.state();
            state.ensure_alive()?;
            let filter = state.filter.clone();
            Ok::<_, EngineError>(move || match filter.as_deref() {
                Some(filter) => store.read_matching(filter),
                None => store.read_all(),
            })
        })?;
        debug!(?handle, "reload requested");
        Ok(handle)
    }

    fn submit_removal(&self, id: StudentId) -> Result<StudentId, EngineError> {
        let store = Arc::clone(&self.store);
        let me = self.me.clone();
        let submitted = self.worker.submit(move || {
            let outcome = DeleteOutcome::from_store(id, store.delete_by_id(id));
            if let Some(shared) = me.upgrade() {
                shared.finish_removal(id, outcome);
            }
        });
        if let Err(err) = submitted {
            warn!(%id, error = %err, "could not queue delete; rolling back");
            self.finish_removal(id, DeleteOutcome::Failed);
            return Err(err);
        }
        Ok(id)
    }

    fn deliver_load(&self, result: LoadResult) {
        let mut state = self.state();
        if !state.alive {
            trace!("load delivered after teardown; dropping");
            return;
        }
        match result {
            Ok(rows) => state.apply_load(rows),
            Err(err) => warn!(error = %err, "reload failed; keeping the current list"),
        }
    }

    /// Store-worker side of a single removal.
    fn finish_removal(&self, id: StudentId, outcome: DeleteOutcome) {
        if outcome.removes_row() {
            // Supersede any load that read the row before it was deleted,
            // while the row is still hidden as pending.
            if let Err(err) = self.start_reload() {
                trace!(error = %err, "no reload after removal");
            }
        }
        self.state().settle_removal(id, outcome);
    }

    fn finish_batch(&self, removed: HashSet<StudentId>, failed: Vec<StudentId>) {
        if !removed.is_empty() {
            if let Err(err) = self.start_reload() {
                trace!(error = %err, "no reload after batch removal");
            }
        }
        self.state().settle_batch(&removed, &failed);
    }
}

/// Owner handle for the engine. Dropping it tears the engine down.
pub struct SyncEngine {
    shared: Arc<Shared>,
}

impl SyncEngine {
    /// Subscribe to store changes and issue the first load.
    pub fn start(store: Arc<dyn StudentStore>, bus: ChangeBus) -> Result<Self, EngineError> {
        Self::start_inner(store, bus, None)
    }

    /// Like [`SyncEngine::start`], with `observer` registered before the first
    /// load so it sees every update.
    pub fn start_observed<O: ListObserver + 'static>(
        store: Arc<dyn StudentStore>,
        bus: ChangeBus,
        observer: &Arc<O>,
    ) -> Result<Self, EngineError> {
        Self::start_inner(store, bus, Some(weak_observer(observer)))
    }

    fn start_inner(
        store: Arc<dyn StudentStore>,
        bus: ChangeBus,
        observer: Option<Weak<dyn ListObserver>>,
    ) -> Result<Self, EngineError> {
        let worker = Worker::spawn("roster-store")?;
        let mut state = EngineState::new();
        if let Some(observer) = observer {
            state.observers.register(observer);
        }

        let shared = Arc::new_cyclic(|me: &Weak<Shared>| {
            let owner = me.clone();
            Shared {
                me: me.clone(),
                store,
                bus: bus.clone(),
                state: Mutex::new(state),
                loader: AsyncLoader::new(move |result| {
                    if let Some(shared) = owner.upgrade() {
                        shared.deliver_load(result);
                    }
                }),
                worker,
                subscription: Mutex::new(None),
            }
        });

        let me = Arc::downgrade(&shared);
        let subscription = bus.subscribe(EntityKind::Students, move |_| {
            if let Some(shared) = me.upgrade() {
                if let Err(err) = shared.start_reload() {
                    trace!(error = %err, "ignoring change notification");
                }
            }
        });
        *shared.subscription() = Some(subscription);

        let engine = Self { shared };
        engine.shared.start_reload()?;
        info!("list engine started");
        Ok(engine)
    }

    /// Observers are held weakly; dropping the `Arc` is as good as
    /// unregistering.
    pub fn register_observer<O: ListObserver + 'static>(
        &self,
        observer: &Arc<O>,
    ) -> Result<ObserverId, EngineError> {
        let mut state = self.shared.state();
        state.ensure_alive()?;
        Ok(state.observers.register(weak_observer(observer)))
    }

    /// Returns false if `id` was not registered.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.shared.state().observers.unregister(id)
    }

    /// Re-read the table. Returns immediately; the result arrives through
    /// `on_snapshot_changed`.
    pub fn request_reload(&self) -> Result<LoadHandle, EngineError> {
        self.shared.start_reload()
    }

    /// Only names containing `filter` are listed from the next load on.
    pub fn set_filter(&self, filter: Option<String>) -> Result<LoadHandle, EngineError> {
        {
            let mut state = self.shared.state();
            state.ensure_alive()?;
            state.filter = filter.filter(|f| !f.is_empty());
        }
        self.shared.start_reload()
    }

    /// The name filter applied to every load, if any.
    pub fn filter(&self) -> Option<String> {
        self.shared.state().filter.clone()
    }

    /// Swipe-to-dismiss. The row leaves the view before this returns; if the
    /// delete later fails it comes back and `on_removal_failed` fires.
    pub fn request_remove(&self, position: usize) -> Result<StudentId, EngineError> {
        let id = {
            let mut state = self.shared.state();
            state.ensure_alive()?;
            state.begin_removal(position)?
        };
        self.shared.submit_removal(id)
    }

    /// [`SyncEngine::request_remove`] for whichever row currently holds `id`.
    /// Fails with [`EngineError::NotListed`] if the row has left the view.
    pub fn remove_student(&self, id: StudentId) -> Result<StudentId, EngineError> {
        {
            let mut state = self.shared.state();
            state.ensure_alive()?;
            let position = state.position_of(id)?;
            state.begin_removal(position)?;
        }
        self.shared.submit_removal(id)
    }

    /// Returns the new selection count.
    pub fn toggle_selection(&self, position: usize) -> Result<usize, EngineError> {
        let mut state = self.shared.state();
        state.ensure_alive()?;
        state.toggle(position)
    }

    /// [`SyncEngine::toggle_selection`] by identity rather than position.
    pub fn toggle_student(&self, id: StudentId) -> Result<usize, EngineError> {
        let mut state = self.shared.state();
        state.ensure_alive()?;
        let position = state.position_of(id)?;
        state.toggle(position)
    }

    /// Leave selection mode. Returns false if nothing was selected.
    pub fn cancel_selection(&self) -> Result<bool, EngineError> {
        let mut state = self.shared.state();
        state.ensure_alive()?;
        Ok(state.cancel_selection())
    }

    /// How many rows `confirm_batch_remove` would delete right now.
    pub fn pending_batch_count(&self) -> usize {
        self.shared.state().selection().len()
    }

    /// Delete every selected row. Returns how many deletes were queued; the
    /// view changes once all of them have answered.
    pub fn confirm_batch_remove(&self) -> Result<usize, EngineError> {
        let ids = {
            let state = self.shared.state();
            state.ensure_alive()?;
            state.batch_candidates()
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let count = ids.len();
        let store = Arc::clone(&self.shared.store);
        let me = self.shared.me.clone();
        self.shared.worker.submit(move || {
            let mut removed = HashSet::new();
            let mut failed = Vec::new();
            for id in ids {
                if DeleteOutcome::from_store(id, store.delete_by_id(id)).removes_row() {
                    removed.insert(id);
                } else {
                    failed.push(id);
                }
            }
            if let Some(shared) = me.upgrade() {
                shared.finish_batch(removed, failed);
            }
        })?;
        debug!(count, "batch removal queued");
        Ok(count)
    }

    /// Insert a student through the store worker and wait for its id.
    pub fn add_student(&self, student: NewStudent) -> Result<StudentId, EngineError> {
        self.shared.state().ensure_alive()?;
        let store = Arc::clone(&self.shared.store);
        self.shared
            .worker
            .call(move || store.create(&student))?
            .map_err(EngineError::from)
    }

    /// Returns false if the row no longer exists.
    pub fn update_student(&self, student: Student) -> Result<bool, EngineError> {
        self.shared.state().ensure_alive()?;
        let store = Arc::clone(&self.shared.store);
        self.shared
            .worker
            .call(move || store.update(&student))?
            .map_err(EngineError::from)
    }

    /// Fresh copy of one row straight from the store.
    pub fn student(&self, id: StudentId) -> Result<Option<Student>, EngineError> {
        self.shared.state().ensure_alive()?;
        let store = Arc::clone(&self.shared.store);
        self.shared
            .worker
            .call(move || store.read_by_id(id))?
            .map_err(EngineError::from)
    }

    /// The current view. Cheap: snapshots share their rows.
    pub fn snapshot(&self) -> ListSnapshot {
        self.shared.state().snapshot().clone()
    }

    /// Selected ids in ascending order.
    pub fn selected_ids(&self) -> Vec<StudentId> {
        self.shared.state().batch_candidates()
    }

    /// The view and the selection read together, so every selected id is in
    /// the returned snapshot.
    pub fn selection_view(&self) -> (ListSnapshot, Vec<StudentId>) {
        let state = self.shared.state();
        (state.snapshot().clone(), state.batch_candidates())
    }

    /// Number of selected rows.
    pub fn selected_count(&self) -> usize {
        self.shared.state().selection().len()
    }

    /// True if the row holding `id` is selected.
    pub fn is_selected(&self, id: StudentId) -> bool {
        self.shared.state().selection().contains(id)
    }

    /// `Active` while at least one row is selected.
    pub fn selection_mode(&self) -> SelectionMode {
        self.shared.state().selection().mode()
    }

    /// Title for the contextual bar, e.g. `2 / 7`.
    pub fn selection_title(&self) -> String {
        let state = self.shared.state();
        format!("{} / {}", state.selection().len(), state.snapshot().len())
    }

    /// True while a load is outstanding.
    pub fn is_loading(&self) -> bool {
        self.shared.loader.is_loading()
    }

    /// Number of single removals still waiting on the store.
    pub fn pending_removals(&self) -> usize {
        self.shared.state().pending_count()
    }

    /// False once [`SyncEngine::teardown`] has run.
    pub fn is_alive(&self) -> bool {
        self.shared.state().alive
    }

    /// Stop delivering anything: drop observers, cancel the outstanding load
    /// and leave the change bus. Queued store work still runs but its results
    /// are discarded. Safe to call more than once.
    pub fn teardown(&self) {
        {
            let mut state = self.shared.state();
            if !state.alive {
                return;
            }
            state.alive = false;
            state.observers.clear();
        }
        self.shared.loader.cancel_all();
        if let Some(subscription) = self.shared.subscription().take() {
            self.shared.bus.unsubscribe(&subscription);
        }
        info!("list engine torn down");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
