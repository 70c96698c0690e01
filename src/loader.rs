//! Off-thread reads with a single owner callback.
//!
//! Only the most recently started request is live. A result is handed to the
//! callback only if its request is still live when it arrives, and that check
//! plus the callback run under the same mutex that `start` and `cancel` take.
//! Once `cancel` returns, or a newer `start` returns, an older request can no
//! longer deliver.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::trace;

/// Identifies one `start` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadHandle(u64);

#[derive(Default)]
struct LoaderState {
    next_id: u64,
    live: Option<u64>,
}

struct LoaderShared<T> {
    state: Mutex<LoaderState>,
    deliver: Box<dyn Fn(T) + Send + Sync>,
}

impl<T> LoaderShared<T> {
    fn state(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver_if_live(&self, handle: LoadHandle, result: T) {
        let mut state = self.state();
        if state.live != Some(handle.0) {
            trace!(load = handle.0, "dropping superseded load result");
            return;
        }
        state.live = None;
        (self.deliver)(result);
        drop(state);
    }
}

pub struct AsyncLoader<T> {
    shared: Arc<LoaderShared<T>>,
}

impl<T: Send + 'static> AsyncLoader<T> {
    /// `deliver` runs on the loader's worker thread with the loader lock held;
    /// it must not call back into this loader.
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(LoaderShared {
                state: Mutex::new(LoaderState::default()),
                deliver: Box::new(deliver),
            }),
        }
    }

    /// Run `query` on a fresh worker thread. Any request still outstanding is
    /// superseded.
    pub fn start<Q>(&self, query: Q) -> io::Result<LoadHandle>
    where
        Q: FnOnce() -> T + Send + 'static,
    {
        self.start_with(|| Ok::<_, io::Error>(query))
    }

    /// Like [`AsyncLoader::start`], but the query is built by `prepare` under
    /// the loader lock, in the same step that makes the request live. A later
    /// request therefore always sees state at least as new as an earlier one.
    /// `prepare` must not call back into this loader. If it fails, nothing is
    /// started and the outstanding request stays live.
    pub fn start_with<Q, E, P>(&self, prepare: P) -> Result<LoadHandle, E>
    where
        P: FnOnce() -> Result<Q, E>,
        Q: FnOnce() -> T + Send + 'static,
        E: From<io::Error>,
    {
        let (handle, query) = {
            let mut state = self.shared.state();
            let query = prepare()?;
            let id = state.next_id;
            state.next_id += 1;
            if let Some(previous) = state.live.replace(id) {
                trace!(load = previous, by = id, "load superseded");
            }
            (LoadHandle(id), query)
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("loader-{}", handle.0))
            .spawn(move || {
                let result = query();
                shared.deliver_if_live(handle, result);
            });

        if let Err(err) = spawned {
            self.cancel(handle);
            return Err(err.into());
        }
        trace!(load = handle.0, "load started");
        Ok(handle)
    }

    /// Retire `handle`. Returns false if it had already delivered or been
    /// superseded.
    pub fn cancel(&self, handle: LoadHandle) -> bool {
        let mut state = self.shared.state();
        if state.live == Some(handle.0) {
            state.live = None;
            trace!(load = handle.0, "load cancelled");
            true
        } else {
            false
        }
    }

    /// Retire whatever request is outstanding.
    pub fn cancel_all(&self) {
        if let Some(id) = self.shared.state().live.take() {
            trace!(load = id, "load cancelled");
        }
    }

    /// True while some request is still live.
    pub fn is_loading(&self) -> bool {
        self.shared.state().live.is_some()
    }
}
