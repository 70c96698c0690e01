//! A single background thread that runs store mutations in submission order.

use std::thread;

use crossbeam_channel::{bounded, unbounded, Sender};
use tracing::debug;

use crate::error::EngineError;

type Job = Box<dyn FnOnce() + Send>;

/// Handle to the worker thread. The thread drains whatever is queued and
/// exits once the handle is dropped.
pub(crate) struct Worker {
    jobs: Sender<Job>,
}

impl Worker {
    pub(crate) fn spawn(name: &str) -> Result<Self, EngineError> {
        let (jobs, queue) = unbounded::<Job>();
        let thread_name = name.to_string();
        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                for job in queue {
                    job();
                }
                debug!(worker = %thread_name, "worker stopped");
            })
            .map_err(EngineError::Spawn)?;
        Ok(Self { jobs })
    }

    /// Queue `job` and return immediately.
    pub(crate) fn submit<F>(&self, job: F) -> Result<(), EngineError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.jobs
            .send(Box::new(job))
            .map_err(|_| EngineError::WorkerGone)
    }

    /// Queue `job` behind everything already submitted and block until it
    /// returns.
    pub(crate) fn call<T, F>(&self, job: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply, answer) = bounded(1);
        self.submit(move || {
            let _ = reply.send(job());
        })?;
        answer.recv().map_err(|_| EngineError::WorkerGone)
    }
}
