//! Error types for the store, the change bus and the engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::StudentId;

/// Failures at the storage layer. A missing row is not an error: reads by id
/// return `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to prepare database location {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to {operation}")]
    Sqlite {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl StoreError {
    pub(crate) fn sqlite(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| StoreError::Sqlite { operation, source }
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to spawn change bus dispatcher")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("the list engine has been torn down")]
    TornDown,

    #[error("position {position} is outside the list (length {len})")]
    PositionOutOfRange { position: usize, len: usize },

    #[error("student {0} is no longer listed")]
    NotListed(StudentId),

    #[error("the store worker is no longer running")]
    WorkerGone,

    #[error("failed to spawn engine thread")]
    Spawn(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
