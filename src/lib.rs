//! Student roster with a list view that stays in sync with its SQLite table.
//!
//! The library holds the storage layer, the change bus, and the list engine;
//! the `bin` target wraps them in a ratatui front-end.
pub mod bus;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod loader;
pub mod logging;
pub mod models;
pub mod selection;
pub mod snapshot;
pub mod ui;
mod worker;

pub use bus::{ChangeBus, Subscription};
pub use config::AppConfig;
pub use db::{seed_if_empty, SqliteStudentStore, StudentStore};
pub use engine::{ChannelObserver, EngineEvent, ListObserver, ObserverId, SyncEngine};
pub use error::{BusError, EngineError, StoreError};
pub use models::{EntityKind, NewStudent, Student, StudentId};
pub use selection::{SelectionMode, SelectionSet};
pub use snapshot::ListSnapshot;

/// The interactive application entry point and state container.
pub use ui::{run_app, App};
