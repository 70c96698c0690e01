//! Persistence module split across logical submodules.

mod connection;
mod seed;
mod students;

pub use seed::seed_if_empty;
pub use students::{SqliteStudentStore, StudentStore};
