//! Terminal front-end. It only talks to the list engine; rendering and key
//! handling live here, the sync rules do not.

mod app;
mod forms;
mod helpers;
mod screens;
mod terminal;

pub use app::App;
pub use terminal::run_app;
