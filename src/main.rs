//! Binary entry point: resolve configuration, start logging, open the store,
//! and drive the Ratatui event loop until the user exits.
use std::sync::Arc;

use anyhow::Context;
use student_roster::logging::init_logging;
use student_roster::{run_app, seed_if_empty, App, AppConfig, ChangeBus, SqliteStudentStore};
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config)?;
    info!(database = %config.database_path.display(), "starting student roster");

    let bus = ChangeBus::new().context("failed to start the change bus")?;
    let store = SqliteStudentStore::open(&config.database_path, bus.clone())
        .with_context(|| format!("failed to open {:?}", config.database_path))?;
    if config.seed_demo_data {
        let seeded = seed_if_empty(&store).context("failed to seed demo students")?;
        if seeded > 0 {
            info!(seeded, "seeded demo roster");
        }
    }

    let mut app = App::new(Arc::new(store), bus)?;
    let result = run_app(&mut app, config.tick_rate);
    info!("student roster exiting");
    result
}
