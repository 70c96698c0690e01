//! Runtime configuration: an optional TOML file resolved against per-user
//! directory defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

/// Overrides the location of the config file.
pub const CONFIG_ENV: &str = "STUDENT_ROSTER_CONFIG";

const DB_FILE_NAME: &str = "roster.sqlite";
const LOG_FILE_NAME: &str = "student-roster.log";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_TICK_RATE_MS: u64 = 250;

/// What the config file may say. Every field is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub database_path: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub tick_rate_ms: Option<u64>,
    pub seed_demo_data: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

/// Fully resolved settings the binary runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub log_file: PathBuf,
    pub log_filter: String,
    pub tick_rate: Duration,
    pub seed_demo_data: bool,
}

impl AppConfig {
    /// Read the config file (if there is one) and fill in the gaps.
    pub fn load() -> Result<Self> {
        let dirs = project_dirs()?;
        let path = match env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => dirs.config_dir().join("config.toml"),
        };
        let file = if path.exists() {
            FileConfig::load(&path)?
        } else {
            FileConfig::default()
        };
        Ok(Self::resolve(file, dirs.data_dir()))
    }

    /// Apply defaults rooted at `data_dir` to whatever `file` left unset.
    pub fn resolve(file: FileConfig, data_dir: &Path) -> Self {
        Self {
            database_path: file
                .database_path
                .unwrap_or_else(|| data_dir.join(DB_FILE_NAME)),
            log_file: file
                .log_file
                .unwrap_or_else(|| data_dir.join(LOG_FILE_NAME)),
            log_filter: file
                .log_filter
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            tick_rate: Duration::from_millis(
                file.tick_rate_ms.unwrap_or(DEFAULT_TICK_RATE_MS).max(10),
            ),
            seed_demo_data: file.seed_demo_data.unwrap_or(true),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "student-roster")
        .ok_or_else(|| anyhow!("could not locate home directory"))
}
