use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::db::DEFAULT_DB_PATH;
use crate::extract::normalize::DEFAULT_ORIGIN;
use crate::session::SessionConfig;

pub const DEFAULT_CONFIG_FILE: &str = "swim_scraper";
pub const ENV_PREFIX: &str = "SWIM";

/// Runtime settings: built-in defaults, then an optional config file, then
/// `SWIM_*` environment variables. CLI flags are applied on top by the binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: String,
    pub site_origin: String,
    /// Pause after each "load more" click.
    pub settle_ms: u64,
    pub max_rounds: usize,
    pub nav_timeout_ms: u64,
    /// Minimum spacing between requests across all workers.
    pub request_interval_ms: u64,
    pub seed_athletes: bool,
    pub workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: DEFAULT_DB_PATH.to_string(),
            site_origin: DEFAULT_ORIGIN.to_string(),
            settle_ms: 2000,
            max_rounds: 200,
            nav_timeout_ms: 60_000,
            request_interval_ms: 1000,
            seed_athletes: true,
            workers: 1,
        }
    }
}

impl Settings {
    /// `file` may be given without extension; a missing default file is fine,
    /// an explicitly named one must exist.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(source)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            origin: self.site_origin.clone(),
            settle: Duration::from_millis(self.settle_ms),
            max_rounds: self.max_rounds,
            nav_timeout: Duration::from_millis(self.nav_timeout_ms),
            seed_athletes: self.seed_athletes,
        }
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}
