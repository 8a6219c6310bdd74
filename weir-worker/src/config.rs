//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use weir_core::paths::DEFAULT_ROOT;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The worker's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,

    /// The root path of the coordination namespace shared by the cluster.
    #[serde(default = "Config::default_namespace_root")]
    pub namespace_root: String,

    /// The period of the scheduler's fallback tick, in seconds.
    ///
    /// Watches fire at most once per registration, so a missed re-arm must
    /// not stall convergence indefinitely; the tick bounds that window.
    #[serde(default = "Config::default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
}

impl Config {
    /// Create a new config instance from the runtime environment.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        Ok(config)
    }

    /// The scheduler's fallback tick period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    fn default_namespace_root() -> String {
        DEFAULT_ROOT.to_string()
    }

    fn default_tick_interval_seconds() -> u64 {
        5
    }
}

#[cfg(test)]
impl Config {
    /// Create a config for tests, with a tick short enough for convergence
    /// assertions to run quickly.
    pub fn new_test() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            rust_log: "error".into(),
            namespace_root: DEFAULT_ROOT.into(),
            tick_interval_seconds: 1,
        })
    }
}
