//! Holon Configuration Module
//!
//! Runtime knobs for holons: polling cadence of the worker and of peer
//! resolution, and the topic housekeeping policy applied on cleanup.
//! Supports loading from a TOML file with `HOLON_` environment overrides.

use anyhow::{bail, Context, Result};
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default interval between two resolution attempts (milliseconds)
pub const DEFAULT_RESOLVE_POLL_INTERVAL_MS: u64 = 100;

/// Default sleep of an idle worker between two mailbox drains (milliseconds)
pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 50;

/// Holon runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HolonConfig {
    pub resolve_poll_interval_ms: u64,
    pub idle_interval_ms: u64,

    /// Stack size of worker threads, platform default when unset
    pub worker_stack_size: Option<usize>,

    /// Verbosity used by the standalone bootstrap
    pub log_level: String,

    pub topics: TopicPolicy,
}

/// What cleanup does with topics a holon published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TopicPolicy {
    /// Destroy non-permanent topics on cleanup. Other subscribers of a
    /// destroyed topic lose it too, so this stays off unless asked for.
    pub destroy_transient_on_cleanup: bool,
}

impl Default for HolonConfig {
    fn default() -> Self {
        Self {
            resolve_poll_interval_ms: DEFAULT_RESOLVE_POLL_INTERVAL_MS,
            idle_interval_ms: DEFAULT_IDLE_INTERVAL_MS,
            worker_stack_size: None,
            log_level: "info".to_string(),
            topics: TopicPolicy::default(),
        }
    }
}

impl HolonConfig {
    /// Load configuration from an optional file with environment overrides
    ///
    /// `HOLON_IDLE_INTERVAL_MS=10` overrides a top-level key, nested keys use
    /// a double underscore: `HOLON_TOPICS__DESTROY_TRANSIENT_ON_CLEANUP=true`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            debug!("Loading holon config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("HOLON")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: HolonConfig = builder
            .build()
            .context("Failed to build holon configuration")?
            .try_deserialize()
            .context("Failed to deserialize holon configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: HolonConfig =
            toml::from_str(toml_str).context("Failed to parse holon configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolve_poll_interval_ms == 0 {
            bail!("resolve_poll_interval_ms must be greater than zero");
        }
        if self.idle_interval_ms == 0 {
            bail!("idle_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn resolve_poll_interval(&self) -> Duration {
        Duration::from_millis(self.resolve_poll_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}
