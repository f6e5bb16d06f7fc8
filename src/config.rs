//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - pipemap.toml (default configuration)
//! - pipemap.local.toml (git-ignored local overrides)
//! - Environment variables (PIPEMAP_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # pipemap.toml
//! [execution]
//! parallel = true
//! num_threads = 8
//! storage = "file_array"
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! PIPEMAP_EXECUTION__NUM_THREADS=4
//! PIPEMAP_LOGGING__LEVEL=trace
//! ```

use crate::map::RunOptions;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler and storage defaults for `run()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Fan map cells out over a worker pool
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Number of worker threads for parallel cell execution
    /// 0 = use all available CPU cores
    #[serde(default)]
    pub num_threads: usize,

    /// Storage backend id for mapped outputs (file_array, memory)
    #[serde(default = "default_storage")]
    pub storage: String,

    /// Flush memory-backed storage to disk after the run
    #[serde(default = "default_true")]
    pub persist_memory: bool,

    /// Remove prior run state from the run folder before starting
    #[serde(default = "default_true")]
    pub cleanup: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_storage() -> String {
    "file_array".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            parallel: true,
            num_threads: 0,
            storage: default_storage(),
            persist_memory: true,
            cleanup: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. pipemap.toml (base configuration)
    /// 2. pipemap.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (PIPEMAP_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("pipemap.toml"))
            .merge(Toml::file("pipemap.local.toml"))
            .merge(Env::prefixed("PIPEMAP_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PIPEMAP_").split("__"))
            .extract()
    }

    /// Translate the execution section into per-run options.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            parallel: self.execution.parallel,
            num_threads: self.execution.num_threads,
            storage: self.execution.storage.clone(),
            persist_memory: self.execution.persist_memory,
            cleanup: self.execution.cleanup,
            ..RunOptions::default()
        }
    }
}

/// Install a global tracing subscriber honouring `RUST_LOG`, falling back to
/// the configured level. Safe to call more than once; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.execution.parallel);
        assert_eq!(config.execution.num_threads, 0); // 0 = all CPUs
        assert_eq!(config.execution.storage, "file_array");
        assert!(config.execution.cleanup);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        // Verify it contains expected sections
        assert!(toml_str.contains("[execution]"));
        assert!(toml_str.contains("[logging]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.execution.storage, config.execution.storage);
    }

    #[test]
    fn test_run_options_from_config() {
        let mut config = Config::default();
        config.execution.parallel = false;
        config.execution.storage = "memory".to_string();

        let options = config.run_options();
        assert!(!options.parallel);
        assert_eq!(options.storage, "memory");
        assert!(options.internal_shapes.is_none());
    }
}
