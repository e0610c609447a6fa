//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - `config.toml` (default configuration)
//! - `config.local.toml` (git-ignored local overrides)
//! - Environment variables (`QUERYENGINE_*` prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [catalog]
//! root_dir = "."
//!
//! [optimizer]
//! default_selectivity = 0.05
//! schema_init_cycle_guard = 10000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUERYENGINE_CATALOG__ROOT_DIR=/data
//! QUERYENGINE_OPTIMIZER__DEFAULT_SELECTIVITY=0.1
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub catalog: CatalogConfig,
    pub optimizer: OptimizerConfig,
    pub codegen: CodegenConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how the catalog auto-registers relations on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory walked recursively for `*.csv` files at catalog init.
    pub root_dir: PathBuf,
    /// Whether catalog init walks `root_dir` at all (tests may disable this
    /// and register tables manually instead).
    #[serde(default = "default_true")]
    pub auto_register_csv: bool,
}

/// Selinger optimizer tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Fallback selectivity used when no column statistics apply.
    #[serde(default = "default_selectivity")]
    pub default_selectivity: f64,
    /// Safety bound on `initialize_plan`'s schema-init worklist loop.
    #[serde(default = "default_cycle_guard")]
    pub schema_init_cycle_guard: usize,
    /// Penalty coefficient applied to a join's own cardinality in its cost.
    #[serde(default = "default_join_penalty")]
    pub join_size_penalty: f64,
}

/// Produce/consume codegen output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodegenConfig {
    /// Name of the emitted zero-argument function.
    #[serde(default = "default_fn_name")]
    pub function_name: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}
fn default_selectivity() -> f64 {
    0.05
}
fn default_cycle_guard() -> usize {
    10_000
}
fn default_join_penalty() -> f64 {
    0.1
}
fn default_fn_name() -> String {
    "compiled_q".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Load configuration from the default locations, merging
    /// `config.toml` < `config.local.toml` < environment.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("QUERYENGINE_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUERYENGINE_").split("__"))
            .extract()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            catalog: CatalogConfig {
                root_dir: PathBuf::from("."),
                auto_register_csv: true,
            },
            optimizer: OptimizerConfig {
                default_selectivity: default_selectivity(),
                schema_init_cycle_guard: default_cycle_guard(),
                join_size_penalty: default_join_penalty(),
            },
            codegen: CodegenConfig {
                function_name: default_fn_name(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.optimizer.default_selectivity, 0.05);
        assert_eq!(config.optimizer.schema_init_cycle_guard, 10_000);
        assert_eq!(config.codegen.function_name, "compiled_q");
    }
}
