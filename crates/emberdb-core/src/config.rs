//! Planner configuration.
//!
//! Configuration is loaded once and threaded explicitly through every planning
//! call as an immutable value, never read from global state. Sources are
//! layered with the usual precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file named by the `EMBERDB_CONFIG` env var
//! 3. `./config/emberdb.yaml`
//! 4. `/etc/emberdb/emberdb.yaml`
//! 5. Hardcoded defaults (lowest priority)

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, PlanResult};

/// Configuration for the shard-fanout planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Columns whose concrete values determine partition placement, in
    /// shard-key order.
    #[serde(default = "default_shard_key_columns")]
    pub shard_key_columns: Vec<String>,

    /// Upper bound on the number of concrete combinations a single query may
    /// fan out to.
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,
}

fn default_shard_key_columns() -> Vec<String> {
    vec!["workspace".to_string(), "namespace".to_string()]
}

fn default_max_fanout() -> usize {
    64
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            shard_key_columns: default_shard_key_columns(),
            max_fanout: default_max_fanout(),
        }
    }
}

impl PlannerConfig {
    /// Load and validate configuration from files and the environment.
    ///
    /// Environment overrides use the `EMBERDB_` prefix with `__` as the
    /// nesting separator, e.g. `EMBERDB_MAX_FANOUT=128`.
    pub fn load() -> PlanResult<Self> {
        let mut builder = Config::builder()
            .set_default("shard_key_columns", default_shard_key_columns())?
            .set_default("max_fanout", default_max_fanout() as u64)?;

        if let Ok(config_path) = std::env::var("EMBERDB_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/emberdb").required(false))
            .add_source(File::with_name("/etc/emberdb/emberdb").required(false))
            .add_source(
                Environment::with_prefix("EMBERDB")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        debug!(
            shard_keys = ?config.shard_key_columns,
            max_fanout = config.max_fanout,
            "loaded planner configuration"
        );
        Ok(config)
    }

    /// Reject configurations the planner cannot operate under.
    pub fn validate(&self) -> PlanResult<()> {
        if self.shard_key_columns.is_empty() {
            return Err(PlanError::Validation(
                "shard_key_columns must name at least one column".to_string(),
            ));
        }
        if self.shard_key_columns.iter().any(String::is_empty) {
            return Err(PlanError::Validation(
                "shard_key_columns must not contain empty names".to_string(),
            ));
        }
        if self.max_fanout == 0 {
            return Err(PlanError::Validation(
                "max_fanout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PlannerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shard_key_columns, vec!["workspace", "namespace"]);
        assert_eq!(config.max_fanout, 64);
    }

    #[test]
    fn empty_shard_keys_are_rejected() {
        let config = PlannerConfig {
            shard_key_columns: vec![],
            ..PlannerConfig::default()
        };
        assert!(matches!(config.validate(), Err(PlanError::Validation(_))));
    }

    #[test]
    fn zero_fanout_is_rejected() {
        let config = PlannerConfig {
            max_fanout: 0,
            ..PlannerConfig::default()
        };
        assert!(matches!(config.validate(), Err(PlanError::Validation(_))));
    }
}
