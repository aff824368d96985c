//! Settings for the streaming (remote, cached) lookup filter.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use rowtide_core::placeholders;
use rowtide_core::{ConnectionOptions, ConnectionSettings, ParamBinding, RetryPolicy, Value};

use crate::common::{toml_table_to_map, toml_to_value, ConnectionConfig, OptionsConfig, RetryConfig};
use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_STREAMING_FAILURE_TAG: &str = "_jdbcstreamingfailure";
pub const DEFAULT_STREAMING_DEFAULT_TAG: &str = "_jdbcstreamingdefaultsused";

/// Raw streaming lookup configuration as parsed from TOML.
#[derive(Debug, Deserialize)]
pub struct StreamingConfig {
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(flatten)]
    pub options: OptionsConfig,
    #[serde(flatten)]
    pub retry: RetryConfig,

    pub statement: String,
    /// Named parameters; values are field references or `%{}` templates.
    #[serde(default)]
    pub parameters: toml::Table,
    pub target: String,
    #[serde(default)]
    pub default_hash: toml::Table,
    #[serde(default = "default_failure_tags")]
    pub tag_on_failure: Vec<String>,
    #[serde(default = "default_default_tags")]
    pub tag_on_default_use: Vec<String>,

    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Seconds.
    #[serde(default = "default_cache_expiration")]
    pub cache_expiration: f64,
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,

    #[serde(default)]
    pub use_prepared_statements: bool,
    #[serde(default)]
    pub prepared_statement_name: String,
    #[serde(default)]
    pub prepared_statement_bind_values: Vec<toml::Value>,
}

fn default_failure_tags() -> Vec<String> {
    vec![DEFAULT_STREAMING_FAILURE_TAG.to_string()]
}

fn default_default_tags() -> Vec<String> {
    vec![DEFAULT_STREAMING_DEFAULT_TAG.to_string()]
}

fn default_true() -> bool {
    true
}

fn default_cache_expiration() -> f64 {
    5.0
}

fn default_cache_size() -> u64 {
    500
}

/// Lookup cache bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_entries: u64,
    pub expiration: Duration,
}

/// How the streaming statement is parameterized.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingParams {
    Named(Vec<(String, ParamBinding)>),
    Prepared {
        name: String,
        bind_values: Vec<ParamBinding>,
    },
}

/// Validated streaming lookup settings.
#[derive(Debug, Clone)]
pub struct StreamingSettings {
    pub connection: ConnectionSettings,
    pub options: ConnectionOptions,
    pub connect_retry: RetryPolicy,
    pub statement: String,
    pub parameters: StreamingParams,
    pub target: String,
    pub default_hash: Option<HashMap<String, Value>>,
    pub tag_on_failure: Vec<String>,
    pub tag_on_default_use: Vec<String>,
    /// `None` when caching is disabled.
    pub cache: Option<CacheSettings>,
}

impl StreamingConfig {
    /// Parse a streaming config from a TOML string.
    pub fn parse(toml_str: &str) -> ConfigResult<Self> {
        let config: StreamingConfig = toml::from_str(toml_str)?;
        Ok(config)
    }

    /// Validate and convert into runtime settings.
    pub fn to_settings(&self) -> ConfigResult<StreamingSettings> {
        let parameters = if self.use_prepared_statements {
            if self.prepared_statement_name.trim().is_empty() {
                return Err(ConfigError::PreparedStatement(
                    "prepared_statement_name must not be empty".to_string(),
                ));
            }
            let markers = placeholders::count_positional(&self.statement);
            if markers != self.prepared_statement_bind_values.len() {
                return Err(ConfigError::PreparedStatement(format!(
                    "statement has {} '?' placeholders but {} prepared_statement_bind_values were given",
                    markers,
                    self.prepared_statement_bind_values.len()
                )));
            }
            StreamingParams::Prepared {
                name: self.prepared_statement_name.clone(),
                bind_values: self
                    .prepared_statement_bind_values
                    .iter()
                    .cloned()
                    .map(|v| ParamBinding::from_config(toml_to_value(v)))
                    .collect(),
            }
        } else {
            let mut bindings: Vec<(String, ParamBinding)> =
                toml_table_to_map(self.parameters.clone())
                    .into_iter()
                    .map(|(k, v)| (k, ParamBinding::from_config(v)))
                    .collect();
            bindings.sort_by(|a, b| a.0.cmp(&b.0));
            StreamingParams::Named(bindings)
        };

        let cache = if self.use_cache {
            if !self.cache_expiration.is_finite() || self.cache_expiration <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "cache_expiration".to_string(),
                    message: "must be a positive number of seconds".to_string(),
                });
            }
            let expiration = Duration::try_from_secs_f64(self.cache_expiration).map_err(|_| {
                ConfigError::InvalidValue {
                    field: "cache_expiration".to_string(),
                    message: "is too large".to_string(),
                }
            })?;
            Some(CacheSettings {
                max_entries: self.cache_size,
                expiration,
            })
        } else {
            None
        };

        let default_hash =
            (!self.default_hash.is_empty()).then(|| toml_table_to_map(self.default_hash.clone()));

        Ok(StreamingSettings {
            connection: self.connection.to_settings()?,
            options: self.options.to_options()?,
            connect_retry: self.retry.connect_policy()?,
            statement: self.statement.clone(),
            parameters,
            target: self.target.clone(),
            default_hash,
            tag_on_failure: self.tag_on_failure.clone(),
            tag_on_default_use: self.tag_on_default_use.clone(),
            cache,
        })
    }
}
