use std::path::{Path, PathBuf};

use serde::Deserialize;

use rowtide_core::placeholders;
use rowtide_core::{
    BindValue, ConnectionOptions, ConnectionSettings, PagingMode, RetryPolicy, StatementSpec,
    TrackerKind, TrackingColumnType,
};

use crate::common::{
    exclusive_source, toml_table_to_map, toml_to_value, ConnectionConfig, OptionsConfig,
    RetryConfig,
};
use crate::error::{ConfigError, ConfigResult};
use crate::schedule::Schedule;

/// Raw incremental input configuration as parsed from TOML.
#[derive(Debug, Deserialize)]
pub struct InputConfig {
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(flatten)]
    pub options: OptionsConfig,
    #[serde(flatten)]
    pub retry: RetryConfig,

    pub statement: Option<String>,
    pub statement_filepath: Option<PathBuf>,
    /// Named statement parameters.
    #[serde(default)]
    pub parameters: toml::Table,
    pub schedule: Option<Schedule>,

    #[serde(default = "default_last_run_metadata_path")]
    pub last_run_metadata_path: PathBuf,
    #[serde(default = "default_true")]
    pub record_last_run: bool,
    #[serde(default)]
    pub clean_run: bool,
    #[serde(default)]
    pub use_column_value: bool,
    pub tracking_column: Option<String>,
    #[serde(default)]
    pub tracking_column_type: TrackingColumnType,

    #[serde(default)]
    pub paging_enabled: bool,
    #[serde(default)]
    pub paging_mode: PagingModeConfig,
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default)]
    pub use_prepared_statements: bool,
    #[serde(default)]
    pub prepared_statement_name: String,
    #[serde(default)]
    pub prepared_statement_bind_values: Vec<toml::Value>,

    /// Nest each row under this field instead of at the record root.
    pub target: Option<String>,
}

/// Paging mode (raw from TOML).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PagingModeConfig {
    #[default]
    Auto,
    Explicit,
}

fn default_last_run_metadata_path() -> PathBuf {
    PathBuf::from(".rowtide_last_run")
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    100_000
}

impl InputConfig {
    /// Parse an input config from a TOML string.
    pub fn parse(toml_str: &str) -> ConfigResult<Self> {
        let config: InputConfig = toml::from_str(toml_str)?;
        Ok(config)
    }
}

/// How the checkpoint column is tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    pub use_column_value: bool,
    pub column: Option<String>,
    pub column_type: TrackingColumnType,
}

impl TrackingSettings {
    pub fn kind(&self) -> TrackerKind {
        TrackerKind::select(self.use_column_value, self.column_type)
    }
}

/// Where and whether the checkpoint is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSettings {
    pub path: PathBuf,
    pub record_last_run: bool,
    pub clean_run: bool,
}

/// Validated incremental input settings.
#[derive(Debug, Clone)]
pub struct InputSettings {
    pub connection: ConnectionSettings,
    pub options: ConnectionOptions,
    pub connect_retry: RetryPolicy,
    pub statement_retry: RetryPolicy,
    pub statement: StatementSpec,
    pub tracking: TrackingSettings,
    pub checkpoint: CheckpointSettings,
    pub schedule: Option<Schedule>,
    pub target: Option<String>,
}

impl InputConfig {
    /// Validate and convert into runtime settings.
    pub fn to_settings(&self) -> ConfigResult<InputSettings> {
        let sql = exclusive_source(
            "statement",
            self.statement.as_deref(),
            "statement_filepath",
            self.statement_filepath.as_deref(),
        )?
        .ok_or_else(|| ConfigError::MissingField {
            field: "statement or statement_filepath".to_string(),
        })?;

        if self.use_column_value && self.tracking_column.is_none() {
            return Err(ConfigError::MissingField {
                field: "tracking_column".to_string(),
            });
        }

        validate_metadata_path(&self.last_run_metadata_path)?;

        let mut statement = StatementSpec::new(sql);
        for (name, value) in toml_table_to_map(self.parameters.clone()) {
            statement = statement.parameter(name, value);
        }
        statement.parameters.sort_by(|a, b| a.0.cmp(&b.0));

        if self.use_prepared_statements {
            statement = self.prepared_statement(statement)?;
        } else if self.paging_enabled {
            statement = self.paged_statement(statement)?;
        }

        Ok(InputSettings {
            connection: self.connection.to_settings()?,
            options: self.options.to_options()?,
            connect_retry: self.retry.connect_policy()?,
            statement_retry: self.retry.statement_policy()?,
            statement,
            tracking: TrackingSettings {
                use_column_value: self.use_column_value,
                column: self.tracking_column.clone(),
                column_type: self.tracking_column_type,
            },
            checkpoint: CheckpointSettings {
                path: self.last_run_metadata_path.clone(),
                record_last_run: self.record_last_run,
                clean_run: self.clean_run,
            },
            schedule: self.schedule,
            target: self.target.clone(),
        })
    }

    fn prepared_statement(&self, statement: StatementSpec) -> ConfigResult<StatementSpec> {
        if self.paging_enabled {
            return Err(ConfigError::ConflictingOptions {
                first: "use_prepared_statements".to_string(),
                second: "paging_enabled".to_string(),
            });
        }
        if self.prepared_statement_name.trim().is_empty() {
            return Err(ConfigError::PreparedStatement(
                "prepared_statement_name must not be empty".to_string(),
            ));
        }

        let markers = placeholders::count_positional(&statement.sql);
        if markers != self.prepared_statement_bind_values.len() {
            return Err(ConfigError::PreparedStatement(format!(
                "statement has {} '?' placeholders but {} prepared_statement_bind_values were given",
                markers,
                self.prepared_statement_bind_values.len()
            )));
        }

        let bind_values = self
            .prepared_statement_bind_values
            .iter()
            .cloned()
            .map(|v| BindValue::from_config(toml_to_value(v)))
            .collect();
        Ok(statement.prepared(self.prepared_statement_name.clone(), bind_values))
    }

    fn paged_statement(&self, statement: StatementSpec) -> ConfigResult<StatementSpec> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "page_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let mode = match self.paging_mode {
            PagingModeConfig::Auto => PagingMode::Auto,
            PagingModeConfig::Explicit => {
                let names = placeholders::named(&statement.sql);
                for required in ["offset", "size"] {
                    if !names.iter().any(|n| n == required) {
                        return Err(ConfigError::InvalidValue {
                            field: "statement".to_string(),
                            message: format!(
                                "explicit paging requires a :{} placeholder",
                                required
                            ),
                        });
                    }
                }
                PagingMode::Explicit
            }
        };
        Ok(statement.paged(mode, self.page_size))
    }
}

fn validate_metadata_path(path: &Path) -> ConfigResult<()> {
    if path.is_dir() {
        return Err(ConfigError::PathIsDirectory {
            field: "last_run_metadata_path".to_string(),
            path: path.to_path_buf(),
        });
    }
    Ok(())
}
