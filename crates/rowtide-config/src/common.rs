//! Settings shared by the input and both filters.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use rowtide_core::{
    ConnectionOptions, ConnectionSettings, RetryPolicy, SqlLogLevel, TimezoneSpec, Value,
};

use crate::error::{ConfigError, ConfigResult};

/// Remote connection settings (raw from TOML).
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub driver: String,
    #[serde(default)]
    pub driver_library: Vec<PathBuf>,
    pub connection_string: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub password_filepath: Option<PathBuf>,
}

impl ConnectionConfig {
    pub fn to_settings(&self) -> ConfigResult<ConnectionSettings> {
        let password = exclusive_source(
            "password",
            self.password.as_deref(),
            "password_filepath",
            self.password_filepath.as_deref(),
        )?
        .map(|p| p.trim().to_string());

        Ok(ConnectionSettings {
            driver: self.driver.clone(),
            driver_library: self.driver_library.clone(),
            connection_string: self.connection_string.clone(),
            user: self.user.clone(),
            password,
        })
    }
}

/// Connection-level options (raw from TOML).
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsConfig {
    pub fetch_size: Option<u32>,
    #[serde(default = "default_true")]
    pub lowercase_column_names: bool,
    #[serde(default)]
    pub validate_connection: bool,
    /// Seconds.
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout: u64,
    /// Seconds.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout: u64,
    pub default_timezone: Option<String>,
    #[serde(default)]
    pub sql_log_level: SqlLogLevel,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            fetch_size: None,
            lowercase_column_names: true,
            validate_connection: false,
            validation_timeout: default_validation_timeout(),
            pool_timeout: default_pool_timeout(),
            default_timezone: None,
            sql_log_level: SqlLogLevel::default(),
        }
    }
}

impl OptionsConfig {
    pub fn to_options(&self) -> ConfigResult<ConnectionOptions> {
        let timezone = self
            .default_timezone
            .as_deref()
            .map(str::parse::<TimezoneSpec>)
            .transpose()?;

        Ok(ConnectionOptions {
            fetch_size: self.fetch_size,
            lowercase_column_names: self.lowercase_column_names,
            validate_connection: self.validate_connection,
            validation_timeout: Duration::from_secs(self.validation_timeout),
            pool_timeout: Duration::from_secs(self.pool_timeout),
            timezone,
            sql_log_level: self.sql_log_level,
        })
    }
}

/// Retry tuning (raw from TOML).
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub connection_retry_attempts: u32,
    /// Seconds.
    #[serde(default = "default_wait")]
    pub connection_retry_attempts_wait_time: f64,
    #[serde(default = "default_attempts")]
    pub statement_retry_attempts: u32,
    /// Seconds.
    #[serde(default = "default_wait")]
    pub statement_retry_attempts_wait_time: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connection_retry_attempts: default_attempts(),
            connection_retry_attempts_wait_time: default_wait(),
            statement_retry_attempts: default_attempts(),
            statement_retry_attempts_wait_time: default_wait(),
        }
    }
}

impl RetryConfig {
    pub fn connect_policy(&self) -> ConfigResult<RetryPolicy> {
        policy(
            "connection_retry_attempts",
            self.connection_retry_attempts,
            self.connection_retry_attempts_wait_time,
        )
    }

    pub fn statement_policy(&self) -> ConfigResult<RetryPolicy> {
        policy(
            "statement_retry_attempts",
            self.statement_retry_attempts,
            self.statement_retry_attempts_wait_time,
        )
    }
}

fn policy(field: &str, attempts: u32, wait: f64) -> ConfigResult<RetryPolicy> {
    if attempts == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    if !wait.is_finite() || wait < 0.0 {
        return Err(ConfigError::InvalidValue {
            field: format!("{}_wait_time", field),
            message: "must be a non-negative number of seconds".to_string(),
        });
    }
    let wait = Duration::try_from_secs_f64(wait).map_err(|_| ConfigError::InvalidValue {
        field: format!("{}_wait_time", field),
        message: "is too large".to_string(),
    })?;
    Ok(RetryPolicy::new(attempts, wait))
}

fn default_true() -> bool {
    true
}

fn default_validation_timeout() -> u64 {
    3600
}

fn default_pool_timeout() -> u64 {
    5
}

fn default_attempts() -> u32 {
    1
}

fn default_wait() -> f64 {
    0.5
}

/// Pick the one configured source for a setting that can be given inline or
/// read from a file. Setting both is an error.
pub fn exclusive_source(
    inline_field: &str,
    inline: Option<&str>,
    file_field: &str,
    file: Option<&Path>,
) -> ConfigResult<Option<String>> {
    match (inline, file) {
        (Some(_), Some(_)) => Err(ConfigError::ConflictingOptions {
            first: inline_field.to_string(),
            second: file_field.to_string(),
        }),
        (Some(text), None) => Ok(Some(text.to_string())),
        (None, Some(path)) => read_file(file_field, path).map(Some),
        (None, None) => Ok(None),
    }
}

pub(crate) fn read_file(field: &str, path: &Path) -> ConfigResult<String> {
    if path.is_dir() {
        return Err(ConfigError::PathIsDirectory {
            field: field.to_string(),
            path: path.to_path_buf(),
        });
    }
    fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Convert a TOML value into a record value.
pub fn toml_to_value(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => datetime_to_value(&dt),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_value).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_value(v)))
                .collect(),
        ),
    }
}

/// Convert a table of TOML values.
pub fn toml_table_to_map(table: toml::Table) -> HashMap<String, Value> {
    table
        .into_iter()
        .map(|(k, v)| (k, toml_to_value(v)))
        .collect()
}

fn datetime_to_value(dt: &toml::value::Datetime) -> Value {
    let text = dt.to_string();
    match rowtide_core::parse_timestamp(&text) {
        Some(ts) => Value::Timestamp(ts),
        None => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_password_sources_are_exclusive() {
        let file = NamedTempFile::new().unwrap();
        let config = ConnectionConfig {
            driver: "postgres".into(),
            driver_library: vec![],
            connection_string: "postgres://localhost/db".into(),
            user: Some("bob".into()),
            password: Some("secret".into()),
            password_filepath: Some(file.path().to_path_buf()),
        };
        assert!(matches!(
            config.to_settings(),
            Err(ConfigError::ConflictingOptions { .. })
        ));
    }

    #[test]
    fn test_password_file_is_trimmed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  letmein  ").unwrap();
        let config = ConnectionConfig {
            driver: "postgres".into(),
            driver_library: vec![],
            connection_string: "postgres://localhost/db".into(),
            user: None,
            password: None,
            password_filepath: Some(file.path().to_path_buf()),
        };
        assert_eq!(config.to_settings().unwrap().password.as_deref(), Some("letmein"));
    }

    #[test]
    fn test_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = exclusive_source("statement", None, "statement_filepath", Some(dir.path()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::PathIsDirectory { .. }));
    }

    #[test]
    fn test_options_defaults() {
        let options = OptionsConfig::default().to_options().unwrap();
        assert!(options.lowercase_column_names);
        assert_eq!(options.pool_timeout, Duration::from_secs(5));
        assert_eq!(options.validation_timeout, Duration::from_secs(3600));
        assert!(options.timezone.is_none());
    }

    #[test]
    fn test_invalid_timezone_is_config_error() {
        let config = OptionsConfig {
            default_timezone: Some("Mars/Olympus".into()),
            ..OptionsConfig::default()
        };
        assert!(matches!(config.to_options(), Err(ConfigError::Core(_))));
    }

    #[test]
    fn test_toml_values() {
        let table: toml::Table = toml::from_str(
            r#"
kind = "a"
limit = 10
since = 2024-01-02T03:04:05Z
day = 2024-01-02
"#,
        )
        .unwrap();
        let map = toml_table_to_map(table);
        assert_eq!(map["kind"], Value::from("a"));
        assert_eq!(map["limit"], Value::Int(10));
        assert_eq!(
            map["since"],
            Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
        assert_eq!(
            map["day"],
            Value::Timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
    }
}
