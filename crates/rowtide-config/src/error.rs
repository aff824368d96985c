use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when parsing or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("'{first}' and '{second}' cannot be set together")]
    ConflictingOptions { first: String, second: String },

    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{field}' must be a file path, but {} is a directory", path.display())]
    PathIsDirectory { field: String, path: PathBuf },

    #[error("invalid schedule '{value}': {message}")]
    InvalidSchedule { value: String, message: String },

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("prepared statement configuration error: {0}")]
    PreparedStatement(String),

    #[error("loader '{id}': {message}")]
    InvalidLoader { id: String, message: String },

    #[error("local_db_object '{name}': {message}")]
    InvalidDbObject { name: String, message: String },

    #[error("lookup '{id}': {message}")]
    InvalidLookup { id: String, message: String },

    #[error("lookup id '{0}' is used more than once")]
    DuplicateLookupId(String),

    #[error(transparent)]
    Core(#[from] rowtide_core::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
