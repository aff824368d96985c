use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to make a driver available.
#[derive(Debug, Clone, Error)]
pub enum PluginLoadingError {
    #[error("driver library {} could not be read: {message}", path.display())]
    LibraryUnreadable { path: PathBuf, message: String },

    #[error("unknown driver '{name}': expected postgres or sqlite")]
    UnknownDriver { name: String },
}

#[derive(Debug, Clone, Error)]
pub enum DbError {
    #[error("plugin loading error: {0}")]
    PluginLoading(#[from] PluginLoadingError),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("timed out after {0:?} waiting for a connection")]
    PoolTimeout(Duration),

    #[error("query failed: {0}")]
    Query(String),

    #[error("ambiguous local time: {0}")]
    AmbiguousTime(String),

    #[error("failed to prepare statement '{name}': {message}")]
    Prepare { name: String, message: String },

    #[error("value conversion failed: {0}")]
    Conversion(String),
}

impl DbError {
    /// True for failures that a reconnect may fix.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::Connection(_) | DbError::PoolTimeout(_))
    }
}

impl From<rowtide_core::Error> for DbError {
    fn from(e: rowtide_core::Error) -> Self {
        if e.is_local_time_error() {
            DbError::AmbiguousTime(e.to_string())
        } else {
            DbError::Conversion(e.to_string())
        }
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            return DbError::Connection(e.to_string());
        }
        // Extract database error details if available
        match e.as_db_error() {
            Some(db_err) => {
                let code = db_err.code().code();
                let msg = format!(
                    "{}: {} (code: {})",
                    db_err.severity(),
                    db_err.message(),
                    code
                );
                // Class 08 is connection exception, 57P0x is operator intervention.
                if code.starts_with("08") || code.starts_with("57P0") {
                    DbError::Connection(msg)
                } else {
                    DbError::Query(msg)
                }
            }
            None => DbError::Connection(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::NotADatabase
                        | rusqlite::ErrorCode::DatabaseBusy
                ) =>
            {
                DbError::Connection(e.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::InvalidColumnType(..) => DbError::Conversion(e.to_string()),
            _ => DbError::Query(e.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
