use thiserror::Error;

use rowtide_sql::DbError;

/// Errors that can occur while maintaining or querying the snapshot cache.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// A refresh failed for a reason other than the remote being unreachable.
    #[error("loader '{loader}' failed: {message}")]
    Loader { loader: String, message: String },

    #[error("snapshot file error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] rowtide_core::Error),
}

pub type EnrichResult<T> = Result<T, EnrichError>;
