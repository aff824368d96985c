use thiserror::Error;

/// Errors that can occur in rowtide-core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid checkpoint value: {0}")]
    InvalidCheckpoint(String),

    #[error("invalid timezone spec '{spec}': {message}")]
    InvalidTimezone { spec: String, message: String },

    #[error("ambiguous local time {local} in timezone {timezone}; set dst_enabled_on_overlap to pick one")]
    AmbiguousLocalTime { local: String, timezone: String },

    #[error("local time {local} does not exist in timezone {timezone}")]
    NonexistentLocalTime { local: String, timezone: String },

    #[error("invalid field reference: {0}")]
    InvalidFieldReference(String),

    #[error("checkpoint file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// True for local-time resolution failures caused by a DST transition.
    pub fn is_local_time_error(&self) -> bool {
        matches!(
            self,
            Error::AmbiguousLocalTime { .. } | Error::NonexistentLocalTime { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
