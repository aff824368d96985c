mod common;
mod error;
mod filter;
mod input;
mod schedule;
mod streaming;

pub use common::{
    exclusive_source, toml_table_to_map, toml_to_value, ConnectionConfig, OptionsConfig,
    RetryConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use filter::{
    DbObjectConfig, LoaderConfig, LookupConfig, StaticFilterConfig, StaticFilterSettings,
    DEFAULT_STATIC_DEFAULT_TAG, DEFAULT_STATIC_FAILURE_TAG,
};
pub use input::{CheckpointSettings, InputConfig, InputSettings, PagingModeConfig, TrackingSettings};
pub use schedule::Schedule;
pub use streaming::{
    CacheSettings, StreamingConfig, StreamingParams, StreamingSettings,
    DEFAULT_STREAMING_DEFAULT_TAG, DEFAULT_STREAMING_FAILURE_TAG,
};
