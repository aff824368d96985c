pub mod checkpoint;
pub mod connection;
pub mod error;
pub mod lookup;
pub mod placeholders;
pub mod record;
pub mod snapshot;
pub mod statement;
pub mod timezone;
pub mod types;

pub use checkpoint::{
    decode_checkpoint, encode_checkpoint, parse_timestamp, CheckpointStore, CheckpointValue,
    FileCheckpointStore, NullCheckpointStore, TrackerKind, TrackingColumnType, ValueTracker,
};
pub use connection::{ConnectionOptions, ConnectionSettings, DriverKind, RetryPolicy, SqlLogLevel};
pub use error::{Error, Result};
pub use lookup::{LookupDef, LookupParams, ParamBinding};
pub use placeholders::Placeholder;
pub use record::{FieldRef, Record};
pub use snapshot::{Column, DbObject, LoaderDef};
pub use statement::{BindValue, Paging, PagingMode, PreparedSpec, StatementSpec, LAST_VALUE_PARAM};
pub use timezone::TimezoneSpec;
pub use types::{row, RowMap, Value};
