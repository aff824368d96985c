//! Durable checkpoint ("sql_last_value") tracking.
//!
//! The checkpoint is a single typed scalar persisted to a file. Reading is
//! lenient: every known historical encoding is tried in turn, and anything
//! unreadable falls back to the tracker's zero value.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::Value;

/// Current on-disk format revision.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

const ZERO_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// A tracked high-water mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CheckpointValue {
    Integer(i64),
    Decimal(Decimal),
    Uuid(String),
    Timestamp(DateTime<Utc>),
}

impl CheckpointValue {
    /// The value as bound into a statement.
    pub fn to_value(&self) -> Value {
        match self {
            CheckpointValue::Integer(i) => Value::Int(*i),
            CheckpointValue::Decimal(d) => Value::Decimal(*d),
            CheckpointValue::Uuid(u) => Value::String(u.clone()),
            CheckpointValue::Timestamp(ts) => Value::Timestamp(*ts),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    version: u32,
    value: CheckpointValue,
}

/// Encode a checkpoint in the current format.
pub fn encode_checkpoint(value: &CheckpointValue) -> Result<String> {
    let doc = CheckpointDocument {
        version: CHECKPOINT_FORMAT_VERSION,
        value: value.clone(),
    };
    Ok(serde_json::to_string(&doc)?)
}

/// Decode a persisted checkpoint, trying each known representation.
///
/// Recognized, in order: the versioned JSON document, a bare tagged value,
/// a bare JSON scalar, and the YAML scalar documents written by older
/// releases (`--- 42`, `--- 2021-01-01 00:00:00.000000000 Z`,
/// `--- !ruby/object:DateTime '...'`, `--- !ruby/object:BigDecimal 18:0.5e1`).
pub fn decode_checkpoint(contents: &str) -> Option<CheckpointValue> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(doc) = serde_json::from_str::<CheckpointDocument>(trimmed) {
        return Some(doc.value);
    }
    if let Ok(value) = serde_json::from_str::<CheckpointValue>(trimmed) {
        return Some(value);
    }
    if let Ok(scalar) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return decode_json_scalar(scalar);
    }
    decode_yaml_scalar(trimmed)
}

fn decode_json_scalar(scalar: serde_json::Value) -> Option<CheckpointValue> {
    match scalar {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Some(CheckpointValue::Integer(i)),
            None => parse_decimal(&n.to_string()).map(CheckpointValue::Decimal),
        },
        serde_json::Value::String(s) => Some(decode_text(&s)),
        _ => None,
    }
}

fn decode_yaml_scalar(contents: &str) -> Option<CheckpointValue> {
    let mut body = contents.strip_prefix("---")?.trim();
    if let Some(stripped) = body.strip_suffix("...") {
        body = stripped.trim();
    }

    if let Some(tagged) = body.strip_prefix("!ruby/object:DateTime") {
        return parse_timestamp(unquote(tagged.trim())).map(CheckpointValue::Timestamp);
    }
    if let Some(tagged) = body.strip_prefix("!ruby/object:BigDecimal") {
        // `<precision>:<mantissa>e<exponent>`
        let literal = tagged.trim();
        let number = literal.split_once(':').map(|(_, n)| n).unwrap_or(literal);
        return parse_decimal(number.trim()).map(numeric_from_decimal);
    }
    if body.starts_with('!') {
        return None;
    }

    if let Ok(i) = body.parse::<i64>() {
        return Some(CheckpointValue::Integer(i));
    }
    if let Some(d) = parse_decimal(body) {
        return Some(CheckpointValue::Decimal(d));
    }

    Some(decode_text(unquote(body)))
}

fn decode_text(text: &str) -> CheckpointValue {
    match parse_timestamp(text) {
        Some(ts) => CheckpointValue::Timestamp(ts),
        None => CheckpointValue::Uuid(text.to_string()),
    }
}

/// Plain (`1.25`) or scientific (`0.125e1`) notation.
fn parse_decimal(text: &str) -> Option<Decimal> {
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

fn numeric_from_decimal(value: Decimal) -> CheckpointValue {
    match value.fract().is_zero().then(|| value.to_i64()).flatten() {
        Some(i) => CheckpointValue::Integer(i),
        None => CheckpointValue::Decimal(value.normalize()),
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Parse the timestamp spellings accepted for checkpoints and tracking
/// column values. Zone-less values are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    // Ruby's YAML time: `2021-01-01 00:00:00.123456789 Z` or `... +02:00`.
    if let Some(naive) = text.strip_suffix(" Z").or_else(|| text.strip_suffix('Z')) {
        if let Some(dt) = parse_naive(naive.trim()) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f %:z", "%Y-%m-%d %H:%M:%S%.f %z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    parse_naive(text).map(|dt| Utc.from_utc_datetime(&dt))
}

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Storage backend for the persisted checkpoint.
pub trait CheckpointStore: Send + Sync {
    /// Read the raw persisted contents, if any.
    fn read(&self) -> Result<Option<String>>;

    /// Replace the persisted contents.
    fn write(&self, contents: &str) -> Result<()>;

    /// Discard any persisted contents.
    fn clean(&self) -> Result<()>;
}

/// Checkpoint persisted to a single file.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        // Write to a sibling file first so a crash never leaves a torn checkpoint.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clean(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Store used when checkpoint persistence is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCheckpointStore;

impl CheckpointStore for NullCheckpointStore {
    fn read(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn write(&self, _contents: &str) -> Result<()> {
        Ok(())
    }

    fn clean(&self) -> Result<()> {
        Ok(())
    }
}

/// Declared type of a tracking column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingColumnType {
    #[default]
    Numeric,
    Uuid,
    Timestamp,
}

/// The value semantics a tracker applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Numeric,
    Uuid,
    /// Timestamps, either from a column or from the wall clock.
    Timestamp,
}

impl TrackerKind {
    /// Choose the tracker for the given settings. Without column tracking
    /// the checkpoint is the wall-clock time of the last run.
    pub fn select(use_column_value: bool, column_type: TrackingColumnType) -> Self {
        if !use_column_value {
            return TrackerKind::Timestamp;
        }
        match column_type {
            TrackingColumnType::Numeric => TrackerKind::Numeric,
            TrackingColumnType::Uuid => TrackerKind::Uuid,
            TrackingColumnType::Timestamp => TrackerKind::Timestamp,
        }
    }

    pub fn zero(&self) -> CheckpointValue {
        match self {
            TrackerKind::Numeric => CheckpointValue::Integer(0),
            TrackerKind::Uuid => CheckpointValue::Uuid(ZERO_UUID.to_string()),
            TrackerKind::Timestamp => CheckpointValue::Timestamp(DateTime::UNIX_EPOCH),
        }
    }

    /// Accept a decoded persisted value only if it has this tracker's shape.
    fn coerce(&self, persisted: CheckpointValue) -> Option<CheckpointValue> {
        match (self, persisted) {
            (TrackerKind::Numeric, v @ CheckpointValue::Integer(_))
            | (TrackerKind::Numeric, v @ CheckpointValue::Decimal(_))
            | (TrackerKind::Uuid, v @ CheckpointValue::Uuid(_))
            | (TrackerKind::Timestamp, v @ CheckpointValue::Timestamp(_)) => Some(v),
            _ => None,
        }
    }

    /// Convert a raw column value using this tracker's update rule.
    ///
    /// `Ok(None)` means the value is not of the expected type and is ignored.
    fn update_from(&self, raw: &Value) -> Result<Option<CheckpointValue>> {
        match (self, raw) {
            (TrackerKind::Numeric, Value::Int(i)) => Ok(Some(CheckpointValue::Integer(*i))),
            (TrackerKind::Numeric, Value::Float(f)) => {
                Ok(Decimal::from_f64(*f).map(CheckpointValue::Decimal))
            }
            (TrackerKind::Numeric, Value::Decimal(d)) => Ok(Some(CheckpointValue::Decimal(*d))),
            (TrackerKind::Numeric, _) => Ok(None),
            (TrackerKind::Uuid, Value::String(s)) => Ok(Some(CheckpointValue::Uuid(s.clone()))),
            (TrackerKind::Uuid, _) => Ok(None),
            (TrackerKind::Timestamp, Value::Timestamp(ts)) => {
                Ok(Some(CheckpointValue::Timestamp(*ts)))
            }
            (TrackerKind::Timestamp, Value::String(s)) => parse_timestamp(s)
                .map(|ts| Some(CheckpointValue::Timestamp(ts)))
                .ok_or_else(|| {
                    Error::InvalidCheckpoint(format!("cannot parse '{}' as a timestamp", s))
                }),
            (TrackerKind::Timestamp, other) => Err(Error::InvalidCheckpoint(format!(
                "expected a timestamp, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Typed, persisted checkpoint.
pub struct ValueTracker {
    kind: TrackerKind,
    value: CheckpointValue,
    store: Box<dyn CheckpointStore>,
}

impl ValueTracker {
    /// Load the tracker from its store. Missing, unreadable or mismatched
    /// contents are discarded and the zero value is used instead.
    pub fn load(kind: TrackerKind, store: Box<dyn CheckpointStore>, clean_run: bool) -> Self {
        if clean_run {
            if let Err(e) = store.clean() {
                warn!(error = %e, "Failed to remove checkpoint for clean run");
            }
        }

        let persisted = match store.read() {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted checkpoint");
                None
            }
        };

        let restored = persisted
            .as_deref()
            .and_then(decode_checkpoint)
            .and_then(|value| kind.coerce(value));

        let value = match restored {
            Some(value) => {
                info!(?value, "Restored checkpoint");
                value
            }
            None => {
                if persisted.is_some() {
                    warn!(?kind, "Discarding unreadable persisted checkpoint");
                    if let Err(e) = store.clean() {
                        warn!(error = %e, "Failed to remove stale checkpoint");
                    }
                }
                kind.zero()
            }
        };

        Self { kind, value, store }
    }

    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    pub fn current_value(&self) -> &CheckpointValue {
        &self.value
    }

    /// Advance to a new value after a successful run.
    ///
    /// Returns whether the value was accepted.
    pub fn record_success(&mut self, raw: &Value) -> Result<bool> {
        match self.kind.update_from(raw)? {
            Some(value) => {
                debug!(?value, "Advancing checkpoint");
                self.value = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Flush the current value to the store.
    pub fn persist(&self) -> Result<()> {
        let encoded = encode_checkpoint(&self.value)?;
        self.store.write(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct MemoryStore {
        contents: Arc<Mutex<Option<String>>>,
    }

    impl CheckpointStore for MemoryStore {
        fn read(&self) -> Result<Option<String>> {
            Ok(self.contents.lock().unwrap().clone())
        }

        fn write(&self, contents: &str) -> Result<()> {
            *self.contents.lock().unwrap() = Some(contents.to_string());
            Ok(())
        }

        fn clean(&self) -> Result<()> {
            *self.contents.lock().unwrap() = None;
            Ok(())
        }
    }

    fn store_with(contents: &str) -> MemoryStore {
        let store = MemoryStore::default();
        store.write(contents).unwrap();
        store
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(TrackerKind::Numeric.zero(), CheckpointValue::Integer(0));
        assert_eq!(TrackerKind::Uuid.zero(), CheckpointValue::Uuid(ZERO_UUID.into()));
        assert_eq!(
            TrackerKind::Timestamp.zero(),
            CheckpointValue::Timestamp(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_select_kind() {
        assert_eq!(
            TrackerKind::select(false, TrackingColumnType::Numeric),
            TrackerKind::Timestamp
        );
        assert_eq!(
            TrackerKind::select(true, TrackingColumnType::Uuid),
            TrackerKind::Uuid
        );
    }

    #[test]
    fn test_file_round_trip_timestamp_with_nanos() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_run");
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();

        let mut tracker = ValueTracker::load(
            TrackerKind::Timestamp,
            Box::new(FileCheckpointStore::new(&path)),
            false,
        );
        assert!(tracker.record_success(&Value::Timestamp(ts)).unwrap());
        tracker.persist().unwrap();

        let reloaded = ValueTracker::load(
            TrackerKind::Timestamp,
            Box::new(FileCheckpointStore::new(&path)),
            false,
        );
        assert_eq!(reloaded.current_value(), &CheckpointValue::Timestamp(ts));
    }

    #[test]
    fn test_round_trip_numeric_and_uuid() {
        for (kind, raw, expected) in [
            (TrackerKind::Numeric, Value::Int(50), CheckpointValue::Integer(50)),
            (
                TrackerKind::Numeric,
                Value::Float(2.5),
                CheckpointValue::Decimal(Decimal::new(25, 1)),
            ),
            (
                TrackerKind::Numeric,
                Value::Decimal("12345678901234567.25".parse().unwrap()),
                CheckpointValue::Decimal("12345678901234567.25".parse().unwrap()),
            ),
            (
                TrackerKind::Uuid,
                Value::from("2b1e6a3c-7f7c-4db4-9f51-43f0e2f3a111"),
                CheckpointValue::Uuid("2b1e6a3c-7f7c-4db4-9f51-43f0e2f3a111".into()),
            ),
        ] {
            let store = MemoryStore::default();
            let mut tracker = ValueTracker::load(kind, Box::new(store.clone()), false);
            tracker.record_success(&raw).unwrap();
            tracker.persist().unwrap();

            let reloaded = ValueTracker::load(kind, Box::new(store), false);
            assert_eq!(reloaded.current_value(), &expected);
        }
    }

    #[test]
    fn test_malformed_contents_fall_back_to_zero() {
        for contents in ["{not json", "--- !ruby/object:Set {}", "[1,2,3]", "   "] {
            let store = store_with(contents);
            let tracker = ValueTracker::load(TrackerKind::Numeric, Box::new(store.clone()), false);
            assert_eq!(tracker.current_value(), &CheckpointValue::Integer(0));
        }
    }

    #[test]
    fn test_mismatched_type_discards_file() {
        let store = store_with(r#"{"version":1,"value":{"type":"uuid","value":"abc"}}"#);
        let tracker = ValueTracker::load(TrackerKind::Numeric, Box::new(store.clone()), false);
        assert_eq!(tracker.current_value(), &CheckpointValue::Integer(0));
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_zero() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("absent"));
        let tracker = ValueTracker::load(TrackerKind::Uuid, Box::new(store), false);
        assert_eq!(tracker.current_value(), &TrackerKind::Uuid.zero());
    }

    #[test]
    fn test_clean_run_discards_persisted() {
        let store = store_with("--- 20\n");
        let tracker = ValueTracker::load(TrackerKind::Numeric, Box::new(store), true);
        assert_eq!(tracker.current_value(), &CheckpointValue::Integer(0));
    }

    #[test]
    fn test_legacy_yaml_formats() {
        assert_eq!(decode_checkpoint("--- 20\n"), Some(CheckpointValue::Integer(20)));
        assert_eq!(
            decode_checkpoint("--- !ruby/object:BigDecimal 18:0.5e1\n"),
            Some(CheckpointValue::Integer(5))
        );
        assert_eq!(
            decode_checkpoint("--- !ruby/object:BigDecimal 27:0.125e1\n"),
            Some(CheckpointValue::Decimal(Decimal::new(125, 2)))
        );
        assert_eq!(
            decode_checkpoint("--- 2021-01-01 10:20:30.123456789 Z\n"),
            Some(CheckpointValue::Timestamp(
                Utc.timestamp_opt(1_609_496_430, 123_456_789).unwrap()
            ))
        );
        assert_eq!(
            decode_checkpoint("--- !ruby/object:DateTime '2021-01-01 10:20:30.000000000 Z'\n"),
            Some(CheckpointValue::Timestamp(
                Utc.with_ymd_and_hms(2021, 1, 1, 10, 20, 30).unwrap()
            ))
        );
        assert_eq!(
            decode_checkpoint("--- 2021-01-01 12:20:30.000000000 +02:00\n"),
            Some(CheckpointValue::Timestamp(
                Utc.with_ymd_and_hms(2021, 1, 1, 10, 20, 30).unwrap()
            ))
        );
        assert_eq!(
            decode_checkpoint("--- 'a1b2'\n"),
            Some(CheckpointValue::Uuid("a1b2".into()))
        );
    }

    #[test]
    fn test_bare_json_scalars() {
        assert_eq!(decode_checkpoint("42"), Some(CheckpointValue::Integer(42)));
        assert_eq!(
            decode_checkpoint("4.5"),
            Some(CheckpointValue::Decimal(Decimal::new(45, 1)))
        );
        // Written before decimals were stored as strings.
        assert_eq!(
            decode_checkpoint(r#"{"version":1,"value":{"type":"decimal","value":2.5}}"#),
            Some(CheckpointValue::Decimal(Decimal::new(25, 1)))
        );
        assert_eq!(
            decode_checkpoint(r#""2024-05-01T00:00:00Z""#),
            Some(CheckpointValue::Timestamp(
                Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn test_numeric_ignores_other_types() {
        let mut tracker =
            ValueTracker::load(TrackerKind::Numeric, Box::new(NullCheckpointStore), false);
        assert!(!tracker.record_success(&Value::from("nope")).unwrap());
        assert_eq!(tracker.current_value(), &CheckpointValue::Integer(0));
    }

    #[test]
    fn test_timestamp_accepts_strings() {
        let mut tracker =
            ValueTracker::load(TrackerKind::Timestamp, Box::new(NullCheckpointStore), false);
        tracker
            .record_success(&Value::from("2023-06-01 08:00:00.250"))
            .unwrap();
        assert_eq!(
            tracker.current_value(),
            &CheckpointValue::Timestamp(Utc.timestamp_opt(1_685_606_400, 250_000_000).unwrap())
        );
        assert!(tracker.record_success(&Value::from("garbage")).is_err());
    }

    #[test]
    fn test_null_store_persist_is_noop() {
        let tracker =
            ValueTracker::load(TrackerKind::Numeric, Box::new(NullCheckpointStore), false);
        tracker.persist().unwrap();
        assert!(NullCheckpointStore.read().unwrap().is_none());
    }
}
