use std::time::Duration;

use tempfile::TempDir;

use rowtide_core::{
    decode_checkpoint, encode_checkpoint, BindValue, CheckpointStore, CheckpointValue,
    ConnectionOptions, ConnectionSettings, FileCheckpointStore, PagingMode, RetryPolicy,
    StatementSpec, TrackerKind, Value, ValueTracker,
};
use rowtide_sql::testing::MockConnector;
use rowtide_sql::{
    AnyConnector, ConnectionManager, DbError, IncrementalInput, Params, SqliteConnector,
    StatementHandler,
};

fn seed_remote(dir: &TempDir) -> String {
    let path = dir.path().join("remote.db");
    let path = path.to_string_lossy().to_string();
    let remote = SqliteConnector::file(path.clone(), ConnectionOptions::default())
        .open()
        .unwrap();
    remote
        .execute_batch(
            "CREATE TABLE events (num INTEGER, label TEXT);
             INSERT INTO events VALUES (10, 'a'), (20, 'b'), (30, 'c'), (40, 'd'), (50, 'e');",
        )
        .unwrap();
    path
}

fn sqlite_input(
    remote: &str,
    checkpoint: &std::path::Path,
    spec: StatementSpec,
) -> IncrementalInput<AnyConnector> {
    let connector = AnyConnector::new(
        ConnectionSettings::new("sqlite", format!("jdbc:sqlite:{}", remote)),
        ConnectionOptions::default(),
    );
    let manager = ConnectionManager::new(
        connector,
        ConnectionOptions::default(),
        RetryPolicy::new(2, Duration::ZERO),
    );
    let tracker = ValueTracker::load(
        TrackerKind::Numeric,
        Box::new(FileCheckpointStore::new(checkpoint)),
        false,
    );
    IncrementalInput::new(
        manager,
        StatementHandler::new(spec),
        tracker,
        RetryPolicy::once(),
    )
    .tracking_column(Some("num".into()))
}

#[tokio::test]
async fn test_resumes_from_persisted_checkpoint() {
    let dir = TempDir::new().unwrap();
    let remote = seed_remote(&dir);
    let checkpoint = dir.path().join(".rowtide_last_run");
    FileCheckpointStore::new(&checkpoint)
        .write(&encode_checkpoint(&CheckpointValue::Integer(20)).unwrap())
        .unwrap();

    let input = sqlite_input(
        &remote,
        &checkpoint,
        StatementSpec::new("SELECT * FROM events WHERE num > :sql_last_value ORDER BY num"),
    );

    let mut records = Vec::new();
    assert!(input.run_once(|r| records.push(r)).await.unwrap());

    let nums: Vec<Option<i64>> = records
        .iter()
        .map(|r| r.get("num").and_then(Value::as_i64))
        .collect();
    assert_eq!(nums, vec![Some(30), Some(40), Some(50)]);
    assert_eq!(input.checkpoint().await, CheckpointValue::Integer(50));

    let persisted = std::fs::read_to_string(&checkpoint).unwrap();
    assert_eq!(decode_checkpoint(&persisted), Some(CheckpointValue::Integer(50)));

    // Nothing new on the next run.
    let mut again = 0;
    assert!(input.run_once(|_| again += 1).await.unwrap());
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_legacy_yaml_checkpoint_is_honoured() {
    let dir = TempDir::new().unwrap();
    let remote = seed_remote(&dir);
    let checkpoint = dir.path().join(".rowtide_last_run");
    std::fs::write(&checkpoint, "--- 40\n").unwrap();

    let input = sqlite_input(
        &remote,
        &checkpoint,
        StatementSpec::new("SELECT * FROM events WHERE num > :sql_last_value"),
    );
    let mut count = 0;
    input.run_once(|_| count += 1).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_explicit_paging_against_sqlite() {
    let dir = TempDir::new().unwrap();
    let remote = seed_remote(&dir);
    let checkpoint = dir.path().join(".rowtide_last_run");

    let input = sqlite_input(
        &remote,
        &checkpoint,
        StatementSpec::new(
            "SELECT * FROM events WHERE num > :sql_last_value ORDER BY num LIMIT :size OFFSET :offset",
        )
        .paged(PagingMode::Explicit, 2),
    );
    let mut count = 0;
    assert!(input.run_once(|_| count += 1).await.unwrap());
    assert_eq!(count, 5);
    assert_eq!(input.checkpoint().await, CheckpointValue::Integer(50));
}

#[tokio::test]
async fn test_auto_paging_against_sqlite() {
    let dir = TempDir::new().unwrap();
    let remote = seed_remote(&dir);
    let checkpoint = dir.path().join(".rowtide_last_run");

    let input = sqlite_input(
        &remote,
        &checkpoint,
        StatementSpec::new("SELECT * FROM events ORDER BY num").paged(PagingMode::Auto, 3),
    );
    let mut count = 0;
    assert!(input.run_once(|_| count += 1).await.unwrap());
    assert_eq!(count, 5);
}

#[tokio::test]
async fn test_prepared_statement_against_sqlite() {
    let dir = TempDir::new().unwrap();
    let remote = seed_remote(&dir);
    let checkpoint = dir.path().join(".rowtide_last_run");

    let input = sqlite_input(
        &remote,
        &checkpoint,
        StatementSpec::new("SELECT * FROM events WHERE num > ? AND label <> ?").prepared(
            "events_since",
            vec![BindValue::LastValue, BindValue::Literal(Value::from("e"))],
        ),
    );
    let mut count = 0;
    assert!(input.run_once(|_| count += 1).await.unwrap());
    assert_eq!(count, 4);
    assert_eq!(input.checkpoint().await, CheckpointValue::Integer(40));

    // The connection was closed after the run, so the statement is
    // prepared again on the new one.
    let mut count = 0;
    assert!(input.run_once(|_| count += 1).await.unwrap());
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_partial_failure_does_not_advance_checkpoint() {
    let mock = MockConnector::with_responder(|call| {
        let offset = call.param("offset").and_then(Value::as_i64).unwrap_or(0);
        if offset > 0 {
            return Err(DbError::Query("canceling statement due to conflict".into()));
        }
        Ok((1..=10)
            .map(|n| rowtide_core::row([("num", n as i64)]))
            .collect())
    });
    let manager = ConnectionManager::new(
        mock.clone(),
        ConnectionOptions::default(),
        RetryPolicy::once(),
    );
    let dir = TempDir::new().unwrap();
    let checkpoint = dir.path().join(".rowtide_last_run");
    let tracker = ValueTracker::load(
        TrackerKind::Numeric,
        Box::new(FileCheckpointStore::new(&checkpoint)),
        false,
    );
    let input = IncrementalInput::new(
        manager,
        StatementHandler::new(
            StatementSpec::new("SELECT * FROM t LIMIT :size OFFSET :offset")
                .paged(PagingMode::Explicit, 10),
        ),
        tracker,
        RetryPolicy::once(),
    )
    .tracking_column(Some("num".into()));

    let mut streamed = 0;
    assert!(!input.run_once(|_| streamed += 1).await.unwrap());
    assert_eq!(streamed, 10);
    assert_eq!(input.checkpoint().await, CheckpointValue::Integer(0));
    assert_eq!(
        decode_checkpoint(&std::fs::read_to_string(&checkpoint).unwrap()),
        Some(CheckpointValue::Integer(0))
    );
}

#[tokio::test]
async fn test_unreachable_database_reports_connect_failure() {
    let connector = AnyConnector::new(
        ConnectionSettings::new("sqlite", "jdbc:sqlite:/nonexistent/dir/remote.db"),
        ConnectionOptions::default(),
    );
    let manager =
        ConnectionManager::new(connector, ConnectionOptions::default(), RetryPolicy::once());
    let mut guard = manager.lock().await;
    let err = guard.open().await.err().unwrap();
    assert!(matches!(err, DbError::Connection(_)));

    // Query errors from a live session are not connection errors.
    let local = SqliteConnector::memory(ConnectionOptions::default())
        .open()
        .unwrap();
    let err = local
        .query_sync("SELECT * FROM missing", &Params::None)
        .unwrap_err();
    assert!(!err.is_connection_error());
}
