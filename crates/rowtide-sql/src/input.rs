//! Scheduled incremental ingest.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use rowtide_core::{CheckpointValue, Record, RetryPolicy, RowMap, Value, ValueTracker};

use crate::connection::Connector;
use crate::error::{DbError, DbResult};
use crate::handler::StatementHandler;
use crate::manager::ConnectionManager;

enum RunOutcome {
    Completed { rows: usize, tracked: Option<Value> },
    StatementFailed,
    ConnectFailed(DbError),
}

/// Runs the input statement and advances the checkpoint.
///
/// Rows are emitted as they are read. The checkpoint only moves after the
/// whole result set was read, so a failed run is replayed in full next time.
pub struct IncrementalInput<K: Connector> {
    manager: ConnectionManager<K>,
    handler: StatementHandler,
    statement_retry: RetryPolicy,
    tracker: Mutex<ValueTracker>,
    tracking_column: Option<String>,
    target: Option<String>,
}

impl<K: Connector> IncrementalInput<K> {
    pub fn new(
        manager: ConnectionManager<K>,
        handler: StatementHandler,
        tracker: ValueTracker,
        statement_retry: RetryPolicy,
    ) -> Self {
        Self {
            manager,
            handler,
            statement_retry,
            tracker: Mutex::new(tracker),
            tracking_column: None,
            target: None,
        }
    }

    /// Track progress by this column instead of by run time.
    pub fn tracking_column(mut self, column: Option<String>) -> Self {
        self.tracking_column = column;
        self
    }

    /// Nest each row under this field of the emitted record.
    pub fn target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }

    pub fn manager(&self) -> &ConnectionManager<K> {
        &self.manager
    }

    pub async fn checkpoint(&self) -> CheckpointValue {
        self.tracker.lock().await.current_value().clone()
    }

    /// Run the statement once.
    ///
    /// Returns `Ok(true)` when the run completed, `Ok(false)` when the
    /// statement failed after its retries, and `Err` when no connection
    /// could be opened. The checkpoint is persisted in every case.
    pub async fn run_once<F>(&self, mut emit: F) -> DbResult<bool>
    where
        F: FnMut(Record) + Send,
    {
        let started = Utc::now();
        let mut tracker = self.tracker.lock().await;
        let last_value = tracker.current_value().to_value();

        let outcome = self.execute(&last_value, &mut emit).await;

        let result = match outcome {
            RunOutcome::Completed { rows, tracked } => {
                let next = match &self.tracking_column {
                    Some(_) => tracked,
                    None => Some(Value::Timestamp(started)),
                };
                if let Some(value) = next {
                    match tracker.record_success(&value) {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            value = %value.to_display_string(),
                            "Tracking value has the wrong type, checkpoint not advanced"
                        ),
                        Err(e) => warn!(error = %e, "Checkpoint not advanced"),
                    }
                }
                info!(rows, statement = self.handler.kind(), "Run completed");
                Ok(true)
            }
            RunOutcome::StatementFailed => Ok(false),
            RunOutcome::ConnectFailed(e) => Err(e),
        };

        if let Err(e) = tracker.persist() {
            warn!(error = %e, "Failed to persist checkpoint");
        }
        result
    }

    async fn execute<F>(&self, last_value: &Value, emit: &mut F) -> RunOutcome
    where
        F: FnMut(Record) + Send,
    {
        let mut guard = self.manager.lock().await;
        let mut missing_warned = false;
        let mut attempt = 1;

        loop {
            let mut rows = 0;
            let mut tracked: Option<Value> = None;

            let result = match guard.open().await {
                Ok(active) => {
                    let mut on_row = |row: RowMap| {
                        rows += 1;
                        if let Some(column) = &self.tracking_column {
                            match row.get(column) {
                                Some(value) => tracked = Some(value.clone()),
                                None if !missing_warned => {
                                    warn!(
                                        column = %column,
                                        "Tracking column not found in result row"
                                    );
                                    missing_warned = true;
                                }
                                None => {}
                            }
                        }
                        emit(self.to_record(row));
                    };
                    self.handler
                        .perform_query(&active, last_value, &mut on_row)
                        .await
                }
                Err(e) => {
                    error!(error = %e, "Unable to connect to database");
                    return RunOutcome::ConnectFailed(e);
                }
            };

            match result {
                Ok(()) => return RunOutcome::Completed { rows, tracked },
                Err(DbError::AmbiguousTime(message)) => {
                    warn!(
                        error = %message,
                        "Local time is ambiguous or does not exist in the configured timezone, \
                         set dst_enabled_on_overlap on the timezone to resolve overlaps"
                    );
                    return RunOutcome::StatementFailed;
                }
                Err(e) if attempt < self.statement_retry.attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.statement_retry.attempts,
                        error = %e,
                        "Statement failed, retrying"
                    );
                    if e.is_connection_error() {
                        guard.close();
                    }
                    tokio::time::sleep(self.statement_retry.wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempts = attempt, error = %e, "Statement failed");
                    return RunOutcome::StatementFailed;
                }
            }
        }
    }

    fn to_record(&self, row: RowMap) -> Record {
        match &self.target {
            Some(target) => {
                let mut fields = HashMap::with_capacity(1);
                fields.insert(target.clone(), Value::Object(row));
                Record::from_row(fields)
            }
            None => Record::from_row(row),
        }
    }
}
