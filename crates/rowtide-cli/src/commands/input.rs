use std::io::Write;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use rowtide_config::InputSettings;
use rowtide_core::{CheckpointStore, FileCheckpointStore, NullCheckpointStore, ValueTracker};
use rowtide_sql::{AnyConnector, ConnectionManager, IncrementalInput, StatementHandler};

use crate::config::ProjectConfig;
use crate::records::write_record;

pub fn build_input(settings: &InputSettings) -> IncrementalInput<AnyConnector> {
    let connector = AnyConnector::new(settings.connection.clone(), settings.options.clone());
    let manager =
        ConnectionManager::new(connector, settings.options.clone(), settings.connect_retry);

    let store: Box<dyn CheckpointStore> = if settings.checkpoint.record_last_run {
        Box::new(FileCheckpointStore::new(&settings.checkpoint.path))
    } else {
        Box::new(NullCheckpointStore)
    };
    let tracker = ValueTracker::load(
        settings.tracking.kind(),
        store,
        settings.checkpoint.clean_run,
    );

    let tracking_column = if settings.tracking.use_column_value {
        settings.tracking.column.clone()
    } else {
        None
    };

    IncrementalInput::new(
        manager,
        StatementHandler::new(settings.statement.clone()),
        tracker,
        settings.statement_retry,
    )
    .tracking_column(tracking_column)
    .target(settings.target.clone())
}

async fn run_and_print(input: &IncrementalInput<AnyConnector>) -> Result<bool> {
    let stdout = std::io::stdout();
    let mut write_failed = false;
    let completed = input
        .run_once(|record| {
            let mut out = stdout.lock();
            if let Err(e) = write_record(&mut out, &record) {
                if !write_failed {
                    warn!(error = %e, "Failed to write record");
                    write_failed = true;
                }
            }
        })
        .await?;
    stdout.lock().flush().context("Failed to flush stdout")?;
    Ok(completed)
}

pub async fn cmd_input(config: ProjectConfig, once: bool) -> Result<()> {
    let settings = config
        .input()?
        .to_settings()
        .context("Invalid [input] configuration")?;
    let input = build_input(&settings);

    let schedule = match settings.schedule {
        Some(schedule) if !once => schedule,
        _ => {
            if !run_and_print(&input).await.context("Input run failed")? {
                anyhow::bail!("Input statement failed, see the log for details");
            }
            return Ok(());
        }
    };

    info!(interval = ?schedule.interval(), "Starting scheduled input");
    let mut ticker = tokio::time::interval(schedule.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Failures are already logged; the next tick retries.
                let _ = run_and_print(&input).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    input.manager().close().await;
    Ok(())
}
