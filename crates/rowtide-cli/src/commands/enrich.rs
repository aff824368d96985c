use std::io::Write;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use rowtide_core::Record;
use rowtide_enrich::{StaticFilter, StreamingLookup};

use crate::config::ProjectConfig;
use crate::records::{parse_record, write_record};

/// Ticks when an interval is configured, otherwise never resolves.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn emit(record: &Record) -> Result<()> {
    let mut out = std::io::stdout().lock();
    write_record(&mut out, record)?;
    out.flush()?;
    Ok(())
}

pub async fn cmd_enrich_static(config: ProjectConfig) -> Result<()> {
    let settings = config
        .static_filter()?
        .to_settings()
        .context("Invalid [static_filter] configuration")?;
    let filter = StaticFilter::from_settings(&settings)?;
    filter
        .prepare()
        .await
        .context("Failed to build the local snapshot")?;

    let mut reload = filter.reload_interval().and_then(|period| {
        let start = tokio::time::Instant::now().checked_add(period)?;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Some(interval)
    });
    if let Some(period) = filter.reload_interval() {
        info!(interval = ?period, "Scheduled snapshot reloads");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut processed = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let mut record = match parse_record(&line) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "Skipping invalid input line");
                        continue;
                    }
                };
                filter.filter(&mut record).await;
                emit(&record)?;
                processed += 1;
            }
            _ = tick(&mut reload) => {
                if let Err(e) = filter.reload().await {
                    error!(error = %e, "Snapshot reload failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!(
        records = processed,
        reloads = filter.runner().reload_count(),
        "Static enrichment finished"
    );
    Ok(())
}

pub async fn cmd_enrich_stream(config: ProjectConfig) -> Result<()> {
    let settings = config
        .streaming()?
        .to_settings()
        .context("Invalid [streaming] configuration")?;
    let lookup = StreamingLookup::from_settings(&settings);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut processed = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let mut record = match parse_record(&line) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "Skipping invalid input line");
                        continue;
                    }
                };
                lookup.filter(&mut record).await;
                emit(&record)?;
                processed += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    lookup.manager().close().await;
    info!(records = processed, "Streaming enrichment finished");
    Ok(())
}
