use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use promptbox_core::models::{QueueStatus, Resolution};
use promptbox_core::sync::{FlushOutcome, SkipReason};
use promptbox_core::util::from_millis;
use promptbox_core::SyncEngine;
use serde::Serialize;

use crate::commands::common::{format_timestamp, open_engine, open_prompt_service, short_id};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct QueueStatusItem {
    pub pending: usize,
    pub parked: usize,
    pub dropped_total: u64,
    pub oldest_pending_at: Option<i64>,
    pub last_sync_at: Option<i64>,
    pub last_error: Option<String>,
}

impl QueueStatusItem {
    pub fn new(status: QueueStatus, last_sync_at: Option<DateTime<Utc>>) -> Self {
        Self {
            pending: status.pending,
            parked: status.parked,
            dropped_total: status.dropped_total,
            oldest_pending_at: status.oldest_created_at.map(|at| at.timestamp_millis()),
            last_sync_at: last_sync_at.map(|at| at.timestamp_millis()),
            last_error: status.last_error,
        }
    }
}

/// What one `promptbox sync` invocation did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub sent: usize,
    pub confirmed: usize,
    pub pulled: usize,
    pub conflicts: usize,
    pub resolved: usize,
}

pub async fn run_sync(
    resolve: Option<Resolution>,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let engine = open_engine(db_path, config_path)?;
    let summary = sync_once(&engine, resolve).await?;

    println!(
        "Sync completed: {} sent, {} confirmed, {} pulled",
        summary.sent, summary.confirmed, summary.pulled
    );
    if summary.resolved > 0 {
        println!("Resolved {} conflict(s)", summary.resolved);
    }
    // Includes conflicts left open by earlier runs.
    let unresolved = engine.open_conflicts().await?;
    if !unresolved.is_empty() {
        println!("{} conflict(s) need a decision:", unresolved.len());
        for conflict in unresolved {
            println!(
                "  {}  local \"{}\" vs remote \"{}\" ({} ms apart)",
                short_id(&conflict.prompt_id),
                conflict.local.title,
                conflict.remote.title,
                conflict.delta_ms
            );
        }
        println!("Re-run with --resolve keep-local|keep-remote|keep-both");
    }
    Ok(())
}

/// Flush once and optionally resolve every open conflict.
pub async fn sync_once(
    engine: &SyncEngine,
    resolve: Option<Resolution>,
) -> Result<SyncSummary, CliError> {
    let mut summary = match engine.flush().await? {
        FlushOutcome::Completed {
            sent,
            confirmed,
            pulled,
            conflicts,
        } => SyncSummary {
            sent,
            confirmed,
            pulled,
            conflicts,
            resolved: 0,
        },
        FlushOutcome::Skipped(SkipReason::Offline) => {
            return Err(CliError::SyncSkipped("offline".to_string()));
        }
        FlushOutcome::Skipped(SkipReason::AlreadyRunning) => {
            return Err(CliError::SyncSkipped("another sync is running".to_string()));
        }
        FlushOutcome::Failed {
            error,
            newly_parked,
            ..
        } => {
            if newly_parked > 0 {
                eprintln!(
                    "{newly_parked} item(s) exhausted their retries; run `promptbox queue retry`"
                );
            }
            return Err(CliError::SyncFailed(error));
        }
    };

    if let Some(resolution) = resolve {
        summary.resolved = engine.resolve_all(resolution).await?.len();
    }
    Ok(summary)
}

pub async fn run_queue_status(
    as_json: bool,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let service = open_prompt_service(db_path, config_path)?;
    let status = service.queue().status().await?;
    let last_sync_at = service
        .store()
        .device_identity()
        .await?
        .and_then(|identity| identity.last_sync_at);
    let item = QueueStatusItem::new(status, last_sync_at);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }
    for line in format_status_lines(&item) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(status: &QueueStatusItem) -> Vec<String> {
    let timestamp = |millis: Option<i64>| format_timestamp(millis.map(from_millis));
    let mut lines = vec![
        format!("pending:   {}", status.pending),
        format!("parked:    {}", status.parked),
        format!("dropped:   {}", status.dropped_total),
        format!("oldest:    {}", timestamp(status.oldest_pending_at)),
        format!("last sync: {}", timestamp(status.last_sync_at)),
    ];
    if let Some(error) = &status.last_error {
        lines.push(format!("error:     {error}"));
    }
    lines
}

pub async fn run_queue_retry(db_path: &Path, config_path: Option<&Path>) -> Result<(), CliError> {
    let engine = open_engine(db_path, config_path)?;
    match engine.retry_parked().await? {
        FlushOutcome::Completed { confirmed, .. } => {
            println!("Retried parked items: {confirmed} confirmed");
            Ok(())
        }
        FlushOutcome::Skipped(reason) => Err(CliError::SyncSkipped(format!("{reason:?}"))),
        FlushOutcome::Failed { error, .. } => Err(CliError::SyncFailed(error)),
    }
}

pub async fn run_queue_clear(
    skip_confirmation: bool,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    if !skip_confirmation && !confirm("Discard every unsynced edit? Type 'yes' to continue: ")? {
        return Err(CliError::Aborted);
    }
    let engine = open_engine(db_path, config_path)?;
    let removed = engine.clear_queue().await?;
    println!("Removed {removed} queued item(s)");
    Ok(())
}

fn confirm(question: &str) -> Result<bool, CliError> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }
    print!("{question}");
    io::stdout().flush()?;

    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}
