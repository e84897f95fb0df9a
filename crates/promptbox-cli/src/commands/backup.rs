use std::path::Path;
use std::sync::Arc;

use promptbox_core::backup::{BackupDocument, BackupService, RestoreOptions, RestoreReport};
use promptbox_core::config::SyncSettings;
use promptbox_core::models::AuditEntry;
use promptbox_core::sync::{HttpRemote, RemoteStore, RetryPolicy, SyncQueue};
use promptbox_core::LocalStore;

use crate::commands::common::{format_timestamp, load_settings, open_store};
use crate::error::CliError;

const BACKUP_SOURCE: &str = "promptbox-cli";

pub fn backup_service(
    store: LocalStore,
    settings: &SyncSettings,
    remote: Option<Arc<dyn RemoteStore>>,
) -> BackupService {
    let queue = SyncQueue::new(store.clone(), RetryPolicy::from_settings(settings));
    BackupService::new(store, queue, remote)
}

fn open_backup_service(
    db_path: &Path,
    config_path: Option<&Path>,
    require_remote: bool,
) -> Result<BackupService, CliError> {
    let settings = load_settings(config_path)?;
    let remote = match HttpRemote::from_settings(&settings)? {
        Some(remote) => Some(Arc::new(remote) as Arc<dyn RemoteStore>),
        None if require_remote => return Err(CliError::SyncNotConfigured),
        None => None,
    };
    let store = open_store(db_path)?;
    Ok(backup_service(store, &settings, remote))
}

pub async fn run_backup_export(
    output_path: Option<&Path>,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let service = open_backup_service(db_path, config_path, false)?;
    let document = service.export(BACKUP_SOURCE).await?;

    if let Some(path) = output_path {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        document.write_to(path)?;
        println!(
            "Exported {} prompt(s) to {}",
            document.manifest.total_entities,
            path.display()
        );
    } else {
        println!("{}", document.to_json()?);
    }
    Ok(())
}

pub async fn run_backup_restore(
    path: &Path,
    options: RestoreOptions,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let document = BackupDocument::read_from(path)?;
    let service = open_backup_service(db_path, config_path, options.clear_remote_first)?;
    let report = service.restore(&document, &options).await?;
    print_report("Restored", &report);
    Ok(())
}

pub async fn run_backup_rollback(
    path: &Path,
    confirmation: Option<String>,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let document = BackupDocument::read_from(path)?;
    let service = open_backup_service(db_path, config_path, false)?;
    let report = service.rollback(&document, confirmation).await?;
    print_report("Rolled back", &report);
    Ok(())
}

pub async fn run_backup_audit(
    limit: usize,
    as_json: bool,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let service = open_backup_service(db_path, config_path, false)?;
    let entries = service.audit_log(limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No backup activity recorded.");
        return Ok(());
    }
    for line in format_audit_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_audit_lines(entries: &[AuditEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}  {:<12}  {}",
                format_timestamp(Some(entry.created_at)),
                entry.action.as_str(),
                entry.detail
            )
        })
        .collect()
}

fn print_report(verb: &str, report: &RestoreReport) {
    println!(
        "{verb}: {} imported, {} skipped as duplicates",
        report.imported, report.skipped
    );
    if report.cleared_local > 0 || report.cleared_remote > 0 {
        println!(
            "Cleared {} local and {} remote prompt(s) first",
            report.cleared_local, report.cleared_remote
        );
    }
}
