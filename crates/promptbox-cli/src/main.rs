//! promptbox CLI - keep a prompt library in the terminal
//!
//! Every edit lands in the local store first and is queued for the next sync.

mod cli;
mod commands;
mod error;

use clap::Parser;
use promptbox_core::backup::RestoreOptions;

use crate::cli::{BackupCommands, Cli, Commands, DeviceCommands, QueueCommands};
use crate::commands::add::run_add;
use crate::commands::backup::{
    run_backup_audit, run_backup_export, run_backup_restore, run_backup_rollback,
};
use crate::commands::common::resolve_db_path;
use crate::commands::delete::run_delete;
use crate::commands::device::{run_device_register, run_device_show};
use crate::commands::edit::{run_edit, EditArgs};
use crate::commands::list::{run_list, run_show, run_tags};
use crate::commands::migrate::run_migrate;
use crate::commands::purge::run_purge;
use crate::commands::sync::{run_queue_clear, run_queue_retry, run_queue_status, run_sync};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "promptbox=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path)?;
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Add {
            title,
            content,
            tags,
            pinned,
        } => run_add(&title, &content, &tags, pinned, &db_path, config).await?,
        Commands::List {
            limit,
            tag,
            archived,
            json,
        } => run_list(limit, tag.as_deref(), archived, json, &db_path).await?,
        Commands::Show { id, json } => run_show(&id, json, &db_path).await?,
        Commands::Edit {
            id,
            title,
            content,
            tags,
            pinned,
        } => {
            let args = EditArgs {
                title,
                content,
                tags,
                pinned,
            };
            run_edit(&id, args, &db_path, config).await?;
        }
        Commands::Delete { id } => run_delete(&id, &db_path, config).await?,
        Commands::Tags { json } => run_tags(json, &db_path).await?,
        Commands::Sync { resolve } => run_sync(resolve.map(Into::into), &db_path, config).await?,
        Commands::Queue { command } => match command {
            QueueCommands::Status { json } => run_queue_status(json, &db_path, config).await?,
            QueueCommands::Retry => run_queue_retry(&db_path, config).await?,
            QueueCommands::Clear { yes } => run_queue_clear(yes, &db_path, config).await?,
        },
        Commands::Device { command } => match command {
            DeviceCommands::Register { name, device_type } => {
                run_device_register(name.as_deref(), device_type.into(), &db_path, config).await?;
            }
            DeviceCommands::Show => run_device_show(&db_path).await?,
        },
        Commands::Migrate { user, resolve } => {
            run_migrate(&user, resolve.map(Into::into), &db_path, config).await?;
        }
        Commands::Backup { command } => match command {
            BackupCommands::Export { output } => {
                run_backup_export(output.as_deref(), &db_path, config).await?;
            }
            BackupCommands::Restore {
                path,
                no_import,
                clear_local,
                clear_remote,
                confirm,
            } => {
                let options = RestoreOptions {
                    restore_local: !no_import,
                    clear_local_first: clear_local,
                    clear_remote_first: clear_remote,
                    confirmation: confirm,
                };
                run_backup_restore(&path, options, &db_path, config).await?;
            }
            BackupCommands::Rollback { path, confirm } => {
                run_backup_rollback(&path, confirm, &db_path, config).await?;
            }
            BackupCommands::Audit { limit, json } => {
                run_backup_audit(limit, json, &db_path, config).await?;
            }
        },
        Commands::Purge => run_purge(&db_path, config).await?,
    }

    Ok(())
}
