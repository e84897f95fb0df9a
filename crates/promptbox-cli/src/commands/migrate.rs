use std::path::Path;

use promptbox_core::models::Resolution;

use crate::commands::common::{open_engine, short_id};
use crate::error::CliError;

pub async fn run_migrate(
    user_id: &str,
    resolve: Option<Resolution>,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let engine = open_engine(db_path, config_path)?;
    let protected = engine.protect_snapshot().await?;
    tracing::debug!("Protected {protected} local prompts before migrating");

    let report = engine.migrate(user_id).await?;
    if report.already_migrated {
        println!("Account {user_id} is already migrated");
        return Ok(());
    }

    println!(
        "Migrated into {user_id}: {} uploaded, {} adopted, {} conflict(s)",
        report.uploaded, report.adopted, report.conflicts
    );

    if let Some(resolution) = resolve {
        let outcomes = engine.resolve_all(resolution).await?;
        println!("Resolved {} conflict(s) with {}", outcomes.len(), resolution.as_str());
        return Ok(());
    }
    // Unresolved conflicts keep the local copy until `sync --resolve` settles them.
    for conflict in engine.open_conflicts().await? {
        println!(
            "  {}  kept local \"{}\", remote has \"{}\"",
            short_id(&conflict.prompt_id),
            conflict.local.title,
            conflict.remote.title
        );
    }
    if report.conflicts > 0 {
        println!("Run `promptbox sync --resolve keep-local|keep-remote|keep-both` to settle them");
    }
    Ok(())
}
