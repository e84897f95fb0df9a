use std::path::Path;

use promptbox_core::util::now;

use crate::commands::common::{load_settings, open_store};
use crate::error::CliError;

pub async fn run_purge(db_path: &Path, config_path: Option<&Path>) -> Result<(), CliError> {
    let settings = load_settings(config_path)?;
    let store = open_store(db_path)?;

    let cutoff = now() - settings.archive_retention();
    let removed = store.purge_archived(cutoff).await?;
    println!("Purged {removed} archived prompt(s)");
    Ok(())
}
