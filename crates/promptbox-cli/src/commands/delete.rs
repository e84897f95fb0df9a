use std::path::Path;

use crate::commands::common::{open_prompt_service, resolve_prompt};
use crate::error::CliError;

pub async fn run_delete(
    id: &str,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let service = open_prompt_service(db_path, config_path)?;
    let prompt = resolve_prompt(id, service.store()).await?;
    let (archived, receipt) = service.archive(&prompt.id).await?;

    if receipt.is_some() {
        println!("Archived {}", archived.id);
    } else {
        println!("{} was already archived", archived.id);
    }
    Ok(())
}
