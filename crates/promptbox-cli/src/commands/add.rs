use std::path::Path;

use promptbox_core::models::{normalize_tags, NewPrompt};
use promptbox_core::services::PromptService;
use promptbox_core::Prompt;

use crate::commands::common::{normalize_title, open_prompt_service, resolve_prompt_content};
use crate::error::CliError;

pub async fn run_add(
    title: &str,
    content_parts: &[String],
    tags: &[String],
    pinned: bool,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let title = normalize_title(title)?;
    let content = resolve_prompt_content(content_parts)?;

    let service = open_prompt_service(db_path, config_path)?;
    let prompt = add_prompt(&service, title, content, tags, pinned).await?;

    println!("{}", prompt.id);
    Ok(())
}

pub async fn add_prompt(
    service: &PromptService,
    title: String,
    content: String,
    tags: &[String],
    pinned: bool,
) -> Result<Prompt, CliError> {
    let (prompt, receipt) = service
        .create(NewPrompt {
            title,
            content,
            tags: normalize_tags(tags),
            pinned,
            ..NewPrompt::default()
        })
        .await?;

    if receipt.dropped > 0 {
        eprintln!(
            "Warning: sync queue is full; {} oldest pending edit(s) were dropped",
            receipt.dropped
        );
    }
    Ok(prompt)
}
