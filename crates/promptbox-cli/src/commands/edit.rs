use std::path::Path;

use promptbox_core::models::{normalize_tags, PromptPatch};
use promptbox_core::services::PromptService;
use promptbox_core::Prompt;

use crate::commands::common::{
    capture_editor_input_with_initial, normalize_content, normalize_title, open_prompt_service,
    resolve_prompt,
};
use crate::error::CliError;

#[derive(Debug, Default)]
pub struct EditArgs {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub pinned: Option<bool>,
}

impl EditArgs {
    const fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.tags.is_none() && self.pinned.is_none()
    }
}

pub async fn run_edit(
    id: &str,
    args: EditArgs,
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let service = open_prompt_service(db_path, config_path)?;
    let prompt = resolve_prompt(id, service.store()).await?;

    let args = if args.is_empty() {
        let content = capture_editor_input_with_initial(&prompt.content)?
            .ok_or(CliError::EmptyEditedContent)?;
        EditArgs {
            content: Some(content),
            ..EditArgs::default()
        }
    } else {
        args
    };

    let (updated, changed) = edit_prompt(&service, &prompt, args).await?;
    if changed {
        println!("{} (version {})", updated.id, updated.version);
    } else {
        println!("{} unchanged", updated.id);
    }
    Ok(())
}

/// Returns the stored prompt and whether anything was queued.
pub async fn edit_prompt(
    service: &PromptService,
    prompt: &Prompt,
    args: EditArgs,
) -> Result<(Prompt, bool), CliError> {
    let patch = PromptPatch {
        title: args.title.as_deref().map(normalize_title).transpose()?,
        content: match args.content {
            Some(content) => Some(normalize_content(&content).ok_or(CliError::EmptyEditedContent)?),
            None => None,
        },
        tags: args.tags.map(normalize_tags),
        pinned: args.pinned,
        sort_order: None,
    };

    let (updated, receipt) = service.update(&prompt.id, patch).await?;
    Ok((updated, receipt.is_some()))
}
