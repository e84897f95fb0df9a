use std::path::Path;

use promptbox_core::db::ListQuery;
use promptbox_core::models::TagCount;
use promptbox_core::{LocalStore, Prompt};

use crate::commands::common::{
    format_prompt_lines, format_timestamp, open_store, prompt_to_list_item, render_tags,
    resolve_prompt, PromptListItem,
};
use crate::error::CliError;

pub async fn list_prompts(
    store: &LocalStore,
    limit: usize,
    tag: Option<&str>,
    include_archived: bool,
) -> Result<Vec<Prompt>, CliError> {
    let query = ListQuery {
        tag: tag.map(|tag| tag.trim().to_lowercase()),
        include_archived,
        ..ListQuery::with_limit(limit)
    };
    Ok(store.list_prompts(&query).await?)
}

pub async fn run_list(
    limit: usize,
    tag: Option<&str>,
    include_archived: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let prompts = list_prompts(&store, limit, tag, include_archived).await?;

    if as_json {
        let json_items = prompts
            .iter()
            .map(prompt_to_list_item)
            .collect::<Vec<PromptListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if prompts.is_empty() {
        println!("No prompts yet.");
    } else {
        for line in format_prompt_lines(&prompts) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_show(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let prompt = resolve_prompt(id, &store).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&prompt_to_list_item(&prompt))?);
        return Ok(());
    }

    println!("{}", prompt.title);
    println!("id:       {}", prompt.id);
    println!("version:  {}", prompt.version);
    println!("updated:  {}", format_timestamp(Some(prompt.updated_at)));
    if prompt.pinned {
        println!("pinned:   yes");
    }
    if let Some(archived_at) = prompt.archived_at {
        println!("archived: {}", format_timestamp(Some(archived_at)));
    }
    let tags = render_tags(&prompt);
    if !tags.is_empty() {
        println!("tags:     {tags}");
    }
    println!();
    println!("{}", prompt.content);
    Ok(())
}

pub async fn run_tags(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let tags = store.list_tags().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
        return Ok(());
    }
    if tags.is_empty() {
        println!("No tags yet.");
        return Ok(());
    }
    for TagCount { name, count } in tags {
        println!("#{name:<24} {count}");
    }
    Ok(())
}
