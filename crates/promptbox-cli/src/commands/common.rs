use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use promptbox_core::config::SyncSettings;
use promptbox_core::services::PromptService;
use promptbox_core::sync::{HttpRemote, RetryPolicy, SyncQueue};
use promptbox_core::{LocalStore, Prompt, PromptId, SyncEngine};
use serde::Serialize;

use crate::error::CliError;

pub const ENV_DB_PATH: &str = "PROMPTBOX_DB_PATH";
pub const ENV_CONFIG_PATH: &str = "PROMPTBOX_CONFIG";

#[derive(Debug, Serialize)]
pub struct PromptListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub content: String,
    pub tags: Vec<String>,
    pub pinned: bool,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub archived: bool,
}

pub fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(LocalStore::open_path(db_path)?)
}

/// Settings file, then environment overrides, then validation.
pub fn load_settings(config_path: Option<&Path>) -> Result<SyncSettings, CliError> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => resolve_config_path()?,
    };
    let settings = SyncSettings::load_from_path(&path)?.with_env_overrides();
    settings.validate()?;
    Ok(settings)
}

/// Local-only prompt writes. Works with no remote configured.
pub fn prompt_service(store: LocalStore, settings: &SyncSettings) -> PromptService {
    let queue = SyncQueue::new(store.clone(), RetryPolicy::from_settings(settings));
    PromptService::new(store, queue)
}

pub fn open_prompt_service(
    db_path: &Path,
    config_path: Option<&Path>,
) -> Result<PromptService, CliError> {
    let settings = load_settings(config_path)?;
    let store = open_store(db_path)?;
    Ok(prompt_service(store, &settings))
}

pub fn open_engine(db_path: &Path, config_path: Option<&Path>) -> Result<SyncEngine, CliError> {
    let settings = load_settings(config_path)?;
    let remote = HttpRemote::from_settings(&settings)?.ok_or(CliError::SyncNotConfigured)?;
    tracing::info!("Syncing against {}", remote.base_url());
    let store = open_store(db_path)?;
    Ok(SyncEngine::new(store, Arc::new(remote), settings))
}

pub async fn resolve_prompt(query: &str, store: &LocalStore) -> Result<Prompt, CliError> {
    let query = normalize_prompt_identifier(query)?;
    if let Ok(id) = PromptId::parse(&query) {
        if let Some(prompt) = store.get_prompt(&id).await? {
            return Ok(prompt);
        }
    }

    let needle = query.to_lowercase();
    let mut matching = store
        .all_prompts()
        .await?
        .into_iter()
        .filter(|prompt| prompt.id.to_string().starts_with(&needle))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::PromptNotFound(query)),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|prompt| short_id(&prompt.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousPromptId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &PromptId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_prompt_lines(prompts: &[Prompt]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    prompts
        .iter()
        .map(|prompt| {
            let marker = if prompt.pinned { '*' } else { ' ' };
            let preview = prompt_preview(prompt, 40);
            let relative_time = format_relative_time(prompt.updated_at.timestamp_millis(), now_ms);
            let tags = render_tags(prompt);
            let short_id = short_id(&prompt.id);

            if tags.is_empty() {
                format!("{marker}{short_id:<13}  {preview:<40}  {relative_time}")
            } else {
                format!("{marker}{short_id:<13}  {preview:<40}  {relative_time:<10}  {tags}")
            }
        })
        .collect()
}

pub fn prompt_to_list_item(prompt: &Prompt) -> PromptListItem {
    let now_ms = Utc::now().timestamp_millis();
    PromptListItem {
        id: prompt.id.to_string(),
        title: prompt.title.clone(),
        preview: prompt_preview(prompt, 80),
        content: prompt.content.clone(),
        tags: prompt.tags.iter().cloned().collect(),
        pinned: prompt.pinned,
        version: prompt.version,
        created_at: prompt.created_at.timestamp_millis(),
        updated_at: prompt.updated_at.timestamp_millis(),
        relative_time: format_relative_time(prompt.updated_at.timestamp_millis(), now_ms),
        archived: prompt.is_archived(),
    }
}

/// Title, or the first content line for untitled prompts.
pub fn prompt_preview(prompt: &Prompt, max_chars: usize) -> String {
    let source = if prompt.title.trim().is_empty() {
        prompt.content.lines().next().unwrap_or_default()
    } else {
        prompt.title.as_str()
    };
    let source = source.trim();

    if source.chars().count() <= max_chars {
        return source.to_string();
    }
    let truncated = source
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    format!("{truncated}...")
}

pub fn render_tags(prompt: &Prompt) -> String {
    prompt
        .tags
        .iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp.map_or_else(
        || "never".to_string(),
        |timestamp| timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Content from args, then piped stdin, then the editor.
pub fn resolve_prompt_content(content_parts: &[String]) -> Result<String, CliError> {
    if !content_parts.is_empty() {
        return normalize_content(&content_parts.join(" ")).ok_or(CliError::EmptyContent);
    }
    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }
    capture_editor_input_with_initial("")?.ok_or(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_title(title: &str) -> Result<String, CliError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyTitle);
    }
    Ok(trimmed.to_string())
}

pub fn normalize_prompt_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyPromptId);
    }
    Ok(trimmed.to_string())
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_prompt_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let edited = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&edited))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    let status = match Command::new(editor).arg(file_path).status() {
        Ok(status) => status,
        // EDITOR may carry arguments, e.g. "code --wait"
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };
            Command::new(program).args(parts).arg(file_path).status()?
        }
        Err(err) => return Err(CliError::Io(err)),
    };

    if status.success() {
        Ok(())
    } else {
        Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        )))
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_prompt_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("promptbox-{}-{now}.md", std::process::id()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from)) {
        return Ok(path);
    }
    Ok(data_dir()?.join("promptbox.db"))
}

pub fn resolve_config_path() -> Result<PathBuf, CliError> {
    if let Some(path) = env::var_os(ENV_CONFIG_PATH) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::config_dir().ok_or(CliError::NoDataDir)?;
    Ok(base.join("promptbox").join("settings.json"))
}

fn data_dir() -> Result<PathBuf, CliError> {
    Ok(dirs::data_dir().ok_or(CliError::NoDataDir)?.join("promptbox"))
}
