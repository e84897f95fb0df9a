use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] promptbox_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No prompt content provided")]
    EmptyContent,
    #[error("Prompt title cannot be empty")]
    EmptyTitle,
    #[error("Edited prompt content cannot be empty")]
    EmptyEditedContent,
    #[error("Prompt ID cannot be empty")]
    EmptyPromptId,
    #[error("Prompt not found for id/prefix: {0}")]
    PromptNotFound(String),
    #[error("{0}")]
    AmbiguousPromptId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Could not resolve a data directory; pass --db-path or set PROMPTBOX_DB_PATH")]
    NoDataDir,
    #[error(
        "Sync is not configured. Set PROMPTBOX_API_URL and PROMPTBOX_API_TOKEN, or add api_base_url and api_token to the settings file."
    )]
    SyncNotConfigured,
    #[error("Sync paused: {0}")]
    SyncSkipped(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error("Aborted: confirmation did not match")]
    Aborted,
}
