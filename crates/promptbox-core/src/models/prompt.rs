//! Prompt model

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksum::{checksum, is_valid_checksum};
use crate::error::{Error, Result};
use crate::util;

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 500;
/// Maximum content length in characters.
pub const MAX_CONTENT_CHARS: usize = 100_000;
/// Maximum serialized record size in bytes.
pub const MAX_RECORD_BYTES: usize = 500 * 1024;
/// Owner id used for prompts created before any account is known.
pub const LOCAL_OWNER: &str = "local";

const COPY_SUFFIX: &str = " (copy)";

/// A unique identifier for a prompt, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptId(Uuid);

impl PromptId {
    /// Create a new unique prompt ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse an id received from outside the process, rejecting malformed values.
    pub fn parse(value: &str) -> Result<Self> {
        value
            .trim()
            .parse()
            .map_err(|_| Error::validation(format!("invalid prompt id: {value}")))
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for PromptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PromptId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A short text record synced across devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Unique identifier
    pub id: PromptId,
    /// Account that owns the prompt (`local` until first authentication)
    pub owner_id: String,
    /// Device the prompt was last written from
    pub device_id: Option<String>,
    pub title: String,
    pub content: String,
    /// Normalized hash of (title, content)
    pub checksum: String,
    /// Tag names, lowercase
    pub tags: BTreeSet<String>,
    pub pinned: bool,
    pub sort_order: i64,
    /// Incremented on every accepted edit, starting at 1
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft delete marker
    pub archived_at: Option<DateTime<Utc>>,
}

impl Prompt {
    /// Create a new prompt owned by `owner_id`
    #[must_use]
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = util::now();
        let title = title.into();
        let content = content.into();
        Self {
            id: PromptId::new(),
            owner_id: owner_id.into(),
            device_id: None,
            checksum: checksum(&title, &content),
            title,
            content,
            tags: BTreeSet::new(),
            pinned: false,
            sort_order: 0,
            version: 1,
            created_at: now,
            updated_at: now,
            archived_at: None,
        }
    }

    /// Replace title and content, recomputing the checksum.
    pub fn set_text(&mut self, title: impl Into<String>, content: impl Into<String>) {
        self.title = title.into();
        self.content = content.into();
        self.refresh_checksum();
    }

    pub fn refresh_checksum(&mut self) {
        self.checksum = checksum(&self.title, &self.content);
    }

    /// Record an accepted local edit: bump version and stamp the update time.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = util::now();
    }

    #[must_use]
    pub const fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Clone this prompt as a brand new record with a `(copy)` title.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        let keep = MAX_TITLE_CHARS - COPY_SUFFIX.chars().count();
        let title: String = self.title.chars().take(keep).collect();
        let mut copy = Self::new(
            self.owner_id.clone(),
            format!("{title}{COPY_SUFFIX}"),
            self.content.clone(),
        );
        copy.device_id.clone_from(&self.device_id);
        copy.tags.clone_from(&self.tags);
        copy.pinned = self.pinned;
        copy.sort_order = self.sort_order;
        copy
    }

    /// Check size limits and the checksum invariant before persistence.
    pub fn validate(&self) -> Result<()> {
        let title_chars = self.title.chars().count();
        if title_chars > MAX_TITLE_CHARS {
            return Err(Error::validation(format!(
                "title is {title_chars} characters (max {MAX_TITLE_CHARS})"
            )));
        }
        let content_chars = self.content.chars().count();
        if content_chars > MAX_CONTENT_CHARS {
            return Err(Error::validation(format!(
                "content is {content_chars} characters (max {MAX_CONTENT_CHARS})"
            )));
        }
        if self.owner_id.trim().is_empty() {
            return Err(Error::validation("owner id must not be empty"));
        }
        if !is_valid_checksum(&self.checksum) {
            return Err(Error::validation(format!(
                "checksum for {} is not a 64-character hex digest",
                self.id
            )));
        }
        if !crate::checksum::checksums_match(&self.checksum, &checksum(&self.title, &self.content))
        {
            return Err(Error::validation(format!(
                "checksum for {} does not match its title/content",
                self.id
            )));
        }
        if self.version < 1 {
            return Err(Error::validation("version must be at least 1"));
        }
        let size = serde_json::to_vec(self)?.len();
        if size > MAX_RECORD_BYTES {
            return Err(Error::validation(format!(
                "serialized prompt is {size} bytes (max {MAX_RECORD_BYTES})"
            )));
        }
        Ok(())
    }
}

/// Normalize a tag name: trimmed and lowercase. Empty names are dropped.
pub fn normalize_tag(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_lowercase())
    }
}

/// Normalize a list of tag names into a deduplicated set.
pub fn normalize_tags<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| normalize_tag(name.as_ref()))
        .collect()
}

/// Input for creating a prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPrompt {
    pub title: String,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub pinned: bool,
    pub sort_order: i64,
}

/// Partial update of a prompt. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub pinned: Option<bool>,
    pub sort_order: Option<i64>,
}

impl PromptPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.pinned.is_none()
            && self.sort_order.is_none()
    }

    /// Apply the patch. Returns whether anything changed.
    pub fn apply(self, prompt: &mut Prompt) -> bool {
        let before = prompt.clone();
        if self.title.is_some() || self.content.is_some() {
            let title = self.title.unwrap_or_else(|| prompt.title.clone());
            let content = self.content.unwrap_or_else(|| prompt.content.clone());
            prompt.set_text(title, content);
        }
        if let Some(tags) = self.tags {
            prompt.tags = normalize_tags(tags);
        }
        if let Some(pinned) = self.pinned {
            prompt.pinned = pinned;
        }
        if let Some(sort_order) = self.sort_order {
            prompt.sort_order = sort_order;
        }
        *prompt != before
    }
}
