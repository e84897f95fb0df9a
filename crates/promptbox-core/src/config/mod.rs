//! Sync configuration shared by every client.
//!
//! `SyncSettings` is read from an optional JSON file, then overridden from the
//! environment, then validated before the engine is built from it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url, normalize_text_option};

pub const ENV_API_URL: &str = "PROMPTBOX_API_URL";
pub const ENV_API_TOKEN: &str = "PROMPTBOX_API_TOKEN";
pub const ENV_FLUSH_INTERVAL_SECS: &str = "PROMPTBOX_FLUSH_INTERVAL_SECS";

/// Tunables for the queue, protocol client and conflict resolver.
///
/// Every field has a default, so an empty `{}` file is valid. Secrets such as
/// `api_token` are normally supplied through the environment instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncSettings {
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub flush_interval_secs: u64,
    pub max_attempts: u32,
    pub queue_capacity: usize,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter_percent: u32,
    pub conflict_window_ms: i64,
    pub request_timeout_secs: u64,
    pub archive_retention_days: u32,
    pub batch_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            flush_interval_secs: 30,
            max_attempts: crate::models::MAX_ATTEMPTS,
            queue_capacity: 1000,
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
            backoff_jitter_percent: 30,
            conflict_window_ms: crate::conflict::CONFLICT_WINDOW_MS,
            request_timeout_secs: 15,
            archive_retention_days: 30,
            batch_size: 100,
        }
    }
}

impl SyncSettings {
    /// Load settings from `path`, falling back to defaults when it does not exist.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let payload = std::fs::read_to_string(path)?;
        Self::parse(&payload)
    }

    /// Parse settings from a raw JSON payload.
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|error| {
            Error::InvalidConfig(format!(
                "invalid settings JSON: {}",
                compact_text(&error.to_string())
            ))
        })
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_API_TOKEN)) {
            self.api_token = Some(token);
        }
        if let Some(raw) = normalize_text_option(lookup(ENV_FLUSH_INTERVAL_SECS)) {
            match raw.parse() {
                Ok(secs) => self.flush_interval_secs = secs,
                Err(_) => tracing::warn!("Ignoring invalid {ENV_FLUSH_INTERVAL_SECS}={raw}"),
            }
        }
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = normalize_text_option(self.api_base_url.clone()) {
            if !is_http_url(&url) {
                return Err(Error::InvalidConfig(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".to_string()));
        }
        if self.flush_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "flush_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(Error::InvalidConfig(
                "backoff_cap_ms must not be smaller than backoff_base_ms".to_string(),
            ));
        }
        if self.backoff_jitter_percent > 100 {
            return Err(Error::InvalidConfig(
                "backoff_jitter_percent must be between 0 and 100".to_string(),
            ));
        }
        if self.conflict_window_ms < 0 {
            return Err(Error::InvalidConfig(
                "conflict_window_ms must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Remote base URL without a trailing slash, if configured.
    pub fn api_base_url(&self) -> Option<String> {
        normalize_text_option(self.api_base_url.clone())
            .map(|url| url.trim_end_matches('/').to_string())
    }

    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// How long archived prompts are kept before a purge removes them.
    pub fn archive_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.archive_retention_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn empty_document_uses_defaults() {
        let settings = SyncSettings::parse("{}").unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.flush_interval_secs, 30);
        assert_eq!(settings.queue_capacity, 1000);
        assert_eq!(settings.conflict_window_ms, 30_000);
        settings.validate().unwrap();
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let error = SyncSettings::parse(r#"{"flush_every": 5}"#).unwrap_err();
        assert!(matches!(error, Error::InvalidConfig(_)));
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SyncSettings::load_from_path(dir.path().join("missing.json")).unwrap();
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn load_from_path_reads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"batch_size": 25, "api_base_url": "https://api.example.com/"}"#)
            .unwrap();

        let settings = SyncSettings::load_from_path(&path).unwrap();
        assert_eq!(settings.batch_size, 25);
        assert_eq!(
            settings.api_base_url().as_deref(),
            Some("https://api.example.com")
        );
    }

    #[test]
    fn overrides_replace_file_values() {
        let env = HashMap::from([
            (ENV_API_URL, "https://override.example.com"),
            (ENV_API_TOKEN, " token "),
            (ENV_FLUSH_INTERVAL_SECS, "5"),
        ]);
        let settings = SyncSettings::default()
            .with_overrides(|key| env.get(key).map(|value| (*value).to_string()));

        assert_eq!(
            settings.api_base_url.as_deref(),
            Some("https://override.example.com")
        );
        assert_eq!(settings.api_token.as_deref(), Some("token"));
        assert_eq!(settings.flush_interval_secs, 5);
    }

    #[test]
    fn invalid_interval_override_is_ignored() {
        let settings = SyncSettings::default().with_overrides(|key| {
            (key == ENV_FLUSH_INTERVAL_SECS).then(|| "soon".to_string())
        });
        assert_eq!(settings.flush_interval_secs, 30);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad_url = SyncSettings {
            api_base_url: Some("api.example.com".to_string()),
            ..SyncSettings::default()
        };
        assert!(bad_url.validate().is_err());

        let inverted_backoff = SyncSettings {
            backoff_base_ms: 5000,
            backoff_cap_ms: 1000,
            ..SyncSettings::default()
        };
        assert!(inverted_backoff.validate().is_err());

        let zero_capacity = SyncSettings {
            queue_capacity: 0,
            ..SyncSettings::default()
        };
        assert!(zero_capacity.validate().is_err());

        let big_jitter = SyncSettings {
            backoff_jitter_percent: 150,
            ..SyncSettings::default()
        };
        assert!(big_jitter.validate().is_err());
    }
}
