//! HTTP client for the promptbox sync API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::protocol::{
    RegisterDeviceRequest, RegisterDeviceResponse, RemoteStore, ResolveConflictRequest,
    ResolveConflictResponse, SyncRequest, SyncResponse, WireEntity,
};
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let access_token = normalize_text_option(Some(access_token.into()))
            .ok_or_else(|| Error::InvalidConfig("access token must not be empty".to_string()))?;
        Ok(Self {
            base_url,
            access_token,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Build a client from settings, if both URL and token are configured.
    pub fn from_settings(settings: &SyncSettings) -> Result<Option<Self>> {
        let (Some(base_url), Some(token)) = (
            settings.api_base_url(),
            normalize_text_option(settings.api_token.clone()),
        ) else {
            return Ok(None);
        };
        Self::new(base_url, token, settings.request_timeout()).map(Some)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    async fn send_empty<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .send()
            .await?;
        read_json(response).await
    }
}

#[derive(Debug, Deserialize)]
struct PromptListResponse {
    prompts: Vec<WireEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearResponse {
    deleted: usize,
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        tracing::debug!(
            "POST /v1/sync with {} entities from device {}",
            request.entities.len(),
            request.device_id
        );
        self.post_json("/v1/sync", request).await
    }

    async fn register_device(
        &self,
        request: &RegisterDeviceRequest,
    ) -> Result<RegisterDeviceResponse> {
        self.post_json("/v1/devices", request).await
    }

    async fn resolve_conflict(
        &self,
        request: &ResolveConflictRequest,
    ) -> Result<ResolveConflictResponse> {
        self.post_json("/v1/conflicts/resolve", request).await
    }

    async fn fetch_all(&self) -> Result<Vec<WireEntity>> {
        let list: PromptListResponse = self
            .send_empty(self.client.get(self.url("/v1/prompts")))
            .await?;
        Ok(list.prompts)
    }

    async fn clear_all(&self) -> Result<usize> {
        let cleared: ClearResponse = self
            .send_empty(self.client.delete(self.url("/v1/prompts")))
            .await?;
        Ok(cleared.deleted)
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::remote(status.as_u16(), parse_api_error(status, &body)));
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|error| {
        Error::Remote {
            status: status.as_u16(),
            message: format!("invalid response payload: {error}"),
        }
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidConfig("API base URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidConfig(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let remote = HttpRemote::new(
            "https://api.example.com",
            "secret-token",
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn from_settings_requires_url_and_token() {
        let settings = SyncSettings {
            api_base_url: Some("https://api.example.com".to_string()),
            ..SyncSettings::default()
        };
        assert!(HttpRemote::from_settings(&settings).unwrap().is_none());

        let settings = SyncSettings {
            api_token: Some("token".to_string()),
            ..settings
        };
        let remote = HttpRemote::from_settings(&settings).unwrap().unwrap();
        assert_eq!(remote.base_url(), "https://api.example.com");
    }

    #[test]
    fn parse_api_error_prefers_message() {
        assert_eq!(
            parse_api_error(StatusCode::CONFLICT, r#"{"message":" stale "}"#),
            "stale (409)"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, ""),
            "HTTP 502"
        );
    }
}
