//! Channel provider client: single-use invite link creation.
//!
//! Speaks the Telegram Bot API `createChatInviteLink` call. Throttling comes
//! back as HTTP 429 with `parameters.retry_after` (seconds); that hint is
//! surfaced as [`ProviderError::RateLimited`] so the worker can honour it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider limit on the invite label.
pub const MAX_LABEL_CHARS: usize = 255;

/// What to ask the provider for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteSpec {
    /// Free-form label shown to channel admins; truncated to [`MAX_LABEL_CHARS`].
    pub label: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl InviteSpec {
    pub fn new(label: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            label: truncate_chars(&label.into(), MAX_LABEL_CHARS),
            expires_at,
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider rejected request ({code}): {description}")]
    Rejected { code: u16, description: String },

    #[error("transport error: {0}")]
    Transport(reqwest::Error),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    /// The provider's wait hint, if it gave one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    /// Create a single-use invite link (member limit 1).
    async fn create_invite(&self, spec: &InviteSpec) -> Result<String, ProviderError>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CreateInviteBody<'a> {
    chat_id: &'a str,
    member_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    expire_date: Option<i64>,
    name: &'a str,
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<InviteLinkResult>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct InviteLinkResult {
    invite_link: String,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

pub struct BotApiProvider {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    chat_id: String,
}

impl BotApiProvider {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: SecretString,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl ArtifactProvider for BotApiProvider {
    async fn create_invite(&self, spec: &InviteSpec) -> Result<String, ProviderError> {
        let url = format!(
            "{}/bot{}/createChatInviteLink",
            self.base_url,
            self.token.expose_secret()
        );
        let body = CreateInviteBody {
            chat_id: &self.chat_id,
            member_limit: 1,
            expire_date: spec.expires_at.map(|t| t.timestamp()),
            name: &spec.label,
        };

        // The token is part of the URL path; keep it out of error text.
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.without_url()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.without_url()))?;
        interpret_response(status, &text)
    }
}

/// Map an HTTP status and body to an invite link or a typed failure.
fn interpret_response(status: u16, body: &str) -> Result<String, ProviderError> {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();
    let retry_after = parsed
        .as_ref()
        .and_then(|r| r.parameters.as_ref())
        .and_then(|p| p.retry_after)
        .map(Duration::from_secs);

    if status == 429 || retry_after.is_some() {
        return Err(ProviderError::RateLimited { retry_after });
    }

    let Some(parsed) = parsed else {
        return Err(if (200..300).contains(&status) {
            ProviderError::Malformed(truncate_chars(body, 200))
        } else {
            ProviderError::Rejected {
                code: status,
                description: truncate_chars(body, 200),
            }
        });
    };

    match parsed {
        ApiResponse {
            ok: true,
            result: Some(InviteLinkResult { invite_link }),
            ..
        } if !invite_link.is_empty() => Ok(invite_link),
        ApiResponse { ok: true, .. } => Err(ProviderError::Malformed(
            "ok response without invite_link".to_string(),
        )),
        ApiResponse {
            error_code,
            description,
            ..
        } => Err(ProviderError::Rejected {
            code: error_code.unwrap_or(status),
            description: description.unwrap_or_default(),
        }),
    }
}
