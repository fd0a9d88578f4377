//! Summarization provider abstraction and the OpenRouter implementation.
//!
//! The pipeline depends only on [`SummaryProvider`]. [`OpenRouterProvider`]
//! speaks the OpenAI-style `chat/completions` contract:
//!
//! ```text
//! POST {base_url}/chat/completions
//! Authorization: Bearer <key>
//! HTTP-Referer: <site url>
//! X-Title: <app title>
//!
//! { "model": "...", "messages": [{ "role": "user", "content": "..." }],
//!   "temperature": 0.3, "max_tokens": 500 }
//! ```
//!
//! and expects `{ "choices": [{ "message": { "content": "..." } }], "model", "usage"? }`
//! back. A single call makes exactly one HTTP request; retries and timeouts
//! belong to [`RetryPolicy`](crate::retry::RetryPolicy).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::ProviderConfig;
use crate::models::{ProviderPayload, ProviderReply};

/// Longest raw-body excerpt carried in an error.
pub const BODY_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection, TLS, or I/O failure before a response status was read.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider returned HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        body: String,
    },

    /// A success status whose body lacks the expected content.
    #[error("malformed provider response: {reason}")]
    Malformed { reason: String, body: String },
}

impl ProviderError {
    /// Only transport failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the transport failure was reqwest's own timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

/// Per-request information a provider may use for attribution headers.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Inbound `Host` header, if any.
    pub host: Option<String>,
}

#[async_trait]
pub trait SummaryProvider: Send + Sync {
    /// Short identifier used in logs (e.g. `"openrouter"`).
    fn name(&self) -> &str;

    /// Issue exactly one completion request.
    async fn complete(
        &self,
        payload: &ProviderPayload,
        ctx: &CallContext,
    ) -> Result<ProviderReply, ProviderError>;
}

/// Provider backed by OpenRouter (or any compatible `chat/completions` API).
pub struct OpenRouterProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    site_url: Option<String>,
    app_title: String,
}

impl OpenRouterProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone().unwrap_or_default().trim().to_string(),
            site_url: config.site_url.clone(),
            app_title: config.app_title.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn referer(&self, ctx: &CallContext) -> String {
        if let Some(url) = &self.site_url {
            return url.clone();
        }
        match ctx.host.as_deref() {
            Some(host) if !host.is_empty() => format!("http://{}", host),
            _ => "http://localhost:3000".to_string(),
        }
    }
}

#[async_trait]
impl SummaryProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn complete(
        &self,
        payload: &ProviderPayload,
        ctx: &CallContext,
    ) -> Result<ProviderReply, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", self.referer(ctx))
            .header("X-Title", &self.app_title)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message: extract_error_message(&body),
                body,
            });
        }

        parse_completion(&body, &payload.model)
    }
}

/// Parse a successful `chat/completions` body.
pub fn parse_completion(body: &str, requested_model: &str) -> Result<ProviderReply, ProviderError> {
    let json: Value = serde_json::from_str(body).map_err(|e| ProviderError::Malformed {
        reason: format!("body is not JSON: {}", e),
        body: body.to_string(),
    })?;

    let explanation = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ProviderError::Malformed {
            reason: "missing choices[0].message.content".to_string(),
            body: body.to_string(),
        })?;

    let model = json
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or(requested_model)
        .to_string();

    let usage = json.get("usage").filter(|u| u.is_object()).cloned();

    Ok(ProviderReply {
        explanation: explanation.to_string(),
        model,
        usage,
    })
}

/// Best human-readable message from a provider error body.
///
/// Tries `error.message`, then `message`, then a string `error`, falling
/// back to a bounded preview of the raw body.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let found = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .or_else(|| json.get("message").and_then(|m| m.as_str()))
            .or_else(|| json.get("error").and_then(|e| e.as_str()));
        if let Some(msg) = found {
            return msg.to_string();
        }
    }
    preview(body)
}

pub fn preview(body: &str) -> String {
    let (cut, truncated) = crate::validate::truncate_chars(body, BODY_PREVIEW_CHARS);
    if truncated {
        format!("{}…", cut)
    } else {
        cut
    }
}
