//! Request-scoped data types that flow through the explanation pipeline.
//!
//! Nothing here outlives a single request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A validated explanation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainRequest {
    /// Trimmed text, already truncated to the configured maximum.
    pub text: String,
    /// 1-based page number the text was extracted from.
    pub page_number: u32,
    /// Whether `text` was cut down to fit the maximum length.
    pub truncated: bool,
    /// Character count of the trimmed text before truncation.
    pub original_length: usize,
}

/// One chat message in the outbound payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Body sent to the provider's `chat/completions` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A successful provider response, reduced to what the envelope needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub explanation: String,
    pub model: String,
    pub usage: Option<Value>,
}

/// Collaborator-caused failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UpstreamTimeout,
    UpstreamUnreachable,
    UpstreamError,
    UpstreamResponseMalformed,
}

/// Normalized outcome of a dispatch, including all retries.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResult {
    Success {
        explanation: String,
        model: String,
        usage: Option<Value>,
        latency_ms: u64,
    },
    Failure {
        kind: FailureKind,
        http_status: Option<u16>,
        message: String,
        retries_attempted: u32,
        latency_ms: u64,
        /// Raw provider body or transport error chain, surfaced only in dev mode.
        raw: Option<String>,
    },
}
