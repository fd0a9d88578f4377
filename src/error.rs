//! Error taxonomy for the explanation pipeline.
//!
//! Every failure a request can hit is one [`ExplainError`] variant. Each
//! variant maps to a fixed HTTP status, a stable machine code, and a stable
//! human title; [`ExplainError::details`] renders the structured context that
//! goes into the envelope's `details` field.
//!
//! | Variant | Status | Code |
//! |---------|--------|------|
//! | `MethodNotAllowed` | 405 | `method_not_allowed` |
//! | `RateLimited` | 429 | `rate_limited` |
//! | `Configuration` | 500 | `configuration_error` |
//! | `UnsupportedMediaType` | 415 | `unsupported_media_type` |
//! | `PayloadTooLarge` | 413 | `payload_too_large` |
//! | `InvalidInput` | 400 | `invalid_input` |
//! | `InputTooShort` | 400 | `input_too_short` |
//! | `UpstreamTimeout` | 504 | `upstream_timeout` |
//! | `UpstreamUnreachable` | 500 | `upstream_unreachable` |
//! | `UpstreamError` | 502 | `upstream_error` |
//! | `UpstreamResponseMalformed` | 502 | `upstream_response_malformed` |
//! | `Internal` | 500 | `internal` |

use axum::http::StatusCode;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::{FailureKind, ProviderResult};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExplainError {
    #[error("method {method} is not allowed")]
    MethodNotAllowed { method: String },

    #[error("rate limit exceeded, retry in {retry_after}s")]
    RateLimited {
        retry_after: u64,
        limit: u32,
        window_secs: u64,
    },

    #[error("server configuration error: {hint}")]
    Configuration { hint: String },

    #[error("unsupported content type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    #[error("request body exceeds {limit_bytes} bytes")]
    PayloadTooLarge { limit_bytes: usize },

    #[error("invalid input: {hint}")]
    InvalidInput { hint: String },

    #[error("text too short: {actual_length} < {min_length}")]
    InputTooShort {
        min_length: usize,
        actual_length: usize,
    },

    #[error("upstream timed out after {retries_attempted} retries")]
    UpstreamTimeout {
        timeout_ms: u64,
        retries_attempted: u32,
        elapsed_ms: u64,
    },

    #[error("upstream unreachable: {message}")]
    UpstreamUnreachable {
        message: String,
        retries_attempted: u32,
        cause: Option<String>,
    },

    #[error("upstream returned {upstream_status}: {message}")]
    UpstreamError {
        upstream_status: u16,
        message: String,
        retries_attempted: u32,
        raw: Option<String>,
    },

    #[error("unexpected upstream response structure")]
    UpstreamResponseMalformed {
        retries_attempted: u32,
        raw: Option<String>,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ExplainError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidInput { .. } | Self::InputTooShort { .. } => StatusCode::BAD_REQUEST,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnreachable { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::UpstreamError { .. } | Self::UpstreamResponseMalformed { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Configuration { .. } => "configuration_error",
            Self::UnsupportedMediaType { .. } => "unsupported_media_type",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::InvalidInput { .. } => "invalid_input",
            Self::InputTooShort { .. } => "input_too_short",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamUnreachable { .. } => "upstream_unreachable",
            Self::UpstreamError { .. } => "upstream_error",
            Self::UpstreamResponseMalformed { .. } => "upstream_response_malformed",
            Self::Internal { .. } => "internal",
        }
    }

    /// Client-facing title. Stable across releases.
    pub fn title(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed { .. } => "Method Not Allowed",
            Self::RateLimited { .. } => "Too Many Requests",
            Self::Configuration { .. } => "Server Configuration Error",
            Self::UnsupportedMediaType { .. } => "Unsupported Media Type",
            Self::PayloadTooLarge { .. } => "Payload Too Large",
            Self::InvalidInput { .. } => "Bad Request",
            Self::InputTooShort { .. } => "Input Too Short",
            Self::UpstreamTimeout { .. } => "AI service timed out",
            Self::UpstreamUnreachable { .. } => "Failed to connect to the AI service",
            Self::UpstreamError { .. } => "AI service returned an error",
            Self::UpstreamResponseMalformed { .. } => "Unexpected API response structure",
            Self::Internal { .. } => "Internal Server Error",
        }
    }

    /// Structured details for the envelope.
    ///
    /// Raw provider bodies and error chains are only included when
    /// `dev_mode` is set.
    pub fn details(&self, dev_mode: bool) -> Value {
        let mut details = Map::new();
        match self {
            Self::MethodNotAllowed { method } => {
                details.insert("method".into(), json!(method));
                details.insert("allowed".into(), json!(["POST", "OPTIONS"]));
            }
            Self::RateLimited {
                retry_after,
                limit,
                window_secs,
            } => {
                details.insert("retry_after".into(), json!(retry_after));
                details.insert("limit".into(), json!(limit));
                details.insert("window_secs".into(), json!(window_secs));
            }
            Self::Configuration { hint } | Self::InvalidInput { hint } => {
                details.insert("hint".into(), json!(hint));
            }
            Self::UnsupportedMediaType { content_type } => {
                details.insert("content_type".into(), json!(content_type));
                details.insert("expected".into(), json!("application/json"));
            }
            Self::PayloadTooLarge { limit_bytes } => {
                details.insert("limit_bytes".into(), json!(limit_bytes));
            }
            Self::InputTooShort {
                min_length,
                actual_length,
            } => {
                details.insert("min_length".into(), json!(min_length));
                details.insert("actual_length".into(), json!(actual_length));
            }
            Self::UpstreamTimeout {
                timeout_ms,
                retries_attempted,
                elapsed_ms,
            } => {
                details.insert("timeout_ms".into(), json!(timeout_ms));
                details.insert("retries_attempted".into(), json!(retries_attempted));
                details.insert("elapsed_ms".into(), json!(elapsed_ms));
            }
            Self::UpstreamUnreachable {
                message,
                retries_attempted,
                cause,
            } => {
                details.insert("hint".into(), json!(message));
                details.insert("retries_attempted".into(), json!(retries_attempted));
                if dev_mode {
                    if let Some(cause) = cause {
                        details.insert("cause".into(), json!(cause));
                    }
                }
            }
            Self::UpstreamError {
                upstream_status,
                message,
                retries_attempted,
                raw,
            } => {
                details.insert("upstream_status".into(), json!(upstream_status));
                details.insert("api_error".into(), json!(message));
                details.insert("retries_attempted".into(), json!(retries_attempted));
                if dev_mode {
                    if let Some(raw) = raw {
                        details.insert("api_response".into(), json!(raw));
                    }
                }
            }
            Self::UpstreamResponseMalformed {
                retries_attempted,
                raw,
            } => {
                details.insert("retries_attempted".into(), json!(retries_attempted));
                if dev_mode {
                    if let Some(raw) = raw {
                        details.insert("api_response".into(), json!(raw));
                    }
                }
            }
            Self::Internal { message } => {
                if dev_mode {
                    details.insert("cause".into(), json!(message));
                }
            }
        }
        Value::Object(details)
    }

    /// Map a failed [`ProviderResult`] onto the taxonomy.
    ///
    /// Returns `None` for [`ProviderResult::Success`].
    pub fn from_provider_result(result: &ProviderResult, timeout_ms: u64) -> Option<Self> {
        let ProviderResult::Failure {
            kind,
            http_status,
            message,
            retries_attempted,
            latency_ms,
            raw,
        } = result
        else {
            return None;
        };

        Some(match kind {
            FailureKind::UpstreamTimeout => Self::UpstreamTimeout {
                timeout_ms,
                retries_attempted: *retries_attempted,
                elapsed_ms: *latency_ms,
            },
            FailureKind::UpstreamUnreachable => Self::UpstreamUnreachable {
                message: message.clone(),
                retries_attempted: *retries_attempted,
                cause: raw.clone(),
            },
            FailureKind::UpstreamError => Self::UpstreamError {
                upstream_status: http_status.unwrap_or(0),
                message: message.clone(),
                retries_attempted: *retries_attempted,
                raw: raw.clone(),
            },
            FailureKind::UpstreamResponseMalformed => Self::UpstreamResponseMalformed {
                retries_attempted: *retries_attempted,
                raw: raw.clone(),
            },
        })
    }
}
