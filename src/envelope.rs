//! The response envelope returned for every request.
//!
//! Success:
//!
//! ```json
//! { "success": true, "explanation": "...", "model": "google/gemini-flash-1.5",
//!   "latency_ms": 812, "page_number": 3, "timestamp": "2024-05-01T12:00:00Z" }
//! ```
//!
//! Failure:
//!
//! ```json
//! { "success": false, "error": "Input Too Short", "code": "input_too_short",
//!   "error_id": "3f9a0c12b7de", "details": { "min_length": 10, "actual_length": 2 },
//!   "timestamp": "2024-05-01T12:00:00Z" }
//! ```

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::ExplainError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: String,
}

impl ResponseEnvelope {
    pub fn success(
        explanation: String,
        model: String,
        usage: Option<Value>,
        latency_ms: u64,
        truncated: bool,
        page_number: u32,
    ) -> Self {
        Self {
            success: true,
            explanation: Some(explanation),
            model: Some(model),
            usage,
            latency_ms: Some(latency_ms),
            truncated: truncated.then_some(true),
            page_number: Some(page_number),
            error: None,
            code: None,
            error_id: None,
            details: None,
            timestamp: now_iso(),
        }
    }

    pub fn failure(err: &ExplainError, error_id: String, dev_mode: bool) -> Self {
        Self {
            success: false,
            explanation: None,
            model: None,
            usage: None,
            latency_ms: None,
            truncated: None,
            page_number: None,
            error: Some(err.title().to_string()),
            code: Some(err.code().to_string()),
            error_id: Some(error_id),
            details: Some(err.details(dev_mode)),
            timestamp: now_iso(),
        }
    }
}

/// Fresh correlation id: the first 12 hex digits of a v4 UUID.
pub fn new_error_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Everything the host needs to write the HTTP response.
///
/// `envelope` is `None` only for preflight responses.
#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub envelope: Option<ResponseEnvelope>,
}

impl PipelineResponse {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            envelope: None,
        }
    }

    pub fn json(status: StatusCode, envelope: ResponseEnvelope) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            envelope: Some(envelope),
        }
    }

    pub fn body_bytes(&self) -> Vec<u8> {
        match &self.envelope {
            // Serializing a struct of strings, numbers and JSON values cannot fail.
            Some(envelope) => serde_json::to_vec(envelope).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}
