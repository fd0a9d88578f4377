//! Inbound request validation: content type, body parsing, text bounds.

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use serde_json::Value;

use crate::config::LimitsConfig;
use crate::error::ExplainError;
use crate::models::ExplainRequest;

/// Accept a missing `Content-Type`, `application/json`, or any `+json` type.
pub fn check_content_type(headers: &HeaderMap) -> Result<(), ExplainError> {
    let Some(raw) = headers.get(CONTENT_TYPE) else {
        return Ok(());
    };
    let value = raw.to_str().unwrap_or_default();
    let media_type = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if media_type == "application/json" || media_type.ends_with("+json") {
        Ok(())
    } else {
        Err(ExplainError::UnsupportedMediaType {
            content_type: value.to_string(),
        })
    }
}

/// Parse and validate the body into an [`ExplainRequest`].
///
/// Text is trimmed, then checked against the minimum and truncated to the
/// maximum (both measured in characters).
pub fn parse_request(body: &[u8], limits: &LimitsConfig) -> Result<ExplainRequest, ExplainError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ExplainError::InvalidInput {
            hint: "Request body is empty. Send a JSON object with a \"text\" field.".to_string(),
        });
    }

    let value: Value = serde_json::from_slice(body).map_err(|e| ExplainError::InvalidInput {
        hint: format!("Could not parse request body. Ensure it is valid JSON ({}).", e),
    })?;

    let Value::Object(fields) = value else {
        return Err(ExplainError::InvalidInput {
            hint: "Request body must be a JSON object.".to_string(),
        });
    };

    let text = match fields.get("text") {
        Some(Value::String(s)) => s.trim(),
        Some(_) => {
            return Err(ExplainError::InvalidInput {
                hint: "\"text\" must be a string.".to_string(),
            })
        }
        None => {
            return Err(ExplainError::InvalidInput {
                hint: "Missing \"text\" parameter in the request body.".to_string(),
            })
        }
    };

    if text.is_empty() {
        return Err(ExplainError::InvalidInput {
            hint: "\"text\" is empty.".to_string(),
        });
    }

    let original_length = text.chars().count();
    if original_length < limits.min_text_len {
        return Err(ExplainError::InputTooShort {
            min_length: limits.min_text_len,
            actual_length: original_length,
        });
    }

    let (text, truncated) = truncate_chars(text, limits.max_text_len);

    let page_number = fields
        .get("page_number")
        .or_else(|| fields.get("pageNumber"))
        .and_then(parse_page_number)
        .unwrap_or(1);

    Ok(ExplainRequest {
        text,
        page_number,
        truncated,
        original_length,
    })
}

/// Cut `text` to at most `max` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Positive integers or numeric strings; anything else is `None`.
fn parse_page_number(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f > 0.0).map(|f| f as u64))?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u32::try_from(n).ok().filter(|n| *n >= 1)
}
