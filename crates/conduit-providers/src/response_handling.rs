//! Turning non-success HTTP responses into [`ApiError`]s

use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::error::{ApiError, ApiErrorKind};

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// Build an [`ApiError`] from a status, headers and raw body.
///
/// The message keeps the raw body after the status so message-content
/// detection (prompt too long, overloaded, invalid key) still sees it.
pub fn api_error_from_parts(status: u16, headers: &HeaderMap, body: &str) -> ApiError {
    let parsed = parse_error_body(body);
    let kind = match status {
        401 => ApiErrorKind::Authentication,
        _ => parsed
            .as_ref()
            .and_then(|e| e.error_type.as_deref())
            .and_then(ApiErrorKind::from_error_type)
            .unwrap_or_else(|| ApiErrorKind::from_status(status)),
    };

    let message = if body.trim().is_empty() {
        format!("{status} status code (no body)")
    } else {
        format!("{status} {}", body.trim())
    };

    let mut error = ApiError::new(kind, message).with_status(status);
    if let Some(value) = header_value(headers, "x-should-retry") {
        error = error.with_should_retry(value);
    }
    if let Some(value) = header_value(headers, "retry-after") {
        error = error.with_retry_after(value);
    }
    if let Some(value) =
        header_value(headers, "request-id").or_else(|| header_value(headers, "x-request-id"))
    {
        error = error.with_request_id(value);
    }
    error
}

/// Consume a failed response into an [`ApiError`]
pub async fn api_error_from_response(response: reqwest::Response) -> ApiError {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = match response.text().await {
        Ok(text) => text,
        Err(err) => format!("failed to read error body: {err}"),
    };
    api_error_from_parts(status, &headers, &body)
}

/// Error carried inside a stream (`event: error`) rather than a status
pub fn api_error_from_stream(error_type: &str, message: &str) -> ApiError {
    let kind = ApiErrorKind::from_error_type(error_type).unwrap_or(ApiErrorKind::Unknown);
    let body = serde_json::json!({
        "type": "error",
        "error": { "type": error_type, "message": message },
    });
    ApiError::new(kind, body.to_string())
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NestedErrorBody {
    error: ErrorBody,
}

/// Anthropic wraps errors as `{"type":"error","error":{"type":..,"message":..}}`;
/// OpenAI-compatible servers use `{"error":{"message":..,"type":..,"code":..}}`
pub(crate) fn parse_error_body(body: &str) -> Option<ErrorBody> {
    if let Ok(wrapper) = serde_json::from_str::<NestedErrorBody>(body) {
        return Some(wrapper.error);
    }
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .filter(|e| e.error_type.is_some() || e.message.is_some())
}
