//! Retry classification and message-content detection for API errors
//!
//! `should_retry` decides whether a failed call is worth another attempt.
//! `classify_failure_message` recognises the few failures that get a
//! dedicated user-facing message.

use crate::error::{ApiError, ApiErrorKind};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PROMPT_TOO_LONG_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"prompt is too long").unwrap(),
    ];

    static ref CREDIT_BALANCE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"Your credit balance is too low").unwrap(),
    ];

    static ref INVALID_API_KEY_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)x-api-key").unwrap(),
    ];

    static ref OVERLOADED_PATTERNS: Vec<Regex> = vec![
        Regex::new(r#""type"\s*:\s*"overloaded_error""#).unwrap(),
    ];
}

fn matches_any(patterns: &[Regex], message: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(message))
}

/// Failures that are reported with a fixed message instead of the raw error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    PromptTooLong,
    CreditBalanceTooLow,
    InvalidApiKey,
    Other,
}

pub fn classify_failure_message(message: &str) -> FailureCategory {
    if matches_any(&PROMPT_TOO_LONG_PATTERNS, message) {
        FailureCategory::PromptTooLong
    } else if matches_any(&CREDIT_BALANCE_PATTERNS, message) {
        FailureCategory::CreditBalanceTooLow
    } else if matches_any(&INVALID_API_KEY_PATTERNS, message) {
        FailureCategory::InvalidApiKey
    } else {
        FailureCategory::Other
    }
}

/// True when the error is a provider overload, whatever its status
pub fn is_overloaded(error: &ApiError) -> bool {
    error.kind == ApiErrorKind::Overloaded || matches_any(&OVERLOADED_PATTERNS, &error.message)
}

/// Decide whether a failed call should be attempted again.
///
/// Rules are evaluated in order; the overload carve-out has to come before
/// the generic 429/5xx rules or overloads would be retried interactively.
pub fn should_retry(error: &ApiError, benchmark_mode: bool) -> bool {
    if is_overloaded(error) {
        return benchmark_mode;
    }

    match error.should_retry.as_deref() {
        Some("true") => return true,
        Some("false") => return false,
        _ => {}
    }

    if error.kind == ApiErrorKind::Connection {
        return true;
    }

    let Some(status) = error.status else {
        return false;
    };

    match status {
        408 | 409 => true,
        429 => true,
        s if s >= 500 => true,
        _ => false,
    }
}
