//! Provider error types

use thiserror::Error;

/// Coarse category of a failed API call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// No response was received (DNS, TCP, TLS, timeout)
    Connection,
    Authentication,
    PermissionDenied,
    NotFound,
    RateLimited,
    Overloaded,
    InvalidRequest,
    Server,
    Unknown,
}

impl ApiErrorKind {
    /// Kind implied by a provider error body `type` field
    pub fn from_error_type(error_type: &str) -> Option<Self> {
        match error_type {
            "authentication_error" => Some(Self::Authentication),
            "permission_error" => Some(Self::PermissionDenied),
            "not_found_error" => Some(Self::NotFound),
            "rate_limit_error" => Some(Self::RateLimited),
            "overloaded_error" => Some(Self::Overloaded),
            "invalid_request_error" | "request_too_large" => Some(Self::InvalidRequest),
            "api_error" => Some(Self::Server),
            _ => None,
        }
    }

    /// Kind implied by an HTTP status alone
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 413 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            429 => Self::RateLimited,
            s if s >= 500 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

/// A failed network or API call, with everything the retry policy needs
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Raw `x-should-retry` header value
    pub should_retry: Option<String>,
    /// Raw `retry-after` header value
    pub retry_after: Option<String>,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            should_retry: None,
            retry_after: None,
            request_id: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Connection, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_should_retry(mut self, value: impl Into<String>) -> Self {
        self.should_retry = Some(value.into());
        self
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    pub fn with_request_id(mut self, value: impl Into<String>) -> Self {
        self.request_id = Some(value.into());
        self
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => {
                ApiError::new(ApiErrorKind::from_status(status.as_u16()), err.to_string())
                    .with_status(status.as_u16())
            }
            None => ApiError::connection(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The caller's cancellation signal fired
    #[error("request aborted")]
    Aborted,

    #[error("malformed stream: {0}")]
    MalformedStream(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn as_api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<reqwest::Error> for ProviderError {
    /// A body that arrived but could not be read or decoded is not a
    /// connection failure and is never retried.
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_body() {
            return Self::InvalidResponse(err.to_string());
        }
        Self::Api(err.into())
    }
}
