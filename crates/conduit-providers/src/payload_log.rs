//! Optional JSONL logging of raw API traffic for debugging and auditing
//!
//! Enable via `CONDUIT_API_LOG=true` environment variable.
//! Logs are written to `~/.local/share/conduit/logs/api.jsonl` by default.
//! Override path with `CONDUIT_API_LOG_FILE`.
//!
//! Streamed chunks are buffered per request and written as a single entry
//! when the stream completes.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

const REDACTED: &str = "[REDACTED]";
const SECRET_KEY_MARKERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "api-key",
    "api_key",
    "apikey",
    "token",
    "secret",
];

#[derive(Debug, thiserror::Error)]
pub enum ApiLogError {
    #[error("failed to write api log: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize api log entry: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raw-traffic logging collaborator.
///
/// Every method may fail; callers report the failure and carry on.
pub trait ApiLogger: Send + Sync {
    fn log_request(
        &self,
        request_id: &str,
        provider: &str,
        endpoint: &str,
        headers: &Value,
        body: &Value,
    ) -> Result<(), ApiLogError>;

    fn log_stream_start(&self, request_id: &str) -> Result<(), ApiLogError>;

    /// Buffer one chunk; nothing is written until [`ApiLogger::log_stream_complete`]
    fn log_stream_chunk(&self, request_id: &str, chunk: &Value) -> Result<(), ApiLogError>;

    fn log_stream_complete(&self, request_id: &str) -> Result<(), ApiLogError>;

    fn log_response(&self, request_id: &str, body: &Value, duration_ms: u64)
        -> Result<(), ApiLogError>;

    fn log_error(
        &self,
        request_id: &str,
        message: &str,
        status: Option<u16>,
        duration_ms: u64,
    ) -> Result<(), ApiLogError>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopApiLogger;

impl ApiLogger for NoopApiLogger {
    fn log_request(&self, _: &str, _: &str, _: &str, _: &Value, _: &Value) -> Result<(), ApiLogError> {
        Ok(())
    }

    fn log_stream_start(&self, _: &str) -> Result<(), ApiLogError> {
        Ok(())
    }

    fn log_stream_chunk(&self, _: &str, _: &Value) -> Result<(), ApiLogError> {
        Ok(())
    }

    fn log_stream_complete(&self, _: &str) -> Result<(), ApiLogError> {
        Ok(())
    }

    fn log_response(&self, _: &str, _: &Value, _: u64) -> Result<(), ApiLogError> {
        Ok(())
    }

    fn log_error(&self, _: &str, _: &str, _: Option<u16>, _: u64) -> Result<(), ApiLogError> {
        Ok(())
    }
}

/// One JSONL line
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiLogEntry {
    pub ts: String,
    pub stage: String, // "request" | "stream_start" | "stream" | "response" | "error"
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ApiLogEntry {
    fn new(stage: &str, request_id: &str) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            stage: stage.to_string(),
            request_id: request_id.to_string(),
            ..Default::default()
        }
    }
}

/// JSONL file logger with environment-based opt-in
pub struct JsonlApiLogger {
    enabled: bool,
    log_path: PathBuf,
    chunks: Mutex<HashMap<String, Vec<Value>>>,
}

impl JsonlApiLogger {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            log_path: log_path.into(),
            chunks: Mutex::new(HashMap::new()),
        }
    }

    /// Create logger from environment variables
    ///
    /// Checks `CONDUIT_API_LOG` (true/1 to enable)
    /// and `CONDUIT_API_LOG_FILE` (custom path)
    pub fn from_env() -> Self {
        let enabled = std::env::var("CONDUIT_API_LOG")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let log_path = std::env::var("CONDUIT_API_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_log_path());

        Self {
            enabled,
            log_path,
            chunks: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Default log path: ~/.local/share/conduit/logs/api.jsonl
    fn default_log_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("conduit");
        path.push("logs");
        path.push("api.jsonl");
        path
    }

    fn write_entry(&self, entry: &ApiLogEntry) -> Result<(), ApiLogError> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl ApiLogger for JsonlApiLogger {
    fn log_request(
        &self,
        request_id: &str,
        provider: &str,
        endpoint: &str,
        headers: &Value,
        body: &Value,
    ) -> Result<(), ApiLogError> {
        if !self.enabled {
            return Ok(());
        }

        let body = redact_secrets(body);
        let entry = ApiLogEntry {
            provider: Some(provider.to_string()),
            endpoint: Some(endpoint.to_string()),
            headers: Some(redact_secrets(headers)),
            payload_digest: Some(compute_digest(&body)),
            body: Some(body),
            ..ApiLogEntry::new("request", request_id)
        };
        self.write_entry(&entry)
    }

    fn log_stream_start(&self, request_id: &str) -> Result<(), ApiLogError> {
        if !self.enabled {
            return Ok(());
        }

        self.chunks.lock().insert(request_id.to_string(), Vec::new());
        self.write_entry(&ApiLogEntry::new("stream_start", request_id))
    }

    fn log_stream_chunk(&self, request_id: &str, chunk: &Value) -> Result<(), ApiLogError> {
        if !self.enabled {
            return Ok(());
        }

        self.chunks
            .lock()
            .entry(request_id.to_string())
            .or_default()
            .push(chunk.clone());
        Ok(())
    }

    fn log_stream_complete(&self, request_id: &str) -> Result<(), ApiLogError> {
        if !self.enabled {
            return Ok(());
        }

        let chunks: Vec<Value> = self
            .chunks
            .lock()
            .remove(request_id)
            .unwrap_or_default()
            .iter()
            .map(redact_secrets)
            .collect();
        let entry = ApiLogEntry {
            chunk_count: Some(chunks.len()),
            chunks: Some(chunks),
            ..ApiLogEntry::new("stream", request_id)
        };
        self.write_entry(&entry)
    }

    fn log_response(
        &self,
        request_id: &str,
        body: &Value,
        duration_ms: u64,
    ) -> Result<(), ApiLogError> {
        if !self.enabled {
            return Ok(());
        }

        let entry = ApiLogEntry {
            body: Some(redact_secrets(body)),
            duration_ms: Some(duration_ms),
            ..ApiLogEntry::new("response", request_id)
        };
        self.write_entry(&entry)
    }

    fn log_error(
        &self,
        request_id: &str,
        message: &str,
        status: Option<u16>,
        duration_ms: u64,
    ) -> Result<(), ApiLogError> {
        if !self.enabled {
            return Ok(());
        }

        // a failed stream leaves its buffer behind
        self.chunks.lock().remove(request_id);

        let entry = ApiLogEntry {
            error: Some(message.to_string()),
            status,
            duration_ms: Some(duration_ms),
            ..ApiLogEntry::new("error", request_id)
        };
        self.write_entry(&entry)
    }
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_KEY_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Replace credential-looking values at any depth
pub fn redact_secrets(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if is_secret_key(key) && value.is_string() {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_secrets(value)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_secrets).collect()),
        other => other.clone(),
    }
}

/// SHA-256 digest of the JSON encoding of `payload`
pub fn compute_digest(payload: &Value) -> String {
    let json_str = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json_str.as_bytes());
    hex::encode(hasher.finalize())
}
