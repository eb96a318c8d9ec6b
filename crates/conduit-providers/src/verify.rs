//! API key verification against the direct backend

use std::time::Instant;

use reqwest::Client;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use conduit_protocol::{ConversationMessage, NativeBackend};

use crate::anthropic::{to_wire_messages, MessagesRequest, NativeAuth, NativeClient, RequestMetadata};
use crate::config::RuntimeConfig;
use crate::error::{ApiErrorKind, ProviderError};
use crate::error_classify::{classify_failure_message, FailureCategory};
use crate::reconcile::reconcile_native_stream;
use crate::retry::{with_retry, RetryPolicy};

const VERIFY_MAX_RETRIES: u32 = 2;

/// Send a one-token request with `api_key`.
///
/// `Ok(false)` means the key was rejected; any other failure is returned.
pub async fn verify_api_key(api_key: &str, runtime: &RuntimeConfig) -> Result<bool, ProviderError> {
    let http = Client::builder()
        .timeout(runtime.request_timeout)
        .build()
        .map_err(|e| ProviderError::Configuration(format!("failed to build HTTP client: {e}")))?;
    let client = NativeClient::new(
        http,
        NativeBackend::Direct,
        NativeAuth::ApiKey(SecretString::from(api_key.to_string())),
        runtime,
        None,
    )?;

    let request = MessagesRequest {
        model: runtime.small_fast_model.clone(),
        max_tokens: 1,
        messages: to_wire_messages(&[ConversationMessage::user("test")], false),
        system: Vec::new(),
        tools: Vec::new(),
        temperature: 0.0,
        thinking: None,
        metadata: Some(RequestMetadata {
            user_id: runtime.metadata_user_id(),
        }),
        stream: true,
    };
    let body = client.request_body(&request)?;

    let policy = RetryPolicy::for_mode(runtime.benchmark_mode).with_max_retries(VERIFY_MAX_RETRIES);
    let cancel = CancellationToken::new();
    let result = with_retry(&policy, &cancel, |_| {}, |_| async {
        let dispatched = Instant::now();
        let stream = client.create_stream(&request.model, &body).await?;
        reconcile_native_stream(stream, dispatched, &cancel).await
    })
    .await;

    match result {
        Ok(_) => Ok(true),
        Err(err) if is_rejected_key(&err) => {
            debug!(error = %err, "API key rejected");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

fn is_rejected_key(err: &ProviderError) -> bool {
    err.as_api_error()
        .is_some_and(|e| e.kind == ApiErrorKind::Authentication)
        || classify_failure_message(&err.to_string()) == FailureCategory::InvalidApiKey
}
