//! End-to-end query tests against a mock HTTP server
//!
//! Every backend is served by wiremock; no API keys are needed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use conduit_config::{ConfigHandle, GlobalConfig};
use conduit_protocol::{
    ContentBlock, ConversationMessage, JsonSchema, NativeBackend, PromptContext, Provider,
    StopReason, ToolDescriptor,
};
use conduit_providers::{
    verify_api_key, CancellationToken, EventSink, JsonlApiLogger, NoopApiLogger,
    QueryEvent, QueryOptions, QueryOrchestrator, QueryOutcome, RuntimeConfig, SessionCostTracker,
    SessionState, SmallQuery, CLI_SYSPROMPT_PREFIX,
};

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<QueryEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<QueryEvent> {
        self.events.lock().unwrap().clone()
    }

    fn retries(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, QueryEvent::Retry { .. }))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: QueryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct BashTool;

#[async_trait]
impl ToolDescriptor for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    async fn prompt(&self, context: &PromptContext) -> String {
        if context.dangerously_skip_permissions {
            "Run any shell command".to_string()
        } else {
            "Run a shell command after approval".to_string()
        }
    }

    fn input_schema(&self) -> JsonSchema {
        JsonSchema::object()
            .property("command", JsonSchema::string())
            .required(&["command"])
    }
}

struct Harness {
    orchestrator: QueryOrchestrator,
    sink: Arc<RecordingSink>,
    costs: Arc<SessionCostTracker>,
    session: Arc<SessionState>,
}

fn harness(config: GlobalConfig, runtime: RuntimeConfig) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let costs = Arc::new(SessionCostTracker::new());
    let session = Arc::new(SessionState::new());
    let orchestrator = QueryOrchestrator::builder(ConfigHandle::new(config), runtime)
        .session(session.clone())
        .cost_tracker(costs.clone())
        .api_logger(Arc::new(NoopApiLogger))
        .event_sink(sink.clone())
        .build()
        .unwrap();
    Harness {
        orchestrator,
        sink,
        costs,
        session,
    }
}

fn native_config(keys: &[&str]) -> GlobalConfig {
    GlobalConfig {
        large_model_api_keys: keys.iter().map(|k| k.to_string()).collect(),
        small_model_api_keys: keys.iter().map(|k| k.to_string()).collect(),
        ..Default::default()
    }
}

fn direct_runtime(server: &MockServer) -> RuntimeConfig {
    RuntimeConfig::default().with_anthropic_base_url(server.uri())
}

fn sse(events: &[Value]) -> String {
    events
        .iter()
        .map(|event| {
            let name = event["type"].as_str().unwrap_or("message");
            format!("event: {name}\ndata: {event}\n\n")
        })
        .collect()
}

fn native_text_stream(text: &str, usage: Value) -> String {
    sse(&[
        json!({"type": "message_start", "message": {
            "id": "msg_1", "type": "message", "role": "assistant",
            "model": "claude-sonnet-4", "content": [], "stop_reason": null,
            "usage": usage,
        }}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "ping"}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 5}}),
        json!({"type": "message_stop"}),
    ])
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn native_ok(text: &str) -> ResponseTemplate {
    sse_response(native_text_stream(
        text,
        json!({"input_tokens": 10, "output_tokens": 1}),
    ))
}

fn error_body(error_type: &str, message: &str) -> Value {
    json!({"type": "error", "error": {"type": error_type, "message": message}})
}

fn options() -> QueryOptions {
    QueryOptions::new("claude-sonnet-4")
}

async fn ask(h: &Harness, prompt: &str) -> QueryOutcome {
    h.orchestrator
        .query_large(
            &[ConversationMessage::user(prompt)],
            &["You are a careful assistant.".to_string()],
            0,
            &[],
            &CancellationToken::new(),
            &options(),
        )
        .await
}

async fn request_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r: &Request| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

// ============================================================================
// Native path
// ============================================================================

#[tokio::test]
async fn test_native_stream_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(native_ok("Hello"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(native_config(&["sk-test"]), direct_runtime(&server));
    let response = ask(&h, "hi").await.into_response().unwrap();

    assert!(!response.is_api_error);
    assert_eq!(response.text(), "Hello");
    assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
    assert_eq!(response.usage.input_tokens, 10);
    assert_eq!(response.usage.output_tokens, 5);
    assert!(response.ttft_ms.is_some());
    assert!(response.cost_usd > 0.0);
    assert!((h.costs.totals().total_cost_usd - response.cost_usd).abs() < 1e-12);

    let body = &request_bodies(&server).await[0];
    assert_eq!(body["model"], "claude-sonnet-4");
    assert_eq!(body["max_tokens"], 8192);
    assert_eq!(body["temperature"], 1.0);
    assert_eq!(body["stream"], true);
    assert_eq!(body["system"][0]["text"], CLI_SYSPROMPT_PREFIX);
    assert_eq!(body["system"][1]["text"], "You are a careful assistant.");
    assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
    assert!(body.get("thinking").is_none());
    assert!(body["metadata"]["user_id"].is_string());

    let events = h.sink.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, QueryEvent::SystemPromptBlock { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, QueryEvent::Success { attempts: 1, .. })));
}

#[tokio::test]
async fn test_thinking_budget_and_tools_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(native_ok("ok"))
        .mount(&server)
        .await;

    let h = harness(native_config(&["sk-test"]), direct_runtime(&server));
    let tools: Vec<Arc<dyn ToolDescriptor>> = vec![Arc::new(BashTool)];
    let options = QueryOptions {
        dangerously_skip_permissions: true,
        prepend_cli_sysprompt: false,
        ..options()
    };
    h.orchestrator
        .query_large(
            &[ConversationMessage::user("list files")],
            &["sys".to_string()],
            10_000,
            &tools,
            &CancellationToken::new(),
            &options,
        )
        .await;

    let body = &request_bodies(&server).await[0];
    assert_eq!(body["max_tokens"], 10_001);
    assert_eq!(body["thinking"]["type"], "enabled");
    assert_eq!(body["thinking"]["budget_tokens"], 10_000);
    assert_eq!(body["tools"][0]["name"], "bash");
    assert_eq!(body["tools"][0]["description"], "Run any shell command");
    assert_eq!(body["system"][0]["text"], "sys");
    assert_eq!(body["messages"][0]["content"][0]["cache_control"]["type"], "ephemeral");
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(500)
                .insert_header("retry-after", "0")
                .set_body_json(error_body("api_error", "Internal server error")),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(native_ok("recovered"))
        .mount(&server)
        .await;

    let h = harness(native_config(&["sk-test"]), direct_runtime(&server));
    let response = ask(&h, "hi").await.into_response().unwrap();

    assert!(!response.is_api_error);
    assert_eq!(response.text(), "recovered");
    assert_eq!(h.sink.retries(), 1);
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, QueryEvent::Success { attempts: 2, .. })));
}

#[tokio::test]
async fn test_overloaded_is_not_retried_interactively() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(529)
                .insert_header("retry-after", "0")
                .set_body_json(error_body("overloaded_error", "Overloaded")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(native_config(&["sk-test"]), direct_runtime(&server));
    let response = ask(&h, "hi").await.into_response().unwrap();

    assert!(response.is_api_error);
    assert!(response
        .text()
        .starts_with(&format!("API Error from {}:", server.uri())));
    assert_eq!(h.sink.retries(), 0);
}

#[tokio::test]
async fn test_overloaded_is_retried_in_benchmark_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(529)
                .insert_header("retry-after", "0")
                .set_body_json(error_body("overloaded_error", "Overloaded")),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(native_ok("eventually"))
        .mount(&server)
        .await;

    let h = harness(
        native_config(&["sk-test"]),
        direct_runtime(&server).with_benchmark_mode(true),
    );
    let response = ask(&h, "hi").await.into_response().unwrap();
    assert_eq!(response.text(), "eventually");
    assert_eq!(h.sink.retries(), 2);
}

#[tokio::test]
async fn test_prompt_too_long_maps_to_fixed_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body(
            "invalid_request_error",
            "prompt is too long: 210000 tokens > 200000 maximum",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(native_config(&["sk-test"]), direct_runtime(&server));
    let response = ask(&h, "hi").await.into_response().unwrap();

    assert!(response.is_api_error);
    assert_eq!(response.text(), format!("Prompt is too long ({})", server.uri()));
    assert_eq!(response.cost_usd, 0.0);

    let record = h.session.last_api_error().unwrap();
    assert_eq!(record.status, Some(400));
    assert_eq!(record.base_url, server.uri());
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, QueryEvent::Error { status: Some(400), .. })));
}

#[tokio::test]
async fn test_rejected_key_is_marked_and_next_key_used() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-bad"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body(
            "authentication_error",
            "invalid x-api-key",
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-good"))
        .respond_with(native_ok("welcome back"))
        .mount(&server)
        .await;

    let h = harness(native_config(&["sk-bad", "sk-good"]), direct_runtime(&server));

    let first = ask(&h, "hi").await.into_response().unwrap();
    assert!(first.is_api_error);
    assert_eq!(
        first.text(),
        format!("Invalid API key · Please run /login ({})", server.uri())
    );
    assert_eq!(h.session.failed_keys(conduit_protocol::ModelTier::Large), vec![0]);

    let second = ask(&h, "hi again").await.into_response().unwrap();
    assert!(!second.is_api_error);
    assert_eq!(second.text(), "welcome back");
}

#[tokio::test]
async fn test_rejected_key_is_marked_in_the_tier_it_came_from() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "S-bad"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body(
            "authentication_error",
            "invalid x-api-key",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let config = GlobalConfig {
        large_model_api_keys: vec!["L0".to_string(), "L1".to_string()],
        small_model_api_keys: vec!["S-bad".to_string()],
        ..Default::default()
    };
    let h = harness(config, direct_runtime(&server));

    // A haiku model draws its credential from the small tier even on a large call.
    let outcome = h
        .orchestrator
        .query_large(
            &[ConversationMessage::user("hi")],
            &[],
            0,
            &[],
            &CancellationToken::new(),
            &QueryOptions::new("claude-3-5-haiku-20241022"),
        )
        .await;
    assert!(outcome.into_response().unwrap().is_api_error);

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(h.session.failed_keys(conduit_protocol::ModelTier::Small), vec![0]);
    assert!(h
        .session
        .failed_keys(conduit_protocol::ModelTier::Large)
        .is_empty());
}

#[tokio::test]
async fn test_cancel_during_request_aborts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(native_ok("too late").set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let h = harness(native_config(&["sk-test"]), direct_runtime(&server));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = h
        .orchestrator
        .query_large(
            &[ConversationMessage::user("hi")],
            &[],
            0,
            &[],
            &cancel,
            &options(),
        )
        .await;
    assert!(outcome.is_aborted());
    assert_eq!(h.costs.totals().total_cost_usd, 0.0);
}

#[tokio::test]
async fn test_already_cancelled_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(native_ok("unused"))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(native_config(&["sk-test"]), direct_runtime(&server));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = h
        .orchestrator
        .query_large(&[ConversationMessage::user("hi")], &[], 0, &[], &cancel, &options())
        .await;
    assert_eq!(outcome, QueryOutcome::Aborted);
}

#[tokio::test]
async fn test_small_query_without_caching_zeroes_cache_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(native_text_stream(
            "short answer",
            json!({"input_tokens": 12, "output_tokens": 1, "cache_read_input_tokens": 50}),
        )))
        .mount(&server)
        .await;

    let h = harness(
        native_config(&["sk-test"]),
        direct_runtime(&server).with_small_fast_model("claude-haiku-test"),
    );
    let query = SmallQuery {
        system_prompt: vec!["Summarize.".to_string()],
        assistant_prompt: Some("Summary:".to_string()),
        ..SmallQuery::new("a long text")
    };
    let response = h
        .orchestrator
        .query_small(query, &CancellationToken::new())
        .await
        .into_response()
        .unwrap();

    assert_eq!(response.text(), "short answer");
    assert_eq!(response.usage.cache_read_tokens, 0);

    let body = &request_bodies(&server).await[0];
    assert_eq!(body["model"], "claude-haiku-test");
    assert_eq!(body["max_tokens"], 512);
    assert_eq!(body["temperature"], 0.0);
    assert_eq!(body["messages"][1]["role"], "assistant");
    assert!(body["system"][0].get("cache_control").is_none());
}

#[tokio::test]
async fn test_empty_native_response_becomes_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(native_ok(""))
        .mount(&server)
        .await;

    let h = harness(native_config(&["sk-test"]), direct_runtime(&server));
    let response = ask(&h, "hi").await.into_response().unwrap();
    assert_eq!(response.content, vec![ContentBlock::text("(no content)")]);
}

// ============================================================================
// Cloud backends
// ============================================================================

#[tokio::test]
async fn test_vertex_stream_raw_predict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(
            "/v1/projects/proj-1/locations/us-east5/publishers/anthropic/models/claude-sonnet-4:streamRawPredict",
        ))
        .and(header("authorization", "Bearer vertex-token"))
        .respond_with(native_ok("from vertex"))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = RuntimeConfig::default()
        .with_native_backend(NativeBackend::Vertex)
        .with_vertex(server.uri(), "proj-1", "vertex-token");
    let h = harness(GlobalConfig::default(), runtime);
    let response = ask(&h, "hi").await.into_response().unwrap();
    assert_eq!(response.text(), "from vertex");

    let body = &request_bodies(&server).await[0];
    assert_eq!(body["anthropic_version"], "vertex-2023-10-16");
    assert!(body.get("model").is_none());
}

#[tokio::test]
async fn test_bedrock_invoke_is_replayed_as_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/model/claude-sonnet-4/invoke"))
        .and(header("authorization", "Bearer bedrock-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_b",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4",
            "content": [{"type": "text", "text": "from bedrock"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 4},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = RuntimeConfig::default()
        .with_native_backend(NativeBackend::Bedrock)
        .with_bedrock(server.uri(), "bedrock-token");
    let h = harness(GlobalConfig::default(), runtime);
    let response = ask(&h, "hi").await.into_response().unwrap();

    assert_eq!(response.text(), "from bedrock");
    assert_eq!(response.usage.input_tokens, 3);
    assert_eq!(response.usage.output_tokens, 4);
    let body = &request_bodies(&server).await[0];
    assert!(body.get("stream").is_none());
    assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
}

// ============================================================================
// OpenAI-compatible path
// ============================================================================

fn openai_config(server: &MockServer, stream: bool) -> GlobalConfig {
    GlobalConfig {
        primary_provider: Provider::OpenRouter,
        large_model_name: Some("vendor/large".to_string()),
        small_model_name: Some("vendor/small".to_string()),
        large_model_base_url: Some(server.uri()),
        small_model_base_url: Some(server.uri()),
        large_model_api_keys: vec!["or-key".to_string()],
        large_model_reasoning_effort: Some("high".to_string()),
        stream: Some(stream),
        ..Default::default()
    }
}

fn chat_stream(chunks: &[Value]) -> String {
    let mut body: String = chunks.iter().map(|c| format!("data: {c}\n\n")).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn test_openai_stream_with_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer or-key"))
        .respond_with(sse_response(chat_stream(&[
            json!({"id": "cmpl-1", "model": "vendor/large", "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Let me "}}]}),
            json!({"id": "cmpl-1", "choices": [{"index": 0, "delta": {"role": "assistant", "content": "check."}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "id": "call_1", "type": "function", "function": {"name": "bash", "arguments": "{\"comm"}}]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "and\":\"ls\"}"}}]}}]}),
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 100, "completion_tokens": 20, "prompt_tokens_details": {"cached_tokens": 40}}}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(openai_config(&server, true), RuntimeConfig::default());
    let tools: Vec<Arc<dyn ToolDescriptor>> = vec![Arc::new(BashTool)];
    let response = h
        .orchestrator
        .query_large(
            &[ConversationMessage::user("list files")],
            &["sys".to_string()],
            0,
            &tools,
            &CancellationToken::new(),
            &options(),
        )
        .await
        .into_response()
        .unwrap();

    assert!(!response.is_api_error);
    assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    assert_eq!(response.content.len(), 2);
    assert_eq!(
        response.content[0],
        ContentBlock::tool_use("call_1", "bash", json!({"command": "ls"}))
    );
    assert_eq!(response.content[1], ContentBlock::text("Let me check."));
    assert_eq!(response.usage.input_tokens, 60);
    assert_eq!(response.usage.cache_read_tokens, 40);
    assert_eq!(response.usage.output_tokens, 20);
    assert!(response.ttft_ms.is_some());
    assert_eq!(response.model, "vendor/large");

    let body = &request_bodies(&server).await[0];
    assert_eq!(body["model"], "vendor/large");
    assert_eq!(body["stream"], true);
    assert_eq!(body["stream_options"]["include_usage"], true);
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["reasoning_effort"], "high");
    assert_eq!(body["tools"][0]["function"]["name"], "bash");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], CLI_SYSPROMPT_PREFIX);
}

#[tokio::test]
async fn test_openai_small_query_without_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-2",
            "model": "vendor/small",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Title", "reasoning_content": "short"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(openai_config(&server, false), RuntimeConfig::default());
    let response = h
        .orchestrator
        .query_small(SmallQuery::new("name this"), &CancellationToken::new())
        .await
        .into_response()
        .unwrap();

    assert_eq!(response.text(), "Title");
    assert!(matches!(&response.content[0], ContentBlock::Thinking { thinking, .. } if thinking == "short"));
    assert_eq!(response.ttft_ms, None);

    let body = &request_bodies(&server).await[0];
    assert_eq!(body["model"], "vendor/small");
    assert_eq!(body["temperature"], 0.0);
    assert!(body.get("stream").is_none());
    assert!(body.get("tools").is_none());
    assert!(body.get("reasoning_effort").is_none());
}

#[tokio::test]
async fn test_orchestrator_loaded_from_config_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer key-from-env"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-9",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Loaded"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1},
        })))
        .expect(1)
        .mount(&server)
        .await;

    std::env::set_var("CONDUIT_LOADER_TEST_KEY", "key-from-env");
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("conduit.yaml");
    std::fs::write(
        &config_path,
        format!(
            "primary_provider: openrouter\n\
             small_model_name: vendor/small\n\
             small_model_base_url: {}\n\
             small_model_api_keys:\n  - ${{CONDUIT_LOADER_TEST_KEY}}\n\
             stream: false\n",
            server.uri()
        ),
    )
    .unwrap();

    let orchestrator = QueryOrchestrator::load(Some(&config_path))
        .unwrap()
        .api_logger(Arc::new(NoopApiLogger))
        .build()
        .unwrap();
    assert_eq!(orchestrator.config().snapshot().primary_provider, Provider::OpenRouter);

    let response = orchestrator
        .query_small(SmallQuery::new("hello"), &CancellationToken::new())
        .await
        .into_response()
        .unwrap();
    assert!(!response.is_api_error);
    assert_eq!(response.text(), "Loaded");
}

#[tokio::test]
async fn test_openai_undecodable_body_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(openai_config(&server, false), RuntimeConfig::default());
    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        h.orchestrator
            .query_small(SmallQuery::new("name this"), &CancellationToken::new()),
    )
    .await
    .unwrap();
    let response = outcome.into_response().unwrap();

    assert!(response.is_api_error);
    assert!(response
        .text()
        .starts_with(&format!("API Error from {}: invalid response", server.uri())));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(h.sink.retries(), 0);
}

#[tokio::test]
async fn test_openai_missing_message_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-3",
            "choices": [{"index": 0, "finish_reason": "stop"}],
        })))
        .mount(&server)
        .await;

    let h = harness(openai_config(&server, false), RuntimeConfig::default());
    let response = ask(&h, "hi").await.into_response().unwrap();

    assert!(!response.is_api_error);
    assert_eq!(response.content, vec![ContentBlock::text("(no content)")]);
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, QueryEvent::MissingMessage { .. })));
}

#[tokio::test]
async fn test_openai_error_uses_configured_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {"message": "Your credit balance is too low", "type": "billing"},
        })))
        .mount(&server)
        .await;

    let h = harness(openai_config(&server, false), RuntimeConfig::default());
    let response = ask(&h, "hi").await.into_response().unwrap();
    assert_eq!(
        response.text(),
        format!("Credit balance is too low ({})", server.uri())
    );
    assert_eq!(h.session.last_api_error().unwrap().provider, "openrouter");
}

// ============================================================================
// Raw logging and key verification
// ============================================================================

#[tokio::test]
async fn test_raw_log_records_each_stage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(native_ok("logged"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("api.jsonl");
    let orchestrator = QueryOrchestrator::builder(
        ConfigHandle::new(native_config(&["sk-secret"])),
        direct_runtime(&server),
    )
    .api_logger(Arc::new(JsonlApiLogger::new(&log_path)))
    .build()
    .unwrap();

    orchestrator
        .query_large(
            &[ConversationMessage::user("hi")],
            &[],
            0,
            &[],
            &CancellationToken::new(),
            &options(),
        )
        .await;

    let lines: Vec<Value> = std::fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let stages: Vec<&str> = lines.iter().filter_map(|l| l["stage"].as_str()).collect();
    assert_eq!(stages, vec!["request", "stream_start", "stream", "response"]);
    assert_eq!(lines[0]["headers"]["x-api-key"], "[REDACTED]");
    assert_eq!(lines[0]["body"]["max_tokens"], 8192);
    assert_eq!(lines[2]["chunk_count"], 7);
    assert!(lines.iter().all(|l| l["request_id"] == lines[0]["request_id"]));
}

#[tokio::test]
async fn test_verify_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-valid"))
        .respond_with(native_ok("."))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-revoked"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body(
            "authentication_error",
            "invalid x-api-key",
        )))
        .mount(&server)
        .await;

    let runtime = direct_runtime(&server);
    assert!(verify_api_key("sk-valid", &runtime).await.unwrap());
    assert!(!verify_api_key("sk-revoked", &runtime).await.unwrap());

    let body = &request_bodies(&server).await[0];
    assert_eq!(body["max_tokens"], 1);
    assert_eq!(body["messages"][0]["content"][0]["text"], "test");
}
