use super::*;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::oneshot;
use toolprobe_core::ExpectedOutcome;
use toolprobe_test_support::json_object;

fn weather_tool() -> OperationSpec {
    OperationSpec {
        name: "weather".to_string(),
        description: Some("Current weather for a city".to_string()),
        input_schema: json_object(json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        })),
        output_schema: Some(json_object(json!({
            "type": "object",
            "properties": {"temp": {"type": "number"}}
        }))),
    }
}

#[derive(Debug)]
struct SeenRequest {
    headers: HeaderMap,
    body: Value,
}

type Seen = Arc<Mutex<Option<SeenRequest>>>;

#[derive(Clone)]
struct CannedReply {
    status: StatusCode,
    body: String,
    seen: Seen,
}

async fn messages_handler(
    State(reply): State<CannedReply>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    *reply.seen.lock().expect("lock") = Some(SeenRequest { headers, body });
    (
        reply.status,
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
        .into_response()
}

struct CannedServer {
    base_url: String,
    seen: Seen,
    _shutdown: oneshot::Sender<()>,
}

/// Answers `POST /v1/messages` with a fixed status and body, recording the request.
async fn serve_canned(status: StatusCode, body: String) -> CannedServer {
    let seen = Seen::default();
    let router = Router::new()
        .route("/v1/messages", post(messages_handler))
        .with_state(CannedReply {
            status,
            body,
            seen: Arc::clone(&seen),
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });
    CannedServer {
        base_url: format!("http://{addr}"),
        seen,
        _shutdown: shutdown_tx,
    }
}

fn messages_reply(text: &str) -> String {
    json!({
        "id": "msg_1",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}]
    })
    .to_string()
}

#[test]
fn prompt_names_tool_schemas_and_count() {
    let prompt = build_prompt(&weather_tool(), 4);
    assert!(prompt.contains("Tool name: weather"));
    assert!(prompt.contains("Current weather for a city"));
    assert!(prompt.contains("\"city\""));
    assert!(prompt.contains("Output schema:"));
    assert!(prompt.contains("Write 4 test cases"));
    assert!(prompt.contains("\"requiredFields\""));
}

#[test]
fn parses_fenced_array_with_expectations() {
    let text = "Here you go:\n```json\n[\
        {\"description\": \"oslo\", \"arguments\": {\"city\": \"Oslo\"},\
         \"expectation\": {\"outcome\": \"success\", \"requiredFields\": [\"temp\"],\
                           \"fieldTypes\": {\"temp\": \"number\"}}},\
        {\"description\": \"empty city\", \"arguments\": {\"city\": \"\"},\
         \"expectation\": {\"outcome\": \"error\"}}\
    ]\n```";
    let cases = parse_candidates(text).expect("cases");
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0].arguments, json!({"city": "Oslo"}));
    let expectation = cases[0].expectation.as_ref().expect("expectation");
    assert_eq!(expectation.required_fields, vec!["temp".to_string()]);
    assert_eq!(
        expectation.field_types.get("temp").map(String::as_str),
        Some("number")
    );
    assert_eq!(
        cases[1].expectation.as_ref().map(|expectation| expectation.outcome),
        Some(ExpectedOutcome::Error)
    );
}

#[test]
fn rejects_text_without_an_array() {
    let error = parse_candidates("I cannot help with that.").expect_err("no array");
    assert!(matches!(error, SynthesisError::Malformed(_)));
}

#[test]
fn rejects_elements_without_arguments() {
    let error = parse_candidates("[{\"description\": \"nothing\"}]").expect_err("unusable");
    assert!(error.to_string().contains("case 0"));
}

#[test]
fn model_defaults_to_haiku() {
    let backend = AnthropicBackend::new("key", None);
    assert_eq!(backend.model(), DEFAULT_MODEL);
    let backend = AnthropicBackend::new("key", Some("claude-custom".to_string()));
    assert_eq!(backend.model(), "claude-custom");
}

#[tokio::test]
async fn synthesize_posts_to_messages_api() {
    let reply = messages_reply("[{\"description\": \"oslo\", \"arguments\": {\"city\": \"Oslo\"}}]");
    let server = serve_canned(StatusCode::OK, reply).await;
    let backend = AnthropicBackend::new("secret-key", None).with_base_url(&server.base_url);
    let tool = weather_tool();

    let cases = backend
        .synthesize(SynthesisRequest {
            operation: &tool,
            count: 1,
        })
        .await
        .expect("cases");
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].description, "oslo");

    let seen = server.seen.lock().expect("lock").take().expect("request");
    assert_eq!(
        seen.headers.get("x-api-key").and_then(|v| v.to_str().ok()),
        Some("secret-key")
    );
    assert_eq!(
        seen.headers
            .get("anthropic-version")
            .and_then(|v| v.to_str().ok()),
        Some("2023-06-01")
    );
    assert_eq!(seen.body["model"], DEFAULT_MODEL);
    assert_eq!(seen.body["max_tokens"], 4096);
    assert_eq!(seen.body["messages"][0]["role"], "user");
    assert!(seen.body["messages"][0]["content"]
        .as_str()
        .is_some_and(|prompt| prompt.contains("Tool name: weather")));
}

#[tokio::test]
async fn http_errors_become_backend_errors() {
    let server = serve_canned(
        StatusCode::UNAUTHORIZED,
        json!({"type": "error", "error": {"message": "bad key"}}).to_string(),
    )
    .await;
    let backend = AnthropicBackend::new("wrong", None).with_base_url(&server.base_url);
    let tool = weather_tool();
    let error = backend
        .synthesize(SynthesisRequest {
            operation: &tool,
            count: 1,
        })
        .await
        .expect_err("unauthorized");
    match error {
        SynthesisError::Backend(message) => assert!(message.contains("401")),
        other => panic!("expected a backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn oversized_replies_exceed_the_budget() {
    let padding = "x".repeat(2048);
    let server = serve_canned(StatusCode::OK, messages_reply(&padding)).await;
    let backend = AnthropicBackend::new("key", None)
        .with_base_url(&server.base_url)
        .with_max_response_bytes(256);
    let tool = weather_tool();
    let error = backend
        .synthesize(SynthesisRequest {
            operation: &tool,
            count: 1,
        })
        .await
        .expect_err("too large");
    match error {
        SynthesisError::BudgetExceeded { size, limit } => {
            assert_eq!(limit, 256);
            assert!(size > 2048, "{size}");
        }
        other => panic!("expected a budget error, got {other:?}"),
    }
}

#[tokio::test]
async fn replies_within_the_budget_are_read() {
    let reply = messages_reply("[{\"description\": \"a\", \"arguments\": {\"city\": \"A\"}}]");
    let limit = reply.len();
    let server = serve_canned(StatusCode::OK, reply).await;
    let backend = AnthropicBackend::new("key", None)
        .with_base_url(&server.base_url)
        .with_max_response_bytes(limit);
    let tool = weather_tool();
    let cases = backend
        .synthesize(SynthesisRequest {
            operation: &tool,
            count: 1,
        })
        .await
        .expect("exactly at the limit");
    assert_eq!(cases.len(), 1);
}
