use super::*;
use std::collections::VecDeque;
use std::time::Duration;

use rmcp::model::CallToolResult;
use serde_json::json;
use toolprobe_test_support::{json_object, text_result};

use crate::catalog::OperationSpec;
use crate::generator::{CandidateCase, Expectation, SchemaBackend, SynthesisFuture, SynthesisRequest};
use crate::RunOptions;

enum Reply {
    Result(CallToolResult),
    Error(InvocationError),
    Hang,
}

struct FakeSession {
    tools: Result<Vec<OperationSpec>, DiscoveryError>,
    replies: VecDeque<Reply>,
    calls: Vec<(String, JsonObject)>,
}

impl FakeSession {
    fn new(tools: Vec<OperationSpec>, replies: Vec<Reply>) -> Self {
        Self {
            tools: Ok(tools),
            replies: replies.into(),
            calls: Vec::new(),
        }
    }

    fn failing(error: DiscoveryError) -> Self {
        Self {
            tools: Err(error),
            replies: VecDeque::new(),
            calls: Vec::new(),
        }
    }
}

impl ToolSession for FakeSession {
    async fn discover(&mut self) -> Result<Vec<OperationSpec>, DiscoveryError> {
        self.tools.clone()
    }

    async fn invoke(
        &mut self,
        name: &str,
        arguments: JsonObject,
    ) -> Result<CallToolResult, InvocationError> {
        self.calls.push((name.to_string(), arguments));
        match self.replies.pop_front() {
            Some(Reply::Result(result)) => Ok(result),
            Some(Reply::Error(error)) => Err(error),
            Some(Reply::Hang) | None => std::future::pending().await,
        }
    }
}

struct FixedBackend(Vec<CandidateCase>);

impl CaseBackend for FixedBackend {
    fn name(&self) -> &str {
        "fixed"
    }

    fn synthesize<'a>(&'a self, _request: SynthesisRequest<'a>) -> SynthesisFuture<'a> {
        Box::pin(async move { Ok(self.0.clone()) })
    }
}

fn echo_tool() -> OperationSpec {
    OperationSpec {
        name: "echo".to_string(),
        description: Some("Echo text back".to_string()),
        input_schema: json_object(json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })),
        output_schema: None,
    }
}

fn text_case(text: &str) -> CandidateCase {
    CandidateCase {
        arguments: json!({ "text": text }),
        description: format!("echo {text}"),
        expectation: None,
    }
}

fn engine(tests_per_tool: usize, timeout_ms: u64) -> Engine {
    Engine::new(EngineConfig::new().with_run_options(RunOptions {
        num_tests_per_tool: tests_per_tool,
        timeout_ms,
    }))
}

#[tokio::test]
async fn all_passing_cases_make_a_successful_report() {
    let mut session = FakeSession::new(
        vec![echo_tool()],
        vec![
            Reply::Result(text_result("a")),
            Reply::Result(text_result("b")),
            Reply::Result(text_result("c")),
        ],
    );
    let report = engine(3, 1_000)
        .test_session(
            &mut session,
            "echo-server",
            Arc::new(SchemaBackend::new()),
            &CancellationToken::new(),
        )
        .await
        .expect("report");

    assert_eq!(report.server_name, "echo-server");
    assert_eq!(report.test_count, 3);
    assert_eq!(report.pass_count, 3);
    assert!(report.is_success());
    assert_eq!(session.calls.len(), 3);
    for (name, arguments) in &session.calls {
        assert_eq!(name, "echo");
        assert!(arguments["text"].is_string());
    }
}

#[tokio::test]
async fn slow_case_fails_with_timeout_and_others_pass() {
    let mut session = FakeSession::new(
        vec![echo_tool()],
        vec![
            Reply::Result(text_result("a")),
            Reply::Hang,
            Reply::Result(text_result("c")),
        ],
    );
    let backend = FixedBackend(vec![text_case("a"), text_case("slow"), text_case("c")]);
    let report = engine(3, 50)
        .test_session(
            &mut session,
            "echo-server",
            Arc::new(backend),
            &CancellationToken::new(),
        )
        .await
        .expect("report");

    assert_eq!(report.test_count, 3);
    assert_eq!(report.pass_count, 2);
    assert_eq!(report.fail_count, 1);
    let slow = &report.results[1];
    assert!(!slow.passed);
    assert!(slow.validation_errors[0].contains("timeout"));
    assert!(slow.response.is_none());
}

#[tokio::test]
async fn empty_catalog_reports_no_tools() {
    let mut session = FakeSession::new(Vec::new(), Vec::new());
    let report = engine(3, 1_000)
        .test_session(
            &mut session,
            "empty",
            Arc::new(SchemaBackend::new()),
            &CancellationToken::new(),
        )
        .await
        .expect("report");

    assert_eq!(report.test_count, 0);
    assert_eq!(report.message.as_deref(), Some(NO_TOOLS_MESSAGE));
    assert!(session.calls.is_empty());
}

#[tokio::test]
async fn duplicate_tool_names_fail_discovery() {
    let mut session = FakeSession::new(vec![echo_tool(), echo_tool()], Vec::new());
    let error = engine(1, 1_000)
        .test_session(
            &mut session,
            "dupes",
            Arc::new(SchemaBackend::new()),
            &CancellationToken::new(),
        )
        .await
        .expect_err("duplicate names");

    assert_eq!(error.phase(), RunPhase::Discovery);
    assert!(error.to_string().contains("duplicate tool name 'echo'"));
}

#[tokio::test]
async fn discovery_errors_surface_with_their_phase() {
    let mut session = FakeSession::failing(DiscoveryError::Request("boom".to_string()));
    let error = engine(1, 1_000)
        .test_session(
            &mut session,
            "broken",
            Arc::new(SchemaBackend::new()),
            &CancellationToken::new(),
        )
        .await
        .expect_err("discovery error");

    assert_eq!(
        error,
        RunError::Discovery(DiscoveryError::Request("boom".to_string()))
    );
}

#[tokio::test]
async fn expected_server_errors_pass() {
    let mut session = FakeSession::new(
        vec![echo_tool()],
        vec![Reply::Error(InvocationError::server("text is required", -32602))],
    );
    let backend = FixedBackend(vec![CandidateCase {
        arguments: json!({}),
        description: "missing text".to_string(),
        expectation: Some(Expectation::error()),
    }]);
    let report = engine(1, 1_000)
        .test_session(
            &mut session,
            "echo-server",
            Arc::new(backend),
            &CancellationToken::new(),
        )
        .await
        .expect("report");

    assert_eq!(report.pass_count, 1);
    assert!(report.results[0].response.as_ref().is_some_and(ToolResponse::is_error));
}

#[tokio::test]
async fn synthesis_failures_are_reported_alongside_results() {
    let broken = OperationSpec {
        name: "broken".to_string(),
        description: None,
        input_schema: json_object(json!({"type": "not-a-type"})),
        output_schema: None,
    };
    let mut session = FakeSession::new(
        vec![echo_tool(), broken],
        vec![Reply::Result(text_result("a"))],
    );
    let report = engine(1, 1_000)
        .test_session(
            &mut session,
            "mixed",
            Arc::new(FixedBackend(vec![text_case("a")])),
            &CancellationToken::new(),
        )
        .await
        .expect("report");

    assert_eq!(report.test_count, 1);
    assert_eq!(report.pass_count, 1);
    assert_eq!(report.synthesis_failures.len(), 1);
    assert_eq!(report.synthesis_failures[0].tool, "broken");
    assert!(!report.is_success());
}

#[tokio::test]
async fn https_meta_schema_uris_compile_without_fetching() {
    let mut tool = echo_tool();
    tool.input_schema
        .insert("$schema".to_string(), json!("https://json-schema.org/draft-07/schema"));
    tool.output_schema = Some(json_object(json!({
        "$schema": "http://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {"echoed": {"type": "string"}},
        "required": ["echoed"]
    })));
    let mut session = FakeSession::new(
        vec![tool],
        vec![
            Reply::Result(CallToolResult::structured(json!({"echoed": "a"}))),
            Reply::Result(CallToolResult::structured(json!({"echoed": "b"}))),
        ],
    );
    let report = engine(2, 1_000)
        .test_session(
            &mut session,
            "drafts",
            Arc::new(SchemaBackend::with_seed(11)),
            &CancellationToken::new(),
        )
        .await
        .expect("report");

    assert!(report.synthesis_failures.is_empty());
    assert_eq!(report.test_count, 2);
    assert_eq!(report.pass_count, 2);
    assert!(report.is_success());
}

#[tokio::test]
async fn tools_without_conforming_candidates_fail_the_run() {
    let mut session = FakeSession::new(vec![echo_tool()], Vec::new());
    let backend = FixedBackend(vec![CandidateCase {
        arguments: json!({"wrong": 1}),
        description: "missing text".to_string(),
        expectation: None,
    }]);
    let report = engine(1, 1_000)
        .test_session(
            &mut session,
            "srv",
            Arc::new(backend),
            &CancellationToken::new(),
        )
        .await
        .expect("report");

    assert_eq!(report.test_count, 0);
    assert_eq!(report.synthesis_failures.len(), 1);
    assert_eq!(report.synthesis_failures[0].tool, "echo");
    assert!(!report.is_success());
    assert!(session.calls.is_empty());
}

#[test]
fn engine_exposes_its_config() {
    let engine = engine(4, 250);
    assert_eq!(engine.config().run.num_tests_per_tool, 4);
    assert_eq!(engine.config().run.timeout(), Duration::from_millis(250));
    assert_eq!(
        Engine::default().config().run.num_tests_per_tool,
        RunOptions::default().num_tests_per_tool
    );
}

#[tokio::test]
async fn cancellation_before_discovery_is_reported() {
    let mut session = FakeSession::new(vec![echo_tool()], Vec::new());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let error = engine(1, 1_000)
        .test_session(&mut session, "srv", Arc::new(SchemaBackend::new()), &cancel)
        .await
        .expect_err("cancelled");
    assert_eq!(
        error,
        RunError::Cancelled {
            phase: RunPhase::Discovery
        }
    );
}

#[tokio::test]
async fn cancellation_during_execution_is_reported() {
    let mut session = FakeSession::new(vec![echo_tool()], vec![Reply::Hang]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let error = engine(1, 30_000)
        .test_session(
            &mut session,
            "srv",
            Arc::new(FixedBackend(vec![text_case("a")])),
            &cancel,
        )
        .await
        .expect_err("cancelled");
    assert_eq!(error.phase(), RunPhase::Execution);
    canceller.await.expect("canceller");
}

#[tokio::test]
async fn missing_backend_fails_before_launch() {
    let descriptor = ServerDescriptor::new("/definitely/not/a/real/server");
    let error = Engine::default()
        .run(&descriptor, None, CancellationToken::new())
        .await
        .expect_err("no backend");
    assert_eq!(error, RunError::MissingBackend);
    assert_eq!(error.phase(), RunPhase::Precondition);
}

#[tokio::test]
async fn call_once_rejects_unknown_tools() {
    let mut session = FakeSession::new(vec![echo_tool()], Vec::new());
    let error = Engine::default()
        .call_once(
            &mut session,
            "missing",
            JsonObject::new(),
            &CancellationToken::new(),
        )
        .await
        .expect_err("unknown tool");
    assert_eq!(error, RunError::UnknownTool("missing".to_string()));
    assert!(session.calls.is_empty());
}

#[tokio::test]
async fn call_once_folds_timeouts_into_error_responses() {
    let mut session = FakeSession::new(vec![echo_tool()], vec![Reply::Hang]);
    let response = engine(1, 30)
        .call_once(
            &mut session,
            "echo",
            json_object(json!({"text": "hi"})),
            &CancellationToken::new(),
        )
        .await
        .expect("response");
    match response {
        ToolResponse::Error { error } => {
            assert!(error.message.starts_with("timeout"));
            assert_eq!(error.kind, crate::session::InvocationErrorKind::Transport);
        }
        other => panic!("expected an error response, got {other:?}"),
    }
}

#[tokio::test]
async fn call_once_returns_the_tool_result() {
    let mut session = FakeSession::new(vec![echo_tool()], vec![Reply::Result(text_result("hi"))]);
    let response = Engine::default()
        .call_once(
            &mut session,
            "echo",
            json_object(json!({"text": "hi"})),
            &CancellationToken::new(),
        )
        .await
        .expect("response");
    assert_eq!(
        response,
        ToolResponse::Success {
            data: text_result("hi")
        }
    );
}

#[test]
fn run_errors_display_and_serialize_phases() {
    assert_eq!(
        RunError::Cancelled {
            phase: RunPhase::Synthesis
        }
        .to_string(),
        "run cancelled during synthesis"
    );
    assert_eq!(
        serde_json::to_value(RunPhase::Connect).expect("serialize"),
        json!("connect")
    );
}
