use super::*;
use serde_json::json;
use std::collections::HashMap;
use toolprobe_test_support::json_object;

type Scripted = Result<Vec<CandidateCase>, SynthesisError>;

struct ScriptedBackend {
    answers: HashMap<String, Scripted>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    fn new(answers: Vec<(&str, Scripted)>) -> Self {
        Self {
            answers: answers
                .into_iter()
                .map(|(name, answer)| (name.to_string(), answer))
                .collect(),
            delay: None,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl CaseBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn synthesize<'a>(&'a self, request: SynthesisRequest<'a>) -> SynthesisFuture<'a> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.answers
                .get(&request.operation.name)
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        })
    }
}

fn operation(name: &str, schema: JsonValue) -> OperationSpec {
    OperationSpec {
        name: name.to_string(),
        description: None,
        input_schema: json_object(schema),
        output_schema: None,
    }
}

fn text_operation(name: &str) -> OperationSpec {
    operation(
        name,
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        }),
    )
}

fn candidate(arguments: JsonValue) -> CandidateCase {
    CandidateCase {
        arguments,
        description: String::new(),
        expectation: None,
    }
}

fn synthesizer(backend: ScriptedBackend, count: usize) -> Synthesizer {
    Synthesizer::new(Arc::new(backend), count, SynthesisOptions::default())
}

#[tokio::test]
async fn cases_follow_catalog_then_backend_order() {
    let catalog = Catalog::new(vec![text_operation("b"), text_operation("a")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![
        (
            "a",
            Ok(vec![candidate(json!({"text": "a1"})), candidate(json!({"text": "a2"}))]),
        ),
        ("b", Ok(vec![candidate(json!({"text": "b1"}))])),
    ]);
    let synthesis = synthesizer(backend, 3).generate(&catalog).await;

    let inputs: Vec<_> = synthesis
        .cases
        .iter()
        .map(|case| (case.tool_name.as_str(), case.inputs["text"].clone()))
        .collect();
    assert_eq!(
        inputs,
        vec![("b", json!("b1")), ("a", json!("a1")), ("a", json!("a2"))]
    );
    assert!(synthesis.failures.is_empty());
    assert_eq!(synthesis.cases[0].description, "b case 1");
}

#[tokio::test]
async fn extra_candidates_are_truncated() {
    let catalog = Catalog::new(vec![text_operation("echo")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![(
        "echo",
        Ok((0..5)
            .map(|index| candidate(json!({"text": format!("t{index}")})))
            .collect()),
    )]);
    let synthesis = synthesizer(backend, 2).generate(&catalog).await;
    assert_eq!(synthesis.cases.len(), 2);
}

#[tokio::test]
async fn non_conforming_candidates_are_dropped() {
    let catalog = Catalog::new(vec![text_operation("echo")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![(
        "echo",
        Ok(vec![
            candidate(json!({"text": 5})),
            candidate(json!({})),
            candidate(json!({"text": "fine"})),
        ]),
    )]);
    let synthesis = synthesizer(backend, 3).generate(&catalog).await;
    assert_eq!(synthesis.cases.len(), 1);
    assert_eq!(synthesis.cases[0].inputs["text"], json!("fine"));
    assert_eq!(synthesis.cases[0].description, "echo case 3");
}

#[tokio::test]
async fn operation_fails_when_no_candidate_conforms() {
    let catalog =
        Catalog::new(vec![text_operation("echo"), text_operation("other")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![
        (
            "echo",
            Ok(vec![
                candidate(json!({"wrong": 1})),
                candidate(json!({"wrong": 2})),
                candidate(json!({})),
            ]),
        ),
        ("other", Ok(vec![candidate(json!({"text": "ok"}))])),
    ]);
    let synthesis = synthesizer(backend, 3).generate(&catalog).await;

    assert_eq!(synthesis.cases.len(), 1);
    assert_eq!(synthesis.cases[0].tool_name, "other");
    assert_eq!(synthesis.failures.len(), 1);
    assert_eq!(synthesis.failures[0].tool, "echo");
    assert_eq!(
        synthesis.failures[0].error,
        SynthesisError::Malformed("no candidate conforms to the input schema".to_string())
    );
}

#[tokio::test]
async fn empty_backend_answer_fails_the_operation() {
    let catalog = Catalog::new(vec![text_operation("echo")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![("echo", Ok(Vec::new()))]);
    let synthesis = synthesizer(backend, 3).generate(&catalog).await;
    assert!(synthesis.cases.is_empty());
    assert_eq!(
        synthesis.failures[0].error,
        SynthesisError::Malformed("backend returned no candidates".to_string())
    );
}

#[tokio::test]
async fn error_expecting_candidates_skip_conformance() {
    let catalog = Catalog::new(vec![text_operation("echo")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![(
        "echo",
        Ok(vec![CandidateCase {
            arguments: json!({"text": 5}),
            description: "wrong type".to_string(),
            expectation: Some(Expectation::error()),
        }]),
    )]);
    let synthesis = synthesizer(backend, 3).generate(&catalog).await;
    assert_eq!(synthesis.cases.len(), 1);
    assert!(synthesis.cases[0].expects_error());
    assert_eq!(synthesis.cases[0].description, "wrong type");
}

#[tokio::test]
async fn non_object_arguments_fail_only_that_operation() {
    let catalog =
        Catalog::new(vec![text_operation("bad"), text_operation("good")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![
        (
            "bad",
            Ok(vec![candidate(json!({"text": "ok"})), candidate(json!([1, 2]))]),
        ),
        ("good", Ok(vec![candidate(json!({"text": "ok"}))])),
    ]);
    let synthesis = synthesizer(backend, 3).generate(&catalog).await;

    assert_eq!(synthesis.cases.len(), 1);
    assert_eq!(synthesis.cases[0].tool_name, "good");
    assert_eq!(synthesis.failures.len(), 1);
    assert_eq!(synthesis.failures[0].tool, "bad");
    assert_eq!(
        synthesis.failures[0].error,
        SynthesisError::Malformed("candidate 1 arguments must be an object, got array".to_string())
    );
}

#[tokio::test]
async fn backend_errors_are_recorded_per_operation() {
    let catalog = Catalog::new(vec![text_operation("echo")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![(
        "echo",
        Err(SynthesisError::Backend("quota exceeded".to_string())),
    )]);
    let synthesis = synthesizer(backend, 3).generate(&catalog).await;
    assert!(synthesis.cases.is_empty());
    assert_eq!(
        synthesis.failures[0].error.to_string(),
        "backend error: quota exceeded"
    );
}

#[tokio::test]
async fn slow_backend_times_out() {
    let catalog = Catalog::new(vec![text_operation("echo")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![("echo", Ok(vec![candidate(json!({"text": "x"}))]))])
        .delayed(Duration::from_secs(5));
    let options = SynthesisOptions {
        backend_timeout: Duration::from_millis(20),
        ..SynthesisOptions::default()
    };
    let synthesis = Synthesizer::new(Arc::new(backend), 3, options)
        .generate(&catalog)
        .await;
    assert!(synthesis.cases.is_empty());
    assert_eq!(
        synthesis.failures[0].error,
        SynthesisError::Timeout(Duration::from_millis(20))
    );
}

#[tokio::test]
async fn oversized_candidates_exceed_budget() {
    let catalog = Catalog::new(vec![text_operation("echo")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![(
        "echo",
        Ok(vec![candidate(json!({"text": "x".repeat(200)}))]),
    )]);
    let options = SynthesisOptions {
        max_candidate_bytes: 64,
        ..SynthesisOptions::default()
    };
    let synthesis = Synthesizer::new(Arc::new(backend), 3, options)
        .generate(&catalog)
        .await;
    assert!(matches!(
        synthesis.failures[0].error,
        SynthesisError::BudgetExceeded { limit: 64, .. }
    ));
}

#[tokio::test]
async fn invalid_input_schema_fails_the_operation() {
    let catalog = Catalog::new(vec![operation("broken", json!({"type": 12}))]).expect("catalog");
    let backend = ScriptedBackend::new(vec![("broken", Ok(vec![candidate(json!({}))]))]);
    let synthesis = synthesizer(backend, 3).generate(&catalog).await;
    assert!(synthesis.cases.is_empty());
    assert!(matches!(
        synthesis.failures[0].error,
        SynthesisError::InvalidSchema(_)
    ));
}

#[tokio::test]
async fn zero_count_yields_no_cases() {
    let catalog = Catalog::new(vec![text_operation("echo")]).expect("catalog");
    let backend = ScriptedBackend::new(vec![("echo", Ok(vec![candidate(json!({"text": "x"}))]))]);
    let synthesis = synthesizer(backend, 0).generate(&catalog).await;
    assert!(synthesis.cases.is_empty());
    assert!(synthesis.failures.is_empty());
}

#[test]
fn synthesis_failure_serializes_error_as_text() {
    let failure = SynthesisFailure {
        tool: "echo".to_string(),
        error: SynthesisError::UnsupportedSchema("enum must include at least one value".to_string()),
    };
    let value = serde_json::to_value(&failure).expect("serialize");
    assert_eq!(
        value,
        json!({"tool": "echo", "error": "unsupported schema: enum must include at least one value"})
    );
}

#[test]
fn expectation_deserializes_with_defaults() {
    let expectation: Expectation = serde_json::from_value(json!({
        "outcome": "error",
        "requiredFields": ["/result/id"],
    }))
    .expect("expectation");
    assert!(expectation.expects_error());
    assert_eq!(expectation.required_fields, vec!["/result/id".to_string()]);
    assert!(expectation.field_types.is_empty());

    let defaulted: Expectation = serde_json::from_value(json!({})).expect("expectation");
    assert_eq!(defaulted, Expectation::success());
}

#[test]
fn test_case_builders_set_fields() {
    let case = TestCase::new("echo", json_object(json!({"text": "hi"})))
        .with_description("greets")
        .with_expectation(Expectation::success().with_field_type("text", "string"));
    assert_eq!(case.description, "greets");
    assert!(!case.expects_error());
    let value = serde_json::to_value(&case).expect("serialize");
    assert_eq!(value["toolName"], json!("echo"));
    assert_eq!(value["expectation"]["fieldTypes"]["text"], json!("string"));
}
