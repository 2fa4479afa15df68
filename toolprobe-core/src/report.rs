//! Per-case results and the run-level report.

use serde::Serialize;

use crate::execution::{ExecutionOutcome, OutcomeStatus};
use crate::generator::{SynthesisFailure, TestCase};
use crate::session::ToolResponse;
use crate::validation::ValidationResult;

/// Message attached to reports for servers that expose no tools.
pub const NO_TOOLS_MESSAGE: &str = "No tools found in the MCP server. Nothing to test.";

/// Outcome and verdict for one test case.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_case: TestCase,
    pub passed: bool,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ToolResponse>,
    /// Milliseconds from dispatch to answer or deadline.
    pub execution_time: u64,
    pub validation_errors: Vec<String>,
}

impl TestResult {
    /// Combines an outcome with its verdict. `passed` mirrors `validation.valid`.
    pub fn new(outcome: ExecutionOutcome, validation: ValidationResult) -> Self {
        let status = outcome.status();
        let execution_time = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX);
        let response = outcome.response().cloned();
        Self {
            test_case: outcome.test_case,
            passed: validation.valid,
            status,
            response,
            execution_time,
            validation_errors: validation.errors,
        }
    }
}

/// Everything a run produced for one server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub server_name: String,
    pub test_count: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub results: Vec<TestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub synthesis_failures: Vec<SynthesisFailure>,
}

impl RunReport {
    /// Folds results into counts.
    pub fn aggregate(server_name: impl Into<String>, results: Vec<TestResult>) -> Self {
        let pass_count = results.iter().filter(|result| result.passed).count();
        Self {
            server_name: server_name.into(),
            test_count: results.len(),
            pass_count,
            fail_count: results.len() - pass_count,
            results,
            message: None,
            synthesis_failures: Vec::new(),
        }
    }

    /// Report for a server whose catalog is empty.
    pub fn no_tools(server_name: impl Into<String>) -> Self {
        Self::aggregate(server_name, Vec::new()).with_message(NO_TOOLS_MESSAGE)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_synthesis_failures(mut self, failures: Vec<SynthesisFailure>) -> Self {
        self.synthesis_failures = failures;
        self
    }

    /// A run succeeds when every case passed and every tool got cases.
    pub fn is_success(&self) -> bool {
        self.fail_count == 0 && self.synthesis_failures.is_empty()
    }
}
