//! Sequential execution of test cases against a session.

use std::fmt;
use std::time::{Duration, Instant};

use rmcp::model::CallToolResult;
use serde::{Deserialize, Serialize};
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;

use crate::generator::TestCase;
use crate::session::{InvocationError, InvocationErrorKind, ToolResponse, ToolSession};

/// What happened to one invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum Execution {
    /// The server answered, with a result or a JSON-RPC error.
    Completed(ToolResponse),
    /// No answer arrived before the deadline.
    TimedOut { after: Duration },
    /// The request failed below the protocol level.
    TransportError(InvocationError),
}

/// Coarse label for an [`Execution`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Completed,
    TimedOut,
    TransportError,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::TimedOut => "timed-out",
            OutcomeStatus::TransportError => "transport-error",
        })
    }
}

/// One executed test case.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionOutcome {
    pub test_case: TestCase,
    pub execution: Execution,
    /// Wall time from dispatch to answer or deadline.
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    pub fn status(&self) -> OutcomeStatus {
        match self.execution {
            Execution::Completed(_) => OutcomeStatus::Completed,
            Execution::TimedOut { .. } => OutcomeStatus::TimedOut,
            Execution::TransportError(_) => OutcomeStatus::TransportError,
        }
    }

    /// The server's answer, when one arrived.
    pub fn response(&self) -> Option<&ToolResponse> {
        match &self.execution {
            Execution::Completed(response) => Some(response),
            _ => None,
        }
    }
}

/// The run was cancelled before all cases finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("run cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Executes `cases` one at a time, each bounded by `timeout`.
///
/// Individual failures never stop the loop. When `cancel` fires, the
/// in-flight call is abandoned and no further cases are started.
pub async fn run_cases<S: ToolSession>(
    session: &mut S,
    cases: Vec<TestCase>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<ExecutionOutcome>, Cancelled> {
    let total = cases.len();
    let mut outcomes = Vec::with_capacity(total);
    for (index, test_case) in cases.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        log::info!(
            "[{}/{total}] {}: {}",
            index + 1,
            test_case.tool_name,
            test_case.description
        );

        let started = Instant::now();
        let invocation = session.invoke(&test_case.tool_name, test_case.inputs.clone());
        let execution = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            result = tokio::time::timeout(timeout, invocation) => classify(result, timeout),
        };
        let elapsed = started.elapsed();

        match &execution {
            Execution::TimedOut { .. } => log::warn!(
                "'{}' timed out after {}ms",
                test_case.tool_name,
                timeout.as_millis()
            ),
            Execution::TransportError(error) => {
                log::warn!("'{}' transport error: {error}", test_case.tool_name)
            }
            Execution::Completed(_) => log::debug!(
                "'{}' answered in {}ms",
                test_case.tool_name,
                elapsed.as_millis()
            ),
        }
        outcomes.push(ExecutionOutcome {
            test_case,
            execution,
            elapsed,
        });
    }
    Ok(outcomes)
}

fn classify(
    result: Result<Result<CallToolResult, InvocationError>, Elapsed>,
    timeout: Duration,
) -> Execution {
    match result {
        Err(_) => Execution::TimedOut { after: timeout },
        Ok(Ok(data)) => Execution::Completed(ToolResponse::Success { data }),
        Ok(Err(error)) if error.kind == InvocationErrorKind::Server => {
            Execution::Completed(ToolResponse::Error { error })
        }
        Ok(Err(error)) => Execution::TransportError(error),
    }
}

#[cfg(test)]
#[path = "../tests/internal/execution_unit_tests.rs"]
mod tests;
