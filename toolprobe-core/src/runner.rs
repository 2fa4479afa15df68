//! End-to-end runs: launch, connect, discover, synthesize, execute, score.

use std::fmt;
use std::sync::Arc;

use rmcp::model::JsonObject;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::execution::{run_cases, Execution};
use crate::generator::{CaseBackend, Synthesizer, TestCase};
use crate::process::{LaunchError, ServerProcess};
use crate::report::{RunReport, TestResult, NO_TOOLS_MESSAGE};
use crate::session::{
    ConnectError, DiscoveryError, InvocationError, McpSession, ToolResponse, ToolSession,
};
use crate::validation::ResponseValidator;
use crate::{EngineConfig, ServerDescriptor};

/// Stage of a run, used to label failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Precondition,
    Launch,
    Connect,
    Discovery,
    Synthesis,
    Execution,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunPhase::Precondition => "precondition",
            RunPhase::Launch => "launch",
            RunPhase::Connect => "connect",
            RunPhase::Discovery => "discovery",
            RunPhase::Synthesis => "synthesis",
            RunPhase::Execution => "execution",
        })
    }
}

/// A run that could not produce a report.
#[derive(Clone, Debug, PartialEq)]
pub enum RunError {
    /// No case backend was configured.
    MissingBackend,
    Launch(LaunchError),
    Connect(ConnectError),
    Discovery(DiscoveryError),
    /// The caller cancelled the run.
    Cancelled { phase: RunPhase },
    /// The requested tool is not in the server's catalog.
    UnknownTool(String),
}

impl RunError {
    /// The phase in which the run failed.
    pub fn phase(&self) -> RunPhase {
        match self {
            RunError::MissingBackend => RunPhase::Precondition,
            RunError::Launch(_) => RunPhase::Launch,
            RunError::Connect(_) => RunPhase::Connect,
            RunError::Discovery(_) => RunPhase::Discovery,
            RunError::Cancelled { phase } => *phase,
            RunError::UnknownTool(_) => RunPhase::Execution,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::MissingBackend => f.write_str("no test case backend is configured"),
            RunError::Launch(error) => error.fmt(f),
            RunError::Connect(error) => error.fmt(f),
            RunError::Discovery(error) => error.fmt(f),
            RunError::Cancelled { phase } => write!(f, "run cancelled during {phase}"),
            RunError::UnknownTool(name) => write!(f, "tool '{name}' not found on the server"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Launch(error) => Some(error),
            RunError::Connect(error) => Some(error),
            RunError::Discovery(error) => Some(error),
            _ => None,
        }
    }
}

impl From<LaunchError> for RunError {
    fn from(error: LaunchError) -> Self {
        Self::Launch(error)
    }
}

impl From<ConnectError> for RunError {
    fn from(error: ConnectError) -> Self {
        Self::Connect(error)
    }
}

impl From<DiscoveryError> for RunError {
    fn from(error: DiscoveryError) -> Self {
        Self::Discovery(error)
    }
}

/// Drives runs against capability servers.
///
/// Every entry point owns the server process for its duration and tears it
/// down before returning, whatever the outcome.
#[derive(Clone, Debug, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the full pipeline against one server.
    ///
    /// A missing backend fails before anything is spawned.
    pub async fn run(
        &self,
        descriptor: &ServerDescriptor,
        backend: Option<Arc<dyn CaseBackend>>,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunError> {
        let backend = backend.ok_or(RunError::MissingBackend)?;
        log::info!(
            "testing server '{}' with the {} backend",
            descriptor.name,
            backend.name()
        );
        let (mut process, mut session) = self.open(descriptor, &cancel).await?;
        let result = self
            .test_session(&mut session, &descriptor.name, backend, &cancel)
            .await;
        session.close().await;
        process.stop().await;
        result
    }

    /// Lists the server's tools without running any.
    pub async fn discover(&self, descriptor: &ServerDescriptor) -> Result<Catalog, RunError> {
        let cancel = CancellationToken::new();
        let (mut process, mut session) = self.open(descriptor, &cancel).await?;
        let result = discover_catalog(&mut session, &cancel).await;
        session.close().await;
        process.stop().await;
        result
    }

    /// Calls one tool once and returns its response.
    ///
    /// Timeouts and transport failures are folded into
    /// [`ToolResponse::Error`].
    pub async fn execute_tool(
        &self,
        descriptor: &ServerDescriptor,
        tool_name: &str,
        arguments: JsonObject,
    ) -> Result<ToolResponse, RunError> {
        let cancel = CancellationToken::new();
        let (mut process, mut session) = self.open(descriptor, &cancel).await?;
        let result = self
            .call_once(&mut session, tool_name, arguments, &cancel)
            .await;
        session.close().await;
        process.stop().await;
        result
    }

    /// Launches the server and performs the handshake. The process is
    /// stopped again if the handshake fails.
    async fn open(
        &self,
        descriptor: &ServerDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(ServerProcess, McpSession), RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled {
                phase: RunPhase::Launch,
            });
        }
        let mut process =
            ServerProcess::start_with_sink(descriptor, self.config.diagnostics.clone())?;
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunError::Cancelled { phase: RunPhase::Connect }),
            result = McpSession::connect(&mut process, &self.config.session) => {
                result.map_err(RunError::from)
            }
        };
        match connected {
            Ok(session) => Ok((process, session)),
            Err(error) => {
                log::warn!("connecting to '{}' failed: {error}", descriptor.name);
                for line in process.diagnostics().iter().rev().take(5).rev() {
                    log::warn!("[{} stderr] {line}", descriptor.name);
                }
                process.stop().await;
                Err(error)
            }
        }
    }

    /// Discovery through scoring, over an established session.
    pub(crate) async fn test_session<S: ToolSession>(
        &self,
        session: &mut S,
        server_name: &str,
        backend: Arc<dyn CaseBackend>,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        let catalog = discover_catalog(session, cancel).await?;
        if catalog.is_empty() {
            log::info!("{NO_TOOLS_MESSAGE}");
            return Ok(RunReport::no_tools(server_name));
        }
        log::info!("discovered {} tools", catalog.tool_count);

        let synthesizer = Synthesizer::new(
            backend,
            self.config.run.num_tests_per_tool,
            self.config.synthesis.clone(),
        );
        let synthesis = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RunError::Cancelled { phase: RunPhase::Synthesis });
            }
            synthesis = synthesizer.generate(&catalog) => synthesis,
        };

        let outcomes = run_cases(session, synthesis.cases, self.config.run.timeout(), cancel)
            .await
            .map_err(|_| RunError::Cancelled {
                phase: RunPhase::Execution,
            })?;

        let validator = ResponseValidator::new(&catalog);
        let results = outcomes
            .into_iter()
            .map(|outcome| {
                let validation = validator.validate(&outcome);
                TestResult::new(outcome, validation)
            })
            .collect();
        let report =
            RunReport::aggregate(server_name, results).with_synthesis_failures(synthesis.failures);
        log::info!(
            "{}: {} of {} cases passed",
            server_name,
            report.pass_count,
            report.test_count
        );
        Ok(report)
    }

    async fn call_once<S: ToolSession>(
        &self,
        session: &mut S,
        tool_name: &str,
        arguments: JsonObject,
        cancel: &CancellationToken,
    ) -> Result<ToolResponse, RunError> {
        let catalog = discover_catalog(session, cancel).await?;
        if catalog.get(tool_name).is_none() {
            return Err(RunError::UnknownTool(tool_name.to_string()));
        }

        let case = TestCase::new(tool_name, arguments);
        let mut outcomes = run_cases(session, vec![case], self.config.run.timeout(), cancel)
            .await
            .map_err(|_| RunError::Cancelled {
                phase: RunPhase::Execution,
            })?;
        let Some(outcome) = outcomes.pop() else {
            return Err(RunError::Cancelled {
                phase: RunPhase::Execution,
            });
        };
        Ok(match outcome.execution {
            Execution::Completed(response) => response,
            Execution::TimedOut { after } => ToolResponse::Error {
                error: InvocationError::transport(format!(
                    "timeout: no response within {}ms",
                    after.as_millis()
                )),
            },
            Execution::TransportError(error) => ToolResponse::Error { error },
        })
    }
}

async fn discover_catalog<S: ToolSession>(
    session: &mut S,
    cancel: &CancellationToken,
) -> Result<Catalog, RunError> {
    let tools = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(RunError::Cancelled { phase: RunPhase::Discovery });
        }
        tools = session.discover() => tools?,
    };
    Ok(Catalog::new(tools)?)
}

#[cfg(test)]
#[path = "../tests/internal/runner_unit_tests.rs"]
mod tests;
