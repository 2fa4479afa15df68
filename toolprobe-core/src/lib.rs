//! Public API types for configuring and reporting toolprobe runs.
//!
//! A run launches an MCP server as a child process, discovers its tools,
//! synthesizes inputs for each tool, invokes them under a deadline and
//! validates every response. See [`Engine`] for the entry points.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod execution;
pub mod generator;
pub mod process;
pub mod report;
pub mod runner;
pub mod session;
pub mod validation;

mod schema;

pub use catalog::{Catalog, OperationSpec};
pub use execution::{run_cases, Cancelled, Execution, ExecutionOutcome, OutcomeStatus};
pub use generator::{
    CandidateCase, CaseBackend, Expectation, ExpectedOutcome, SchemaBackend, Synthesis,
    SynthesisError, SynthesisFailure, SynthesisFuture, SynthesisRequest, Synthesizer, TestCase,
};
pub use process::{LaunchError, ServerProcess};
pub use report::{RunReport, TestResult, NO_TOOLS_MESSAGE};
pub use rmcp::model::{CallToolResult, JsonObject};
pub use runner::{Engine, RunError, RunPhase};
pub use session::{
    ConnectError, DiscoveryError, InvocationError, InvocationErrorKind, McpSession, ToolResponse,
    ToolSession,
};
pub use tokio_util::sync::CancellationToken;
pub use validation::{ResponseValidator, ValidationResult};

/// Launch parameters for one capability server.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Display name used in reports and logs.
    pub name: String,
    /// Command to execute for the MCP server.
    pub command: String,
    /// Command-line arguments passed to the MCP server.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to add or override for the MCP process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Optional working directory for the MCP process.
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ServerDescriptor {
    /// Creates a descriptor with defaults for args, env, and cwd.
    ///
    /// The display name defaults to the command.
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            name: command.clone(),
            command,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends a command-line argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds or overrides one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Options applied uniformly to every case in a run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Number of cases to synthesize per tool.
    pub num_tests_per_tool: usize,
    /// Per-case deadline in milliseconds.
    pub timeout_ms: u64,
}

impl RunOptions {
    /// Per-case deadline as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            num_tests_per_tool: 3,
            timeout_ms: 10_000,
        }
    }
}

/// Deadlines governing the MCP session outside of tool calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    /// Upper bound for the initialize handshake.
    pub handshake_timeout: Duration,
    /// Pause after the handshake before the first request.
    pub settle_delay: Duration,
    /// Upper bound for fetching the tool catalog.
    pub discovery_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(500),
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

/// Budgets applied to each case-backend call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SynthesisOptions {
    /// Upper bound for one backend call.
    pub backend_timeout: Duration,
    /// Upper bound for the serialized candidates returned by one backend call.
    pub max_candidate_bytes: usize,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            backend_timeout: Duration::from_secs(60),
            max_candidate_bytes: 256 * 1024,
        }
    }
}

/// Receives stderr lines emitted by a server under test.
pub trait DiagnosticSink: Send + Sync {
    /// Records one stderr line from the named server.
    fn line(&self, server: &str, line: &str);
}

/// Top-level configuration handed to [`Engine::new`].
#[derive(Clone, Default)]
pub struct EngineConfig {
    /// Per-run options.
    pub run: RunOptions,
    /// Session deadlines.
    pub session: SessionConfig,
    /// Backend budgets.
    pub synthesis: SynthesisOptions,
    /// Optional side channel for server stderr.
    pub diagnostics: Option<Arc<dyn DiagnosticSink>>,
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-run options.
    pub fn with_run_options(mut self, run: RunOptions) -> Self {
        self.run = run;
        self
    }

    /// Sets the session deadlines.
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Sets the backend budgets.
    pub fn with_synthesis(mut self, synthesis: SynthesisOptions) -> Self {
        self.synthesis = synthesis;
        self
    }

    /// Routes server stderr lines to `sink` in addition to the log.
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("run", &self.run)
            .field("session", &self.session)
            .field("synthesis", &self.synthesis)
            .field("diagnostics", &self.diagnostics.is_some())
            .finish()
    }
}
