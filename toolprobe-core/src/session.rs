//! MCP client session over the server's stdio pipes.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rmcp::model::{CallToolRequestParam, CallToolResult, JsonObject};
use rmcp::service::{RoleClient, RunningService, ServiceError};
use rmcp::transport::IntoTransport;
use rmcp::ServiceExt;
use serde::{Deserialize, Serialize};

use crate::catalog::OperationSpec;
use crate::process::ServerProcess;
use crate::SessionConfig;

/// The initialize handshake did not complete.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectError {
    /// The server pipes were already handed to another session.
    NoStdio,
    /// The handshake did not finish within the configured deadline.
    Timeout(Duration),
    /// The handshake failed or the server closed the stream.
    Handshake(String),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::NoStdio => f.write_str("server stdio is not available"),
            ConnectError::Timeout(after) => {
                write!(f, "initialize handshake timed out after {}ms", after.as_millis())
            }
            ConnectError::Handshake(reason) => write!(f, "initialize handshake failed: {reason}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// The tool catalog could not be fetched or was invalid.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiscoveryError {
    /// `tools/list` did not answer within the configured deadline.
    Timeout(Duration),
    /// `tools/list` failed at the protocol level.
    Request(String),
    /// The listing decoded but violates catalog rules.
    Malformed(String),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::Timeout(after) => {
                write!(f, "tools/list timed out after {}ms", after.as_millis())
            }
            DiscoveryError::Request(reason) => write!(f, "tools/list failed: {reason}"),
            DiscoveryError::Malformed(reason) => write!(f, "malformed tool catalog: {reason}"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

/// Where a failed invocation originated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationErrorKind {
    /// The server answered with a JSON-RPC error.
    Server,
    /// The request never got a well-formed answer.
    Transport,
}

/// A tool invocation that did not produce a result payload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InvocationError {
    /// Failure origin.
    pub kind: InvocationErrorKind,
    /// Human-readable description.
    pub message: String,
    /// JSON-RPC error code for server-reported failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl InvocationError {
    /// Creates a server-reported error.
    pub fn server(message: impl Into<String>, code: i32) -> Self {
        Self {
            kind: InvocationErrorKind::Server,
            message: message.into(),
            code: Some(code),
        }
    }

    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: InvocationErrorKind::Transport,
            message: message.into(),
            code: None,
        }
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for InvocationError {}

impl From<ServiceError> for InvocationError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::McpError(data) => Self::server(data.message.to_string(), data.code.0),
            other => Self::transport(other.to_string()),
        }
    }
}

/// Outcome of a single tool call as reported to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResponse {
    /// The server returned a result payload.
    Success { data: CallToolResult },
    /// The server or transport reported a failure.
    Error { error: InvocationError },
}

impl ToolResponse {
    /// Returns whether the response carries a failure, including results
    /// flagged with `isError`.
    pub fn is_error(&self) -> bool {
        match self {
            ToolResponse::Success { data } => data.is_error.unwrap_or(false),
            ToolResponse::Error { .. } => true,
        }
    }
}

/// The operations the engine needs from a connected server.
pub trait ToolSession: Send {
    /// Fetches the server's tool listing.
    fn discover(
        &mut self,
    ) -> impl Future<Output = Result<Vec<OperationSpec>, DiscoveryError>> + Send;

    /// Calls one tool with the given arguments.
    fn invoke(
        &mut self,
        name: &str,
        arguments: JsonObject,
    ) -> impl Future<Output = Result<CallToolResult, InvocationError>> + Send;
}

/// A live MCP client session.
pub struct McpSession {
    service: RunningService<RoleClient, ()>,
    discovery_timeout: Duration,
}

impl McpSession {
    /// Performs the initialize handshake over the process's stdio pipes.
    pub async fn connect(
        process: &mut ServerProcess,
        config: &SessionConfig,
    ) -> Result<Self, ConnectError> {
        let stdio = process.take_stdio().ok_or(ConnectError::NoStdio)?;
        log::debug!("connecting to server '{}'", process.name());
        Self::establish(stdio, config).await
    }

    /// Performs the initialize handshake over an arbitrary transport.
    pub async fn establish<T, E, A>(transport: T, config: &SessionConfig) -> Result<Self, ConnectError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let service = match tokio::time::timeout(config.handshake_timeout, ().serve(transport)).await
        {
            Ok(Ok(service)) => service,
            Ok(Err(error)) => return Err(ConnectError::Handshake(error.to_string())),
            Err(_) => return Err(ConnectError::Timeout(config.handshake_timeout)),
        };
        if let Some(info) = service.peer_info() {
            log::info!(
                "connected to '{}' {} (protocol {:?})",
                info.server_info.name,
                info.server_info.version,
                info.protocol_version
            );
        }
        if !config.settle_delay.is_zero() {
            tokio::time::sleep(config.settle_delay).await;
        }
        Ok(Self {
            service,
            discovery_timeout: config.discovery_timeout,
        })
    }

    /// Shuts the session down. Errors are logged and swallowed.
    pub async fn close(self) {
        if let Err(error) = self.service.cancel().await {
            log::debug!("session shutdown reported: {error}");
        }
    }
}

impl ToolSession for McpSession {
    async fn discover(&mut self) -> Result<Vec<OperationSpec>, DiscoveryError> {
        match tokio::time::timeout(self.discovery_timeout, self.service.list_all_tools()).await {
            Ok(Ok(tools)) => {
                log::debug!("server listed {} tools", tools.len());
                Ok(tools.iter().map(OperationSpec::from).collect())
            }
            Ok(Err(error)) => Err(DiscoveryError::Request(error.to_string())),
            Err(_) => Err(DiscoveryError::Timeout(self.discovery_timeout)),
        }
    }

    async fn invoke(
        &mut self,
        name: &str,
        arguments: JsonObject,
    ) -> Result<CallToolResult, InvocationError> {
        let request = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: Some(arguments),
        };
        self.service
            .call_tool(request)
            .await
            .map_err(InvocationError::from)
    }
}

impl fmt::Debug for McpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpSession")
            .field("discovery_timeout", &self.discovery_timeout)
            .finish()
    }
}

#[cfg(test)]
#[path = "../tests/internal/session_unit_tests.rs"]
mod tests;
