//! Fixtures shared by the toolprobe test suites.

use std::future::Future;
use std::sync::{Arc, Mutex};

use ctor::ctor;
use rmcp::model::{
    CallToolResult, ClientJsonRpcMessage, ClientRequest, Content, ErrorData, JsonObject,
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, JsonRpcVersion2_0, ListToolsResult,
    RequestId, ServerInfo, ServerJsonRpcMessage, ServerResult, Tool,
};
use rmcp::service::RoleClient;
use rmcp::transport::Transport;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

#[ctor]
fn init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .is_test(true)
        .try_init();
}

/// Unwraps a `json!` object literal.
pub fn json_object(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn tool_with_schemas(name: &str, input_schema: Value, output_schema: Option<Value>) -> Tool {
    let mut tool = Tool::new(name.to_string(), "", json_object(input_schema));
    tool.description = None;
    tool.output_schema = output_schema.map(|schema| Arc::new(json_object(schema)));
    tool
}

/// A tool accepting any object.
pub fn stub_tool(name: &str) -> Tool {
    Tool::new(name.to_string(), "stub tool", json_object(json!({"type": "object"})))
}

pub fn text_result(text: &str) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}

pub fn structured_result(value: Value) -> CallToolResult {
    CallToolResult::structured(value)
}

type RequestLog = Arc<Mutex<Vec<ClientJsonRpcMessage>>>;

/// In-memory MCP server answering initialize, tools/list and tools/call.
///
/// Replies are queued when a request is sent and handed out by `receive`.
pub struct ScriptedTransport {
    tools: Vec<Tool>,
    call_result: CallToolResult,
    answer_initialize: bool,
    list_tools_error: Option<ErrorData>,
    call_tool_error: Option<ErrorData>,
    requests: RequestLog,
    outbox: mpsc::UnboundedSender<ServerJsonRpcMessage>,
    inbox: Arc<AsyncMutex<mpsc::UnboundedReceiver<ServerJsonRpcMessage>>>,
}

impl ScriptedTransport {
    /// Lists `tools` and answers every call with `call_result`.
    pub fn new(tools: Vec<Tool>, call_result: CallToolResult) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            tools,
            call_result,
            answer_initialize: true,
            list_tools_error: None,
            call_tool_error: None,
            requests: RequestLog::default(),
            outbox,
            inbox: Arc::new(AsyncMutex::new(inbox)),
        }
    }

    /// A server that never answers the initialize request.
    pub fn silent() -> Self {
        Self {
            answer_initialize: false,
            ..Self::new(Vec::new(), text_result(""))
        }
    }

    pub fn with_list_tools_error(mut self, error: ErrorData) -> Self {
        self.list_tools_error = Some(error);
        self
    }

    pub fn with_call_tool_error(mut self, error: ErrorData) -> Self {
        self.call_tool_error = Some(error);
        self
    }

    /// Every message the client sent, in order.
    pub fn request_log(&self) -> RequestLog {
        Arc::clone(&self.requests)
    }

    fn reply_to(&self, request: &JsonRpcRequest<ClientRequest>) -> Option<ServerJsonRpcMessage> {
        let id = request.id.clone();
        let scripted_error = match &request.request {
            ClientRequest::ListToolsRequest(_) => self.list_tools_error.clone(),
            ClientRequest::CallToolRequest(_) => self.call_tool_error.clone(),
            _ => None,
        };
        if let Some(error) = scripted_error {
            return Some(ServerJsonRpcMessage::error(error, id));
        }
        let result = match &request.request {
            ClientRequest::InitializeRequest(_) if self.answer_initialize => {
                ServerResult::InitializeResult(ServerInfo::default())
            }
            ClientRequest::ListToolsRequest(_) => ServerResult::ListToolsResult(ListToolsResult {
                tools: self.tools.clone(),
                next_cursor: None,
                meta: None,
            }),
            ClientRequest::CallToolRequest(_) => {
                ServerResult::CallToolResult(self.call_result.clone())
            }
            _ => return None,
        };
        Some(respond(id, result))
    }
}

fn respond(id: RequestId, result: ServerResult) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id,
        result,
    })
}

impl Transport<RoleClient> for ScriptedTransport {
    type Error = std::convert::Infallible;

    fn send(
        &mut self,
        item: ClientJsonRpcMessage,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'static {
        if let JsonRpcMessage::Request(request) = &item {
            if let Some(reply) = self.reply_to(request) {
                let _ = self.outbox.send(reply);
            }
        }
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(item);
        std::future::ready(Ok(()))
    }

    fn receive(&mut self) -> impl Future<Output = Option<ServerJsonRpcMessage>> {
        let inbox = Arc::clone(&self.inbox);
        async move { inbox.lock().await.recv().await }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
