//! Line-delimited MCP server used by the integration tests.
//!
//! Behaviour is selected through environment variables:
//! `PROBE_TEST_TOOLS` (`none`, `malformed`, `duplicate`), `PROBE_TEST_NO_INIT`,
//! `PROBE_TEST_PID_FILE`, `PROBE_TEST_STDERR` and `PROBE_TEST_SLOW_MS`.
//! The `echo` tool fails when its text contains `fail`, answers with a
//! JSON-RPC error for `crash` and replies late for `slow`.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rmcp::model::{
    CallToolResult, ClientJsonRpcMessage, ClientRequest, Content, ErrorCode, ErrorData,
    InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcResponse, JsonRpcVersion2_0,
    ListToolsResult, RequestId, ServerCapabilities, ServerJsonRpcMessage,
    ServerResult, Tool,
};
use serde_json::{json, Value};

type SharedOut = Arc<Mutex<io::Stdout>>;

#[derive(Clone, Copy, PartialEq)]
enum Catalog {
    Echo,
    Empty,
    Malformed,
    Duplicate,
}

struct Behaviour {
    catalog: Catalog,
    answer_initialize: bool,
    slow: Duration,
}

impl Behaviour {
    fn from_env() -> Self {
        let catalog = match std::env::var("PROBE_TEST_TOOLS").as_deref() {
            Ok("none") => Catalog::Empty,
            Ok("malformed") => Catalog::Malformed,
            Ok("duplicate") => Catalog::Duplicate,
            _ => Catalog::Echo,
        };
        let slow = std::env::var("PROBE_TEST_SLOW_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .map_or(Duration::from_secs(5), Duration::from_millis);
        Self {
            catalog,
            answer_initialize: std::env::var_os("PROBE_TEST_NO_INIT").is_none(),
            slow,
        }
    }
}

fn main() {
    if let Some(path) = std::env::var_os("PROBE_TEST_PID_FILE") {
        let _ = std::fs::write(path, std::process::id().to_string());
    }
    if let Ok(line) = std::env::var("PROBE_TEST_STDERR") {
        eprintln!("{line}");
    }

    let behaviour = Behaviour::from_env();
    let stdout: SharedOut = Arc::new(Mutex::new(io::stdout()));
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ClientJsonRpcMessage>(&line) {
            Ok(message) => handle_message(&behaviour, &stdout, message),
            Err(_) => reject_unknown(&stdout, &line),
        }
    }
}

fn handle_message(behaviour: &Behaviour, stdout: &SharedOut, message: ClientJsonRpcMessage) {
    let JsonRpcMessage::Request(request) = message else {
        return;
    };
    let id = request.id.clone();
    match &request.request {
        ClientRequest::InitializeRequest(_) => {
            if behaviour.answer_initialize {
                send(stdout, &respond(id, ServerResult::InitializeResult(server_info())));
            }
        }
        ClientRequest::ListToolsRequest(_) => list_tools(behaviour.catalog, stdout, id),
        ClientRequest::CallToolRequest(call) => {
            let text = call
                .params
                .arguments
                .as_ref()
                .and_then(|arguments| arguments.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            call_echo(behaviour, stdout, id, &call.params.name, text);
        }
        _ => send(
            stdout,
            &fail(id, ErrorCode::METHOD_NOT_FOUND, "method not supported"),
        ),
    }
}

fn list_tools(catalog: Catalog, stdout: &SharedOut, id: RequestId) {
    let tools = match catalog {
        Catalog::Echo => vec![echo_tool()],
        Catalog::Empty => Vec::new(),
        Catalog::Duplicate => vec![echo_tool(), echo_tool()],
        Catalog::Malformed => {
            let raw = json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"tools": [{"name": 42, "inputSchema": "not a schema"}]}
            });
            write_line(stdout, &raw.to_string());
            return;
        }
    };
    let result = ServerResult::ListToolsResult(ListToolsResult {
        tools,
        next_cursor: None,
        meta: None,
    });
    send(stdout, &respond(id, result));
}

fn call_echo(behaviour: &Behaviour, stdout: &SharedOut, id: RequestId, tool: &str, text: String) {
    if tool != "echo" {
        send(
            stdout,
            &fail(id, ErrorCode::INVALID_PARAMS, &format!("unknown tool: {tool}")),
        );
        return;
    }
    if text.contains("crash") {
        send(stdout, &fail(id, ErrorCode::INTERNAL_ERROR, "echo crashed"));
        return;
    }
    let result = if text.contains("fail") {
        CallToolResult::error(vec![Content::text("requested failure")])
    } else {
        CallToolResult::structured(json!({ "echoed": text }))
    };
    let message = respond(id, ServerResult::CallToolResult(result));
    if text.contains("slow") {
        let stdout = Arc::clone(stdout);
        let delay = behaviour.slow;
        thread::spawn(move || {
            thread::sleep(delay);
            send(&stdout, &message);
        });
    } else {
        send(stdout, &message);
    }
}

fn echo_tool() -> Tool {
    Tool {
        name: "echo".into(),
        title: None,
        description: Some("Echo the text argument back".into()),
        input_schema: Arc::new(object(json!({
            "type": "object",
            "properties": {"text": {"type": "string", "minLength": 1}},
            "required": ["text"]
        }))),
        output_schema: Some(Arc::new(object(json!({
            "type": "object",
            "properties": {"echoed": {"type": "string"}},
            "required": ["echoed"]
        })))),
        annotations: None,
        icons: None,
        meta: None,
    }
}

fn object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

fn server_info() -> InitializeResult {
    let mut info = InitializeResult {
        capabilities: ServerCapabilities::builder().enable_tools().build(),
        ..InitializeResult::default()
    };
    info.server_info.name = "stdio-test-server".to_string();
    info
}

fn respond(id: RequestId, result: ServerResult) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id,
        result,
    })
}

fn fail(id: RequestId, code: ErrorCode, message: &str) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Error(JsonRpcError {
        jsonrpc: JsonRpcVersion2_0,
        id,
        error: ErrorData::new(code, message.to_string(), None),
    })
}

/// Answers requests whose method the model types do not recognise.
fn reject_unknown(stdout: &SharedOut, line: &str) {
    let Ok(raw) = serde_json::from_str::<Value>(line) else {
        return;
    };
    let id = raw
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
    if let Some(id) = id {
        send(
            stdout,
            &fail(id, ErrorCode::METHOD_NOT_FOUND, "method not found"),
        );
    }
}

fn send(stdout: &SharedOut, message: &ServerJsonRpcMessage) {
    if let Ok(payload) = serde_json::to_string(message) {
        write_line(stdout, &payload);
    }
}

fn write_line(stdout: &SharedOut, payload: &str) {
    let Ok(mut out) = stdout.lock() else {
        return;
    };
    let _ = writeln!(out, "{payload}");
    let _ = out.flush();
}
