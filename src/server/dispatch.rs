//! JSON-RPC dispatch: one line in, one line out.
//!
//! `tools/call` follows a fixed contract: look up the tool, validate the
//! arguments against its input schema, invoke the handler, relay internal
//! errors, validate the result against the output schema, and wrap the
//! result as MCP text content. Notifications are never answered; malformed
//! lines produce a `-32700` response and the loop continues.

use serde_json::{json, Value};
use std::io::{BufRead, Write};

use crate::error::Error;
use crate::server::federation::ExternalToolRegistry;
use crate::server::handler::ToolHandler;
use crate::server::rpc::{JsonRpcRequest, JsonRpcResponse};
use crate::server::schema::validate;
use crate::server::tools::{tool_definitions, ToolDef};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "membria-mcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The tool server: fixed catalogue, typed handlers, optional federation.
pub struct MembriaServer {
    handler: ToolHandler,
    tools: Vec<ToolDef>,
    federation: Option<ExternalToolRegistry>,
}

impl MembriaServer {
    pub fn new(handler: ToolHandler, federation: Option<ExternalToolRegistry>) -> Self {
        let tools = tool_definitions(handler.config.memory_tools_enabled);
        Self {
            handler,
            tools,
            federation,
        }
    }

    /// Handle one request. Returns `None` for notifications.
    pub fn handle_request(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => {
                let mut tools: Vec<Value> = self
                    .tools
                    .iter()
                    .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
                    .collect();
                if let Some(federation) = &self.federation {
                    tools.extend(federation.list_tools());
                }
                JsonRpcResponse::success(id, json!({"tools": tools}))
            }
            "resources/list" => JsonRpcResponse::success(id, json!({"resources": []})),
            "prompts/list" => JsonRpcResponse::success(id, json!({"prompts": []})),
            "tools/call" => self.handle_tool_call(id, request.params.clone()),
            other => JsonRpcResponse::failure(id, -32601, format!("Unknown method: {}", other)),
        };
        Some(response)
    }

    fn handle_tool_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params = params.unwrap_or(Value::Null);
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::failure(id, -32602, "Invalid params: name required");
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        // Federated tools carry no local schemas; the remote end validates.
        if name.starts_with("ext.") {
            let Some(federation) = &self.federation else {
                return JsonRpcResponse::failure(id, -32601, format!("Unknown tool: {}", name));
            };
            return match federation.call_tool(name, &arguments) {
                Ok(result) => wrap_result(id, &result),
                Err(e) => JsonRpcResponse::failure(id, e.json_rpc_code(), e.to_string()),
            };
        }

        let Some(tool) = self.tools.iter().find(|t| t.name == name) else {
            return JsonRpcResponse::failure(id, -32601, format!("Unknown tool: {}", name));
        };

        if let Err(message) = validate(&tool.input_schema, &arguments) {
            return JsonRpcResponse::failure(id, -32602, format!("Invalid params: {}", message));
        }

        let result = match self.invoke(name, arguments) {
            Ok(result) => result,
            Err(e) => return JsonRpcResponse::failure(id, e.json_rpc_code(), e.to_string()),
        };

        if let Err(message) = validate(&tool.output_schema, &result) {
            tracing::error!(target: "membria::server", tool = name, message, "result schema mismatch");
            return JsonRpcResponse::failure(
                id,
                -32603,
                format!("Invalid result schema: {}", message),
            );
        }

        wrap_result(id, &result)
    }

    /// The static dispatch table from tool name to typed handler.
    fn invoke(&self, name: &str, args: Value) -> crate::error::Result<Value> {
        let h = &self.handler;
        match name {
            "membria.capture_decision" => h.capture_decision(args),
            "membria.record_outcome" => h.record_outcome(args),
            "membria.get_calibration" => h.get_calibration(args),
            "membria.get_decision_context" => h.get_decision_context(args),
            "membria.get_plan_context" => h.get_plan_context(args),
            "membria.validate_plan" => h.validate_plan(args),
            "membria.record_plan" => h.record_plan(args),
            "membria.session_context_store" => h.session_context_store(args),
            "membria.session_context_retrieve" => h.session_context_retrieve(args),
            "membria.session_context_delete" => h.session_context_delete(args),
            "membria.docs_add" => h.docs_add(args),
            "membria.docs_get" => h.docs_get(args),
            "membria.docs_list" => h.docs_list(args),
            "membria.fetch_docs" => h.fetch_docs(args),
            "membria.docshot_link" => h.docshot_link(args),
            "membria.md_xtract" => h.md_xtract(args),
            "membria.squad_create" => h.squad_create(args),
            "membria.assignment_add" => h.assignment_add(args),
            "membria.squad_list" => h.squad_list(args),
            "membria.squad_assignments" => h.squad_assignments(args),
            "membria.role_upsert" => h.role_upsert(args),
            "membria.role_get" => h.role_get(args),
            "membria.role_link" => h.role_link(args),
            "membria.role_unlink" => h.role_unlink(args),
            "membria.outcome_get" => h.outcome_get(args),
            "membria.outcome_list" => h.outcome_list(args),
            "membria.skills_list" => h.skills_list(args),
            "membria.skills_get" => h.skills_get(args),
            "membria.antipatterns_list" => h.antipatterns_list(args),
            "membria.antipatterns_get" => h.antipatterns_get(args),
            "membria.health" => h.health(args),
            "membria.migrations_status" => h.migrations_status(args),
            "membria.logs_tail" => h.logs_tail(args),
            "membria.memory_store" => h.memory_store(args),
            "membria.memory_retrieve" => h.memory_retrieve(args),
            "membria.memory_delete" => h.memory_delete(args),
            "membria.memory_list" => h.memory_list(args),
            other => Err(Error::UnknownTool(other.to_string())),
        }
    }

    /// Run the line-delimited loop until EOF. Never panics on bad input.
    pub fn run<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> std::io::Result<()> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => self.handle_request(&request),
                Err(_) => Some(JsonRpcResponse::parse_error()),
            };
            if let Some(response) = response {
                writeln!(writer, "{}", response.to_line())?;
                writer.flush()?;
            }
        }
        Ok(())
    }
}

fn wrap_result(id: Value, result: &Value) -> JsonRpcResponse {
    let text = serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
    JsonRpcResponse::success(id, json!({"content": [{"type": "text", "text": text}]}))
}
