//! MCP method handling on top of the dispatcher.

use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, warn};

use backplane_mcp_protocol::json_rpc::{
    JSONRPC_VERSION, JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use backplane_mcp_protocol::{CallToolResult, MCP_VERSION};

use crate::dispatcher::Dispatcher;

/// Identity reported by `initialize`
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub struct McpHandler {
    dispatcher: Arc<Dispatcher>,
    info: ServerInfo,
}

impl McpHandler {
    pub fn new(dispatcher: Arc<Dispatcher>, info: ServerInfo) -> Self {
        Self { dispatcher, info }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Handle one request. Notifications never produce a response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            self.handle_notification(&request);
            return None;
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                Some(id),
                JsonRpcErrorObject::invalid_request(Some(json!({
                    "reason": format!("unsupported jsonrpc version '{}'", request.jsonrpc)
                }))),
            ));
        }

        debug!(method = %request.method, id = %id, "Handling request");
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize_result()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                json!({ "tools": self.dispatcher.catalogue().tools() }),
            ),
            "tools/call" => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::error(Some(id), JsonRpcErrorObject::method_not_found(other)),
        };
        Some(response)
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => debug!("Client initialized"),
            "notifications/cancelled" => debug!("Client cancelled a request"),
            other => debug!(method = %other, "Ignoring notification"),
        }
    }

    fn initialize_result(&self) -> Value {
        let mut result = json!({
            "protocolVersion": MCP_VERSION,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": self.info.name,
                "version": self.info.version,
            },
        });
        if let (Some(instructions), Value::Object(map)) = (&self.info.instructions, &mut result) {
            map.insert("instructions".to_string(), json!(instructions));
        }
        result
    }

    async fn call_tool(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => {
                return JsonRpcResponse::error(
                    Some(id),
                    JsonRpcErrorObject::invalid_params("Missing params for tools/call", None),
                );
            }
            Err(e) => {
                return JsonRpcResponse::error(
                    Some(id),
                    JsonRpcErrorObject::invalid_params(
                        &format!("Invalid params for tools/call: {}", e),
                        None,
                    ),
                );
            }
        };

        let result = match self.dispatcher.invoke(&params.name, params.arguments).await {
            Ok(value) => CallToolResult::structured(value),
            Err(failure) if failure.source.is_request_error() => {
                return JsonRpcResponse::error(Some(id), failure.to_error_object());
            }
            Err(failure) => CallToolResult::error(failure.to_string(), failure.to_payload()),
        };

        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                error!(tool = %params.name, "Failed to serialize tool result: {}", e);
                JsonRpcResponse::error(
                    Some(id),
                    JsonRpcErrorObject::internal_error(Some(e.to_string()), None),
                )
            }
        }
    }

    /// Handle one line of newline-delimited JSON-RPC and render the response line.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let response = match serde_json::from_str::<Value>(line) {
            Err(e) => {
                warn!("Unparseable message: {}", e);
                Some(JsonRpcResponse::error(
                    None,
                    JsonRpcErrorObject::parse_error(Some(json!({ "reason": e.to_string() }))),
                ))
            }
            Ok(value) => {
                let id = value
                    .get("id")
                    .cloned()
                    .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
                match serde_json::from_value::<JsonRpcRequest>(value) {
                    Ok(request) => self.handle(request).await,
                    Err(e) => Some(JsonRpcResponse::error(
                        id,
                        JsonRpcErrorObject::invalid_request(Some(json!({
                            "reason": e.to_string()
                        }))),
                    )),
                }
            }
        }?;

        match serde_json::to_string(&response) {
            Ok(line) => Some(line),
            Err(e) => {
                error!("Failed to serialize response: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backplane_mcp_protocol::ProviderType;
    use backplane_mcp_session::testing::MockProvider;
    use backplane_mcp_session::{Provider, SessionRegistries};

    use crate::catalogue::CommandCatalogue;

    fn handler() -> McpHandler {
        let registries = Arc::new(SessionRegistries::new(vec![
            Arc::new(MockProvider::new(ProviderType::Mysql)) as Arc<dyn Provider>,
        ]));
        let catalogue = CommandCatalogue::for_registries(&registries).unwrap();
        McpHandler::new(
            Arc::new(Dispatcher::new(catalogue, registries)),
            ServerInfo {
                name: "test-backplane".to_string(),
                version: "0.0.1".to_string(),
                instructions: Some("Connect first".to_string()),
            },
        )
    }

    async fn call(handler: &McpHandler, message: Value) -> Value {
        let line = handler.handle_line(&message.to_string()).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_initialize() {
        let handler = handler();
        let response = call(
            &handler,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
                "protocolVersion": MCP_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1"}
            }}),
        )
        .await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], MCP_VERSION);
        assert_eq!(response["result"]["serverInfo"]["name"], "test-backplane");
        assert_eq!(response["result"]["instructions"], "Connect first");
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let handler = handler();
        let line = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
        assert!(handler.handle_line(&line).await.is_none());
    }

    #[tokio::test]
    async fn test_ping_and_unknown_method() {
        let handler = handler();
        let pong = call(&handler, json!({"jsonrpc": "2.0", "id": "p", "method": "ping"})).await;
        assert_eq!(pong["result"], json!({}));

        let missing =
            call(&handler, json!({"jsonrpc": "2.0", "id": 2, "method": "resources/list"})).await;
        assert_eq!(missing["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_parse_and_shape_errors() {
        let handler = handler();
        let line = handler.handle_line("{not json").await.unwrap();
        let response: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(response["id"], Value::Null);

        let response = call(&handler, json!({"jsonrpc": "2.0", "id": 9})).await;
        assert_eq!(response["error"]["code"], -32600);
        assert_eq!(response["id"], 9);

        let response =
            call(&handler, json!({"jsonrpc": "1.0", "id": 3, "method": "ping"})).await;
        assert_eq!(response["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let handler = handler();
        let response =
            call(&handler, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == "connect_mysql"));
        assert!(tools.iter().any(|t| t["name"] == "exec"));
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
    }

    #[tokio::test]
    async fn test_tools_call_success_and_failure() {
        let handler = handler();
        let response = call(
            &handler,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                   "params": {"name": "connect_mysql", "arguments": {"name": "a"}}}),
        )
        .await;
        assert_eq!(response["result"]["isError"], false);
        assert_eq!(response["result"]["structuredContent"]["session"]["id"], "a");

        // Backend failure: a tool result flagged as error
        let response = call(
            &handler,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
                   "params": {"name": "exec", "arguments": {"command": "fail"}}}),
        )
        .await;
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(response["result"]["structuredContent"]["kind"], "exec_error");
        assert_eq!(response["result"]["structuredContent"]["session_id"], "a");
    }

    #[tokio::test]
    async fn test_tools_call_request_errors() {
        let handler = handler();
        let response = call(
            &handler,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                   "params": {"name": "nope", "arguments": {}}}),
        )
        .await;
        assert_eq!(response["error"]["code"], -32001);
        assert_eq!(response["error"]["data"]["kind"], "unknown_command");

        let response = call(
            &handler,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call",
                   "params": {"name": "exec", "arguments": {}}}),
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);
        assert_eq!(response["error"]["data"]["kind"], "invalid_argument");

        let response =
            call(&handler, json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call"})).await;
        assert_eq!(response["error"]["code"], -32602);
    }
}
