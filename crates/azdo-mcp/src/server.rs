//! MCP server implementation.
//!
//! The server handles the MCP protocol lifecycle:
//! 1. Initialize - exchange capabilities
//! 2. Handle tool calls - dispatch to the Azure DevOps tool handler
//! 3. Shutdown - stop on EOF
//!
//! The background test watcher hooks in at two points: status changes are
//! forwarded as `notifications/message`, and failing status text is appended
//! to tool results.

use std::sync::Arc;

use azdo_client::AzureClient;
use azdo_watch::{StatusSink, WatchContext};
use serde::Serialize;
use serde_json::Value;

use crate::handlers::ToolHandler;
use crate::protocol::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, ServerCapabilities, ServerInfo, ToolCallParams, ToolsCapability,
    ToolsListResult, MCP_VERSION,
};
use crate::transport::{IncomingMessage, StdioTransport, TransportWriter};

/// Server name advertised during initialization.
const SERVER_NAME: &str = "azdo-tools";

/// MCP server for azdo-tools.
pub struct McpServer {
    handler: ToolHandler,
    watch: WatchContext,
    initialized: bool,
}

/// Forwards test watcher status changes to the client as MCP log messages.
struct NotificationSink {
    writer: TransportWriter,
}

impl StatusSink for NotificationSink {
    fn notify(&self, status_id: &str, text: &str) {
        tracing::info!(status = %status_id, "forwarding test watcher status");
        let notification = JsonRpcNotification::new(
            "notifications/message",
            Some(serde_json::json!({
                "level": "info",
                "logger": "test-watch",
                "data": text,
            })),
        );
        if let Err(e) = self.writer.send_notification(&notification) {
            tracing::warn!("Failed to send watcher notification: {}", e);
        }
    }
}

/// Serialize a result payload, degrading to an internal error response.
fn respond(id: RequestId, result: impl Serialize) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, JsonRpcError::internal_error(&e.to_string())),
    }
}

impl McpServer {
    /// Create a new MCP server over the given client and watcher.
    pub fn new(client: Arc<AzureClient>, watch: WatchContext) -> Self {
        Self {
            handler: ToolHandler::new(client, watch.clone()),
            watch,
            initialized: false,
        }
    }

    /// Run the MCP server main loop over stdio.
    pub async fn run(&mut self) -> azdo_core::Result<()> {
        let mut transport = StdioTransport::stdio();
        let writer = transport.writer();

        self.watch
            .set_sink(Arc::new(NotificationSink {
                writer: writer.clone(),
            }))
            .await;

        tracing::info!(
            "Starting MCP server with {} tools",
            self.handler.available_tools().len()
        );

        loop {
            match transport.read_message() {
                Ok(Some(msg)) => {
                    let response = self.handle_message(msg).await;
                    if let Some(resp) = response {
                        if let Err(e) = writer.send_response(&resp) {
                            tracing::error!("Failed to write response: {}", e);
                            break;
                        }
                    }
                }
                Ok(None) => {
                    tracing::info!("EOF received, shutting down");
                    break;
                }
                Err(e) => {
                    tracing::error!("Transport error: {}", e);
                    // Try to send error response
                    let error_resp = JsonRpcResponse::error(
                        RequestId::Null,
                        JsonRpcError::parse_error(&e.to_string()),
                    );
                    let _ = writer.send_response(&error_resp);
                }
            }
        }

        tracing::info!("MCP server stopped");
        Ok(())
    }

    /// Handle an incoming message.
    async fn handle_message(&mut self, msg: IncomingMessage) -> Option<JsonRpcResponse> {
        match msg {
            IncomingMessage::Request(req) => Some(self.handle_request(req).await),
            IncomingMessage::Notification(notif) => {
                self.handle_notification(&notif.method);
                None // Notifications don't get responses
            }
        }
    }

    /// Handle a JSON-RPC request.
    async fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!("Handling request: {} (id: {:?})", req.method, req.id);

        match req.method.as_str() {
            "initialize" => self.handle_initialize(req.id, req.params),
            "tools/list" => self.handle_tools_list(req.id),
            "tools/call" => self.handle_tools_call(req.id, req.params).await,
            "ping" => self.handle_ping(req.id),
            method => {
                tracing::warn!("Unknown method: {}", method);
                JsonRpcResponse::error(req.id, JsonRpcError::method_not_found(method))
            }
        }
    }

    /// Handle notifications (no response).
    fn handle_notification(&mut self, method: &str) {
        match method {
            "initialized" | "notifications/initialized" => {
                tracing::info!("Client initialized");
            }
            "notifications/cancelled" => {
                tracing::debug!("Request cancelled by client");
            }
            _ => {
                tracing::debug!("Ignoring notification: {}", method);
            }
        }
    }

    /// Handle initialize request.
    fn handle_initialize(&mut self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        if self.initialized {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("Server already initialized"),
            );
        }

        // Parse params (optional validation)
        if let Some(params) = params {
            match serde_json::from_value::<InitializeParams>(params) {
                Ok(init_params) => {
                    tracing::info!(
                        "Client: {} v{} (protocol: {})",
                        init_params.client_info.name,
                        init_params.client_info.version,
                        init_params.protocol_version
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to parse initialize params: {}", e);
                }
            }
        }

        self.initialized = true;

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        respond(id, result)
    }

    /// Handle tools/list request.
    fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.handler.available_tools(),
        };
        respond(id, result)
    }

    /// Handle tools/call request.
    async fn handle_tools_call(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params(&e.to_string()),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing params"));
            }
        };

        tracing::info!("Calling tool: {}", params.name);

        let mut result = self.handler.execute(&params.name, params.arguments).await;
        if let Some(text) = self.watch.tool_result_append().await {
            result.append_text(text);
        }

        respond(id, result)
    }

    /// Handle ping request.
    fn handle_ping(&self, id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse::success(id, serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ToolCallResult, ToolResultContent, JSONRPC_VERSION};
    use azdo_watch::WatchConfig;
    use std::io::Cursor;

    const FAILING_CHUNK: &str = "FAIL src/app.test.ts\n\
        Test Suites: 1 failed, 1 total\n\
        Tests:       1 failed, 1 total\n";

    fn test_server() -> (McpServer, WatchContext) {
        let client =
            Arc::new(AzureClient::new("https://dev.azure.com/acme", "test-pat").unwrap());
        // Enabled but never started: no subprocess is spawned.
        let watch = WatchContext::new(WatchConfig::default());
        (McpServer::new(client, watch.clone()), watch)
    }

    fn call_request(name: &str, arguments: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(1),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({
                "name": name,
                "arguments": arguments,
            })),
        }
    }

    fn result_texts(resp: JsonRpcResponse) -> Vec<String> {
        let result: ToolCallResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        result
            .content
            .into_iter()
            .map(|ToolResultContent::Text { text }| text)
            .collect()
    }

    #[test]
    fn test_server_creation() {
        let (server, _watch) = test_server();
        assert!(!server.initialized);
    }

    #[tokio::test]
    async fn test_initialize_response() {
        let (mut server, _watch) = test_server();

        let req = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(1),
            method: "initialize".to_string(),
            params: Some(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "test-client",
                    "version": "1.0.0"
                }
            })),
        };

        let resp = server.handle_request(req).await;

        assert!(resp.error.is_none());
        assert!(server.initialized);

        let result: InitializeResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.protocol_version, MCP_VERSION);
        assert_eq!(result.server_info.name, "azdo-tools");
        assert!(result.capabilities.tools.is_some());
    }

    #[test]
    fn test_tools_list() {
        let (server, _watch) = test_server();

        let resp = server.handle_tools_list(RequestId::Number(1));

        assert!(resp.result.is_some());
        let result: ToolsListResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(!result.tools.is_empty());
        assert!(result.tools.iter().any(|t| t.name == "get_me"));
        assert!(result.tools.iter().any(|t| t.name == "create_pull_request"));
        assert!(result.tools.iter().any(|t| t.name == "test_watch_status"));
    }

    #[test]
    fn test_ping() {
        let (server, _watch) = test_server();
        let resp = server.handle_ping(RequestId::String("ping-1".to_string()));

        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_double_initialize_error() {
        let (mut server, _watch) = test_server();
        server.initialized = true;

        let resp = server.handle_initialize(RequestId::Number(1), None);

        assert!(resp.error.is_some());
        assert!(resp.result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (mut server, _watch) = test_server();

        let req = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(1),
            method: "unknown/method".to_string(),
            params: None,
        };

        let resp = server.handle_request(req).await;

        assert!(resp.error.is_some());
        assert_eq!(resp.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_handle_notification_initialized() {
        let (mut server, _watch) = test_server();
        // Should not panic
        server.handle_notification("initialized");
        server.handle_notification("notifications/initialized");
    }

    #[test]
    fn test_handle_notification_cancelled() {
        let (mut server, _watch) = test_server();
        // Should not panic
        server.handle_notification("notifications/cancelled");
    }

    #[test]
    fn test_handle_notification_unknown() {
        let (mut server, _watch) = test_server();
        // Should not panic
        server.handle_notification("some/unknown/notification");
    }

    #[tokio::test]
    async fn test_handle_message_notification() {
        let (mut server, _watch) = test_server();

        let msg = IncomingMessage::Notification(JsonRpcNotification::new("initialized", None));

        let response = server.handle_message(msg).await;
        // Notifications should return None
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_handle_message_request() {
        let (mut server, _watch) = test_server();

        let msg = IncomingMessage::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(1),
            method: "ping".to_string(),
            params: None,
        });

        let response = server.handle_message(msg).await;
        // Requests should return Some
        assert!(response.is_some());
        let resp = response.unwrap();
        assert!(resp.result.is_some());
    }

    #[tokio::test]
    async fn test_handle_tools_call() {
        let (mut server, _watch) = test_server();

        let resp = server
            .handle_request(call_request("test_watch_status", serde_json::json!({})))
            .await;

        assert!(resp.result.is_some());
        let texts = result_texts(resp);
        let snapshot: Value = serde_json::from_str(&texts[0]).unwrap();
        assert_eq!(snapshot["enabled"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_handle_tools_call_unknown_tool() {
        let (mut server, _watch) = test_server();

        let resp = server
            .handle_request(call_request("no_such_tool", serde_json::json!({})))
            .await;

        // Unknown tools surface as isError results, not protocol errors.
        assert!(resp.error.is_none());
        let result: ToolCallResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_handle_tools_call_missing_params() {
        let (mut server, _watch) = test_server();

        let req = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(1),
            method: "tools/call".to_string(),
            params: None,
        };

        let resp = server.handle_request(req).await;
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn test_handle_tools_call_invalid_params() {
        let (mut server, _watch) = test_server();

        let req = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(1),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!("not an object")),
        };

        let resp = server.handle_request(req).await;
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn test_tools_call_appends_failing_watch_status_once() {
        let (mut server, watch) = test_server();
        watch.ingest_chunk(FAILING_CHUNK).await;

        let resp = server
            .handle_request(call_request("test_watch_status", serde_json::json!({})))
            .await;
        let texts = result_texts(resp);
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("Background tests failing"));

        // Changed mode: the same status id is not re-appended.
        let resp = server
            .handle_request(call_request("test_watch_status", serde_json::json!({})))
            .await;
        assert_eq!(result_texts(resp).len(), 1);
    }

    #[test]
    fn test_initialize_without_params() {
        let (mut server, _watch) = test_server();

        let resp = server.handle_initialize(RequestId::Number(1), None);

        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
        assert!(server.initialized);
    }

    #[test]
    fn test_initialize_with_invalid_params() {
        let (mut server, _watch) = test_server();

        // Invalid params should still succeed (just log a warning)
        let resp = server.handle_initialize(
            RequestId::Number(1),
            Some(serde_json::json!({"invalid": true})),
        );

        assert!(resp.result.is_some());
        assert!(server.initialized);
    }

    #[test]
    fn test_notification_sink_writes_log_message() {
        use std::sync::Mutex;

        struct SharedWriter(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for SharedWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let transport = StdioTransport::new(
            Box::new(Cursor::new(Vec::new())),
            Box::new(SharedWriter(buffer.clone())),
        );

        let sink = NotificationSink {
            writer: transport.writer(),
        };
        sink.notify("fail:abc", "FAIL src/app.test.ts");

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(output.contains("\"method\":\"notifications/message\""));
        assert!(output.contains("test-watch"));
        assert!(output.contains("FAIL src/app.test.ts"));
    }
}
