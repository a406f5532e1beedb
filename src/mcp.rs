//! JSON-RPC 2.0 / MCP glue shared by the stdio and HTTP transports.

use crate::tools::ToolRegistry;
use deepsearch_common::ResearchError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const REQUEST_CANCELLED: i64 = -32800;

/// A JSON-RPC request id, transmitted as the bare JSON value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl RequestId {
    /// Key under which an in-flight request is tracked. Matches the
    /// serialization of `requestId` in a cancellation notification.
    fn key(&self) -> String {
        match self {
            RequestId::Number(n) => n.to_string(),
            RequestId::String(s) => Value::String(s.clone()).to_string(),
            RequestId::Null => "null".to_string(),
        }
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestId::Number(n) => serializer.serialize_i64(*n),
            RequestId::String(s) => serializer.serialize_str(s),
            RequestId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_i64()
                .map(RequestId::Number)
                .ok_or_else(|| serde::de::Error::custom("request id number must be an integer")),
            Value::String(s) => Ok(RequestId::String(s)),
            Value::Null => Ok(RequestId::Null),
            _ => Err(serde::de::Error::custom(
                "request id must be a number, string, or null",
            )),
        }
    }
}

/// A request (with `id`) or a notification (without).
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Failure of a routed method, before it becomes a response.
struct MethodError {
    code: i64,
    message: String,
}

impl MethodError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ResearchError> for MethodError {
    fn from(e: ResearchError) -> Self {
        let code = match e {
            ResearchError::InvalidConfiguration(_) => INVALID_PARAMS,
            ResearchError::RequestCancelled => REQUEST_CANCELLED,
            _ => INTERNAL_ERROR,
        };
        Self::new(code, e.to_string())
    }
}

/// Request id key to the serial of its latest tracking and its token.
type InFlightTable = Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>;

/// Tracked request that forgets itself, and cancels its token, when dropped.
pub struct InFlight {
    key: String,
    serial: u64,
    token: CancellationToken,
    table: InFlightTable,
}

impl InFlight {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.token.cancel();
        if let Ok(mut table) = self.table.lock() {
            // A reused id may have replaced this entry; leave the newer one alone.
            if table.get(&self.key).is_some_and(|(serial, _)| *serial == self.serial) {
                table.remove(&self.key);
            }
        }
    }
}

/// Routes MCP methods to the tool registry.
pub struct McpServer {
    tools: Arc<ToolRegistry>,
    in_flight: InFlightTable,
    next_serial: AtomicU64,
}

impl McpServer {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_serial: AtomicU64::new(0),
        }
    }

    /// Decode one raw message. A decoding failure is already the response to send.
    pub fn parse(&self, raw: &str) -> Result<IncomingMessage, JsonRpcResponse> {
        let message: IncomingMessage = serde_json::from_str(raw).map_err(|e| {
            JsonRpcResponse::error(
                RequestId::Null,
                PARSE_ERROR,
                format!("Invalid JSON-RPC message: {}", e),
            )
        })?;

        if message.jsonrpc != "2.0" {
            return Err(JsonRpcResponse::error(
                message.id.unwrap_or(RequestId::Null),
                INVALID_REQUEST,
                format!("Expected jsonrpc version 2.0, got: {}", message.jsonrpc),
            ));
        }
        Ok(message)
    }

    /// Start tracking a request so `notifications/cancelled` can reach it.
    /// The returned token is a child of `parent`.
    pub fn track(&self, id: &RequestId, parent: &CancellationToken) -> InFlight {
        let token = parent.child_token();
        let key = id.key();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut table) = self.in_flight.lock() {
            table.insert(key.clone(), (serial, token.clone()));
        }
        InFlight {
            key,
            serial,
            token,
            table: self.in_flight.clone(),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub async fn handle_notification(&self, message: IncomingMessage) {
        match message.method.as_str() {
            "notifications/initialized" => info!("MCP client initialized"),
            "notifications/cancelled" => {
                let key = message.params["requestId"].to_string();
                let token = self
                    .in_flight
                    .lock()
                    .ok()
                    .and_then(|table| table.get(&key).map(|(_, token)| token.clone()));
                match token {
                    Some(token) => {
                        info!(
                            "Cancelling request {} ({})",
                            key,
                            message.params["reason"].as_str().unwrap_or("no reason given")
                        );
                        token.cancel();
                    }
                    None => debug!("Cancellation for unknown or finished request {}", key),
                }
            }
            other => debug!("Ignoring notification {}", other),
        }
    }

    pub async fn handle_request(
        &self,
        id: RequestId,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> JsonRpcResponse {
        debug!("Processing request {}", method);
        match self.route(method, params, cancel).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                warn!("Request {} failed: {}", method, e.message);
                JsonRpcResponse::error(id, e.code, e.message)
            }
        }
    }

    async fn route(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, MethodError> {
        match method {
            "initialize" => {
                let client = params["clientInfo"]["name"].as_str().unwrap_or("unknown");
                info!("MCP client connecting: {}", client);
                Ok(json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": {
                        "name": "deepsearch",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .tools
                    .definitions()
                    .into_iter()
                    .map(|(name, description, schema)| {
                        json!({ "name": name, "description": description, "inputSchema": schema })
                    })
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let name = params["name"]
                    .as_str()
                    .ok_or_else(|| MethodError::new(INVALID_PARAMS, "tools/call requires a tool name"))?;
                let tool = self
                    .tools
                    .get(name)
                    .ok_or_else(|| MethodError::new(INVALID_PARAMS, format!("Unknown tool: {}", name)))?;
                let arguments = match &params["arguments"] {
                    Value::Null => json!({}),
                    args => args.clone(),
                };

                info!("Calling tool {}", name);
                let payload = tool.call(arguments, cancel).await?;
                let text = serde_json::to_string(&payload)
                    .map_err(|e| MethodError::new(INTERNAL_ERROR, e.to_string()))?;
                Ok(json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": false,
                }))
            }
            other => Err(MethodError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        }
    }
}

/// Serve newline-delimited JSON-RPC on stdin/stdout until EOF or shutdown.
///
/// Requests run concurrently so a cancellation notification can reach one
/// still in flight. Responses are written by a single task, one per line.
pub async fn run_stdio(server: Arc<McpServer>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if let Err(e) = write_line(&mut stdout, &line).await {
                error!("Failed to write response: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("MCP stdio server ready");

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("stdin closed, shutting down");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = match server.parse(&line) {
            Ok(message) => message,
            Err(response) => {
                send(&tx, &response);
                continue;
            }
        };

        match message.id.clone() {
            None => server.handle_notification(message).await,
            Some(id) => {
                let in_flight = server.track(&id, &shutdown);
                let server = server.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = server
                        .handle_request(id, &message.method, message.params, in_flight.token())
                        .await;
                    drop(in_flight);
                    send(&tx, &response);
                });
            }
        }
    }

    let pending = server.in_flight_count();
    if pending > 0 {
        warn!("Abandoning {} in-flight requests", pending);
    }
    shutdown.cancel();
    drop(tx);
    let _ = writer.await;
    Ok(())
}

fn send(tx: &mpsc::UnboundedSender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => error!("Failed to serialize response: {}", e),
    }
}

async fn write_line<W: AsyncWriteExt + Unpin>(out: &mut W, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::canned_registry;

    fn server() -> McpServer {
        McpServer::new(Arc::new(canned_registry()))
    }

    async fn request(server: &McpServer, raw: Value) -> JsonRpcResponse {
        let message = server.parse(&raw.to_string()).unwrap();
        let id = message.id.clone().unwrap();
        server
            .handle_request(id, &message.method, message.params, CancellationToken::new())
            .await
    }

    #[test]
    fn test_request_id_round_trip_and_keys() {
        let id: RequestId = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(id, RequestId::Number(7));
        assert_eq!(serde_json::to_value(&id).unwrap(), json!(7));
        assert_eq!(id.key(), json!(7).to_string());
        assert_eq!(RequestId::String("a".into()).key(), json!("a").to_string());
        assert!(serde_json::from_value::<RequestId>(json!(1.5)).is_err());
    }

    #[test]
    fn test_parse_errors() {
        let server = server();
        let err = server.parse("not json").unwrap_err();
        assert_eq!(err.error.unwrap().code, PARSE_ERROR);

        let err = server
            .parse(r#"{"jsonrpc":"1.0","id":3,"method":"ping"}"#)
            .unwrap_err();
        assert_eq!(err.id, RequestId::Number(3));
        assert_eq!(err.error.unwrap().code, INVALID_REQUEST);

        let note = server
            .parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert!(note.id.is_none());
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let server = server();
        let init = request(
            &server,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test-client"}
            }}),
        )
        .await;
        let result = init.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "deepsearch");

        let list = request(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
        let tools = list.result.unwrap()["tools"].clone();
        assert_eq!(tools[0]["name"], "deep_search");
        assert!(tools[0]["inputSchema"]["properties"]["effort"].is_object());
    }

    #[tokio::test]
    async fn test_tools_call_returns_text_payload() {
        let response = request(
            &server(),
            json!({"jsonrpc": "2.0", "id": "abc", "method": "tools/call", "params": {
                "name": "deep_search",
                "arguments": {"query": "What is X?", "effort": "low"}
            }}),
        )
        .await;
        assert_eq!(response.id, RequestId::String("abc".into()));
        let result = response.result.unwrap();
        let payload: Value =
            serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(payload["answer"], "Canned answer [1].");
        assert_eq!(payload["sources"][0]["label"], "[1]");
    }

    #[tokio::test]
    async fn test_error_codes() {
        let server = server();
        let invalid = request(
            &server,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {
                "name": "deep_search", "arguments": {"query": "q", "effort": "extreme"}
            }}),
        )
        .await;
        assert_eq!(invalid.error.unwrap().code, INVALID_PARAMS);

        let unknown_tool = request(
            &server,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "nope"}}),
        )
        .await;
        assert_eq!(unknown_tool.error.unwrap().code, INVALID_PARAMS);

        let unknown_method =
            request(&server, json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"})).await;
        assert_eq!(unknown_method.error.unwrap().code, METHOD_NOT_FOUND);

        let ping = request(&server, json!({"jsonrpc": "2.0", "id": 4, "method": "ping"})).await;
        assert_eq!(ping.result.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_cancelled_call_maps_to_cancel_code() {
        let server = server();
        let parent = CancellationToken::new();
        let in_flight = server.track(&RequestId::Number(9), &parent);
        assert_eq!(server.in_flight_count(), 1);

        let note = server
            .parse(r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":9,"reason":"user"}}"#)
            .unwrap();
        server.handle_notification(note).await;
        assert!(in_flight.token().is_cancelled());

        let response = server
            .handle_request(
                RequestId::Number(9),
                "tools/call",
                json!({"name": "deep_search", "arguments": {"query": "q"}}),
                in_flight.token(),
            )
            .await;
        assert_eq!(response.error.unwrap().code, REQUEST_CANCELLED);

        drop(in_flight);
        assert_eq!(server.in_flight_count(), 0);
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_reused_id_stays_cancellable() {
        let server = server();
        let parent = CancellationToken::new();
        let first = server.track(&RequestId::Number(5), &parent);
        let second = server.track(&RequestId::Number(5), &parent);

        drop(first);
        assert_eq!(server.in_flight_count(), 1);

        let note = server
            .parse(r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":5}}"#)
            .unwrap();
        server.handle_notification(note).await;
        assert!(second.token().is_cancelled());

        drop(second);
        assert_eq!(server.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let mut out = Vec::new();
        write_line(&mut out, "{}").await.unwrap();
        assert_eq!(out, b"{}\n");
    }
}
