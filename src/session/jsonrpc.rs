//! JSON-RPC 2.0 envelopes exchanged over the session endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of the session-opening request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Standard and transport-level error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Transport-level rejection (bad or unknown session).
    pub const SERVER_ERROR: i64 = -32000;
}

/// A request, or a notification when `id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a notification (no id, no reply expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// Any message a client may POST.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    /// A client's reply to a server-initiated request.
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// A well-formed `initialize` request: has an id and the required params.
    pub fn is_initialize(&self) -> bool {
        let JsonRpcMessage::Request(request) = self else {
            return false;
        };
        if request.method != INITIALIZE_METHOD || request.id.is_none() {
            return false;
        }
        let Some(params) = request.params.as_ref().and_then(Value::as_object) else {
            return false;
        };
        params.get("protocolVersion").is_some_and(Value::is_string)
            && params.get("capabilities").is_some_and(Value::is_object)
            && params.get("clientInfo").is_some_and(Value::is_object)
    }

    /// True when the handler is expected to produce a reply.
    pub fn expects_reply(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(request) if !request.is_notification())
    }
}

/// Parse a POST body: a single message or a non-empty batch.
pub fn parse_messages(body: &[u8]) -> Result<Vec<JsonRpcMessage>, JsonRpcError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| JsonRpcError::new(codes::PARSE_ERROR, format!("Parse error: {}", e)))?;

    match value {
        Value::Array(items) if items.is_empty() => Err(JsonRpcError::new(
            codes::INVALID_REQUEST,
            "Invalid Request: empty batch",
        )),
        Value::Array(items) => items.into_iter().map(parse_message).collect(),
        single => parse_message(single).map(|message| vec![message]),
    }
}

fn parse_message(value: Value) -> Result<JsonRpcMessage, JsonRpcError> {
    let invalid = |reason: &str| JsonRpcError::new(codes::INVALID_REQUEST, format!("Invalid Request: {}", reason));

    let object = value.as_object().ok_or_else(|| invalid("message must be an object"))?;
    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(invalid("jsonrpc must be \"2.0\""));
    }

    if object.contains_key("method") {
        serde_json::from_value(value)
            .map(JsonRpcMessage::Request)
            .map_err(|e| invalid(&e.to_string()))
    } else if object.contains_key("result") || object.contains_key("error") {
        serde_json::from_value(value)
            .map(JsonRpcMessage::Response)
            .map_err(|e| invalid(&e.to_string()))
    } else {
        Err(invalid("neither a request nor a response"))
    }
}
