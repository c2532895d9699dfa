//! Built-in protocol handler shipped with the binary.
//!
//! Answers the session handshake and `ping`; everything else is
//! `Method not found`. Real deployments plug their own `HandlerFactory`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::session::jsonrpc::{codes, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use crate::session::transport::{HandlerFactory, SessionHandler, SessionTransport};

const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";
const LOG_NOTIFICATION: &str = "notifications/message";

pub struct MinimalHandler {
    transport: SessionTransport,
    server_name: String,
}

impl MinimalHandler {
    pub fn new(transport: SessionTransport, server_name: impl Into<String>) -> Self {
        Self {
            transport,
            server_name: server_name.into(),
        }
    }

    fn initialize(&self, id: Value, params: Option<&Value>) -> JsonRpcResponse {
        let version = params
            .and_then(|p| p.get("protocolVersion"))
            .cloned()
            .unwrap_or(Value::Null);
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": version,
                "capabilities": { "logging": {} },
                "serverInfo": {
                    "name": self.server_name,
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
    }
}

#[async_trait]
impl SessionHandler for MinimalHandler {
    async fn handle(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        let request = match message {
            JsonRpcMessage::Request(request) => request,
            JsonRpcMessage::Response(_) => return None,
        };

        let Some(id) = request.id.clone() else {
            if request.method == INITIALIZED_NOTIFICATION {
                self.transport.notify(JsonRpcRequest::notification(
                    LOG_NOTIFICATION,
                    Some(json!({ "level": "info", "data": "session ready" })),
                ));
            }
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => self.initialize(id, request.params.as_ref()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            other => JsonRpcResponse::failure(
                id,
                JsonRpcError::new(codes::METHOD_NOT_FOUND, format!("Method not found: {}", other)),
            ),
        };
        Some(response)
    }

    async fn shutdown(&self) {
        tracing::debug!(session_id = %self.transport.session_id(), "Minimal handler shut down");
    }
}

/// Factory producing one `MinimalHandler` per session.
pub fn factory(server_name: impl Into<String>) -> Arc<dyn HandlerFactory> {
    let server_name: String = server_name.into();
    Arc::new(move |transport: SessionTransport| -> Arc<dyn SessionHandler> {
        Arc::new(MinimalHandler::new(transport, server_name.clone()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transport::SessionId;
    use tokio::sync::mpsc;

    fn request(id: Option<i64>, method: &str, params: Option<Value>) -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: id.map(|id| json!(id)),
        })
    }

    #[tokio::test]
    async fn answers_handshake_and_ping() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handler = MinimalHandler::new(SessionTransport::new(SessionId::generate(), 4, &tx), "test-gateway");

        let reply = handler
            .handle(request(Some(1), "initialize", Some(json!({ "protocolVersion": "2025-03-26" }))))
            .await
            .unwrap();
        let result = reply.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "test-gateway");

        let reply = handler.handle(request(Some(2), "ping", None)).await.unwrap();
        assert_eq!(reply.result, Some(json!({})));

        let reply = handler.handle(request(Some(3), "tools/list", None)).await.unwrap();
        assert_eq!(reply.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn pushes_ready_notification() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = SessionTransport::new(SessionId::generate(), 4, &tx);
        let mut stream = transport.subscribe();
        let handler = MinimalHandler::new(transport, "test-gateway");

        assert!(handler.handle(request(None, INITIALIZED_NOTIFICATION, None)).await.is_none());

        let pushed = stream.recv().await.unwrap();
        assert_eq!(pushed.method, LOG_NOTIFICATION);
        assert_eq!(pushed.params.unwrap()["data"], "session ready");
    }
}
