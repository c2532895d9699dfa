//! HTTP surface of the session gateway: one endpoint, three methods.
//!
//! - `POST`   → `SessionGateway::route`
//! - `GET`    → `SessionGateway::notify` (Server-Sent Events)
//! - `DELETE` → `SessionGateway::terminate`
//!
//! Session identity travels in the `mcp-session-id` header.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::post,
    Router,
};
use futures_util::Stream;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

use crate::session::gateway::{NotificationStream, RouteError, SessionGateway};
use crate::session::jsonrpc::{parse_messages, JsonRpcError, JsonRpcResponse};

pub const MCP_SESSION_ID: &str = "mcp-session-id";

/// Plain-text body for `GET`/`DELETE` without a usable session.
const INVALID_SESSION_TEXT: &str = "Invalid or missing session ID";

/// Router for the session endpoint.
pub fn routes(gateway: Arc<SessionGateway>, endpoint: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID)]);

    Router::new()
        .route(endpoint, post(handle_post).get(handle_get).delete(handle_delete))
        .with_state(gateway)
        .layer(cors)
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(MCP_SESSION_ID).and_then(|value| value.to_str().ok())
}

async fn handle_post(
    State(gateway): State<Arc<SessionGateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let messages = match parse_messages(&body) {
        Ok(messages) => messages,
        Err(error) => {
            tracing::debug!(code = error.code, message = %error.message, "Rejected malformed payload");
            return rpc_error(StatusCode::BAD_REQUEST, error);
        }
    };
    let batch = is_batch(&body);

    let exchange = match gateway.route(session_header(&headers), messages).await {
        Ok(exchange) => exchange,
        Err(err) => {
            tracing::debug!(error = %err, "Session route rejected");
            let status = match err {
                RouteError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_REQUEST,
            };
            return rpc_error(status, JsonRpcError::new(err.code(), err.to_string()));
        }
    };

    let mut response = if exchange.responses.is_empty() {
        StatusCode::ACCEPTED.into_response()
    } else if batch {
        Json(exchange.responses).into_response()
    } else {
        let mut responses = exchange.responses;
        Json(responses.swap_remove(0)).into_response()
    };

    if exchange.created {
        if let Ok(value) = HeaderValue::from_str(exchange.session_id.as_str()) {
            response.headers_mut().insert(MCP_SESSION_ID, value);
        }
    }
    response
}

async fn handle_get(State(gateway): State<Arc<SessionGateway>>, headers: HeaderMap) -> Response {
    match gateway.notify(session_header(&headers)) {
        Ok(stream) => Sse::new(push_events(stream))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(err) => invalid_session(err),
    }
}

async fn handle_delete(State(gateway): State<Arc<SessionGateway>>, headers: HeaderMap) -> Response {
    match gateway.terminate(session_header(&headers)).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(err) => invalid_session(err),
    }
}

/// Forward session notifications as SSE events until the session closes.
fn push_events(stream: NotificationStream) -> impl Stream<Item = Result<Event, Infallible>> {
    let NotificationStream {
        session_id,
        mut receiver,
        closed,
    } = stream;

    async_stream::stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = closed.cancelled() => None,
                message = receiver.recv() => Some(message),
            };

            match next {
                Some(Ok(notification)) => match Event::default().event("message").json_data(&notification) {
                    Ok(event) => yield Ok(event),
                    Err(err) => tracing::warn!(session_id = %session_id, error = %err, "Failed to encode notification"),
                },
                Some(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(session_id = %session_id, skipped, "Push stream lagged, notifications dropped");
                }
                Some(Err(RecvError::Closed)) | None => break,
            }
        }
        tracing::debug!(session_id = %session_id, "Push stream ended");
    }
}

fn is_batch(body: &[u8]) -> bool {
    body.iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .is_some_and(|byte| *byte == b'[')
}

fn rpc_error(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::failure(Value::Null, error))).into_response()
}

fn invalid_session(err: RouteError) -> Response {
    tracing::debug!(error = %err, "Session request rejected");
    (StatusCode::BAD_REQUEST, INVALID_SESSION_TEXT).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::minimal;
    use axum::body::Body;
    use axum::http::Request;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(max_sessions: usize) -> (Router, Arc<SessionGateway>) {
        let config = SessionConfig {
            max_sessions,
            ..SessionConfig::default()
        };
        let gateway = SessionGateway::new(&config, minimal::factory("test-gateway"));
        (routes(gateway.clone(), "/mcp"), gateway)
    }

    fn initialize_body() -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "test-client", "version": "1.0.0" }
            }
        })
        .to_string()
    }

    fn post(session: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some(id) = session {
            builder = builder.header(MCP_SESSION_ID, id);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn bare(method: Method, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/mcp");
        if let Some(id) = session {
            builder = builder.header(MCP_SESSION_ID, id);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn open_session(app: &Router) -> String {
        let response = app.clone().oneshot(post(None, initialize_body())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.headers()[MCP_SESSION_ID].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let (app, gateway) = app(8);

        let first = open_session(&app).await;
        let second = open_session(&app).await;
        assert_ne!(first, second);
        assert_eq!(gateway.registry().len(), 2);

        let ping = json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }).to_string();
        let response = app.clone().oneshot(post(Some(&first), ping)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(MCP_SESSION_ID).is_none());
        assert_eq!(body_json(response).await, json!({ "jsonrpc": "2.0", "result": {}, "id": 2 }));

        let response = app.clone().oneshot(bare(Method::DELETE, Some(&first))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(bare(Method::DELETE, Some(&first))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, INVALID_SESSION_TEXT);

        assert_eq!(gateway.registry().len(), 1);
        assert!(gateway.registry().get(&second).is_some());
    }

    #[tokio::test]
    async fn rejects_post_without_session() {
        let (app, gateway) = app(8);
        let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }).to_string();

        let response = app.clone().oneshot(post(None, ping.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({
                "jsonrpc": "2.0",
                "error": { "code": -32000, "message": "Bad Request: No valid session ID provided" },
                "id": null
            })
        );

        let response = app.clone().oneshot(post(Some("unknown"), ping)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["id"], Value::Null);

        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn rejects_get_and_delete_for_unknown_session() {
        let (app, gateway) = app(8);

        for method in [Method::GET, Method::DELETE] {
            let response = app.clone().oneshot(bare(method.clone(), Some("unknown"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} with unknown id", method);
            assert_eq!(body_text(response).await, INVALID_SESSION_TEXT);

            let response = app.clone().oneshot(bare(method.clone(), None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} without id", method);
        }
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let (app, _) = app(8);
        let response = app.oneshot(post(None, "{oops".to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn notifications_are_accepted_without_body() {
        let (app, _) = app(8);
        let session = open_session(&app).await;

        let body = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string();
        let response = app.oneshot(post(Some(&session), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(body_text(response).await.is_empty());
    }

    #[tokio::test]
    async fn batch_replies_with_array() {
        let (app, _) = app(8);
        let session = open_session(&app).await;

        let body = json!([
            { "jsonrpc": "2.0", "method": "notifications/initialized" },
            { "jsonrpc": "2.0", "id": 5, "method": "ping" },
            { "jsonrpc": "2.0", "id": 6, "method": "tools/list" }
        ])
        .to_string();
        let response = app.oneshot(post(Some(&session), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let replies = body_json(response).await;
        let replies = replies.as_array().unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 5);
        assert_eq!(replies[1]["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn full_gateway_returns_503() {
        let (app, gateway) = app(1);
        open_session(&app).await;

        let response = app.oneshot(post(None, initialize_body())).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(MCP_SESSION_ID).is_none());
        assert_eq!(gateway.registry().len(), 1);
    }

    #[tokio::test]
    async fn push_stream_delivers_notifications() {
        let (app, _) = app(8);
        let session = open_session(&app).await;

        let response = app.clone().oneshot(bare(Method::GET, Some(&session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        let mut events = response.into_body().into_data_stream();

        let body = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string();
        let response = app.clone().oneshot(post(Some(&session), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let frame = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .expect("notification should arrive")
            .unwrap()
            .unwrap();
        let frame = String::from_utf8(frame.to_vec()).unwrap();
        assert!(frame.contains("event: message"));
        assert!(frame.contains("session ready"));

        let response = app.oneshot(bare(Method::DELETE, Some(&session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let end = tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .expect("stream should end after terminate");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn preflight_exposes_session_header() {
        let (app, _) = app(8);
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/mcp")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        assert_eq!(response.headers()["access-control-allow-origin"], "*");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header("origin", "http://localhost:5173")
            .header("content-type", "application/json")
            .body(Body::from(initialize_body()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()["access-control-expose-headers"], MCP_SESSION_ID);
    }
}
