//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a request ID for each proxied call
//! - Resolve the client IP for the access log
//! - Classify the request (streaming vs standard) from its path
//! - Filter inbound headers before forwarding upstream
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Proxy headers (`x-real-ip`, `x-forwarded-for`) take precedence over the socket peer
//! - Multi-valued headers are folded into one comma-joined value

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// Header carrying the request ID on proxy responses.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Inbound headers that would corrupt the new upstream connection.
const UNFORWARDED_HEADERS: [HeaderName; 4] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

/// Unique identifier for one proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new short request ID (first 8 hex digits of a UUID v4).
    pub fn new() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request category selecting deadline and relay mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Long deadline, response bytes piped as they arrive.
    Streaming,
    /// Short deadline, response body buffered and written once.
    Standard,
}

impl RequestClass {
    /// Classify an inbound path against the configured stream path.
    pub fn from_path(path: &str, stream_path: &str) -> Self {
        let trim = |p: &str| p.trim_end_matches('/').to_string();
        if trim(path) == trim(stream_path) {
            RequestClass::Streaming
        } else {
            RequestClass::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Streaming => "streaming",
            RequestClass::Standard => "standard",
        }
    }
}

/// Resolve the client IP: `x-real-ip`, then the first `x-forwarded-for` hop, then the socket peer.
pub fn client_ip<B>(request: &Request<B>) -> String {
    let headers = request.headers();
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    from_header("x-real-ip")
        .or_else(|| from_header("x-forwarded-for"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Copy inbound headers for the upstream call, dropping connection-specific ones.
///
/// Repeated headers are joined into a single `", "`-separated value.
pub fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.keys_len());

    for name in inbound.keys() {
        if UNFORWARDED_HEADERS.contains(name) {
            continue;
        }

        let values: Vec<&[u8]> = inbound.get_all(name).iter().map(|v| v.as_bytes()).collect();
        let joined = values.join(&b", "[..]);
        match HeaderValue::from_bytes(&joined) {
            Ok(value) => {
                outbound.insert(name.clone(), value);
            }
            Err(_) => tracing::debug!(header = %name, "Dropping unrepresentable header"),
        }
    }

    outbound
}
