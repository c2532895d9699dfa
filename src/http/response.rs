//! Response handling and transformation.
//!
//! # Responsibilities
//! - Set CORS headers on every proxy response
//! - Copy upstream headers to the client, minus the ones the proxy owns
//! - Build structured JSON error bodies
//!
//! # Design Decisions
//! - The proxy owns the three `Access-Control-Allow-*` headers; upstream values are dropped
//! - Hop-by-hop framing headers are stripped, the client connection reframes the body
//! - `Vary: Origin` whenever the allowed origin is echoed

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::config::CorsConfig;

/// Headers the proxy sets itself and never relays from upstream.
const PROXY_OWNED_HEADERS: [HeaderName; 3] = [
    header::ACCESS_CONTROL_ALLOW_ORIGIN,
    header::ACCESS_CONTROL_ALLOW_METHODS,
    header::ACCESS_CONTROL_ALLOW_HEADERS,
];

const HOP_BY_HOP_HEADERS: [HeaderName; 3] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    HeaderName::from_static("keep-alive"),
];

/// Pre-validated CORS header values.
#[derive(Debug, Clone)]
pub struct CorsHeaders {
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
}

impl CorsHeaders {
    pub fn from_config(config: &CorsConfig) -> Self {
        let value = |raw: &str, fallback: &'static str| {
            HeaderValue::from_str(raw).unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Invalid CORS header value in config, using default");
                HeaderValue::from_static(fallback)
            })
        };
        Self {
            allow_methods: value(&config.allow_methods, "GET, POST, PUT, DELETE, PATCH, OPTIONS"),
            allow_headers: value(&config.allow_headers, "Content-Type, Authorization"),
        }
    }

    /// Write the CORS headers, echoing `origin` when the request carried one.
    pub fn apply(&self, headers: &mut HeaderMap, origin: Option<&HeaderValue>) {
        match origin {
            Some(origin) => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
                headers.append(header::VARY, HeaderValue::from_static("Origin"));
            }
            None => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            }
        }
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
    }
}

/// Copy upstream response headers that are safe to hand to the client.
pub fn relayable_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut relayed = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if PROXY_OWNED_HEADERS.contains(name) || HOP_BY_HOP_HEADERS.contains(name) {
            continue;
        }
        relayed.append(name.clone(), value.clone());
    }
    relayed
}
