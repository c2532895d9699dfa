//! Error taxonomy for the forwarding proxy.
//!
//! Every failure on the forwarding path maps to exactly one [`ErrorKind`],
//! and each kind maps to one status code and one message template,
//! independent of where the failure came from.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::http::request::RequestId;

/// Closed classification of forwarding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request deadline fired before the exchange completed.
    Timeout,
    /// Name resolution failed or the connection was refused.
    UpstreamUnreachable,
    /// The connection was reset mid-transfer.
    UpstreamReset,
    /// Missing or malformed target, or a request the client layer refused to build.
    InvalidTarget,
    /// Inbound body larger than the configured limit.
    PayloadTooLarge,
    /// Anything else.
    Unclassified,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamUnreachable | ErrorKind::UpstreamReset => StatusCode::BAD_GATEWAY,
            ErrorKind::InvalidTarget => StatusCode::BAD_REQUEST,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Unclassified => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::UpstreamUnreachable => "upstream_unreachable",
            ErrorKind::UpstreamReset => "upstream_reset",
            ErrorKind::InvalidTarget => "invalid_target",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

/// A classified forwarding failure.
///
/// `message` is the client-facing text; `details` carries the underlying
/// error and is only shown when error details are exposed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProxyError {
    kind: ErrorKind,
    message: String,
    details: Option<String>,
}

impl ProxyError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), details: None }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn missing_target() -> Self {
        Self::new(ErrorKind::InvalidTarget, "Missing targetUrl parameter")
    }

    pub fn invalid_target(reason: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::InvalidTarget, format!("Invalid targetUrl: {}", reason))
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Upstream request timed out after {}ms", after.as_millis()),
        )
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, format!("Request body exceeds {} bytes", limit))
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unclassified, message)
    }

    /// Classify an error raised by the upstream client.
    pub fn from_upstream(err: reqwest::Error) -> Self {
        let details = format!("{:?}", err);

        // The client carries no timeout of its own; `Timeout` only comes from `Deadline`.
        let kind = if err.is_builder() {
            ErrorKind::InvalidTarget
        } else if let Some(kind) = io_error_kind(&err).and_then(kind_for_io) {
            kind
        } else if err.is_connect() {
            ErrorKind::UpstreamUnreachable
        } else if closed_mid_message(&err) {
            ErrorKind::UpstreamReset
        } else {
            ErrorKind::Unclassified
        };

        let message = match kind {
            ErrorKind::UpstreamUnreachable => "Unable to reach target server".to_string(),
            ErrorKind::UpstreamReset => "Connection to target server was reset".to_string(),
            ErrorKind::InvalidTarget => format!("Invalid targetUrl: {}", err),
            _ => err.to_string(),
        };

        Self::new(kind, message).with_details(details)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Render the JSON error response, with details only when `expose_details` is set.
    pub fn into_response_for(self, request_id: &RequestId, expose_details: bool) -> Response {
        let status = self.status();
        let body = if expose_details {
            let details = self.details.unwrap_or_else(|| self.message.clone());
            serde_json::json!({
                "error": self.message,
                "details": details,
                "requestId": request_id.as_str(),
            })
        } else {
            serde_json::json!({ "error": self.message })
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

/// Find the innermost I/O error kind in an error's source chain.
fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    let mut found = None;
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            found = Some(io_err.kind());
        }
        current = e.source();
    }
    found
}

fn kind_for_io(kind: io::ErrorKind) -> Option<ErrorKind> {
    match kind {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => Some(ErrorKind::UpstreamReset),
        // An OS-level connect timeout means the host never answered.
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotFound
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::TimedOut => Some(ErrorKind::UpstreamUnreachable),
        _ => None,
    }
}

/// The peer closed the connection before a complete response, without an I/O error.
fn closed_mid_message(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<hyper::Error>()
            .is_some_and(hyper::Error::is_incomplete_message)
        {
            return true;
        }
        current = e.source();
    }
    false
}
