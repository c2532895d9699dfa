//! The forwarding handler.
//!
//! One inbound request becomes at most one upstream request. Streaming-class
//! responses are piped through as they arrive; standard responses are
//! buffered and written once.

use axum::{
    body::Body,
    extract::State,
    http::{request::Parts, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http_body_util::LengthLimitError;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ForwardConfig;
use crate::http::request::{client_ip, forwardable_headers, RequestClass, RequestId, X_REQUEST_ID};
use crate::http::response::{relayable_headers, CorsHeaders};
use crate::observability::metrics;
use crate::proxy::error::{ErrorKind, ProxyError};
use crate::proxy::target::ForwardTarget;
use crate::resilience::Deadline;

/// Shared state for the forwarding handler.
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<ForwardConfig>,
    pub client: reqwest::Client,
    pub cors: CorsHeaders,
}

impl ProxyState {
    pub fn new(config: ForwardConfig) -> Result<Self, reqwest::Error> {
        // The gateway is the proxy: ignore system proxy settings and leave
        // deadlines to `Deadline`.
        let client = reqwest::Client::builder().no_proxy().build()?;
        let cors = CorsHeaders::from_config(&config.cors);
        Ok(Self {
            config: Arc::new(config),
            client,
            cors,
        })
    }
}

/// Access-log fields collected at request entry.
#[derive(Clone)]
struct AccessLog {
    request_id: RequestId,
    client_ip: String,
    method: Method,
    started: Instant,
}

impl AccessLog {
    fn record(&self, target: &str, outcome: Result<StatusCode, &ProxyError>) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        match outcome {
            Ok(status) => {
                tracing::info!(
                    request_id = %self.request_id,
                    client_ip = %self.client_ip,
                    method = %self.method,
                    target = %target,
                    status = status.as_u16(),
                    duration_ms,
                    "proxy request"
                );
                metrics::record_proxy_request(self.method.as_str(), status.as_u16(), self.started);
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    client_ip = %self.client_ip,
                    method = %self.method,
                    target = %target,
                    status = "ERROR",
                    error_kind = err.kind().as_str(),
                    error = %err,
                    duration_ms,
                    "proxy request"
                );
                metrics::record_proxy_request(self.method.as_str(), err.status().as_u16(), self.started);
                metrics::record_proxy_error(err.kind().as_str());
            }
        }
    }

    /// Second line for streamed responses, once the body is done.
    fn record_stream_end(&self, target: &str, outcome: StreamOutcome, bytes: u64) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        match outcome.error_kind() {
            None => tracing::info!(
                request_id = %self.request_id,
                target = %target,
                outcome = outcome.as_str(),
                bytes,
                duration_ms,
                "proxy stream ended"
            ),
            Some(kind) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    target = %target,
                    outcome = outcome.as_str(),
                    error_kind = kind.as_str(),
                    bytes,
                    duration_ms,
                    "proxy stream ended"
                );
                metrics::record_proxy_error(kind.as_str());
            }
        }
    }
}

/// How a relayed stream finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamOutcome {
    Completed,
    /// The client stopped reading before the upstream finished.
    ClientClosed,
    DeadlineExceeded,
    UpstreamFailed(ErrorKind),
}

impl StreamOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::ClientClosed => "client_closed",
            StreamOutcome::DeadlineExceeded => "deadline_exceeded",
            StreamOutcome::UpstreamFailed(_) => "upstream_failed",
        }
    }

    fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            StreamOutcome::Completed | StreamOutcome::ClientClosed => None,
            StreamOutcome::DeadlineExceeded => Some(ErrorKind::Timeout),
            StreamOutcome::UpstreamFailed(kind) => Some(*kind),
        }
    }
}

/// Main proxy handler.
/// Validates the target, forwards the request, and relays the response.
pub async fn forward(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    let log = AccessLog {
        request_id: RequestId::new(),
        client_ip: client_ip(&request),
        method: request.method().clone(),
        started: Instant::now(),
    };
    let origin = request.headers().get(axum::http::header::ORIGIN).cloned();

    let mut response = if request.method() == Method::OPTIONS {
        log.record("-", Ok(StatusCode::NO_CONTENT));
        StatusCode::NO_CONTENT.into_response()
    } else {
        let class = RequestClass::from_path(request.uri().path(), &state.config.stream_path);
        match ForwardTarget::from_query(request.uri().query(), &state.config.loopback) {
            Ok(target) => {
                let target_display = target.url().to_string();
                tracing::debug!(
                    request_id = %log.request_id,
                    class = class.as_str(),
                    target = %target_display,
                    rewritten_from = ?target.rewritten_from(),
                    "Forwarding request"
                );
                match relay(&state, request, target, class, &log, &target_display).await {
                    Ok(response) => {
                        log.record(&target_display, Ok(response.status()));
                        response
                    }
                    Err(err) => {
                        log.record(&target_display, Err(&err));
                        err.into_response_for(&log.request_id, state.config.expose_error_details)
                    }
                }
            }
            Err(err) => {
                log.record("-", Err(&err));
                err.into_response_for(&log.request_id, state.config.expose_error_details)
            }
        }
    };

    let headers = response.headers_mut();
    state.cors.apply(headers, origin.as_ref());
    if let Ok(value) = HeaderValue::from_str(log.request_id.as_str()) {
        headers.insert(X_REQUEST_ID, value);
    }
    response
}

/// Forward one request and relay the response according to its class.
async fn relay(
    state: &ProxyState,
    request: Request<Body>,
    target: ForwardTarget,
    class: RequestClass,
    log: &AccessLog,
    target_display: &str,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let body = read_body(&parts, body, state.config.max_body_bytes).await?;

    let mut upstream_request = state
        .client
        .request(parts.method.clone(), target.into_url())
        .headers(forwardable_headers(&parts.headers));
    if let Some(bytes) = body {
        upstream_request = upstream_request.body(bytes);
    }

    let deadline = Deadline::start(state.config.deadline_for(class));

    // Dropping the losing `send` future aborts the upstream call.
    let upstream = tokio::select! {
        biased;
        _ = deadline.expired() => return Err(ProxyError::timeout(deadline.duration())),
        result = upstream_request.send() => result.map_err(ProxyError::from_upstream)?,
    };

    let status = upstream.status();
    let headers = relayable_headers(upstream.headers());

    let body = if parts.method == Method::HEAD {
        Body::empty()
    } else {
        match class {
            RequestClass::Streaming => {
                let log = log.clone();
                let target = target_display.to_string();
                Body::from_stream(guarded_stream(upstream.bytes_stream(), deadline, move |outcome, bytes| {
                    log.record_stream_end(&target, outcome, bytes)
                }))
            }
            RequestClass::Standard => {
                let bytes = tokio::select! {
                    biased;
                    _ = deadline.expired() => return Err(ProxyError::timeout(deadline.duration())),
                    result = upstream.bytes() => result.map_err(ProxyError::from_upstream)?,
                };
                Body::from(bytes)
            }
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Read the inbound body for methods that carry one.
async fn read_body(parts: &Parts, body: Body, limit: usize) -> Result<Option<Bytes>, ProxyError> {
    if parts.method == Method::GET || parts.method == Method::HEAD {
        return Ok(None);
    }

    match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) => {
            if exceeded_limit(&err) {
                Err(ProxyError::payload_too_large(limit))
            } else {
                Err(ProxyError::unclassified(format!("Failed to read request body: {}", err)))
            }
        }
    }
}

/// `to_bytes` wraps the limit error; find it in the source chain.
fn exceeded_limit(err: &axum::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Reports the stream outcome exactly once, as `ClientClosed` if dropped unfinished.
struct StreamEnd<F: FnOnce(StreamOutcome, u64)> {
    report: Option<F>,
    relayed: u64,
}

impl<F: FnOnce(StreamOutcome, u64)> StreamEnd<F> {
    fn finish(&mut self, outcome: StreamOutcome) {
        if let Some(report) = self.report.take() {
            report(outcome, self.relayed);
        }
    }
}

impl<F: FnOnce(StreamOutcome, u64)> Drop for StreamEnd<F> {
    fn drop(&mut self) {
        self.finish(StreamOutcome::ClientClosed);
    }
}

/// Relay upstream chunks as they arrive, ending the stream if the deadline fires.
///
/// The deadline guard lives inside the stream, so the timer is released when
/// the client finishes reading or disconnects. `on_end` runs before a
/// terminal error is yielded, since the server stops polling after one.
fn guarded_stream<S, F>(
    upstream: S,
    deadline: Deadline,
    on_end: F,
) -> impl Stream<Item = Result<Bytes, io::Error>>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    F: FnOnce(StreamOutcome, u64) + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = std::pin::pin!(upstream);
        let mut end = StreamEnd { report: Some(on_end), relayed: 0 };
        loop {
            let next = tokio::select! {
                biased;
                _ = deadline.expired() => None,
                chunk = upstream.next() => Some(chunk),
            };

            match next {
                Some(Some(Ok(bytes))) => {
                    end.relayed += bytes.len() as u64;
                    yield Ok(bytes);
                }
                Some(Some(Err(err))) => {
                    let failure = ProxyError::from_upstream(err);
                    end.finish(StreamOutcome::UpstreamFailed(failure.kind()));
                    yield Err(io::Error::other(failure.message().to_string()));
                    break;
                }
                Some(None) => {
                    end.finish(StreamOutcome::Completed);
                    break;
                }
                None => {
                    end.finish(StreamOutcome::DeadlineExceeded);
                    yield Err(io::Error::new(io::ErrorKind::TimedOut, "upstream stream deadline exceeded"));
                    break;
                }
            }
        }
    }
}
