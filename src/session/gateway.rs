//! Session routing operations, independent of HTTP.
//!
//! # Responsibilities
//! - `route`: run one exchange on an existing session, or open a session on initialize
//! - `notify`: attach a push stream to an existing session
//! - `terminate`: close a session and remove it from the registry
//! - `close_all`: close every session when the gateway stops
//! - Consume closure events from transports and prune the registry
//!
//! # State Machine
//! ```text
//! absent ──initialize──▶ active ──terminate / handler close / idle / shutdown──▶ closed
//! ```
//! `closed` is terminal; a closed ID is never routed again.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::observability::metrics;
use crate::session::jsonrpc::{codes, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use crate::session::registry::{RegistryError, Session, SessionRegistry};
use crate::session::transport::{
    CloseReason, HandlerFactory, SessionEvent, SessionId, SessionTransport,
};

/// Why a request could not be routed to a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("Bad Request: No valid session ID provided")]
    MissingSession,

    #[error("Bad Request: Unknown session ID")]
    UnknownSession,

    #[error("Bad Request: Session is closed")]
    SessionClosed,

    #[error("Invalid Request: Server already initialized")]
    AlreadyInitialized,

    #[error("Invalid Request: initialize must be sent alone")]
    InitializeInBatch,

    #[error("Service Unavailable: session limit of {0} reached")]
    Capacity(usize),
}

impl RouteError {
    pub fn code(&self) -> i64 {
        match self {
            RouteError::AlreadyInitialized | RouteError::InitializeInBatch => codes::INVALID_REQUEST,
            _ => codes::SERVER_ERROR,
        }
    }
}

/// Result of a successful `route` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub session_id: SessionId,
    /// True when this exchange created the session.
    pub created: bool,
    pub responses: Vec<JsonRpcResponse>,
}

/// Live push channel for one session.
pub struct NotificationStream {
    pub session_id: SessionId,
    pub receiver: broadcast::Receiver<JsonRpcRequest>,
    /// Cancelled when the session closes.
    pub closed: CancellationToken,
}

/// The session router service.
pub struct SessionGateway {
    registry: Arc<SessionRegistry>,
    factory: Arc<dyn HandlerFactory>,
    events: mpsc::UnboundedSender<SessionEvent>,
    notification_buffer: usize,
}

impl SessionGateway {
    /// Build the gateway and start its closure-event consumer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &SessionConfig, factory: Arc<dyn HandlerFactory>) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        let (events, receiver) = mpsc::unbounded_channel();
        tokio::spawn(consume_events(registry.clone(), receiver));

        Arc::new(Self {
            registry,
            factory,
            events,
            notification_buffer: config.notification_buffer,
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Route one POSTed payload.
    pub async fn route(
        &self,
        session_id: Option<&str>,
        messages: Vec<JsonRpcMessage>,
    ) -> Result<Exchange, RouteError> {
        let has_initialize = messages.iter().any(JsonRpcMessage::is_initialize);

        match session_id {
            Some(id) => {
                let session = self.registry.get(id).ok_or(RouteError::UnknownSession)?;
                if has_initialize {
                    return Err(RouteError::AlreadyInitialized);
                }
                let responses = self.exchange(&session, messages).await?;
                Ok(Exchange {
                    session_id: session.id().clone(),
                    created: false,
                    responses,
                })
            }
            None if has_initialize && messages.len() > 1 => Err(RouteError::InitializeInBatch),
            None if has_initialize => self.open(messages).await,
            None => Err(RouteError::MissingSession),
        }
    }

    /// Open a session for an initialize request and run the initialize exchange.
    async fn open(&self, messages: Vec<JsonRpcMessage>) -> Result<Exchange, RouteError> {
        if !self.registry.has_capacity() {
            return Err(RouteError::Capacity(self.registry.capacity()));
        }

        let id = SessionId::generate();
        let transport = SessionTransport::new(id.clone(), self.notification_buffer, &self.events);
        let handler = self.factory.create(transport.clone());
        let session = Arc::new(Session::new(handler, transport));

        self.registry.insert(session.clone()).map_err(|e| match e {
            RegistryError::Full(limit) => RouteError::Capacity(limit),
            RegistryError::Duplicate(_) => RouteError::AlreadyInitialized,
        })?;
        tracing::info!(session_id = %id, "Session opened");

        let responses = self.exchange(&session, messages).await?;

        let initialized = responses.first().is_some_and(|r| r.error.is_none());
        if !initialized {
            tracing::warn!(session_id = %id, "Initialize rejected by handler, closing session");
            self.close(&session, CloseReason::InitializeFailed).await;
        }

        Ok(Exchange {
            session_id: id,
            created: initialized,
            responses,
        })
    }

    /// Run messages through the session handler, one exchange at a time.
    async fn exchange(
        &self,
        session: &Session,
        messages: Vec<JsonRpcMessage>,
    ) -> Result<Vec<JsonRpcResponse>, RouteError> {
        let _turn = session.begin_exchange().await;
        if !session.is_live() {
            return Err(RouteError::SessionClosed);
        }

        let mut responses = Vec::new();
        for message in messages {
            let expects_reply = message.expects_reply();
            let request_id = match &message {
                JsonRpcMessage::Request(request) => request.id.clone(),
                JsonRpcMessage::Response(_) => None,
            };

            match session.handler().handle(message).await {
                Some(response) => responses.push(response),
                None if expects_reply => {
                    tracing::error!(session_id = %session.id(), "Handler returned no reply for a request");
                    responses.push(JsonRpcResponse::failure(
                        request_id.unwrap_or_default(),
                        JsonRpcError::new(codes::INTERNAL_ERROR, "Internal error: no response produced"),
                    ));
                }
                None => {}
            }
        }
        Ok(responses)
    }

    /// Open or reuse the session's push channel.
    pub fn notify(&self, session_id: Option<&str>) -> Result<NotificationStream, RouteError> {
        let id = session_id.ok_or(RouteError::MissingSession)?;
        let session = self.registry.get(id).ok_or(RouteError::UnknownSession)?;
        if !session.is_live() {
            return Err(RouteError::SessionClosed);
        }
        session.touch();

        let transport = session.transport();
        tracing::debug!(session_id = %session.id(), "Push stream attached");
        Ok(NotificationStream {
            session_id: session.id().clone(),
            receiver: transport.subscribe(),
            closed: transport.closed_token(),
        })
    }

    /// Close the session after its handler confirms shutdown.
    pub async fn terminate(&self, session_id: Option<&str>) -> Result<SessionId, RouteError> {
        let id = session_id.ok_or(RouteError::MissingSession)?;
        let session = self.registry.get(id).ok_or(RouteError::UnknownSession)?;

        if self.close(&session, CloseReason::Terminated).await {
            Ok(session.id().clone())
        } else {
            Err(RouteError::SessionClosed)
        }
    }

    /// Close every session idle for at least `idle`. Returns how many were closed.
    pub async fn expire_idle(&self, idle: Duration) -> usize {
        let mut closed = 0;
        for session in self.registry.idle_sessions(idle) {
            if self.close(&session, CloseReason::Idle).await {
                closed += 1;
            }
        }
        closed
    }

    /// Close every registered session. Ends open push streams, so servers can drain.
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let mut closed = 0;
        for session in self.registry.sessions() {
            if self.close(&session, reason).await {
                closed += 1;
            }
        }
        closed
    }

    /// Shut the handler down, signal closure, then drop the registry entry.
    ///
    /// Waits for an in-flight exchange to finish first, so `shutdown` never
    /// overlaps `handle`. Returns false if another caller is already closing
    /// this session.
    async fn close(&self, session: &Session, reason: CloseReason) -> bool {
        if !session.begin_close() {
            return false;
        }

        let _turn = session.begin_exchange().await;
        session.handler().shutdown().await;
        session.transport().close(reason);

        if self.registry.remove(session.id().as_str()).is_some() {
            metrics::record_session_closed(reason.as_str());
            tracing::info!(session_id = %session.id(), reason = reason.as_str(), "Session closed");
        }
        true
    }
}

/// Remove sessions whose handlers closed on their own.
///
/// Ends once every sender (the gateway's, upgraded transport handles) is gone.
async fn consume_events(registry: Arc<SessionRegistry>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Closed { id, reason } => match registry.remove(id.as_str()) {
                Some(_) => {
                    metrics::record_session_closed(reason.as_str());
                    tracing::info!(session_id = %id, reason = reason.as_str(), "Session closed");
                }
                None => tracing::trace!(session_id = %id, "Closure event for already removed session"),
            },
        }
    }
    tracing::debug!("Session event channel closed");
}
