//! Per-session transport and the protocol-handler seam.
//!
//! # Responsibilities
//! - Generate opaque session IDs
//! - Give each handler a push channel for server-to-client notifications
//! - Report handler-side closure to the router as a `SessionEvent`
//!
//! # Design Decisions
//! - The transport holds a weak sender: an abandoned router does not stay
//!   alive because sessions still reference it
//! - `close()` emits the closure event at most once per session

use async_trait::async_trait;
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::session::jsonrpc::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};

/// Opaque, server-generated session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh, globally unique ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a session left the `active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent an explicit terminate.
    Terminated,
    /// The handler closed on its own (protocol error, disconnect).
    HandlerClosed,
    /// No activity within the idle timeout.
    Idle,
    /// The initialize exchange did not produce a successful result.
    InitializeFailed,
    /// The gateway is stopping.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Terminated => "terminated",
            CloseReason::HandlerClosed => "handler_closed",
            CloseReason::Idle => "idle",
            CloseReason::InitializeFailed => "initialize_failed",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Lifecycle events sent from transports to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Closed { id: SessionId, reason: CloseReason },
}

/// The session-scoped channel a handler talks through.
#[derive(Debug, Clone)]
pub struct SessionTransport {
    id: SessionId,
    notifications: broadcast::Sender<JsonRpcRequest>,
    events: mpsc::WeakUnboundedSender<SessionEvent>,
    closed: CancellationToken,
    close_sent: Arc<AtomicBool>,
}

impl SessionTransport {
    pub fn new(
        id: SessionId,
        notification_buffer: usize,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(notification_buffer.max(1));
        Self {
            id,
            notifications,
            events: events.downgrade(),
            closed: CancellationToken::new(),
            close_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    /// Push a notification to every open stream of this session.
    ///
    /// Returns false when no client is currently listening; the message is dropped.
    pub fn notify(&self, notification: JsonRpcRequest) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.notifications.send(notification) {
            Ok(receivers) => {
                tracing::trace!(session_id = %self.id, receivers, "Notification pushed");
                true
            }
            Err(_) => {
                tracing::debug!(session_id = %self.id, "No open stream, notification dropped");
                false
            }
        }
    }

    /// Subscribe a new push stream.
    pub fn subscribe(&self) -> broadcast::Receiver<JsonRpcRequest> {
        self.notifications.subscribe()
    }

    /// Number of push streams currently attached.
    pub fn listeners(&self) -> usize {
        self.notifications.receiver_count()
    }

    /// Mark the session closed and tell the router. Only the first call has any effect.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.close_sent.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();

        match self.events.upgrade() {
            Some(events) => {
                if events.send(SessionEvent::Closed { id: self.id.clone(), reason }).is_err() {
                    tracing::debug!(session_id = %self.id, "Router gone, closure event dropped");
                }
            }
            None => tracing::debug!(session_id = %self.id, "Router gone, closure event dropped"),
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the session closes; push streams end on it.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Protocol logic for one session.
///
/// The router serializes calls to `handle`, so a handler sees its exchanges
/// one at a time, in arrival order.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Process one inbound message. Requests with an id must yield a response.
    async fn handle(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse>;

    /// Release handler resources before the session is removed.
    async fn shutdown(&self) {}
}

/// Creates one handler per session.
pub trait HandlerFactory: Send + Sync + 'static {
    fn create(&self, transport: SessionTransport) -> Arc<dyn SessionHandler>;
}

impl<F> HandlerFactory for F
where
    F: Fn(SessionTransport) -> Arc<dyn SessionHandler> + Send + Sync + 'static,
{
    fn create(&self, transport: SessionTransport) -> Arc<dyn SessionHandler> {
        self(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[tokio::test]
    async fn close_emits_one_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = SessionTransport::new(SessionId::generate(), 4, &tx);

        assert!(transport.close(CloseReason::HandlerClosed));
        assert!(!transport.close(CloseReason::Terminated));
        assert!(transport.is_closed());

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::Closed {
                id: transport.session_id().clone(),
                reason: CloseReason::HandlerClosed
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notify_reaches_subscribers_until_closed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = SessionTransport::new(SessionId::generate(), 4, &tx);

        assert!(!transport.notify(JsonRpcRequest::notification("notifications/message", None)));

        let mut stream = transport.subscribe();
        assert_eq!(transport.listeners(), 1);
        assert!(transport.notify(JsonRpcRequest::notification("notifications/message", None)));
        assert_eq!(stream.recv().await.unwrap().method, "notifications/message");

        transport.close(CloseReason::Idle);
        assert!(!transport.notify(JsonRpcRequest::notification("notifications/message", None)));

        drop(stream);
        assert_eq!(transport.listeners(), 0);
    }
}
