//! Session registry.
//!
//! # Responsibilities
//! - Map session ID → live session (single source of truth for routing)
//! - Enforce the session capacity
//! - Remove entries exactly once
//!
//! # Design Decisions
//! - `std::sync::Mutex<HashMap>`: every check-then-act runs under one lock
//!   acquisition, and the guard cannot be held across an `.await`
//! - Sessions are handed out as `Arc<Session>`; removal does not invalidate
//!   a request already holding one, it only flips liveness

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::session::transport::{SessionHandler, SessionId, SessionTransport};

/// One live session: a handler instance and its transport.
pub struct Session {
    id: SessionId,
    created_at: SystemTime,
    handler: Arc<dyn SessionHandler>,
    transport: SessionTransport,
    /// Serializes exchanges so the handler processes one at a time.
    turn: AsyncMutex<()>,
    last_activity: Mutex<Instant>,
    closing: AtomicBool,
}

impl Session {
    pub fn new(handler: Arc<dyn SessionHandler>, transport: SessionTransport) -> Self {
        Self {
            id: transport.session_id().clone(),
            created_at: SystemTime::now(),
            handler,
            transport,
            turn: AsyncMutex::new(()),
            last_activity: Mutex::new(Instant::now()),
            closing: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn handler(&self) -> &Arc<dyn SessionHandler> {
        &self.handler
    }

    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    /// Wait for this session's turn to run an exchange.
    pub async fn begin_exchange(&self) -> tokio::sync::MutexGuard<'_, ()> {
        let turn = self.turn.lock().await;
        self.touch();
        turn
    }

    pub fn touch(&self) {
        *self.activity() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.activity().elapsed()
    }

    fn activity(&self) -> MutexGuard<'_, Instant> {
        self.last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the right to close this session. Only the first caller gets `true`.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    /// Active: not closing and the transport is still open.
    pub fn is_live(&self) -> bool {
        !self.closing.load(Ordering::Acquire) && !self.transport.is_closed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("live", &self.is_live())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("session limit of {0} reached")]
    Full(usize),

    #[error("session {0} already registered")]
    Duplicate(SessionId),
}

/// Shared map of live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fail fast before building a handler when the registry is full.
    pub fn has_capacity(&self) -> bool {
        self.map().len() < self.capacity
    }

    /// Register a new session. Capacity check and insert are one atomic step.
    pub fn insert(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut map = self.map();
        if map.len() >= self.capacity {
            return Err(RegistryError::Full(self.capacity));
        }
        if map.contains_key(session.id()) {
            return Err(RegistryError::Duplicate(session.id().clone()));
        }
        map.insert(session.id().clone(), session);
        metrics::record_active_sessions(map.len());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.map().get(id).cloned()
    }

    /// Remove a session. Returns it only to the first caller.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let mut map = self.map();
        let removed = map.remove(id);
        if removed.is_some() {
            metrics::record_active_sessions(map.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.map().values().cloned().collect()
    }

    /// Sessions idle for at least `idle`.
    ///
    /// An attached push stream counts as activity, so the idle clock of a
    /// listening session restarts from when its last stream detaches.
    pub fn idle_sessions(&self, idle: Duration) -> Vec<Arc<Session>> {
        self.map()
            .values()
            .filter(|session| {
                if session.transport().listeners() > 0 {
                    session.touch();
                    return false;
                }
                session.idle_for() >= idle
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::jsonrpc::{JsonRpcMessage, JsonRpcResponse};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct Silent;

    #[async_trait]
    impl SessionHandler for Silent {
        async fn handle(&self, _message: JsonRpcMessage) -> Option<JsonRpcResponse> {
            None
        }
    }

    fn session(events: &mpsc::UnboundedSender<crate::session::transport::SessionEvent>) -> Arc<Session> {
        let transport = SessionTransport::new(SessionId::generate(), 4, events);
        Arc::new(Session::new(Arc::new(Silent), transport))
    }

    #[test]
    fn insert_get_remove_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new(4);
        let s = session(&tx);
        let id = s.id().clone();

        registry.insert(s.clone()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(id.as_str()).is_some());
        assert_eq!(registry.insert(s), Err(RegistryError::Duplicate(id.clone())));

        assert!(registry.remove(id.as_str()).is_some());
        assert!(registry.remove(id.as_str()).is_none());
        assert!(registry.get(id.as_str()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn enforces_capacity() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new(2);
        registry.insert(session(&tx)).unwrap();
        assert!(registry.has_capacity());
        registry.insert(session(&tx)).unwrap();
        assert!(!registry.has_capacity());
        assert_eq!(registry.insert(session(&tx)), Err(RegistryError::Full(2)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn close_is_claimed_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let s = session(&tx);
        assert!(s.is_live());
        assert!(s.begin_close());
        assert!(!s.begin_close());
        assert!(!s.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn reports_idle_sessions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new(4);
        let stale = session(&tx);
        let fresh = session(&tx);
        registry.insert(stale.clone()).unwrap();
        registry.insert(fresh.clone()).unwrap();

        tokio::time::advance(Duration::from_secs(90)).await;
        fresh.touch();

        let idle = registry.idle_sessions(Duration::from_secs(60));
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id(), stale.id());
        assert_eq!(registry.sessions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn listening_session_is_never_idle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new(4);
        let listening = session(&tx);
        registry.insert(listening.clone()).unwrap();
        let stream = listening.transport().subscribe();

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(registry.idle_sessions(Duration::from_secs(60)).is_empty());

        // The clock restarts once the stream goes away.
        drop(stream);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(registry.idle_sessions(Duration::from_secs(60)).is_empty());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(registry.idle_sessions(Duration::from_secs(60)).len(), 1);
    }
}
