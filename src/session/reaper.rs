//! Idle session reaper.
//!
//! Periodically closes sessions with no activity within the idle timeout,
//! going through the same teardown as an explicit terminate.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::session::gateway::SessionGateway;

pub struct IdleReaper {
    gateway: Arc<SessionGateway>,
    idle_timeout: Duration,
    interval: Duration,
}

impl IdleReaper {
    pub fn new(gateway: Arc<SessionGateway>, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            gateway,
            idle_timeout,
            interval,
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            idle_timeout_secs = self.idle_timeout.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Idle session reaper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let closed = self.gateway.expire_idle(self.idle_timeout).await;
                    if closed > 0 {
                        tracing::info!(closed, remaining = self.gateway.registry().len(), "Reaped idle sessions");
                    }
                }
            }
        }

        tracing::info!("Idle session reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::jsonrpc::{JsonRpcMessage, JsonRpcRequest};
    use crate::session::minimal;
    use serde_json::json;

    fn initialize() -> JsonRpcMessage {
        JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: "2.0".into(),
            method: "initialize".into(),
            params: Some(json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0.0.1" }
            })),
            id: Some(json!(1)),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn reaps_idle_sessions_until_shutdown() {
        let gateway = SessionGateway::new(&SessionConfig::default(), minimal::factory("test"));
        let exchange = gateway.route(None, vec![initialize()]).await.unwrap();
        let session = gateway.registry().get(exchange.session_id.as_str()).unwrap();

        let (tx, rx) = broadcast::channel(1);
        let reaper = IdleReaper::new(gateway.clone(), Duration::from_secs(60), Duration::from_secs(10));
        let handle = tokio::spawn(reaper.run(rx));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gateway.registry().len(), 1);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(gateway.registry().is_empty());
        assert!(session.transport().is_closed());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
