//! OS signal handling.
//!
//! SIGINT (Ctrl+C) and SIGTERM both request graceful shutdown.

use std::io;

/// Which signal ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
        }
    }
}

/// Wait for the first shutdown signal.
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<Signal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| Signal::Interrupt),
        _ = terminate.recv() => Ok(Signal::Terminate),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> io::Result<Signal> {
    tokio::signal::ctrl_c().await.map(|_| Signal::Interrupt)
}
