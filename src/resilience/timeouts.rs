//! Timeout enforcement.
//!
//! # Responsibilities
//! - Attach a deadline to each upstream call
//! - Cancel the call cleanly when the deadline fires
//! - Release the timer on every exit path (success, error, cancellation)
//!
//! # Design Decisions
//! - The deadline is a `CancellationToken` fired by a timer task
//! - `Deadline` is a scoped guard: dropping it aborts the timer task
//! - Timeout errors are distinct from other errors (504 Gateway Timeout)

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A running deadline for one upstream call.
///
/// The token is cancelled when `duration` elapses. The timer task is aborted
/// when the guard is dropped, so a call that finishes early leaves nothing
/// behind that can fire later.
#[derive(Debug)]
pub struct Deadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
    duration: Duration,
}

impl Deadline {
    /// Start the timer. Must be called from within a Tokio runtime.
    pub fn start(duration: Duration) -> Self {
        let token = CancellationToken::new();
        let fire = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            fire.cancel();
        });

        Self { token, timer, duration }
    }

    /// Resolves once the deadline has fired.
    pub fn expired(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A handle observing this deadline; it never fires after the guard drops.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
