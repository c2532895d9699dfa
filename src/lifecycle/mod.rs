//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → Build servers → Bind listeners → Spawn tasks
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → main triggers Shutdown
//!
//! Shutdown (shutdown.rs):
//!     trigger → servers stop accepting and drain → reaper exits
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{launch, Running, StartupError};
