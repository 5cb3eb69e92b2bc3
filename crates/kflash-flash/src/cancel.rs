//! Cooperative cancellation for polling loops
//!
//! Polling loops check the token between filesystem re-scans; cancellation
//! is delivered at that interval granularity as
//! [`FlashError::Interrupted`](crate::FlashError::Interrupted), which
//! unwinds through any enclosing [`ServiceGuard`](crate::ServiceGuard)
//! scope and still triggers the guaranteed restart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag, typically set from a Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from a signal handler thread.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
