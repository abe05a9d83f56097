//! Execution context and cooperative cancellation.
//!
//! # Responsibility
//! - Carry an optional trace id into log lines.
//! - Let callers and engine shutdown stop work between rows.
//!
//! # Invariants
//! - A `CancelSignal` only ever transitions from live to cancelled.
//! - Clones of one signal observe the same state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared one-way cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the signal.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-call context passed to every persistence operation.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    trace_id: Option<String>,
    cancel: CancelSignal,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
            cancel: CancelSignal::new(),
        }
    }

    /// Binds this context to an externally owned signal.
    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Trace id rendered for log lines (`-` when absent).
    pub fn trace_label(&self) -> &str {
        self.trace_id.as_deref().unwrap_or("-")
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::{CancelSignal, OperationContext};

    #[test]
    fn cancel_transitions_exactly_once() {
        let signal = CancelSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_cancelled());
        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(observer.is_cancelled());
    }

    #[test]
    fn context_observes_bound_signal() {
        let signal = CancelSignal::new();
        let ctx = OperationContext::with_trace_id("req-1").with_cancel_signal(signal.clone());
        assert_eq!(ctx.trace_label(), "req-1");
        assert!(!ctx.is_cancelled());
        signal.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(OperationContext::new().trace_label(), "-");
    }
}
