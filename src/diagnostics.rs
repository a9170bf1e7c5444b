//! Diagnostic output for misconfiguration and rejected log input.
//!
//! Diagnostics are one-way and never fatal: the logger reports what went
//! wrong and carries on.

use std::sync::{Arc, Mutex};

use tracing::warn;

/// A one-way text sink for local diagnostic messages.
pub trait DiagnosticSink: Send + Sync {
    /// Emit a single diagnostic message.
    fn emit(&self, message: &str);
}

/// Forwards diagnostics to `tracing` at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn emit(&self, message: &str) {
        warn!(target: "sumo_logger::diagnostics", "{}", message);
    }
}

/// Keeps every diagnostic in memory. Useful for hosts that surface
/// diagnostics in their own UI, and for tests.
#[derive(Debug, Clone, Default)]
pub struct CollectingDiagnostics {
    messages: Arc<Mutex<Vec<String>>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the messages emitted so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for CollectingDiagnostics {
    fn emit(&self, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}
