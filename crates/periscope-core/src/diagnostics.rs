//! Agent-internal diagnostics.
//!
//! Misuse and instrumentation failures are logged and retained here instead
//! of being raised to monitored code.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ShimError;

/// Classification of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// An instrumentation script called the API incorrectly.
    Misuse,
    /// Instrumentation bookkeeping failed while a wrapped call ran.
    Instrumentation,
}

/// A recorded diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Event classification.
    pub kind: DiagnosticKind,
    /// Module whose shim reported the event.
    pub module: String,
    /// Human-readable description.
    pub message: String,
}

impl Diagnostic {
    /// Creates a misuse diagnostic.
    #[must_use]
    pub fn misuse(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Misuse,
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates an instrumentation-failure diagnostic.
    #[must_use]
    pub fn instrumentation(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Instrumentation,
            module: module.into(),
            message: message.into(),
        }
    }

    /// Classifies an error raised by bookkeeping code.
    #[must_use]
    pub fn from_error(module: impl Into<String>, err: &ShimError) -> Self {
        if err.is_misuse() {
            Self::misuse(module, err.to_string())
        } else {
            Self::instrumentation(module, err.to_string())
        }
    }
}

/// Bounded store of recent diagnostics.
#[derive(Debug)]
pub struct Diagnostics {
    capacity: usize,
    events: Mutex<VecDeque<Diagnostic>>,
    total: AtomicU64,
}

impl Diagnostics {
    /// Creates a store retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            total: AtomicU64::new(0),
        }
    }

    /// Logs and retains a diagnostic, evicting the oldest when full.
    pub fn record(&self, diagnostic: Diagnostic) {
        tracing::warn!(
            module = %diagnostic.module,
            kind = ?diagnostic.kind,
            "{}",
            diagnostic.message
        );
        self.total.fetch_add(1, Ordering::Relaxed);

        if self.capacity == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(diagnostic);
    }

    /// Returns the retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.events.lock().iter().cloned().collect()
    }

    /// Returns the number of retained events of `kind`.
    #[must_use]
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.events.lock().iter().filter(|d| d.kind == kind).count()
    }

    /// Returns the number of events ever recorded.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Drops retained events. The lifetime total is kept.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
