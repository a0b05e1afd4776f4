//! Fault injection for fail-open testing.
//!
//! Instrumentation closures (namers, extractors, route parsers) are written
//! by script authors and can fail in any way. The injector hands out closures
//! that fail on demand, so tests can verify that monitored calls never notice.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use periscope_core::{Result, ShimError};
use periscope_shim::ArgView;

/// How an injected closure fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Returns an error.
    Error,
    /// Panics.
    Panic,
}

/// Failure schedule for injected closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultConfig {
    /// Failure mode.
    pub fault: Fault,
    /// Fail every n-th call (1 fails every call).
    pub every: u64,
}

impl FaultConfig {
    /// Every call returns an error.
    #[must_use]
    pub const fn errors() -> Self {
        Self {
            fault: Fault::Error,
            every: 1,
        }
    }

    /// Every call panics.
    #[must_use]
    pub const fn panics() -> Self {
        Self {
            fault: Fault::Panic,
            every: 1,
        }
    }

    /// Fails only every n-th call.
    #[must_use]
    pub const fn every(mut self, n: u64) -> Self {
        self.every = if n == 0 { 1 } else { n };
        self
    }
}

/// Produces failing instrumentation closures and counts injected faults.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    config: FaultConfig,
    calls: Arc<AtomicU64>,
    injected: Arc<AtomicU64>,
}

impl FaultInjector {
    /// Creates an injector.
    #[must_use]
    pub fn new(config: FaultConfig) -> Self {
        Self {
            config,
            calls: Arc::new(AtomicU64::new(0)),
            injected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the number of faults injected so far.
    #[must_use]
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    /// Returns the number of times an injected closure ran.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// A segment namer that fails on schedule and otherwise returns `name`.
    pub fn namer(&self, name: &str) -> impl Fn(&ArgView<'_>) -> Result<String> + Send + Sync + 'static {
        let injector = self.clone();
        let name = name.to_string();
        move |_| injector.maybe_fail().map(|()| name.clone())
    }

    /// Wraps an extractor so it fails on schedule.
    pub fn extractor<T, E>(&self, inner: E) -> impl Fn(&ArgView<'_>) -> Result<T> + Send + Sync + 'static
    where
        E: Fn(&ArgView<'_>) -> Result<T> + Send + Sync + 'static,
    {
        let injector = self.clone();
        move |args| {
            injector.maybe_fail()?;
            inner(args)
        }
    }

    #[allow(clippy::panic)] // Panicking is the injected fault
    fn maybe_fail(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if call % self.config.every.max(1) != 0 {
            return Ok(());
        }
        self.injected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(call, fault = ?self.config.fault, "injecting fault");
        match self.config.fault {
            Fault::Error => Err(ShimError::instrumentation("injected fault")),
            Fault::Panic => panic!("injected fault"),
        }
    }
}
