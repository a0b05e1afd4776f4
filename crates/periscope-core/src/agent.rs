//! Agent context: the collaborator shims talk to.
//!
//! [`AgentContext`] is the interface consumed by the shim layer. [`Agent`]
//! is the in-process implementation; finished transactions leave through a
//! [`TransactionSink`], which is where aggregation and transport plug in.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::AgentConfig;
use crate::context::{self, Context};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::stats::AgentStats;
use crate::transaction::{Segment, Transaction, TransactionTrace};
use crate::types::{AgentId, TransactionKind};

/// Receives transactions as they end.
pub trait TransactionSink: Send + Sync {
    /// Called exactly once per transaction, after it ended.
    fn finished(&self, trace: TransactionTrace);
}

/// Operations a shim needs from the agent.
pub trait AgentContext: Send + Sync {
    /// Returns the agent ID keying the ambient context slot.
    fn id(&self) -> AgentId;

    /// Returns the agent configuration.
    fn config(&self) -> &AgentConfig;

    /// Returns the current context on this thread.
    fn current_context(&self) -> Context {
        context::current(self.id())
    }

    /// Installs `context` and returns the previous one.
    fn set_current_context(&self, context: Context) -> Context {
        context::replace(self.id(), context)
    }

    /// Returns the current transaction, ignoring ended ones.
    fn current_transaction(&self) -> Option<Arc<Transaction>> {
        self.current_context()
            .transaction()
            .filter(|tx| tx.is_active())
            .cloned()
    }

    /// Returns the current segment, ignoring ended transactions.
    fn current_segment(&self) -> Option<Segment> {
        self.current_context()
            .segment()
            .filter(|segment| segment.transaction().is_active())
            .cloned()
    }

    /// Creates a segment under the current context.
    fn create_segment(&self, name: &str) -> Option<Segment> {
        let parent = self.current_segment()?;
        self.create_segment_under(&parent, name)
    }

    /// Creates a segment under an explicit parent.
    fn create_segment_under(&self, parent: &Segment, name: &str) -> Option<Segment>;

    /// Starts a new transaction. It does not become current by itself.
    fn start_transaction(&self, kind: TransactionKind) -> Arc<Transaction>;

    /// Ends a transaction and hands it to the sink.
    ///
    /// Returns false, and records a misuse, if it had already ended.
    fn end_transaction(&self, transaction: &Arc<Transaction>) -> bool;

    /// Records an agent-internal diagnostic.
    fn record_diagnostic(&self, diagnostic: Diagnostic);
}

/// In-process agent.
pub struct Agent {
    id: AgentId,
    config: AgentConfig,
    diagnostics: Diagnostics,
    stats: AgentStats,
    sink: RwLock<Option<Arc<dyn TransactionSink>>>,
}

impl Agent {
    /// Creates an agent with the given configuration.
    #[must_use]
    pub fn new(config: AgentConfig) -> Arc<Self> {
        let id = AgentId::next();
        tracing::info!(agent = %id, app = %config.app_name, "starting agent");
        Arc::new(Self {
            id,
            diagnostics: Diagnostics::new(config.diagnostics_capacity),
            config,
            stats: AgentStats::new(),
            sink: RwLock::new(None),
        })
    }

    /// Creates an agent that reports to `sink`.
    #[must_use]
    pub fn with_sink(config: AgentConfig, sink: Arc<dyn TransactionSink>) -> Arc<Self> {
        let agent = Self::new(config);
        agent.set_sink(sink);
        agent
    }

    /// Replaces the transaction sink.
    pub fn set_sink(&self, sink: Arc<dyn TransactionSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Returns the diagnostics store.
    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Returns supportability counters.
    #[must_use]
    pub const fn stats(&self) -> &AgentStats {
        &self.stats
    }
}

impl AgentContext for Agent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn create_segment_under(&self, parent: &Segment, name: &str) -> Option<Segment> {
        let transaction = parent.transaction();
        if !transaction.is_active() {
            return None;
        }
        match transaction.create_segment(name, parent.id()) {
            Some(segment) => {
                self.stats.record_segment_created();
                Some(segment)
            }
            None => {
                self.stats.record_segment_dropped();
                tracing::debug!(
                    transaction = %transaction.id(),
                    segment = name,
                    "segment limit reached"
                );
                None
            }
        }
    }

    fn start_transaction(&self, kind: TransactionKind) -> Arc<Transaction> {
        let transaction = Transaction::start(self.id, kind, self.config.max_segments);
        self.stats.record_transaction_started();
        tracing::debug!(transaction = %transaction.id(), ?kind, "transaction started");
        transaction
    }

    fn end_transaction(&self, transaction: &Arc<Transaction>) -> bool {
        if !transaction.end() {
            self.record_diagnostic(Diagnostic::misuse(
                "agent",
                format!("transaction {} already ended", transaction.id()),
            ));
            return false;
        }
        self.stats.record_transaction_finished();
        let trace = transaction.trace();
        tracing::debug!(
            transaction = %trace.id,
            name = %trace.name,
            segments = trace.segments.len(),
            "transaction ended"
        );
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.finished(trace);
        }
        true
    }

    fn record_diagnostic(&self, diagnostic: Diagnostic) {
        match diagnostic.kind {
            DiagnosticKind::Misuse => self.stats.record_misuse(),
            DiagnosticKind::Instrumentation => self.stats.record_instrumentation_failure(),
        }
        self.diagnostics.record(diagnostic);
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("app_name", &self.config.app_name)
            .finish_non_exhaustive()
    }
}
