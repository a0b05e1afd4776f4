//! Agent test harness.
//!
//! Wires an in-process [`Agent`] to a [`RecordingSink`] and a
//! [`ShimFactory`], so tests can load instrumentation, drive a mock library
//! and inspect the transactions that came out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::{
    Agent, AgentConfig, AgentContext, Context, DiagnosticKind, MetricTable, ModuleConfig,
    Transaction, TransactionKind, TransactionSink, TransactionTrace, context,
};
use periscope_shim::{InstrumentationShim, ShimFactory};

use crate::error::{Result, TestError};

/// Sink that keeps every finished transaction.
#[derive(Debug, Default)]
pub struct RecordingSink {
    traces: Mutex<Vec<TransactionTrace>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all finished transactions in completion order.
    #[must_use]
    pub fn traces(&self) -> Vec<TransactionTrace> {
        self.traces.lock().clone()
    }

    /// Returns finished transactions with the given name.
    #[must_use]
    pub fn named(&self, name: &str) -> Vec<TransactionTrace> {
        self.traces
            .lock()
            .iter()
            .filter(|t| t.name == name)
            .cloned()
            .collect()
    }

    /// Returns the number of finished transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.lock().len()
    }

    /// Returns true if nothing has finished.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.lock().is_empty()
    }

    /// Derives metrics over every finished transaction.
    #[must_use]
    pub fn metrics(&self) -> MetricTable {
        let mut table = MetricTable::new();
        for trace in self.traces.lock().iter() {
            table.merge(&MetricTable::from_trace(trace));
        }
        table
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.traces.lock().clear();
    }
}

impl TransactionSink for RecordingSink {
    fn finished(&self, trace: TransactionTrace) {
        tracing::trace!(name = %trace.name, "recorded transaction");
        self.traces.lock().push(trace);
    }
}

/// Test harness around one agent.
#[derive(Debug)]
pub struct AgentHarness {
    agent: Arc<Agent>,
    sink: Arc<RecordingSink>,
    factory: ShimFactory,
}

impl AgentHarness {
    /// Creates a new harness builder.
    #[must_use]
    pub fn builder() -> AgentHarnessBuilder {
        AgentHarnessBuilder::default()
    }

    /// Creates a harness with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a harness from a TOML configuration document.
    ///
    /// # Errors
    /// Returns an error if the document is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(Self::builder().with_config(AgentConfig::from_toml_str(content)?).build())
    }

    /// Creates a harness from a TOML configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::builder().with_config(AgentConfig::load(path)?).build())
    }

    /// Returns the agent.
    #[must_use]
    pub const fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Returns the agent as the interface shims see.
    #[must_use]
    pub fn context(&self) -> Arc<dyn AgentContext> {
        Arc::clone(&self.agent) as Arc<dyn AgentContext>
    }

    /// Returns the sink.
    #[must_use]
    pub const fn sink(&self) -> &Arc<RecordingSink> {
        &self.sink
    }

    /// Returns the shim factory.
    #[must_use]
    pub const fn factory(&self) -> &ShimFactory {
        &self.factory
    }

    /// Loads a shim for `module` as the module loader would.
    #[must_use]
    pub fn shim(&self, tag: &str, module: &str) -> InstrumentationShim {
        self.factory.shim_for(tag, module, module)
    }

    /// Runs `work` inside a fresh transaction of `kind` and ends it.
    pub fn in_transaction<T>(&self, kind: TransactionKind, work: impl FnOnce(&Arc<Transaction>) -> T) -> T {
        let transaction = self.agent.start_transaction(kind);
        let output = {
            let _guard = context::enter(self.agent.id(), Context::from_segment(transaction.root()));
            work(&transaction)
        };
        if transaction.is_active() {
            self.agent.end_transaction(&transaction);
        }
        output
    }

    /// Returns the only finished transaction named `name`.
    ///
    /// # Errors
    /// Returns an error unless exactly one such transaction finished.
    pub fn single(&self, name: &str) -> Result<TransactionTrace> {
        let mut matching = self.sink.named(name);
        match matching.len() {
            1 => Ok(matching.remove(0)),
            n => Err(TestError::assertion(format!(
                "expected 1 transaction named {name}, found {n} (have: {:?})",
                self.sink.traces().iter().map(|t| t.name.clone()).collect::<Vec<_>>()
            ))),
        }
    }

    /// Returns the number of recorded misuse diagnostics.
    #[must_use]
    pub fn misuse_count(&self) -> usize {
        self.agent.diagnostics().count(DiagnosticKind::Misuse)
    }

    /// Returns the number of recorded instrumentation failures.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.agent.diagnostics().count(DiagnosticKind::Instrumentation)
    }

    /// Fails if any diagnostic was recorded.
    ///
    /// # Errors
    /// Returns an assertion error listing the diagnostics.
    pub fn assert_clean(&self) -> Result<()> {
        let diagnostics = self.agent.diagnostics().snapshot();
        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(TestError::assertion(format!(
                "unexpected diagnostics: {:?}",
                diagnostics.iter().map(|d| d.message.clone()).collect::<Vec<_>>()
            )))
        }
    }
}

impl Default for AgentHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`AgentHarness`].
#[derive(Default)]
pub struct AgentHarnessBuilder {
    config: Option<AgentConfig>,
    disabled: Vec<String>,
    nest_transactions: Option<bool>,
    max_segments: Option<usize>,
}

impl AgentHarnessBuilder {
    /// Starts from `config` instead of the defaults.
    #[must_use]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Turns instrumentation for `module` off.
    #[must_use]
    pub fn disable_module(mut self, module: impl Into<String>) -> Self {
        self.disabled.push(module.into());
        self
    }

    /// Sets whether transactions nest.
    #[must_use]
    pub const fn nest_transactions(mut self, nest: bool) -> Self {
        self.nest_transactions = Some(nest);
        self
    }

    /// Caps segments per transaction.
    #[must_use]
    pub const fn max_segments(mut self, max: usize) -> Self {
        self.max_segments = Some(max);
        self
    }

    /// Builds the harness.
    #[must_use]
    pub fn build(self) -> AgentHarness {
        let mut config = self.config.unwrap_or_default();
        if let Some(nest) = self.nest_transactions {
            config.nest_transactions = nest;
        }
        if let Some(max) = self.max_segments {
            config.max_segments = max;
        }
        let disabled: HashMap<String, ModuleConfig> = self
            .disabled
            .into_iter()
            .map(|module| (module, ModuleConfig { enabled: false }))
            .collect();
        config.instrumentation.extend(disabled);

        let sink = Arc::new(RecordingSink::new());
        let agent = Agent::with_sink(config, Arc::clone(&sink) as Arc<dyn TransactionSink>);
        let factory = ShimFactory::new(Arc::clone(&agent) as Arc<dyn AgentContext>);
        AgentHarness {
            agent,
            sink,
            factory,
        }
    }
}
