// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # periscope-core
//!
//! Agent-side primitives for the Periscope instrumentation core.
//!
//! This crate provides:
//!
//! - [`AgentContext`], the interface shims use to reach the agent, and
//!   [`Agent`], its in-process implementation
//! - [`Transaction`] and [`Segment`], the unit of monitored work and its
//!   timed spans
//! - [`Context`], the ambient transaction/segment pair with explicit
//!   save/restore discipline
//! - [`Diagnostics`] for misuse and instrumentation failures that must never
//!   reach monitored code
//! - [`MetricTable`] for scoped/unscoped metrics derived from traces
//!
//! ## Example
//!
//! ```rust
//! use periscope_core::{Agent, AgentConfig, AgentContext, Context, TransactionKind, context};
//!
//! let agent = Agent::new(AgentConfig::default());
//! let tx = agent.start_transaction(TransactionKind::Background);
//! {
//!     let _guard = context::enter(agent.id(), Context::from_segment(tx.root()));
//!     let segment = agent.create_segment("Custom/work").unwrap();
//!     segment.end();
//! }
//! assert!(agent.end_transaction(&tx));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod stats;
pub mod transaction;
pub mod types;

pub use agent::{Agent, AgentContext, TransactionSink};
pub use config::{AgentConfig, DatastoreConfig, ModuleConfig};
pub use context::{Context, ContextGuard};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{Result, ShimError};
pub use metrics::{MetricData, MetricKey, MetricTable};
pub use stats::{AgentStats, StatsSnapshot};
pub use transaction::{Segment, SegmentRecord, Transaction, TransactionTrace};
pub use types::{
    AgentId, SegmentId, SegmentStatus, TransactionId, TransactionKind, TransactionState,
};
