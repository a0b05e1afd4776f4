// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! Periscope: Instrumentation Shim Core
//!
//! The part of an APM agent that library instrumentation talks to: wrap a
//! library's entry points, record each call as a segment of the current
//! transaction, and keep that transaction current across callbacks and
//! futures.
//!
//! # Quick Start
//!
//! ```rust
//! use periscope::prelude::*;
//!
//! let agent = Agent::new(AgentConfig::default());
//! let factory = ShimFactory::new(agent.clone());
//! let shim = factory.shim_for("datastore", "pg", "pg");
//! assert_eq!(shim.category(), Category::Datastore);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use periscope_core as core;
pub use periscope_shim as shim;

use tracing_subscriber::EnvFilter;

/// Prelude module for common imports.
pub mod prelude {
    pub use periscope_core::{
        Agent, AgentConfig, AgentContext, Context, MetricTable, Segment, SegmentStatus, ShimError,
        Transaction, TransactionKind, TransactionSink, TransactionTrace, context,
    };
    pub use periscope_shim::{
        Call, CallbackPosition, Category, DatastoreShim, Function, InstrumentationShim,
        MessageDescriptor, MessagingShim, Outcome, PromiseShim, QueryDescriptor, RecordSpec, Shim,
        ShimFactory, Target, TransactionShim, Value, WebFrameworkShim, create_shim,
    };
}

/// Installs a formatting subscriber for agent logs.
///
/// `RUST_LOG` wins over `default_filter` when set. Returns false if a
/// global subscriber was already installed.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
