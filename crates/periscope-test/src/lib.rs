// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # periscope-test
//!
//! Testing infrastructure for the Periscope instrumentation core.
//!
//! This crate provides:
//! - **Agent harness**: an in-process agent wired to a recording sink and a
//!   shim factory
//! - **Mock libraries**: a SQL client, a message broker, a promise library
//!   and a web router, each with its instrumentation
//! - **Fault injection**: namers and extractors that fail or panic on demand
//! - **Falsification tests**: tests that try to refute the behavioural
//!   claims of the shim layer
//!
//! ## Example
//!
//! ```rust
//! use periscope_test::AgentHarness;
//! use periscope_test::fixtures::{MockApp, router};
//!
//! let harness = AgentHarness::new();
//! let shim = harness.shim("web-framework", "mock-router");
//! let app = MockApp::new();
//! router::instrument(shim.as_web_framework().unwrap(), app.target());
//!
//! let (response, _) = app.request("GET", "/missing");
//! assert_eq!(response.status(), Some(404));
//! assert!(harness.single("WebTransaction/MockRouter/GET/(not found)").is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod error;
pub mod fixtures;
pub mod harness;

pub use chaos::{Fault, FaultConfig, FaultInjector};
pub use error::{Result, TestError};
pub use harness::{AgentHarness, AgentHarnessBuilder, RecordingSink};
