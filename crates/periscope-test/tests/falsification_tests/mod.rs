//! Popperian Falsification Tests for Periscope
//!
//! # Reference
//! Popper, K. (1959). *The Logic of Scientific Discovery*. Routledge.
//!
//! Each test in this module attempts to falsify a specific claim about the
//! shim layer. A passing test means the claim survived the falsification
//! attempt.

// Allow test-specific patterns that are denied in production code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::needless_borrows_for_generic_args)]

mod context;
mod datastore;
mod factory;
mod messaging;
mod promise;
mod transaction;
mod web;
mod wrapping;
