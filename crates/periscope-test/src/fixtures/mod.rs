//! Mock libraries.
//!
//! Each fixture models the call surface of one kind of third-party library
//! as a [`Target`](periscope_shim::Target), plus an `instrument` function
//! playing the part of that library's instrumentation script.

pub mod broker;
pub mod deferred;
pub mod router;
pub mod sql;

use std::future::Future;
use std::task::Poll;

pub use broker::MockBroker;
pub use deferred::MockPromise;
pub use router::{MockApp, MockResponse, MockRouter};
pub use sql::MockSqlClient;

/// Suspends once before completing, so concurrent futures interleave.
pub fn yield_once() -> impl Future<Output = ()> + Send {
    let mut yielded = false;
    futures::future::poll_fn(move |cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
}
