//! Falsification Tests: Category E - Promise Chains (F026-F028)
//!
//! Claim: a continuation runs in the context it was attached in, never in
//! the context of whoever settles the chain.

use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::{AgentContext, Context, TransactionId, TransactionKind, context};
use periscope_shim::{Function, Value};
use periscope_test::AgentHarness;
use periscope_test::fixtures::{MockPromise, deferred};

fn instrumented(harness: &AgentHarness) -> MockPromise {
    let promise = MockPromise::new();
    let shim = harness.shim("promise", "mockpromise");
    deferred::instrument(shim.as_promise().unwrap(), promise.target());
    promise
}

fn observer(harness: &AgentHarness, seen: &Arc<Mutex<Vec<Option<TransactionId>>>>) -> Function {
    let agent = Arc::clone(harness.agent());
    let log = Arc::clone(seen);
    Function::sync("onFulfilled", 1, move |_| {
        log.lock().push(agent.current_transaction().map(|t| t.id()));
        Ok(Value::Undefined)
    })
}

/// F026: A continuation resumes the attaching transaction
///
/// # Falsification Attempt
/// Attach in transaction A, resolve from transaction B; running in B refutes.
#[test]
fn f026_continuation_resumes_attaching_transaction() {
    let harness = AgentHarness::new();
    let promise = instrumented(&harness);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let continuation = observer(&harness, &seen);

    let agent = harness.agent();
    let attaching = agent.start_transaction(TransactionKind::Web);
    {
        let _guard = context::enter(agent.id(), Context::from_segment(attaching.root()));
        let _ = promise.target().call_method("then", vec![continuation.into()]);
    }
    assert_eq!(promise.pending(), 1);
    harness.in_transaction(TransactionKind::Background, |_| promise.resolve(1_i64));
    agent.end_transaction(&attaching);

    assert_eq!(*seen.lock(), vec![Some(attaching.id())], "F026 FALSIFIED");
    assert!(agent.current_transaction().is_none(), "F026 FALSIFIED: context leaked");
}

/// F027: A continuation attached outside any transaction inherits none
#[test]
fn f027_continuation_does_not_inherit_resolver() {
    let harness = AgentHarness::new();
    let promise = instrumented(&harness);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let continuation = observer(&harness, &seen);

    let _ = promise.target().call_method("then", vec![continuation.into()]);
    harness.in_transaction(TransactionKind::Web, |_| promise.resolve("late"));

    assert_eq!(*seen.lock(), vec![None], "F027 FALSIFIED: resolver context leaked");
}

/// F028: A future from a cast method runs in the caller's transaction
#[tokio::test(flavor = "current_thread")]
async fn f028_cast_future_runs_in_caller_context() {
    let harness = AgentHarness::new();
    let promise = instrumented(&harness);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probe = observer(&harness, &seen);
    let agent = Arc::clone(harness.agent());
    let tx = agent.start_transaction(TransactionKind::Background);

    let outcome = {
        let _guard = context::enter(agent.id(), Context::from_segment(tx.root()));
        promise.target().call_method("cast", vec![probe.into()])
    };
    assert!(agent.current_transaction().is_none());
    outcome.settle().await.unwrap();

    assert_eq!(*seen.lock(), vec![Some(tx.id())], "F028 FALSIFIED");
    agent.end_transaction(&tx);
}
