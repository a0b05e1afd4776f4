//! Falsification Tests: Category B - Context Propagation (F011-F016, F046)
//!
//! Claims: at most one transaction is current per logical execution, and
//! continuations resume in the context they were bound to.

use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::{AgentContext, Context, SegmentStatus, TransactionKind, context};
use periscope_shim::{Function, RecordSpec, Target, Value};
use periscope_test::AgentHarness;
use periscope_test::fixtures::yield_once;
use proptest::prelude::*;

// =============================================================================
// F011: Isolation under interleaving
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// F011: Interleaved asynchronous transactions never observe each other
    ///
    /// # Falsification Attempt
    /// Run 1-6 transactions concurrently on one thread, each suspending a
    /// random number of times; any poll seeing a foreign transaction refutes.
    #[test]
    fn f011_interleaved_transactions_are_isolated(yields in proptest::collection::vec(1usize..5, 1..7)) {
        let harness = AgentHarness::new();
        let shim = harness.shim("generic", "worker");
        let agent = Arc::clone(harness.agent());
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

        let mut transactions = Vec::new();
        let mut tasks = Vec::new();
        for rounds in yields {
            let tx = agent.start_transaction(TransactionKind::Background);
            let context = Context::from_segment(tx.root());
            let expected = tx.id();
            let observer = Arc::clone(&agent);
            let task = async move {
                let mut isolated = true;
                for _ in 0..rounds {
                    isolated &= observer.current_transaction().map(|t| t.id()) == Some(expected);
                    yield_once().await;
                }
                isolated && observer.current_transaction().map(|t| t.id()) == Some(expected)
            };
            tasks.push(shim.bind_future_to(task, context));
            transactions.push(tx);
        }

        let results = runtime.block_on(futures::future::join_all(tasks));
        prop_assert!(results.iter().all(|isolated| *isolated), "F011 FALSIFIED: {results:?}");
        prop_assert!(agent.current_transaction().is_none(), "F011 FALSIFIED: context leaked");
        for tx in &transactions {
            agent.end_transaction(tx);
        }
    }
}

// =============================================================================
// F012-F014: Binding
// =============================================================================

/// F012: A bound callback resumes its transaction from outside any context
#[test]
fn f012_bound_callback_resumes_transaction() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "events");
    let agent = Arc::clone(harness.agent());
    let seen = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&seen);
    let observer = Arc::clone(&agent);
    let listener = Function::sync("onEvent", 0, move |_| {
        *slot.lock() = observer.current_transaction().map(|t| t.id());
        Ok(Value::Undefined)
    });

    let tx = agent.start_transaction(TransactionKind::Web);
    let bound = {
        let _guard = context::enter(agent.id(), Context::from_segment(tx.root()));
        shim.bind_context(&listener)
    };
    let _ = bound.invoke(vec![]);

    assert_eq!(*seen.lock(), Some(tx.id()), "F012 FALSIFIED");
    assert!(agent.current_transaction().is_none());
}

/// F013: Resuming an ended transaction runs in the empty context instead
#[test]
fn f013_ended_transaction_is_never_resumed() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "events");
    let agent = Arc::clone(harness.agent());
    let observer = Arc::clone(&agent);
    let listener = Function::sync("late", 0, move |_| {
        Ok(Value::from(observer.current_transaction().is_some()))
    });

    let tx = agent.start_transaction(TransactionKind::Web);
    let bound = shim.bind_to(&listener, Context::from_segment(tx.root()));
    agent.end_transaction(&tx);

    let saw = bound.invoke(vec![]).ready().unwrap().unwrap();
    assert_eq!(saw, Value::from(false), "F013 FALSIFIED: ended transaction resumed");
    assert_eq!(harness.misuse_count(), 1);
}

/// F014: The caller's context is restored after a wrapped call
#[test]
fn f014_wrapped_call_restores_context() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "lib");
    let lib = Target::new("lib").with("work", Function::sync("work", 0, |_| Ok(Value::Undefined)));
    shim.wrap(&lib, "work", &RecordSpec::named("Custom/work"));

    harness.in_transaction(TransactionKind::Background, |tx| {
        let before = harness.agent().current_segment().unwrap();
        let _ = lib.call_method("work", vec![]);
        let after = harness.agent().current_segment().unwrap();
        assert_eq!(before, after, "F014 FALSIFIED: segment leaked out of the call");
        assert_eq!(after, tx.root());
    });
}

// =============================================================================
// F015-F016: Segment lifetime
// =============================================================================

/// F015: An asynchronous segment ends when its future settles
#[tokio::test(flavor = "current_thread")]
async fn f015_async_segment_ends_on_settle() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "lib");
    let agent = Arc::clone(harness.agent());
    let tx = agent.start_transaction(TransactionKind::Background);

    let future = {
        let _guard = context::enter(agent.id(), Context::from_segment(tx.root()));
        shim.record_segment_async("Custom/fetch", None, async {
            yield_once().await;
            Ok::<_, String>(3)
        })
    };
    let trace = tx.trace();
    assert!(trace.segments_named("Custom/fetch")[0].end.is_none());

    assert_eq!(future.await, Ok(3));
    let trace = tx.trace();
    let record = trace.segments_named("Custom/fetch")[0];
    assert_eq!(record.status, SegmentStatus::Ok, "F015 FALSIFIED");
    assert!(record.end.is_some());
}

/// F016: Past the segment limit calls still run, unrecorded
#[test]
fn f016_segment_limit_fails_open() {
    let harness = AgentHarness::builder().max_segments(2).build();
    let shim = harness.shim("generic", "lib");
    let lib = Target::new("lib").with("work", Function::sync("work", 0, |_| Ok(Value::from(1_i64))));
    shim.wrap(&lib, "work", &RecordSpec::named("Custom/work"));

    harness.in_transaction(TransactionKind::Background, |tx| {
        for _ in 0..3 {
            let result = lib.call_method("work", vec![]).ready().unwrap();
            assert_eq!(result.unwrap(), Value::from(1_i64), "F016 FALSIFIED");
        }
        assert_eq!(tx.segments().len(), 2);
    });
    assert_eq!(harness.agent().stats().snapshot().segments_dropped, 2);
}

/// F046: Past the segment limit, a deferred callback still resumes the transaction
///
/// # Falsification Attempt
/// With room for the root segment only, hand a wrapped call a callback and
/// fire it after the caller has left; running outside the transaction refutes.
#[test]
fn f046_deferred_callback_survives_segment_limit() {
    let harness = AgentHarness::builder().max_segments(1).build();
    let shim = harness.shim("generic", "cache");
    let parked = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&parked);
    let cache = Target::new("cache").with(
        "get",
        Function::sync("get", 1, move |call| {
            *slot.lock() = call.arg(0).and_then(Value::as_function).cloned();
            Ok(Value::Undefined)
        }),
    );
    shim.wrap(&cache, "get", &RecordSpec::named("Cache/get"));

    let seen = Arc::new(Mutex::new(None));
    let agent = Arc::clone(harness.agent());
    let record = Arc::clone(&seen);
    let callback = Function::sync("onValue", 0, move |_| {
        *record.lock() = agent.current_transaction().map(|t| t.id());
        Ok(Value::Undefined)
    });

    let tx = harness.agent().start_transaction(TransactionKind::Web);
    {
        let _guard = context::enter(harness.agent().id(), Context::from_segment(tx.root()));
        let _ = cache.call_method("get", vec![callback.into()]);
    }
    assert!(harness.agent().current_transaction().is_none());

    let deferred = parked.lock().take().unwrap();
    let _ = deferred.invoke(vec![]);
    assert_eq!(*seen.lock(), Some(tx.id()), "F046 FALSIFIED: callback lost its transaction");
    assert_eq!(tx.segments().len(), 1);
    assert_eq!(harness.agent().stats().snapshot().segments_dropped, 1);
    harness.agent().end_transaction(&tx);
}
