//! Falsification Tests: Category F - Transaction Boundaries (F029-F033)
//!
//! Claims: a unit of work finishes exactly once, nested units are strictly
//! scoped, and ending a unit restores the context it started from.

use periscope_core::{AgentContext, TransactionKind};
use periscope_shim::{Function, RecordSpec, Target, TransactionShim, Value};
use periscope_test::AgentHarness;
use periscope_test::fixtures::yield_once;

fn units(harness: &AgentHarness) -> TransactionShim {
    harness
        .shim("transaction", "mockqueue")
        .as_transaction()
        .cloned()
        .unwrap()
}

/// F029: Ending a unit twice finishes it once
#[test]
fn f029_double_end_finishes_once() {
    let harness = AgentHarness::new();
    let shim = units(&harness);

    let handle = shim.start_transaction("job").unwrap();
    assert!(shim.end_transaction(&handle));
    assert!(!shim.end_transaction(&handle), "F029 FALSIFIED: second end succeeded");

    assert_eq!(harness.sink().len(), 1, "F029 FALSIFIED: finished twice");
    assert_eq!(harness.misuse_count(), 1);
}

/// F030: Work inside a nested unit is recorded under the nested segment
///
/// # Falsification Attempt
/// Start outer, start inner, call wrapped code, end both; two transactions
/// or a call segment outside the inner unit refutes.
#[test]
fn f030_nested_unit_scopes_work() {
    let harness = AgentHarness::new();
    let shim = units(&harness);
    let lib = Target::new("lib").with("step", Function::sync("step", 0, |_| Ok(Value::Undefined)));
    shim.wrap(&lib, "step", &RecordSpec::named("Custom/step"));

    let outer = shim.start_transaction("batch").unwrap();
    let inner = shim.start_transaction("item").unwrap();
    let _ = lib.call_method("step", vec![]);
    assert!(shim.end_transaction(&inner));
    assert!(shim.end_transaction(&outer));

    let trace = harness.single("OtherTransaction/Custom/batch").unwrap();
    assert_eq!(harness.sink().len(), 1, "F030 FALSIFIED: nested unit became a transaction");
    let nested = trace.segments_named("Nested/item")[0];
    let step = trace.segments_named("Custom/step")[0];
    assert_eq!(step.parent, Some(nested.id), "F030 FALSIFIED: work escaped the nested unit");
}

/// F031: Ending the outer unit while the inner one is current is refused
#[test]
fn f031_outer_end_while_inner_current_is_refused() {
    let harness = AgentHarness::new();
    let shim = units(&harness);

    let outer = shim.start_transaction("batch").unwrap();
    let inner = shim.start_transaction("item").unwrap();

    assert!(!shim.end_transaction(&outer), "F031 FALSIFIED: outer ended under inner");
    assert!(outer.transaction().is_active());
    assert_eq!(harness.misuse_count(), 1);

    assert!(shim.end_transaction(&inner));
    assert!(shim.end_transaction(&outer));
    assert!(harness.agent().current_context().is_empty());
}

/// F032: With nesting off an inner unit is its own transaction
#[test]
fn f032_nesting_disabled_starts_separate_transactions() {
    let harness = AgentHarness::builder().nest_transactions(false).build();
    let shim = units(&harness);

    let outer = shim.start_transaction("batch").unwrap();
    let inner = shim.start_transaction("item").unwrap();
    assert!(shim.end_transaction(&inner));
    assert_eq!(
        harness.agent().current_transaction().map(|t| t.id()),
        Some(outer.transaction().id()),
        "F032 FALSIFIED: outer context not restored"
    );
    assert!(shim.end_transaction(&outer));

    assert_eq!(harness.sink().len(), 2, "F032 FALSIFIED");
    harness.single("OtherTransaction/Custom/item").unwrap();
}

/// F033: A call wrapped to create a transaction finishes it on settle
#[tokio::test(flavor = "current_thread")]
async fn f033_created_transaction_ends_on_settle() {
    let harness = AgentHarness::new();
    let shim = units(&harness);
    let worker = Target::new("Worker").with(
        "process",
        Function::future("process", 1, |_| async {
            yield_once().await;
            Ok(Value::from("done"))
        }),
    );
    shim.bind_create_transaction(&worker, "process", TransactionKind::Background);

    let outcome = worker.call_method("process", vec![]);
    assert!(harness.sink().is_empty(), "F033 FALSIFIED: finished before settling");
    assert!(harness.agent().current_transaction().is_none());

    assert_eq!(outcome.settle().await.unwrap(), Value::from("done"));
    harness.single("OtherTransaction/Custom/process").unwrap();
}
