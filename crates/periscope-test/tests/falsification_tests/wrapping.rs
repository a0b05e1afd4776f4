//! Falsification Tests: Category A - Wrapping (F001-F010)
//!
//! Claims: wrapping is idempotent, invisible to monitored code, and fails
//! open.

use periscope_core::{SegmentStatus, TransactionKind};
use periscope_shim::{Function, RecordSpec, Shape, Target, Value};
use periscope_test::{AgentHarness, FaultConfig, FaultInjector};
use serde_json::json;

fn library() -> Target {
    Target::new("fs")
        .with(
            "read",
            Function::sync("read", 2, |call| {
                Ok(call.arg(0).cloned().unwrap_or_default())
            })
            .with_prop("length", json!(2)),
        )
        .with(
            "fail",
            Function::sync("fail", 0, |_| Err(periscope_shim::CallError::new("EACCES"))),
        )
}

// =============================================================================
// F001-F003: Idempotence and shape
// =============================================================================

/// F001: Wrapping the same property twice produces one wrapper
///
/// # Falsification Attempt
/// Wrap twice, call once; more than one segment or a changed wrapper refutes.
#[test]
fn f001_double_wrap_is_idempotent() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "fs");
    let fs = library();

    shim.wrap(&fs, "read", &RecordSpec::named("Filesystem/read"));
    let first = fs.function("read").unwrap();
    shim.wrap(&fs, "read", &RecordSpec::named("Filesystem/read"));
    let second = fs.function("read").unwrap();

    assert_eq!(first.id(), second.id(), "F001 FALSIFIED: second wrap replaced the wrapper");

    harness.in_transaction(TransactionKind::Background, |tx| {
        let _ = fs.call_method("read", vec!["/etc/hosts".into()]);
        assert_eq!(
            tx.trace().segments_named("Filesystem/read").len(),
            1,
            "F001 FALSIFIED: one call produced several segments"
        );
    });
}

/// F002: A wrapper is indistinguishable from the original by shape
#[test]
fn f002_wrapper_preserves_shape() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "fs");
    let fs = library();
    let shape = Shape::of(&fs.function("read").unwrap());

    shim.wrap(&fs, "read", &RecordSpec::from_function());
    let wrapped = fs.function("read").unwrap();

    assert!(
        shape.matches(&wrapped),
        "F002 FALSIFIED: wrapper changed name, arity or properties"
    );
    assert_eq!(wrapped.prop("length"), Some(&json!(2)));
}

/// F003: Wrapping an absent path leaves the target alone and is diagnosed
#[test]
fn f003_absent_path_is_misuse_not_error() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "fs");
    let fs = library();
    let keys = fs.keys();

    shim.wrap(&fs, "missing.deeply", &RecordSpec::from_function());

    assert_eq!(fs.keys(), keys, "F003 FALSIFIED: target was modified");
    assert_eq!(harness.misuse_count(), 1, "F003 FALSIFIED: misuse not diagnosed");
}

// =============================================================================
// F004-F005: Transparency
// =============================================================================

/// F004: Outside a transaction a wrapped call behaves exactly as the original
#[test]
fn f004_no_transaction_no_segment() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "fs");
    let fs = library();
    shim.wrap(&fs, "read", &RecordSpec::from_function());

    let result = fs.call_method("read", vec!["a".into()]).ready().unwrap();

    assert_eq!(result.unwrap(), Value::from("a"));
    assert_eq!(harness.agent().stats().snapshot().segments_created, 0);
    harness.assert_clean().unwrap();
}

/// F005: Unwrapping restores the original function
#[test]
fn f005_unwrap_restores_original() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "fs");
    let fs = library();
    let original = fs.function("read").unwrap();

    shim.wrap(&fs, "read", &RecordSpec::from_function());
    assert!(shim.is_wrapped(&fs, "read"));
    assert_eq!(shim.unwrap(&fs, "read"), 1);

    assert_eq!(fs.function("read").unwrap().id(), original.id(), "F005 FALSIFIED");
    assert!(!shim.is_wrapped(&fs, "read"));
}

// =============================================================================
// F006-F008: Fail open
// =============================================================================

/// F006: A namer returning an error never reaches monitored code
#[test]
fn f006_failing_namer_fails_open() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "fs");
    let fs = library();
    let injector = FaultInjector::new(FaultConfig::errors());
    shim.wrap(&fs, "read", &RecordSpec::dynamic(injector.namer("Filesystem/read")));

    harness.in_transaction(TransactionKind::Background, |tx| {
        let result = fs.call_method("read", vec!["x".into()]).ready().unwrap();
        assert_eq!(result.unwrap(), Value::from("x"), "F006 FALSIFIED: result changed");
        assert_eq!(tx.segments().len(), 1, "F006 FALSIFIED: segment recorded anyway");
    });
    assert_eq!(injector.injected(), 1);
    assert_eq!(harness.failure_count(), 1);
}

/// F007: A panicking namer never reaches monitored code
#[test]
fn f007_panicking_namer_fails_open() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "fs");
    let fs = library();
    let injector = FaultInjector::new(FaultConfig::panics());
    shim.wrap(&fs, "read", &RecordSpec::dynamic(injector.namer("Filesystem/read")));

    harness.in_transaction(TransactionKind::Background, |_| {
        let result = fs.call_method("read", vec!["y".into()]).ready().unwrap();
        assert_eq!(result.unwrap(), Value::from("y"), "F007 FALSIFIED: panic escaped");
    });
    assert_eq!(harness.failure_count(), 1);
}

/// F008: A disabled module wraps nothing
#[test]
fn f008_disabled_module_is_noop() {
    let harness = AgentHarness::builder().disable_module("fs").build();
    let shim = harness.shim("generic", "fs");
    let fs = library();
    let original = fs.function("read").unwrap();

    shim.wrap(&fs, "read", &RecordSpec::from_function());

    assert_eq!(fs.function("read").unwrap().id(), original.id(), "F008 FALSIFIED");
    assert_eq!(shim.wrapped_count(), 0);
}

// =============================================================================
// F009-F010: Recording
// =============================================================================

/// F009: N calls produce N segments and a call count of N
#[test]
fn f009_call_count_matches_calls() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "fs");
    let fs = library();
    shim.wrap(&fs, "read", &RecordSpec::named("Filesystem/read"));

    harness.in_transaction(TransactionKind::Background, |tx| {
        tx.set_name("OtherTransaction/Custom/batch");
        for i in 0..7_i64 {
            let _ = fs.call_method("read", vec![i.into()]);
        }
    });

    let metrics = harness.sink().metrics();
    assert_eq!(metrics.unscoped_count("Filesystem/read"), 7, "F009 FALSIFIED");
    assert_eq!(
        metrics.scoped_count("Filesystem/read", "OtherTransaction/Custom/batch"),
        7
    );
}

/// F010: Errors from the original propagate unchanged and mark the segment
#[test]
fn f010_errors_propagate_unchanged() {
    let harness = AgentHarness::new();
    let shim = harness.shim("generic", "fs");
    let fs = library();
    shim.wrap(&fs, "fail", &RecordSpec::from_function());

    harness.in_transaction(TransactionKind::Background, |tx| {
        let result = fs.call_method("fail", vec![]).ready().unwrap();
        assert_eq!(result.unwrap_err().message(), "EACCES", "F010 FALSIFIED");
        let trace = tx.trace();
        assert_eq!(trace.segments_named("fail")[0].status, SegmentStatus::Error);
    });
}
