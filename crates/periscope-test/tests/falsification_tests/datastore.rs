//! Falsification Tests: Category C - Data Access (F017-F021)
//!
//! Claims: every query produces one correctly named segment, with the
//! statement attached in normalized form only when configured to.

use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::{AgentContext, Context, SegmentStatus, TransactionKind, context};
use periscope_shim::{Function, Value};
use periscope_test::AgentHarness;
use periscope_test::fixtures::{MockSqlClient, sql};

fn instrumented(harness: &AgentHarness) -> MockSqlClient {
    let client = MockSqlClient::new();
    let shim = harness.shim("datastore", "mocksql");
    sql::instrument(shim.as_datastore().unwrap(), client.target());
    client
}

/// F017: A callback query is named after product, table and operation
///
/// # Falsification Attempt
/// Issue one callback query; a segment under any other name, a segment
/// still open after the callback, or a callback running anywhere but the
/// caller's context refutes.
#[test]
fn f017_callback_query_is_named_statement() {
    let harness = AgentHarness::new();
    let client = instrumented(&harness);
    let seen = Arc::new(Mutex::new(None));

    let agent = Arc::clone(harness.agent());
    let slot = Arc::clone(&seen);
    let callback = Function::sync("done", 2, move |_| {
        *slot.lock() = agent.current_segment().map(|s| s.id());
        Ok(Value::Undefined)
    });

    let caller = harness.in_transaction(TransactionKind::Web, |tx| {
        let _ = client
            .target()
            .call_method("query", vec!["SELECT * FROM users WHERE id = 1".into(), callback.into()]);
        let trace = tx.trace();
        let segments = trace.segments_named("Datastore/statement/MockSQL/users/select");
        assert_eq!(segments.len(), 1, "F017 FALSIFIED: {:?}", trace.segments);
        assert_eq!(segments[0].status, SegmentStatus::Ok, "F017 FALSIFIED: segment left open");
        tx.root().id()
    });
    assert_eq!(
        *seen.lock(),
        Some(caller),
        "F017 FALSIFIED: callback did not resume in the caller's context"
    );
}

/// F018: A future-returning query ends its segment on settle
#[tokio::test(flavor = "current_thread")]
async fn f018_async_query_ends_on_settle() {
    let harness = AgentHarness::new();
    let client = instrumented(&harness);
    let tx = harness.agent().start_transaction(TransactionKind::Background);

    let outcome = {
        let _guard = context::enter(harness.agent().id(), Context::from_segment(tx.root()));
        client
            .target()
            .call_method("query_async", vec!["INSERT INTO orders VALUES (7)".into()])
    };
    assert!(outcome.is_pending());
    let name = "Datastore/statement/MockSQL/orders/insert";
    assert!(tx.trace().segments_named(name)[0].end.is_none());

    outcome.settle().await.unwrap();
    let trace = tx.trace();
    assert_eq!(trace.segments_named(name)[0].status, SegmentStatus::Ok, "F018 FALSIFIED");
}

/// F019: Recorded statements never carry literals
#[test]
fn f019_recorded_sql_is_normalized() {
    let harness = AgentHarness::new();
    let client = instrumented(&harness);

    harness.in_transaction(TransactionKind::Web, |tx| {
        let _ = client.target().call_method(
            "query",
            vec!["UPDATE accounts SET balance = 100 WHERE owner = 'ada'".into()],
        );
        let trace = tx.trace();
        let record = trace.segments_named("Datastore/statement/MockSQL/accounts/update")[0];
        let sql = record.attributes["sql"].as_str().unwrap();
        assert!(!sql.contains("100"), "F019 FALSIFIED: numeric literal kept: {sql}");
        assert!(!sql.contains("ada"), "F019 FALSIFIED: string literal kept: {sql}");
    });
    assert_eq!(client.executed()[0], "UPDATE accounts SET balance = 100 WHERE owner = 'ada'");
}

/// F020: With query recording off no statement text is attached
#[test]
fn f020_record_queries_off_attaches_nothing() {
    let harness = AgentHarness::from_toml(
        r#"
        app_name = "falsification"

        [datastore]
        record_queries = false
        "#,
    )
    .unwrap();
    let client = instrumented(&harness);

    harness.in_transaction(TransactionKind::Web, |tx| {
        let _ = client.target().call_method("query", vec!["SELECT 1 FROM t".into()]);
        let trace = tx.trace();
        let record = trace.segments_named("Datastore/statement/MockSQL/t/select")[0];
        assert!(!record.attributes.contains_key("sql"), "F020 FALSIFIED");
        assert_eq!(record.attributes["operation"], "select");
    });
}

/// F021: A failed query is recorded as an error and the error reaches the caller
#[test]
fn f021_failed_query_marks_segment() {
    let harness = AgentHarness::new();
    let client = instrumented(&harness);

    harness.in_transaction(TransactionKind::Web, |tx| {
        let result = client
            .target()
            .call_method("query", vec!["SELECT FAIL FROM t".into()])
            .ready()
            .unwrap();
        assert_eq!(result.unwrap_err().message(), "syntax error", "F021 FALSIFIED");
        let trace = tx.trace();
        let record = trace.segments_named("Datastore/statement/MockSQL/t/select")[0];
        assert_eq!(record.status, SegmentStatus::Error, "F021 FALSIFIED");
    });
    harness.assert_clean().unwrap();
}
