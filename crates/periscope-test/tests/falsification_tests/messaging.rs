//! Falsification Tests: Category D - Messaging (F022-F025)
//!
//! Claims: produce and pull-consume calls are segments named after their
//! destination, and every push delivery is a transaction of its own.

use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::{AgentContext, SegmentStatus, TransactionKind};
use periscope_shim::{Function, Value};
use periscope_test::AgentHarness;
use periscope_test::fixtures::{MockBroker, broker};
use serde_json::json;

fn instrumented(harness: &AgentHarness) -> MockBroker {
    let channel = MockBroker::new();
    let shim = harness.shim("messaging", "mockmq");
    broker::instrument(shim.as_messaging().unwrap(), channel.target());
    channel
}

fn publish(channel: &MockBroker, exchange: &str, key: &str, body: serde_json::Value) {
    let _ = channel
        .target()
        .call_method("publish", vec![exchange.into(), key.into(), body.into()]);
}

/// F022: Publishing is a produce segment named after the exchange
#[test]
fn f022_produce_segment_names_exchange() {
    let harness = AgentHarness::new();
    let channel = instrumented(&harness);

    harness.in_transaction(TransactionKind::Web, |tx| {
        publish(&channel, "orders", "created", json!({ "id": 9 }));
        let trace = tx.trace();
        let segments = trace.segments_named("MessageBroker/MockMQ/Exchange/Produce/Named/orders");
        assert_eq!(segments.len(), 1, "F022 FALSIFIED: {:?}", trace.segments);
        assert_eq!(segments[0].attributes["routing_key"], "created");
    });
    assert_eq!(channel.depth("created"), 1, "F022 FALSIFIED: message lost");
}

/// F023: A pull receive is a consume segment ended by its callback
#[test]
fn f023_pull_consume_segment() {
    let harness = AgentHarness::new();
    let channel = instrumented(&harness);
    publish(&channel, "", "jobs", json!("resize"));
    let received = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&received);
    let callback = Function::sync("onMessage", 2, move |call| {
        *slot.lock() = call.arg(1).and_then(Value::as_data).cloned();
        Ok(Value::Undefined)
    });

    harness.in_transaction(TransactionKind::Background, |tx| {
        let _ = channel
            .target()
            .call_method("get", vec!["jobs".into(), callback.into()]);
        let trace = tx.trace();
        let record = trace.segments_named("MessageBroker/MockMQ/Queue/Consume/Named/jobs")[0];
        assert_eq!(record.status, SegmentStatus::Ok, "F023 FALSIFIED");
    });
    assert_eq!(*received.lock(), Some(json!("resize")));
}

/// F024: Each push delivery starts and finishes one message transaction
///
/// # Falsification Attempt
/// Deliver three messages to a subscribed consumer outside any transaction;
/// anything but three finished message transactions refutes.
#[test]
fn f024_subscribed_deliveries_are_transactions() {
    let harness = AgentHarness::new();
    let channel = instrumented(&harness);
    let kinds = Arc::new(Mutex::new(Vec::new()));

    let agent = Arc::clone(harness.agent());
    let log = Arc::clone(&kinds);
    let consumer = Function::sync("onJob", 1, move |_| {
        log.lock().push(agent.current_transaction().map(|t| t.kind()));
        Ok(Value::Undefined)
    });
    let _ = channel
        .target()
        .call_method("consume", vec!["jobs".into(), consumer.into()]);

    for n in 0..3_i64 {
        publish(&channel, "", "jobs", json!(n));
    }
    assert_eq!(channel.deliver("jobs"), 3);

    assert_eq!(
        *kinds.lock(),
        vec![Some(TransactionKind::Message); 3],
        "F024 FALSIFIED: a delivery ran outside a message transaction"
    );
    let finished = harness.sink().named("OtherTransaction/Message/MockMQ/Queue/Named/jobs");
    assert_eq!(finished.len(), 3, "F024 FALSIFIED");
    assert_eq!(finished[0].attributes["message.destination"], "jobs");
    assert!(harness.agent().current_transaction().is_none());
}

/// F025: Deliveries never run in the transaction that registered the consumer
#[test]
fn f025_registering_transaction_does_not_leak() {
    let harness = AgentHarness::new();
    let channel = instrumented(&harness);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let agent = Arc::clone(harness.agent());
    let log = Arc::clone(&seen);
    let consumer = Function::sync("onJob", 1, move |_| {
        log.lock().extend(agent.current_transaction().map(|t| t.id()));
        Ok(Value::Undefined)
    });

    let registering = harness.in_transaction(TransactionKind::Web, |tx| {
        let _ = channel
            .target()
            .call_method("consume", vec!["jobs".into(), consumer.into()]);
        tx.id()
    });
    publish(&channel, "", "jobs", json!(1));
    channel.deliver("jobs");

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_ne!(seen[0], registering, "F025 FALSIFIED: delivery joined the registering transaction");
}
