// Examples are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Worker Queue Example
//!
//! A consumer subscribed to a mock broker stores every job with a mock SQL
//! client. Each delivery becomes its own message transaction; the queries
//! it runs are datastore segments inside it. A batch job delimited with the
//! transaction shim shows nesting.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example worker_queue
//! ```

use std::sync::{Arc, Mutex};

use periscope::prelude::*;
use periscope_test::fixtures::{MockBroker, MockSqlClient, broker, sql};
use serde_json::json;

#[derive(Default)]
struct TraceLog(Mutex<Vec<TransactionTrace>>);

impl TransactionSink for TraceLog {
    fn finished(&self, trace: TransactionTrace) {
        self.0.lock().unwrap().push(trace);
    }
}

fn main() {
    periscope::init_logging("info");

    let log = Arc::new(TraceLog::default());
    let config = AgentConfig::from_toml_str(
        r#"
        app_name = "worker-queue"

        [datastore]
        obfuscate_queries = true
        "#,
    )
    .expect("valid config");
    let agent = Agent::with_sink(config, Arc::clone(&log) as Arc<dyn TransactionSink>);
    let factory = ShimFactory::new(agent.clone());

    let channel = MockBroker::new();
    broker::instrument(
        factory
            .shim_for("messaging", "mockmq", "mockmq")
            .as_messaging()
            .expect("messaging shim"),
        channel.target(),
    );
    let db = MockSqlClient::new();
    sql::instrument(
        factory
            .shim_for("datastore", "mocksql", "mocksql")
            .as_datastore()
            .expect("datastore shim"),
        db.target(),
    );

    let store = db.target().clone();
    let consumer = Function::sync("onJob", 1, move |call| {
        let id = call
            .arg(0)
            .and_then(Value::as_data)
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_default();
        store
            .call_method("query", vec![format!("INSERT INTO jobs VALUES ({id})").into()])
            .ready()
            .unwrap_or(Ok(Value::Undefined))
    });
    let _ = channel
        .target()
        .call_method("consume", vec!["jobs".into(), consumer.into()]);

    for id in 0..3_i64 {
        let _ = channel
            .target()
            .call_method("publish", vec!["".into(), "jobs".into(), json!(id).into()]);
    }
    println!("delivered {} jobs", channel.deliver("jobs"));

    let units = factory.shim_for("transaction", "batch", "batch");
    let units = units.as_transaction().expect("transaction shim");
    let batch = units.start_transaction("nightly").expect("enabled");
    let item = units.start_transaction("cleanup").expect("enabled");
    let _ = db
        .target()
        .call_method("query", vec!["DELETE FROM jobs WHERE id < 100".into()]);
    units.end_transaction(&item);
    units.end_transaction(&batch);

    for trace in log.0.lock().unwrap().iter() {
        println!("{}", trace.name);
        for segment in &trace.segments[1..] {
            let sql = segment
                .attributes
                .get("sql")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            println!("  {:<48} {sql}", segment.name);
        }
    }
    println!("agent stats: {:?}", agent.stats().snapshot());
}
