// Examples are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Web Request Example
//!
//! Instruments the mock router shipped with `periscope-test`, sends a few
//! requests through it and prints the transactions and metrics the agent
//! recorded.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example web_request
//! RUST_LOG=periscope_shim=debug cargo run --example web_request
//! ```

use std::sync::{Arc, Mutex};

use periscope::prelude::*;
use periscope_test::fixtures::{MockApp, router, yield_once};

/// Sink that keeps finished transactions for printing.
#[derive(Default)]
struct TraceLog(Mutex<Vec<TransactionTrace>>);

impl TransactionSink for TraceLog {
    fn finished(&self, trace: TransactionTrace) {
        tracing::info!(name = %trace.name, segments = trace.segments.len(), "transaction finished");
        self.0.lock().unwrap().push(trace);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    periscope::init_logging("info");

    let log = Arc::new(TraceLog::default());
    let agent = Agent::with_sink(
        AgentConfig::default(),
        Arc::clone(&log) as Arc<dyn TransactionSink>,
    );
    let factory = ShimFactory::new(agent.clone());

    let app = MockApp::new();
    let shim = factory.shim_for("web-framework", "mockrouter", "mockrouter");
    router::instrument(shim.as_web_framework().expect("web shim"), app.target());

    app.mount(
        None,
        Function::new("logger", 3, |call: Call| match call.arg(2) {
            Some(Value::Function(next)) => next.invoke(vec![]),
            _ => Outcome::ok(Value::Undefined),
        }),
    );
    app.route(
        "GET",
        "/hello/:name",
        Function::sync("hello", 3, |call| {
            if let Some(Value::Object(response)) = call.arg(1) {
                let _ = response.call_method("send", vec![]);
            }
            Ok(Value::Undefined)
        }),
    );
    app.route(
        "GET",
        "/slow/:id",
        Function::future("slow", 3, |call| {
            let response = call.arg(1).and_then(Value::as_object).cloned();
            async move {
                yield_once().await;
                match response {
                    Some(response) => response
                        .call_method("send", vec![])
                        .settle()
                        .await
                        .map(|_| Value::Undefined),
                    None => Ok(Value::Undefined),
                }
            }
        }),
    );

    let _ = app.request("GET", "/hello/world");
    let _ = app.request("POST", "/nowhere");
    let pending: Vec<_> = (0..3)
        .map(|id| app.request("GET", &format!("/slow/{id}")).1.settle())
        .collect();
    for result in futures::future::join_all(pending).await {
        result.expect("request failed");
    }

    let mut metrics = MetricTable::new();
    for trace in log.0.lock().unwrap().iter() {
        println!("{} ({} segments)", trace.name, trace.segments.len());
        for segment in &trace.segments[1..] {
            println!("  {:<48} {:?}", segment.name, segment.status);
        }
        metrics.merge(&MetricTable::from_trace(trace));
    }

    println!();
    println!("{:<56} {:>5}", "metric", "calls");
    for (key, data) in metrics.iter() {
        let name = match &key.scope {
            Some(scope) => format!("{} [{scope}]", key.name),
            None => key.name.clone(),
        };
        println!("{name:<56} {:>5}", data.call_count);
    }
}
