//! Falsification Tests: Category G - Web Routing (F034-F041)
//!
//! Claims: each request is one transaction named after the route that
//! handled it, middleware are sibling segments, and a request ends exactly
//! once however its response completes.

use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::{AgentContext, SegmentStatus};
use periscope_shim::{Call, Function, Outcome, Value};
use periscope_test::AgentHarness;
use periscope_test::fixtures::{MockApp, MockRouter, router, yield_once};

fn instrumented(harness: &AgentHarness) -> MockApp {
    let app = MockApp::new();
    let shim = harness.shim("web-framework", "mockrouter");
    router::instrument(shim.as_web_framework().unwrap(), app.target());
    app
}

/// Handler that sends a response.
fn responder(name: &'static str) -> Function {
    Function::sync(name, 3, |call| {
        if let Some(Value::Object(response)) = call.arg(1) {
            let _ = response.call_method("send", vec![]);
        }
        Ok(Value::Undefined)
    })
}

/// Middleware that passes the request on.
fn passthrough(name: &'static str) -> Function {
    Function::new(name, 3, |call: Call| match call.arg(2) {
        Some(Value::Function(next)) => next.invoke(vec![]),
        _ => Outcome::ok(Value::Undefined),
    })
}

// =============================================================================
// F034-F035: Naming
// =============================================================================

/// F034: A matched route names the transaction and its handler segment
///
/// # Falsification Attempt
/// GET /hello/friend against `/hello/:name`; any other transaction name,
/// a missing segment or a leaked context refutes.
#[test]
fn f034_route_names_transaction() {
    let harness = AgentHarness::new();
    let app = instrumented(&harness);
    app.route("GET", "/hello/:name", responder("hello"));

    let (response, _) = app.request("get", "/hello/friend");

    assert_eq!(response.status(), Some(200));
    assert!(harness.agent().current_transaction().is_none(), "F034 FALSIFIED: context leaked");
    let trace = harness.single("WebTransaction/MockRouter/GET//hello/:name").unwrap();
    assert_eq!(trace.attributes["request.uri"], "/hello/friend");
    assert_eq!(trace.attributes["request.method"], "GET");
    let segments = trace.segments_named("Middleware/MockRouter/hello//hello/:name");
    assert_eq!(segments.len(), 1, "F034 FALSIFIED: {:?}", trace.segments);
    assert_eq!(segments[0].attributes["route"], "/hello/:name");
}

/// F035: An unmatched request is named not found
#[test]
fn f035_unmatched_request_is_not_found() {
    let harness = AgentHarness::new();
    let app = instrumented(&harness);
    app.route("GET", "/hello/:name", responder("hello"));

    let (response, _) = app.request("POST", "/hello/friend");

    assert_eq!(response.status(), Some(404));
    harness
        .single("WebTransaction/MockRouter/POST/(not found)")
        .expect("F035 FALSIFIED");
}

// =============================================================================
// F036-F037: Metrics
// =============================================================================

/// F036: Middleware and route handlers produce scoped and unscoped metrics
#[test]
fn f036_middleware_metrics_are_scoped() {
    let harness = AgentHarness::new();
    let app = instrumented(&harness);
    app.mount(None, passthrough("logger"));
    app.route("GET", "/foo/:bar", responder("show"));

    let _ = app.request("GET", "/foo/1");

    let scope = "WebTransaction/MockRouter/GET//foo/:bar";
    let metrics = harness.sink().metrics();
    assert_eq!(metrics.unscoped_count(scope), 1, "F036 FALSIFIED: transaction metric missing");
    for name in ["Middleware/MockRouter/logger", "Middleware/MockRouter/show//foo/:bar"] {
        assert_eq!(metrics.unscoped_count(name), 1, "F036 FALSIFIED: {name}");
        assert_eq!(metrics.scoped_count(name, scope), 1, "F036 FALSIFIED: {name} in {scope}");
    }
}

/// F037: N requests produce N transactions and a call count of N
#[test]
fn f037_request_count_matches_call_count() {
    let harness = AgentHarness::new();
    let app = instrumented(&harness);
    app.route("GET", "/item/:id", responder("item"));

    for id in 0..5 {
        let _ = app.request("GET", &format!("/item/{id}"));
    }

    assert_eq!(harness.sink().len(), 5);
    let metrics = harness.sink().metrics();
    assert_eq!(
        metrics.unscoped_count("Middleware/MockRouter/item//item/:id"),
        5,
        "F037 FALSIFIED"
    );
}

// =============================================================================
// F038-F039: Completion and mounting
// =============================================================================

/// F038: A dropped connection ends the request once, flagged as aborted
#[test]
fn f038_close_then_finish_ends_once() {
    let harness = AgentHarness::new();
    let app = instrumented(&harness);
    app.route("GET", "/slow", Function::sync("stall", 3, |_| Ok(Value::Undefined)));

    let (response, _) = app.request("GET", "/slow");
    assert!(harness.sink().is_empty(), "F038 FALSIFIED: ended before the response");

    response.abort();
    let _ = response.target().call_method("end", vec![]);

    assert_eq!(harness.sink().len(), 1, "F038 FALSIFIED: ended twice");
    let trace = harness.single("WebTransaction/MockRouter/GET//slow").unwrap();
    assert_eq!(trace.attributes["request.aborted"], true);
    harness.assert_clean().unwrap();
}

/// F039: A route inside a mounted router is named by the full path
#[test]
fn f039_router_mount_prefixes_route() {
    let harness = AgentHarness::new();
    let app = instrumented(&harness);
    let api = MockRouter::new();
    let shim = harness.shim("web-framework", "mockrouter");
    router::instrument_mounters(shim.as_web_framework().unwrap(), api.target());
    let _ = api
        .target()
        .call_method("get", vec!["/users/:id".into(), responder("user").into()]);
    app.mount(Some("/api"), api.handler());

    let (response, _) = app.request("GET", "/api/users/7");

    assert_eq!(response.status(), Some(200));
    let trace = harness
        .single("WebTransaction/MockRouter/GET//api/users/:id")
        .expect("F039 FALSIFIED");
    let mount = trace.segments_named("Middleware/MockRouter/router//api")[0];
    let user = trace.segments_named("Middleware/MockRouter/user//api/users/:id")[0];
    assert_eq!(user.parent, Some(mount.id), "F039 FALSIFIED: route escaped the router");
}

// =============================================================================
// F040-F041: Concurrency and structure
// =============================================================================

/// F040: Interleaved asynchronous requests each see only their own transaction
#[tokio::test(flavor = "current_thread")]
async fn f040_async_requests_are_isolated() {
    let harness = AgentHarness::new();
    let app = instrumented(&harness);
    let observed = Arc::new(Mutex::new(Vec::new()));

    let agent = Arc::clone(harness.agent());
    let log = Arc::clone(&observed);
    let handler = Function::future("lookup", 3, move |call| {
        let agent = Arc::clone(&agent);
        let log = Arc::clone(&log);
        let response = call.arg(1).and_then(Value::as_object).cloned();
        let url = call
            .arg(0)
            .and_then(Value::as_data)
            .and_then(|request| request["url"].as_str().map(str::to_string));
        async move {
            yield_once().await;
            let seen = agent
                .current_transaction()
                .and_then(|t| t.attribute("request.uri"))
                .and_then(|uri| uri.as_str().map(str::to_string));
            log.lock().push((url, seen));
            match response {
                Some(response) => response
                    .call_method("send", vec![])
                    .settle()
                    .await
                    .map(|_| Value::Undefined),
                None => Ok(Value::Undefined),
            }
        }
    });
    app.route("GET", "/item/:id", handler);

    let pending: Vec<_> = (0..6)
        .map(|id| app.request("GET", &format!("/item/{id}")).1.settle())
        .collect();
    assert!(harness.agent().current_transaction().is_none());
    for result in futures::future::join_all(pending).await {
        result.unwrap();
    }

    let observed = observed.lock();
    assert_eq!(observed.len(), 6);
    for (url, seen) in observed.iter() {
        assert_eq!(url, seen, "F040 FALSIFIED: request saw another request's transaction");
    }
    assert_eq!(harness.sink().len(), 6);
    harness.assert_clean().unwrap();
}

/// F041: Middleware that call next are siblings, not ancestors
#[test]
fn f041_next_makes_sibling_segments() {
    let harness = AgentHarness::new();
    let app = instrumented(&harness);
    app.mount(None, passthrough("cors"));
    app.mount(None, passthrough("auth"));
    app.route("GET", "/", responder("home"));

    let _ = app.request("GET", "/");

    let trace = harness.single("WebTransaction/MockRouter/GET//").unwrap();
    let root = trace.segments[0].id;
    for name in [
        "Middleware/MockRouter/cors",
        "Middleware/MockRouter/auth",
        "Middleware/MockRouter/home//",
    ] {
        let segment = trace.segments_named(name)[0];
        assert_eq!(segment.parent, Some(root), "F041 FALSIFIED: {name} nested");
    }
    let cors = trace.segments_named("Middleware/MockRouter/cors")[0];
    assert_eq!(cors.status, SegmentStatus::Ok, "F041 FALSIFIED: next did not end the segment");
}
