//! Mock web framework with middleware, routes and mountable routers.
//!
//! Handlers are called as `(request, response, next)`. The request is plain
//! data `{ method, url, path }` where `path` is relative to the mount point
//! of the router running the handler. A handler that does not respond calls
//! `next` to pass the request on; when nothing responds the app answers 404.

use std::sync::Arc;

use parking_lot::Mutex;
use periscope_core::ShimError;
use periscope_shim::{
    Call, CallResult, DispatchInfo, Function, MountSpec, Outcome, ResponseHook, Target, Value,
    WebFrameworkShim,
};
use serde_json::json;

/// Framework name reported by [`instrument`].
pub const FRAMEWORK: &str = "MockRouter";

/// Own property that marks a handler as a router.
pub const ROUTER_MARKER: &str = "stack";

#[derive(Debug, Clone)]
struct Layer {
    method: Option<String>,
    route: Option<String>,
    handler: Function,
}

impl Layer {
    /// Returns the path left for the handler if this layer matches.
    fn matches(&self, method: &str, path: &str) -> Option<String> {
        if self.method.as_deref().is_some_and(|m| !m.eq_ignore_ascii_case(method)) {
            return None;
        }
        let Some(route) = &self.route else {
            return Some(path.to_string());
        };
        let pattern: Vec<&str> = route.split('/').filter(|s| !s.is_empty()).collect();
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let prefix = self.method.is_none();
        let fits = if prefix {
            pattern.len() <= parts.len()
        } else {
            pattern.len() == parts.len()
        };
        let matched = fits
            && pattern
                .iter()
                .zip(&parts)
                .all(|(p, part)| p.starts_with(':') || p == part);
        matched.then(|| format!("/{}", parts[pattern.len()..].join("/")))
    }
}

type Stack = Arc<Mutex<Vec<Layer>>>;

fn register(stack: &Stack, name: &'static str, method: Option<&'static str>) -> Function {
    let stack = Arc::clone(stack);
    Function::sync(name, 2, move |call| {
        let route = call.arg(0).and_then(Value::as_str).map(str::to_string);
        let mut layers = stack.lock();
        for arg in &call.args {
            if let Value::Function(handler) = arg {
                layers.push(Layer {
                    method: method.map(str::to_string),
                    route: route.clone(),
                    handler: handler.clone(),
                });
            }
        }
        Ok(Value::Undefined)
    })
}

/// Runs the first matching layer at or after `index`.
fn run(stack: Stack, index: usize, request: serde_json::Value, response: Target, done: Function) -> Outcome {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let path = request["path"].as_str().unwrap_or("/").to_string();
    let found = {
        let layers = stack.lock();
        layers
            .iter()
            .enumerate()
            .skip(index)
            .find_map(|(i, layer)| layer.matches(&method, &path).map(|rest| (i, rest, layer.handler.clone())))
    };
    let Some((position, rest, handler)) = found else {
        return done.invoke(vec![]);
    };

    let mut inner = request.clone();
    inner["path"] = json!(rest);
    let next = {
        let response = response.clone();
        Function::new("next", 1, move |_| {
            run(
                Arc::clone(&stack),
                position + 1,
                request.clone(),
                response.clone(),
                done.clone(),
            )
        })
    };
    handler.invoke(vec![inner.into(), response.into(), next.into()])
}

/// Nested router mounted with `app.use(route, router.handler())`.
#[derive(Debug, Clone)]
pub struct MockRouter {
    target: Target,
    handler: Function,
}

impl MockRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        let stack: Stack = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::clone(&stack);
        let handler = Function::new("router", 3, move |call: Call| {
            let request = call.arg(0).and_then(Value::as_data).cloned().unwrap_or_default();
            let response = call.arg(1).and_then(Value::as_object).cloned();
            let done = call.arg(2).and_then(Value::as_function).cloned();
            match (response, done) {
                (Some(response), Some(done)) => run(Arc::clone(&routes), 0, request, response, done),
                _ => Outcome::err("router called without response and next"),
            }
        })
        .with_prop(ROUTER_MARKER, json!([]));

        Self {
            target: Target::new("Router")
                .with("use", register(&stack, "use", None))
                .with("get", register(&stack, "get", Some("GET")))
                .with("post", register(&stack, "post", Some("POST"))),
            handler,
        }
    }

    /// Returns the object carrying `use`/`get`/`post`.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Returns the function to mount.
    #[must_use]
    pub fn handler(&self) -> Function {
        self.handler.clone()
    }
}

impl Default for MockRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Application object: `use`, `get`, `post` and `handle(method, path, response)`.
#[derive(Debug, Clone)]
pub struct MockApp {
    target: Target,
}

impl MockApp {
    /// Creates an empty application.
    #[must_use]
    pub fn new() -> Self {
        let stack: Stack = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::clone(&stack);
        let handle = Function::new("handle", 3, move |call: Call| {
            let method = call.arg(0).and_then(Value::as_str).unwrap_or("GET").to_string();
            let url = call.arg(1).and_then(Value::as_str).unwrap_or("/").to_string();
            let Some(response) = call.arg(2).and_then(Value::as_object).cloned() else {
                return Outcome::err("handle called without a response");
            };
            let not_found = {
                let response = response.clone();
                Function::new("notFound", 0, move |_| response.call_method("end", vec![404_i64.into()]))
            };
            let request = json!({ "method": method, "url": url, "path": url });
            run(Arc::clone(&routes), 0, request, response, not_found)
        });

        Self {
            target: Target::new("Application")
                .with("use", register(&stack, "use", None))
                .with("get", register(&stack, "get", Some("GET")))
                .with("post", register(&stack, "post", Some("POST")))
                .with("handle", handle),
        }
    }

    /// Returns the application object.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Sends one request and returns its response with the dispatch outcome.
    pub fn request(&self, method: &str, path: &str) -> (MockResponse, Outcome) {
        let response = MockResponse::new();
        let outcome = self.target.call_method(
            "handle",
            vec![method.into(), path.into(), response.target().clone().into()],
        );
        (response, outcome)
    }

    /// Registers `handler` under `method` and `route`.
    pub fn route(&self, method: &str, route: &str, handler: Function) {
        let _ = self
            .target
            .call_method(&method.to_ascii_lowercase(), vec![route.into(), handler.into()]);
    }

    /// Registers middleware, optionally under a route prefix.
    pub fn mount(&self, route: Option<&str>, handler: Function) {
        let mut args: Vec<Value> = route.map(Value::from).into_iter().collect();
        args.push(handler.into());
        let _ = self.target.call_method("use", args);
    }
}

impl Default for MockApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Response object with `once(event, listener)`, `end([status])` and
/// `send(body)`. `finish` fires on end; `close` fires on [`abort`](Self::abort).
#[derive(Debug, Clone)]
pub struct MockResponse {
    target: Target,
    status: Arc<Mutex<Option<i64>>>,
    listeners: Arc<Mutex<Vec<(String, Function)>>>,
}

impl MockResponse {
    /// Creates an unanswered response.
    #[must_use]
    pub fn new() -> Self {
        let status = Arc::new(Mutex::new(None));
        let listeners: Arc<Mutex<Vec<(String, Function)>>> = Arc::new(Mutex::new(Vec::new()));

        let registry = Arc::clone(&listeners);
        let once = Function::sync("once", 2, move |call| {
            if let (Some(event), Some(Value::Function(listener))) =
                (call.arg(0).and_then(Value::as_str), call.arg(1))
            {
                registry.lock().push((event.to_string(), listener.clone()));
            }
            Ok(Value::Undefined)
        });

        let end = {
            let status = Arc::clone(&status);
            let listeners = Arc::clone(&listeners);
            Function::sync("end", 1, move |call| {
                let code = call.arg(0).and_then(Value::as_data).and_then(serde_json::Value::as_i64);
                finish(&status, &listeners, code.unwrap_or(200))
            })
        };
        let send = {
            let status = Arc::clone(&status);
            let listeners = Arc::clone(&listeners);
            Function::sync("send", 1, move |_| finish(&status, &listeners, 200))
        };

        Self {
            target: Target::new("ServerResponse")
                .with("once", once)
                .with("end", end)
                .with("send", send),
            status,
            listeners,
        }
    }

    /// Returns the response object.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Returns the status once the response was sent.
    #[must_use]
    pub fn status(&self) -> Option<i64> {
        *self.status.lock()
    }

    /// Drops the connection before a response was sent.
    pub fn abort(&self) {
        emit(&self.listeners, "close");
    }
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::new()
    }
}

fn finish(status: &Mutex<Option<i64>>, listeners: &Mutex<Vec<(String, Function)>>, code: i64) -> CallResult {
    {
        let mut status = status.lock();
        if status.is_some() {
            return Err(periscope_shim::CallError::new("response already sent"));
        }
        *status = Some(code);
    }
    emit(listeners, "finish");
    Ok(Value::Undefined)
}

fn emit(listeners: &Mutex<Vec<(String, Function)>>, event: &str) {
    let fired: Vec<Function> = {
        let mut listeners = listeners.lock();
        let (fired, kept): (Vec<_>, Vec<_>) = listeners.drain(..).partition(|(e, _)| e == event);
        *listeners = kept;
        fired.into_iter().map(|(_, f)| f).collect()
    };
    for listener in fired {
        let _ = listener.invoke(vec![]);
    }
}

/// Instruments an application the way a web-routing script would.
pub fn instrument(shim: &WebFrameworkShim, app: &Target) {
    shim.set_framework(FRAMEWORK);
    shim.wrap_route_dispatch(app, "handle", |args| {
        let method = args
            .str(0)
            .ok_or_else(|| ShimError::instrumentation("dispatch without method"))?;
        let info = DispatchInfo::new(method, args.str(1).unwrap_or("/"));
        Ok(match args.object(2) {
            Some(response) => info.response(ResponseHook::listen(response)),
            None => info,
        })
    });
    instrument_mounters(shim, app);
}

/// Instruments `use`/`get`/`post` on an application or router.
pub fn instrument_mounters(shim: &WebFrameworkShim, target: &Target) {
    shim.wrap_middleware_mounter(target, "use", &MountSpec::middleware().router_marker(ROUTER_MARKER));
    shim.wrap_middleware_mounter(target, ["get", "post"], &MountSpec::route());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder(body: &'static str) -> Function {
        Function::sync(body, 3, |call| {
            if let Some(Value::Object(response)) = call.arg(1) {
                let _ = response.call_method("send", vec![]);
            }
            Ok(Value::Undefined)
        })
    }

    #[test]
    fn test_route_params_match() {
        let app = MockApp::new();
        app.route("GET", "/hello/:name", responder("hello"));
        let (response, _) = app.request("GET", "/hello/ada");
        assert_eq!(response.status(), Some(200));
    }

    #[test]
    fn test_unmatched_is_404() {
        let app = MockApp::new();
        app.route("GET", "/hello/:name", responder("hello"));
        let (response, _) = app.request("POST", "/hello/ada");
        assert_eq!(response.status(), Some(404));
    }

    #[test]
    fn test_router_sees_relative_path() {
        let app = MockApp::new();
        let router = MockRouter::new();
        let _ = router
            .target()
            .call_method("get", vec!["/users/:id".into(), responder("user").into()]);
        app.mount(Some("/api"), router.handler());

        assert_eq!(app.request("GET", "/api/users/7").0.status(), Some(200));
        assert_eq!(app.request("GET", "/users/7").0.status(), Some(404));
    }

    #[test]
    fn test_middleware_next_continues() {
        let app = MockApp::new();
        let passed = Arc::new(Mutex::new(0));
        let count = Arc::clone(&passed);
        app.mount(
            None,
            Function::new("count", 3, move |call: Call| {
                *count.lock() += 1;
                match call.arg(2) {
                    Some(Value::Function(next)) => next.invoke(vec![]),
                    _ => Outcome::ok(Value::Undefined),
                }
            }),
        );
        app.route("GET", "/", responder("home"));
        assert_eq!(app.request("GET", "/").0.status(), Some(200));
        assert_eq!(*passed.lock(), 1);
    }

    #[test]
    fn test_abort_fires_close_only() {
        let response = MockResponse::new();
        let closed = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&closed);
        let listener = Function::sync("onClose", 0, move |_| {
            *flag.lock() = true;
            Ok(Value::Undefined)
        });
        let _ = response
            .target()
            .call_method("once", vec!["close".into(), listener.into()]);
        response.abort();
        assert!(*closed.lock());
        assert_eq!(response.status(), None);
    }
}
