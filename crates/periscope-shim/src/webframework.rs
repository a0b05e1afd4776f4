//! Web-routing specialization.
//!
//! Every request dispatched by the framework gets exactly one new `Web`
//! transaction. Middleware and route handlers become child segments, and
//! the route handler that matches names the transaction after the route
//! pattern (never the raw path):
//!
//! ```text
//! WebTransaction/{framework}/{METHOD}/{mount path}{route}
//! ```
//!
//! The transaction ends once, on the first of response finished or
//! connection closed, and is never current again afterwards.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use periscope_core::{
    Context, Result, ShimError, Transaction, TransactionKind, context,
};
use serde::{Deserialize, Serialize};

use crate::bound::Bound;
use crate::function::{Function, WrapKind};
use crate::shim::{Shim, status_of};
use crate::spec::{CallbackPosition, Selector};
use crate::target::Target;
use crate::value::{ArgRef, ArgView, Call, CallResult, Outcome, Value};

const UNKNOWN_FRAMEWORK: &str = "Unknown";
const NOT_FOUND: &str = "(not found)";

/// Turns a route argument into a route pattern string.
pub type RouteParser = Arc<dyn Fn(ArgRef<'_>) -> Result<String> + Send + Sync>;

/// How the response of one request completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseEvent {
    /// The response was fully written.
    Finished,
    /// The connection closed first.
    Closed,
}

type Listener = Box<dyn FnOnce(ResponseEvent) + Send>;

/// One-shot latch for the end of a response.
#[derive(Clone, Default)]
pub struct ResponseHook {
    inner: Arc<HookInner>,
}

#[derive(Default)]
struct HookInner {
    done: AtomicBool,
    event: Mutex<Option<ResponseEvent>>,
    listeners: Mutex<Vec<Listener>>,
}

impl ResponseHook {
    /// Creates an untriggered hook.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hook driven by an event-emitter style response object.
    ///
    /// Registers listeners through `emitter.once(event, listener)` for the
    /// `finish` and `close` events.
    #[must_use]
    pub fn listen(emitter: &Target) -> Self {
        let hook = Self::new();
        for (event, kind) in [("finish", ResponseEvent::Finished), ("close", ResponseEvent::Closed)] {
            let trigger = hook.clone();
            let listener = Function::sync(event, 0, move |_| {
                trigger.complete(kind);
                Ok(Value::Undefined)
            });
            let _ = emitter.call_method("once", vec![event.into(), listener.into()]);
        }
        hook
    }

    /// Signals that the response was written.
    pub fn finish(&self) -> bool {
        self.complete(ResponseEvent::Finished)
    }

    /// Signals that the connection closed.
    pub fn close(&self) -> bool {
        self.complete(ResponseEvent::Closed)
    }

    /// Returns true once finished or closed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Returns what completed the response.
    #[must_use]
    pub fn event(&self) -> Option<ResponseEvent> {
        *self.inner.event.lock()
    }

    /// Runs `listener` once the response completes, or now if it already has.
    pub fn on_done<F>(&self, listener: F)
    where
        F: FnOnce(ResponseEvent) + Send + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        match self.event() {
            Some(event) if self.is_done() => {
                drop(listeners);
                listener(event);
            }
            _ => listeners.push(Box::new(listener)),
        }
    }

    fn complete(&self, event: ResponseEvent) -> bool {
        if self.inner.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.inner.event.lock() = Some(event);
        let listeners = std::mem::take(&mut *self.inner.listeners.lock());
        for listener in listeners {
            listener(event);
        }
        true
    }
}

impl std::fmt::Debug for ResponseHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHook")
            .field("event", &self.event())
            .finish_non_exhaustive()
    }
}

/// What the framework is dispatching.
#[derive(Debug, Clone, Default)]
pub struct DispatchInfo {
    /// HTTP method.
    pub method: String,
    /// Raw request path; recorded as an attribute, never used as a name.
    pub path: String,
    /// Completion signal; without one the transaction ends when the
    /// dispatch call settles.
    pub response: Option<ResponseHook>,
}

impl DispatchInfo {
    /// Describes a request.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            response: None,
        }
    }

    /// Sets the completion signal.
    #[must_use]
    pub fn response(mut self, hook: ResponseHook) -> Self {
        self.response = Some(hook);
        self
    }
}

/// Role of a wrapped handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiddlewareKind {
    /// Runs for every request under its mount path.
    Middleware,
    /// Error handler.
    Errorware,
    /// Nested router; pushes its mount path while running.
    Router,
    /// Route handler; names the transaction.
    Route,
    /// Route parameter handler.
    Param,
}

/// Options for [`WebFrameworkShim::wrap_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddlewareSpec {
    /// Handler role.
    pub kind: MiddlewareKind,
    /// Segment name; defaults to the handler's name.
    pub name: Option<String>,
    /// The continuation that passes control to the next handler.
    pub next: Option<CallbackPosition>,
}

impl MiddlewareSpec {
    /// A handler of `kind` whose last argument is `next`.
    #[must_use]
    pub const fn of(kind: MiddlewareKind) -> Self {
        Self {
            kind,
            name: None,
            next: Some(CallbackPosition::Last),
        }
    }

    /// Plain middleware.
    #[must_use]
    pub const fn middleware() -> Self {
        Self::of(MiddlewareKind::Middleware)
    }

    /// Route handler.
    #[must_use]
    pub const fn route() -> Self {
        Self::of(MiddlewareKind::Route)
    }

    /// Mounted router.
    #[must_use]
    pub const fn router() -> Self {
        Self::of(MiddlewareKind::Router)
    }

    /// Overrides the segment name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the `next` position; `None` for handlers without one.
    #[must_use]
    pub const fn next(mut self, next: Option<CallbackPosition>) -> Self {
        self.next = next;
        self
    }
}

/// Options for [`WebFrameworkShim::wrap_middleware_mounter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Role of mounted handlers.
    pub kind: MiddlewareKind,
    /// Argument holding the optional route.
    pub route: Option<usize>,
    /// `next` position of mounted handlers.
    pub next: Option<CallbackPosition>,
    /// Own property that marks a handler as a router.
    pub router_marker: Option<String>,
}

impl MountSpec {
    /// `use([route], ...handlers)` style mounters.
    #[must_use]
    pub fn middleware() -> Self {
        Self {
            kind: MiddlewareKind::Middleware,
            route: Some(0),
            next: Some(CallbackPosition::Last),
            router_marker: None,
        }
    }

    /// `get(route, ...handlers)` style mounters.
    #[must_use]
    pub fn route() -> Self {
        Self {
            kind: MiddlewareKind::Route,
            ..Self::middleware()
        }
    }

    /// Treats handlers carrying the own property `marker` as routers.
    #[must_use]
    pub fn router_marker(mut self, marker: impl Into<String>) -> Self {
        self.router_marker = Some(marker.into());
        self
    }
}

fn default_route_parser(arg: ArgRef<'_>) -> Result<String> {
    match arg {
        ArgRef::Data(serde_json::Value::String(route)) => Ok(route.clone()),
        ArgRef::Data(serde_json::Value::Array(routes)) => Ok(routes
            .iter()
            .filter_map(serde_json::Value::as_str)
            .collect::<Vec<_>>()
            .join(",")),
        other => Err(ShimError::instrumentation(format!(
            "cannot derive a route from {other:?}"
        ))),
    }
}

fn normalize_route(route: &str) -> String {
    if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{route}")
    }
}

/// Shim for web routing frameworks.
#[derive(Clone)]
pub struct WebFrameworkShim {
    shim: Shim,
    framework: Arc<RwLock<String>>,
    route_parser: Arc<RwLock<RouteParser>>,
}

impl WebFrameworkShim {
    pub(crate) fn new(shim: Shim) -> Self {
        Self {
            shim,
            framework: Arc::new(RwLock::new(UNKNOWN_FRAMEWORK.to_string())),
            route_parser: Arc::new(RwLock::new(Arc::new(default_route_parser))),
        }
    }

    /// Names the framework (`Expressjs`, `Restify`...).
    pub fn set_framework(&self, framework: impl Into<String>) {
        *self.framework.write() = framework.into();
    }

    /// Returns the framework name.
    #[must_use]
    pub fn framework(&self) -> String {
        self.framework.read().clone()
    }

    /// Replaces the route argument parser used by mounters.
    pub fn set_route_parser<F>(&self, parser: F)
    where
        F: Fn(ArgRef<'_>) -> Result<String> + Send + Sync + 'static,
    {
        *self.route_parser.write() = Arc::new(parser);
    }

    /// Wraps the method that starts dispatching one request.
    ///
    /// `extractor` describes the request. Each call starts a new `Web`
    /// transaction that is current only while the framework runs code for
    /// this request.
    pub fn wrap_route_dispatch<E>(&self, target: &Target, selector: impl Into<Selector>, extractor: E) -> Target
    where
        E: Fn(&ArgView<'_>) -> Result<DispatchInfo> + Send + Sync + 'static,
    {
        let extractor = Arc::new(extractor);
        self.shim.wrap_with(target, selector, |original| {
            let shim = self.shim.clone();
            let framework = Arc::clone(&self.framework);
            let extractor = Arc::clone(&extractor);
            move |call| {
                let Some(info) = shim.guard("route dispatch", || extractor(&call.view())) else {
                    return original.call(call);
                };
                let framework = framework.read().clone();
                dispatch(&shim, &framework, &original, call, info)
            }
        })
    }

    /// Wraps one handler.
    ///
    /// The segment is `Middleware/{framework}/{name}`, with `/{route}`
    /// appended when the handler is mounted on a route. The `next`
    /// argument ends the segment and runs in the context the handler was
    /// called from.
    #[must_use]
    pub fn wrap_middleware(&self, handler: &Function, route: Option<&str>, spec: &MiddlewareSpec) -> Function {
        if !self.is_enabled() || handler.is_interceptor_of(self.id()) {
            return handler.clone();
        }
        let name = spec.name.clone().unwrap_or_else(|| match handler.name() {
            "" => "anonymous".to_string(),
            name => name.to_string(),
        });
        let layer = Arc::new(Layer {
            kind: spec.kind,
            name,
            route: route.map(normalize_route),
            next: spec.next,
        });
        let shim = self.shim.clone();
        let framework = Arc::clone(&self.framework);
        let original = handler.clone();
        Function::wrap(handler, self.id(), WrapKind::Intercept, move |call| {
            let framework = framework.read().clone();
            layer.run(&shim, &framework, &original, call)
        })
    }

    /// Wraps registration methods (`use`, `get`, `route`...) so every
    /// handler they mount is wrapped with [`wrap_middleware`](Self::wrap_middleware).
    pub fn wrap_middleware_mounter(
        &self,
        target: &Target,
        selector: impl Into<Selector>,
        spec: &MountSpec,
    ) -> Target {
        self.shim.wrap_with(target, selector, |original| {
            let web = self.clone();
            let spec = spec.clone();
            move |call: Call| {
                let route = web.mount_route(&call, &spec);
                let args = call
                    .args
                    .into_iter()
                    .map(|arg| match arg {
                        Value::Function(handler) => {
                            let is_router = spec
                                .router_marker
                                .as_deref()
                                .is_some_and(|marker| handler.prop(marker).is_some());
                            let kind = if is_router { MiddlewareKind::Router } else { spec.kind };
                            let handler_spec = MiddlewareSpec::of(kind).next(spec.next);
                            Value::Function(web.wrap_middleware(&handler, route.as_deref(), &handler_spec))
                        }
                        other => other,
                    })
                    .collect();
                original.call(Call {
                    receiver: call.receiver,
                    args,
                })
            }
        })
    }

    fn mount_route(&self, call: &Call, spec: &MountSpec) -> Option<String> {
        let args = call.view();
        let arg = args.get(spec.route?)?;
        if matches!(arg, ArgRef::Callback | ArgRef::Undefined) {
            return None;
        }
        let parser = Arc::clone(&*self.route_parser.read());
        self.guard("route parsing", || parser(arg))
    }
}

/// Runs one dispatch inside a fresh transaction.
fn dispatch(shim: &Shim, framework: &str, original: &Function, call: Call, info: DispatchInfo) -> Outcome {
    let agent = shim.agent();
    let transaction = agent.start_transaction(TransactionKind::Web);
    let method = info.method.to_ascii_uppercase();
    transaction.set_attribute("request.method", method.clone());
    transaction.set_attribute("request.uri", info.path.clone());
    tracing::debug!(
        transaction = %transaction.id(),
        framework,
        method = %method,
        "dispatching request"
    );

    let end = Arc::new(EndOnce {
        transaction: Arc::clone(&transaction),
        fallback: format!("{}/{framework}/{method}/{NOT_FOUND}", TransactionKind::Web.prefix()),
        ended: AtomicBool::new(false),
        shim: shim.clone(),
    });
    let hooked = info.response.is_some();
    if let Some(hook) = info.response {
        let end = Arc::clone(&end);
        hook.on_done(move |event| {
            if event == ResponseEvent::Closed {
                end.transaction.set_attribute("request.aborted", true);
            }
            end.run();
        });
    }

    let request = Context::from_segment(transaction.root());
    let args = call
        .args
        .into_iter()
        .map(|arg| match arg {
            Value::Function(f) => Value::Function(shim.bind_to(&f, request.clone())),
            other => other,
        })
        .collect();
    let outcome = {
        let _guard = context::enter(agent.id(), request.clone());
        original.call(Call {
            receiver: call.receiver,
            args,
        })
    };

    match outcome {
        Outcome::Ready(result) => {
            if !hooked {
                end.run();
            }
            Outcome::Ready(result)
        }
        Outcome::Pending(future) => {
            let bound = Bound::new(future, Arc::clone(agent), request, shim.module_arc());
            if hooked {
                Outcome::Pending(Box::pin(bound))
            } else {
                Outcome::Pending(Box::pin(bound.on_settle(move |_: &CallResult| end.run())))
            }
        }
    }
}

/// Ends a web transaction on the first request to do so.
struct EndOnce {
    transaction: Arc<Transaction>,
    fallback: String,
    ended: AtomicBool,
    shim: Shim,
}

impl EndOnce {
    fn run(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.transaction.has_name() {
            self.transaction.set_name(self.fallback.clone());
        }
        self.shim.agent().end_transaction(&self.transaction);
    }
}

/// Pops a router's mount path once control leaves the router.
struct Mount {
    transaction: Arc<Transaction>,
    left: AtomicBool,
}

impl Mount {
    fn leave(&self) {
        if !self.left.swap(true, Ordering::AcqRel) {
            self.transaction.pop_name_part();
        }
    }
}

#[derive(Debug)]
struct Layer {
    kind: MiddlewareKind,
    name: String,
    route: Option<String>,
    next: Option<CallbackPosition>,
}

impl Layer {
    fn run(&self, shim: &Shim, framework: &str, original: &Function, call: Call) -> Outcome {
        let Some(parent) = shim.current_segment() else {
            return original.call(call);
        };
        let transaction = Arc::clone(parent.transaction());

        let route = self.route.as_deref().map(|route| format!("{}{route}", transaction.name_path()));
        if self.kind == MiddlewareKind::Route {
            let method = transaction
                .attribute("request.method")
                .and_then(|m| m.as_str().map(str::to_string))
                .unwrap_or_else(|| "*".to_string());
            let path = route.clone().unwrap_or_else(|| transaction.name_path());
            transaction.set_name(format!(
                "{}/{framework}/{method}/{path}",
                TransactionKind::Web.prefix()
            ));
        }

        let mut name = format!("Middleware/{framework}/{}", self.name);
        if let Some(route) = &route {
            name.push('/');
            name.push_str(route);
        }
        let Some(segment) = shim.agent().create_segment_under(&parent, &name) else {
            let call = shim.bind_arguments(call, &Context::from_segment(parent), None);
            return original.call(call);
        };
        if let Some(route) = &route {
            segment.set_attribute("route", route.clone());
        }

        let mount = (self.kind == MiddlewareKind::Router).then(|| {
            transaction.push_name_part(self.route.clone().unwrap_or_else(|| "/".to_string()));
            Arc::new(Mount {
                transaction: Arc::clone(&transaction),
                left: AtomicBool::new(false),
            })
        });

        let caller = Context::from_segment(parent);
        let inside = Context::from_segment(segment.clone());
        let next = self.next.and_then(|p| p.resolve(&call.view()));
        let args = call
            .args
            .into_iter()
            .enumerate()
            .map(|(index, arg)| match arg {
                Value::Function(f) if Some(index) == next => {
                    let resume = shim.bind_to(&f, caller.clone());
                    let segment = segment.clone();
                    let mount = mount.clone();
                    Value::Function(Function::wrap(&f, shim.id(), WrapKind::Bound, move |call| {
                        segment.end();
                        if let Some(mount) = &mount {
                            mount.leave();
                        }
                        resume.call(call)
                    }))
                }
                Value::Function(f) => Value::Function(shim.bind_to(&f, inside.clone())),
                other => other,
            })
            .collect();

        let outcome = {
            let _guard = context::enter(shim.agent().id(), inside.clone());
            original.call(Call {
                receiver: call.receiver,
                args,
            })
        };
        match outcome {
            Outcome::Ready(result) => {
                segment.end_with(status_of(&result));
                if let Some(mount) = &mount {
                    mount.leave();
                }
                Outcome::Ready(result)
            }
            Outcome::Pending(future) => Outcome::Pending(Box::pin(
                Bound::new(future, Arc::clone(shim.agent()), inside, shim.module_arc()).on_settle(
                    move |result: &CallResult| {
                        segment.end_with(status_of(result));
                        if let Some(mount) = &mount {
                            mount.leave();
                        }
                    },
                ),
            )),
        }
    }
}

impl Deref for WebFrameworkShim {
    type Target = Shim;

    fn deref(&self) -> &Shim {
        &self.shim
    }
}

impl std::fmt::Debug for WebFrameworkShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebFrameworkShim")
            .field("shim", &self.shim)
            .field("framework", &*self.framework.read())
            .finish_non_exhaustive()
    }
}
