//! Base wrapper shared by every specialization.
//!
//! A [`Shim`] is bound to one agent, one module name and one resolved name
//! for its whole life. It replaces entries of a [`Target`] with interceptors
//! that record segments and carry the ambient context across callbacks and
//! futures.
//!
//! Nothing here may fail the monitored call. Closures supplied by
//! instrumentation scripts run under [`Shim::guard`]; when they error or
//! panic, a diagnostic is recorded and the original runs unwrapped.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use periscope_core::{
    AgentContext, Context, Diagnostic, Segment, SegmentStatus, ShimError, Transaction, context,
};

use crate::bound::{self, Bound};
use crate::category::Category;
use crate::function::{Function, FunctionId, WrapKind};
use crate::spec::{RecordSpec, Selector};
use crate::target::{Target, TargetId};
use crate::value::{ArgView, Call, CallResult, Outcome, Value};

static NEXT_SHIM_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShimId(u64);

impl ShimId {
    /// Allocates a fresh ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SHIM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WrapKey {
    target: TargetId,
    property: String,
}

struct WrapRecord {
    original: Function,
    wrapped: FunctionId,
}

struct ShimInner {
    id: ShimId,
    category: Category,
    agent: Arc<dyn AgentContext>,
    module_name: Arc<str>,
    resolved_name: String,
    enabled: bool,
    records: Mutex<HashMap<WrapKey, WrapRecord>>,
}

/// What an interceptor records for one call.
#[derive(Debug, Clone)]
pub(crate) struct Interception {
    pub name: String,
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub callback: Option<usize>,
}

impl Interception {
    pub(crate) fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            callback: None,
        }
    }
}

/// Generic instrumentation shim.
#[derive(Clone)]
pub struct Shim {
    inner: Arc<ShimInner>,
}

impl Shim {
    /// Creates a generic shim.
    #[must_use]
    pub fn new(
        agent: Arc<dyn AgentContext>,
        module_name: impl Into<String>,
        resolved_name: impl Into<String>,
    ) -> Self {
        Self::for_category(Category::Generic, agent, module_name, resolved_name)
    }

    pub(crate) fn for_category(
        category: Category,
        agent: Arc<dyn AgentContext>,
        module_name: impl Into<String>,
        resolved_name: impl Into<String>,
    ) -> Self {
        let module_name: String = module_name.into();
        let enabled = agent.config().is_module_enabled(&module_name);
        if !enabled {
            tracing::debug!(module = %module_name, "instrumentation disabled by configuration");
        }
        Self {
            inner: Arc::new(ShimInner {
                id: ShimId::next(),
                category,
                agent,
                module_name: module_name.into(),
                resolved_name: resolved_name.into(),
                enabled,
                records: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the shim ID.
    #[must_use]
    pub fn id(&self) -> ShimId {
        self.inner.id
    }

    /// Returns the category the shim was built for.
    #[must_use]
    pub fn category(&self) -> Category {
        self.inner.category
    }

    /// Returns the agent this shim reports to.
    #[must_use]
    pub fn agent(&self) -> &Arc<dyn AgentContext> {
        &self.inner.agent
    }

    /// Returns the name the library was requested under.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.inner.module_name
    }

    /// Returns the canonical identity of the library.
    #[must_use]
    pub fn resolved_name(&self) -> &str {
        &self.inner.resolved_name
    }

    /// Returns false if configuration disabled this module.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Returns the current transaction.
    #[must_use]
    pub fn current_transaction(&self) -> Option<Arc<Transaction>> {
        self.agent().current_transaction()
    }

    /// Returns the current segment.
    #[must_use]
    pub fn current_segment(&self) -> Option<Segment> {
        self.agent().current_segment()
    }

    /// Returns the number of live wrap records.
    #[must_use]
    pub fn wrapped_count(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub(crate) fn misuse(&self, message: impl Into<String>) {
        self.agent()
            .record_diagnostic(Diagnostic::misuse(self.module_name(), message));
    }

    pub(crate) fn module_arc(&self) -> Arc<str> {
        Arc::clone(&self.inner.module_name)
    }

    // ------------------------------------------------------------------
    // Wrapping
    // ------------------------------------------------------------------

    /// Replaces each selected function with a segment-recording interceptor.
    ///
    /// Wrapping the same property twice is a no-op. Paths that do not
    /// resolve to a function are left alone and reported as misuse. Returns
    /// the target so calls can be chained.
    pub fn wrap(&self, target: &Target, selector: impl Into<Selector>, spec: &RecordSpec) -> Target {
        self.wrap_with(target, selector, |original| {
            let shim = self.clone();
            let spec = spec.clone();
            move |call| shim.intercept(&original, &spec, call)
        })
    }

    /// Replaces each selected function with a wrapper built by `make_body`.
    ///
    /// `make_body` receives the original and returns the wrapper's body.
    /// The wrapper takes the original's name, arity and properties.
    pub fn wrap_with<F, B>(&self, target: &Target, selector: impl Into<Selector>, make_body: F) -> Target
    where
        F: Fn(Function) -> B,
        B: Fn(Call) -> Outcome + Send + Sync + 'static,
    {
        let selector = selector.into();
        if !self.is_enabled() {
            return target.clone();
        }
        for path in selector.paths() {
            let Some((holder, key)) = target.resolve(path) else {
                self.misuse(format!("cannot resolve `{path}` on {}", target.name()));
                continue;
            };
            let Some(original) = holder.function(&key) else {
                self.misuse(format!("{}.{key} is not a function", holder.name()));
                continue;
            };
            if original.is_interceptor_of(self.id()) {
                tracing::trace!(object = holder.name(), property = %key, "already wrapped");
                continue;
            }

            let wrapped = Function::wrap(
                &original,
                self.id(),
                WrapKind::Intercept,
                make_body(original.clone()),
            );
            holder.set(key.clone(), wrapped.clone());
            tracing::debug!(
                module = self.module_name(),
                object = holder.name(),
                property = %key,
                "wrapped"
            );
            self.inner.records.lock().insert(
                WrapKey {
                    target: holder.id(),
                    property: key,
                },
                WrapRecord {
                    original,
                    wrapped: wrapped.id(),
                },
            );
        }
        target.clone()
    }

    /// Wraps a free-standing function.
    ///
    /// Returns the input unchanged if it already is an interceptor of this
    /// shim or the module is disabled.
    #[must_use]
    pub fn wrap_function(&self, function: &Function, spec: &RecordSpec) -> Function {
        if !self.is_enabled() || function.is_interceptor_of(self.id()) {
            return function.clone();
        }
        let shim = self.clone();
        let spec = spec.clone();
        let original = function.clone();
        Function::wrap(function, self.id(), WrapKind::Intercept, move |call| {
            shim.intercept(&original, &spec, call)
        })
    }

    /// Returns true if every selected property is intercepted by this shim.
    #[must_use]
    pub fn is_wrapped(&self, target: &Target, selector: impl Into<Selector>) -> bool {
        let selector = selector.into();
        let paths = selector.paths();
        !paths.is_empty()
            && paths.iter().all(|path| {
                target
                    .resolve(path)
                    .and_then(|(holder, key)| holder.function(&key))
                    .is_some_and(|f| f.is_interceptor_of(self.id()))
            })
    }

    /// Restores the originals of the selected properties.
    ///
    /// Properties replaced by someone else since wrapping are left alone.
    /// Returns the number of properties restored.
    pub fn unwrap(&self, target: &Target, selector: impl Into<Selector>) -> usize {
        let selector = selector.into();
        let mut restored = 0;
        for path in selector.paths() {
            let Some((holder, key)) = target.resolve(path) else {
                continue;
            };
            let record = self.inner.records.lock().remove(&WrapKey {
                target: holder.id(),
                property: key.clone(),
            });
            let Some(record) = record else {
                continue;
            };
            if holder.function(&key).is_some_and(|f| f.id() == record.wrapped) {
                holder.set(key, record.original);
                restored += 1;
            }
        }
        restored
    }

    // ------------------------------------------------------------------
    // Segments
    // ------------------------------------------------------------------

    fn open_segment(&self, name: &str, parent: Option<&Segment>) -> Option<Segment> {
        if !self.is_enabled() {
            return None;
        }
        let parent = match parent {
            Some(parent) => parent.clone(),
            None => self.current_segment()?,
        };
        self.agent().create_segment_under(&parent, name)
    }

    /// Runs `work` with a new segment as the current context.
    ///
    /// The segment hangs off `parent`, or the current segment if `None`.
    /// Outside a transaction `work` simply runs.
    pub fn record_segment<T, E, W>(
        &self,
        name: &str,
        parent: Option<&Segment>,
        work: W,
    ) -> std::result::Result<T, E>
    where
        W: FnOnce() -> std::result::Result<T, E>,
    {
        let Some(segment) = self.open_segment(name, parent) else {
            return work();
        };
        let result = {
            let _guard = context::enter(self.agent().id(), Context::from_segment(segment.clone()));
            work()
        };
        segment.end_with(status_of(&result));
        result
    }

    /// Like [`record_segment`](Self::record_segment) for asynchronous work.
    ///
    /// The segment starts now and ends when the future completes. Every
    /// poll observes the segment as current.
    pub fn record_segment_async<F, T, E>(
        &self,
        name: &str,
        parent: Option<&Segment>,
        future: F,
    ) -> Bound<std::result::Result<T, E>>
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: 'static,
        E: 'static,
    {
        match self.open_segment(name, parent) {
            Some(segment) => Bound::new(
                future,
                Arc::clone(self.agent()),
                Context::from_segment(segment.clone()),
                self.module_arc(),
            )
            .on_settle(move |result| {
                segment.end_with(status_of(result));
            }),
            None => self.bind_future(future),
        }
    }

    // ------------------------------------------------------------------
    // Context binding
    // ------------------------------------------------------------------

    /// Binds `function` to the context current right now.
    #[must_use]
    pub fn bind_context(&self, function: &Function) -> Function {
        self.bind_to(function, self.agent().current_context())
    }

    /// Binds `function` to `context`.
    #[must_use]
    pub fn bind_to(&self, function: &Function, context: Context) -> Function {
        bound::bind_function(
            Arc::clone(self.agent()),
            self.id(),
            self.module_arc(),
            function,
            context,
        )
    }

    /// Binds `future` to the context current right now.
    pub fn bind_future<F>(&self, future: F) -> Bound<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: 'static,
    {
        self.bind_future_to(future, self.agent().current_context())
    }

    /// Binds `future` to `context`.
    pub fn bind_future_to<F>(&self, future: F, context: Context) -> Bound<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: 'static,
    {
        Bound::new(future, Arc::clone(self.agent()), context, self.module_arc())
    }

    // ------------------------------------------------------------------
    // Interception
    // ------------------------------------------------------------------

    /// Runs an instrumentation closure, turning errors and panics into
    /// diagnostics.
    pub(crate) fn guard<T, F>(&self, operation: &str, f: F) -> Option<T>
    where
        F: FnOnce() -> periscope_core::Result<T>,
    {
        let error = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(err)) => err,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                ShimError::instrumentation(format!("panicked: {message}"))
            }
        };
        let mut diagnostic = Diagnostic::from_error(self.module_name(), &error);
        diagnostic.message = format!("{operation}: {}", diagnostic.message);
        self.agent().record_diagnostic(diagnostic);
        None
    }

    /// Interceptor body used by [`wrap`](Self::wrap).
    pub(crate) fn intercept(&self, original: &Function, spec: &RecordSpec, call: Call) -> Outcome {
        if !spec.record {
            let current = self.agent().current_context();
            if current.is_empty() {
                return original.call(call);
            }
            let call = self.bind_arguments(call, &current, None);
            return original.call(call);
        }
        self.intercept_call(original, call, |args| {
            let name = spec.name.resolve(original, args)?;
            Ok(Interception {
                name,
                attributes: spec.attributes.clone(),
                callback: spec.callback.and_then(|p| p.resolve(args)),
            })
        })
    }

    /// Records one call of `original` as a segment described by `plan`.
    ///
    /// Outside a transaction, or if `plan` fails, the original is called
    /// as if it were not wrapped.
    pub(crate) fn intercept_call<P>(&self, original: &Function, call: Call, plan: P) -> Outcome
    where
        P: FnOnce(&ArgView<'_>) -> periscope_core::Result<Interception>,
    {
        let Some(parent) = self.current_segment() else {
            return original.call(call);
        };
        let Some(plan) = self.guard("segment naming", || plan(&call.view())) else {
            return original.call(call);
        };
        let Some(segment) = self.agent().create_segment_under(&parent, &plan.name) else {
            let call = self.bind_arguments(call, &Context::from_segment(parent), None);
            return original.call(call);
        };
        for (key, value) in plan.attributes {
            segment.set_attribute(key, value);
        }
        self.call_in_segment(original, call, &segment, &Context::from_segment(parent), plan.callback)
    }

    /// Calls `original` with `segment` current and ends the segment when
    /// the call completes.
    ///
    /// With a completion callback the segment ends when the callback is
    /// invoked, and the callback runs in `parent`. Other callbacks run in
    /// the segment. A pending result ends the segment when it settles.
    pub(crate) fn call_in_segment(
        &self,
        original: &Function,
        call: Call,
        segment: &Segment,
        parent: &Context,
        callback: Option<usize>,
    ) -> Outcome {
        let segment_context = Context::from_segment(segment.clone());
        let call = match callback {
            Some(index) => self.bind_completion(call, &segment_context, segment, parent, index),
            None => self.bind_arguments(call, &segment_context, None),
        };

        let outcome = {
            let _guard = context::enter(self.agent().id(), segment_context.clone());
            original.call(call)
        };

        match outcome {
            Outcome::Ready(result) => {
                if callback.is_none() || result.is_err() {
                    segment.end_with(status_of(&result));
                }
                Outcome::Ready(result)
            }
            Outcome::Pending(future) => {
                let segment = segment.clone();
                Outcome::Pending(Box::pin(
                    Bound::new(
                        future,
                        Arc::clone(self.agent()),
                        segment_context,
                        self.module_arc(),
                    )
                    .on_settle(move |result: &CallResult| {
                        segment.end_with(status_of(result));
                    }),
                ))
            }
        }
    }

    pub(crate) fn bind_arguments(&self, call: Call, context: &Context, skip: Option<usize>) -> Call {
        let args = call
            .args
            .into_iter()
            .enumerate()
            .map(|(index, arg)| match arg {
                Value::Function(f) if Some(index) != skip => {
                    Value::Function(self.bind_to(&f, context.clone()))
                }
                other => other,
            })
            .collect();
        Call {
            receiver: call.receiver,
            args,
        }
    }

    fn bind_completion(
        &self,
        call: Call,
        segment_context: &Context,
        segment: &Segment,
        parent: &Context,
        index: usize,
    ) -> Call {
        let mut call = self.bind_arguments(call, segment_context, Some(index));
        if let Some(Value::Function(callback)) = call.args.get(index).cloned() {
            let resume = self.bind_to(&callback, parent.clone());
            let segment = segment.clone();
            let completion = Function::wrap(&callback, self.id(), WrapKind::Bound, move |call| {
                let status = if is_error_first(&call.args) {
                    SegmentStatus::Error
                } else {
                    SegmentStatus::Ok
                };
                segment.end_with(status);
                resume.call(call)
            });
            call.args[index] = Value::Function(completion);
        }
        call
    }
}

impl std::fmt::Debug for Shim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shim")
            .field("id", &self.inner.id)
            .field("category", &self.inner.category)
            .field("module_name", &self.inner.module_name)
            .field("resolved_name", &self.inner.resolved_name)
            .field("enabled", &self.inner.enabled)
            .finish_non_exhaustive()
    }
}

pub(crate) const fn status_of<T, E>(result: &std::result::Result<T, E>) -> SegmentStatus {
    match result {
        Ok(_) => SegmentStatus::Ok,
        Err(_) => SegmentStatus::Error,
    }
}

/// Error-first callback convention: a non-null first argument is an error.
fn is_error_first(args: &[Value]) -> bool {
    match args.first() {
        Some(Value::Data(data)) => !(data.is_null() || *data == serde_json::Value::Bool(false)),
        Some(Value::Object(_)) => true,
        _ => false,
    }
}
