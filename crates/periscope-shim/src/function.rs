//! Explicit callable objects.
//!
//! A [`Function`] carries the introspectable shape of a library entry point
//! (name, arity, own properties) next to its body. Wrappers are new
//! functions with the same shape that remember the function they replaced.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::props::Shape;
use crate::shim::ShimId;
use crate::value::{Call, CallResult, Outcome, Value};

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u64);

impl FunctionId {
    fn next() -> Self {
        Self(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// How a wrapper relates to the function it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapKind {
    /// Records segments around calls.
    Intercept,
    /// Only re-establishes a captured context.
    Bound,
}

type Body = Arc<dyn Fn(Call) -> Outcome + Send + Sync>;

#[derive(Clone)]
struct FunctionInner {
    id: FunctionId,
    name: String,
    arity: usize,
    props: BTreeMap<String, serde_json::Value>,
    body: Body,
    origin: Option<Origin>,
}

#[derive(Clone)]
struct Origin {
    original: Function,
    shim: ShimId,
    kind: WrapKind,
}

/// A callable library entry point or continuation.
#[derive(Clone)]
pub struct Function {
    inner: Arc<FunctionInner>,
}

impl Function {
    /// Creates a function from a body returning an [`Outcome`].
    pub fn new<F>(name: impl Into<String>, arity: usize, body: F) -> Self
    where
        F: Fn(Call) -> Outcome + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FunctionInner {
                id: FunctionId::next(),
                name: name.into(),
                arity,
                props: BTreeMap::new(),
                body: Arc::new(body),
                origin: None,
            }),
        }
    }

    /// Creates a function that completes synchronously.
    pub fn sync<F>(name: impl Into<String>, arity: usize, body: F) -> Self
    where
        F: Fn(Call) -> CallResult + Send + Sync + 'static,
    {
        Self::new(name, arity, move |call| Outcome::Ready(body(call)))
    }

    /// Creates a function that completes through a future.
    pub fn future<F, Fut>(name: impl Into<String>, arity: usize, body: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        Self::new(name, arity, move |call| Outcome::pending(body(call)))
    }

    /// Adds an own property. Intended for construction, before sharing.
    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Arc::make_mut(&mut self.inner)
            .props
            .insert(key.into(), value.into());
        self
    }

    pub(crate) fn wrap<F>(original: &Self, shim: ShimId, kind: WrapKind, body: F) -> Self
    where
        F: Fn(Call) -> Outcome + Send + Sync + 'static,
    {
        let Shape { name, arity, props } = Shape::of(original);
        Self {
            inner: Arc::new(FunctionInner {
                id: FunctionId::next(),
                name,
                arity,
                props,
                body: Arc::new(body),
                origin: Some(Origin {
                    original: original.clone(),
                    shim,
                    kind,
                }),
            }),
        }
    }

    /// Returns the identity of this function.
    #[must_use]
    pub fn id(&self) -> FunctionId {
        self.inner.id
    }

    /// Returns the declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the declared parameter count.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.inner.arity
    }

    /// Returns the own properties.
    #[must_use]
    pub fn props(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.inner.props
    }

    /// Returns one own property.
    #[must_use]
    pub fn prop(&self, key: &str) -> Option<&serde_json::Value> {
        self.inner.props.get(key)
    }

    /// Invokes the function.
    pub fn call(&self, call: Call) -> Outcome {
        (self.inner.body)(call)
    }

    /// Invokes the function without a receiver.
    pub fn invoke(&self, args: Vec<Value>) -> Outcome {
        self.call(Call::new(args))
    }

    /// Returns the function this one wraps.
    #[must_use]
    pub fn original(&self) -> Option<&Self> {
        self.inner.origin.as_ref().map(|o| &o.original)
    }

    /// Follows wrappers down to the function the library defined.
    #[must_use]
    pub fn unwrapped(&self) -> &Self {
        let mut current = self;
        while let Some(original) = current.original() {
            current = original;
        }
        current
    }

    /// Returns the shim and kind of wrapping, if this is a wrapper.
    #[must_use]
    pub fn wrapper_of(&self) -> Option<(ShimId, WrapKind)> {
        self.inner.origin.as_ref().map(|o| (o.shim, o.kind))
    }

    /// Returns true if this function wraps another.
    #[must_use]
    pub fn is_wrapper(&self) -> bool {
        self.inner.origin.is_some()
    }

    pub(crate) fn is_interceptor_of(&self, shim: ShimId) -> bool {
        self.wrapper_of() == Some((shim, WrapKind::Intercept))
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("arity", &self.inner.arity)
            .field("wrapper", &self.is_wrapper())
            .finish()
    }
}
