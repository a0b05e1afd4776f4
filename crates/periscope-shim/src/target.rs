//! Monitored library objects.
//!
//! A [`Target`] is the capability surface a library binding exposes: a
//! shared, mutable table of named values. Wrapping replaces entries in the
//! table; every holder of the target sees the replacement.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::function::Function;
use crate::value::{Call, Outcome, Value};

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

/// A shared table of named values.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

struct TargetInner {
    id: TargetId,
    name: String,
    props: RwLock<BTreeMap<String, Value>>,
}

impl Target {
    /// Creates an empty target.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: TargetId(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.into(),
                props: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns the identity of this target.
    #[must_use]
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Returns the descriptive name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.props.read().get(key).cloned()
    }

    /// Returns a property if it is a function.
    #[must_use]
    pub fn function(&self, key: &str) -> Option<Function> {
        match self.get(key) {
            Some(Value::Function(function)) => Some(function),
            _ => None,
        }
    }

    /// Sets a property, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.props.write().insert(key.into(), value.into())
    }

    /// Returns true if the property exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.props.read().contains_key(key)
    }

    /// Returns the property names in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.props.read().keys().cloned().collect()
    }

    /// Resolves a dotted path to the object holding its last component.
    ///
    /// `"prototype.query"` yields the `prototype` object and `"query"`.
    /// Returns `None` if an intermediate component is not an object.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<(Self, String)> {
        let mut parts = path.split('.').filter(|p| !p.is_empty()).peekable();
        let mut holder = self.clone();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                return Some((holder, part.to_string()));
            }
            holder = match holder.get(part) {
                Some(Value::Object(next)) => next,
                _ => return None,
            };
        }
        None
    }

    /// Calls the function stored under `key` with this target as receiver.
    pub fn call_method(&self, key: &str, args: Vec<Value>) -> Outcome {
        match self.function(key) {
            Some(function) => function.call(Call::method(self.clone(), args)),
            None => Outcome::err(format!("{}.{key} is not a function", self.name())),
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("keys", &self.keys())
            .finish()
    }
}
