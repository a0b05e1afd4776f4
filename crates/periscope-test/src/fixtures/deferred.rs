//! Mock promise library.
//!
//! `then(onFulfilled)` queues continuations until `resolve(value)` runs them,
//! from whatever context the resolver happens to be in. `cast(probe)` returns
//! a future that suspends once and then calls `probe`.

use std::sync::Arc;

use parking_lot::Mutex;
use periscope_shim::{Function, PromiseShim, Target, Value};

use super::yield_once;

#[derive(Debug, Default)]
struct State {
    value: Option<Value>,
    continuations: Vec<Function>,
}

/// A single deferred value.
#[derive(Debug, Clone)]
pub struct MockPromise {
    target: Target,
    state: Arc<Mutex<State>>,
}

impl MockPromise {
    /// Creates an unresolved promise.
    #[must_use]
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(State::default()));

        let chain = Arc::clone(&state);
        let then = Function::sync("then", 2, move |call| {
            let Some(Value::Function(continuation)) = call.arg(0).cloned() else {
                return Ok(Value::Undefined);
            };
            let settled = {
                let mut state = chain.lock();
                if state.value.is_none() {
                    state.continuations.push(continuation.clone());
                }
                state.value.clone()
            };
            if let Some(value) = settled {
                let _ = continuation.invoke(vec![value]);
            }
            Ok(Value::Undefined)
        });

        let settle = Arc::clone(&state);
        let resolve = Function::sync("resolve", 1, move |call| {
            let value = call.arg(0).cloned().unwrap_or_default();
            let continuations = {
                let mut state = settle.lock();
                if state.value.is_some() {
                    return Ok(Value::from(false));
                }
                state.value = Some(value.clone());
                std::mem::take(&mut state.continuations)
            };
            for continuation in continuations {
                let _ = continuation.invoke(vec![value.clone()]);
            }
            Ok(Value::from(true))
        });

        let cast = Function::future("cast", 1, |call| {
            let probe = call.arg(0).and_then(Value::as_function).cloned();
            async move {
                yield_once().await;
                match probe {
                    Some(probe) => probe.invoke(vec![]).settle().await,
                    None => Ok(Value::Undefined),
                }
            }
        });

        Self {
            target: Target::new("Promise")
                .with("then", then)
                .with("resolve", resolve)
                .with("cast", cast),
            state,
        }
    }

    /// Returns the promise object.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Resolves through the library's own `resolve`.
    pub fn resolve(&self, value: impl Into<Value>) {
        let _ = self.target.call_method("resolve", vec![value.into()]);
    }

    /// Returns the number of continuations still waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().continuations.len()
    }
}

impl Default for MockPromise {
    fn default() -> Self {
        Self::new()
    }
}

/// Instruments the library the way a promise script would.
pub fn instrument(shim: &PromiseShim, promise: &Target) {
    shim.wrap_chain_method(promise, "then");
    shim.wrap_cast(promise, "cast");
}
