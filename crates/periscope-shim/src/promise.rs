//! Promise-chain specialization.
//!
//! Continuations attached with `then`-style methods run whenever the
//! library settles the underlying value, usually from some unrelated
//! execution. Binding them at attachment time keeps them in the context of
//! the code that attached them.

use std::ops::Deref;

use crate::shim::Shim;
use crate::spec::Selector;
use crate::target::Target;
use crate::value::{Call, Outcome, Value};

/// Shim for promise libraries.
#[derive(Clone, Debug)]
pub struct PromiseShim {
    shim: Shim,
}

impl PromiseShim {
    pub(crate) const fn new(shim: Shim) -> Self {
        Self { shim }
    }

    /// Wraps continuation-registration methods.
    ///
    /// Every function argument is bound to the context current when the
    /// method is called, including the empty context, so a continuation
    /// never inherits the context of whoever settles the chain. Results
    /// pass through untouched.
    pub fn wrap_chain_method(&self, target: &Target, selector: impl Into<Selector>) -> Target {
        self.shim.wrap_with(target, selector, |original| {
            let shim = self.shim.clone();
            move |call: Call| {
                let attached = shim.agent().current_context();
                let args = call
                    .args
                    .into_iter()
                    .map(|arg| match arg {
                        Value::Function(f) => Value::Function(shim.bind_to(&f, attached.clone())),
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

    /// Wraps methods that return futures (`cast`, `resolve`...) so the
    /// returned future runs in the caller's context.
    pub fn wrap_cast(&self, target: &Target, selector: impl Into<Selector>) -> Target {
        self.shim.wrap_with(target, selector, |original| {
            let shim = self.shim.clone();
            move |call: Call| {
                let context = shim.agent().current_context();
                match original.call(call) {
                    Outcome::Pending(future) => {
                        Outcome::Pending(Box::pin(shim.bind_future_to(future, context)))
                    }
                    ready @ Outcome::Ready(_) => ready,
                }
            }
        })
    }
}

impl Deref for PromiseShim {
    type Target = Shim;

    fn deref(&self) -> &Shim {
        &self.shim
    }
}
