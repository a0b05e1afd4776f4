//! Context-bound continuations.
//!
//! A continuation runs later, from wherever the library decides to call it.
//! Binding captures a [`Context`] and re-enters it for every invocation (or,
//! for futures, every poll), restoring whatever was current afterwards.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::future::BoxFuture;
use periscope_core::{AgentContext, Context, Diagnostic, context};

use crate::function::{Function, WrapKind};
use crate::shim::ShimId;
use crate::value::Outcome;

type Finish<T> = Box<dyn FnOnce(&T) + Send>;

/// A future that runs inside a captured context.
///
/// If the captured transaction has ended by the time the future is polled,
/// the poll runs in the empty context instead and a misuse is recorded once.
#[must_use = "futures do nothing unless polled"]
pub struct Bound<T> {
    future: BoxFuture<'static, T>,
    agent: Arc<dyn AgentContext>,
    context: Context,
    module: Arc<str>,
    finish: Option<Finish<T>>,
    stale: bool,
}

impl<T: 'static> Bound<T> {
    pub(crate) fn new<F>(
        future: F,
        agent: Arc<dyn AgentContext>,
        context: Context,
        module: Arc<str>,
    ) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
            agent,
            context,
            module,
            finish: None,
            stale: false,
        }
    }

    /// Runs `finish` with the output once the future completes.
    pub(crate) fn on_settle<F>(mut self, finish: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.finish = Some(Box::new(finish));
        self
    }

    /// Returns the captured context.
    pub const fn context(&self) -> &Context {
        &self.context
    }
}

impl<T> Future for Bound<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<T> {
        let this = self.get_mut();
        let context = if this.context.is_resumable() {
            this.context.clone()
        } else {
            if !this.stale {
                this.stale = true;
                report_stale(this.agent.as_ref(), &this.module, &this.context);
            }
            Context::empty()
        };

        let poll = {
            let _guard = context::enter(this.agent.id(), context);
            this.future.as_mut().poll(cx)
        };
        if let Poll::Ready(output) = &poll {
            if let Some(finish) = this.finish.take() {
                finish(output);
            }
        }
        poll
    }
}

impl<T> std::fmt::Debug for Bound<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bound")
            .field("context", &self.context)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// Returns `context`, or the empty context if its transaction has ended.
pub(crate) fn resumable(agent: &dyn AgentContext, module: &str, context: &Context) -> Context {
    if context.is_resumable() {
        context.clone()
    } else {
        report_stale(agent, module, context);
        Context::empty()
    }
}

fn report_stale(agent: &dyn AgentContext, module: &str, stale: &Context) {
    let transaction = stale
        .transaction()
        .map(|tx| tx.id().to_string())
        .unwrap_or_default();
    agent.record_diagnostic(Diagnostic::misuse(
        module,
        format!("attempt to resume ended transaction {transaction}"),
    ));
}

/// Wraps `function` so every call runs inside `context`.
///
/// Pending results are bound to the same context.
pub(crate) fn bind_function(
    agent: Arc<dyn AgentContext>,
    shim: ShimId,
    module: Arc<str>,
    function: &Function,
    context: Context,
) -> Function {
    let target = function.clone();
    Function::wrap(function, shim, WrapKind::Bound, move |call| {
        let context = resumable(agent.as_ref(), &module, &context);
        let outcome = {
            let _guard = context::enter(agent.id(), context.clone());
            target.call(call)
        };
        match outcome {
            Outcome::Pending(future) => Outcome::Pending(Box::pin(Bound::new(
                future,
                Arc::clone(&agent),
                context,
                Arc::clone(&module),
            ))),
            ready @ Outcome::Ready(_) => ready,
        }
    })
}
