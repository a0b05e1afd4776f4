//! Transaction-boundary specialization.
//!
//! For libraries that delimit their own units of work (job runners,
//! custom protocols). A unit started while another is current becomes a
//! `Nested/{name}` segment of it, unless `nest_transactions` is off, in
//! which case it is a transaction of its own that shadows the outer one
//! until it ends.
//!
//! Handles only ever end their own unit. Ending a unit that is not the
//! innermost current one, or ending it twice, is recorded as misuse and
//! ignored.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use periscope_core::{Context, Segment, Transaction, TransactionKind, context};

use crate::bound::{self, Bound};
use crate::shim::Shim;
use crate::spec::Selector;
use crate::target::Target;
use crate::value::Outcome;

#[derive(Debug)]
enum Unit {
    Root(Arc<Transaction>),
    Nested(Segment),
}

/// A unit of work started through [`TransactionShim`].
#[derive(Clone, Debug)]
pub struct TransactionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    unit: Unit,
    previous: Context,
    ended: AtomicBool,
}

impl TransactionHandle {
    /// Returns the segment that represents the unit.
    #[must_use]
    pub fn segment(&self) -> Segment {
        match &self.inner.unit {
            Unit::Root(tx) => tx.root(),
            Unit::Nested(segment) => segment.clone(),
        }
    }

    /// Returns the transaction the unit belongs to.
    #[must_use]
    pub fn transaction(&self) -> Arc<Transaction> {
        match &self.inner.unit {
            Unit::Root(tx) => Arc::clone(tx),
            Unit::Nested(segment) => Arc::clone(segment.transaction()),
        }
    }

    /// Returns true if the unit is a segment of an enclosing transaction.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        matches!(self.inner.unit, Unit::Nested(_))
    }

    /// Returns true once the unit has ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
            || match &self.inner.unit {
                Unit::Root(tx) => !tx.is_active(),
                Unit::Nested(segment) => segment.is_ended(),
            }
    }

    fn mark_ended(&self) -> bool {
        !self.inner.ended.swap(true, Ordering::AcqRel)
    }
}

/// Shim for libraries with explicit units of work.
#[derive(Clone, Debug)]
pub struct TransactionShim {
    shim: Shim,
}

impl TransactionShim {
    pub(crate) const fn new(shim: Shim) -> Self {
        Self { shim }
    }

    /// Starts a background unit of work and makes it current.
    pub fn start_transaction(&self, name: &str) -> Option<TransactionHandle> {
        self.start_transaction_of(TransactionKind::Background, name)
    }

    /// Starts a unit of work of `kind` and makes it current.
    ///
    /// Returns `None` if the module is disabled.
    pub fn start_transaction_of(&self, kind: TransactionKind, name: &str) -> Option<TransactionHandle> {
        if !self.is_enabled() {
            return None;
        }
        let agent = self.agent();
        let previous = agent.current_context();

        let nested = match agent.current_segment() {
            Some(parent) if agent.config().nest_transactions => {
                agent.create_segment_under(&parent, &format!("Nested/{name}"))
            }
            _ => None,
        };
        let unit = match nested {
            Some(segment) => Unit::Nested(segment),
            None => {
                let transaction = agent.start_transaction(kind);
                transaction.set_name(format!("{}/Custom/{name}", kind.prefix()));
                Unit::Root(transaction)
            }
        };

        let handle = TransactionHandle {
            inner: Arc::new(HandleInner {
                unit,
                previous,
                ended: AtomicBool::new(false),
            }),
        };
        agent.set_current_context(Context::from_segment(handle.segment()));
        tracing::debug!(
            module = self.module_name(),
            unit = name,
            nested = handle.is_nested(),
            "unit of work started"
        );
        Some(handle)
    }

    /// Ends the unit and restores the context that was current when it
    /// started.
    ///
    /// Returns false, recording a misuse, if the unit already ended or is
    /// not the innermost current unit.
    pub fn end_transaction(&self, handle: &TransactionHandle) -> bool {
        if handle.is_ended() {
            self.misuse("unit of work already ended");
            return false;
        }
        let unit_segment = handle.segment();
        if self.current_segment().as_ref() != Some(&unit_segment) {
            self.misuse(format!(
                "cannot end `{}`: it is not the innermost current unit",
                unit_segment.name()
            ));
            return false;
        }
        if !self.finish(handle) {
            return false;
        }
        let agent = self.agent();
        let previous = bound::resumable(agent.as_ref(), self.module_name(), &handle.inner.previous);
        agent.set_current_context(previous);
        true
    }

    /// Ends the unit without any context checks and without touching the
    /// current context. For timeout collaborators that reap abandoned work.
    pub fn expire_transaction(&self, handle: &TransactionHandle) -> bool {
        if handle.is_ended() {
            return false;
        }
        tracing::debug!(module = self.module_name(), "expiring unit of work");
        self.finish(handle)
    }

    fn finish(&self, handle: &TransactionHandle) -> bool {
        if !handle.mark_ended() {
            return false;
        }
        match &handle.inner.unit {
            Unit::Root(tx) => self.agent().end_transaction(tx),
            Unit::Nested(segment) => segment.end(),
        }
    }

    /// Renames the unit.
    pub fn set_transaction_name(&self, handle: &TransactionHandle, name: &str) -> bool {
        if handle.is_ended() {
            self.misuse(format!("cannot rename ended unit of work to `{name}`"));
            return false;
        }
        match &handle.inner.unit {
            Unit::Root(tx) => tx.set_name(format!("{}/Custom/{name}", tx.kind().prefix())),
            Unit::Nested(segment) => segment.set_name(format!("Nested/{name}")),
        }
    }

    /// Wraps functions so that every call runs in a transaction of its own,
    /// named after the function. The transaction ends when the call
    /// returns or its future settles.
    pub fn bind_create_transaction(
        &self,
        target: &Target,
        selector: impl Into<Selector>,
        kind: TransactionKind,
    ) -> Target {
        self.shim.wrap_with(target, selector, |original| {
            let shim = self.shim.clone();
            let name = format!("{}/Custom/{}", kind.prefix(), original.name());
            move |call| {
                let agent = shim.agent();
                let transaction = agent.start_transaction(kind);
                transaction.set_name(name.clone());
                let unit = Context::from_segment(transaction.root());

                let outcome = {
                    let _guard = context::enter(agent.id(), unit.clone());
                    original.call(call)
                };
                match outcome {
                    Outcome::Ready(result) => {
                        agent.end_transaction(&transaction);
                        Outcome::Ready(result)
                    }
                    Outcome::Pending(future) => {
                        let finisher = Arc::clone(agent);
                        Outcome::Pending(Box::pin(
                            Bound::new(future, Arc::clone(agent), unit, shim.module_arc())
                                .on_settle(move |_| {
                                    finisher.end_transaction(&transaction);
                                }),
                        ))
                    }
                }
            }
        })
    }
}

impl Deref for TransactionShim {
    type Target = Shim;

    fn deref(&self) -> &Shim {
        &self.shim
    }
}
