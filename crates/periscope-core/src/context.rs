//! Ambient transaction context.
//!
//! Execution is cooperative: many units of work interleave on one thread and
//! the "current" context is a per-thread, per-agent slot that must be saved
//! and restored around every suspension point. [`enter`] returns a guard that
//! puts the previous context back when dropped, so nesting unwinds in LIFO
//! order even when the guarded code panics.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use crate::transaction::{Segment, Transaction};
use crate::types::AgentId;

thread_local! {
    static CURRENT: RefCell<HashMap<AgentId, Context>> = RefCell::new(HashMap::new());
}

/// The transaction/segment pair that lookups observe.
///
/// An empty context means "not inside monitored work".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Context {
    segment: Option<Segment>,
}

impl Context {
    /// The empty context.
    #[must_use]
    pub const fn empty() -> Self {
        Self { segment: None }
    }

    /// A context whose active segment is `segment`.
    #[must_use]
    pub const fn from_segment(segment: Segment) -> Self {
        Self {
            segment: Some(segment),
        }
    }

    /// Returns the active segment.
    #[must_use]
    pub const fn segment(&self) -> Option<&Segment> {
        self.segment.as_ref()
    }

    /// Returns the transaction of the active segment.
    #[must_use]
    pub fn transaction(&self) -> Option<&Arc<Transaction>> {
        self.segment.as_ref().map(Segment::transaction)
    }

    /// Returns true if no segment is active.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.segment.is_none()
    }

    /// Returns false if the context refers to an ended transaction.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.transaction().is_none_or(|tx| tx.is_active())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.segment {
            Some(segment) => f.debug_tuple("Context").field(segment).finish(),
            None => f.write_str("Context(empty)"),
        }
    }
}

/// Returns the current context of `agent` on this thread.
#[must_use]
pub fn current(agent: AgentId) -> Context {
    CURRENT
        .try_with(|slots| slots.borrow().get(&agent).cloned())
        .ok()
        .flatten()
        .unwrap_or_default()
}

/// Installs `context` for `agent` on this thread and returns the previous one.
pub fn replace(agent: AgentId, context: Context) -> Context {
    CURRENT
        .try_with(|slots| {
            let mut slots = slots.borrow_mut();
            if context.is_empty() {
                slots.remove(&agent)
            } else {
                slots.insert(agent, context)
            }
        })
        .ok()
        .flatten()
        .unwrap_or_default()
}

/// Installs `context` until the returned guard is dropped.
#[must_use = "the context is restored as soon as the guard is dropped"]
pub fn enter(agent: AgentId, context: Context) -> ContextGuard {
    let previous = replace(agent, context);
    ContextGuard {
        agent,
        previous: Some(previous),
        _not_send: PhantomData,
    }
}

/// Restores the previous context on drop.
///
/// Not `Send`: the slot it restores belongs to the current thread.
pub struct ContextGuard {
    agent: AgentId,
    previous: Option<Context>,
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            replace(self.agent, previous);
        }
    }
}

impl std::fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextGuard")
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}
