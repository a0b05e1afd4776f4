//! Transactions and their segment trees.
//!
//! A transaction owns an arena of segment records. [`Segment`] is a cheap
//! handle (transaction + index) that can be stored in contexts and moved
//! into continuations; the records die with the transaction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{
    AgentId, SegmentId, SegmentStatus, TransactionId, TransactionKind, TransactionState,
};

/// One unit of monitored work.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    kind: TransactionKind,
    agent: AgentId,
    started: Instant,
    max_segments: usize,
    inner: Mutex<TransactionInner>,
}

#[derive(Debug)]
struct TransactionInner {
    state: TransactionState,
    name: Option<String>,
    name_parts: Vec<String>,
    attributes: BTreeMap<String, serde_json::Value>,
    segments: Vec<SegmentRecord>,
    duration: Option<Duration>,
}

/// Recorded state of one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// Position in the arena.
    pub id: SegmentId,
    /// Metric name of the segment.
    pub name: String,
    /// Parent segment; `None` only for the root.
    pub parent: Option<SegmentId>,
    /// Offset from the transaction start.
    pub start: Duration,
    /// Offset from the transaction start, once ended.
    pub end: Option<Duration>,
    /// Completion status.
    pub status: SegmentStatus,
    /// Category-specific attributes (query, destination, route...).
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl SegmentRecord {
    /// Returns the elapsed time, if the segment has ended.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_sub(self.start))
    }
}

/// Immutable snapshot of a transaction handed to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionTrace {
    /// Transaction ID.
    pub id: TransactionId,
    /// Final transaction name.
    pub name: String,
    /// Transaction kind.
    pub kind: TransactionKind,
    /// State at snapshot time.
    pub state: TransactionState,
    /// Total duration (elapsed so far if still active).
    pub duration: Duration,
    /// Transaction-level attributes.
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Segment arena, root first.
    pub segments: Vec<SegmentRecord>,
}

impl TransactionTrace {
    /// Returns the non-root segments with the given name.
    #[must_use]
    pub fn segments_named(&self, name: &str) -> Vec<&SegmentRecord> {
        self.segments
            .iter()
            .filter(|s| !s.id.is_root() && s.name == name)
            .collect()
    }

    /// Returns the children of `parent`.
    #[must_use]
    pub fn children_of(&self, parent: SegmentId) -> Vec<&SegmentRecord> {
        self.segments
            .iter()
            .filter(|s| s.parent == Some(parent))
            .collect()
    }
}

impl Transaction {
    pub(crate) fn start(agent: AgentId, kind: TransactionKind, max_segments: usize) -> Arc<Self> {
        let root = SegmentRecord {
            id: SegmentId::ROOT,
            name: kind.default_name(),
            parent: None,
            start: Duration::ZERO,
            end: None,
            status: SegmentStatus::Running,
            attributes: BTreeMap::new(),
        };
        Arc::new(Self {
            id: TransactionId::new(),
            kind,
            agent,
            started: Instant::now(),
            max_segments: max_segments.max(1),
            inner: Mutex::new(TransactionInner {
                state: TransactionState::Active,
                name: None,
                name_parts: Vec::new(),
                attributes: BTreeMap::new(),
                segments: vec![root],
                duration: None,
            }),
        })
    }

    /// Returns the transaction ID.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the transaction kind.
    #[must_use]
    pub const fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Returns the agent that started this transaction.
    #[must_use]
    pub const fn agent(&self) -> AgentId {
        self.agent
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Returns true until the transaction ends.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Returns the transaction name, or the kind's default.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner
            .lock()
            .name
            .clone()
            .unwrap_or_else(|| self.kind.default_name())
    }

    /// Returns true once a name has been assigned.
    #[must_use]
    pub fn has_name(&self) -> bool {
        self.inner.lock().name.is_some()
    }

    /// Renames the transaction. Ignored once ended.
    pub fn set_name(&self, name: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        let name = name.into();
        if let Some(root) = inner.segments.first_mut() {
            root.name.clone_from(&name);
        }
        inner.name = Some(name);
        true
    }

    /// Pushes a partial name (e.g. a router mount path).
    pub fn push_name_part(&self, part: impl Into<String>) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.name_parts.push(part.into());
        }
    }

    /// Pops the most recent partial name.
    pub fn pop_name_part(&self) -> Option<String> {
        self.inner.lock().name_parts.pop()
    }

    /// Returns the partial names joined into one path.
    #[must_use]
    pub fn name_path(&self) -> String {
        let inner = self.inner.lock();
        let mut path = String::new();
        for part in &inner.name_parts {
            let trimmed = part.trim_end_matches('/');
            if !trimmed.is_empty() {
                if !trimmed.starts_with('/') {
                    path.push('/');
                }
                path.push_str(trimmed);
            }
        }
        path
    }

    /// Sets a transaction-level attribute.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.attributes.insert(key.into(), value.into());
        }
    }

    /// Returns a transaction-level attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().attributes.get(key).cloned()
    }

    /// Returns a handle to the root segment.
    #[must_use]
    pub fn root(self: &Arc<Self>) -> Segment {
        Segment {
            transaction: Arc::clone(self),
            id: SegmentId::ROOT,
        }
    }

    /// Creates a child segment under `parent`.
    ///
    /// Returns `None` once the transaction has ended or the segment limit
    /// has been reached. An unknown parent falls back to the root.
    pub fn create_segment(
        self: &Arc<Self>,
        name: impl Into<String>,
        parent: SegmentId,
    ) -> Option<Segment> {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() || inner.segments.len() >= self.max_segments {
            return None;
        }
        let parent = if parent.index() < inner.segments.len() {
            parent
        } else {
            SegmentId::ROOT
        };
        let id = SegmentId::from_index(inner.segments.len());
        inner.segments.push(SegmentRecord {
            id,
            name: name.into(),
            parent: Some(parent),
            start: self.started.elapsed(),
            end: None,
            status: SegmentStatus::Running,
            attributes: BTreeMap::new(),
        });
        Some(Segment {
            transaction: Arc::clone(self),
            id,
        })
    }

    /// Returns true if the segment limit has been reached.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.lock().segments.len() >= self.max_segments
    }

    /// Ends the transaction.
    ///
    /// Only the first call has an effect; it returns true. Segments still
    /// running are closed at the end time with status `Truncated`.
    pub fn end(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        let now = self.started.elapsed();
        inner.state = TransactionState::Ended;
        inner.duration = Some(now);
        for segment in &mut inner.segments {
            if segment.end.is_none() {
                segment.end = Some(now);
                segment.status = if segment.id.is_root() {
                    SegmentStatus::Ok
                } else {
                    SegmentStatus::Truncated
                };
            }
        }
        true
    }

    /// Returns a copy of one segment record.
    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<SegmentRecord> {
        self.inner.lock().segments.get(id.index()).cloned()
    }

    /// Returns copies of all segment records, root first.
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentRecord> {
        self.inner.lock().segments.clone()
    }

    /// Takes a snapshot of the transaction.
    #[must_use]
    pub fn trace(&self) -> TransactionTrace {
        let inner = self.inner.lock();
        TransactionTrace {
            id: self.id,
            name: inner
                .name
                .clone()
                .unwrap_or_else(|| self.kind.default_name()),
            kind: self.kind,
            state: inner.state,
            duration: inner.duration.unwrap_or_else(|| self.started.elapsed()),
            attributes: inner.attributes.clone(),
            segments: inner.segments.clone(),
        }
    }
}

/// Handle to a segment inside a transaction.
#[derive(Clone)]
pub struct Segment {
    transaction: Arc<Transaction>,
    id: SegmentId,
}

impl Segment {
    /// Returns the segment ID.
    #[must_use]
    pub const fn id(&self) -> SegmentId {
        self.id
    }

    /// Returns the owning transaction.
    #[must_use]
    pub const fn transaction(&self) -> &Arc<Transaction> {
        &self.transaction
    }

    /// Returns the segment name.
    #[must_use]
    pub fn name(&self) -> String {
        self.transaction
            .segment(self.id)
            .map(|s| s.name)
            .unwrap_or_default()
    }

    /// Returns the parent segment ID.
    #[must_use]
    pub fn parent(&self) -> Option<SegmentId> {
        self.transaction.segment(self.id).and_then(|s| s.parent)
    }

    /// Renames a running segment.
    pub fn set_name(&self, name: impl Into<String>) -> bool {
        let mut inner = self.transaction.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        match inner.segments.get_mut(self.id.index()) {
            Some(record) if record.end.is_none() => {
                record.name = name.into();
                true
            }
            _ => false,
        }
    }

    /// Sets an attribute on the segment.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let mut inner = self.transaction.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        if let Some(record) = inner.segments.get_mut(self.id.index()) {
            record.attributes.insert(key.into(), value.into());
        }
    }

    /// Ends the segment successfully.
    pub fn end(&self) -> bool {
        self.end_with(SegmentStatus::Ok)
    }

    /// Ends the segment with `status`.
    ///
    /// The end time is immutable: only the first call has an effect, and
    /// calls after the transaction ended are ignored.
    pub fn end_with(&self, status: SegmentStatus) -> bool {
        let elapsed = self.transaction.started.elapsed();
        let mut inner = self.transaction.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        match inner.segments.get_mut(self.id.index()) {
            Some(record) if record.end.is_none() => {
                record.end = Some(elapsed);
                record.status = status;
                true
            }
            _ => false,
        }
    }

    /// Returns true once the segment has an end time.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.transaction
            .segment(self.id)
            .is_none_or(|s| s.end.is_some())
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.transaction.id == other.transaction.id
    }
}

impl Eq for Segment {}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("transaction", &self.transaction.id)
            .field("id", &self.id)
            .finish()
    }
}
