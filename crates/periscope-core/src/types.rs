//! Identifiers and state enums shared by transactions and segments.
//!
//! Transaction lifecycle is a strict state machine:
//! ```text
//! (none) → Active → Ended
//! ```
//! `Ended` is terminal. Resuming an ended transaction is ignored.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_AGENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of an agent instance.
///
/// Keys the per-thread ambient context slot, so two agents in one process
/// never observe each other's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(u64);

impl AgentId {
    /// Allocates a fresh process-unique agent ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_AGENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// Unique identifier for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    /// Creates a new random transaction ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a segment inside its transaction's segment arena.
///
/// The root segment is always `SegmentId::ROOT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(u32);

impl SegmentId {
    /// The root segment of every transaction.
    pub const ROOT: Self = Self(0);

    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns true for the root segment.
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

/// What kind of work a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Inbound web request.
    Web,
    /// Background job or explicitly delimited unit of work.
    Background,
    /// Delivery of a message from a broker.
    Message,
}

impl TransactionKind {
    /// Returns the metric prefix used for transaction names of this kind.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Web => "WebTransaction",
            Self::Background => "OtherTransaction",
            Self::Message => "OtherTransaction/Message",
        }
    }

    /// Returns the name used when nothing more specific was recorded.
    #[must_use]
    pub fn default_name(&self) -> String {
        format!("{}/Unknown", self.prefix())
    }
}

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Root segment started, children may be created.
    Active,
    /// Terminal.
    Ended,
}

impl TransactionState {
    /// Returns true if the transaction is in its terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

/// Completion status of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentStatus {
    /// Still running.
    Running,
    /// Work completed successfully.
    Ok,
    /// Work completed with an error.
    Error,
    /// The transaction ended while the segment was still running.
    Truncated,
}

impl SegmentStatus {
    /// Returns true once the segment has stopped.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}
