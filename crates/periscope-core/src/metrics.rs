//! Scoped and unscoped timing metrics derived from transaction traces.
//!
//! Every non-root segment contributes twice: once unscoped (aggregated
//! across all transactions, e.g. "time in middleware X everywhere") and once
//! scoped to its transaction name (e.g. "time in middleware X within
//! `WebTransaction/Expressjs/GET//foo/:bar`"). The transaction itself
//! contributes one unscoped metric.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transaction::TransactionTrace;

/// Metric identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    /// Metric name.
    pub name: String,
    /// Transaction name for scoped metrics.
    pub scope: Option<String>,
}

impl MetricKey {
    /// Creates an unscoped key.
    #[must_use]
    pub fn unscoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }

    /// Creates a key scoped to a transaction name.
    #[must_use]
    pub fn scoped(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Some(scope.into()),
        }
    }
}

/// Aggregated timing for one metric key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricData {
    /// Number of recorded calls.
    pub call_count: u64,
    /// Sum of durations.
    pub total: Duration,
    /// Shortest duration.
    pub min: Duration,
    /// Longest duration.
    pub max: Duration,
}

impl MetricData {
    fn single(duration: Duration) -> Self {
        Self {
            call_count: 1,
            total: duration,
            min: duration,
            max: duration,
        }
    }

    fn merge(&mut self, other: &Self) {
        self.call_count += other.call_count;
        self.total += other.total;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Table of metrics keyed by name and scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTable {
    metrics: BTreeMap<MetricKey, MetricData>,
}

impl MetricTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the metrics of one finished transaction.
    #[must_use]
    pub fn from_trace(trace: &TransactionTrace) -> Self {
        let mut table = Self::new();
        table.record(MetricKey::unscoped(&trace.name), trace.duration);
        for segment in trace.segments.iter().filter(|s| !s.id.is_root()) {
            let duration = segment
                .duration()
                .unwrap_or_else(|| trace.duration.saturating_sub(segment.start));
            table.record(MetricKey::unscoped(&segment.name), duration);
            table.record(MetricKey::scoped(&segment.name, &trace.name), duration);
        }
        table
    }

    /// Adds one call of `duration` under `key`.
    pub fn record(&mut self, key: MetricKey, duration: Duration) {
        let single = MetricData::single(duration);
        self.metrics
            .entry(key)
            .and_modify(|data| data.merge(&single))
            .or_insert(single);
    }

    /// Folds another table into this one.
    pub fn merge(&mut self, other: &Self) {
        for (key, data) in &other.metrics {
            self.metrics
                .entry(key.clone())
                .and_modify(|existing| existing.merge(data))
                .or_insert(*data);
        }
    }

    /// Looks up a metric.
    #[must_use]
    pub fn get(&self, name: &str, scope: Option<&str>) -> Option<&MetricData> {
        let key = MetricKey {
            name: name.to_string(),
            scope: scope.map(str::to_string),
        };
        self.metrics.get(&key)
    }

    /// Returns the unscoped call count of `name` (zero if absent).
    #[must_use]
    pub fn unscoped_count(&self, name: &str) -> u64 {
        self.get(name, None).map_or(0, |d| d.call_count)
    }

    /// Returns the call count of `name` within `scope` (zero if absent).
    #[must_use]
    pub fn scoped_count(&self, name: &str, scope: &str) -> u64 {
        self.get(name, Some(scope)).map_or(0, |d| d.call_count)
    }

    /// Iterates all metrics in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&MetricKey, &MetricData)> {
        self.metrics.iter()
    }

    /// Returns the number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns true if the table has no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
