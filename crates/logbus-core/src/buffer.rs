//! Bounded entry buffers.
//!
//! The backlog holds raw entries while dispatch is unavailable and sheds the
//! oldest tenth of its capacity when it overflows. The history holds formatted
//! entries and is trimmed from the front to its limit. The two never share
//! capacity.

use std::collections::VecDeque;

use serde_json::Value;

use crate::entry::LogEntry;

/// Pending entries awaiting dispatch.
#[derive(Debug, Clone)]
pub struct Backlog {
    entries: VecDeque<LogEntry>,
    limit: usize,
}

impl Backlog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    /// Number of entries dropped on each overflow.
    ///
    /// At least one, so the length never exceeds the limit even when a tenth
    /// of the limit rounds down to zero.
    pub fn overflow_drop(&self) -> usize {
        (self.limit / 10).max(1)
    }

    /// Append an entry, dropping the oldest ones on overflow.
    ///
    /// Returns the number of entries dropped.
    pub fn push(&mut self, entry: LogEntry) -> usize {
        self.entries.push_back(entry);
        if self.entries.len() <= self.limit {
            return 0;
        }
        let drop = self.overflow_drop().min(self.entries.len());
        self.entries.drain(..drop);
        drop
    }

    /// Take every entry, oldest first, leaving the backlog empty.
    pub fn drain(&mut self) -> Vec<LogEntry> {
        self.entries.drain(..).collect()
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        if self.entries.len() > limit {
            let excess = self.entries.len() - limit;
            self.entries.drain(..excess);
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

/// Formatted copies of the most recently dispatched entries.
#[derive(Debug, Clone)]
pub struct History {
    records: VecDeque<Value>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// Append a formatted entry, keeping only the newest `limit` records.
    pub fn record(&mut self, formatted: Value) {
        self.records.push_back(formatted);
        while self.records.len() > self.limit {
            self.records.pop_front();
        }
    }

    /// Copy of the records in arrival order.
    pub fn snapshot(&self) -> Vec<Value> {
        self.records.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        while self.records.len() > limit {
            self.records.pop_front();
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
