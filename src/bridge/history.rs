//! Bounded most-recent-first list of decoded contacts for the status display.
use std::collections::VecDeque;

use crate::adif::ContactRecord;

/// Number of contacts kept for the "recent contacts" panel.
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct HistoryList {
    entries: VecDeque<ContactRecord>,
    capacity: usize,
}

impl Default for HistoryList {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryList {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the head, evicting the oldest entry past capacity.
    /// Repeat contacts with the same station are kept as separate entries.
    pub fn record(&mut self, record: ContactRecord) {
        self.entries.push_front(record);
        self.entries.truncate(self.capacity);
    }

    /// Owned copy, newest first.
    pub fn snapshot(&self) -> Vec<ContactRecord> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&ContactRecord> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
