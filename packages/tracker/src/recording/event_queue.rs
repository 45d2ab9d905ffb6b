// packages/tracker/src/recording/event_queue.rs
//! Bounded FIFO queue of pending events
//!
//! Owned exclusively by the writer task, so no internal synchronization is
//! needed. When an append pushes the queue past `max_length`, the oldest
//! records are evicted until exactly `max_length` remain.

use crate::recording::event::EventRecord;
use std::collections::VecDeque;
use tracing::debug;

/// Bounded event queue
#[derive(Debug, Clone)]
pub struct EventQueue {
    /// Pending records, oldest first
    events: VecDeque<EventRecord>,

    /// Capacity bound
    max_length: usize,

    /// Records appended since creation
    append_count: u64,

    /// Records dropped by eviction
    evict_count: u64,

    /// Records removed after confirmed delivery
    delivered_count: u64,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new(max_length: usize) -> Self {
        Self {
            events: VecDeque::new(),
            max_length,
            append_count: 0,
            evict_count: 0,
            delivered_count: 0,
        }
    }

    /// Create a queue holding previously persisted records
    ///
    /// No eviction is applied; the snapshot may have been written under a
    /// larger capacity. Call [`EventQueue::evict_overflow`] afterwards.
    pub fn with_records(records: Vec<EventRecord>, max_length: usize) -> Self {
        Self {
            events: records.into(),
            ..Self::new(max_length)
        }
    }

    /// Append a record at the tail, then evict overflow
    ///
    /// Returns the number of evicted records.
    pub fn append(&mut self, record: EventRecord) -> usize {
        self.events.push_back(record);
        self.append_count += 1;
        self.evict_overflow()
    }

    /// Drop the oldest records until the queue fits `max_length`
    pub fn evict_overflow(&mut self) -> usize {
        if self.events.len() <= self.max_length {
            return 0;
        }

        let excess = self.events.len() - self.max_length;
        self.events.drain(..excess);
        self.evict_count += excess as u64;

        debug!("Evicted {} oldest events (capacity {})", excess, self.max_length);
        excess
    }

    /// Clone the first `min(len, limit)` records, oldest first
    pub fn peek_batch(&self, limit: usize) -> Vec<EventRecord> {
        self.events.iter().take(limit).cloned().collect()
    }

    /// Remove the first `n` records after they were delivered
    pub fn remove_front(&mut self, n: usize) -> usize {
        let n = n.min(self.events.len());
        self.events.drain(..n);
        self.delivered_count += n as u64;
        n
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            append_count: self.append_count,
            evict_count: self.evict_count,
            delivered_count: self.delivered_count,
            current_size: self.events.len(),
            capacity: self.max_length,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    /// Total events appended
    pub append_count: u64,

    /// Total events evicted (queue over capacity)
    pub evict_count: u64,

    /// Total events removed after delivery
    pub delivered_count: u64,

    /// Current queue size
    pub current_size: usize,

    /// Queue capacity
    pub capacity: usize,
}

impl QueueStats {
    /// Calculate fill percentage
    pub fn fill_percentage(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }

    /// Calculate eviction rate
    pub fn evict_rate(&self) -> f64 {
        if self.append_count == 0 {
            0.0
        } else {
            (self.evict_count as f64 / self.append_count as f64) * 100.0
        }
    }
}
