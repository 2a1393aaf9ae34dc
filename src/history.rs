/// Bounded in-memory history of recent readings for one tank.
///
/// Fixed capacity, FIFO eviction (oldest entry leaves first), O(1) append.
/// This is the fast tier behind `recent` queries; the durable log in `db`
/// is the authoritative long-term record.

use std::collections::VecDeque;

use crate::model::TankReading;

/// Default per-tank window, matching the original deployment's in-memory cap.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<TankReading>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Capacity below 1 is meaningless and is raised to 1.
    pub fn new(capacity: usize) -> HistoryBuffer {
        let capacity = capacity.max(1);
        HistoryBuffer {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a reading, evicting the oldest entry when full.
    pub fn push(&mut self, reading: TankReading) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(reading);
    }

    /// Up to `limit` readings, most-recent-first.
    pub fn recent(&self, limit: usize) -> Vec<TankReading> {
        self.entries.iter().rev().take(limit).cloned().collect()
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

impl Default for HistoryBuffer {
    fn default() -> Self {
        HistoryBuffer::new(DEFAULT_HISTORY_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
