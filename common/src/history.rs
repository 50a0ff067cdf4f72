use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// One reading as received by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub temperature: f32,
    pub presence: bool,
    /// Timestamp reported by the device; kept verbatim.
    pub device_timestamp: String,
    pub received_at: DateTime<Utc>,
}

/// Fixed-capacity FIFO of the most recent readings, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    records: VecDeque<SensorRecord>,
    capacity: usize,
}

impl HistoryBuffer {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuilds a buffer from persisted records, keeping the newest
    /// `capacity` of them.
    pub fn from_records(capacity: usize, records: impl IntoIterator<Item = SensorRecord>) -> Self {
        let mut buffer = Self::new(capacity);
        for record in records {
            buffer.append(record);
        }
        buffer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&SensorRecord> {
        self.records.back()
    }

    /// Appends `record`, evicting the oldest entry when full.
    ///
    /// `received_at` never goes backwards in insertion order; an earlier
    /// stamp is raised to the previous record's.
    pub fn append(&mut self, mut record: SensorRecord) {
        if let Some(last) = self.records.back() {
            if record.received_at < last.received_at {
                record.received_at = last.received_at;
            }
        }

        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// The last `min(count, len)` records, oldest of them first.
    pub fn recent(&self, count: usize) -> Vec<SensorRecord> {
        let skip = self.records.len().saturating_sub(count);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorRecord> {
        self.records.iter()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
