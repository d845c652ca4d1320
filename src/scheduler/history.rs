//! History of past archive cycles.
//!
//! A fixed-capacity ring: once full, each new record overwrites the oldest.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Number of cycles kept in memory.
pub const MAX_RECORDS_IN_HISTORY: usize = 10;

/// Summary of one archive cycle that selected at least one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveHistoryRecord {
    pub cycle_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Executions listed by the remote server when the cycle started.
    pub remote_executions: usize,
    /// Executions the cycle attempted to archive.
    pub archived_executions: usize,
    /// Ids of the attempted executions, in selection order.
    pub archived_ids: Vec<u32>,
    /// Executions that were actually committed locally.
    pub completed: usize,
}

#[derive(Debug, Clone)]
pub struct ArchiveHistory {
    slots: [Option<ArchiveHistoryRecord>; MAX_RECORDS_IN_HISTORY],
    /// Next slot to write.
    head: usize,
    len: usize,
}

impl Default for ArchiveHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveHistory {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            head: 0,
            len: 0,
        }
    }

    /// Append a record, evicting the oldest one when full.
    pub fn push(&mut self, record: ArchiveHistoryRecord) {
        self.slots[self.head] = Some(record);
        self.head = (self.head + 1) % MAX_RECORDS_IN_HISTORY;
        self.len = (self.len + 1).min(MAX_RECORDS_IN_HISTORY);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &ArchiveHistoryRecord> {
        let start = (self.head + MAX_RECORDS_IN_HISTORY - self.len) % MAX_RECORDS_IN_HISTORY;
        (0..self.len).filter_map(move |i| self.slots[(start + i) % MAX_RECORDS_IN_HISTORY].as_ref())
    }

    /// Owned copy of the records, oldest first.
    pub fn snapshot(&self) -> Vec<ArchiveHistoryRecord> {
        self.iter().cloned().collect()
    }
}
