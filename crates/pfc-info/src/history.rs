//! Bounded access history.
//!
//! Keeps the last [`MAX_ACCESS_RECORDS`] attach/detach sessions of a cached
//! file plus a total attach counter that keeps counting past the retained
//! window.

use std::collections::VecDeque;

use serde::Serialize;

/// Seconds since the Unix epoch, as stored on disk.
pub type Timestamp = i64;

/// Number of access sessions retained (and persisted) per descriptor.
pub const MAX_ACCESS_RECORDS: usize = 3;

/// One access session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessRecord {
    pub attach_time: Timestamp,
    pub detach_time: Timestamp,
    /// Bytes served from the local disk copy
    pub bytes_from_disk: i64,
    /// Bytes served from memory
    pub bytes_from_ram: i64,
    /// Bytes that missed the cache and went remote
    pub bytes_missed_remote: i64,
}

/// Read counters handed over at detach time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub bytes_from_disk: i64,
    pub bytes_from_ram: i64,
    pub bytes_missed_remote: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessHistory {
    access_count: u64,
    records: VecDeque<AccessRecord>,
}

impl AccessHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted state. Keeps only the newest records.
    pub(crate) fn from_parts(access_count: u64, records: Vec<AccessRecord>) -> Self {
        let skip = records.len().saturating_sub(MAX_ACCESS_RECORDS);
        Self {
            access_count,
            records: records.into_iter().skip(skip).collect(),
        }
    }

    /// Start a session: bump the counter and open a new record.
    pub fn on_attach(&mut self, now: Timestamp) {
        self.access_count += 1;
        if self.records.len() >= MAX_ACCESS_RECORDS {
            self.records.pop_front();
        }
        self.records.push_back(AccessRecord {
            attach_time: now,
            ..AccessRecord::default()
        });
    }

    /// Close the newest session with its read counters.
    ///
    /// Does nothing if no session was ever attached.
    pub fn on_detach(&mut self, stats: IoStats, now: Timestamp) {
        if let Some(last) = self.records.back_mut() {
            last.detach_time = now;
            last.bytes_from_disk = stats.bytes_from_disk;
            last.bytes_from_ram = stats.bytes_from_ram;
            last.bytes_missed_remote = stats.bytes_missed_remote;
        }
    }

    /// Detach time of the newest session, if there ever was one.
    pub fn latest_detach_time(&self) -> Option<Timestamp> {
        if self.access_count == 0 {
            return None;
        }
        self.records.back().map(|r| r.detach_time)
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn records(&self) -> impl ExactSizeIterator<Item = &AccessRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
