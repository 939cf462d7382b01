//! Test helpers for code that persists descriptors.
//!
//! - [`MemoryHandle`]: in-memory backing handle with fault injection and lock
//!   inspection
//! - [`LegacyImage`]: builder for v1 sidecar bytes
//!
//! # Usage
//!
//! ```
//! use pfc_info::testing::MemoryHandle;
//! use pfc_info::{CacheDescriptor, DescriptorOptions};
//!
//! let handle = MemoryHandle::new();
//! let mut d = CacheDescriptor::with_geometry(DescriptorOptions::default(), 4096, 1 << 20).unwrap();
//! d.write_locked(&handle, "doc").unwrap();
//! assert!(!handle.is_locked());
//! ```

use std::cell::{Cell, RefCell};
use std::io;

use crate::bitmap;
use crate::handle::BackingHandle;

/// Growable in-memory byte store.
#[derive(Debug, Default)]
pub struct MemoryHandle {
    data: RefCell<Vec<u8>>,
    locked: Cell<bool>,
    external_lock: Cell<bool>,
    lock_attempts: Cell<usize>,
    read_calls: Cell<usize>,
    fail_write_at: Cell<Option<u64>>,
    resized_unlocked: Cell<bool>,
}

impl MemoryHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let handle = Self::new();
        *handle.data.borrow_mut() = bytes;
        handle
    }

    /// Snapshot of the stored bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    pub fn truncate(&self, len: usize) {
        self.data.borrow_mut().truncate(len);
    }

    /// Toggle one bit of the stored bytes.
    pub fn flip_bit(&self, byte: usize, bit: u8) {
        self.data.borrow_mut()[byte] ^= 1 << bit;
    }

    /// Make the write starting at `offset` write nothing.
    pub fn fail_write_at(&self, offset: u64) {
        self.fail_write_at.set(Some(offset));
    }

    pub fn clear_faults(&self) {
        self.fail_write_at.set(None);
    }

    /// Simulate another writer holding the lock.
    pub fn hold_external_lock(&self, held: bool) {
        self.external_lock.set(held);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    pub fn lock_attempts(&self) -> usize {
        self.lock_attempts.get()
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.get()
    }

    /// Whether `set_len` was ever called without the lock held.
    pub fn resized_without_lock(&self) -> bool {
        self.resized_unlocked.get()
    }
}

impl BackingHandle for MemoryHandle {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.read_calls.set(self.read_calls.get() + 1);
        let data = self.data.borrow();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        if self.fail_write_at.get() == Some(offset) {
            return Ok(0);
        }
        let mut data = self.data.borrow_mut();
        let start = offset as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        if !self.locked.get() {
            self.resized_unlocked.set(true);
        }
        self.data.borrow_mut().resize(len as usize, 0);
        Ok(())
    }

    fn try_lock_exclusive(&self) -> io::Result<bool> {
        self.lock_attempts.set(self.lock_attempts.get() + 1);
        if self.external_lock.get() || self.locked.get() {
            return Ok(false);
        }
        self.locked.set(true);
        Ok(true)
    }

    fn unlock(&self) -> io::Result<()> {
        self.locked.set(false);
        Ok(())
    }
}

/// Builder for v1 (legacy) sidecar bytes.
#[derive(Debug, Clone)]
pub struct LegacyImage {
    block_size: i64,
    file_size: i64,
    bitmap: Option<Vec<u8>>,
    records: Vec<[i64; 4]>,
    access_count: Option<i32>,
    disabled: bool,
}

impl LegacyImage {
    pub fn new(block_size: i64, file_size: i64) -> Self {
        Self {
            block_size,
            file_size,
            bitmap: None,
            records: Vec::new(),
            access_count: None,
            disabled: false,
        }
    }

    /// Bitmap bytes; defaults to all zero of the right length.
    pub fn with_bitmap(mut self, bytes: Vec<u8>) -> Self {
        self.bitmap = Some(bytes);
        self
    }

    /// Append a record: detach time and disk/ram/missed byte counters.
    pub fn with_record(mut self, detach: i64, disk: i64, ram: i64, missed: i64) -> Self {
        self.records.push([detach, disk, ram, missed]);
        self
    }

    /// Override the stored access count (defaults to the record count).
    pub fn with_access_count(mut self, count: i32) -> Self {
        self.access_count = Some(count);
        self
    }

    /// Store the version negated.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let version: i32 = if self.disabled { -1 } else { 1 };
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&self.file_size.to_le_bytes());

        let bitmap = self.bitmap.clone().unwrap_or_else(|| {
            let blocks = bitmap::block_count(self.file_size as u64, self.block_size as u64);
            vec![0u8; bitmap::bytes_for_blocks(blocks)]
        });
        out.extend_from_slice(&bitmap);

        let count = self.access_count.unwrap_or(self.records.len() as i32);
        out.extend_from_slice(&count.to_le_bytes());
        for record in &self.records {
            for v in record {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }
}
