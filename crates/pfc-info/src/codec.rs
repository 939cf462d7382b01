//! Binary sidecar format.
//!
//! All integers are little-endian with no padding between fields.
//!
//! ```text
//! v2 (current)                          v1 (legacy)
//! version        i32                    version        i32
//! block_size     i64                    block_size     i64
//! file_size      i64                    file_size      i64
//! bitmap         N bytes                bitmap         N bytes
//! checksum       16 bytes               access_count   i32
//! creation_time  i64                    records        access_count x 32 bytes
//! access_count   i32                      detach, disk, ram, missed (i64 each)
//! records        min(count, 3) x 40 bytes
//!   attach, detach, disk, ram, missed (i64 each)
//! ```
//!
//! `N = ceil(ceil(file_size / block_size) / 8)`. The checksum covers the
//! bitmap bytes only.

use tracing::{error, trace, warn};

use crate::checksum::DIGEST_LEN;
use crate::descriptor::{CacheDescriptor, DescriptorOptions, FormatVersion, VersionTag};
use crate::handle::BackingHandle;
use crate::history::{AccessHistory, AccessRecord, MAX_ACCESS_RECORDS};
use crate::{InfoError, Result};

/// Version number emitted by [`write`].
pub const CURRENT_VERSION: i32 = 2;

const RECORD_LEN: usize = 40;
const LEGACY_RECORD_LEN: usize = 32;
const HEADER_LEN: u64 = 4 + 8 + 8;

/// Offset of the checksum field in a v2 sidecar with a `bitmap_len`-byte bitmap.
pub fn checksum_offset(bitmap_len: usize) -> u64 {
    HEADER_LEN + bitmap_len as u64
}

/// Size in bytes of `d` in the current layout.
pub fn encoded_len(d: &CacheDescriptor) -> u64 {
    checksum_offset(d.bitmaps.synced().as_bytes().len())
        + DIGEST_LEN as u64
        + 8
        + 4
        + (d.history.len() * RECORD_LEN) as u64
}

/// Sequential field reader over a positioned handle.
struct FieldReader<'a, H: ?Sized> {
    handle: &'a H,
    offset: u64,
    label: &'a str,
}

impl<'a, H: BackingHandle + ?Sized> FieldReader<'a, H> {
    fn new(handle: &'a H, label: &'a str) -> Self {
        Self {
            handle,
            offset: 0,
            label,
        }
    }

    fn try_read_raw(&mut self, field: &'static str, buf: &mut [u8]) -> Result<()> {
        let got = self.handle.read_at(buf, self.offset)?;
        if got != buf.len() {
            return Err(InfoError::ShortRead {
                field,
                offset: self.offset,
                expected: buf.len(),
                got,
            });
        }
        self.offset += got as u64;
        Ok(())
    }

    fn read_raw(&mut self, field: &'static str, buf: &mut [u8]) -> Result<()> {
        self.try_read_raw(field, buf).inspect_err(|e| {
            warn!(label = self.label, field, offset = self.offset, error = %e, "descriptor read failed");
        })
    }

    fn read_i32(&mut self, field: &'static str) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_raw(field, &mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    fn read_i64(&mut self, field: &'static str) -> Result<i64> {
        let mut b = [0u8; 8];
        self.read_raw(field, &mut b)?;
        Ok(i64::from_le_bytes(b))
    }

    /// Access count is allowed to be missing; older truncated sidecars
    /// end right before it. Negative counts read as zero.
    fn read_access_count(&mut self) -> u64 {
        let mut b = [0u8; 4];
        match self.try_read_raw("access_count", &mut b) {
            Ok(()) => i32::from_le_bytes(b).max(0) as u64,
            Err(_) => 0,
        }
    }
}

/// Sequential field writer over a positioned handle.
struct FieldWriter<'a, H: ?Sized> {
    handle: &'a H,
    offset: u64,
    label: &'a str,
}

impl<'a, H: BackingHandle + ?Sized> FieldWriter<'a, H> {
    fn new(handle: &'a H, label: &'a str) -> Self {
        Self {
            handle,
            offset: 0,
            label,
        }
    }

    fn write_raw(&mut self, field: &'static str, buf: &[u8]) -> Result<()> {
        let result = match self.handle.write_at(buf, self.offset) {
            Ok(n) if n == buf.len() => Ok(n),
            Ok(written) => Err(InfoError::ShortWrite {
                field,
                offset: self.offset,
                expected: buf.len(),
                written,
            }),
            Err(e) => Err(InfoError::Io(e)),
        };
        match result {
            Ok(n) => {
                self.offset += n as u64;
                Ok(())
            }
            Err(e) => {
                warn!(label = self.label, field, offset = self.offset, error = %e, "descriptor write failed");
                Err(e)
            }
        }
    }

    fn write_i32(&mut self, field: &'static str, v: i32) -> Result<()> {
        self.write_raw(field, &v.to_le_bytes())
    }

    fn write_i64(&mut self, field: &'static str, v: i64) -> Result<()> {
        self.write_raw(field, &v.to_le_bytes())
    }
}

fn decode_i64s<const N: usize>(buf: &[u8]) -> [i64; N] {
    let mut out = [0i64; N];
    for (v, chunk) in out.iter_mut().zip(buf.chunks_exact(8)) {
        let mut b = [0u8; 8];
        b.copy_from_slice(chunk);
        *v = i64::from_le_bytes(b);
    }
    out
}

fn encode_record(r: &AccessRecord) -> [u8; RECORD_LEN] {
    let fields = [
        r.attach_time,
        r.detach_time,
        r.bytes_from_disk,
        r.bytes_from_ram,
        r.bytes_missed_remote,
    ];
    let mut out = [0u8; RECORD_LEN];
    for (chunk, v) in out.chunks_exact_mut(8).zip(fields) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_record(buf: &[u8; RECORD_LEN]) -> AccessRecord {
    let [attach_time, detach_time, bytes_from_disk, bytes_from_ram, bytes_missed_remote] =
        decode_i64s::<5>(buf);
    AccessRecord {
        attach_time,
        detach_time,
        bytes_from_disk,
        bytes_from_ram,
        bytes_missed_remote,
    }
}

/// Legacy records never stored an attach time; it is taken to be the
/// detach time.
fn decode_legacy_record(buf: &[u8; LEGACY_RECORD_LEN]) -> AccessRecord {
    let [detach_time, bytes_from_disk, bytes_from_ram, bytes_missed_remote] = decode_i64s::<4>(buf);
    AccessRecord {
        attach_time: detach_time,
        detach_time,
        bytes_from_disk,
        bytes_from_ram,
        bytes_missed_remote,
    }
}

/// Parse a descriptor. Any failure means the caller should start fresh.
pub fn read<H: BackingHandle + ?Sized>(
    handle: &H,
    label: &str,
    options: DescriptorOptions,
) -> Result<CacheDescriptor> {
    let mut r = FieldReader::new(handle, label);

    let raw = r.read_i32("version")?;
    let tag = VersionTag::from_wire(raw).inspect_err(|_| {
        warn!(label, version = raw, "descriptor version not supported");
    })?;

    let mut d = CacheDescriptor::new(options);
    d.format = tag.format;
    d.download_status_disabled = tag.download_status_disabled;

    match tag.format {
        FormatVersion::Legacy => read_v1(&mut r, &mut d)?,
        FormatVersion::Current => read_v2(&mut r, &mut d)?,
    }

    trace!(
        label,
        version = raw,
        complete = d.complete,
        access_count = d.history.access_count(),
        "descriptor parsed"
    );
    Ok(d)
}

/// block_size, file_size and the synced bitmap; shared by both layouts.
fn read_geometry_and_bitmap<H: BackingHandle + ?Sized>(
    r: &mut FieldReader<'_, H>,
    d: &mut CacheDescriptor,
) -> Result<()> {
    let block_size = r.read_i64("block_size")?;
    let file_size = r.read_i64("file_size")?;
    d.init_geometry(block_size, file_size).inspect_err(|e| {
        warn!(label = r.label, error = %e, "descriptor geometry rejected");
    })?;

    r.read_raw("bitmap", d.bitmaps.synced_mut().as_bytes_mut())?;
    d.bitmaps.reset_working_to_synced();
    Ok(())
}

fn derive_complete(d: &mut CacheDescriptor) {
    let blocks = d.bitmaps.synced().len();
    d.complete = !d.bitmaps.synced().any_unset_in_range(0, blocks);
}

fn read_v2<H: BackingHandle + ?Sized>(r: &mut FieldReader<'_, H>, d: &mut CacheDescriptor) -> Result<()> {
    read_geometry_and_bitmap(r, d)?;

    let mut stored = [0u8; DIGEST_LEN];
    r.read_raw("checksum", &mut stored)?;
    if let Err(actual) = d.checksum_unit.verify(d.bitmaps.synced().as_bytes(), &stored) {
        let err = InfoError::ChecksumMismatch {
            expected: hex::encode(stored),
            actual: hex::encode(actual),
        };
        error!(label = r.label, error = %err, "descriptor bitmap failed verification");
        return Err(err);
    }
    d.checksum = stored;
    derive_complete(d);

    d.creation_time = r.read_i64("creation_time")?;

    let access_count = r.read_access_count();
    let stored_records = (access_count as usize).min(MAX_ACCESS_RECORDS);
    let mut records = Vec::with_capacity(stored_records);
    for _ in 0..stored_records {
        let mut buf = [0u8; RECORD_LEN];
        r.read_raw("access_record", &mut buf)?;
        records.push(decode_record(&buf));
    }
    d.history = AccessHistory::from_parts(access_count, records);
    Ok(())
}

fn read_v1<H: BackingHandle + ?Sized>(r: &mut FieldReader<'_, H>, d: &mut CacheDescriptor) -> Result<()> {
    read_geometry_and_bitmap(r, d)?;
    derive_complete(d);

    let access_count = r.read_access_count();
    let first_kept = access_count.saturating_sub(MAX_ACCESS_RECORDS as u64);
    let mut records = Vec::with_capacity(MAX_ACCESS_RECORDS);
    for i in 0..access_count {
        let mut buf = [0u8; LEGACY_RECORD_LEN];
        r.read_raw("legacy_access_record", &mut buf)?;
        if i < first_kept {
            continue;
        }
        let record = decode_legacy_record(&buf);
        if i == first_kept {
            d.creation_time = record.detach_time;
        }
        records.push(record);
    }
    d.history = AccessHistory::from_parts(access_count, records);
    Ok(())
}

/// Serialize `d` in the current layout. Stops at the first failed field.
///
/// The checksum is recomputed from the synced bitmap right before it is
/// written. Format and checksum on `d` change only once every field is out.
pub fn write<H: BackingHandle + ?Sized>(handle: &H, d: &mut CacheDescriptor, label: &str) -> Result<()> {
    let mut w = FieldWriter::new(handle, label);

    w.write_i32("version", d.version_tag().to_wire())?;
    w.write_i64("block_size", d.block_size as i64)?;
    w.write_i64("file_size", d.file_size as i64)?;
    w.write_raw("bitmap", d.bitmaps.synced().as_bytes())?;

    let checksum = d.checksum_unit.digest(d.bitmaps.synced().as_bytes());
    w.write_raw("checksum", &checksum)?;

    w.write_i64("creation_time", d.creation_time)?;
    let access_count = i32::try_from(d.history.access_count()).unwrap_or(i32::MAX);
    w.write_i32("access_count", access_count)?;
    for record in d.history.records() {
        w.write_raw("access_record", &encode_record(record))?;
    }

    d.format = FormatVersion::Current;
    d.checksum = checksum;
    trace!(label, bytes = w.offset, "descriptor written");
    Ok(())
}
