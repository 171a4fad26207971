//! # On-Disk Record Formats
//!
//! The onion file holds four record types, each framed the same way: a
//! four-byte ASCII signature, a one-byte format version, fixed-size fields,
//! optional variable-length tails, and a trailing Fletcher-32 checksum over
//! everything that precedes it. All multi-byte integers are little-endian.
//!
//! ```text
//! offset 0                                    end of onion file
//! +--------+----------------+------+-----+----------------+
//! | Header | revision rec / | ...  | ... | whole-history  |
//! | "OHDH" | page images    |      |     | "OWHS"         |
//! +--------+----------------+------+-----+----------------+
//!      \__ whole_history_addr points at the active copy __/
//! ```
//!
//! - [`header::OnionHeader`]: 40 bytes at offset 0; flags, page size,
//!   canonical-file size, and the location of the whole-history.
//! - [`history::WholeHistory`]: one record pointer per committed revision,
//!   in commit order; rewritten at a fresh offset on every commit.
//! - [`revision::RevisionRecord`]: metadata plus the archival page index of
//!   one committed revision.
//!
//! Decoders refuse unknown signatures and versions outright rather than
//! skipping fields, verify the per-pair checksums embedded in the
//! variable-length sections, and require the decoded byte count to equal the
//! supplied buffer exactly. Encoders recompute every checksum from the bytes
//! being written, so `encode(decode(bytes)) == bytes` for any well-formed
//! record.

pub mod header;
pub mod history;
pub mod revision;

pub use header::{
    OnionHeader, ENCODED_SIZE_HEADER, FLAG_DIVERGENT_HISTORY, FLAG_PAGE_ALIGNMENT, FLAG_WRITE_LOCK,
};
pub use history::{
    RecordPointer, WholeHistory, ENCODED_SIZE_RECORD_POINTER, ENCODED_SIZE_WHOLE_HISTORY,
};
pub use revision::{
    RevisionRecord, ENCODED_SIZE_INDEX_ENTRY, ENCODED_SIZE_REVISION_RECORD, TIMESTAMP_SIZE,
};

use eyre::Result;

use crate::checksum::fletcher32;
use crate::error::corrupt;

pub(crate) fn read_u32(buf: &[u8], off: &mut usize) -> Result<u32> {
    let end = *off + 4;
    if end > buf.len() {
        return Err(corrupt("record truncated while reading u32"));
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[*off..end]);
    *off = end;
    Ok(u32::from_le_bytes(raw))
}

pub(crate) fn read_u64(buf: &[u8], off: &mut usize) -> Result<u64> {
    let end = *off + 8;
    if end > buf.len() {
        return Err(corrupt("record truncated while reading u64"));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[*off..end]);
    *off = end;
    Ok(u64::from_le_bytes(raw))
}

pub(crate) fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Checksum of a 16-byte little-endian (u64, u64) pair, as embedded after
/// each index entry and each whole-history record pointer.
pub(crate) fn pair_checksum(a: u64, b: u64) -> u32 {
    let mut raw = [0u8; 16];
    raw[..8].copy_from_slice(&a.to_le_bytes());
    raw[8..].copy_from_slice(&b.to_le_bytes());
    fletcher32(&raw)
}
