//! # Revision Record
//!
//! One revision record is appended to the onion file per commit. It carries
//! the revision's identity and audit metadata plus the archival index that
//! maps every logical page amended since onion creation to the physical
//! offset of its current image.
//!
//! ```text
//! Offset  Size  Description
//! 0       4     Signature: "ORRS"
//! 4       1     Format version (1)
//! 5       3     Padding (zero)
//! 8       8     revision_id
//! 16      8     parent_revision_id
//! 24      16    Creation time, ASCII "YYYYMMDDTHHMMSSZ" (no NUL)
//! 40      8     logi_eof: logical file size at commit
//! 48      4     page_size (repeated from the header)
//! 52      4     user_id
//! 56      8     n_entries
//! 64      4     username_size (includes trailing NUL; 0 if absent)
//! 68      4     comment_size (includes trailing NUL; 0 if absent)
//! 72      20*n  { logi_addr: u64, phys_addr: u64, checksum: u32 }
//! ...           username bytes, comment bytes
//! ...     4     Fletcher-32 over all preceding bytes
//! ```
//!
//! Index entries store the *logical byte address* (page number shifted by
//! the page-size log2), so a decoded address that is not page-aligned means
//! the record is corrupt. Each entry's embedded checksum covers its own
//! 16-byte (logi_addr, phys_addr) pair.

use eyre::Result;

use crate::checksum::fletcher32;
use crate::error::{bad_argument, corrupt};
use crate::format::{pair_checksum, read_u32, read_u64, write_u32, write_u64};
use crate::index::{ArchivalIndex, IndexEntry};

pub const REVISION_RECORD_SIGNATURE: &[u8; 4] = b"ORRS";
pub const REVISION_RECORD_VERSION: u8 = 1;
pub const ENCODED_SIZE_REVISION_RECORD: usize = 76;
pub const ENCODED_SIZE_INDEX_ENTRY: usize = 20;
pub const TIMESTAMP_SIZE: usize = 16;

const TIMESTAMP_PLACEHOLDER: [u8; TIMESTAMP_SIZE] = *b"00000000T000000Z";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    pub revision_id: u64,
    pub parent_revision_id: u64,
    pub time_of_creation: [u8; TIMESTAMP_SIZE],
    pub logi_eof: u64,
    pub user_id: u32,
    pub username: Option<String>,
    pub comment: Option<String>,
    pub archival_index: ArchivalIndex,
}

impl RevisionRecord {
    pub fn new(page_size: u32) -> Result<Self> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(bad_argument(format!(
                "page size must be a power of two, got {}",
                page_size
            )));
        }
        Ok(Self {
            revision_id: 0,
            parent_revision_id: 0,
            time_of_creation: TIMESTAMP_PLACEHOLDER,
            logi_eof: 0,
            user_id: 0,
            username: None,
            comment: None,
            archival_index: ArchivalIndex::new(page_size.trailing_zeros()),
        })
    }

    pub fn page_size(&self) -> u32 {
        1 << self.archival_index.page_size_log2()
    }

    /// Stored size of the username field: string bytes plus the trailing
    /// NUL, or 0 when absent.
    pub fn username_size(&self) -> u32 {
        self.username.as_ref().map_or(0, |s| s.len() as u32 + 1)
    }

    pub fn comment_size(&self) -> u32 {
        self.comment.as_ref().map_or(0, |s| s.len() as u32 + 1)
    }

    pub fn encoded_size(&self) -> u64 {
        ENCODED_SIZE_REVISION_RECORD as u64
            + ENCODED_SIZE_INDEX_ENTRY as u64 * self.archival_index.n_entries()
            + self.username_size() as u64
            + self.comment_size() as u64
    }

    pub fn encode(&self) -> Vec<u8> {
        let page_size_log2 = self.archival_index.page_size_log2();
        let mut out = Vec::with_capacity(self.encoded_size() as usize);

        out.extend_from_slice(REVISION_RECORD_SIGNATURE);
        out.push(REVISION_RECORD_VERSION);
        out.extend_from_slice(&[0u8; 3]);
        write_u64(&mut out, self.revision_id);
        write_u64(&mut out, self.parent_revision_id);
        out.extend_from_slice(&self.time_of_creation);
        write_u64(&mut out, self.logi_eof);
        write_u32(&mut out, self.page_size());
        write_u32(&mut out, self.user_id);
        write_u64(&mut out, self.archival_index.n_entries());
        write_u32(&mut out, self.username_size());
        write_u32(&mut out, self.comment_size());

        for entry in self.archival_index.entries() {
            let logi_addr = entry.logi_page << page_size_log2;
            write_u64(&mut out, logi_addr);
            write_u64(&mut out, entry.phys_addr);
            write_u32(&mut out, pair_checksum(logi_addr, entry.phys_addr));
        }

        if let Some(username) = &self.username {
            out.extend_from_slice(username.as_bytes());
            out.push(0);
        }
        if let Some(comment) = &self.comment {
            out.extend_from_slice(comment.as_bytes());
            out.push(0);
        }

        let sum = fletcher32(&out);
        write_u32(&mut out, sum);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < ENCODED_SIZE_REVISION_RECORD {
            return Err(corrupt(format!(
                "buffer too small for revision record: {} < {}",
                buf.len(),
                ENCODED_SIZE_REVISION_RECORD
            )));
        }
        if &buf[..4] != REVISION_RECORD_SIGNATURE {
            return Err(corrupt("invalid revision record signature"));
        }
        if buf[4] != REVISION_RECORD_VERSION {
            return Err(corrupt(format!(
                "unsupported revision record version {} (expected {})",
                buf[4], REVISION_RECORD_VERSION
            )));
        }

        let mut off = 8;
        let revision_id = read_u64(buf, &mut off)?;
        let parent_revision_id = read_u64(buf, &mut off)?;

        let mut time_of_creation = [0u8; TIMESTAMP_SIZE];
        time_of_creation.copy_from_slice(&buf[off..off + TIMESTAMP_SIZE]);
        off += TIMESTAMP_SIZE;

        let logi_eof = read_u64(buf, &mut off)?;
        let page_size = read_u32(buf, &mut off)?;
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(corrupt(format!(
                "revision record page size {} is not a power of two",
                page_size
            )));
        }
        let page_size_log2 = page_size.trailing_zeros();

        let user_id = read_u32(buf, &mut off)?;
        let n_entries = read_u64(buf, &mut off)?;
        let username_size = read_u32(buf, &mut off)?;
        let comment_size = read_u32(buf, &mut off)?;

        let expected = (ENCODED_SIZE_REVISION_RECORD as u64)
            .checked_add(
                n_entries
                    .checked_mul(ENCODED_SIZE_INDEX_ENTRY as u64)
                    .ok_or_else(|| corrupt(format!("implausible entry count {}", n_entries)))?,
            )
            .and_then(|total| total.checked_add(username_size as u64 + comment_size as u64))
            .ok_or_else(|| corrupt(format!("implausible entry count {}", n_entries)))?;
        if expected != buf.len() as u64 {
            return Err(corrupt(format!(
                "revision record size disagreement: encoding implies {} bytes, buffer holds {}",
                expected,
                buf.len()
            )));
        }

        let mut entries = Vec::with_capacity(n_entries as usize);
        for i in 0..n_entries {
            let logi_addr = read_u64(buf, &mut off)?;
            let phys_addr = read_u64(buf, &mut off)?;
            let checksum = read_u32(buf, &mut off)?;
            if logi_addr & (page_size as u64 - 1) != 0 {
                return Err(corrupt(format!(
                    "index entry {}: logical address {:#x} does not align with page size {}",
                    i, logi_addr, page_size
                )));
            }
            if checksum != pair_checksum(logi_addr, phys_addr) {
                return Err(corrupt(format!("index entry {} checksum mismatch", i)));
            }
            entries.push(IndexEntry {
                logi_page: logi_addr >> page_size_log2,
                phys_addr,
            });
        }

        let username = Self::decode_name(buf, &mut off, username_size, "username")?;
        let comment = Self::decode_name(buf, &mut off, comment_size, "comment")?;

        let sum = fletcher32(&buf[..off]);
        let stored = read_u32(buf, &mut off)?;
        if sum != stored {
            return Err(corrupt(format!(
                "revision record checksum mismatch: computed {:#010x}, stored {:#010x}",
                sum, stored
            )));
        }

        let archival_index = ArchivalIndex::from_entries(page_size_log2, entries)
            .map_err(|e| corrupt(format!("archival index in revision record: {}", e)))?;

        Ok(Self {
            revision_id,
            parent_revision_id,
            time_of_creation,
            logi_eof,
            user_id,
            username,
            comment,
            archival_index,
        })
    }

    fn decode_name(
        buf: &[u8],
        off: &mut usize,
        size: u32,
        what: &str,
    ) -> Result<Option<String>> {
        if size == 0 {
            return Ok(None);
        }
        let end = *off + size as usize;
        if end > buf.len() {
            return Err(corrupt(format!("record truncated while reading {}", what)));
        }
        let mut bytes = &buf[*off..end];
        *off = end;
        if bytes.last() == Some(&0) {
            bytes = &bytes[..bytes.len() - 1];
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| corrupt(format!("{} is not valid UTF-8", what)))?;
        Ok(Some(text.to_owned()))
    }
}
