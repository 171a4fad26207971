//! # Whole-History Record
//!
//! The whole-history is the table of contents of the onion file: one record
//! pointer per committed revision, in commit order. It is rewritten at a
//! fresh offset on every commit and the header is updated to point at the
//! new copy, so the previous copy is superseded but never overwritten.
//!
//! ```text
//! Offset  Size  Description
//! 0       4     Signature: "OWHS"
//! 4       1     Format version (1)
//! 5       3     Padding (zero)
//! 8       8     n_revisions
//! 16      20*n  { phys_addr: u64, record_size: u64, checksum: u32 }
//! ...     4     Fletcher-32 over all preceding bytes
//! ```
//!
//! Each pointer's embedded checksum covers its own 16-byte
//! (phys_addr, record_size) pair. Pointers are strictly increasing in
//! phys_addr because history is append-only.

use eyre::Result;

use crate::checksum::fletcher32;
use crate::error::corrupt;
use crate::format::{pair_checksum, read_u32, read_u64, write_u32, write_u64};

pub const WHOLE_HISTORY_SIGNATURE: &[u8; 4] = b"OWHS";
pub const WHOLE_HISTORY_VERSION: u8 = 1;
pub const ENCODED_SIZE_WHOLE_HISTORY: usize = 20;
pub const ENCODED_SIZE_RECORD_POINTER: usize = 20;

/// Location and size of one committed revision record in the onion file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPointer {
    pub phys_addr: u64,
    pub record_size: u64,
    pub checksum: u32,
}

impl RecordPointer {
    pub fn new(phys_addr: u64, record_size: u64) -> Self {
        Self {
            phys_addr,
            record_size,
            checksum: pair_checksum(phys_addr, record_size),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WholeHistory {
    pub record_pointers: Vec<RecordPointer>,
}

impl WholeHistory {
    pub fn n_revisions(&self) -> u64 {
        self.record_pointers.len() as u64
    }

    /// Appends a pointer to a freshly committed revision record.
    pub fn push_revision(&mut self, phys_addr: u64, record_size: u64) {
        debug_assert!(self
            .record_pointers
            .last()
            .map_or(true, |last| last.phys_addr < phys_addr));
        self.record_pointers.push(RecordPointer::new(phys_addr, record_size));
    }

    pub fn encoded_size(&self) -> u64 {
        ENCODED_SIZE_WHOLE_HISTORY as u64
            + ENCODED_SIZE_RECORD_POINTER as u64 * self.n_revisions()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_size() as usize);
        out.extend_from_slice(WHOLE_HISTORY_SIGNATURE);
        out.push(WHOLE_HISTORY_VERSION);
        out.extend_from_slice(&[0u8; 3]);
        write_u64(&mut out, self.n_revisions());
        for rp in &self.record_pointers {
            write_u64(&mut out, rp.phys_addr);
            write_u64(&mut out, rp.record_size);
            write_u32(&mut out, pair_checksum(rp.phys_addr, rp.record_size));
        }
        let sum = fletcher32(&out);
        write_u32(&mut out, sum);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < ENCODED_SIZE_WHOLE_HISTORY {
            return Err(corrupt(format!(
                "buffer too small for whole-history: {} < {}",
                buf.len(),
                ENCODED_SIZE_WHOLE_HISTORY
            )));
        }
        if &buf[..4] != WHOLE_HISTORY_SIGNATURE {
            return Err(corrupt("invalid whole-history signature"));
        }
        if buf[4] != WHOLE_HISTORY_VERSION {
            return Err(corrupt(format!(
                "unsupported whole-history version {} (expected {})",
                buf[4], WHOLE_HISTORY_VERSION
            )));
        }

        let mut off = 8;
        let n_revisions = read_u64(buf, &mut off)?;

        let expected = (ENCODED_SIZE_WHOLE_HISTORY as u64)
            .checked_add(n_revisions.checked_mul(ENCODED_SIZE_RECORD_POINTER as u64).ok_or_else(
                || corrupt(format!("implausible revision count {}", n_revisions)),
            )?)
            .ok_or_else(|| corrupt(format!("implausible revision count {}", n_revisions)))?;
        if expected != buf.len() as u64 {
            return Err(corrupt(format!(
                "whole-history size disagreement: encoding implies {} bytes, buffer holds {}",
                expected,
                buf.len()
            )));
        }

        let mut record_pointers = Vec::with_capacity(n_revisions as usize);
        let mut prev_addr = None;
        for i in 0..n_revisions {
            let phys_addr = read_u64(buf, &mut off)?;
            let record_size = read_u64(buf, &mut off)?;
            let checksum = read_u32(buf, &mut off)?;
            if checksum != pair_checksum(phys_addr, record_size) {
                return Err(corrupt(format!(
                    "record pointer {} checksum mismatch",
                    i
                )));
            }
            if prev_addr.is_some_and(|prev| phys_addr <= prev) {
                return Err(corrupt(format!(
                    "record pointer {} not in increasing address order",
                    i
                )));
            }
            prev_addr = Some(phys_addr);
            record_pointers.push(RecordPointer {
                phys_addr,
                record_size,
                checksum,
            });
        }

        let sum = fletcher32(&buf[..off]);
        let stored = read_u32(buf, &mut off)?;
        if sum != stored {
            return Err(corrupt(format!(
                "whole-history checksum mismatch: computed {:#010x}, stored {:#010x}",
                sum, stored
            )));
        }

        Ok(Self { record_pointers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OnionError;

    fn sample() -> WholeHistory {
        let mut whs = WholeHistory::default();
        whs.push_revision(40, 96);
        whs.push_revision(648, 116);
        whs.push_revision(1276, 136);
        whs
    }

    #[test]
    fn empty_history_encodes_to_fixed_size() {
        let whs = WholeHistory::default();
        let bytes = whs.encode();
        assert_eq!(bytes.len(), ENCODED_SIZE_WHOLE_HISTORY);
        assert_eq!(WholeHistory::decode(&bytes).unwrap(), whs);
    }

    #[test]
    fn roundtrip_preserves_pointers() {
        let whs = sample();
        let bytes = whs.encode();
        assert_eq!(bytes.len() as u64, whs.encoded_size());

        let parsed = WholeHistory::decode(&bytes).unwrap();
        assert_eq!(parsed, whs);
        assert_eq!(parsed.n_revisions(), 3);
    }

    #[test]
    fn encode_of_decode_is_byte_identical() {
        let bytes = sample().encode();
        let parsed = WholeHistory::decode(&bytes).unwrap();
        assert_eq!(parsed.encode(), bytes);
    }

    #[test]
    fn corrupt_pointer_pair_is_detected() {
        let mut bytes = sample().encode();
        // inside the first pointer's phys_addr
        bytes[17] ^= 0x01;
        let err = WholeHistory::decode(&bytes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OnionError>(),
            Some(OnionError::Corrupt(_))
        ));
    }

    #[test]
    fn corrupt_trailing_checksum_is_detected() {
        let mut bytes = sample().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(WholeHistory::decode(&bytes).is_err());
    }

    #[test]
    fn size_disagreement_is_detected() {
        let mut bytes = sample().encode();
        bytes.push(0);
        let err = WholeHistory::decode(&bytes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OnionError>(),
            Some(OnionError::Corrupt(_))
        ));
    }

    #[test]
    fn non_increasing_addresses_are_rejected() {
        let mut whs = WholeHistory::default();
        whs.record_pointers.push(RecordPointer::new(500, 10));
        whs.record_pointers.push(RecordPointer::new(100, 10));
        let bytes = whs.encode();
        assert!(WholeHistory::decode(&bytes).is_err());
    }
}
