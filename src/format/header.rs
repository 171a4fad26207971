//! # Onion File Header
//!
//! The first 40 bytes of every onion file. Layout:
//!
//! ```text
//! Offset  Size  Description
//! 0       4     Signature: "OHDH"
//! 4       1     Format version (1)
//! 5       3     Flags, 24 bits little-endian
//! 8       4     Page size (power of two)
//! 12      8     origin_eof: canonical file size at onion creation
//! 20      8     whole_history_addr
//! 28      8     whole_history_size
//! 36      4     Fletcher-32 over bytes 0..36
//! ```
//!
//! Flags occupy at most 24 bits; the encoding is the low three bytes of the
//! 32-bit little-endian flag word. The write-lock bit doubles as the
//! cross-process exclusion mechanism: it is set while a read-write session
//! is open and cleared only by a clean commit, so any opener that observes
//! it refuses the file.
//!
//! The struct below is the in-memory representation as well as the wire
//! representation; zerocopy keeps the two in lockstep.

use eyre::Result;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::checksum::fletcher32;
use crate::error::{bad_argument, corrupt};

pub const HEADER_SIGNATURE: &[u8; 4] = b"OHDH";
pub const HEADER_VERSION: u8 = 1;
pub const ENCODED_SIZE_HEADER: usize = 40;

/// Header flag: a read-write session is open, or a previous one ended
/// without a clean commit.
pub const FLAG_WRITE_LOCK: u32 = 0x1;

/// Header flag: the revision history may diverge from a linear chain.
pub const FLAG_DIVERGENT_HISTORY: u32 = 0x2;

/// Header flag: page images and records in the onion file are aligned to
/// page-size boundaries.
pub const FLAG_PAGE_ALIGNMENT: u32 = 0x4;

const FLAG_MASK: u32 = FLAG_WRITE_LOCK | FLAG_DIVERGENT_HISTORY | FLAG_PAGE_ALIGNMENT;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct OnionHeader {
    signature: [u8; 4],
    version: u8,
    flags: [u8; 3],
    page_size: U32,
    origin_eof: U64,
    whole_history_addr: U64,
    whole_history_size: U64,
    checksum: U32,
}

const _: () = assert!(std::mem::size_of::<OnionHeader>() == ENCODED_SIZE_HEADER);

impl OnionHeader {
    pub fn new(page_size: u32, flags: u32, origin_eof: u64) -> Self {
        debug_assert!(flags & !FLAG_MASK == 0);
        let word = flags.to_le_bytes();
        Self {
            signature: *HEADER_SIGNATURE,
            version: HEADER_VERSION,
            flags: [word[0], word[1], word[2]],
            page_size: U32::new(page_size),
            origin_eof: U64::new(origin_eof),
            whole_history_addr: U64::new(0),
            whole_history_size: U64::new(0),
            checksum: U32::new(0),
        }
    }

    pub fn flags(&self) -> u32 {
        u32::from_le_bytes([self.flags[0], self.flags[1], self.flags[2], 0])
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags() & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32) {
        let word = (self.flags() | flag).to_le_bytes();
        self.flags = [word[0], word[1], word[2]];
    }

    pub fn clear_flag(&mut self, flag: u32) {
        let word = (self.flags() & !flag).to_le_bytes();
        self.flags = [word[0], word[1], word[2]];
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn page_size_log2(&self) -> u32 {
        self.page_size.get().trailing_zeros()
    }

    pub fn origin_eof(&self) -> u64 {
        self.origin_eof.get()
    }

    pub fn whole_history_addr(&self) -> u64 {
        self.whole_history_addr.get()
    }

    pub fn set_whole_history_addr(&mut self, addr: u64) {
        self.whole_history_addr = U64::new(addr);
    }

    pub fn whole_history_size(&self) -> u64 {
        self.whole_history_size.get()
    }

    pub fn set_whole_history_size(&mut self, size: u64) {
        self.whole_history_size = U64::new(size);
    }

    /// Encodes the header, computing and storing the trailing checksum.
    pub fn encode(&mut self) -> [u8; ENCODED_SIZE_HEADER] {
        let mut out = [0u8; ENCODED_SIZE_HEADER];
        out.copy_from_slice(self.as_bytes());
        let sum = fletcher32(&out[..ENCODED_SIZE_HEADER - 4]);
        self.checksum = U32::new(sum);
        out[ENCODED_SIZE_HEADER - 4..].copy_from_slice(&sum.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < ENCODED_SIZE_HEADER {
            return Err(corrupt(format!(
                "buffer too small for onion header: {} < {}",
                buf.len(),
                ENCODED_SIZE_HEADER
            )));
        }

        let header = Self::read_from_bytes(&buf[..ENCODED_SIZE_HEADER])
            .map_err(|e| corrupt(format!("failed to parse onion header: {:?}", e)))?;

        if &header.signature != HEADER_SIGNATURE {
            return Err(corrupt("invalid onion header signature"));
        }
        if header.version != HEADER_VERSION {
            return Err(corrupt(format!(
                "unsupported onion header version {} (expected {})",
                header.version, HEADER_VERSION
            )));
        }
        if header.flags() & !FLAG_MASK != 0 {
            return Err(bad_argument(format!(
                "unknown onion header flag bits {:#x}",
                header.flags() & !FLAG_MASK
            )));
        }

        let sum = fletcher32(&buf[..ENCODED_SIZE_HEADER - 4]);
        if sum != header.checksum.get() {
            return Err(corrupt(format!(
                "onion header checksum mismatch: computed {:#010x}, stored {:#010x}",
                sum,
                header.checksum.get()
            )));
        }

        let page_size = header.page_size.get();
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(corrupt(format!(
                "onion header page size {} is not a power of two",
                page_size
            )));
        }

        Ok(header)
    }
}
