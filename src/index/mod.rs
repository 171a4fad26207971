//! # Page Indices
//!
//! Two indices map logical pages to the physical offsets of their current
//! images in the onion file:
//!
//! - [`ArchivalIndex`]: the committed view. A sorted array owned by one
//!   revision record, immutable once that revision is committed, searched
//!   by binary search.
//! - [`RevisionIndex`]: the live view. A chained hash table of the pages
//!   dirtied by the in-progress revision; it exists only while a
//!   read-write session is open and is merged into the archival index at
//!   commit.
//!
//! The split mirrors the access patterns: the write path asks "did I
//! already dirty this page?" thousands of times (point lookups, hash), and
//! the commit sorts once to produce the archival form (ordered, binary
//! search).

mod archival;
mod revision;

pub use archival::ArchivalIndex;
pub use revision::{RevisionIndex, REVISION_INDEX_STARTING_SIZE_LOG2};

/// Maps one logical page to the physical offset of its image in the onion
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub logi_page: u64,
    pub phys_addr: u64,
}
