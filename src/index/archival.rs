//! # Archival Index
//!
//! The committed page map of one revision: entries sorted by logical page,
//! strictly ascending, no duplicates. Lookup is binary search with an
//! out-of-range fast path. The only mutation is
//! [`ArchivalIndex::merge_revision_index`], which folds a session's live
//! revision index in at commit time; pages dirtied by the session supersede
//! the parent revision's entries for the same pages.

use eyre::Result;
use smallvec::SmallVec;

use crate::error::bad_argument;
use crate::index::{IndexEntry, RevisionIndex};

type ScratchList = SmallVec<[IndexEntry; 32]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivalIndex {
    page_size_log2: u32,
    list: Vec<IndexEntry>,
}

impl ArchivalIndex {
    pub fn new(page_size_log2: u32) -> Self {
        Self {
            page_size_log2,
            list: Vec::new(),
        }
    }

    /// Builds an index from decoded entries, validating the ordering
    /// invariant.
    pub fn from_entries(page_size_log2: u32, list: Vec<IndexEntry>) -> Result<Self> {
        let index = Self {
            page_size_log2,
            list,
        };
        if !index.is_valid() {
            return Err(bad_argument(
                "archival index entries must be strictly ascending by logical page",
            ));
        }
        Ok(index)
    }

    pub fn page_size_log2(&self) -> u32 {
        self.page_size_log2
    }

    pub fn n_entries(&self) -> u64 {
        self.list.len() as u64
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.list
    }

    /// Strictly ascending by logical page, which also rules out duplicates.
    pub fn is_valid(&self) -> bool {
        self.list.windows(2).all(|w| w[0].logi_page < w[1].logi_page)
    }

    /// Looks up the entry for a logical page, if this revision amended it.
    pub fn find(&self, logi_page: u64) -> Option<&IndexEntry> {
        let first = self.list.first()?;
        let last = self.list.last()?;
        if logi_page < first.logi_page || logi_page > last.logi_page {
            return None;
        }
        self.list
            .binary_search_by_key(&logi_page, |e| e.logi_page)
            .ok()
            .map(|i| &self.list[i])
    }

    /// Folds a live revision index into this index, producing the page map
    /// of the revision being committed: every page in `rix`, plus every
    /// page here that `rix` did not supersede. The result stays sorted.
    pub fn merge_revision_index(&mut self, rix: &RevisionIndex) -> Result<()> {
        if self.page_size_log2 != rix.page_size_log2() {
            return Err(bad_argument(format!(
                "page size mismatch between indices: 2^{} vs 2^{}",
                self.page_size_log2,
                rix.page_size_log2()
            )));
        }
        if rix.n_entries() == 0 {
            return Ok(());
        }

        let mut fresh: ScratchList = rix.iter().copied().collect();
        fresh.sort_unstable_by_key(|e| e.logi_page);

        let mut kept: ScratchList = SmallVec::new();
        for entry in &self.list {
            if fresh
                .binary_search_by_key(&entry.logi_page, |e| e.logi_page)
                .is_err()
            {
                kept.push(*entry);
            }
        }

        let mut merged = Vec::with_capacity(fresh.len() + kept.len());
        merged.extend_from_slice(&fresh);
        merged.extend_from_slice(&kept);
        merged.sort_unstable_by_key(|e| e.logi_page);
        self.list = merged;
        Ok(())
    }
}
