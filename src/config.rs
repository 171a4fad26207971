//! # Open and Creation Configuration
//!
//! [`OnionConfig`] carries every knob an open or create call honors:
//!
//! | option           | effect                                                |
//! |------------------|-------------------------------------------------------|
//! | `page_size`      | copy-on-write granularity; power of two, fixed at creation |
//! | `store_target`   | where history lives; only the `.onion` sidecar is implemented |
//! | `revision`       | which committed revision a reader observes            |
//! | `creation_flags` | divergent-history and page-alignment header flags     |
//! | `comment`        | optional UTF-8 note attached to the next commit       |
//! | `force_write_open` | reserved recovery override; always refused          |
//! | `backing`        | raw-I/O backend selection                             |
//!
//! Page size bounds: the engine supports 2^9 (512) through 2^22 (4 MiB)
//! bytes per page. The value is recorded in the onion header at creation and
//! cross-checked against every revision record thereafter; opens ignore the
//! configured value in favor of the on-disk one.

use eyre::Result;

use crate::error::{bad_argument, unsupported};
use crate::storage::BackingStore;

pub const MIN_PAGE_SIZE_LOG2: u32 = 9;
pub const MAX_PAGE_SIZE_LOG2: u32 = 22;
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Creation flag: mark the history as allowed to diverge from a linear
/// revision chain. Recorded in the header; no other behavior today.
pub const CREATE_FLAG_DIVERGENT_HISTORY: u32 = 0x1;

/// Creation flag: align every page image and record in the onion file to a
/// page-size boundary.
pub const CREATE_FLAG_PAGE_ALIGNMENT: u32 = 0x2;

const CREATE_FLAG_MASK: u32 = CREATE_FLAG_DIVERGENT_HISTORY | CREATE_FLAG_PAGE_ALIGNMENT;

/// Where revision history is stored relative to the canonical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreTarget {
    /// History lives in the `.onion` sidecar file.
    #[default]
    OnionSidecar,

    /// History embedded in the canonical file itself. Reserved; every open
    /// refuses it.
    CanonicalEmbedded,
}

/// Which committed revision an open call resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevisionTarget {
    /// The most recently committed revision.
    #[default]
    Latest,

    /// An explicit revision id; ids at or past the revision count fail the
    /// open.
    Id(u64),
}

#[derive(Debug, Clone)]
pub struct OnionConfig {
    pub page_size: u32,
    pub store_target: StoreTarget,
    pub revision: RevisionTarget,
    pub creation_flags: u32,
    pub comment: Option<String>,
    pub force_write_open: bool,
    pub backing: BackingStore,
}

impl Default for OnionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            store_target: StoreTarget::default(),
            revision: RevisionTarget::default(),
            creation_flags: 0,
            comment: None,
            force_write_open: false,
            backing: BackingStore::default(),
        }
    }
}

impl OnionConfig {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_revision(mut self, revision: RevisionTarget) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_creation_flags(mut self, flags: u32) -> Self {
        self.creation_flags = flags;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_backing(mut self, backing: BackingStore) -> Self {
        self.backing = backing;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || !self.page_size.is_power_of_two() {
            return Err(bad_argument(format!(
                "page size must be a power of two, got {}",
                self.page_size
            )));
        }
        let log2 = self.page_size.trailing_zeros();
        if !(MIN_PAGE_SIZE_LOG2..=MAX_PAGE_SIZE_LOG2).contains(&log2) {
            return Err(bad_argument(format!(
                "page size {} outside supported range 2^{}..=2^{}",
                self.page_size, MIN_PAGE_SIZE_LOG2, MAX_PAGE_SIZE_LOG2
            )));
        }
        if self.creation_flags & !CREATE_FLAG_MASK != 0 {
            return Err(bad_argument(format!(
                "unknown creation flag bits {:#x}",
                self.creation_flags & !CREATE_FLAG_MASK
            )));
        }
        if self.store_target == StoreTarget::CanonicalEmbedded {
            return Err(unsupported(
                "canonical-embedded store target is reserved and not implemented",
            ));
        }
        if self.force_write_open {
            return Err(unsupported("force-recovery open is not supported"));
        }
        Ok(())
    }
}
