//! # onion-store - Versioning Storage Layer
//!
//! `onion-store` overlays a mutable, revision-tracked logical file on top
//! of an immutable canonical data file. Writes never touch the canonical
//! file: modified fixed-size pages are appended to a `.onion` sidecar that
//! records an ordered sequence of revisions. A reader opening revision `r`
//! observes the canonical file with every page-level amendment from the
//! base revision through `r` applied on top.
//!
//! This buys in-file provenance (who committed what, when), cheap
//! branching-off-a-snapshot semantics, and write amplification bounded by
//! page-granular copy-on-write.
//!
//! ## Quick Start
//!
//! ```ignore
//! use onion_store::{OnionConfig, OnionFile, RevisionTarget};
//!
//! let config = OnionConfig::default().with_page_size(4096);
//!
//! // author revision 0
//! let mut file = OnionFile::create("dataset.bin", config.clone())?;
//! file.set_eoa(11);
//! file.write(0, b"hello world")?;
//! file.close()?;
//!
//! // read it back at any committed revision
//! let reader = OnionFile::open(
//!     "dataset.bin",
//!     config.with_revision(RevisionTarget::Id(0)),
//! )?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------+
//! |        OnionFile (open/commit)       |
//! +------------------+-------------------+
//! |  read path       |  write path       |   page copy-on-write
//! +------------------+-------------------+
//! | RevisionIndex (live, hashed)         |
//! | ArchivalIndex (committed, sorted)    |
//! +--------------------------------------+
//! |  format codecs + Fletcher-32         |   OHDH / OWHS / ORRS records
//! +--------------------------------------+
//! |  StorageDriver (file / memory)       |   canonical, onion, recovery
//! +--------------------------------------+
//! ```
//!
//! ## File Layout
//!
//! For a canonical file `P`, the engine manages two sidecars:
//!
//! ```text
//! P                   # canonical data, never mutated
//! P.onion             # header, page images, revision records, whole-history
//! P.onion.recovery    # whole-history copy held during a write session
//! ```
//!
//! The onion file is append-only. Each commit appends the session's page
//! images and revision record, rewrites the whole-history at a fresh
//! offset, and finally rewrites the 40-byte header at offset 0; the header
//! rewrite is the atomic commit point. The recovery sidecar exists only
//! between write-open and clean close, so its presence alongside a
//! write-locked header marks a dirty close.
//!
//! ## Concurrency Model
//!
//! Single writer, no sharing: one handle owns its streams and in-memory
//! state, and distinct handles share nothing. The write-lock flag in the
//! header is the cross-process exclusion: openers refuse a locked file,
//! and only a clean commit clears the lock.

pub mod checksum;
pub mod config;
pub mod error;
pub mod format;
pub mod index;
pub mod storage;

mod file;
mod io;

pub use config::{
    OnionConfig, RevisionTarget, StoreTarget, CREATE_FLAG_DIVERGENT_HISTORY,
    CREATE_FLAG_PAGE_ALIGNMENT, DEFAULT_PAGE_SIZE,
};
pub use error::OnionError;
pub use file::{OnionFile, CANONICAL_SENTINEL, ONION_FILE_SUFFIX, RECOVERY_FILE_SUFFIX};
pub use format::{OnionHeader, RevisionRecord, WholeHistory};
pub use index::{ArchivalIndex, IndexEntry, RevisionIndex};
pub use storage::{BackingStore, MemoryFs, OpenFlags, StorageDriver};
