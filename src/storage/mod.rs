//! # Raw-I/O Backend
//!
//! The engine reads and writes three byte streams: the canonical file, the
//! onion sidecar, and the transient recovery file. All access goes through
//! the [`StorageDriver`] trait so the streams can live anywhere bytes can:
//!
//! | Backend         | Use                              |
//! |-----------------|----------------------------------|
//! | `FileStorage`   | positioned file I/O (the default)|
//! | `MemoryStorage` | in-process streams for tests     |
//!
//! ## EOF vs EOA
//!
//! Each stream tracks two watermarks. **EOF** is the physical extent: the
//! first byte past the last byte ever written. **EOA** (end of addressable)
//! is a soft watermark the engine advances before reading or writing a
//! region, recording how far into the stream it has claimed. Ingest
//! routines bound-check records against EOF and then extend EOA over them;
//! the onion file's EOA after open is where appended history resumes.
//!
//! `set_eoa` never resizes the underlying stream; files grow only by being
//! written.
//!
//! ## Ownership
//!
//! A handle exclusively owns its stream for the duration of an open.
//! Closing is deterministic: dropping the handle closes the stream, both on
//! the normal close path and when an open fails partway through.

mod driver;
mod file;
mod memory;

pub use driver::{AnyStorage, BackingStore, OpenFlags, StorageDriver};
pub use file::FileStorage;
pub use memory::{MemoryFs, MemoryStorage};
