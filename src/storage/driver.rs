//! # Storage Driver Abstraction
//!
//! [`StorageDriver`] is the copy-based byte-extent interface every backing
//! stream implements. The engine never touches `std::fs` directly; it asks
//! a driver to read or write a range, and tracks its own addressable
//! watermark through `eoa`/`set_eoa`.
//!
//! [`BackingStore`] selects which backend an open call instantiates, and
//! [`AnyStorage`] is the type-erased handle the engine holds, so the file
//! orchestrator works with any backend without generics.

use std::path::Path;

use eyre::Result;

use super::file::FileStorage;
use super::memory::{MemoryFs, MemoryStorage};

/// Positioned access to one backing byte stream.
pub trait StorageDriver: Send {
    /// Reads exactly `buf.len()` bytes starting at `addr`. Reading past the
    /// physical end of the stream is an error.
    fn read_at(&self, addr: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes all of `data` starting at `addr`, extending the stream when
    /// the range ends past the current EOF.
    fn write_at(&mut self, addr: u64, data: &[u8]) -> Result<()>;

    /// First byte past the last byte ever written.
    fn eof(&self) -> u64;

    /// Current end-of-addressable watermark.
    fn eoa(&self) -> u64;

    /// Moves the end-of-addressable watermark. Does not resize the stream.
    fn set_eoa(&mut self, addr: u64) -> Result<()>;

    /// Flushes buffered writes to durable storage.
    fn sync(&self) -> Result<()>;
}

/// How a backing stream is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    pub const fn read_only() -> Self {
        Self {
            write: false,
            create: false,
            truncate: false,
        }
    }

    pub const fn read_write() -> Self {
        Self {
            write: true,
            create: false,
            truncate: false,
        }
    }

    /// Create the stream if absent, keep existing contents.
    pub const fn create() -> Self {
        Self {
            write: true,
            create: true,
            truncate: false,
        }
    }

    /// Create the stream if absent, discard existing contents.
    pub const fn create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
        }
    }
}

/// Configures which storage backend an open call uses.
#[derive(Debug, Clone, Default)]
pub enum BackingStore {
    /// Plain files on the local filesystem.
    #[default]
    File,

    /// Streams held in process memory, shared through a [`MemoryFs`].
    Memory(MemoryFs),
}

impl BackingStore {
    pub fn open(&self, path: &Path, flags: OpenFlags) -> Result<AnyStorage> {
        match self {
            BackingStore::File => Ok(AnyStorage::File(FileStorage::open(path, flags)?)),
            BackingStore::Memory(fs) => Ok(AnyStorage::Memory(fs.open(path, flags)?)),
        }
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        match self {
            BackingStore::File => FileStorage::remove(path),
            BackingStore::Memory(fs) => fs.remove(path),
        }
    }
}

/// Type-erased storage handle.
#[derive(Debug)]
pub enum AnyStorage {
    File(FileStorage),
    Memory(MemoryStorage),
}

impl StorageDriver for AnyStorage {
    fn read_at(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        match self {
            AnyStorage::File(s) => s.read_at(addr, buf),
            AnyStorage::Memory(s) => s.read_at(addr, buf),
        }
    }

    fn write_at(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        match self {
            AnyStorage::File(s) => s.write_at(addr, data),
            AnyStorage::Memory(s) => s.write_at(addr, data),
        }
    }

    fn eof(&self) -> u64 {
        match self {
            AnyStorage::File(s) => s.eof(),
            AnyStorage::Memory(s) => s.eof(),
        }
    }

    fn eoa(&self) -> u64 {
        match self {
            AnyStorage::File(s) => s.eoa(),
            AnyStorage::Memory(s) => s.eoa(),
        }
    }

    fn set_eoa(&mut self, addr: u64) -> Result<()> {
        match self {
            AnyStorage::File(s) => s.set_eoa(addr),
            AnyStorage::Memory(s) => s.set_eoa(addr),
        }
    }

    fn sync(&self) -> Result<()> {
        match self {
            AnyStorage::File(s) => s.sync(),
            AnyStorage::Memory(s) => s.sync(),
        }
    }
}
