//! In-memory storage backend. A [`MemoryFs`] is a shared namespace of named
//! byte streams, so a test can close a handle and reopen the same stream
//! the way it would with real files.

use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use eyre::Result;

use crate::error::OnionError;
use crate::storage::{OpenFlags, StorageDriver};

#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, path: &Path, flags: OpenFlags) -> Result<MemoryStorage> {
        use std::collections::hash_map::Entry;

        let mut files = self.files.lock().unwrap();
        let data = match files.entry(path.to_path_buf()) {
            Entry::Occupied(occupied) => {
                if flags.write && flags.truncate {
                    occupied.get().lock().unwrap().clear();
                }
                Arc::clone(occupied.get())
            }
            Entry::Vacant(vacant) => {
                if !(flags.write && flags.create) {
                    return Err(OnionError::Io(IoError::new(
                        ErrorKind::NotFound,
                        format!("no in-memory stream at '{}'", path.display()),
                    ))
                    .into());
                }
                let data = Arc::new(Mutex::new(Vec::new()));
                vacant.insert(Arc::clone(&data));
                data
            }
        };
        Ok(MemoryStorage { data, eoa: 0 })
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        files.remove(path).ok_or_else(|| {
            OnionError::Io(IoError::new(
                ErrorKind::NotFound,
                format!("no in-memory stream at '{}'", path.display()),
            ))
        })?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryStorage {
    data: Arc<Mutex<Vec<u8>>>,
    eoa: u64,
}

impl MemoryStorage {
    /// A stream detached from any namespace, for unit tests that only need
    /// one.
    pub fn anonymous() -> Self {
        Self {
            data: Arc::new(Mutex::new(Vec::new())),
            eoa: 0,
        }
    }
}

impl StorageDriver for MemoryStorage {
    fn read_at(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.lock().unwrap();
        let end = addr as usize + buf.len();
        if end > data.len() {
            return Err(OnionError::Io(IoError::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at offset {} past stream end {}",
                    buf.len(),
                    addr,
                    data.len()
                ),
            ))
            .into());
        }
        buf.copy_from_slice(&data[addr as usize..end]);
        Ok(())
    }

    fn write_at(&mut self, addr: u64, new: &[u8]) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let end = addr as usize + new.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[addr as usize..end].copy_from_slice(new);
        Ok(())
    }

    fn eof(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    fn eoa(&self) -> u64 {
        self.eoa
    }

    fn set_eoa(&mut self, addr: u64) -> Result<()> {
        self.eoa = addr;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
