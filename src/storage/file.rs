//! File-backed storage using positioned reads and writes. EOF is tracked in
//! memory (seeded from metadata at open, advanced by writes) so the engine
//! never pays a `stat` per bounds check.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use crate::error::OnionError;
use crate::storage::{OpenFlags, StorageDriver};

#[derive(Debug)]
pub struct FileStorage {
    file: File,
    path: PathBuf,
    eof: u64,
    eoa: u64,
}

impl FileStorage {
    pub fn open(path: &Path, flags: OpenFlags) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(flags.write)
            .create(flags.write && flags.create)
            .truncate(flags.write && flags.truncate)
            .open(path)
            .map_err(OnionError::Io)
            .wrap_err_with(|| format!("failed to open backing file '{}'", path.display()))?;

        let eof = file
            .metadata()
            .map_err(OnionError::Io)
            .wrap_err_with(|| format!("failed to stat backing file '{}'", path.display()))?
            .len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            eof,
            eoa: 0,
        })
    }

    pub fn remove(path: &Path) -> Result<()> {
        std::fs::remove_file(path)
            .map_err(OnionError::Io)
            .wrap_err_with(|| format!("failed to remove backing file '{}'", path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageDriver for FileStorage {
    fn read_at(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .read_exact_at(buf, addr)
            .map_err(OnionError::Io)
            .wrap_err_with(|| {
                format!(
                    "failed to read {} bytes at offset {} from '{}'",
                    buf.len(),
                    addr,
                    self.path.display()
                )
            })
    }

    fn write_at(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.file
            .write_all_at(data, addr)
            .map_err(OnionError::Io)
            .wrap_err_with(|| {
                format!(
                    "failed to write {} bytes at offset {} to '{}'",
                    data.len(),
                    addr,
                    self.path.display()
                )
            })?;
        self.eof = self.eof.max(addr + data.len() as u64);
        Ok(())
    }

    fn eof(&self) -> u64 {
        self.eof
    }

    fn eoa(&self) -> u64 {
        self.eoa
    }

    fn set_eoa(&mut self, addr: u64) -> Result<()> {
        self.eoa = addr;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(OnionError::Io)
            .wrap_err_with(|| format!("failed to sync backing file '{}'", self.path.display()))
    }
}
