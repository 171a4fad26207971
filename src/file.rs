//! # Onion File Orchestration
//!
//! [`OnionFile`] ties the pieces together: it owns the three backing
//! streams (canonical, onion, recovery), the in-memory header,
//! whole-history, and mutable revision record, and the live revision index
//! of a read-write session.
//!
//! ## Sessions
//!
//! ```text
//! create(path)            fresh onion over a (possibly existing) canonical
//! open(path)              read-only view of one committed revision
//! open_rw(path)           author the next revision on top of the latest
//! close()                 commit (write mode) and release everything
//! ```
//!
//! A read-write session appends page images to the onion file as the
//! caller writes, then commits on close: the revision index is merged into
//! the parent's archival index, the revision record is appended, the
//! whole-history is rewritten at its new address, and finally the header
//! at offset 0 is rewritten with the write-lock flag cleared. Nothing
//! before that final header rewrite is reachable by a reader, which makes
//! the commit atomic at that boundary: a crash mid-commit leaves trailing
//! unreferenced bytes and a write-locked header, and the recovery sidecar
//! (a verbatim copy of the pre-session whole-history) identifies the dirty
//! close.
//!
//! ## Addressing
//!
//! The logical file is addressed through an end-of-addressable watermark,
//! like the backing streams themselves: callers extend it with
//! [`OnionFile::set_eoa`] and reads and writes must stay inside it.
//! [`OnionFile::eof`] reports the logical file size, which only grows when
//! writes land past it.
//!
//! ## Page copy-on-write
//!
//! Reads resolve each page against the live revision index first (own
//! writes win), then the archival index of the open revision, then the
//! canonical file, zero-filling past the canonical's captured size. Writes
//! reuse the slot of a page already dirtied in this session and otherwise
//! seed a fresh page-size slot at the end of the onion file.

use std::path::{Path, PathBuf};

use chrono::Utc;
use eyre::{Result, WrapErr};
use tracing::{debug, trace, warn};

use crate::config::{
    OnionConfig, RevisionTarget, CREATE_FLAG_DIVERGENT_HISTORY, CREATE_FLAG_PAGE_ALIGNMENT,
};
use crate::error::{bad_argument, unsupported, OnionError};
use crate::format::{
    OnionHeader, RevisionRecord, WholeHistory, ENCODED_SIZE_HEADER, FLAG_DIVERGENT_HISTORY,
    FLAG_PAGE_ALIGNMENT, FLAG_WRITE_LOCK,
};
use crate::index::{IndexEntry, RevisionIndex};
use crate::io;
use crate::storage::{AnyStorage, BackingStore, OpenFlags, StorageDriver};

pub const ONION_FILE_SUFFIX: &str = ".onion";
pub const RECOVERY_FILE_SUFFIX: &str = ".recovery";

/// Sentinel written at offset 0 of a canonical file created empty, standing
/// in for "no logical data yet".
pub const CANONICAL_SENTINEL: &[u8; 8] = b"ONIONEOF";

#[derive(Debug)]
pub struct OnionFile {
    backing: BackingStore,
    // field order is drop order: recovery, then onion, then canonical
    recovery: Option<AnyStorage>,
    onion: AnyStorage,
    canonical: AnyStorage,
    recovery_path: PathBuf,
    is_open_rw: bool,
    page_align_history: bool,
    header: OnionHeader,
    whole_history: WholeHistory,
    revision: RevisionRecord,
    rev_index: Option<RevisionIndex>,
    history_eof: u64,
    origin_eof: u64,
    logi_eoa: u64,
    logi_eof: u64,
    finished: bool,
}

impl OnionFile {
    /// Creates a fresh onion over the canonical file at `path`.
    ///
    /// The canonical file is created if absent and never truncated; its size
    /// at this moment is captured as `origin_eof` and becomes the initial
    /// logical file size. An empty canonical file gets the `ONIONEOF`
    /// sentinel. Any existing onion sidecar is truncated. The returned
    /// handle is open for writing; the first commit becomes revision 0.
    pub fn create(path: impl AsRef<Path>, config: OnionConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate().wrap_err("invalid onion configuration")?;

        let onion_path = append_suffix(path, ONION_FILE_SUFFIX);
        let recovery_path = append_suffix(&onion_path, RECOVERY_FILE_SUFFIX);
        let backing = config.backing.clone();

        match Self::create_inner(path, &onion_path, &recovery_path, config) {
            Ok(file) => Ok(file),
            Err(err) => {
                // the recovery sidecar is meaningless without a session
                let _ = backing.remove(&recovery_path);
                Err(err)
            }
        }
    }

    fn create_inner(
        path: &Path,
        onion_path: &Path,
        recovery_path: &Path,
        config: OnionConfig,
    ) -> Result<Self> {
        let mut canonical = config.backing.open(path, OpenFlags::create())?;
        let mut onion = config.backing.open(onion_path, OpenFlags::create_truncate())?;
        let mut recovery = config
            .backing
            .open(recovery_path, OpenFlags::create_truncate())?;

        let origin_eof = canonical.eof();
        if origin_eof == 0 {
            canonical.set_eoa(CANONICAL_SENTINEL.len() as u64)?;
            canonical.write_at(0, CANONICAL_SENTINEL)?;
        }

        let mut flags = FLAG_WRITE_LOCK;
        if config.creation_flags & CREATE_FLAG_DIVERGENT_HISTORY != 0 {
            flags |= FLAG_DIVERGENT_HISTORY;
        }
        if config.creation_flags & CREATE_FLAG_PAGE_ALIGNMENT != 0 {
            flags |= FLAG_PAGE_ALIGNMENT;
        }
        let page_align_history = flags & FLAG_PAGE_ALIGNMENT != 0;

        let mut header = OnionHeader::new(config.page_size, flags, origin_eof);

        let mut revision = RevisionRecord::new(config.page_size)?;
        revision.logi_eof = origin_eof;
        revision.comment = config.comment.clone();
        capture_user_identity(&mut revision)?;

        let whole_history = WholeHistory::default();
        let size = io::write_whole_history(&whole_history, &mut recovery, 0)
            .wrap_err("failed to seed recovery file")?;
        header.set_whole_history_size(size);

        io::write_header(&mut header, &mut onion)?;
        let mut history_eof = ENCODED_SIZE_HEADER as u64;
        if page_align_history {
            history_eof = align_up(history_eof, config.page_size as u64);
        }

        let rev_index = RevisionIndex::new(config.page_size)?;

        debug!(
            path = %path.display(),
            page_size = config.page_size,
            origin_eof,
            "created onion file"
        );

        Ok(Self {
            backing: config.backing,
            recovery: Some(recovery),
            onion,
            canonical,
            recovery_path: recovery_path.to_path_buf(),
            is_open_rw: true,
            page_align_history,
            header,
            whole_history,
            revision,
            rev_index: Some(rev_index),
            history_eof,
            origin_eof,
            logi_eoa: 0,
            logi_eof: origin_eof,
            finished: false,
        })
    }

    /// Opens a read-only view of the revision selected by the
    /// configuration.
    pub fn open(path: impl AsRef<Path>, config: OnionConfig) -> Result<Self> {
        Self::open_common(path.as_ref(), config, false)
    }

    /// Opens the file for writing: the session authors a new revision on
    /// top of the selected one, committed when the handle is closed.
    pub fn open_rw(path: impl AsRef<Path>, config: OnionConfig) -> Result<Self> {
        Self::open_common(path.as_ref(), config, true)
    }

    fn open_common(path: &Path, config: OnionConfig, rw: bool) -> Result<Self> {
        config.validate().wrap_err("invalid onion configuration")?;

        let onion_path = append_suffix(path, ONION_FILE_SUFFIX);
        let recovery_path = append_suffix(&onion_path, RECOVERY_FILE_SUFFIX);
        let file_flags = if rw {
            OpenFlags::read_write()
        } else {
            OpenFlags::read_only()
        };

        let canonical = config.backing.open(path, file_flags)?;
        let mut onion = config.backing.open(&onion_path, file_flags)?;

        let mut header = io::ingest_header(&mut onion)?;
        if header.has_flag(FLAG_WRITE_LOCK) {
            return Err(unsupported(
                "onion file is write-locked by an open session or an unclean close",
            ));
        }
        let page_align_history = header.has_flag(FLAG_PAGE_ALIGNMENT);
        let page_size = header.page_size();

        let whole_history = io::ingest_whole_history(
            &mut onion,
            header.whole_history_addr(),
            header.whole_history_size(),
        )?;

        let n_revisions = whole_history.n_revisions();
        let target = match config.revision {
            RevisionTarget::Latest => n_revisions.saturating_sub(1),
            RevisionTarget::Id(id) => {
                if id >= n_revisions {
                    return Err(bad_argument(format!(
                        "revision id {} out of range: history holds {} revisions",
                        id, n_revisions
                    )));
                }
                id
            }
        };

        let mut revision = if n_revisions > 0 {
            io::ingest_revision_record(&mut onion, &whole_history, target, page_size)?
        } else {
            RevisionRecord::new(page_size)?
        };

        let origin_eof = header.origin_eof();
        let logi_eof = revision.logi_eof;
        let mut history_eof = onion.eoa();
        if page_align_history {
            history_eof = align_up(history_eof, page_size as u64);
        }

        let mut recovery = None;
        let mut rev_index = None;
        if rw {
            let mut recovery_store = config
                .backing
                .open(&recovery_path, OpenFlags::create_truncate())?;
            io::write_whole_history(&whole_history, &mut recovery_store, 0)
                .wrap_err("failed to copy whole-history to recovery file")?;
            recovery = Some(recovery_store);

            header.set_flag(FLAG_WRITE_LOCK);
            io::write_header(&mut header, &mut onion)?;

            rev_index = Some(RevisionIndex::new(page_size)?);
            revision.parent_revision_id = revision.revision_id;
            revision.revision_id += 1;
            if config.comment.is_some() {
                revision.comment = config.comment.clone();
            }
        }

        debug!(
            path = %path.display(),
            revision = revision.revision_id,
            read_write = rw,
            "opened onion file"
        );

        Ok(Self {
            backing: config.backing,
            recovery,
            onion,
            canonical,
            recovery_path,
            is_open_rw: rw,
            page_align_history,
            header,
            whole_history,
            revision,
            rev_index,
            history_eof,
            origin_eof,
            logi_eoa: 0,
            logi_eof,
            finished: false,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.header.page_size()
    }

    pub fn is_read_write(&self) -> bool {
        self.is_open_rw
    }

    /// Id of the open revision: the one being authored in write mode, the
    /// one being viewed in read-only mode.
    pub fn revision_id(&self) -> u64 {
        self.revision.revision_id
    }

    pub fn revision_count(&self) -> u64 {
        self.whole_history.n_revisions()
    }

    /// Logical file size: one past the last byte any committed or
    /// in-session write reached.
    pub fn eof(&self) -> u64 {
        self.logi_eof
    }

    /// Logical end-of-addressable watermark.
    pub fn eoa(&self) -> u64 {
        self.logi_eoa
    }

    /// Extends (or retracts) the addressable span of the logical file.
    pub fn set_eoa(&mut self, addr: u64) {
        self.logi_eoa = addr;
    }

    /// Size of the canonical file captured when the onion was created.
    pub fn origin_eof(&self) -> u64 {
        self.origin_eof
    }

    /// First unused byte of the onion file.
    pub fn history_eof(&self) -> u64 {
        self.history_eof
    }

    pub fn header(&self) -> &OnionHeader {
        &self.header
    }

    pub fn whole_history(&self) -> &WholeHistory {
        &self.whole_history
    }

    pub fn revision_record(&self) -> &RevisionRecord {
        &self.revision
    }

    /// Reads `buf.len()` bytes of the logical file starting at `offset`.
    ///
    /// The range must lie inside the addressable span. Each page resolves
    /// to this session's own pending image, the open revision's committed
    /// image, or the canonical file, in that order; bytes past the
    /// canonical's captured size read as zero.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let len = buf.len() as u64;
        let end = offset
            .checked_add(len)
            .ok_or_else(|| bad_argument("read range overflows the address space"))?;
        if end > self.logi_eoa {
            return Err(bad_argument(format!(
                "read of {}..{} extends beyond addressed space {}",
                offset, end, self.logi_eoa
            )));
        }
        if len == 0 {
            return Ok(());
        }

        let page_size = self.header.page_size() as u64;
        let page_size_log2 = self.header.page_size_log2();

        let mut cur = offset;
        let mut out_off = 0usize;
        while cur < end {
            let page = cur >> page_size_log2;
            let gap_head = cur & (page_size - 1);
            let chunk = (page_size - gap_head).min(end - cur) as usize;
            let dst = &mut buf[out_off..out_off + chunk];

            let pending = self
                .rev_index
                .as_ref()
                .and_then(|rix| rix.find(page))
                .map(|e| e.phys_addr);
            if let Some(phys_addr) = pending {
                self.onion.read_at(phys_addr + gap_head, dst)?;
            } else if let Some(entry) = self.revision.archival_index.find(page) {
                self.onion.read_at(entry.phys_addr + gap_head, dst)?;
            } else {
                let start = page * page_size + gap_head;
                let overlap = self.origin_eof.saturating_sub(start);
                let from_canonical = overlap.min(chunk as u64) as usize;
                if from_canonical > 0 {
                    self.canonical.read_at(start, &mut dst[..from_canonical])?;
                }
                dst[from_canonical..].fill(0);
            }

            cur += chunk as u64;
            out_off += chunk;
        }
        Ok(())
    }

    /// Writes `data` into the logical file at `offset`.
    ///
    /// The range must lie inside the addressable span. Pages dirtied
    /// earlier in this session are rewritten in place; every other touched
    /// page gets a fresh slot at the end of the onion file, seeded from the
    /// committed image or the canonical file before the new bytes are
    /// overlaid. Extends the logical file size when the range ends past it.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.is_open_rw {
            return Err(bad_argument(
                "write not allowed on a file opened read-only",
            ));
        }
        let len = data.len() as u64;
        let end = offset
            .checked_add(len)
            .ok_or_else(|| bad_argument("write range overflows the address space"))?;
        if end > self.logi_eoa {
            return Err(bad_argument(format!(
                "write of {}..{} extends beyond addressed space {}",
                offset, end, self.logi_eoa
            )));
        }
        if len == 0 {
            return Ok(());
        }

        let page_size = self.header.page_size() as u64;
        let page_size_log2 = self.header.page_size_log2();
        let origin_eof = self.origin_eof;
        let mut page_buf = vec![0u8; page_size as usize];

        let rix = self
            .rev_index
            .as_mut()
            .ok_or_else(|| bad_argument("no revision index in write session"))?;

        let mut cur = offset;
        let mut src_off = 0usize;
        while cur < end {
            let page = cur >> page_size_log2;
            let gap_head = cur & (page_size - 1);
            let chunk = (page_size - gap_head).min(end - cur) as usize;
            let src = &data[src_off..src_off + chunk];
            let partial = (chunk as u64) < page_size;

            if let Some(phys_addr) = rix.find(page).map(|e| e.phys_addr) {
                // page already has a slot in this revision: amend in place
                if partial {
                    self.onion.read_at(phys_addr, &mut page_buf)?;
                    page_buf[gap_head as usize..gap_head as usize + chunk].copy_from_slice(src);
                    self.onion.write_at(phys_addr, &page_buf)?;
                } else {
                    self.onion.write_at(phys_addr, src)?;
                }
            } else {
                let image: &[u8] = if partial {
                    // seed the slot with the page as the open revision sees
                    // it, then overlay the new bytes
                    if let Some(entry) = self.revision.archival_index.find(page) {
                        self.onion.read_at(entry.phys_addr, &mut page_buf)?;
                    } else {
                        let start = page * page_size;
                        let overlap = origin_eof.saturating_sub(start);
                        let from_canonical = overlap.min(page_size) as usize;
                        if from_canonical > 0 {
                            self.canonical.read_at(start, &mut page_buf[..from_canonical])?;
                        }
                        page_buf[from_canonical..].fill(0);
                    }
                    page_buf[gap_head as usize..gap_head as usize + chunk].copy_from_slice(src);
                    &page_buf
                } else {
                    src
                };

                let slot = self.history_eof;
                self.onion.set_eoa(slot + page_size)?;
                self.onion.write_at(slot, image)?;
                rix.insert(IndexEntry {
                    logi_page: page,
                    phys_addr: slot,
                })?;
                self.history_eof = slot + page_size;
                trace!(page, slot, "allocated copy-on-write page slot");
            }

            cur += chunk as u64;
            src_off += chunk;
        }

        self.logi_eof = self.logi_eof.max(end);
        Ok(())
    }

    /// Closes the file. In write mode this commits the session's revision:
    /// the new revision record, whole-history, and header land in the onion
    /// file and the recovery sidecar is deleted.
    pub fn close(mut self) -> Result<()> {
        if self.is_open_rw {
            self.commit_revision()
                .wrap_err("failed to commit revision on close")?;
            self.recovery = None;
            self.backing
                .remove(&self.recovery_path)
                .wrap_err("failed to delete recovery file")?;
        }
        self.finished = true;
        Ok(())
    }

    fn commit_revision(&mut self) -> Result<()> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        self.revision
            .time_of_creation
            .copy_from_slice(stamp.as_bytes());
        self.revision.logi_eof = self.logi_eof;

        let rix = self
            .rev_index
            .as_ref()
            .ok_or_else(|| bad_argument("no revision index in write session"))?;
        self.revision.archival_index.merge_revision_index(rix)?;

        let record_bytes = self.revision.encode();
        let phys_addr = self.history_eof;
        self.onion.set_eoa(phys_addr + record_bytes.len() as u64)?;
        self.onion.write_at(phys_addr, &record_bytes)?;
        self.history_eof = phys_addr + record_bytes.len() as u64;
        if self.page_align_history {
            self.history_eof = align_up(self.history_eof, self.header.page_size() as u64);
        }

        self.whole_history
            .push_revision(phys_addr, record_bytes.len() as u64);
        self.header.set_whole_history_addr(self.history_eof);
        self.header
            .set_whole_history_size(self.whole_history.encoded_size());

        let written =
            io::write_whole_history(&self.whole_history, &mut self.onion, self.history_eof)?;
        self.history_eof += written;
        self.onion.sync()?;

        self.header.clear_flag(FLAG_WRITE_LOCK);
        io::write_header(&mut self.header, &mut self.onion)?;
        self.onion.sync()?;

        debug!(
            revision = self.revision.revision_id,
            n_entries = self.revision.archival_index.n_entries(),
            logi_eof = self.logi_eof,
            "committed revision"
        );
        Ok(())
    }
}

impl Drop for OnionFile {
    fn drop(&mut self) {
        if self.is_open_rw && !self.finished {
            warn!(
                revision = self.revision.revision_id,
                "onion file dropped without close; write-lock remains set on disk"
            );
        }
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn align_up(addr: u64, page_size: u64) -> u64 {
    (addr + page_size - 1) & !(page_size - 1)
}

fn capture_user_identity(record: &mut RevisionRecord) -> Result<()> {
    let uid = nix::unistd::getuid();
    record.user_id = uid.as_raw();
    let user = nix::unistd::User::from_uid(uid)
        .map_err(|errno| OnionError::Io(std::io::Error::from_raw_os_error(errno as i32)))?;
    record.username = user.map(|u| u.name);
    Ok(())
}
