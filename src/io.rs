//! # Onion-File Ingest and Write-Back
//!
//! The routines that move whole records between a backing stream and their
//! in-memory forms. Every ingest follows the same shape: bound-check the
//! record against the stream's physical EOF, extend the addressable
//! watermark over it, read the bytes, and hand them to the codec, which
//! verifies signatures and checksums. Write-back encodes into a transient
//! buffer and extends the watermark when the record lands past the current
//! end.
//!
//! Revision records are not addressed directly; they are located through
//! the whole-history's record-pointer list. Since revisions commit with
//! increasing ids, the list is sorted by id and the target is found by
//! binary search, decoding each probed record.

use eyre::{Result, WrapErr};
use tracing::debug;

use crate::error::corrupt;
use crate::format::{OnionHeader, RevisionRecord, WholeHistory, ENCODED_SIZE_HEADER};
use crate::storage::StorageDriver;

/// Reads and verifies the header at offset 0 of the onion stream.
pub(crate) fn ingest_header(store: &mut dyn StorageDriver) -> Result<OnionHeader> {
    let size = ENCODED_SIZE_HEADER as u64;
    if store.eof() < size {
        return Err(corrupt(format!(
            "onion file too small for header: {} < {}",
            store.eof(),
            size
        )));
    }
    store.set_eoa(size)?;

    let mut buf = [0u8; ENCODED_SIZE_HEADER];
    store.read_at(0, &mut buf)?;
    OnionHeader::decode(&buf).wrap_err("failed to ingest onion header")
}

/// Reads and verifies the whole-history at the location the header records.
pub(crate) fn ingest_whole_history(
    store: &mut dyn StorageDriver,
    addr: u64,
    size: u64,
) -> Result<WholeHistory> {
    if addr + size > store.eof() {
        return Err(corrupt(format!(
            "whole-history at {}..{} extends beyond end of onion file {}",
            addr,
            addr + size,
            store.eof()
        )));
    }
    if store.eoa() < addr + size {
        store.set_eoa(addr + size)?;
    }

    let mut buf = vec![0u8; size as usize];
    store.read_at(addr, &mut buf)?;
    WholeHistory::decode(&buf).wrap_err("failed to ingest whole-history")
}

/// Locates, reads, and verifies the revision record with the given id.
///
/// `page_size` is the value recorded in the header; a record disagreeing
/// with it is corrupt.
pub(crate) fn ingest_revision_record(
    store: &mut dyn StorageDriver,
    whole_history: &WholeHistory,
    revision_id: u64,
    page_size: u32,
) -> Result<RevisionRecord> {
    let pointers = &whole_history.record_pointers;
    if pointers.is_empty() {
        return Err(corrupt("whole-history holds no revision records"));
    }

    let mut low = 0usize;
    let mut high = pointers.len() - 1;
    loop {
        let n = low + (high - low) / 2;
        let record = read_record_at(store, n, whole_history, page_size)?;

        match record.revision_id.cmp(&revision_id) {
            std::cmp::Ordering::Equal => return Ok(record),
            std::cmp::Ordering::Less => {
                if n == high {
                    break;
                }
                low = n + 1;
            }
            std::cmp::Ordering::Greater => {
                if n == low {
                    break;
                }
                high = n - 1;
            }
        }
    }

    Err(corrupt(format!(
        "revision record with id {} not present in onion history",
        revision_id
    )))
}

fn read_record_at(
    store: &mut dyn StorageDriver,
    index: usize,
    whole_history: &WholeHistory,
    page_size: u32,
) -> Result<RevisionRecord> {
    let rp = whole_history.record_pointers[index];
    if rp.phys_addr + rp.record_size > store.eof() {
        return Err(corrupt(format!(
            "revision record {} at {}..{} extends beyond end of onion file {}",
            index,
            rp.phys_addr,
            rp.phys_addr + rp.record_size,
            store.eof()
        )));
    }

    let mut buf = vec![0u8; rp.record_size as usize];
    store.read_at(rp.phys_addr, &mut buf)?;
    let record = RevisionRecord::decode(&buf)
        .wrap_err_with(|| format!("failed to ingest revision record {}", index))?;

    if record.page_size() != page_size {
        return Err(corrupt(format!(
            "revision record {} page size {} disagrees with header page size {}",
            index,
            record.page_size(),
            page_size
        )));
    }
    Ok(record)
}

/// Encodes the header and rewrites it at offset 0.
pub(crate) fn write_header(header: &mut OnionHeader, store: &mut dyn StorageDriver) -> Result<()> {
    let buf = header.encode();
    if store.eoa() < buf.len() as u64 {
        store.set_eoa(buf.len() as u64)?;
    }
    store.write_at(0, &buf)?;
    debug!(
        flags = header.flags(),
        whole_history_addr = header.whole_history_addr(),
        "rewrote onion header"
    );
    Ok(())
}

/// Encodes the whole-history and writes it at `addr`. Returns the number of
/// bytes written.
pub(crate) fn write_whole_history(
    whole_history: &WholeHistory,
    store: &mut dyn StorageDriver,
    addr: u64,
) -> Result<u64> {
    let buf = whole_history.encode();
    let end = addr + buf.len() as u64;
    if store.eoa() < end {
        store.set_eoa(end)?;
    }
    store.write_at(addr, &buf)?;
    Ok(buf.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OnionError;
    use crate::format::FLAG_WRITE_LOCK;
    use crate::storage::MemoryStorage;

    fn header_in_stream() -> (MemoryStorage, OnionHeader) {
        let mut store = MemoryStorage::anonymous();
        let mut header = OnionHeader::new(512, FLAG_WRITE_LOCK, 99);
        write_header(&mut header, &mut store).unwrap();
        (store, header)
    }

    #[test]
    fn header_roundtrip_through_stream() {
        let (mut store, header) = header_in_stream();
        let ingested = ingest_header(&mut store).unwrap();
        assert_eq!(ingested, header);
        assert_eq!(store.eoa(), ENCODED_SIZE_HEADER as u64);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let mut store = MemoryStorage::anonymous();
        store.write_at(0, b"OHDH").unwrap();
        let err = ingest_header(&mut store).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OnionError>(),
            Some(OnionError::Corrupt(_))
        ));
    }

    #[test]
    fn whole_history_roundtrip_through_stream() {
        let mut store = MemoryStorage::anonymous();
        let mut whs = WholeHistory::default();
        whs.push_revision(40, 100);
        whs.push_revision(700, 120);

        let size = write_whole_history(&whs, &mut store, 200).unwrap();
        assert_eq!(size, whs.encoded_size());

        let ingested = ingest_whole_history(&mut store, 200, size).unwrap();
        assert_eq!(ingested, whs);
    }

    #[test]
    fn whole_history_beyond_eof_is_rejected() {
        let mut store = MemoryStorage::anonymous();
        let err = ingest_whole_history(&mut store, 0, 20).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OnionError>(),
            Some(OnionError::Corrupt(_))
        ));
    }

    fn store_with_records(ids: &[u64]) -> (MemoryStorage, WholeHistory) {
        let mut store = MemoryStorage::anonymous();
        let mut whs = WholeHistory::default();
        let mut addr = 40u64;
        for &id in ids {
            let mut record = RevisionRecord::new(512).unwrap();
            record.revision_id = id;
            record.parent_revision_id = id.saturating_sub(1);
            record.logi_eof = id * 10;
            let buf = record.encode();
            store.write_at(addr, &buf).unwrap();
            whs.push_revision(addr, buf.len() as u64);
            addr += buf.len() as u64;
        }
        (store, whs)
    }

    #[test]
    fn binary_search_finds_every_revision() {
        let (mut store, whs) = store_with_records(&[0, 1, 2, 3, 4]);
        for id in 0..5u64 {
            let record = ingest_revision_record(&mut store, &whs, id, 512).unwrap();
            assert_eq!(record.revision_id, id);
            assert_eq!(record.logi_eof, id * 10);
        }
    }

    #[test]
    fn absent_revision_id_is_corrupt() {
        let (mut store, whs) = store_with_records(&[0, 2, 4]);
        let err = ingest_revision_record(&mut store, &whs, 3, 512).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OnionError>(),
            Some(OnionError::Corrupt(_))
        ));
    }

    #[test]
    fn page_size_disagreement_is_corrupt() {
        let (mut store, whs) = store_with_records(&[0]);
        let err = ingest_revision_record(&mut store, &whs, 0, 4096).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OnionError>(),
            Some(OnionError::Corrupt(_))
        ));
    }

    #[test]
    fn corrupt_record_body_fails_ingest() {
        let (mut store, whs) = store_with_records(&[0, 1]);
        let rp = whs.record_pointers[1];
        // flip one byte inside the second record's body
        let mut byte = [0u8; 1];
        store.read_at(rp.phys_addr + 30, &mut byte).unwrap();
        byte[0] ^= 0x40;
        store.write_at(rp.phys_addr + 30, &byte).unwrap();

        let err = ingest_revision_record(&mut store, &whs, 1, 512).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OnionError>(),
            Some(OnionError::Corrupt(_))
        ));
    }
}
