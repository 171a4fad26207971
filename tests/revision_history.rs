//! # Revision History Tests
//!
//! End-to-end coverage of the copy-on-write session lifecycle:
//!
//! 1. Data written in one session is visible when the file is reopened at
//!    that revision, and bytes never written read as zero.
//! 2. Every committed revision remains independently readable; newer
//!    revisions supersede pages without disturbing older views.
//! 3. Rewriting a page in a later revision allocates a fresh slot and
//!    grows the onion file by exactly one page plus the commit records.
//! 4. The canonical file shows through untouched pages and is never
//!    mutated.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use onion_store::{BackingStore, MemoryFs, OnionConfig, OnionFile, RevisionTarget};

fn config_512() -> OnionConfig {
    OnionConfig::default().with_page_size(512)
}

fn onion_path_of(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.onion", path.display()))
}

fn read_vec(file: &OnionFile, offset: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0xaau8; len];
    file.read(offset, &mut buf).unwrap();
    buf
}

mod first_revision {
    use super::*;

    #[test]
    fn write_hello_then_reopen_latest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut file = OnionFile::create(&path, config_512()).unwrap();
        file.set_eoa(5);
        file.write(0, b"hello").unwrap();
        file.close().unwrap();

        let mut file = OnionFile::open(&path, config_512()).unwrap();
        assert_eq!(file.revision_count(), 1);
        assert_eq!(file.revision_id(), 0);
        assert_eq!(file.eof(), 5, "logical EOF is where the write ended");

        file.set_eoa(512);
        assert_eq!(read_vec(&file, 0, 5), b"hello");

        let tail = read_vec(&file, 5, 507);
        assert!(
            tail.iter().all(|b| *b == 0),
            "bytes never written read as zero"
        );
        file.close().unwrap();
    }

    #[test]
    fn commit_records_audit_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut file =
            OnionFile::create(&path, config_512().with_comment("initial import")).unwrap();
        file.set_eoa(1);
        file.write(0, b"x").unwrap();
        file.close().unwrap();

        let file = OnionFile::open(&path, config_512()).unwrap();
        let record = file.revision_record();
        assert_eq!(record.comment.as_deref(), Some("initial import"));

        let stamp = record.time_of_creation;
        assert_eq!(stamp[8], b'T');
        assert_eq!(stamp[15], b'Z');
        assert!(stamp[..8].iter().all(|b| b.is_ascii_digit()));
        assert!(stamp[9..15].iter().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn never_written_file_reads_as_empty_at_revision_0() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        OnionFile::create(&path, config_512()).unwrap().close().unwrap();

        let mut file = OnionFile::open(
            &path,
            config_512().with_revision(RevisionTarget::Id(0)),
        )
        .unwrap();
        assert_eq!(file.revision_count(), 1);
        assert_eq!(file.eof(), 0);

        file.set_eoa(1024);
        let bytes = read_vec(&file, 0, 1024);
        assert!(bytes.iter().all(|b| *b == 0));
    }
}

mod revision_stacking {
    use super::*;

    fn two_revision_file(dir: &Path) -> PathBuf {
        let path = dir.join("data.bin");

        let mut file = OnionFile::create(&path, config_512()).unwrap();
        file.set_eoa(5);
        file.write(0, b"hello").unwrap();
        file.close().unwrap();

        let mut file = OnionFile::open_rw(&path, config_512()).unwrap();
        file.set_eoa(10);
        file.write(5, b"WORLD").unwrap();
        file.close().unwrap();

        path
    }

    #[test]
    fn each_revision_keeps_its_own_view() {
        let dir = tempdir().unwrap();
        let path = two_revision_file(dir.path());

        let mut rev0 = OnionFile::open(
            &path,
            config_512().with_revision(RevisionTarget::Id(0)),
        )
        .unwrap();
        assert_eq!(rev0.eof(), 5);
        rev0.set_eoa(10);
        assert_eq!(read_vec(&rev0, 0, 10), b"hello\0\0\0\0\0");

        let mut rev1 = OnionFile::open(
            &path,
            config_512().with_revision(RevisionTarget::Id(1)),
        )
        .unwrap();
        assert_eq!(rev1.eof(), 10);
        rev1.set_eoa(10);
        assert_eq!(read_vec(&rev1, 0, 10), b"helloWORLD");
        assert_eq!(rev1.revision_record().parent_revision_id, 0);
        assert_eq!(rev1.revision_id(), 1);
    }

    #[test]
    fn latest_resolves_to_newest_revision() {
        let dir = tempdir().unwrap();
        let path = two_revision_file(dir.path());

        let mut file = OnionFile::open(&path, config_512()).unwrap();
        assert_eq!(file.revision_id(), 1);
        file.set_eoa(10);
        assert_eq!(read_vec(&file, 0, 10), b"helloWORLD");
    }

    #[test]
    fn session_reads_its_own_pending_writes() {
        let dir = tempdir().unwrap();
        let path = two_revision_file(dir.path());

        let mut file = OnionFile::open_rw(&path, config_512()).unwrap();
        file.set_eoa(10);
        file.write(0, b"J").unwrap();
        assert_eq!(read_vec(&file, 0, 10), b"JelloWORLD");
        file.close().unwrap();
    }

    #[test]
    fn rewriting_a_page_allocates_exactly_one_new_slot() {
        let dir = tempdir().unwrap();
        let path = two_revision_file(dir.path());
        let onion_path = onion_path_of(&path);

        let file = OnionFile::open(&path, config_512()).unwrap();
        let rev1_phys = file
            .revision_record()
            .archival_index
            .find(0)
            .unwrap()
            .phys_addr;
        file.close().unwrap();

        let len_before = fs::metadata(&onion_path).unwrap().len();

        let mut file = OnionFile::open_rw(&path, config_512()).unwrap();
        file.set_eoa(10);
        file.write(0, b"H").unwrap();
        file.close().unwrap();

        let len_after = fs::metadata(&onion_path).unwrap().len();

        let file = OnionFile::open(&path, config_512()).unwrap();
        let record = file.revision_record();
        let expected_growth =
            512 + record.encoded_size() + file.whole_history().encoded_size();
        assert_eq!(len_after - len_before, expected_growth);

        let rev2_phys = record.archival_index.find(0).unwrap().phys_addr;
        assert_ne!(
            rev2_phys, rev1_phys,
            "a later revision never reuses an older revision's page slot"
        );

        let mut file = file;
        file.set_eoa(10);
        assert_eq!(read_vec(&file, 0, 10), b"HelloWORLD");
    }

    #[test]
    fn same_session_rewrites_reuse_the_slot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut file = OnionFile::create(&path, config_512()).unwrap();
        file.set_eoa(512);
        file.write(0, b"aaaa").unwrap();
        let history_eof_after_first = file.history_eof();
        file.write(0, b"bbbb").unwrap();
        file.write(100, b"cccc").unwrap();
        assert_eq!(
            file.history_eof(),
            history_eof_after_first,
            "re-dirtying a page must not allocate another slot"
        );
        file.close().unwrap();

        let file = OnionFile::open(&path, config_512()).unwrap();
        assert_eq!(file.revision_record().archival_index.n_entries(), 1);
    }
}

mod page_boundaries {
    use super::*;

    #[test]
    fn zero_length_operations_are_noops() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut file = OnionFile::create(&path, config_512()).unwrap();
        let history_eof = file.history_eof();

        file.write(0, b"").unwrap();
        file.read(0, &mut []).unwrap();

        assert_eq!(file.history_eof(), history_eof);
        assert_eq!(file.eof(), 0);
        file.close().unwrap();
    }

    #[test]
    fn boundary_crossing_write_touches_one_slot_per_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut file = OnionFile::create(&path, config_512()).unwrap();
        file.set_eoa(1280);

        let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        file.write(256, &data).unwrap();
        file.close().unwrap();

        let mut file = OnionFile::open(&path, config_512()).unwrap();
        let index = &file.revision_record().archival_index;
        assert_eq!(index.n_entries(), 3, "offsets 256..1280 span pages 0, 1, 2");
        assert!(index.find(0).is_some());
        assert!(index.find(1).is_some());
        assert!(index.find(2).is_some());

        file.set_eoa(1280);
        assert_eq!(read_vec(&file, 256, 1024), data);
        assert!(read_vec(&file, 0, 256).iter().all(|b| *b == 0));
    }

    #[test]
    fn unaligned_write_straddling_an_extra_page_is_complete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut file = OnionFile::create(&path, config_512()).unwrap();
        file.set_eoa(2048);

        // head gap of 510 pushes this 4-byte write across a page boundary
        file.write(510, b"wxyz").unwrap();
        assert_eq!(read_vec(&file, 510, 4), b"wxyz");
        file.close().unwrap();

        let file = OnionFile::open(&path, config_512()).unwrap();
        assert_eq!(file.revision_record().archival_index.n_entries(), 2);
    }
}

mod canonical_passthrough {
    use super::*;

    #[test]
    fn existing_canonical_contents_show_through_untouched_ranges() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"0123456789").unwrap();

        let mut file = OnionFile::create(&path, config_512()).unwrap();
        assert_eq!(file.origin_eof(), 10);
        assert_eq!(file.eof(), 10, "logical file starts as the canonical image");

        file.set_eoa(10);
        file.write(3, b"AB").unwrap();
        file.close().unwrap();

        let mut file = OnionFile::open(&path, config_512()).unwrap();
        file.set_eoa(512);
        assert_eq!(read_vec(&file, 0, 10), b"012AB56789");
        assert!(
            read_vec(&file, 10, 502).iter().all(|b| *b == 0),
            "bytes beyond origin_eof read as zero"
        );

        assert_eq!(
            fs::read(&path).unwrap(),
            b"0123456789",
            "the canonical file is never mutated"
        );
    }

    #[test]
    fn fresh_canonical_gets_the_sentinel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        OnionFile::create(&path, config_512()).unwrap().close().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"ONIONEOF");
    }
}

mod memory_backend {
    use super::*;

    #[test]
    fn full_session_lifecycle_in_memory() {
        let fs = MemoryFs::new();
        let config = config_512().with_backing(BackingStore::Memory(fs));
        let path = Path::new("data.bin");

        let mut file = OnionFile::create(path, config.clone()).unwrap();
        file.set_eoa(5);
        file.write(0, b"hello").unwrap();
        file.close().unwrap();

        let mut file = OnionFile::open(path, config).unwrap();
        assert_eq!(file.eof(), 5);
        file.set_eoa(5);
        assert_eq!(read_vec(&file, 0, 5), b"hello");
    }
}
