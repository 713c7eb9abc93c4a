//! Integration tests for the public `Pack` API.
//!
//! These tests exercise the full storage stack (suffix log → GC → mapping →
//! sparse reads → control switch) through the public
//! `packstore::{Pack, PackOptions, PackError}` surface only. No internal
//! modules are referenced.
//!
//! ## Coverage areas
//! - **Lifecycle**: create, close, reopen, fresh reset, version negotiation
//! - **Addressing**: append offsets, reads across the sparse/suffix boundary,
//!   hole and beyond-end failures, `next_valid_offset`
//! - **GC**: repacking across multiple generations, offset stability,
//!   space reclamation
//! - **Crash consistency**: leaked generations swept, pinned readers
//!   surviving switches
//!
//! ## See also
//! - [`mapping::tests`] — builder and lookup unit tests
//! - [`sparse::tests`] — virtual-offset view unit tests
//! - [`pack::tests`] — orchestrator unit tests

use packstore::{Pack, PackError, PackOptions};
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Reopen a pack at the same path with default (read-write) options.
fn reopen(path: &std::path::Path) -> Pack {
    Pack::open(path, PackOptions::default()).expect("reopen")
}

/// Appends `n` records of `len` bytes each, every record filled with its
/// index byte. Returns the offsets.
fn append_records(pack: &mut Pack, n: usize, len: usize) -> Vec<u64> {
    (0..n)
        .map(|i| pack.append(&vec![i as u8; len]).expect("append"))
        .collect()
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Create a store, write, close, reopen read-only, and verify the data.
#[test]
fn data_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let mut pack = Pack::open(tmp.path(), PackOptions::default()).unwrap();
        let off = pack.append(b"first record").unwrap();
        assert_eq!(off, 0);
        pack.sync_to(pack.end_offset()).unwrap();
        pack.close().unwrap();
    }

    let pack = Pack::open(tmp.path(), PackOptions::read_only()).unwrap();
    assert_eq!(pack.end_offset(), 12);
    assert_eq!(pack.last_synced(), 12);
    let mut buf = [0u8; 12];
    pack.read(0, &mut buf).unwrap();
    assert_eq!(&buf, b"first record");
    pack.close().unwrap();
}

/// # Scenario
/// A caller requiring a newer on-disk format than the store carries is
/// turned away; the same store opens fine at its own version.
#[test]
fn version_negotiation() {
    let tmp = TempDir::new().unwrap();
    Pack::open(tmp.path(), PackOptions::default())
        .unwrap()
        .close()
        .unwrap();

    let too_new = PackOptions {
        version: 99,
        ..PackOptions::read_only()
    };
    assert!(matches!(
        Pack::open(tmp.path(), too_new).unwrap_err(),
        PackError::VersionMismatch { required: 99, .. }
    ));

    Pack::open(tmp.path(), PackOptions::read_only())
        .unwrap()
        .close()
        .unwrap();
}

/// # Scenario
/// A fresh reset wipes the contents but the store stays usable: new appends
/// start at offset 0 of a new generation.
#[test]
fn fresh_reset_starts_over() {
    let tmp = TempDir::new().unwrap();
    {
        let mut pack = Pack::open(tmp.path(), PackOptions::default()).unwrap();
        append_records(&mut pack, 4, 100);
        pack.close().unwrap();
    }

    let opts = PackOptions {
        fresh: true,
        ..PackOptions::default()
    };
    let mut pack = Pack::open(tmp.path(), opts).unwrap();
    assert_eq!(pack.end_offset(), 0);
    assert_eq!(pack.append(b"restart").unwrap(), 0);
    pack.close().unwrap();
}

// ================================================================================================
// GC and offset stability
// ================================================================================================

/// # Scenario
/// Write records, GC away half of them, append more, GC again — every
/// surviving offset keeps returning the bytes written at it, across three
/// generations.
#[test]
fn offsets_stay_stable_across_generations() {
    let tmp = TempDir::new().unwrap();
    let mut pack = Pack::open(tmp.path(), PackOptions::default()).unwrap();

    let offsets = append_records(&mut pack, 8, 50);

    // Keep the even-numbered records (decreasing offset order).
    let live: Vec<(u64, u64)> = offsets
        .iter()
        .copied()
        .enumerate()
        .rev()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, off)| (off, 50))
        .collect();
    pack.gc(live).unwrap();
    assert_eq!(pack.generation(), 1);

    // Survivors read back intact, casualties are holes.
    let mut buf = [0u8; 50];
    for (i, &off) in offsets.iter().enumerate() {
        if i % 2 == 0 {
            pack.read(off, &mut buf).unwrap();
            assert_eq!(buf, [i as u8; 50]);
        } else {
            assert!(pack.read(off, &mut buf).is_err());
        }
    }

    // New appends continue the same offset space.
    let tail = pack.append(b"appended after gc").unwrap();
    assert_eq!(tail, 400);

    // Second GC: keep one old survivor and the new tail.
    pack.gc([(tail, 17), (offsets[2], 50)]).unwrap();
    assert_eq!(pack.generation(), 2);

    pack.read(offsets[2], &mut buf).unwrap();
    assert_eq!(buf, [2u8; 50]);
    let mut tail_buf = [0u8; 17];
    pack.read(tail, &mut tail_buf).unwrap();
    assert_eq!(&tail_buf, b"appended after gc");

    pack.close().unwrap();
}

/// # Scenario
/// GC actually reclaims space: after dropping most of the data, the prefix
/// file of the new generation holds only the live bytes.
#[test]
fn gc_reclaims_disk_space() {
    let tmp = TempDir::new().unwrap();
    let mut pack = Pack::open(tmp.path(), PackOptions::default()).unwrap();

    append_records(&mut pack, 10, 10_000);
    pack.flush().unwrap();

    // Keep a single record.
    pack.gc([(0, 10_000)]).unwrap();
    pack.close().unwrap();

    let prefix_len = std::fs::metadata(tmp.path().join("gen-000001.prefix"))
        .unwrap()
        .len();
    assert_eq!(prefix_len, 10_000);
    assert!(!tmp.path().join("gen-000000.suffix").exists());
}

/// # Scenario
/// The state after a GC survives a reopen: routing between the compacted
/// region and the (new, empty) suffix is rebuilt from the control record.
#[test]
fn gc_state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let mut pack = Pack::open(tmp.path(), PackOptions::default()).unwrap();
        append_records(&mut pack, 4, 25);
        pack.gc([(50, 25), (0, 25)]).unwrap();
        pack.append(b"post-gc").unwrap();
        pack.close().unwrap();
    }

    let mut pack = reopen(tmp.path());
    assert_eq!(pack.generation(), 1);

    let mut buf = [0u8; 25];
    pack.read(0, &mut buf).unwrap();
    assert_eq!(buf, [0u8; 25]);
    pack.read(50, &mut buf).unwrap();
    assert_eq!(buf, [2u8; 25]);
    assert!(pack.read(25, &mut buf).is_err());

    let mut tail = [0u8; 7];
    pack.read(100, &mut tail).unwrap();
    assert_eq!(&tail, b"post-gc");

    assert_eq!(pack.append(b"!").unwrap(), 107);
    pack.close().unwrap();
}

/// # Scenario
/// `next_valid_offset` walks a fragmented store: identity on live data,
/// skip-ahead in holes, `None` past the end.
#[test]
fn hole_skipping_after_gc() {
    let tmp = TempDir::new().unwrap();
    let mut pack = Pack::open(tmp.path(), PackOptions::default()).unwrap();
    append_records(&mut pack, 6, 10);
    pack.gc([(40, 10), (20, 10), (0, 10)]).unwrap();

    assert_eq!(pack.next_valid_offset(0), Some(0));
    assert_eq!(pack.next_valid_offset(9), Some(9));
    assert_eq!(pack.next_valid_offset(10), Some(20));
    assert_eq!(pack.next_valid_offset(35), Some(40));
    assert_eq!(pack.next_valid_offset(50), None);

    // An append makes the space past the compacted region valid again.
    pack.append(b"x").unwrap();
    assert_eq!(pack.next_valid_offset(60), Some(60));
    assert_eq!(pack.next_valid_offset(50), Some(60));
    pack.close().unwrap();
}

// ================================================================================================
// Readers across switches
// ================================================================================================

/// # Scenario
/// A reader opened before a GC keeps serving its generation afterwards and
/// picks up the new one on resync.
#[test]
fn pinned_reader_then_resync() {
    let tmp = TempDir::new().unwrap();
    let mut writer = Pack::open(tmp.path(), PackOptions::default()).unwrap();
    let offsets = append_records(&mut writer, 3, 20);
    writer.flush().unwrap();

    let mut reader = Pack::open(tmp.path(), PackOptions::read_only()).unwrap();

    writer.gc([(offsets[2], 20)]).unwrap();

    // Pinned: the dropped records are still visible to the old handle.
    let mut buf = [0u8; 20];
    reader.read(offsets[0], &mut buf).unwrap();
    assert_eq!(buf, [0u8; 20]);

    assert!(reader.resync().unwrap());
    assert!(reader.read(offsets[0], &mut buf).is_err());
    reader.read(offsets[2], &mut buf).unwrap();
    assert_eq!(buf, [2u8; 20]);

    reader.close().unwrap();
    writer.close().unwrap();
}

// ================================================================================================
// Crash windows
// ================================================================================================

/// # Scenario
/// Files of a generation other than the current one (the leak left by a
/// crash between the control flip and the unlink) are swept on the next
/// write-mode open, and the store serves the current generation untouched.
#[test]
fn leaked_generation_is_swept_on_open() {
    let tmp = TempDir::new().unwrap();
    {
        let mut pack = Pack::open(tmp.path(), PackOptions::default()).unwrap();
        pack.append(b"keep me").unwrap();
        pack.gc([(0, 7)]).unwrap();
        pack.close().unwrap();
    }

    // Resurrect generation 0 as if its unlink never happened.
    std::fs::write(tmp.path().join("gen-000000.map"), []).unwrap();
    std::fs::write(tmp.path().join("gen-000000.prefix"), [0u8; 64]).unwrap();
    std::fs::write(tmp.path().join("gen-000000.suffix"), [0u8; 64]).unwrap();

    let pack = reopen(tmp.path());
    assert_eq!(pack.generation(), 1);
    let mut buf = [0u8; 7];
    pack.read(0, &mut buf).unwrap();
    assert_eq!(&buf, b"keep me");

    assert!(!tmp.path().join("gen-000000.map").exists());
    assert!(!tmp.path().join("gen-000000.prefix").exists());
    assert!(!tmp.path().join("gen-000000.suffix").exists());
    pack.close().unwrap();
}
