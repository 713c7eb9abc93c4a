//! Mapping File Module
//!
//! This module implements the **immutable**, **memory-mapped** index that
//! translates virtual offsets into physical offsets inside a generation's
//! prefix file. It is the address-translation core of the pack store: after a
//! garbage-collection pass has compacted live bytes into a dense prefix file,
//! the mapping file records where every surviving virtual range now lives.
//!
//! ## Design Overview
//!
//! A mapping file is a flat array of fixed-width [`MappingEntry`] records.
//! Each entry describes one maximal contiguous run of live bytes:
//!
//! - entries are sorted ascending by `virtual_offset`,
//! - entries never overlap,
//! - physical offsets form a gapless packing — the physical offset of entry
//!   *i+1* equals the physical offset of entry *i* plus its length, starting
//!   at zero. The prefix file has no holes; only the virtual space does.
//!
//! Construction goes through [`MappingBuilder`](builder::MappingBuilder),
//! which consumes a strictly offset-decreasing enumeration of live ranges,
//! collapses touching runs, reverses the array in place, and rewrites the
//! physical offsets into the gapless packing. Once built, the file is never
//! mutated again; readers access it through a read-only memory map.
//!
//! # On-disk layout
//!
//! ```text
//! [VIRTUAL_OFFSET_NE_U64][PHYSICAL_OFFSET_NE_U64][LENGTH_NE_U64]
//! [VIRTUAL_OFFSET_NE_U64][PHYSICAL_OFFSET_NE_U64][LENGTH_NE_U64]
//! ...
//! ```
//!
//! Every record is exactly [`ENTRY_SIZE`] (24) bytes; a file whose size is
//! not a multiple of 24 is corrupt. A zero-length file is a valid, empty
//! mapping — every virtual offset is a hole.
//!
//! Words are stored in **platform-native** byte order. Writers always encode
//! native and the reader side is the single place where byte order is fixed
//! up: [`encode_entry`] and [`decode_entry`] are the only functions that
//! touch raw bytes, so big-endian targets exercise the exact same pair.
//!
//! # Concurrency model
//!
//! Mapping files are immutable once constructed, so reads are lock-free and
//! thread-safe. A generation switch replaces the whole file, never mutates
//! it in place — readers see the old mapping fully or the new one fully.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;


pub use builder::{BuildProgress, MappingBuilder};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// On-disk size of a single mapping entry: three 8-byte words.
pub const ENTRY_SIZE: usize = 24;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by mapping-file operations (build, open, lookup).
#[derive(Debug, Error)]
pub enum MappingError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Reopened mapping file has an impossible size.
    #[error("Corrupted mapping file: {0}")]
    Corrupted(String),

    /// The caller's live-range enumeration was not strictly decreasing.
    #[error("live ranges must be strictly decreasing: offset {offset} follows {previous}")]
    InvalidRangeOrder {
        /// The offending range's virtual offset.
        offset: u64,
        /// The virtual offset of the range that preceded it.
        previous: u64,
    },

    /// The platform cannot address the mapping's 64-bit offset range.
    #[error("garbage collection requires 64-bit addressing ({0}-bit platform)")]
    GcForbiddenOnPlatform(u32),
}

// ------------------------------------------------------------------------------------------------
// MappingEntry
// ------------------------------------------------------------------------------------------------

/// One maximal contiguous run of live bytes.
///
/// Maps the virtual range `[virtual_offset, virtual_offset + length)` to the
/// physical range `[physical_offset, physical_offset + length)` in the
/// generation's prefix file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEntry {
    /// Caller-visible logical address of the first live byte of this run.
    pub virtual_offset: u64,

    /// Byte position of this run inside the prefix file.
    pub physical_offset: u64,

    /// Run length in bytes. Always greater than zero.
    pub length: u64,
}

impl MappingEntry {
    /// Virtual offset of the last live byte of this run (inclusive).
    pub fn end_offset(&self) -> u64 {
        self.virtual_offset + self.length - 1
    }

    /// Returns `true` if `offset` falls inside this run.
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.virtual_offset && offset <= self.end_offset()
    }
}

// ------------------------------------------------------------------------------------------------
// Entry codec — the single byte-order fix-up point
// ------------------------------------------------------------------------------------------------

/// Serializes an entry into a 24-byte record in platform-native byte order.
///
/// `out` must be exactly [`ENTRY_SIZE`] bytes.
pub(crate) fn encode_entry(entry: &MappingEntry, out: &mut [u8]) {
    debug_assert_eq!(out.len(), ENTRY_SIZE);
    out[0..8].copy_from_slice(&entry.virtual_offset.to_ne_bytes());
    out[8..16].copy_from_slice(&entry.physical_offset.to_ne_bytes());
    out[16..24].copy_from_slice(&entry.length.to_ne_bytes());
}

/// Deserializes a 24-byte record written by [`encode_entry`].
///
/// Byte order is corrected here and nowhere else; big-endian targets run the
/// same conversion pass as little-endian ones.
pub(crate) fn decode_entry(raw: &[u8]) -> MappingEntry {
    debug_assert_eq!(raw.len(), ENTRY_SIZE);
    let word = |range: std::ops::Range<usize>| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&raw[range]);
        u64::from_ne_bytes(bytes)
    };
    MappingEntry {
        virtual_offset: word(0..8),
        physical_offset: word(8..16),
        length: word(16..24),
    }
}

/// Refuses to build or map on platforms whose native pointer width cannot
/// address the 64-bit virtual-offset range. Documented restriction, not
/// recoverable.
pub(crate) fn check_platform() -> Result<(), MappingError> {
    let bits = usize::BITS;
    if bits < 64 {
        return Err(MappingError::GcForbiddenOnPlatform(bits));
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// MappingFile — immutable reader
// ------------------------------------------------------------------------------------------------

/// A read-only, memory-mapped mapping file.
///
/// Owned exclusively by the [`SparseFile`](crate::sparse::SparseFile) that
/// references it; closed when its generation is retired.
#[derive(Debug)]
pub struct MappingFile {
    /// Read-only map of the whole file. `None` for an empty mapping — a
    /// zero-length file cannot be mapped.
    mmap: Option<Mmap>,

    /// Number of 24-byte entries in the file.
    entries: usize,

    /// Path the file was opened from.
    path: PathBuf,
}

impl MappingFile {
    /// Opens a mapping file read-only and memory-maps it.
    ///
    /// # Errors
    ///
    /// - [`MappingError::Corrupted`] if the file size is not a multiple of
    ///   [`ENTRY_SIZE`].
    /// - [`MappingError::GcForbiddenOnPlatform`] on sub-64-bit platforms.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }` but is memory-safe because the file
    /// is never written after construction and the map is read-only; every
    /// access below is bounds-checked against the mapped length.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        check_platform()?;

        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        if file_len % ENTRY_SIZE as u64 != 0 {
            return Err(MappingError::Corrupted(format!(
                "size {file_len} is not a multiple of {ENTRY_SIZE}"
            )));
        }

        let entries = (file_len / ENTRY_SIZE as u64) as usize;
        let mmap = if entries == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };

        debug!(path = %path.display(), entries, "mapping file opened");

        Ok(Self {
            mmap,
            entries,
            path,
        })
    }

    /// Number of entries in this mapping.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Returns `true` if the mapping has no entries (everything is a hole).
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Path this mapping was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total number of live bytes, i.e. the required prefix-file size.
    ///
    /// Thanks to the gapless packing invariant this is the last entry's
    /// physical offset plus its length.
    pub fn live_bytes(&self) -> u64 {
        if self.entries == 0 {
            return 0;
        }
        let last = self.entry(self.entries - 1);
        last.physical_offset + last.length
    }

    /// Decodes entry `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= entry_count()` — all callers iterate or binary
    /// search within bounds.
    pub fn entry(&self, index: usize) -> MappingEntry {
        let base = index * ENTRY_SIZE;
        let mmap = self
            .mmap
            .as_ref()
            .unwrap_or_else(|| panic!("entry({index}) on empty mapping"));
        decode_entry(&mmap[base..base + ENTRY_SIZE])
    }

    /// Finds the first entry whose **end offset** is `>= offset`.
    ///
    /// This is the core lookup primitive. The returned entry either contains
    /// `offset` or is the nearest entry after a hole — the caller tells the
    /// two cases apart by checking `entry.virtual_offset > offset`. Returns
    /// `None` when `offset` is past the last live byte.
    pub fn find_nearest_geq(&self, offset: u64) -> Option<MappingEntry> {
        let mut lo = 0usize;
        let mut hi = self.entries;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid).end_offset() < offset {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == self.entries {
            None
        } else {
            Some(self.entry(lo))
        }
    }

    /// Returns `offset` itself if it lands inside a live entry, otherwise the
    /// start of the nearest subsequent entry, or `None` if no live data
    /// remains at or after `offset`.
    ///
    /// Used by callers iterating live data in virtual-offset order that must
    /// skip holes.
    pub fn next_valid_offset(&self, offset: u64) -> Option<u64> {
        let entry = self.find_nearest_geq(offset)?;
        if entry.contains(offset) {
            Some(offset)
        } else {
            Some(entry.virtual_offset)
        }
    }
}
