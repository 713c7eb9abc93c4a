//! Suffix File Module
//!
//! The **suffix** is the append-only log of bytes written since the last
//! compaction. Together with the generation's [`SparseFile`], it covers the
//! whole virtual-offset space: offsets below the suffix start resolve through
//! the sparse file's mapping, offsets at or above it resolve here directly —
//! the suffix is dense, so translation is plain arithmetic.
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC][VERSION_LE][START_OFFSET_LE][HEADER_CRC32_LE]
//! [RAW BYTES ...]
//! ```
//!
//! - **Header** — magic (`b"PSFX"`), format version, and the first virtual
//!   offset this log covers, protected by a CRC32 checksum. The start offset
//!   is also recorded in the control record; repeating it here makes each
//!   generation's file pair self-describing.
//! - **Body** — raw appended bytes. Virtual offset `start_offset + i` lives
//!   at file position `HEADER_TOTAL + i`. There is no per-record framing:
//!   callers address extents by virtual offset, the object store above this
//!   layer owns record boundaries.
//!
//! # Guarantees
//!
//! - **Integrity:** the header checksum is verified on every open; a
//!   mismatch is a hard error, never silently repaired.
//! - **Durability:** appends become durable at the caller's `flush()`
//!   points; the header itself is fsynced at creation.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{File, OpenOptions},
    io::{self, Read},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, trace};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Magic constant identifying suffix files.
pub const SUFFIX_MAGIC: [u8; 4] = *b"PSFX";

/// Current suffix format version.
pub const SUFFIX_VERSION: u32 = 1;

/// Header payload size: magic + version + start offset.
const HEADER_SIZE: usize = 16;

/// Header payload plus its CRC32 trailer.
const HEADER_TOTAL: u64 = (HEADER_SIZE + 4) as u64;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by suffix-file operations.
#[derive(Debug, Error)]
pub enum SuffixError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Header failed validation (bad magic, version, or truncated file).
    #[error("Invalid suffix header: {0}")]
    InvalidHeader(String),

    /// Header checksum did not match.
    #[error("Suffix header checksum mismatch")]
    ChecksumMismatch,

    /// A read fell outside the appended byte range.
    #[error(
        "suffix read of {requested} bytes at virtual offset {offset} is out of bounds \
         (covers [{start}, {end}))"
    )]
    OutOfBounds {
        /// The queried virtual offset.
        offset: u64,
        /// Bytes requested.
        requested: u64,
        /// First virtual offset covered by this suffix.
        start: u64,
        /// One past the last appended virtual offset.
        end: u64,
    },

    /// Append attempted on a read-only suffix.
    #[error("suffix file is read-only")]
    ReadOnly,
}

// ------------------------------------------------------------------------------------------------
// Suffix core
// ------------------------------------------------------------------------------------------------

/// An append-only log of recent writes, addressed by virtual offset.
#[derive(Debug)]
pub struct Suffix {
    /// Underlying log file.
    file: File,

    /// Path of the log file, kept for logging and retirement.
    path: PathBuf,

    /// First virtual offset this log covers.
    start_offset: u64,

    /// Bytes appended so far (excluding the header).
    len: u64,

    /// Whether [`Suffix::append`] is permitted.
    writable: bool,
}

impl Suffix {
    /// Creates a fresh, empty suffix starting at `start_offset` and fsyncs
    /// its header.
    pub fn create(path: impl AsRef<Path>, start_offset: u64) -> Result<Self, SuffixError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let header = Self::encode_header(start_offset);
        file.write_all_at(&header, 0)?;
        file.sync_all()?;

        info!(path = %path.display(), start_offset, "suffix created");

        Ok(Self {
            file,
            path,
            start_offset,
            len: 0,
            writable: true,
        })
    }

    /// Opens an existing suffix, validating its header.
    ///
    /// # Errors
    ///
    /// - [`SuffixError::InvalidHeader`] for a truncated file or wrong
    ///   magic/version.
    /// - [`SuffixError::ChecksumMismatch`] for a corrupted header.
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self, SuffixError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(writable).open(&path)?;

        let file_len = file.metadata()?.len();
        if file_len < HEADER_TOTAL {
            return Err(SuffixError::InvalidHeader(format!(
                "file too small ({file_len} bytes)"
            )));
        }

        let mut header = [0u8; HEADER_TOTAL as usize];
        file.read_exact(&mut header)?;

        let mut hasher = Crc32::new();
        hasher.update(&header[..HEADER_SIZE]);
        let computed = hasher.finalize();
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&header[HEADER_SIZE..]);
        if computed != u32::from_le_bytes(crc_bytes) {
            return Err(SuffixError::ChecksumMismatch);
        }

        if header[0..4] != SUFFIX_MAGIC {
            return Err(SuffixError::InvalidHeader("magic mismatch".into()));
        }
        let mut version_bytes = [0u8; 4];
        version_bytes.copy_from_slice(&header[4..8]);
        let version = u32::from_le_bytes(version_bytes);
        if version != SUFFIX_VERSION {
            return Err(SuffixError::InvalidHeader(format!(
                "unsupported version {version}"
            )));
        }
        let mut start_bytes = [0u8; 8];
        start_bytes.copy_from_slice(&header[8..16]);
        let start_offset = u64::from_le_bytes(start_bytes);

        debug!(path = %path.display(), start_offset, writable, "suffix opened");

        Ok(Self {
            file,
            path,
            start_offset,
            len: file_len - HEADER_TOTAL,
            writable,
        })
    }

    /// Serializes the header payload followed by its CRC32 trailer.
    fn encode_header(start_offset: u64) -> [u8; HEADER_TOTAL as usize] {
        let mut header = [0u8; HEADER_TOTAL as usize];
        header[0..4].copy_from_slice(&SUFFIX_MAGIC);
        header[4..8].copy_from_slice(&SUFFIX_VERSION.to_le_bytes());
        header[8..16].copy_from_slice(&start_offset.to_le_bytes());

        let mut hasher = Crc32::new();
        hasher.update(&header[..HEADER_SIZE]);
        header[HEADER_SIZE..].copy_from_slice(&hasher.finalize().to_le_bytes());
        header
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First virtual offset covered by this suffix.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Bytes appended so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last appended virtual offset.
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.len
    }

    /// Appends `bytes` and returns the virtual offset they were written at.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64, SuffixError> {
        if !self.writable {
            return Err(SuffixError::ReadOnly);
        }
        let offset = self.end_offset();
        self.file.write_all_at(bytes, HEADER_TOTAL + self.len)?;
        self.len += bytes.len() as u64;
        trace!(offset, len = bytes.len(), "suffix append");
        Ok(offset)
    }

    /// Reads exactly `buf.len()` bytes starting at virtual `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), SuffixError> {
        let requested = buf.len() as u64;
        let end = self.end_offset();
        if offset < self.start_offset || offset + requested > end {
            return Err(SuffixError::OutOfBounds {
                offset,
                requested,
                start: self.start_offset,
                end,
            });
        }
        let position = HEADER_TOTAL + (offset - self.start_offset);
        self.file.read_exact_at(buf, position)?;
        trace!(offset, len = buf.len(), "suffix read");
        Ok(())
    }

    /// Fsyncs all appended bytes.
    pub fn flush(&self) -> Result<(), SuffixError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Flushes (when writable) and closes the log.
    pub fn close(self) -> Result<(), SuffixError> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }
}
