//! Sparse File Module
//!
//! A **sparse file** pairs a [`MappingFile`] with the physical prefix file it
//! indexes, exposing a virtual-offset read/write surface over data that is
//! physically dense but virtually full of holes.
//!
//! ## Design Overview
//!
//! After a GC pass, a generation's surviving bytes live packed back-to-back
//! in the prefix file, while callers keep addressing them by the virtual
//! offsets they have always used. Every operation here funnels through one
//! address-translation step ([`SparseFile::resolve`]): the mapping's
//! `find_nearest_geq` locates the live run, the entry's physical offset plus
//! the in-run delta gives the physical position, and the remaining run length
//! bounds the operation.
//!
//! Because all I/O goes through that single step, every failure is expressed
//! in **virtual-offset terms** — the physical layout is an implementation
//! detail nothing above this module may observe:
//!
//! - an offset past the last live byte fails with [`SparseError::BeyondEnd`],
//! - an offset inside a reclaimed range fails with [`SparseError::Hole`],
//! - a length exceeding the live run fails with
//!   [`SparseError::ReadOutOfBounds`].
//!
//! The first two are the "invalid sparse read" contract violations: the
//! caller holds a stale virtual offset pointing into garbage-collected
//! space. They are reported, never zero-filled or retried.
//!
//! # Concurrency model
//!
//! The mapping is immutable and the prefix file is written only while the
//! generation is under construction, so concurrent readers need no locking.
//! Write mode exists solely for the GC pass that fills a new generation's
//! compacted region.

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
    io,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::mapping::{MappingError, MappingFile};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by sparse-file operations.
#[derive(Debug, Error)]
pub enum SparseError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error from the underlying mapping file.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Invalid sparse read: the offset is past the last live byte.
    #[error("virtual offset {offset} is beyond the sparse file")]
    BeyondEnd {
        /// The queried virtual offset.
        offset: u64,
    },

    /// Invalid sparse read: the offset falls in a reclaimed hole.
    #[error("virtual offset {offset} falls in a sparse hole")]
    Hole {
        /// The queried virtual offset.
        offset: u64,
    },

    /// The requested length exceeds the live entry at this offset.
    #[error(
        "read of {requested} bytes at virtual offset {offset} exceeds the live entry \
         ({available} bytes readable)"
    )]
    ReadOutOfBounds {
        /// The queried virtual offset.
        offset: u64,
        /// Bytes requested.
        requested: u64,
        /// Bytes actually readable at that offset.
        available: u64,
    },

    /// Write attempted on a read-only sparse file.
    #[error("sparse file is read-only")]
    ReadOnly,
}

// ------------------------------------------------------------------------------------------------
// SparseFile
// ------------------------------------------------------------------------------------------------

/// A mapping file paired with its prefix data file.
///
/// Read-write only while a GC pass constructs the generation's compacted
/// region; read-only for the rest of the generation's lifetime.
#[derive(Debug)]
pub struct SparseFile {
    /// Immutable virtual-to-physical index. Owned exclusively by this pair.
    mapping: MappingFile,

    /// Prefix file holding exactly the compacted live bytes
    /// (size = sum of mapping entry lengths).
    data: File,

    /// Path of the prefix file, kept for logging and retirement.
    data_path: PathBuf,

    /// Whether [`SparseFile::write`] is permitted.
    writable: bool,
}

impl SparseFile {
    /// Creates a fresh prefix file for a just-built mapping and opens the
    /// pair read-write.
    ///
    /// The prefix file is pre-sized to the mapping's total live-byte count;
    /// the GC pass then fills it through [`SparseFile::write`].
    pub fn create(mapping: MappingFile, data_path: impl AsRef<Path>) -> Result<Self, SparseError> {
        let data_path = data_path.as_ref().to_path_buf();
        let data = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&data_path)?;
        data.set_len(mapping.live_bytes())?;

        debug!(
            data = %data_path.display(),
            live_bytes = mapping.live_bytes(),
            "sparse file created"
        );

        Ok(Self {
            mapping,
            data,
            data_path,
            writable: true,
        })
    }

    /// Opens an existing mapping/prefix pair.
    ///
    /// `writable` should be `true` only while the generation is still under
    /// construction.
    pub fn open(
        mapping_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
        writable: bool,
    ) -> Result<Self, SparseError> {
        let mapping = MappingFile::open(mapping_path)?;
        let data_path = data_path.as_ref().to_path_buf();
        let data = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&data_path)?;

        debug!(data = %data_path.display(), writable, "sparse file opened");

        Ok(Self {
            mapping,
            data,
            data_path,
            writable,
        })
    }

    /// The underlying mapping.
    pub fn mapping(&self) -> &MappingFile {
        &self.mapping
    }

    /// Path of the prefix data file.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Translates a virtual offset into `(physical_offset, readable_len)`.
    ///
    /// All failure modes of this file are decided here, in virtual-offset
    /// terms.
    fn resolve(&self, offset: u64) -> Result<(u64, u64), SparseError> {
        let entry = self
            .mapping
            .find_nearest_geq(offset)
            .ok_or(SparseError::BeyondEnd { offset })?;
        if entry.virtual_offset > offset {
            return Err(SparseError::Hole { offset });
        }
        let delta = offset - entry.virtual_offset;
        Ok((entry.physical_offset + delta, entry.length - delta))
    }

    /// Reads exactly `buf.len()` bytes starting at virtual `offset`.
    ///
    /// # Errors
    ///
    /// - [`SparseError::BeyondEnd`] / [`SparseError::Hole`] if `offset` does
    ///   not land on live data.
    /// - [`SparseError::ReadOutOfBounds`] if the read would cross the end of
    ///   the live run.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), SparseError> {
        let (physical, available) = self.resolve(offset)?;
        let requested = buf.len() as u64;
        if requested > available {
            return Err(SparseError::ReadOutOfBounds {
                offset,
                requested,
                available,
            });
        }
        self.data.read_exact_at(buf, physical)?;
        trace!(offset, physical, len = buf.len(), "sparse read");
        Ok(())
    }

    /// Reads between `min_len` and `max_len` bytes starting at virtual
    /// `offset`, returning as many bytes as the live run allows.
    ///
    /// Supports variable-length record reads where only a lower bound is
    /// known up front: the read fails only if even `min_len` bytes cannot be
    /// satisfied.
    pub fn read_range(
        &self,
        offset: u64,
        min_len: u64,
        max_len: u64,
    ) -> Result<Vec<u8>, SparseError> {
        let (physical, available) = self.resolve(offset)?;
        if min_len > available {
            return Err(SparseError::ReadOutOfBounds {
                offset,
                requested: min_len,
                available,
            });
        }
        let len = max_len.min(available);
        let mut buf = vec![0u8; len as usize];
        self.data.read_exact_at(&mut buf, physical)?;
        trace!(offset, physical, len, "sparse range read");
        Ok(buf)
    }

    /// Writes `bytes` at virtual `offset`.
    ///
    /// Used only while constructing or extending the current generation's
    /// compacted region — never for general overwrite.
    ///
    /// # Panics
    ///
    /// A write extending past the resolved live entry is a programming
    /// contract violation, not a recoverable I/O condition, and asserts.
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), SparseError> {
        if !self.writable {
            return Err(SparseError::ReadOnly);
        }
        let (physical, available) = self.resolve(offset)?;
        assert!(
            bytes.len() as u64 <= available,
            "sparse write of {} bytes at offset {offset} exceeds live entry ({available} writable)",
            bytes.len(),
        );
        self.data.write_all_at(bytes, physical)?;
        trace!(offset, physical, len = bytes.len(), "sparse write");
        Ok(())
    }

    /// Delegates to [`MappingFile::next_valid_offset`].
    pub fn next_valid_offset(&self, offset: u64) -> Option<u64> {
        self.mapping.next_valid_offset(offset)
    }

    /// Fsyncs the prefix file.
    pub fn flush(&self) -> Result<(), SparseError> {
        self.data.sync_all()?;
        Ok(())
    }

    /// Flushes (when writable) and closes the pair.
    pub fn close(self) -> Result<(), SparseError> {
        if self.writable {
            self.data.sync_all()?;
        }
        Ok(())
    }
}
