//! Control Record Module
//!
//! The **control record** is the smallest unit of crash-consistent metadata
//! in the pack store: a single fixed-size file (`CONTROL`) recording which
//! generation is current, where the suffix's virtual-offset range begins, and
//! how far writes have been durably synced.
//!
//! ## Design Overview
//!
//! The record is the single point of truth for "which generation is current".
//! Every generation switch writes its new sparse and suffix files first, then
//! updates this record **last**: a crash before the control fsync leaves the
//! previous generation intact and addressable, a crash after leaves the new
//! generation valid and the old one merely leaked.
//!
//! Updates are atomic through the usual rename pattern: serialize to a
//! temp file, fsync it, rename over `CONTROL`, fsync the directory. Readers
//! pinned to an older generation call [`Control::reload`] to detect a
//! generation change cheaply — the record is 36 bytes, so rereading it never
//! forces reparsing any larger structure, and a `last_synced` update does not
//! disturb the generation field.
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC][VERSION_LE][GENERATION_LE][SUFFIX_START_LE][LAST_SYNCED_LE][CRC32_LE]
//! ```
//!
//! All integers little-endian; CRC32 computed over the 32 payload bytes.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Name of the control record file inside the store root.
pub const CONTROL_FILENAME: &str = "CONTROL";

/// Magic constant identifying control records.
pub const CONTROL_MAGIC: [u8; 4] = *b"PCTL";

const TMP_SUFFIX: &str = ".tmp";
const PAYLOAD_SIZE: usize = 32;
const RECORD_SIZE: usize = PAYLOAD_SIZE + 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by control-record operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record failed validation (bad magic or wrong size).
    #[error("Invalid control record: {0}")]
    InvalidRecord(String),

    /// Record checksum did not match.
    #[error("Control record checksum mismatch")]
    ChecksumMismatch,
}

// ------------------------------------------------------------------------------------------------
// Control core
// ------------------------------------------------------------------------------------------------

/// In-memory handle over the on-disk control record.
///
/// Setters mutate only the in-memory copy; [`Control::sync`] makes the whole
/// record durable atomically. There is no partially-updated on-disk state.
#[derive(Debug)]
pub struct Control {
    /// Store root directory containing the `CONTROL` file.
    root: PathBuf,

    /// On-disk format version of the store.
    version: u32,

    /// Current generation id. Monotonically increasing.
    generation: u64,

    /// First virtual offset resolved through the suffix; everything below
    /// resolves through the sparse file.
    suffix_start: u64,

    /// Last virtual offset acknowledged as durably synced.
    last_synced: u64,
}

impl Control {
    /// Returns `true` if a control record exists under `root`.
    pub fn exists(root: impl AsRef<Path>) -> bool {
        root.as_ref().join(CONTROL_FILENAME).is_file()
    }

    /// Creates a fresh control record for a brand-new store (generation 0,
    /// all offsets zero) and makes it durable.
    pub fn create(root: impl AsRef<Path>, version: u32) -> Result<Self, ControlError> {
        let control = Self {
            root: root.as_ref().to_path_buf(),
            version,
            generation: 0,
            suffix_start: 0,
            last_synced: 0,
        };
        control.sync()?;
        info!(root = %control.root.display(), version, "control record created");
        Ok(control)
    }

    /// Opens and verifies the control record under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ControlError> {
        let root = root.as_ref().to_path_buf();
        let (version, generation, suffix_start, last_synced) =
            Self::read_record(&root.join(CONTROL_FILENAME))?;

        debug!(
            root = %root.display(),
            version,
            generation,
            suffix_start,
            last_synced,
            "control record opened"
        );

        Ok(Self {
            root,
            version,
            generation,
            suffix_start,
            last_synced,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    /// On-disk format version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Current generation id.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// First virtual offset covered by the suffix.
    pub fn suffix_start(&self) -> u64 {
        self.suffix_start
    }

    /// Last durably synced virtual offset.
    pub fn last_synced(&self) -> u64 {
        self.last_synced
    }

    // --------------------------------------------------------------------------------------------
    // Mutators — in-memory only until `sync()`
    // --------------------------------------------------------------------------------------------

    /// Sets the current generation id.
    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Sets the suffix start offset.
    pub fn set_suffix_start(&mut self, suffix_start: u64) {
        self.suffix_start = suffix_start;
    }

    /// Sets the last durably synced offset.
    pub fn set_last_synced(&mut self, last_synced: u64) {
        self.last_synced = last_synced;
    }

    // --------------------------------------------------------------------------------------------
    // Durability
    // --------------------------------------------------------------------------------------------

    /// Atomically persists the in-memory record.
    ///
    /// Writes to `CONTROL.tmp`, fsyncs it, renames over `CONTROL`, then
    /// fsyncs the directory so the rename itself is durable. A crash at any
    /// point leaves either the old record or the new one, never a torn mix.
    pub fn sync(&self) -> Result<(), ControlError> {
        let record = self.encode();

        let tmp_path = self.root.join(format!("{CONTROL_FILENAME}{TMP_SUFFIX}"));
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&record)?;
            f.sync_all()?;
        }

        let final_path = self.root.join(CONTROL_FILENAME);
        fs::rename(&tmp_path, &final_path)?;
        Self::fsync_dir(&self.root)?;

        debug!(
            generation = self.generation,
            suffix_start = self.suffix_start,
            last_synced = self.last_synced,
            "control record synced"
        );
        Ok(())
    }

    /// Rereads the on-disk record into this handle.
    ///
    /// Returns `true` if the generation changed since the last read — the
    /// cheap signal a pinned reader polls before resolving offsets against a
    /// possibly-retired generation.
    pub fn reload(&mut self) -> Result<bool, ControlError> {
        let (version, generation, suffix_start, last_synced) =
            Self::read_record(&self.root.join(CONTROL_FILENAME))?;
        let changed = generation != self.generation;
        self.version = version;
        self.generation = generation;
        self.suffix_start = suffix_start;
        self.last_synced = last_synced;
        Ok(changed)
    }

    // --------------------------------------------------------------------------------------------
    // Codec
    // --------------------------------------------------------------------------------------------

    /// Serializes the record payload followed by its CRC32 trailer.
    fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut record = [0u8; RECORD_SIZE];
        record[0..4].copy_from_slice(&CONTROL_MAGIC);
        record[4..8].copy_from_slice(&self.version.to_le_bytes());
        record[8..16].copy_from_slice(&self.generation.to_le_bytes());
        record[16..24].copy_from_slice(&self.suffix_start.to_le_bytes());
        record[24..32].copy_from_slice(&self.last_synced.to_le_bytes());

        let mut hasher = Crc32::new();
        hasher.update(&record[..PAYLOAD_SIZE]);
        record[PAYLOAD_SIZE..].copy_from_slice(&hasher.finalize().to_le_bytes());
        record
    }

    /// Reads and verifies a record, returning
    /// `(version, generation, suffix_start, last_synced)`.
    fn read_record(path: &Path) -> Result<(u32, u64, u64, u64), ControlError> {
        let mut file = File::open(path)?;
        let mut record = [0u8; RECORD_SIZE];
        file.read_exact(&mut record).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ControlError::InvalidRecord("record too small".into())
            } else {
                ControlError::Io(e)
            }
        })?;

        let mut hasher = Crc32::new();
        hasher.update(&record[..PAYLOAD_SIZE]);
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&record[PAYLOAD_SIZE..]);
        if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
            return Err(ControlError::ChecksumMismatch);
        }

        if record[0..4] != CONTROL_MAGIC {
            return Err(ControlError::InvalidRecord("magic mismatch".into()));
        }

        let word32 = |range: std::ops::Range<usize>| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&record[range]);
            u32::from_le_bytes(b)
        };
        let word64 = |range: std::ops::Range<usize>| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&record[range]);
            u64::from_le_bytes(b)
        };

        Ok((
            word32(4..8),
            word64(8..16),
            word64(16..24),
            word64(24..32),
        ))
    }

    /// Fsyncs a directory so a completed rename survives a crash.
    fn fsync_dir(dir: &Path) -> Result<(), ControlError> {
        let dir_file = File::open(dir)?;
        dir_file.sync_all()?;
        Ok(())
    }
}
