//! Pack Module — generation-switch orchestrator
//!
//! A **pack** is one directory of per-generation file pairs plus the control
//! record, presented as a single stable virtual-offset space:
//!
//! ```text
//! <root>/
//! ├── CONTROL                # atomic metadata record (current generation)
//! ├── gen-000003.map         # mapping file of the current generation
//! ├── gen-000003.prefix      # compacted live bytes indexed by the mapping
//! └── gen-000003.suffix      # append log of writes since the last GC
//! ```
//!
//! ## Design Overview
//!
//! Reads route by a single boundary, the **suffix start offset**: virtual
//! offsets below it resolve through the generation's sparse file (mapping +
//! prefix), offsets at or above it through the suffix log. Appends only ever
//! extend the suffix, so the virtual-offset space grows monotonically and an
//! offset handed out once stays valid across any number of GC passes (unless
//! the caller declares it garbage).
//!
//! A GC pass builds the next generation entirely beside the current one: new
//! mapping from the caller-supplied live ranges, live bytes copied into the
//! new prefix, a fresh suffix starting at the current end offset. Only when
//! all of that is durable does the control record switch generations — that
//! single fsync is the commit point. A crash before it leaves the previous
//! generation intact and current; a crash after leaves the new generation
//! current and the old files merely leaked, unlinked lazily on a later
//! write-mode open.
//!
//! ## Concurrency model
//!
//! One writer, many readers. A read-only handle keeps its generation's files
//! open and readable even after the writer switches generations (POSIX keeps
//! unlinked-but-open files alive); it calls [`Pack::resync`] to hop onto the
//! current generation.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    control::{Control, ControlError},
    mapping::{MappingBuilder, MappingError},
    sparse::{SparseError, SparseFile},
    suffix::{Suffix, SuffixError},
};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Current on-disk format version of the pack store.
pub const FORMAT_VERSION: u32 = 1;

/// Chunk size used when relocating live bytes during a GC pass.
const GC_COPY_CHUNK: u64 = 64 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by pack operations.
#[derive(Debug, Error)]
pub enum PackError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error from the mapping layer.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Error from the sparse-file layer.
    #[error("Sparse file error: {0}")]
    Sparse(#[from] SparseError),

    /// Error from the suffix log.
    #[error("Suffix error: {0}")]
    Suffix(#[from] SuffixError),

    /// Error from the control record.
    #[error("Control record error: {0}")]
    Control(#[from] ControlError),

    /// The caller requires a newer on-disk format than the store carries.
    #[error("store format version {on_disk} is older than required version {required}")]
    VersionMismatch {
        /// Version persisted in the control record.
        on_disk: u32,
        /// Minimum version the caller accepts.
        required: u32,
    },

    /// The requested operation is not permitted in the current open mode.
    #[error("illegal mode: {0}")]
    IllegalMode(&'static str),

    /// No store exists at the given root.
    #[error("no pack store at {0}")]
    NotFound(PathBuf),
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// How a pack handle may touch the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Reads only. Never creates, mutates, or unlinks anything.
    ReadOnly,
    /// Reads, appends, GC, and generation switches.
    ReadWrite,
}

/// Options for [`Pack::open`].
#[derive(Debug, Clone, Copy)]
pub struct PackOptions {
    /// Access mode of the handle.
    pub mode: OpenMode,

    /// Minimum on-disk format version the caller accepts. Opening fails if
    /// the store on disk is older.
    pub version: u32,

    /// Discard all existing contents and start a brand-new generation.
    /// Requires [`OpenMode::ReadWrite`].
    pub fresh: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            mode: OpenMode::ReadWrite,
            version: FORMAT_VERSION,
            fresh: false,
        }
    }
}

impl PackOptions {
    /// Read-only options at the current format version.
    pub fn read_only() -> Self {
        Self {
            mode: OpenMode::ReadOnly,
            ..Self::default()
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Per-generation paths
// ------------------------------------------------------------------------------------------------

fn mapping_path(root: &Path, generation: u64) -> PathBuf {
    root.join(format!("gen-{generation:06}.map"))
}

fn prefix_path(root: &Path, generation: u64) -> PathBuf {
    root.join(format!("gen-{generation:06}.prefix"))
}

fn suffix_path(root: &Path, generation: u64) -> PathBuf {
    root.join(format!("gen-{generation:06}.suffix"))
}

// ------------------------------------------------------------------------------------------------
// Pack core
// ------------------------------------------------------------------------------------------------

/// Handle over one pack store directory.
#[derive(Debug)]
pub struct Pack {
    /// Store root directory.
    root: PathBuf,

    /// Access mode fixed at open time.
    mode: OpenMode,

    /// Generation this handle currently resolves against.
    generation: u64,

    /// Control record handle.
    control: Control,

    /// Compacted region of the current generation.
    sparse: SparseFile,

    /// Append log of the current generation.
    suffix: Suffix,
}

impl Pack {
    /// Opens (or creates) the pack store at `root`.
    ///
    /// # Errors
    ///
    /// - [`PackError::NotFound`] when no store exists and the mode is
    ///   read-only — a read-only handle cannot materialize storage.
    /// - [`PackError::VersionMismatch`] when the store on disk is older than
    ///   `options.version`.
    /// - [`PackError::IllegalMode`] for `fresh` in read-only mode.
    pub fn open(root: impl AsRef<Path>, options: PackOptions) -> Result<Self, PackError> {
        let root = root.as_ref().to_path_buf();

        if options.fresh && options.mode == OpenMode::ReadOnly {
            return Err(PackError::IllegalMode(
                "a fresh reset requires write access",
            ));
        }

        if !Control::exists(&root) {
            if options.mode == OpenMode::ReadOnly {
                return Err(PackError::NotFound(root));
            }
            return Self::create_store(root, options);
        }

        let control = Control::open(&root)?;
        if control.version() < options.version {
            return Err(PackError::VersionMismatch {
                on_disk: control.version(),
                required: options.version,
            });
        }

        if options.fresh {
            return Self::fresh_reset(root, control, options);
        }

        let generation = control.generation();
        let writable = options.mode == OpenMode::ReadWrite;
        let sparse = SparseFile::open(
            mapping_path(&root, generation),
            prefix_path(&root, generation),
            false,
        )?;
        let suffix = Suffix::open(suffix_path(&root, generation), writable)?;

        if writable {
            Self::cleanup_stale_generations(&root, generation);
        }

        info!(
            root = %root.display(),
            generation,
            mode = ?options.mode,
            end_offset = suffix.end_offset(),
            "pack opened"
        );

        Ok(Self {
            root,
            mode: options.mode,
            generation,
            control,
            sparse,
            suffix,
        })
    }

    /// Materializes a brand-new store: generation 0, empty mapping, suffix
    /// starting at virtual offset 0.
    fn create_store(root: PathBuf, options: PackOptions) -> Result<Self, PackError> {
        fs::create_dir_all(&root)?;

        let mapping = MappingBuilder::build(std::iter::empty(), mapping_path(&root, 0))?;
        let sparse = SparseFile::create(mapping, prefix_path(&root, 0))?;
        let suffix = Suffix::create(suffix_path(&root, 0), 0)?;
        let control = Control::create(&root, options.version)?;

        info!(root = %root.display(), "pack store created");

        Ok(Self {
            root,
            mode: options.mode,
            generation: 0,
            control,
            sparse,
            suffix,
        })
    }

    /// Discards all contents: a new empty generation becomes current, then
    /// the previous generation's files are unlinked.
    fn fresh_reset(
        root: PathBuf,
        mut control: Control,
        options: PackOptions,
    ) -> Result<Self, PackError> {
        let old_generation = control.generation();
        let generation = old_generation + 1;

        let mapping = MappingBuilder::build(std::iter::empty(), mapping_path(&root, generation))?;
        let sparse = SparseFile::create(mapping, prefix_path(&root, generation))?;
        let suffix = Suffix::create(suffix_path(&root, generation), 0)?;

        // Durable point: after this sync the new (empty) generation is
        // current; before it, a crash leaves the old one untouched.
        control.set_generation(generation);
        control.set_suffix_start(0);
        control.set_last_synced(0);
        control.sync()?;

        Self::retire_generation(&root, old_generation);

        info!(root = %root.display(), generation, "pack store reset");

        Ok(Self {
            root,
            mode: options.mode,
            generation,
            control,
            sparse,
            suffix,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generation this handle resolves against.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// One past the last appended virtual offset.
    pub fn end_offset(&self) -> u64 {
        self.suffix.end_offset()
    }

    /// Last virtual offset recorded as durably synced.
    pub fn last_synced(&self) -> u64 {
        self.control.last_synced()
    }

    // --------------------------------------------------------------------------------------------
    // Reads — routed by the suffix start offset
    // --------------------------------------------------------------------------------------------

    /// Reads exactly `buf.len()` bytes starting at virtual `offset`.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), PackError> {
        if offset >= self.suffix.start_offset() {
            self.suffix.read_at(offset, buf)?;
        } else {
            self.sparse.read(offset, buf)?;
        }
        Ok(())
    }

    /// Reads between `min_len` and `max_len` bytes starting at virtual
    /// `offset`, returning as many as the live extent allows.
    pub fn read_range(
        &self,
        offset: u64,
        min_len: u64,
        max_len: u64,
    ) -> Result<Vec<u8>, PackError> {
        if offset >= self.suffix.start_offset() {
            let available = self.suffix.end_offset().saturating_sub(offset);
            if min_len > available {
                return Err(PackError::Suffix(SuffixError::OutOfBounds {
                    offset,
                    requested: min_len,
                    start: self.suffix.start_offset(),
                    end: self.suffix.end_offset(),
                }));
            }
            let mut buf = vec![0u8; max_len.min(available) as usize];
            self.suffix.read_at(offset, &mut buf)?;
            Ok(buf)
        } else {
            Ok(self.sparse.read_range(offset, min_len, max_len)?)
        }
    }

    /// Returns `offset` if it lands on live data, the next live offset after
    /// it if it falls in a hole, or `None` past the end of the store.
    pub fn next_valid_offset(&self, offset: u64) -> Option<u64> {
        if offset >= self.suffix.start_offset() {
            return (offset < self.suffix.end_offset()).then_some(offset);
        }
        self.sparse.next_valid_offset(offset).or_else(|| {
            // Past the last live sparse byte: the suffix is next, if any of
            // it exists.
            (!self.suffix.is_empty()).then_some(self.suffix.start_offset())
        })
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Appends `bytes` to the suffix and returns their virtual offset.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64, PackError> {
        if self.mode == OpenMode::ReadOnly {
            return Err(PackError::IllegalMode("append requires write access"));
        }
        Ok(self.suffix.append(bytes)?)
    }

    /// Fsyncs all appended bytes.
    pub fn flush(&self) -> Result<(), PackError> {
        self.suffix.flush()?;
        Ok(())
    }

    /// Makes everything up to `offset` durable and records it in the control
    /// record.
    pub fn sync_to(&mut self, offset: u64) -> Result<(), PackError> {
        if self.mode == OpenMode::ReadOnly {
            return Err(PackError::IllegalMode("sync_to requires write access"));
        }
        self.suffix.flush()?;
        self.control.set_last_synced(offset);
        self.control.sync()?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Garbage collection
    // --------------------------------------------------------------------------------------------

    /// Repacks the store into a new generation, keeping only `live_ranges`.
    ///
    /// `live_ranges` yields `(virtual_offset, length)` pairs in strictly
    /// decreasing offset order, covering every byte that must survive —
    /// whether it currently lives in the compacted region or the suffix.
    /// Ranges may touch or overlap; they are collapsed into maximal runs.
    ///
    /// The switch is crash-consistent: the new generation's mapping, prefix,
    /// and empty suffix are all fsynced before the control record flips. A
    /// crash before that flip leaves the old generation current; a crash
    /// after leaves the new generation current and the old files leaked,
    /// reclaimed on a later write-mode open.
    pub fn gc<I>(&mut self, live_ranges: I) -> Result<(), PackError>
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        if self.mode == OpenMode::ReadOnly {
            return Err(PackError::IllegalMode("gc requires write access"));
        }

        let old_generation = self.generation;
        let generation = old_generation + 1;
        info!(generation = old_generation, "gc pass started");

        // The enumeration is consumed once up front; the mapping build and
        // the copy loop below both walk it.
        let ranges: Vec<(u64, u64)> = live_ranges.into_iter().collect();

        let mapping = MappingBuilder::build(
            ranges.iter().copied(),
            mapping_path(&self.root, generation),
        )?;
        let new_sparse = SparseFile::create(mapping, prefix_path(&self.root, generation))?;

        // Relocate the surviving bytes through the old generation's read
        // path. Each collapsed run is contiguous live data, so it never
        // straddles a hole; it may straddle the old sparse/suffix boundary,
        // which the chunking respects.
        let old_boundary = self.suffix.start_offset();
        let mut chunk = vec![0u8; GC_COPY_CHUNK as usize];
        for i in 0..new_sparse.mapping().entry_count() {
            let entry = new_sparse.mapping().entry(i);
            let mut offset = entry.virtual_offset;
            let mut remaining = entry.length;
            while remaining > 0 {
                let mut len = remaining.min(GC_COPY_CHUNK);
                if offset < old_boundary {
                    len = len.min(old_boundary - offset);
                }
                let buf = &mut chunk[..len as usize];
                self.read(offset, buf)?;
                new_sparse.write(offset, buf)?;
                offset += len;
                remaining -= len;
            }
        }
        new_sparse.flush()?;

        // The new suffix picks up exactly where the virtual-offset space
        // currently ends; nothing above it existed yet.
        let suffix_start = self.suffix.end_offset();
        let new_suffix = Suffix::create(suffix_path(&self.root, generation), suffix_start)?;

        // Durable commit point for the whole switch.
        self.control.set_generation(generation);
        self.control.set_suffix_start(suffix_start);
        self.control.sync()?;

        let old_sparse = std::mem::replace(&mut self.sparse, new_sparse);
        let old_suffix = std::mem::replace(&mut self.suffix, new_suffix);
        self.generation = generation;

        // Past the commit point: failures here only leak files.
        if let Err(e) = old_sparse.close() {
            warn!(error = %e, "failed to close retired sparse file");
        }
        if let Err(e) = old_suffix.close() {
            warn!(error = %e, "failed to close retired suffix");
        }
        Self::retire_generation(&self.root, old_generation);

        info!(
            generation,
            suffix_start,
            live_bytes = self.sparse.mapping().live_bytes(),
            "gc pass complete"
        );
        Ok(())
    }

    /// Unlinks one generation's file trio, warning instead of failing — the
    /// switch is already durable, a leftover file is only leaked space.
    fn retire_generation(root: &Path, generation: u64) {
        for path in [
            mapping_path(root, generation),
            prefix_path(root, generation),
            suffix_path(root, generation),
        ] {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to unlink retired file");
                }
            } else {
                debug!(path = %path.display(), "retired");
            }
        }
    }

    /// Unlinks generation files leaked by a crash between a control switch
    /// and the old generation's retirement.
    fn cleanup_stale_generations(root: &Path, current: u64) {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to scan store root for stale generations");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix("gen-") else {
                continue;
            };
            let Some(digits) = rest.split('.').next() else {
                continue;
            };
            let Ok(generation) = digits.parse::<u64>() else {
                continue;
            };
            if generation != current {
                let path = entry.path();
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to unlink stale file");
                } else {
                    info!(path = %path.display(), "cleaned up stale generation file");
                }
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Reader resynchronization
    // --------------------------------------------------------------------------------------------

    /// Hops this handle onto the current generation if a writer has switched
    /// since it last looked. Returns `true` if the generation changed.
    ///
    /// Until this is called, a pinned handle keeps reading its own
    /// generation's files, which stay alive while open even after the writer
    /// unlinks them.
    pub fn resync(&mut self) -> Result<bool, PackError> {
        if !self.control.reload()? {
            return Ok(false);
        }
        let generation = self.control.generation();
        let writable = self.mode == OpenMode::ReadWrite;
        self.sparse = SparseFile::open(
            mapping_path(&self.root, generation),
            prefix_path(&self.root, generation),
            false,
        )?;
        self.suffix = Suffix::open(suffix_path(&self.root, generation), writable)?;

        debug!(
            from = self.generation,
            to = generation,
            "resynced to current generation"
        );
        self.generation = generation;
        Ok(true)
    }

    /// Flushes (when writable) and closes the handle.
    pub fn close(self) -> Result<(), PackError> {
        if self.mode == OpenMode::ReadWrite {
            self.suffix.flush()?;
        }
        self.sparse.close()?;
        self.suffix.close()?;
        Ok(())
    }
}
