//! Mapping builder — constructs an immutable mapping file from a live-range
//! enumeration.
//!
//! The caller (the object store's GC pass) supplies `(virtual_offset, length)`
//! ranges in **strictly decreasing** offset order. The builder streams them to
//! disk while collapsing touching or overlapping ranges into maximal runs,
//! then post-processes the file in place:
//!
//! 1. **Collapse** — one open entry is kept in memory; an incoming range that
//!    touches or overlaps it extends it downward, anything else flushes the
//!    open entry (physical offset written as a placeholder `0`).
//! 2. **Reverse** — the flushed records are in decreasing virtual-offset
//!    order. [`reverse_records`] swaps fixed-stride slots pairwise over the
//!    mutable memory map, so the pass costs O(1) extra memory even when the
//!    array is gigabytes long.
//! 3. **Repack** — [`assign_physical_offsets`] rewrites the placeholders in a
//!    single forward scan, establishing the gapless physical packing.
//! 4. **Persist** — the map is flushed, the file fsynced, then reopened as a
//!    read-only [`MappingFile`].
//!
//! Both in-place passes operate on a plain `&mut [u8]` with a fixed stride,
//! independent of the storage underneath, so they are unit-tested against
//! in-memory arrays before being wired to the mapped file.

use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::Path,
};

use memmap2::MmapMut;
use tracing::{debug, info};

use super::{ENTRY_SIZE, MappingEntry, MappingError, MappingFile, check_platform, decode_entry, encode_entry};

// ------------------------------------------------------------------------------------------------
// Progress reporting
// ------------------------------------------------------------------------------------------------

/// Snapshot passed to the optional progress callback after each flushed
/// entry.
#[derive(Debug, Clone, Copy)]
pub struct BuildProgress {
    /// Entries flushed so far.
    pub entries: u64,

    /// Live bytes covered by the flushed entries.
    pub live_bytes: u64,
}

// ------------------------------------------------------------------------------------------------
// In-place passes over a fixed-stride record array
// ------------------------------------------------------------------------------------------------

/// Reverses an array of fixed-width records in place by pairwise slot swaps.
///
/// `buf.len()` must be a multiple of `stride`.
pub(crate) fn reverse_records(buf: &mut [u8], stride: usize) {
    debug_assert!(stride > 0 && buf.len() % stride == 0);
    let count = buf.len() / stride;
    if count < 2 {
        return;
    }
    let mut i = 0;
    let mut j = count - 1;
    while i < j {
        let (head, tail) = buf.split_at_mut(j * stride);
        head[i * stride..(i + 1) * stride].swap_with_slice(&mut tail[..stride]);
        i += 1;
        j -= 1;
    }
}

/// Rewrites the placeholder physical offsets into the gapless packing:
/// entry 0 starts at physical offset 0, each subsequent entry starts where
/// the previous one ends. Returns the total number of live bytes.
pub(crate) fn assign_physical_offsets(buf: &mut [u8]) -> u64 {
    debug_assert_eq!(buf.len() % ENTRY_SIZE, 0);
    let mut physical = 0u64;
    for raw in buf.chunks_exact_mut(ENTRY_SIZE) {
        let mut entry = decode_entry(raw);
        entry.physical_offset = physical;
        physical += entry.length;
        encode_entry(&entry, raw);
    }
    physical
}

// ------------------------------------------------------------------------------------------------
// MappingBuilder
// ------------------------------------------------------------------------------------------------

/// Builds an immutable [`MappingFile`] from a strictly decreasing live-range
/// enumeration. See the [module documentation](self) for the full pipeline.
pub struct MappingBuilder;

impl MappingBuilder {
    /// Builds a mapping file at `path` from `ranges`.
    ///
    /// Equivalent to [`MappingBuilder::build_with_progress`] with a no-op
    /// callback.
    pub fn build<I>(ranges: I, path: impl AsRef<Path>) -> Result<MappingFile, MappingError>
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        Self::build_with_progress(ranges, path, |_| {})
    }

    /// Builds a mapping file at `path` from `ranges`, reporting progress
    /// after every flushed entry.
    ///
    /// `ranges` must yield `(virtual_offset, length)` pairs in strictly
    /// decreasing offset order. Zero-length ranges are skipped. An empty
    /// enumeration yields a valid empty mapping — every offset is a hole.
    ///
    /// # Errors
    ///
    /// - [`MappingError::InvalidRangeOrder`] if the enumeration is not
    ///   strictly decreasing. The contract violation is reported, never
    ///   repaired; the partially written file is left for the caller's GC
    ///   pass to discard.
    /// - [`MappingError::GcForbiddenOnPlatform`] on sub-64-bit platforms.
    pub fn build_with_progress<I, F>(
        ranges: I,
        path: impl AsRef<Path>,
        mut progress: F,
    ) -> Result<MappingFile, MappingError>
    where
        I: IntoIterator<Item = (u64, u64)>,
        F: FnMut(BuildProgress),
    {
        check_platform()?;

        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(&file);

        // Phase 1: stream-collapse into placeholder records, decreasing order.
        let mut current: Option<(u64, u64)> = None;
        let mut count: u64 = 0;
        let mut live_bytes: u64 = 0;

        for (offset, length) in ranges {
            if length == 0 {
                continue;
            }
            match current {
                None => current = Some((offset, length)),
                Some((open_offset, open_length)) => {
                    if offset >= open_offset {
                        return Err(MappingError::InvalidRangeOrder {
                            offset,
                            previous: open_offset,
                        });
                    }
                    let incoming_end = offset + length;
                    if incoming_end >= open_offset {
                        // Touching or overlapping: extend the open entry downward.
                        let open_end = open_offset + open_length;
                        current = Some((offset, open_end.max(incoming_end) - offset));
                    } else {
                        Self::flush_placeholder(&mut writer, open_offset, open_length)?;
                        count += 1;
                        live_bytes += open_length;
                        progress(BuildProgress {
                            entries: count,
                            live_bytes,
                        });
                        current = Some((offset, length));
                    }
                }
            }
        }

        if let Some((open_offset, open_length)) = current {
            Self::flush_placeholder(&mut writer, open_offset, open_length)?;
            count += 1;
            live_bytes += open_length;
            progress(BuildProgress {
                entries: count,
                live_bytes,
            });
        }

        writer.flush()?;
        drop(writer);

        // Phases 2 + 3: in-place reversal and physical repacking over a
        // mutable map of the file we just wrote.
        if count > 0 {
            let mut mmap = unsafe { MmapMut::map_mut(&file)? };
            reverse_records(&mut mmap, ENTRY_SIZE);
            let packed = assign_physical_offsets(&mut mmap);
            debug_assert_eq!(packed, live_bytes);
            mmap.flush()?;
        }

        // Phase 4: make the file durable before anyone maps it read-only.
        file.sync_all()?;
        drop(file);

        if count == 0 {
            debug!(path = %path.display(), "built empty mapping (everything is a hole)");
        } else {
            info!(
                path = %path.display(),
                entries = count,
                live_bytes,
                "mapping file built"
            );
        }

        MappingFile::open(path)
    }

    /// Appends one placeholder record (physical offset 0) to the writer.
    fn flush_placeholder(
        writer: &mut impl Write,
        virtual_offset: u64,
        length: u64,
    ) -> Result<(), MappingError> {
        let mut raw = [0u8; ENTRY_SIZE];
        encode_entry(
            &MappingEntry {
                virtual_offset,
                physical_offset: 0,
                length,
            },
            &mut raw,
        );
        writer.write_all(&raw)?;
        Ok(())
    }
}
