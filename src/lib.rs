//! # packstore
//!
//! The on-disk storage layer of a content-addressed, append-mostly object
//! store: a stable **virtual-offset** address space served by per-generation
//! file pairs, with space-reclaiming garbage collection that repacks live
//! bytes into a smaller file without invalidating any offset a caller holds.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use packstore::{Pack, PackOptions};
//!
//! let mut pack = Pack::open("/tmp/my_pack", PackOptions::default()).unwrap();
//!
//! // Append — the returned virtual offset stays valid across GC passes.
//! let off = pack.append(b"hello world").unwrap();
//!
//! // Read back by virtual offset.
//! let mut buf = [0u8; 11];
//! pack.read(off, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello world");
//!
//! // Reclaim space, keeping only the ranges the caller declares live
//! // (strictly decreasing offset order).
//! pack.gc([(off, 11)]).unwrap();
//!
//! // Graceful shutdown.
//! pack.close().unwrap();
//! ```
//!
//! ## Architecture
//!
//! Each **generation** is a trio of files sharing a number:
//!
//! - a **mapping file** — an mmap'd, binary-searchable array of
//!   `(virtual, physical, length)` entries ([`mapping`]);
//! - a **prefix file** — the compacted live bytes those entries index,
//!   read through the virtual-offset view of a [`SparseFile`];
//! - a **suffix file** — the append-only log of bytes written since the
//!   generation was built ([`Suffix`]).
//!
//! A single atomic [`Control`] record names the current generation; flipping
//! it is the crash-consistent commit point of every GC pass and the only
//! moment old files become garbage.
//!
//! ## Features
//!
//! - **Stable addresses** — GC never moves a virtual offset, only the
//!   physical bytes behind it.
//! - **Crash-safe switches** — a crash mid-GC leaves either the old or the
//!   new generation fully intact, never a mix.
//! - **Pinned readers** — readers keep serving their generation after a
//!   switch and hop forward with [`Pack::resync`].
//! - **CRC32 integrity** — suffix headers and the control record are
//!   checksummed and verified on every open.
//! - **O(1)-memory builds** — the mapping builder reverses and repacks
//!   gigabyte-scale entry arrays in place over an mmap.

pub mod control;
pub mod mapping;
pub mod pack;
pub mod sparse;
pub mod suffix;

pub use control::{Control, ControlError};
pub use mapping::{BuildProgress, MappingBuilder, MappingEntry, MappingError, MappingFile};
pub use pack::{FORMAT_VERSION, OpenMode, Pack, PackError, PackOptions};
pub use sparse::{SparseError, SparseFile};
pub use suffix::{Suffix, SuffixError};
