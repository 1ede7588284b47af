//! SquashFS 4.0 Filesystem Image Writer
//!
//! Builds read-only root file system images mountable by an unmodified
//! kernel: zlib-compressed data blocks, uncompressed metadata chunks,
//! inode and directory tables, and a single-entry id table.
//!
//! # Overview
//!
//! This crate intentionally implements a subset of SquashFS. Notably,
//! fragments, xattrs, NFS export tables, block/character devices,
//! FIFOs and sockets are not supported, and metadata is written
//! uncompressed.
//!
//! Directory entries must be added in sorted order; the writer does
//! not re-sort them.
//!
//! # Architecture
//!
//! File data streams to the sink as it is written, starting right
//! after the superblock. Inode and directory records accumulate in
//! memory; `flush` slices them into length-prefixed metadata chunks,
//! appends the id table, pads the image to a page boundary and
//! rewrites the superblock.
//!
//! # Usage
//!
//! ```no_run
//! use std::io::Write;
//! use std::time::SystemTime;
//!
//! let now = SystemTime::now();
//! let sink = std::fs::File::create("root.squashfs")?;
//! let mut w = squashfs::Writer::new(sink, now)?;
//! let etc = w.directory(w.root(), "etc", now);
//! let mut f = w.file(etc, "hostname", now, 0o444)?;
//! f.write_all(b"appliance\n")?;
//! f.close()?;
//! w.flush_directory(etc)?;
//! w.flush_directory(w.root())?;
//! w.flush()?;
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod types;
pub mod writer;

pub use writer::{DirectoryId, FileWriter, Writer};
