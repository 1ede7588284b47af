//! FAT16B Filesystem Image Writer
//!
//! Builds mountable FAT16B boot-partition images for small single-board
//! computers, plus a minimal reader that returns the byte extents of
//! contained files.
//!
//! # Overview
//!
//! Images use a sector size of 512 bytes and a cluster size of 4 sectors,
//! which limits them to roughly 127 MB. This crate provides:
//! - Incremental image construction from `(path, mtime, bytes)` records
//! - Short (8.3) and long (UCS-2) filename directory entries
//! - Cluster chaining via a single File Allocation Table copy
//! - Extent and modification-time lookup on images produced by the writer
//!
//! # Architecture
//!
//! Because the position of the data area depends on the size of the FAT
//! and the number of root directory entries, file data is staged in a
//! private scratch file; `flush` emits the boot sector, FAT and root
//! directory, then appends the staged data.
//!
//! # Usage
//!
//! ```no_run
//! use fat::{Writer, DosDateTime};
//! use std::io::Write;
//!
//! let sink = std::fs::File::create("boot.fat")?;
//! let mut fw = Writer::new(sink)?;
//! let mut f = fw.file("/etc/resolv.conf", DosDateTime::from_unix(1693468800))?;
//! f.write_all(b"nameserver 8.8.8.8")?;
//! f.close()?;
//! let total_sectors = fw.flush()?;
//! # let _ = total_sectors;
//! # Ok::<(), fat::Error>(())
//! ```

pub mod datetime;
pub mod error;
pub mod names;
pub mod reader;
pub mod types;
pub mod writer;

pub use datetime::DosDateTime;
pub use error::{Error, Result};
pub use reader::Reader;
pub use writer::{FileWriter, Writer};
