//! SquashFS image writer
//!
//! File data is written to the sink streaming; inode and directory
//! records accumulate in memory until `flush`. Directories form an
//! arena owned by the writer and are referred to by [`DirectoryId`]
//! handles; a child's `ParentInode` field is backpatched when the
//! parent flushes, since the parent's inode number is not known
//! earlier.

use std::collections::HashMap;
use std::io::{self, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;

use crate::types::{
    block_log, filesystem_flags, InodeHeader, Superblock, DATA_BLOCK_SIZE, DIR_TYPE, FILE_TYPE,
    INVALID_FRAGMENT, INVALID_XATTR, LDIR_TYPE, MAJOR_VERSION, METADATA_BLOCK_SIZE, MINOR_VERSION,
    MODE_RX, SYMLINK_TYPE, UNCOMPRESSED_DATA_BLOCK, UNCOMPRESSED_METADATA, ZLIB_COMPRESSION,
};

/// Byte offset of the `ParentInode` field within both the basic and
/// the extended directory inode layouts.
const PARENT_INODE_FIELD: usize = 28;

/// Handle to a directory in the writer's arena. Index 0 is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryId(usize);

struct FullDirEntry {
    start_block: u32,
    offset: u16,
    inode_number: u32,
    entry_type: u16,
    name: String,
}

struct DirNode {
    name: String,
    mtime: i32,
    parent: Option<usize>,

    /// Accumulated child entries, appended by the caller in sorted
    /// order.
    entries: Vec<FullDirEntry>,

    /// Inode-buffer offsets of children's `ParentInode` fields,
    /// patched with this directory's inode number when it flushes.
    parent_patches: Vec<usize>,
}

/// Writes a SquashFS file system image to the sink once `flush` is
/// called.
///
/// Create files and directories through the methods taking a
/// [`DirectoryId`]; every directory, root included, must be flushed
/// with [`Writer::flush_directory`] exactly once, children before
/// parents, before the final [`Writer::flush`].
pub struct Writer<W: Write + Seek> {
    sink: W,
    sb: Superblock,
    inode_buf: Vec<u8>,
    dir_buf: Vec<u8>,
    dirs: Vec<DirNode>,
}

/// Seconds since the Unix epoch as stored on disk; pre-epoch
/// timestamps clamp to 0.
fn unix_secs(t: SystemTime) -> i32 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i32)
        .unwrap_or(0)
}

impl<W: Write + Seek> Writer<W> {
    /// Create a writer targeting `sink`. Seeks past the superblock,
    /// which is filled in by `flush`.
    pub fn new(mut sink: W, mkfs_time: SystemTime) -> io::Result<Self> {
        sink.seek(SeekFrom::Start(96))?;
        Ok(Writer {
            sink,
            sb: Superblock {
                inodes: 0,
                mkfs_time: unix_secs(mkfs_time),
                block_size: DATA_BLOCK_SIZE as u32,
                fragments: 0,
                compression: ZLIB_COMPRESSION,
                block_log: block_log(DATA_BLOCK_SIZE as u32),
                flags: filesystem_flags(),
                no_ids: 1, // one uid/gid mapping, root
                major: MAJOR_VERSION,
                minor: MINOR_VERSION,
                root_inode: 0,
                bytes_used: 0,
                id_table_start: 0,
                xattr_id_table_start: -1, // not present
                inode_table_start: 0,
                directory_table_start: 0,
                fragment_table_start: 0,
                lookup_table_start: -1, // not present
            },
            inode_buf: Vec::new(),
            dir_buf: Vec::new(),
            dirs: vec![DirNode {
                name: String::new(),
                mtime: unix_secs(mkfs_time),
                parent: None,
                entries: Vec::new(),
                parent_patches: Vec::new(),
            }],
        })
    }

    /// The file system root
    pub fn root(&self) -> DirectoryId {
        DirectoryId(0)
    }

    /// Create a directory under `parent` with the given name and
    /// timestamp. Nothing is emitted until the directory flushes.
    pub fn directory(&mut self, parent: DirectoryId, name: &str, mtime: SystemTime) -> DirectoryId {
        let id = self.dirs.len();
        self.dirs.push(DirNode {
            name: name.to_string(),
            mtime: unix_secs(mtime),
            parent: Some(parent.0),
            entries: Vec::new(),
            parent_patches: Vec::new(),
        });
        DirectoryId(id)
    }

    /// Begin a file under `parent`. The returned writer streams data
    /// blocks to the sink and must be closed.
    pub fn file(
        &mut self,
        parent: DirectoryId,
        name: &str,
        mtime: SystemTime,
        mode: u16,
    ) -> io::Result<FileWriter<'_, W>> {
        let start = self.sink.stream_position()?;
        Ok(FileWriter {
            mtime: unix_secs(mtime),
            w: self,
            dir: parent,
            name: name.to_string(),
            mode,
            start,
            size: 0,
            buf: Vec::new(),
            comp_buf: Vec::with_capacity(DATA_BLOCK_SIZE),
            blocksizes: Vec::new(),
        })
    }

    /// Create a symbolic link named `name` under `parent` pointing at
    /// `target`.
    pub fn symlink(
        &mut self,
        parent: DirectoryId,
        target: &str,
        name: &str,
        mtime: SystemTime,
        mode: u16,
    ) -> io::Result<()> {
        let start_block = self.inode_buf.len() / METADATA_BLOCK_SIZE;
        let offset = self.inode_buf.len() - start_block * METADATA_BLOCK_SIZE;

        InodeHeader {
            inode_type: SYMLINK_TYPE,
            mode,
            uid: 0,
            gid: 0,
            mtime: unix_secs(mtime),
            inode_number: self.sb.inodes + 1,
        }
        .write_to(&mut self.inode_buf)?;
        self.inode_buf.write_u32::<LittleEndian>(1)?; // nlink
        self.inode_buf
            .write_u32::<LittleEndian>(target.len() as u32)?;
        self.inode_buf.extend_from_slice(target.as_bytes());

        self.dirs[parent.0].entries.push(FullDirEntry {
            start_block: start_block as u32,
            offset: offset as u16,
            inode_number: self.sb.inodes + 1,
            entry_type: SYMLINK_TYPE,
            name: name.to_string(),
        });
        self.sb.inodes += 1;
        Ok(())
    }

    /// Emit the directory's accumulated entries into the directory
    /// table and its inode into the inode table, patch children's
    /// parent references, and register the directory with its parent.
    pub fn flush_directory(&mut self, dir: DirectoryId) -> io::Result<()> {
        let entries = std::mem::take(&mut self.dirs[dir.0].entries);

        let mut count_by_start_block: HashMap<u32, u32> = HashMap::new();
        for de in &entries {
            *count_by_start_block.entry(de.start_block).or_insert(0) += 1;
        }

        let dir_buf_start_block = self.dir_buf.len() / METADATA_BLOCK_SIZE;
        let dir_buf_offset = self.dir_buf.len();

        let mut current_block = -1i64;
        let mut current_inode = 0u32;
        let mut subdirs = 0u32;
        for de in &entries {
            if de.entry_type == DIR_TYPE {
                subdirs += 1;
            }
            if de.start_block as i64 != current_block {
                // One header per run of entries whose inodes share a
                // metadata chunk; entry inode numbers are deltas from
                // the first of the run.
                self.dir_buf
                    .write_u32::<LittleEndian>(count_by_start_block[&de.start_block] - 1)?;
                self.dir_buf
                    .write_u32::<LittleEndian>(de.start_block * (METADATA_BLOCK_SIZE as u32 + 2))?;
                self.dir_buf.write_u32::<LittleEndian>(de.inode_number)?;
                current_block = de.start_block as i64;
                current_inode = de.inode_number;
            }
            self.dir_buf.write_u16::<LittleEndian>(de.offset)?;
            self.dir_buf
                .write_i16::<LittleEndian>((de.inode_number as i64 - current_inode as i64) as i16)?;
            self.dir_buf.write_u16::<LittleEndian>(de.entry_type)?;
            self.dir_buf
                .write_u16::<LittleEndian>(de.name.len() as u16 - 1)?;
            self.dir_buf.extend_from_slice(de.name.as_bytes());
        }

        let start_block = self.inode_buf.len() / METADATA_BLOCK_SIZE;
        let offset = self.inode_buf.len() - start_block * METADATA_BLOCK_SIZE;
        let inode_buf_offset = self.inode_buf.len();

        let dir_bytes = self.dir_buf.len() - dir_buf_offset;
        let inode_number = self.sb.inodes + 1;
        let node_mtime = self.dirs[dir.0].mtime;

        let header = InodeHeader {
            inode_type: if entries.len() > 256 || dir_bytes > METADATA_BLOCK_SIZE {
                LDIR_TYPE
            } else {
                DIR_TYPE
            },
            mode: MODE_RX,
            uid: 0,
            gid: 0,
            mtime: node_mtime,
            inode_number,
        };
        if header.inode_type == LDIR_TYPE {
            header.write_to(&mut self.inode_buf)?;
            self.inode_buf.write_u32::<LittleEndian>(subdirs + 2 - 1)?; // + 2 for . and ..
            self.inode_buf
                .write_u32::<LittleEndian>(dir_bytes as u32 + 3)?;
            self.inode_buf.write_u32::<LittleEndian>(
                (dir_buf_start_block * (METADATA_BLOCK_SIZE + 2)) as u32,
            )?;
            self.inode_buf.write_u32::<LittleEndian>(self.sb.inodes + 2)?; // patched by the parent
            self.inode_buf.write_u16::<LittleEndian>(0)?; // no directory index
            self.inode_buf.write_u16::<LittleEndian>(
                (dir_buf_offset - dir_buf_start_block * METADATA_BLOCK_SIZE) as u16,
            )?;
            self.inode_buf.write_u32::<LittleEndian>(INVALID_XATTR)?;
        } else {
            header.write_to(&mut self.inode_buf)?;
            self.inode_buf.write_u32::<LittleEndian>(
                (dir_buf_start_block * (METADATA_BLOCK_SIZE + 2)) as u32,
            )?;
            self.inode_buf.write_u32::<LittleEndian>(subdirs + 2 - 1)?; // + 2 for . and ..
            self.inode_buf
                .write_u16::<LittleEndian>(dir_bytes as u16 + 3)?;
            self.inode_buf.write_u16::<LittleEndian>(
                (dir_buf_offset - dir_buf_start_block * METADATA_BLOCK_SIZE) as u16,
            )?;
            self.inode_buf.write_u32::<LittleEndian>(self.sb.inodes + 2)?; // patched by the parent
        }

        for patch in std::mem::take(&mut self.dirs[dir.0].parent_patches) {
            self.inode_buf[patch..patch + 4].copy_from_slice(&inode_number.to_le_bytes());
        }

        match self.dirs[dir.0].parent {
            Some(parent) => {
                self.dirs[parent]
                    .parent_patches
                    .push(inode_buf_offset + PARENT_INODE_FIELD);
                let name = self.dirs[dir.0].name.clone();
                self.dirs[parent].entries.push(FullDirEntry {
                    start_block: start_block as u32,
                    offset: offset as u16,
                    inode_number,
                    entry_type: DIR_TYPE,
                    name,
                });
            }
            None => {
                self.sb.root_inode =
                    (((start_block * (METADATA_BLOCK_SIZE + 2)) as i64) << 16) | offset as i64;
            }
        }

        self.sb.inodes += 1;
        Ok(())
    }

    /// Copy `buf` to the sink in metadata chunks of up to 8192 bytes,
    /// each prefixed with a little-endian length carrying the
    /// uncompressed bit.
    fn write_metadata_chunks(&mut self, buf: &[u8]) -> io::Result<()> {
        for chunk in buf.chunks(METADATA_BLOCK_SIZE) {
            self.sink
                .write_u16::<LittleEndian>(chunk.len() as u16 | UNCOMPRESSED_METADATA)?;
            self.sink.write_all(chunk)?;
        }
        Ok(())
    }

    /// One metadata chunk holding the id list, followed by the index
    /// pointing at it. Returns the index position.
    fn write_id_table(&mut self, ids: &[u32]) -> io::Result<i64> {
        let meta_off = self.sink.stream_position()?;
        self.sink
            .write_u16::<LittleEndian>((ids.len() * 4) as u16 | UNCOMPRESSED_METADATA)?;
        for &id in ids {
            self.sink.write_u32::<LittleEndian>(id)?;
        }
        let off = self.sink.stream_position()?;
        self.sink.write_i64::<LittleEndian>(meta_off as i64)?;
        Ok(off as i64)
    }

    /// Write the inode, directory and id tables, pad the image to a
    /// page boundary and rewrite the superblock. Consumes the writer.
    ///
    /// Every directory, root last, must have been flushed first.
    pub fn flush(mut self) -> io::Result<()> {
        let inode_buf = std::mem::take(&mut self.inode_buf);
        self.sb.inode_table_start = self.sink.stream_position()? as i64;
        self.write_metadata_chunks(&inode_buf)?;

        let dir_buf = std::mem::take(&mut self.dir_buf);
        self.sb.directory_table_start = self.sink.stream_position()? as i64;
        self.write_metadata_chunks(&dir_buf)?;

        // No fragments; the table is empty but its position is still
        // recorded.
        self.sb.fragment_table_start = self.sink.stream_position()? as i64;

        // Everything is owned by root.
        self.sb.id_table_start = self.write_id_table(&[0])?;

        let off = self.sink.stream_position()?;
        self.sb.bytes_used = off as i64;

        debug!(
            "flushing squashfs: {} inodes, inode table at {}, directory table at {}, {} bytes used",
            self.sb.inodes, self.sb.inode_table_start, self.sb.directory_table_start, off
        );

        // Pad to 4096 so the kernel can access all pages.
        if off % 4096 > 0 {
            let padding = vec![0u8; 4096 - (off % 4096) as usize];
            self.sink.write_all(&padding)?;
        }

        self.sink.seek(SeekFrom::Start(0))?;
        self.sb.write_to(&mut self.sink)?;
        self.sink.flush()
    }
}

/// Streams one file's contents into the image as compressed data
/// blocks.
///
/// Returned by [`Writer::file`]; must be closed with
/// [`FileWriter::close`] to emit the file's inode and directory entry.
pub struct FileWriter<'a, W: Write + Seek> {
    w: &'a mut Writer<W>,
    dir: DirectoryId,
    name: String,
    mtime: i32,
    mode: u16,

    /// Byte offset of the file's first data block in the image
    start: u64,
    size: u32,

    /// Accumulates up to one data block of input
    buf: Vec<u8>,

    /// Reused zlib output buffer
    comp_buf: Vec<u8>,

    /// Per-block on-disk sizes, raw blocks flagged with bit 24
    blocksizes: Vec<u32>,
}

impl<W: Write + Seek> FileWriter<'_, W> {
    fn write_block(&mut self) -> io::Result<()> {
        let n = self.buf.len().min(DATA_BLOCK_SIZE);

        self.comp_buf.clear();
        let mut encoder = ZlibEncoder::new(&mut self.comp_buf, Compression::fast());
        encoder.write_all(&self.buf[..n])?;
        encoder.finish()?;

        // The kernel returns I/O errors for compressed blocks larger
        // than their uncompressed data, so store those raw.
        let size = if self.comp_buf.len() >= n {
            self.w.sink.write_all(&self.buf[..n])?;
            n as u32 | UNCOMPRESSED_DATA_BLOCK
        } else {
            self.w.sink.write_all(&self.comp_buf)?;
            self.comp_buf.len() as u32
        };
        self.blocksizes.push(size);
        self.buf.drain(..n);
        Ok(())
    }

    /// Emit any remaining partial block, the file's inode and its
    /// directory entry.
    pub fn close(mut self) -> io::Result<()> {
        while !self.buf.is_empty() {
            self.write_block()?;
        }

        let w = self.w;
        let start_block = w.inode_buf.len() / METADATA_BLOCK_SIZE;
        let offset = w.inode_buf.len() - start_block * METADATA_BLOCK_SIZE;

        InodeHeader {
            inode_type: FILE_TYPE,
            mode: self.mode,
            uid: 0,
            gid: 0,
            mtime: self.mtime,
            inode_number: w.sb.inodes + 1,
        }
        .write_to(&mut w.inode_buf)?;
        w.inode_buf.write_u32::<LittleEndian>(self.start as u32)?;
        w.inode_buf.write_u32::<LittleEndian>(INVALID_FRAGMENT)?;
        w.inode_buf.write_u32::<LittleEndian>(0)?; // block offset
        w.inode_buf.write_u32::<LittleEndian>(self.size)?;
        for &size in &self.blocksizes {
            w.inode_buf.write_u32::<LittleEndian>(size)?;
        }

        w.dirs[self.dir.0].entries.push(FullDirEntry {
            start_block: start_block as u32,
            offset: offset as u16,
            inode_number: w.sb.inodes + 1,
            entry_type: FILE_TYPE,
            name: self.name,
        });
        w.sb.inodes += 1;
        Ok(())
    }
}

impl<W: Write + Seek> Write for FileWriter<'_, W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(p);
        self.size += p.len() as u32;
        while self.buf.len() >= DATA_BLOCK_SIZE {
            self.write_block()?;
        }
        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.w.sink.flush()
    }
}
