//! FAT16B image writer
//!
//! The writer builds the directory tree in memory while streaming file
//! contents to a scratch file. `flush` lays the image out once the FAT
//! size and root directory size are known: boot sector, FAT, root
//! directory, then the staged data area.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;

use crate::datetime::DosDateTime;
use crate::error::{Error, Result};
use crate::names;
use crate::types::{
    full_clusters, full_sectors, ATTR_DIRECTORY, ATTR_READ_ONLY, CLEAN, CLUSTER_SIZE,
    DIR_ENTRY_SIZE, END_OF_CHAIN, ENTRIES_PER_SECTOR, HARD_DISK, MIN_FAT16_ENTRIES, SECTOR_SIZE,
    SECTORS_PER_CLUSTER,
};

#[derive(Debug, Clone, Copy)]
enum Child {
    Dir(usize),
    File(usize),
}

struct DirNode {
    name: String,
    mtime: DosDateTime,
    parent: Option<usize>,
    children: Vec<Child>,
    by_name: HashMap<String, Child>,
    first_cluster: u16,
}

impl DirNode {
    fn new(name: String, mtime: DosDateTime, parent: Option<usize>) -> Self {
        DirNode {
            name,
            mtime,
            parent,
            children: Vec::new(),
            by_name: HashMap::new(),
            first_cluster: 0,
        }
    }
}

struct FileNode {
    name: String,
    mtime: DosDateTime,
    first_cluster: u16,
    size: u32,
}

struct PendingFile {
    file: usize,
    count: u64,
}

/// Writes a FAT16B file system image to the sink once `flush` is
/// called.
///
/// Because the position of the data area in the resulting image depends
/// on the size of the file allocation table and the number of root
/// directory entries, file data is staged in a scratch file until
/// `flush` is called. The scratch file is unnamed and disappears with
/// the writer, flushed or not.
pub struct Writer<W: Write> {
    sink: W,

    /// Staging area for file and subdirectory contents.
    scratch: File,

    /// One entry per data cluster, pointing to the index of the next
    /// cluster in the chain or `END_OF_CHAIN`. Entries 0 and 1 carry
    /// the media descriptor and file system state.
    fat: Vec<u16>,

    /// Directory arena; index 0 is the root.
    dirs: Vec<DirNode>,
    files: Vec<FileNode>,

    /// The file currently being streamed, drained by the next public
    /// operation.
    pending: Option<PendingFile>,
}

impl<W: Write> Writer<W> {
    /// Create a writer targeting `sink`. Allocates the scratch file.
    pub fn new(sink: W) -> Result<Self> {
        Ok(Writer {
            sink,
            scratch: tempfile::tempfile()?,
            fat: vec![0xFF00 | HARD_DISK as u16, CLEAN],
            dirs: vec![DirNode::new(String::new(), DosDateTime::EPOCH, None)],
            files: Vec::new(),
            pending: None,
        })
    }

    /// Index of the next data cluster to be allocated. Entries 0 and 1
    /// are reserved, so this is simply the current table length.
    fn current_cluster(&self) -> u16 {
        self.fat.len() as u16
    }

    /// Walk `path`, creating missing directories with `mtime`. Returns
    /// the arena index of the final component.
    fn dir(&mut self, path: &str, mtime: DosDateTime) -> Result<usize> {
        let mut cur = 0usize;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            cur = match self.dirs[cur].by_name.get(component).copied() {
                Some(Child::Dir(ix)) => ix,
                Some(Child::File(_)) => {
                    return Err(Error::InvalidPath {
                        path: path.to_string(),
                        component: component.to_string(),
                    })
                }
                None => {
                    let ix = self.dirs.len();
                    self.dirs
                        .push(DirNode::new(component.to_string(), mtime, Some(cur)));
                    self.dirs[cur].children.push(Child::Dir(ix));
                    self.dirs[cur]
                        .by_name
                        .insert(component.to_string(), Child::Dir(ix));
                    ix
                }
            };
        }
        Ok(cur)
    }

    /// Create an empty directory with the given full path, e.g.
    /// `mkdir("usr/share/lib")`. Missing intermediate components are
    /// created with the same timestamp.
    pub fn mkdir(&mut self, path: &str, mtime: DosDateTime) -> Result<()> {
        self.finish_pending()?;
        let d = self.dir(path, mtime)?;
        self.dirs[d].mtime = mtime;
        Ok(())
    }

    /// Begin a file with the specified path and timestamp. The returned
    /// writer stays valid until the next call to `file`, `mkdir` or
    /// `flush`; dropping it without `close` leaves finalization to the
    /// next of those calls.
    pub fn file(&mut self, path: &str, mtime: DosDateTime) -> Result<FileWriter<'_, W>> {
        self.finish_pending()?;

        let trimmed = path.trim_end_matches('/');
        let (dir_part, base) = match trimmed.rfind('/') {
            Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
            None => ("", trimmed),
        };
        if base.is_empty() {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                component: String::new(),
            });
        }

        let d = self.dir(dir_part, DosDateTime::EPOCH)?;
        let ix = self.files.len();
        self.files.push(FileNode {
            name: base.to_string(),
            mtime,
            first_cluster: self.current_cluster(),
            size: 0,
        });
        self.dirs[d].children.push(Child::File(ix));
        self.dirs[d].by_name.insert(base.to_string(), Child::File(ix));
        self.pending = Some(PendingFile { file: ix, count: 0 });
        Ok(FileWriter { w: self })
    }

    fn write_pending(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.scratch.write(buf)?;
        if let Some(p) = self.pending.as_mut() {
            p.count += n as u64;
        }
        Ok(n)
    }

    /// Pad the pending file to the next cluster boundary, record its
    /// cluster chain in the FAT and store its final size.
    fn finish_pending(&mut self) -> Result<()> {
        let Some(p) = self.pending.take() else {
            return Ok(());
        };
        let padded = self.pad_scratch_to_cluster(p.count as usize)?;
        let clusters = padded / CLUSTER_SIZE;
        self.append_chain(clusters);
        if clusters == 0 {
            // An empty file owns no cluster; anything else would alias
            // the next allocation.
            self.files[p.file].first_cluster = 0;
        }
        self.files[p.file].size = p.count as u32;
        Ok(())
    }

    /// Zero-fill the scratch file from `count` up to the next cluster
    /// boundary; returns the padded length.
    fn pad_scratch_to_cluster(&mut self, count: usize) -> Result<usize> {
        let remainder = count % CLUSTER_SIZE;
        if remainder == 0 {
            return Ok(count);
        }
        let pad = CLUSTER_SIZE - remainder;
        self.scratch.write_all(&vec![0u8; pad])?;
        Ok(count + pad)
    }

    /// Append a chain of `clusters` FAT entries, each pointing at the
    /// next, the last marked end-of-chain.
    fn append_chain(&mut self, clusters: usize) {
        for _ in 0..clusters {
            let next = self.current_cluster() + 1;
            self.fat.push(next);
        }
        if clusters > 0 {
            let last = self.fat.len() - 1;
            self.fat[last] = END_OF_CHAIN;
        }
    }

    /// Collect subdirectory indexes in the order their contents are
    /// staged: parents before children, siblings in creation order.
    fn collect_subdirs(&self, d: usize, out: &mut Vec<usize>) {
        for &child in &self.dirs[d].children {
            if let Child::Dir(ix) = child {
                out.push(ix);
                self.collect_subdirs(ix, out);
            }
        }
    }

    /// Serialized size in bytes of the directory's entry listing,
    /// including long-name entries and the `.`/`..` pair.
    fn listing_size(&self, d: usize) -> usize {
        let mut entries = 0;
        if self.dirs[d].parent.is_some() {
            entries += 2 * (1 + names::long_entry_count("."));
        }
        for &child in &self.dirs[d].children {
            let name = match child {
                Child::Dir(ix) => &self.dirs[ix].name,
                Child::File(ix) => &self.files[ix].name,
            };
            entries += 1 + names::long_entry_count(name);
        }
        entries * DIR_ENTRY_SIZE
    }

    /// Serialize the directory's entries: for each entry the long-name
    /// sequence followed by the short entry.
    fn serialize_dir(&self, d: usize) -> Result<Vec<u8>> {
        struct Entry<'a> {
            name: &'a str,
            attr: u8,
            first_cluster: u16,
            size: u32,
            mtime: DosDateTime,
        }

        let node = &self.dirs[d];
        let mut all = Vec::with_capacity(node.children.len() + 2);
        if let Some(parent) = node.parent {
            all.push(Entry {
                name: ".",
                attr: ATTR_DIRECTORY,
                first_cluster: node.first_cluster,
                size: 0,
                mtime: DosDateTime::EPOCH,
            });
            all.push(Entry {
                name: "..",
                attr: ATTR_DIRECTORY,
                first_cluster: self.dirs[parent].first_cluster,
                size: 0,
                mtime: DosDateTime::EPOCH,
            });
        }
        for &child in &node.children {
            all.push(match child {
                Child::Dir(ix) => Entry {
                    name: &self.dirs[ix].name,
                    attr: ATTR_DIRECTORY,
                    first_cluster: self.dirs[ix].first_cluster,
                    size: 0,
                    mtime: self.dirs[ix].mtime,
                },
                Child::File(ix) => Entry {
                    name: &self.files[ix].name,
                    attr: ATTR_READ_ONLY,
                    first_cluster: self.files[ix].first_cluster,
                    size: self.files[ix].size,
                    mtime: self.files[ix].mtime,
                },
            });
        }

        let mut buf = Vec::with_capacity(self.listing_size(d));
        let mut seen = HashSet::new();
        for entry in &all {
            let (primary, ext) = names::short_name(entry.name, &mut seen);
            let sum = names::checksum(&primary, &ext);
            for long_entry in names::long_name_entries(entry.name, sum) {
                buf.extend_from_slice(&long_entry);
            }

            buf.extend_from_slice(&primary);
            buf.extend_from_slice(&ext);
            buf.push(entry.attr);
            buf.extend_from_slice(&[0u8; 10]);
            buf.write_u16::<LittleEndian>(entry.mtime.time_word())?;
            buf.write_u16::<LittleEndian>(entry.mtime.date_word())?;
            buf.write_u16::<LittleEndian>(entry.first_cluster)?;
            buf.write_u32::<LittleEndian>(entry.size)?;
        }
        Ok(buf)
    }

    /// Stage a directory listing: append to the scratch file padded to
    /// a cluster boundary, recording the cluster chain.
    fn stage_listing(&mut self, buf: &[u8]) -> Result<()> {
        self.scratch.write_all(buf)?;
        let padded = self.pad_scratch_to_cluster(buf.len())?;
        self.append_chain(padded / CLUSTER_SIZE);
        Ok(())
    }

    fn boot_sector(
        &self,
        reserved_sectors: usize,
        fat_sectors: usize,
        root_dir_entries: usize,
        total_sectors: usize,
    ) -> Result<Vec<u8>> {
        let mut b = Vec::with_capacity(SECTOR_SIZE as usize);
        b.extend_from_slice(&[0xEB, 0x3C, 0x90]); // x86 jump instruction
        b.extend_from_slice(b"gokrazy!"); // OEM
        b.write_u16::<LittleEndian>(SECTOR_SIZE)?;
        b.push(SECTORS_PER_CLUSTER);
        b.write_u16::<LittleEndian>(reserved_sectors as u16)?;
        b.push(1); // one copy of the FAT
        b.write_u16::<LittleEndian>(root_dir_entries as u16)?;
        b.write_u16::<LittleEndian>(0)?; // use the 32-bit sector count below
        b.push(HARD_DISK);
        b.write_u16::<LittleEndian>(fat_sectors as u16)?;
        b.write_u16::<LittleEndian>(32)?; // sectors per track (boot code only)
        b.write_u16::<LittleEndian>(4)?; // heads (boot code only)
        b.write_u32::<LittleEndian>(1)?; // hidden sectors
        b.write_u32::<LittleEndian>(total_sectors as u32)?;
        b.push(0x80); // drive number (boot code only)
        b.push(0); // current head
        b.push(0x29); // boot signature
        b.write_u32::<LittleEndian>(0xF3F3_7B84)?; // volume ID
        b.extend_from_slice(b"gokrazy    ");
        b.extend_from_slice(b"FAT16   ");
        b.resize(510, 0); // boot code
        b.extend_from_slice(&[0x55, 0xAA]);
        Ok(b)
    }

    /// Write `buf` to the sink followed by zeros up to `target` bytes.
    fn write_region(&mut self, buf: &[u8], target: usize) -> Result<()> {
        self.sink.write_all(buf)?;
        if buf.len() < target {
            self.sink.write_all(&vec![0u8; target - buf.len()])?;
        }
        Ok(())
    }

    /// Write the image: boot sector, FAT, root directory, then the
    /// staged data area. Consumes the writer and returns the total
    /// sector count; the caller is expected to pad the sink to
    /// `total_sectors * 512` bytes before handing the image to tools
    /// that read the whole file system.
    pub fn flush(mut self) -> Result<u32> {
        self.finish_pending()?;

        // Directory listings reference the first cluster of sibling
        // subdirectories, so cluster numbers are assigned for the whole
        // tree before any listing is staged.
        let mut subdirs = Vec::new();
        self.collect_subdirs(0, &mut subdirs);
        let mut next = self.current_cluster();
        for &d in &subdirs {
            self.dirs[d].first_cluster = next;
            next += full_clusters(self.listing_size(d)) as u16;
        }
        for &d in &subdirs {
            debug_assert_eq!(self.current_cluster(), self.dirs[d].first_cluster);
            let listing = self.serialize_dir(d)?;
            self.stage_listing(&listing)?;
        }

        // Blow the FAT up to the smallest size whose cluster count
        // forces 16-bit FAT values, the only width supported here.
        if self.fat.len() < MIN_FAT16_ENTRIES {
            self.fat.resize(MIN_FAT16_ENTRIES, 0);
        }

        // Clusters are numbered from 2, so checkers expect the table
        // region to hold two entries past the cluster count.
        let fat_sectors = full_sectors((self.fat.len() + 2) * 2);

        // Only the boot sector needs reserving, but the reserved area
        // must be cluster-aligned for some boot ROMs.
        let reserved_sectors = full_clusters(SECTOR_SIZE as usize) * SECTORS_PER_CLUSTER as usize;

        // The root directory spans an integral number of sectors, at
        // least one even when empty.
        let root_listing = self.serialize_dir(0)?;
        let root_dir_sectors = full_sectors(root_listing.len()).max(1);
        let root_dir_entries = root_dir_sectors * ENTRIES_PER_SECTOR;

        let data_sectors = self.fat.len() * SECTORS_PER_CLUSTER as usize;
        let total_sectors = reserved_sectors + root_dir_sectors + fat_sectors + data_sectors;

        debug!(
            "flushing FAT16B image: {} FAT entries, {} root entries, {} total sectors",
            self.fat.len(),
            root_dir_entries,
            total_sectors
        );

        let boot = self.boot_sector(
            reserved_sectors,
            fat_sectors,
            root_dir_entries,
            total_sectors,
        )?;
        self.write_region(&boot, reserved_sectors * SECTOR_SIZE as usize)?;

        let mut fat_bytes = Vec::with_capacity(self.fat.len() * 2);
        for &entry in &self.fat {
            fat_bytes.write_u16::<LittleEndian>(entry)?;
        }
        self.write_region(&fat_bytes, fat_sectors * SECTOR_SIZE as usize)?;

        self.write_region(&root_listing, root_dir_sectors * SECTOR_SIZE as usize)?;

        self.scratch.seek(SeekFrom::Start(0))?;
        io::copy(&mut self.scratch, &mut self.sink)?;
        self.sink.flush()?;

        Ok(total_sectors as u32)
    }
}

/// Streams one file's contents into the image.
///
/// Returned by [`Writer::file`]; writes go to the writer's scratch
/// file. `close` finalizes the file immediately; a dropped handle is
/// finalized by the next `file`, `mkdir` or `flush` call.
pub struct FileWriter<'a, W: Write> {
    w: &'a mut Writer<W>,
}

impl<W: Write> FileWriter<'_, W> {
    /// Pad to the cluster boundary and record the file's cluster chain.
    pub fn close(self) -> Result<()> {
        self.w.finish_pending()
    }
}

impl<W: Write> Write for FileWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.w.write_pending(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.w.scratch.flush()
    }
}
