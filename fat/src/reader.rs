//! Minimal FAT16B reader
//!
//! Only aims to be compatible with file systems produced by the writer
//! in this crate: files are stored un-fragmented, so a directory entry
//! fully determines a file's byte extent.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::datetime::DosDateTime;
use crate::error::{Error, Result};
use crate::names;
use crate::types::{ATTR_DIRECTORY, ATTR_LONG_NAME, DIR_ENTRY_SIZE};

struct RawEntry {
    name: [u8; 8],
    ext: [u8; 3],
    attr: u8,
    time: u16,
    date: u16,
    first_cluster: u16,
    size: u32,
}

/// Reads file extents and timestamps from a FAT16B image
pub struct Reader<R: Read + Seek> {
    r: R,
    sector_size: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    root_dir_entries: u16,
    fat_sectors: u16,
}

impl<R: Read + Seek> Reader<R> {
    /// Create a reader by parsing the boot sector metadata.
    pub fn new(mut r: R) -> Result<Self> {
        r.seek(SeekFrom::Start(0))?;
        let mut jump = [0u8; 3];
        r.read_exact(&mut jump)?;
        if jump[0] != 0xEB && jump[0] != 0xE9 {
            return Err(Error::Malformed {
                reason: "boot sector does not start with a jump instruction",
            });
        }

        // Skip the OEM name
        r.seek(SeekFrom::Current(8))?;

        let sector_size = r.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = r.read_u8()?;
        let reserved_sectors = r.read_u16::<LittleEndian>()?;
        r.seek(SeekFrom::Current(1))?; // number of FAT copies
        let root_dir_entries = r.read_u16::<LittleEndian>()?;
        r.seek(SeekFrom::Current(2 + 1))?; // 16-bit sector count, media type
        let fat_sectors = r.read_u16::<LittleEndian>()?;

        if sector_size == 0 || sectors_per_cluster == 0 {
            return Err(Error::Malformed {
                reason: "zero sector or cluster size",
            });
        }

        Ok(Reader {
            r,
            sector_size,
            sectors_per_cluster,
            reserved_sectors,
            root_dir_entries,
            fat_sectors,
        })
    }

    fn full_sectors(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.sector_size as u64)
    }

    fn read_entry(&mut self, offset: u64) -> Result<RawEntry> {
        self.r.seek(SeekFrom::Start(offset))?;
        let mut name = [0u8; 8];
        self.r.read_exact(&mut name)?;
        let mut ext = [0u8; 3];
        self.r.read_exact(&mut ext)?;
        let attr = self.r.read_u8()?;
        self.r.seek(SeekFrom::Current(10))?; // reserved
        let time = self.r.read_u16::<LittleEndian>()?;
        let date = self.r.read_u16::<LittleEndian>()?;
        let first_cluster = self.r.read_u16::<LittleEndian>()?;
        let size = self.r.read_u32::<LittleEndian>()?;
        Ok(RawEntry {
            name,
            ext,
            attr,
            time,
            date,
            first_cluster,
            size,
        })
    }

    /// Byte offset of the start of a cluster's data
    fn cluster_offset(&self, data_offset: u64, first_cluster: u16) -> Result<u64> {
        let cluster_bytes = self.sectors_per_cluster as i64 * self.sector_size as i64;
        let offset = data_offset as i64 + (first_cluster as i64 - 2) * cluster_bytes;
        if offset < 0 {
            return Err(Error::Malformed {
                reason: "directory entry points before the data area",
            });
        }
        Ok(offset as u64)
    }

    /// Walk `path` through the root directory and any subdirectories,
    /// returning the matching entry and the data-area base offset.
    fn walk(&mut self, path: &str) -> Result<(RawEntry, u64)> {
        let mut dir_offset =
            (self.reserved_sectors as u64 + self.fat_sectors as u64) * self.sector_size as u64;
        let data_offset = dir_offset
            + self.full_sectors(self.root_dir_entries as u64 * DIR_ENTRY_SIZE as u64)
                * self.sector_size as u64;

        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }

        let mut found = None;
        for (i, component) in components.iter().enumerate() {
            let want = names::lookup_name(component);

            let mut matched = None;
            for slot in 0..self.root_dir_entries as u64 {
                let entry = self.read_entry(dir_offset + slot * DIR_ENTRY_SIZE as u64)?;
                if entry.name[0] == 0 {
                    // unused slot
                    continue;
                }
                if entry.attr == ATTR_LONG_NAME {
                    continue;
                }
                let name = names::join_short_name(&entry.name, &entry.ext);
                // Case-insensitive short-name match, with a verbatim
                // comparison for images written by older tools.
                if name.eq_ignore_ascii_case(&want) || name == *component {
                    matched = Some(entry);
                    break;
                }
            }
            let entry = matched.ok_or_else(|| Error::NotFound {
                path: path.to_string(),
            })?;

            if entry.attr & ATTR_DIRECTORY != 0 {
                dir_offset = self.cluster_offset(data_offset, entry.first_cluster)?;
            } else if i != components.len() - 1 {
                // A file cannot have children.
                return Err(Error::NotFound {
                    path: path.to_string(),
                });
            }
            found = Some(entry);
        }

        // components is non-empty, so the loop either returned an error
        // or stored a match.
        match found {
            Some(entry) => Ok((entry, data_offset)),
            None => Err(Error::NotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Return the byte offset and length of the file identified by
    /// `path`.
    ///
    /// Only meaningful on file systems where files are stored
    /// un-fragmented, such as those generated by [`crate::Writer`].
    pub fn extents(&mut self, path: &str) -> Result<(u64, u64)> {
        let (entry, data_offset) = self.walk(path)?;
        if entry.attr & ATTR_DIRECTORY != 0 {
            return Err(Error::NotFound {
                path: path.to_string(),
            });
        }
        if entry.size == 0 {
            // Empty files own no cluster.
            return Ok((0, 0));
        }
        let offset = self.cluster_offset(data_offset, entry.first_cluster)?;
        Ok((offset, entry.size as u64))
    }

    /// Return the modification time (UTC) of the file or directory
    /// identified by `path`.
    pub fn mod_time(&mut self, path: &str) -> Result<DosDateTime> {
        let (entry, _) = self.walk(path)?;
        Ok(DosDateTime::from_words(entry.date, entry.time))
    }
}
