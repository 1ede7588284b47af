//! On-disk structures and constants for SquashFS 4.0
//!
//! All multi-byte fields are little-endian. See the kernel's
//! `fs/squashfs/squashfs_fs.h` for the canonical layout.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

/// Superblock magic (`hsqs` on disk)
pub const MAGIC: u32 = 0x7371_7368;

/// Uncompressed size of one data block
pub const DATA_BLOCK_SIZE: usize = 131_072;

/// Uncompressed size of one metadata chunk
pub const METADATA_BLOCK_SIZE: usize = 8192;

pub const MAJOR_VERSION: u16 = 4;
pub const MINOR_VERSION: u16 = 0;

/// `Fragment` field value for inodes without a fragment
pub const INVALID_FRAGMENT: u32 = 0xFFFF_FFFF;

/// `Xattr` field value for inodes without extended attributes
pub const INVALID_XATTR: u32 = 0xFFFF_FFFF;

/// Compression identifiers from the superblock
pub const ZLIB_COMPRESSION: u16 = 1;

/// Set on a data block's size word when the block is stored raw
pub const UNCOMPRESSED_DATA_BLOCK: u32 = 1 << 24;

/// Set on a metadata chunk's length prefix when the chunk is stored raw
pub const UNCOMPRESSED_METADATA: u16 = 0x8000;

/// Inode/directory-entry type codes
pub const DIR_TYPE: u16 = 1;
pub const FILE_TYPE: u16 = 2;
pub const SYMLINK_TYPE: u16 = 3;
pub const LDIR_TYPE: u16 = 8;

/// Directory inodes are always `r-xr-xr-x`
pub const MODE_RX: u16 = 0o555;

/// Superblock flags: uncompressed metadata, uncompressed fragments,
/// never use fragments, uncompressed xattrs, no xattrs.
pub fn filesystem_flags() -> u16 {
    const NO_I: u16 = 1 << 0;
    const NO_F: u16 = 1 << 3;
    const NO_FRAG: u16 = 1 << 4;
    const NO_X: u16 = 1 << 8;
    const NO_XATTR: u16 = 1 << 9;
    NO_I | NO_F | NO_FRAG | NO_X | NO_XATTR
}

/// log2 of the data block size, or 0 if not a supported power of two
pub fn block_log(block: u32) -> u16 {
    (12u16..=20).find(|&i| block == 1u32 << i).unwrap_or(0)
}

/// SquashFS superblock (96 bytes at offset 0)
pub struct Superblock {
    pub inodes: u32,
    pub mkfs_time: i32,
    pub block_size: u32,
    pub fragments: u32,
    pub compression: u16,
    pub block_log: u16,
    pub flags: u16,
    pub no_ids: u16,
    pub major: u16,
    pub minor: u16,

    /// `(byte offset of the containing metadata chunk) << 16 | offset
    /// within the chunk`, relative to the start of the inode table.
    pub root_inode: i64,
    pub bytes_used: i64,
    pub id_table_start: i64,
    pub xattr_id_table_start: i64,
    pub inode_table_start: i64,
    pub directory_table_start: i64,
    pub fragment_table_start: i64,
    pub lookup_table_start: i64,
}

impl Superblock {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(MAGIC)?;
        w.write_u32::<LittleEndian>(self.inodes)?;
        w.write_i32::<LittleEndian>(self.mkfs_time)?;
        w.write_u32::<LittleEndian>(self.block_size)?;
        w.write_u32::<LittleEndian>(self.fragments)?;
        w.write_u16::<LittleEndian>(self.compression)?;
        w.write_u16::<LittleEndian>(self.block_log)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.no_ids)?;
        w.write_u16::<LittleEndian>(self.major)?;
        w.write_u16::<LittleEndian>(self.minor)?;
        w.write_i64::<LittleEndian>(self.root_inode)?;
        w.write_i64::<LittleEndian>(self.bytes_used)?;
        w.write_i64::<LittleEndian>(self.id_table_start)?;
        w.write_i64::<LittleEndian>(self.xattr_id_table_start)?;
        w.write_i64::<LittleEndian>(self.inode_table_start)?;
        w.write_i64::<LittleEndian>(self.directory_table_start)?;
        w.write_i64::<LittleEndian>(self.fragment_table_start)?;
        w.write_i64::<LittleEndian>(self.lookup_table_start)
    }
}

/// Common prefix of every inode record (16 bytes)
pub struct InodeHeader {
    pub inode_type: u16,
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub mtime: i32,
    pub inode_number: u32,
}

impl InodeHeader {
    pub fn write_to(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        buf.write_u16::<LittleEndian>(self.inode_type)?;
        buf.write_u16::<LittleEndian>(self.mode)?;
        buf.write_u16::<LittleEndian>(self.uid)?;
        buf.write_u16::<LittleEndian>(self.gid)?;
        buf.write_i32::<LittleEndian>(self.mtime)?;
        buf.write_u32::<LittleEndian>(self.inode_number)
    }
}
