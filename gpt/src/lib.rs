//! Minimal GPT Partition Table Reader
//!
//! Just enough GPT parsing to match block devices against
//! `root=PARTUUID=` kernel parameters: the partition GUIDs of the
//! entries in the first partition-entry sector, as canonical strings.
//!
//! # Usage
//!
//! ```no_run
//! let mut disk = std::fs::File::open("/dev/sda")?;
//! for uuid in gpt::partition_uuids(&mut disk)? {
//!     println!("PARTUUID={uuid}");
//! }
//! # Ok::<(), gpt::Error>(())
//! ```

use std::fmt;
use std::io::Read;

use thiserror::Error;

/// Result type for GPT operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading a partition table
#[derive(Debug, Error)]
pub enum Error {
    /// Failure reading from the device
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// The bytes are inconsistent with the GPT format
    #[error("malformed partition table: {reason}")]
    Malformed { reason: &'static str },
}

/// GPT header signature at the start of LBA 1
const SIGNATURE: &[u8; 8] = b"EFI PART";

/// Size of one partition entry in bytes
const ENTRY_SIZE: usize = 128;

/// A globally unique identifier in its on-disk (mixed-endian) form.
///
/// The first three fields are stored little-endian but printed
/// big-endian; the clock sequence and node bytes are printed as-is.
/// See the EFI specification, appendix A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guid([u8; 16]);

impl Guid {
    /// Wrap the 16 on-disk bytes of a GUID
    pub fn from_bytes(b: [u8; 16]) -> Self {
        Guid(b)
    }

    fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        let time_low = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let time_mid = u16::from_le_bytes([b[4], b[5]]);
        let time_high_and_version = u16::from_le_bytes([b[6], b[7]]);
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-",
            time_low, time_mid, time_high_and_version, b[8], b[9]
        )?;
        for byte in &b[10..16] {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Return the ids of the GPT partitions described by the first
/// partition-entry sector, in canonical string form.
///
/// Reads exactly three sectors from the current position: the
/// protective MBR, the GPT header and the first sector of partition
/// entries. Iteration stops at the first unused entry.
pub fn partition_uuids<R: Read>(r: &mut R) -> Result<Vec<String>> {
    let mut buf = [0u8; 3 * 512];
    r.read_exact(&mut buf)?;

    if &buf[512..520] != SIGNATURE {
        return Err(Error::Malformed {
            reason: "missing EFI PART signature",
        });
    }

    let mut uuids = Vec::new();
    for entry in buf[1024..].chunks_exact(ENTRY_SIZE) {
        let mut type_guid = [0u8; 16];
        type_guid.copy_from_slice(&entry[0..16]);
        if Guid::from_bytes(type_guid).is_zero() {
            // unused entry, no further entries follow
            break;
        }
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&entry[16..32]);
        uuids.push(Guid::from_bytes(guid).to_string());
    }
    Ok(uuids)
}
