//! Stage-1 Bootloader MBR Configuration
//!
//! Provides a configured copy of a minimal stage1-only Linux
//! bootloader for the boot-code area of a Master Boot Record. The
//! loader binary is precompiled; configuration pokes the load
//! parameters and the disk signature into fixed offsets.
//!
//! The returned 446 bytes cover the MBR up to the partition table;
//! the caller appends the four partition entries and the `55 AA`
//! signature.

mod template;

use template::STAGE1;

/// Byte offset of the loader's parameter block: kernel LBA and
/// command-line LBA, both little-endian u32.
const PARAMS_OFFSET: usize = 432;

/// Byte offset of the disk signature the kernel exposes as
/// `PARTUUID=`: a little-endian u32 followed by a zero u16.
const SIGNATURE_OFFSET: usize = 440;

/// Size of the boot-code area preceding the partition table
pub const BOOT_CODE_SIZE: usize = 446;

/// Return the stage-1 loader configured to load the kernel at
/// `vmlinuz_lba` and the kernel command line at `cmdline_lba`, with
/// `disk_signature` as the MBR disk signature.
pub fn configure(vmlinuz_lba: u32, cmdline_lba: u32, disk_signature: u32) -> [u8; BOOT_CODE_SIZE] {
    let mut mbr = [0u8; BOOT_CODE_SIZE];
    mbr[..PARAMS_OFFSET].copy_from_slice(&STAGE1[..PARAMS_OFFSET]);
    mbr[PARAMS_OFFSET..PARAMS_OFFSET + 4].copy_from_slice(&vmlinuz_lba.to_le_bytes());
    mbr[PARAMS_OFFSET + 4..PARAMS_OFFSET + 8].copy_from_slice(&cmdline_lba.to_le_bytes());
    mbr[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 4].copy_from_slice(&disk_signature.to_le_bytes());
    mbr[SIGNATURE_OFFSET + 4..].copy_from_slice(&0u16.to_le_bytes());
    mbr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_code_verbatim() {
        let mbr = configure(8218, 8218, 0xB4B5_0001);
        assert_eq!(&mbr[..PARAMS_OFFSET], &STAGE1[..PARAMS_OFFSET]);
    }

    #[test]
    fn test_parameters_patched() {
        let mbr = configure(0x0000_201A, 0x0000_3FFF, 0xDEAD_BEEF);
        assert_eq!(&mbr[432..436], &[0x1A, 0x20, 0x00, 0x00]);
        assert_eq!(&mbr[436..440], &[0xFF, 0x3F, 0x00, 0x00]);
        assert_eq!(&mbr[440..444], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(&mbr[444..446], &[0x00, 0x00]);
    }

    #[test]
    fn test_loader_entry() {
        // cli; xor ax, ax: the loader must start with interrupts off.
        let mbr = configure(1, 1, 1);
        assert_eq!(&mbr[..3], &[0xFA, 0x31, 0xC0]);
    }
}
