//! Validates written images with the external `dosfsck` utility.

use std::io::{Seek, SeekFrom, Write};
use std::process::Command;

use fat::{DosDateTime, Writer};

#[test]
fn test_dosfsck() {
    let mtime = DosDateTime {
        year: 2023,
        month: 5,
        day: 17,
        hour: 12,
        minute: 0,
        second: 0,
    };

    let mut tmp = tempfile::NamedTempFile::new().expect("should create temp file");

    let mut fw = Writer::new(tmp.as_file_mut()).expect("should create writer");
    fw.file("/empty.txt", mtime)
        .unwrap()
        .write_all(b"nameserver 8.8.8.8")
        .unwrap();
    fw.file("/etc/resolv.conf", mtime)
        .unwrap()
        .write_all(b"nameserver 8.8.8.8")
        .unwrap();
    fw.file("/EFI/BOOT/bootx64.efi", mtime)
        .unwrap()
        .write_all(&vec![0u8; 10 * 1024 * 1024])
        .unwrap();
    fw.file("/s.txt", mtime)
        .unwrap()
        .write_all(b"short file name")
        .unwrap();
    fw.file("/s.conf", mtime)
        .unwrap()
        .write_all(b"short file name with long extension")
        .unwrap();
    let total_sectors = fw.flush().expect("should flush");

    // dosfsck verifies it can access the entire file system, but the
    // writer does not fill the declared data area; pad the file out.
    let file = tmp.as_file_mut();
    let size = file.seek(SeekFrom::End(0)).unwrap();
    let want = total_sectors as u64 * 512;
    if size < want {
        file.write_all(&vec![0u8; (want - size) as usize]).unwrap();
    }
    file.flush().unwrap();

    let result = Command::new("dosfsck").arg("-v").arg(tmp.path()).output();
    match result {
        Ok(output) if output.status.success() => {
            println!("{}", String::from_utf8_lossy(&output.stdout));
        }
        Ok(output) => {
            panic!(
                "dosfsck rejected the image:\n{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Err(e) => {
            eprintln!("dosfsck not available: {e}");
            eprintln!("Install with: apt-get install dosfstools");
        }
    }
}
