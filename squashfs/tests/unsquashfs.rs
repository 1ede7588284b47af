//! Validates written images with the external `unsquashfs` utility.

use std::io::Write;
use std::process::Command;
use std::time::{Duration, UNIX_EPOCH};

use squashfs::Writer;

#[test]
fn test_unsquashfs_listing() {
    let mtime = UNIX_EPOCH + Duration::from_secs(1_684_324_800);

    let tmp = tempfile::NamedTempFile::new().expect("should create temp file");

    let mut w = Writer::new(tmp.as_file(), mtime).expect("should create writer");
    let a = w.directory(w.root(), "a", mtime);
    let b = w.directory(a, "b", mtime);
    let mut f = w.file(b, "c.txt", mtime, 0o644).unwrap();
    f.write_all(b"hello from the root file system\n").unwrap();
    f.close().unwrap();
    w.symlink(a, "b/c.txt", "link", mtime, 0o777).unwrap();
    w.flush_directory(b).unwrap();
    w.flush_directory(a).unwrap();
    w.flush_directory(w.root()).unwrap();
    w.flush().unwrap();

    let result = Command::new("unsquashfs")
        .arg("-ll")
        .arg(tmp.path())
        .output();
    match result {
        Ok(output) if output.status.success() => {
            let listing = String::from_utf8_lossy(&output.stdout);
            assert!(listing.contains("a/b/c.txt"), "listing:\n{listing}");
            assert!(listing.contains("a/link"), "listing:\n{listing}");
        }
        Ok(output) => {
            panic!(
                "unsquashfs rejected the image:\n{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Err(e) => {
            eprintln!("unsquashfs not available: {e}");
            eprintln!("Install with: apt-get install squashfs-tools");
        }
    }
}
