//! Image-level tests: write an image into memory, then pick it apart
//! byte by byte and read it back through the reader.

use std::io::{Cursor, Write};

use fat::{DosDateTime, Error, Reader, Writer};

fn mtime() -> DosDateTime {
    DosDateTime {
        year: 2017,
        month: 9,
        day: 6,
        hour: 8,
        minute: 13,
        second: 28,
    }
}

fn le16(image: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([image[offset], image[offset + 1]])
}

fn le32(image: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        image[offset],
        image[offset + 1],
        image[offset + 2],
        image[offset + 3],
    ])
}

fn fat_entry(image: &[u8], index: usize) -> u16 {
    // The FAT starts after the reserved area (4 sectors).
    le16(image, 4 * 512 + index * 2)
}

#[test]
fn test_empty_image() {
    let mut sink = Vec::new();
    let fw = Writer::new(&mut sink).unwrap();
    let total_sectors = fw.flush().unwrap();

    // Boot sector fields
    assert_eq!(&sink[0..3], &[0xEB, 0x3C, 0x90]);
    assert_eq!(&sink[3..11], b"gokrazy!");
    assert_eq!(le16(&sink, 11), 512); // sector size
    assert_eq!(sink[13], 4); // sectors per cluster
    assert_eq!(le16(&sink, 14), 4); // reserved sectors
    assert_eq!(sink[16], 1); // FAT copies
    assert_eq!(le16(&sink, 17), 16); // root directory entries (one sector)
    assert_eq!(le16(&sink, 19), 0); // 16-bit sector count unused
    assert_eq!(sink[21], 0xF8); // media descriptor
    assert_eq!(le16(&sink, 22), 16); // sectors per FAT
    assert_eq!(le32(&sink, 32), total_sectors); // 32-bit sector count
    assert_eq!(sink[38], 0x29); // boot signature
    assert_eq!(le32(&sink, 39), 0xF3F3_7B84); // volume ID
    assert_eq!(&sink[43..54], b"gokrazy    ");
    assert_eq!(&sink[54..62], b"FAT16   ");
    assert_eq!(&sink[510..512], &[0x55, 0xAA]);

    // reserved + FAT + root directory, no data clusters written
    assert_eq!(sink.len(), (4 + 16 + 1) * 512);

    // 4085 FAT entries: media descriptor, clean flag, rest zero
    assert_eq!(fat_entry(&sink, 0), 0xFFF8);
    assert_eq!(fat_entry(&sink, 1), 0xFFFF);
    for i in 2..4085 {
        assert_eq!(fat_entry(&sink, i), 0, "FAT entry {i}");
    }

    // The declared size covers the whole declared data area.
    assert_eq!(total_sectors, (4 + 16 + 1 + 4085 * 4) as u32);
}

#[test]
fn test_one_short_file() {
    let content = b"short file name";

    let mut sink = Vec::new();
    let mut fw = Writer::new(&mut sink).unwrap();
    let mut f = fw.file("/S.TXT", mtime()).unwrap();
    f.write_all(content).unwrap();
    f.close().unwrap();
    let total_sectors = fw.flush().unwrap();

    // One data cluster chained
    assert_eq!(fat_entry(&sink, 0), 0xFFF8);
    assert_eq!(fat_entry(&sink, 1), 0xFFFF);
    assert_eq!(fat_entry(&sink, 2), 0xFFFF);
    assert_eq!(fat_entry(&sink, 3), 0);

    let mut rd = Reader::new(Cursor::new(&sink)).unwrap();
    let (offset, length) = rd.extents("/S.TXT").unwrap();
    assert_eq!(offset, (4 + 16 + 1) * 512);
    assert_eq!(length, content.len() as u64);
    assert_eq!(&sink[offset as usize..offset as usize + content.len()], content);

    // The FAT is still padded to 4085 entries.
    assert_eq!(total_sectors, (4 + 16 + 1 + 4085 * 4) as u32);
}

#[test]
fn test_long_name_collision() {
    let mut sink = Vec::new();
    let mut fw = Writer::new(&mut sink).unwrap();
    fw.file("/resolv.conf", mtime())
        .unwrap()
        .write_all(b"nameserver 8.8.8.8")
        .unwrap();
    fw.file("/resolv1.conf", mtime())
        .unwrap()
        .write_all(b"nameserver 9.9.9.9")
        .unwrap();
    fw.flush().unwrap();

    // Both short names carry numeric tails; the long-name entries
    // preceding them carry checksums over those 11 bytes.
    let root = (4 + 16) * 512;
    let root_bytes = &sink[root..root + 512];
    let find = |short: &[u8]| {
        root_bytes
            .chunks(32)
            .position(|slot| &slot[..11] == short)
            .unwrap_or_else(|| panic!("short entry {:?} not found", short))
    };
    let first = find(b"RESOLV~1CON");
    let second = find(b"RESOLV~2CON");

    let checksum_at = |slot: usize| root_bytes[slot * 32 + 13];
    assert_eq!(
        checksum_at(first - 1),
        fat::names::checksum(b"RESOLV~1", b"CON")
    );
    assert_eq!(
        checksum_at(second - 1),
        fat::names::checksum(b"RESOLV~2", b"CON")
    );

    // Long-name slots carry the marker attribute.
    assert_eq!(root_bytes[(first - 1) * 32 + 11], 0x0F);

    // The reader computes short forms without collision context, so
    // only the first of the two colliding names is addressable.
    let mut rd = Reader::new(Cursor::new(&sink)).unwrap();
    let (off1, len1) = rd.extents("/resolv.conf").unwrap();
    assert_eq!(&sink[off1 as usize..off1 as usize + len1 as usize], b"nameserver 8.8.8.8");
}

#[test]
fn test_large_file_chain() {
    const SIZE: usize = 10 * 1024 * 1024;

    let mut sink = Vec::new();
    let mut fw = Writer::new(&mut sink).unwrap();
    let mut f = fw.file("/vmlinuz", mtime()).unwrap();
    let chunk = vec![0xA5u8; 64 * 1024];
    let mut written = 0;
    while written < SIZE {
        let n = chunk.len().min(SIZE - written);
        f.write_all(&chunk[..n]).unwrap();
        written += n;
    }
    f.close().unwrap();
    fw.flush().unwrap();

    // 5120 contiguous entries: each points at its successor, the last
    // is end-of-chain.
    const CLUSTERS: usize = SIZE / 2048;
    assert_eq!(CLUSTERS, 5120);
    for i in 0..CLUSTERS - 1 {
        assert_eq!(fat_entry(&sink, 2 + i), (3 + i) as u16, "entry {}", 2 + i);
    }
    assert_eq!(fat_entry(&sink, 2 + CLUSTERS - 1), 0xFFFF);

    let mut rd = Reader::new(Cursor::new(&sink)).unwrap();
    let (offset, length) = rd.extents("/vmlinuz").unwrap();
    assert_eq!(length, SIZE as u64);
    assert_eq!(sink[offset as usize], 0xA5);
    assert_eq!(sink[offset as usize + SIZE - 1], 0xA5);
}

#[test]
fn test_nested_directories() {
    let entry = b"options root=/dev/xda";
    let cmdline = b"root=/dev/xda";

    let mut sink = Vec::new();
    let mut fw = Writer::new(&mut sink).unwrap();
    fw.file("/cmdline.txt", mtime())
        .unwrap()
        .write_all(cmdline)
        .unwrap();
    fw.file("/loader/entries/appliance.conf", mtime())
        .unwrap()
        .write_all(entry)
        .unwrap();
    fw.flush().unwrap();

    let mut rd = Reader::new(Cursor::new(&sink)).unwrap();

    let (offset, length) = rd.extents("/cmdline.txt").unwrap();
    assert_eq!(&sink[offset as usize..offset as usize + length as usize], cmdline);

    let (offset, length) = rd.extents("/loader/entries/appliance.conf").unwrap();
    assert_eq!(&sink[offset as usize..offset as usize + length as usize], entry);
}

#[test]
fn test_mod_time_round_trip() {
    let mut sink = Vec::new();
    let mut fw = Writer::new(&mut sink).unwrap();
    fw.file("/etc/resolv.conf", mtime())
        .unwrap()
        .write_all(b"nameserver 8.8.8.8")
        .unwrap();
    fw.flush().unwrap();

    let mut rd = Reader::new(Cursor::new(&sink)).unwrap();
    assert_eq!(rd.mod_time("/etc/resolv.conf").unwrap(), mtime());
    // Directories created implicitly by `file` carry the epoch stamp.
    assert_eq!(rd.mod_time("/etc").unwrap(), DosDateTime::EPOCH);
}

#[test]
fn test_varied_sizes_read_back() {
    let sizes = [0usize, 1, 511, 512, 2047, 2048, 2049, 10_000, 65_536];

    let mut sink = Vec::new();
    let mut fw = Writer::new(&mut sink).unwrap();
    for (i, &size) in sizes.iter().enumerate() {
        let mut f = fw.file(&format!("/{i}.dat"), mtime()).unwrap();
        f.write_all(&vec![i as u8 + 1; size]).unwrap();
        f.close().unwrap();
    }
    let total_sectors = fw.flush().unwrap();

    // The image never exceeds its declared size.
    assert!(sink.len() as u64 <= total_sectors as u64 * 512);

    let mut rd = Reader::new(Cursor::new(&sink)).unwrap();
    for (i, &size) in sizes.iter().enumerate() {
        let (offset, length) = rd.extents(&format!("/{i}.dat")).unwrap();
        assert_eq!(length, size as u64, "file {i}");
        let body = &sink[offset as usize..offset as usize + size];
        assert!(body.iter().all(|&b| b == i as u8 + 1), "file {i} contents");
    }
}

#[test]
fn test_mkdir_and_errors() {
    let mut sink = Vec::new();
    let mut fw = Writer::new(&mut sink).unwrap();
    fw.mkdir("usr/share/lib", mtime()).unwrap();
    fw.file("/a.txt", mtime())
        .unwrap()
        .write_all(b"x")
        .unwrap();

    // A file cannot be used as a directory component.
    match fw.file("/a.txt/b.txt", mtime()) {
        Err(Error::InvalidPath { component, .. }) => assert_eq!(component, "a.txt"),
        other => panic!("expected InvalidPath, got {:?}", other.map(|_| ())),
    }
    match fw.mkdir("a.txt/sub", mtime()) {
        Err(Error::InvalidPath { .. }) => {}
        other => panic!("expected InvalidPath, got {other:?}"),
    }
    fw.flush().unwrap();

    let mut rd = Reader::new(Cursor::new(&sink)).unwrap();
    assert_eq!(rd.mod_time("/usr/share/lib").unwrap(), mtime());
    match rd.extents("/missing.txt") {
        Err(Error::NotFound { .. }) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn test_implicit_close_on_next_file() {
    let mut sink = Vec::new();
    let mut fw = Writer::new(&mut sink).unwrap();
    // Dropped without close; the next call finalizes it.
    fw.file("/first.txt", mtime())
        .unwrap()
        .write_all(b"first")
        .unwrap();
    fw.file("/second.txt", mtime())
        .unwrap()
        .write_all(b"second")
        .unwrap();
    fw.flush().unwrap();

    let mut rd = Reader::new(Cursor::new(&sink)).unwrap();
    let (off, len) = rd.extents("/first.txt").unwrap();
    assert_eq!(&sink[off as usize..off as usize + len as usize], b"first");
    let (off, len) = rd.extents("/second.txt").unwrap();
    assert_eq!(&sink[off as usize..off as usize + len as usize], b"second");
    // Files start on distinct clusters.
    let (off1, _) = rd.extents("/first.txt").unwrap();
    let (off2, _) = rd.extents("/second.txt").unwrap();
    assert_eq!(off2 - off1, 2048);
}
