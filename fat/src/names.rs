//! 8.3 short-name generation and long-filename encoding
//!
//! Short names are derived deterministically from the full name;
//! collisions within one directory are resolved with a `~N` numeric
//! tail. Long names are stored in UCS-2 little-endian, 13 characters
//! per 32-byte entry, emitted in reverse order before the short entry.

use std::collections::HashSet;

use crate::types::{ATTR_LONG_NAME, LAST_LONG_ENTRY, LONG_NAME_CHARS};

/// Generate the 8.3 short form of `name`, unique within `seen`.
///
/// Returns the space-padded primary (8 bytes) and extension (3 bytes)
/// portions. Names that were truncated get a `~N` tail spliced in, with
/// N advancing past entries already present in `seen`. Characters
/// outside ASCII become underscores; the long-name entry preserves the
/// original.
pub fn short_name(name: &str, seen: &mut HashSet<String>) -> ([u8; 8], [u8; 3]) {
    let upper = name.to_ascii_uppercase();

    if upper == "." || upper == ".." {
        let mut primary = [b' '; 8];
        primary[..upper.len()].copy_from_slice(upper.as_bytes());
        return (primary, [b' '; 3]);
    }

    let basis: String = upper
        .chars()
        .filter(|&c| c != ' ')
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    let basis = basis.trim_start_matches('.');

    let mut fit = true;
    let mut primary = match basis.rfind('.') {
        Some(idx) => &basis[..idx],
        None => basis,
    }
    .to_string();
    if primary.len() > 8 {
        primary.truncate(8);
        fit = false;
    }

    let mut ext = match basis.rfind('.') {
        Some(idx) => {
            let mut ext = basis[idx + 1..].to_string();
            if ext.len() > 3 {
                ext.truncate(3);
                fit = false;
            }
            ext
        }
        None => String::new(),
    };
    while ext.len() < 3 {
        ext.push(' ');
    }

    if !fit {
        for n in 1..=999_999 {
            let tail = format!("~{n}");
            let suggestion = if primary.len() + tail.len() > 8 {
                format!("{}{}", &primary[..8 - tail.len()], tail)
            } else {
                format!("{primary}{tail}")
            };
            if !seen.contains(&suggestion) {
                primary = suggestion;
                seen.insert(primary.clone());
                break;
            }
        }
    }

    let mut primaryb = [b' '; 8];
    primaryb[..primary.len()].copy_from_slice(primary.as_bytes());
    let mut extb = [b' '; 3];
    extb[..ext.len()].copy_from_slice(ext.as_bytes());
    (primaryb, extb)
}

/// Short form of a single component as a display string
/// (`PRIMARY.EXT` with padding trimmed), used for lookups where no
/// collision resolution is needed.
pub fn lookup_name(component: &str) -> String {
    let (primary, ext) = short_name(component, &mut HashSet::new());
    join_short_name(&primary, &ext)
}

/// Join padded primary and extension bytes into a display string
pub fn join_short_name(primary: &[u8; 8], ext: &[u8; 3]) -> String {
    let mut name = String::from_utf8_lossy(trim_trailing_spaces(primary)).into_owned();
    let ext = trim_trailing_spaces(ext);
    if !ext.is_empty() {
        name.push('.');
        name.push_str(&String::from_utf8_lossy(ext));
    }
    name
}

/// Trim trailing padding spaces from a fixed-width name field
pub fn trim_trailing_spaces(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b' ' {
        end -= 1;
    }
    &bytes[..end]
}

/// Number of long-filename entries needed for `name`
pub fn long_entry_count(name: &str) -> usize {
    (name.encode_utf16().count() + LONG_NAME_CHARS - 1) / LONG_NAME_CHARS
}

/// Checksum over the 11-byte short name, stored in each long-filename
/// entry so readers can match the sequences up.
pub fn checksum(primary: &[u8; 8], ext: &[u8; 3]) -> u8 {
    let mut sum = 0u8;
    for &b in primary.iter().chain(ext.iter()) {
        sum = (((sum & 1) << 7) | ((sum & 0xFE) >> 1)).wrapping_add(b);
    }
    sum
}

/// Encode `name` as a sequence of 32-byte long-filename entries, in
/// emission order (highest order byte first, flagged `LAST_LONG_ENTRY`).
///
/// A terminating U+0000 is appended only when the name length is not a
/// multiple of 13; unused character slots carry 0xFFFF.
pub fn long_name_entries(name: &str, checksum: u8) -> Vec<[u8; 32]> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let chunks = (units.len() + LONG_NAME_CHARS - 1) / LONG_NAME_CHARS;

    let mut buf = vec![0xFFFFu16; chunks * LONG_NAME_CHARS];
    buf[..units.len()].copy_from_slice(&units);
    if units.len() % LONG_NAME_CHARS != 0 {
        buf[units.len()] = 0;
    }

    let mut entries = Vec::with_capacity(chunks);
    for i in (0..chunks).rev() {
        let mut order = (i + 1) as u8;
        if i == chunks - 1 {
            order |= LAST_LONG_ENTRY;
        }
        let chunk = &buf[i * LONG_NAME_CHARS..(i + 1) * LONG_NAME_CHARS];

        let mut entry = [0u8; 32];
        entry[0] = order;
        put_units(&mut entry[1..11], &chunk[0..5]);
        entry[11] = ATTR_LONG_NAME;
        entry[12] = 0; // reserved
        entry[13] = checksum;
        put_units(&mut entry[14..26], &chunk[5..11]);
        entry[26..28].copy_from_slice(&0u16.to_le_bytes()); // first cluster
        put_units(&mut entry[28..32], &chunk[11..13]);
        entries.push(entry);
    }
    entries
}

fn put_units(dst: &mut [u8], units: &[u16]) {
    for (i, &u) in units.iter().enumerate() {
        dst[i * 2..i * 2 + 2].copy_from_slice(&u.to_le_bytes());
    }
}
