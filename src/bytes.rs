//! Fixed-endian decoding and sector-addressed I/O helpers shared by the
//! MBR and SafeBoot metadata parsers.

use std::io::{self, Read, Seek, SeekFrom};

pub const SECTOR_SIZE: usize = 512;

/// Decodes a little-endian `u32` from the first 4 bytes of `data`.
///
/// Panics if `data` is shorter than 4 bytes; every call site in this crate
/// slices a fixed, statically-known range before calling this, so a short
/// read here indicates a disk layout bug rather than bad input.
pub fn le_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[..4].try_into().expect("4-byte slice"))
}

/// Reads exactly `len` bytes at absolute byte offset `offset`.
pub fn read_at<S: Read + Seek>(source: &mut S, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    source.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    source.read_exact(&mut buf)?;
    Ok(buf)
}

/// Reads `count` contiguous sectors starting at sector `base`.
pub fn read_sectors<S: Read + Seek>(source: &mut S, base: u32, count: u32) -> io::Result<Vec<u8>> {
    read_at(
        source,
        base as u64 * SECTOR_SIZE as u64,
        count as usize * SECTOR_SIZE,
    )
}

/// Checks that `signature` appears verbatim at absolute offset `offset`.
pub fn check_signature<S: Read + Seek>(
    source: &mut S,
    signature: &'static [u8],
    offset: u64,
) -> io::Result<bool> {
    let read = read_at(source, offset, signature.len())?;
    Ok(read == signature)
}

/// Rebuilds the disk GUID from a `SafeBootDiskInf` disk-info block.
///
/// Format (see the on-disk layout in the spec): the first group reverses
/// bytes `0x2A..=0x27`, the next two groups are two-byte pairs at
/// `0x2C,0x2B` and `0x2E,0x2D`, and the remainder (`0x2F..0x37`) is one
/// byte per group. Joined with `-` and uppercased.
pub fn build_guid(disk_info: &[u8]) -> String {
    let mut groups = Vec::with_capacity(11);

    let mut first = String::new();
    for i in (0x27..=0x2a).rev() {
        first.push_str(&format!("{:02x}", disk_info[i]));
    }
    groups.push(first);

    groups.push(format!("{:02x}{:02x}", disk_info[0x2c], disk_info[0x2b]));
    groups.push(format!("{:02x}{:02x}", disk_info[0x2e], disk_info[0x2d]));

    for i in 0x2f..0x37 {
        groups.push(format!("{:02x}", disk_info[i]));
    }

    groups.join("-").to_uppercase()
}

/// Formats the 8-byte key-check field (`0x4d..0x55`) in reverse byte
/// order, as uppercase hex.
pub fn build_keycheck(disk_info: &[u8]) -> String {
    disk_info[0x4d..0x55]
        .iter()
        .rev()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .to_uppercase()
}
