//! Locates the `SafeBootDiskInf` descriptor, walks its scatter-gather
//! sector map, and reconstructs the SafeBoot FAT partition image.

use std::io::{Read, Seek, SeekFrom};

use crate::bytes::{build_guid, build_keycheck, check_signature, le_u32, read_at, SECTOR_SIZE};
use crate::error::MetadataError;

const SAFEBOOT_DISK_INF_SIGNATURE: &[u8] = b"SafeBootDiskInf";
const DISK_INF_SECTOR_PTR_OFFSET: u64 = 0x1c;
const SECTOR_MAP_PTR_OFFSET: u64 = 0x43;
const DISK_INFO_LEN: usize = 0x5a;

/// One extent of the scatter-gather sector map, already adjusted (the
/// first extent has had its leading signature sector stripped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorMapEntry {
    pub base: u32,
    pub count: u32,
}

/// Interpreted fields of the `SafeBootDiskInf` descriptor sector, used
/// only for the `--info` display.
#[derive(Debug, Clone)]
pub struct DiskInfo {
    pub signature: String,
    pub disk_id: u8,
    pub guid: String,
    pub algorithm: u8,
    pub sector_map_ptr: u32,
    pub sector_count: u8,
    pub key_check: String,
}

impl DiskInfo {
    fn from_bytes(raw: &[u8]) -> Self {
        DiskInfo {
            signature: String::from_utf8_lossy(&raw[..0x10]).trim_end_matches('\0').to_string(),
            disk_id: raw[0x11],
            guid: build_guid(raw),
            algorithm: raw[0x37],
            sector_map_ptr: le_u32(&raw[0x43..0x47]),
            sector_count: raw[0x4b],
            key_check: build_keycheck(raw),
        }
    }

    pub fn log(&self) {
        log::info!("//\t|+| SafeBoot Disk Info |+|\n|");
        log::info!("|----- Signature:  {}", self.signature);
        log::info!("|------- Disk ID:  {}", self.disk_id);
        log::info!("|----- Disk GUID:  {}", self.guid);
        log::info!("|----- Algorithm:  {:#x} (AES-256-CBC)", self.algorithm);
        log::info!("|---- Sector Map:  {}", self.sector_map_ptr);
        log::info!("|-- Sector Count:  {}", self.sector_count);
        log::info!("|----- Key Check:  {}", self.key_check);
        log::info!("|\n\\\\\t|+| ****************** |+|");
    }
}

/// The reconstructed SafeBoot helper partition plus the metadata that
/// produced it.
pub struct SafeBootMetadata {
    pub disk_inf_sector: u32,
    pub sector_map: Vec<SectorMapEntry>,
    pub image: Vec<u8>,
}

impl SafeBootMetadata {
    /// Runs the full parse-and-reconstruct algorithm against `source`.
    pub fn parse<S: Read + Seek>(source: &mut S) -> Result<Self, MetadataError> {
        let ptr = read_at(source, DISK_INF_SECTOR_PTR_OFFSET, 4)?;
        let disk_inf_sector = le_u32(&ptr);

        let disk_inf_offset = disk_inf_sector as u64 * SECTOR_SIZE as u64;
        if !check_signature(source, SAFEBOOT_DISK_INF_SIGNATURE, disk_inf_offset)? {
            return Err(MetadataError::SignatureMismatch {
                expected: SAFEBOOT_DISK_INF_SIGNATURE,
                offset: disk_inf_offset,
            });
        }

        let map_ptr_raw = read_at(source, disk_inf_offset + SECTOR_MAP_PTR_OFFSET, 4)?;
        let sector_map_start = le_u32(&map_ptr_raw);

        let sector_map = read_sector_map(source, sector_map_start)?;

        let mut image = Vec::new();
        for entry in &sector_map {
            source.seek(SeekFrom::Start(entry.base as u64 * SECTOR_SIZE as u64))?;
            let mut sector_bytes = vec![0u8; entry.count as usize * SECTOR_SIZE];
            source.read_exact(&mut sector_bytes)?;
            image.extend_from_slice(&sector_bytes);
        }

        Ok(SafeBootMetadata {
            disk_inf_sector,
            sector_map,
            image,
        })
    }

    /// Reads the `SafeBootDiskInf` block's interpreted fields, for the
    /// `--info`/`--verbose` display.
    pub fn disk_info<S: Read + Seek>(&self, source: &mut S) -> Result<DiskInfo, MetadataError> {
        let offset = self.disk_inf_sector as u64 * SECTOR_SIZE as u64;
        let raw = read_at(source, offset, DISK_INFO_LEN)?;
        Ok(DiskInfo::from_bytes(&raw))
    }
}

fn read_sector_map<S: Read + Seek>(
    source: &mut S,
    sector_map_start: u32,
) -> Result<Vec<SectorMapEntry>, MetadataError> {
    source.seek(SeekFrom::Start(
        sector_map_start as u64 * SECTOR_SIZE as u64 + 0x4,
    ))?;

    let mut map = Vec::new();
    let mut first = true;
    let mut row = [0u8; 0x10];

    loop {
        if source.read_exact(&mut row).is_err() {
            return Err(MetadataError::SectorMapUnterminated);
        }

        let mut base = le_u32(&row[0x0..0x4]);
        if base == 0 {
            break;
        }
        let mut count = le_u32(&row[0x8..0xc]);

        if first {
            base += 1;
            count -= 1;
            first = false;
        }

        map.push(SectorMapEntry { base, count });
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    /// Builds a minimal disk image with a `SafeBootDiskInf` descriptor and
    /// a sector map reachable from it.
    fn build_disk(disk_inf_sector: u32, map_sector: u32, rows: &[(u32, u32)], total_sectors: u32) -> Vec<u8> {
        let mut disk = vec![0u8; total_sectors as usize * SECTOR_SIZE];

        disk[0x1c..0x20].copy_from_slice(&disk_inf_sector.to_le_bytes());

        let inf_off = disk_inf_sector as usize * SECTOR_SIZE;
        disk[inf_off..inf_off + SAFEBOOT_DISK_INF_SIGNATURE.len()]
            .copy_from_slice(SAFEBOOT_DISK_INF_SIGNATURE);
        disk[inf_off + 0x43..inf_off + 0x47].copy_from_slice(&map_sector.to_le_bytes());

        let map_off = map_sector as usize * SECTOR_SIZE + 0x4;
        let mut w = &mut disk[map_off..];
        for &(base, count) in rows {
            w.write_all(&base.to_le_bytes()).unwrap();
            w.write_all(&[0u8; 4]).unwrap();
            w.write_all(&count.to_le_bytes()).unwrap();
            w.write_all(&[0u8; 4]).unwrap();
        }
        // terminator row already all-zero from the vec init

        // stamp recognizable bytes into each sector so reconstruction can
        // be checked precisely
        for s in 0..total_sectors {
            let off = s as usize * SECTOR_SIZE;
            disk[off] = (s % 251) as u8;
        }
        // re-stamp the fixed header bytes we depend on, since the loop
        // above only touched byte 0 of each sector
        disk[0x1c..0x20].copy_from_slice(&disk_inf_sector.to_le_bytes());
        disk[inf_off..inf_off + SAFEBOOT_DISK_INF_SIGNATURE.len()]
            .copy_from_slice(SAFEBOOT_DISK_INF_SIGNATURE);
        disk[inf_off + 0x43..inf_off + 0x47].copy_from_slice(&map_sector.to_le_bytes());
        let map_off = map_sector as usize * SECTOR_SIZE + 0x4;
        let mut w = &mut disk[map_off..];
        for &(base, count) in rows {
            w.write_all(&base.to_le_bytes()).unwrap();
            w.write_all(&[0u8; 4]).unwrap();
            w.write_all(&count.to_le_bytes()).unwrap();
            w.write_all(&[0u8; 4]).unwrap();
        }

        disk
    }

    #[test]
    fn skips_leading_signature_sector() {
        // first row (base=100, count=5) -> adjusted to (101, 4)
        let disk = build_disk(0, 1, &[(100, 5)], 110);
        let mut cursor = Cursor::new(disk.clone());
        let meta = SafeBootMetadata::parse(&mut cursor).unwrap();

        assert_eq!(meta.sector_map, vec![SectorMapEntry { base: 101, count: 4 }]);
        assert_eq!(meta.image.len(), 4 * SECTOR_SIZE);
        assert_eq!(meta.image, &disk[101 * SECTOR_SIZE..105 * SECTOR_SIZE]);
    }

    #[test]
    fn reconstructs_multiple_extents_in_order() {
        let disk = build_disk(0, 1, &[(10, 3), (50, 2)], 60);
        let mut cursor = Cursor::new(disk.clone());
        let meta = SafeBootMetadata::parse(&mut cursor).unwrap();

        assert_eq!(
            meta.sector_map,
            vec![
                SectorMapEntry { base: 11, count: 2 },
                SectorMapEntry { base: 50, count: 2 },
            ]
        );
        let mut expected = disk[11 * SECTOR_SIZE..13 * SECTOR_SIZE].to_vec();
        expected.extend_from_slice(&disk[50 * SECTOR_SIZE..52 * SECTOR_SIZE]);
        assert_eq!(meta.image, expected);
    }

    #[test]
    fn rejects_missing_signature() {
        let mut disk = build_disk(0, 1, &[(10, 3)], 20);
        // corrupt the signature
        disk[0] = b'X';
        let mut cursor = Cursor::new(disk);
        assert!(matches!(
            SafeBootMetadata::parse(&mut cursor),
            Err(MetadataError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn disk_info_reports_expected_fields() {
        let mut disk = build_disk(0, 1, &[(10, 3)], 20);
        let inf_off = 0usize;
        disk[inf_off + 0x11] = 7;
        disk[inf_off + 0x37] = 0x01;
        disk[inf_off + 0x4b] = 42;

        let mut cursor = Cursor::new(disk);
        let meta = SafeBootMetadata::parse(&mut cursor).unwrap();
        let info = meta.disk_info(&mut cursor).unwrap();

        assert_eq!(info.disk_id, 7);
        assert_eq!(info.algorithm, 0x01);
        assert_eq!(info.sector_count, 42);
        assert_eq!(info.sector_map_ptr, 1);
    }
}
