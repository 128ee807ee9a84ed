//! Maps the two virtual files onto the SafeBoot image and the sector
//! crypto engine, serving read/getattr/lookup/readdir against `fuser`'s
//! kernel FUSE bridge.

use std::ffi::OsStr;
use std::fs::File;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen,
    Request,
};
use libc::{EACCES, ENOENT};

use crate::crypto::SectorCrypto;

pub const ROOT_INODE: u64 = 1;
pub const SBFSDISK_INODE: u64 = 2;
pub const ENCDISK_INODE: u64 = 3;

const SBFSDISK_NAME: &str = "SafeBoot.disk";
const ENCDISK_NAME: &str = "encdisk.img";

/// Fixed synthetic timestamp used for every inode, matching the original
/// `824463 * 1e12` nanosecond constant (824463 * 1e12 ns = 824_463_000 s
/// since the epoch).
const FIXED_TIMESTAMP_SECS: u64 = 824_463_000;

fn fixed_timestamp() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(FIXED_TIMESTAMP_SECS)
}

pub struct McafeeFdeFs {
    sbfsdisk_data: Vec<u8>,
    encdisk_size: u64,
    partition_start: u64,
    all_disk: bool,
    crypto: Option<SectorCrypto<File>>,
    uid: u32,
    gid: u32,
}

impl McafeeFdeFs {
    pub fn new(
        sbfsdisk_data: Vec<u8>,
        encdisk_size: u64,
        partition_start: u64,
        all_disk: bool,
        crypto: Option<SectorCrypto<File>>,
    ) -> Self {
        McafeeFdeFs {
            sbfsdisk_data,
            encdisk_size,
            partition_start,
            all_disk,
            crypto,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn has_encdisk(&self) -> bool {
        self.crypto.is_some()
    }

    fn root_attr(&self) -> FileAttr {
        self.dir_attr(ROOT_INODE)
    }

    fn dir_attr(&self, ino: u64) -> FileAttr {
        let ts = fixed_timestamp();
        FileAttr {
            ino,
            size: 0,
            blocks: 0,
            atime: ts,
            mtime: ts,
            ctime: ts,
            crtime: ts,
            kind: FileType::Directory,
            perm: 0o555,
            nlink: 2,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    fn file_attr(&self, ino: u64, size: u64) -> FileAttr {
        let ts = fixed_timestamp();
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: ts,
            mtime: ts,
            ctime: ts,
            crtime: ts,
            kind: FileType::RegularFile,
            perm: 0o444,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    fn attr_for_inode(&self, ino: u64) -> Option<FileAttr> {
        match ino {
            ROOT_INODE => Some(self.root_attr()),
            SBFSDISK_INODE => Some(self.file_attr(ino, self.sbfsdisk_data.len() as u64)),
            ENCDISK_INODE if self.has_encdisk() => Some(self.file_attr(ino, self.encdisk_size)),
            _ => None,
        }
    }
}

/// Resolves a name looked up under the root directory to its inode.
///
/// Pulled out of `lookup` as a pure function so it can be unit tested
/// without constructing a `fuser::Request` (which has no public
/// constructor outside the crate). Note this is the *intended* behavior
/// per the spec's open question: the original source's lookup guard
/// combines the two name comparisons with `or` in a way that always
/// evaluates true and rejects every name; here the two known names are
/// accepted and everything else is rejected.
fn resolve_root_name(name: &OsStr, has_encdisk: bool) -> Option<u64> {
    if name == SBFSDISK_NAME {
        Some(SBFSDISK_INODE)
    } else if name == ENCDISK_NAME && has_encdisk {
        Some(ENCDISK_INODE)
    } else {
        None
    }
}

/// Whether `flags` from an `open` request ask for write access.
fn requests_write(flags: i32) -> bool {
    flags & (libc::O_WRONLY | libc::O_RDWR) != 0
}

/// Clamps a `[offset, offset+size)` read against an in-memory buffer's
/// length, matching the `SafeBoot.disk` read path in `read`.
fn clamp_read(data: &[u8], offset: i64, size: u32) -> &[u8] {
    let start = (offset as usize).min(data.len());
    let end = (start + size as usize).min(data.len());
    &data[start..end]
}

/// Builds the stable-order root directory listing, with `encdisk.img`
/// present only when a key is active.
fn root_entries(has_encdisk: bool) -> Vec<(u64, FileType, String)> {
    let mut entries = vec![
        (ROOT_INODE, FileType::Directory, ".".to_string()),
        (ROOT_INODE, FileType::Directory, "..".to_string()),
        (SBFSDISK_INODE, FileType::RegularFile, SBFSDISK_NAME.to_string()),
    ];
    if has_encdisk {
        entries.push((ENCDISK_INODE, FileType::RegularFile, ENCDISK_NAME.to_string()));
    }
    entries
}

impl Filesystem for McafeeFdeFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT_INODE {
            reply.error(ENOENT);
            return;
        }

        let ino = resolve_root_name(name, self.has_encdisk());

        match ino.and_then(|ino| self.attr_for_inode(ino)) {
            Some(attr) => reply.entry(&Duration::ZERO, &attr, 0),
            None => reply.error(ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.attr_for_inode(ino) {
            Some(attr) => reply.attr(&Duration::ZERO, &attr),
            None => reply.error(ENOENT),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        if ino != ROOT_INODE {
            reply.error(ENOENT);
            return;
        }
        reply.opened(ino, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if ino != ROOT_INODE {
            reply.error(ENOENT);
            return;
        }

        let entries = root_entries(self.has_encdisk());

        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if ino != SBFSDISK_INODE && !(ino == ENCDISK_INODE && self.has_encdisk()) {
            reply.error(ENOENT);
            return;
        }

        if requests_write(flags) {
            reply.error(EACCES);
            return;
        }

        reply.opened(ino, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        log::debug!("read: ino={ino}\toffset={offset}\tn_bytes={size}");

        if ino == SBFSDISK_INODE {
            reply.data(clamp_read(&self.sbfsdisk_data, offset, size));
            return;
        }

        if ino == ENCDISK_INODE {
            if let Some(crypto) = &self.crypto {
                let base = if self.all_disk { 0 } else { self.partition_start };
                let abs_off = base + offset as u64;
                match crypto.decrypt_at_offset(abs_off, size as usize) {
                    Ok(data) => reply.data(&data),
                    Err(e) => {
                        log::error!("sector decrypt failed: {e}");
                        reply.error(libc::EIO);
                    }
                }
                return;
            }
        }

        reply.error(ENOENT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_root_name_accepts_sbfsdisk_without_a_key() {
        assert_eq!(
            resolve_root_name(OsStr::new(SBFSDISK_NAME), false),
            Some(SBFSDISK_INODE)
        );
    }

    #[test]
    fn resolve_root_name_hides_encdisk_without_a_key() {
        assert_eq!(resolve_root_name(OsStr::new(ENCDISK_NAME), false), None);
        assert_eq!(
            resolve_root_name(OsStr::new(ENCDISK_NAME), true),
            Some(ENCDISK_INODE)
        );
    }

    #[test]
    fn resolve_root_name_rejects_everything_else() {
        assert_eq!(resolve_root_name(OsStr::new("nope"), true), None);
        assert_eq!(resolve_root_name(OsStr::new(""), true), None);
    }

    #[test]
    fn requests_write_flags_write_modes() {
        assert!(!requests_write(libc::O_RDONLY));
        assert!(requests_write(libc::O_WRONLY));
        assert!(requests_write(libc::O_RDWR));
    }

    #[test]
    fn clamp_read_clamps_to_buffer_length() {
        let data = b"0123456789".to_vec();
        assert_eq!(clamp_read(&data, 0, 5), b"01234");
        assert_eq!(clamp_read(&data, 8, 10), b"89");
        assert_eq!(clamp_read(&data, 20, 5), b"");
    }

    #[test]
    fn root_entries_omits_encdisk_without_a_key() {
        let entries = root_entries(false);
        assert!(entries.iter().all(|(_, _, name)| name != ENCDISK_NAME));
        assert!(entries.iter().any(|(_, _, name)| name == SBFSDISK_NAME));
    }

    #[test]
    fn root_entries_includes_encdisk_with_a_key() {
        let entries = root_entries(true);
        assert!(entries.iter().any(|(_, _, name)| name == ENCDISK_NAME));
    }

    #[test]
    fn attr_for_inode_hides_encdisk_without_crypto() {
        let fs = McafeeFdeFs::new(vec![0u8; 1024], 2048, 0, false, None);
        assert!(fs.attr_for_inode(ROOT_INODE).is_some());
        assert!(fs.attr_for_inode(SBFSDISK_INODE).is_some());
        assert!(fs.attr_for_inode(ENCDISK_INODE).is_none());
        assert!(fs.attr_for_inode(999).is_none());
    }

    #[test]
    fn file_attr_reports_expected_mode_bits() {
        let fs = McafeeFdeFs::new(vec![0u8; 1024], 2048, 0, false, None);
        let sbfsdisk = fs.attr_for_inode(SBFSDISK_INODE).unwrap();
        assert_eq!(sbfsdisk.kind, FileType::RegularFile);
        assert_eq!(sbfsdisk.perm, 0o444);
        assert_eq!(sbfsdisk.size, 1024);

        let root = fs.attr_for_inode(ROOT_INODE).unwrap();
        assert_eq!(root.kind, FileType::Directory);
        assert_eq!(root.perm, 0o555);
    }
}
