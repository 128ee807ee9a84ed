use std::path::PathBuf;

/// Configuration errors, surfaced before a mount is attempted.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("disk image not found: {0}")]
    DiskImageMissing(PathBuf),
    #[error("key file not found: {0}")]
    KeyFileMissing(PathBuf),
    #[error("mountpoint does not exist or is not a directory: {0}")]
    MountpointInvalid(PathBuf),
    #[error("unsupported partition count: found {0}, only 1 or 2 partitions are supported")]
    UnsupportedPartitionCount(usize),
}

/// SafeBoot metadata parsing errors.
#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("signature {expected:?} not found at offset {offset:#x}")]
    SignatureMismatch {
        expected: &'static [u8],
        offset: u64,
    },
    #[error("sector map never terminated within the readable range")]
    SectorMapUnterminated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Key-file loading errors.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("XML parse error while reading key file: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("XML not valid: no <key> element found")]
    MissingKeyElement,
    #[error("key not in base64 encoding or invalid format: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("key length is not valid: expected {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
