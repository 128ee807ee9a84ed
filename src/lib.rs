//! McAfuse: a read-only FUSE bridge exposing the plaintext of a McAfee
//! FDE / SafeBoot encrypted disk image.
//!
//! Components:
//! - Byte utilities ([`bytes`])
//! - Key loader ([`keyfile`])
//! - MBR parser ([`disk`])
//! - SafeBoot metadata parser ([`safeboot`])
//! - Sector crypto engine ([`crypto`])
//! - Filesystem adapter ([`fs`])

pub mod bytes;
pub mod crypto;
pub mod disk;
pub mod error;
pub mod fs;
pub mod keyfile;
pub mod safeboot;

pub use error::{ConfigError, KeyError, MetadataError};
