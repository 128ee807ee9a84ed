//! CLI entry point: validates configuration, parses the on-disk metadata,
//! optionally loads the decryption key, and mounts the filesystem.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use mcafuse::bytes::{check_signature, read_at, SECTOR_SIZE};
use mcafuse::crypto::SectorCrypto;
use mcafuse::disk::partitions_from_mbr;
use mcafuse::error::MetadataError;
use mcafuse::fs::McafeeFdeFs;
use mcafuse::keyfile::load_key;
use mcafuse::safeboot::SafeBootMetadata;
use mcafuse::ConfigError;

/// The `#SafeBoot` cookie at the very start of an encrypted disk, checked
/// before any of the heavier metadata parsing is attempted.
const TOP_LEVEL_SIGNATURE: &[u8] = b"#SafeBoot";
const TOP_LEVEL_SIGNATURE_OFFSET: u64 = 0x2;

/// Read-only FUSE bridge exposing the plaintext of a McAfee FDE /
/// SafeBoot encrypted disk image.
#[derive(Parser)]
#[command(name = "mcafuse", version, about)]
struct Cli {
    /// Directory to mount the filesystem at
    mountpoint: PathBuf,

    /// Raw disk image encrypted with McAfee FDE / SafeBoot
    disk_image: PathBuf,

    /// Enable debug-level logging
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// XML file holding the base64-encoded AES key
    #[arg(short, long, value_name = "KEYFILE")]
    keyfile: Option<PathBuf>,

    /// Print the SafeBootDiskInf info block on startup
    #[arg(short, long, default_value_t = false)]
    info: bool,

    /// Expose the whole disk through encdisk.img, not just the selected partition
    #[arg(short, long, default_value_t = false)]
    all: bool,

    /// Enable informational logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);
}

fn check_prereqs(cli: &Cli) -> Result<(), ConfigError> {
    if !cli.disk_image.is_file() {
        return Err(ConfigError::DiskImageMissing(cli.disk_image.clone()));
    }
    if let Some(keyfile) = &cli.keyfile {
        if !keyfile.is_file() {
            return Err(ConfigError::KeyFileMissing(keyfile.clone()));
        }
    }
    if !cli.mountpoint.is_dir() {
        return Err(ConfigError::MountpointInvalid(cli.mountpoint.clone()));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = check_prereqs(&cli) {
        log::error!("{e}");
        std::process::exit(1);
    }

    if let Err(e) = run(&cli) {
        log::error!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    log::info!("|++| Starting McAfuse...");

    let mut disk_file = File::open(&cli.disk_image)
        .with_context(|| format!("opening disk image {}", cli.disk_image.display()))?;

    if !check_signature(&mut disk_file, TOP_LEVEL_SIGNATURE, TOP_LEVEL_SIGNATURE_OFFSET)? {
        return Err(MetadataError::SignatureMismatch {
            expected: TOP_LEVEL_SIGNATURE,
            offset: TOP_LEVEL_SIGNATURE_OFFSET,
        }
        .into());
    }

    let sector0 = read_at(&mut disk_file, 0, SECTOR_SIZE).context("reading boot sector")?;

    let metadata = SafeBootMetadata::parse(&mut disk_file).context("parsing SafeBoot metadata")?;

    let (partition_start_sectors, partition_len_sectors) = if cli.all {
        (0u64, 0u64)
    } else {
        let partitions = partitions_from_mbr(&sector0);
        if cli.verbose {
            for p in &partitions {
                p.pretty_print();
            }
        }
        match partitions.len() {
            1 => (
                partitions[0].starting_sector as u64,
                partitions[0].total_sectors as u64,
            ),
            2 => (
                partitions[1].starting_sector as u64,
                partitions[1].total_sectors as u64,
            ),
            n => return Err(ConfigError::UnsupportedPartitionCount(n).into()),
        }
    };

    if cli.info || cli.verbose {
        let info = metadata
            .disk_info(&mut disk_file)
            .context("reading SafeBootDiskInf block")?;
        info.log();
    }

    let encdisk_size = if cli.all {
        disk_file.metadata().context("statting disk image")?.len()
    } else {
        (partition_start_sectors + partition_len_sectors) * SECTOR_SIZE as u64
    };

    let crypto = match &cli.keyfile {
        Some(keyfile) => {
            let key = load_key(keyfile).context("loading key file")?;
            Some(SectorCrypto::new(key, disk_file))
        }
        None => {
            log::warn!("|--| No key file supplied, encdisk.img will not be exposed");
            None
        }
    };

    let fs = McafeeFdeFs::new(
        metadata.image,
        encdisk_size,
        partition_start_sectors * SECTOR_SIZE as u64,
        cli.all,
        crypto,
    );

    let options = vec![MountOption::RO, MountOption::FSName("mcafuse".to_string())];

    let session = fuser::spawn_mount2(fs, &cli.mountpoint, &options).with_context(|| {
        format!(
            "mounting at {} (if this is a permission error, try again with elevated privileges)",
            cli.mountpoint.display()
        )
    })?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            log::warn!("|--| Terminated with CTRL-C (SIGINT)...");
            running.store(false, Ordering::SeqCst);
        })
        .context("installing SIGINT handler")?;
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    drop(session);
    log::info!("|++| Unmounted, exiting");

    Ok(())
}
