//! coracle: boot-descriptor loader and dry-run driver.
//!
//! Loads a boot descriptor plus every file it references, validates the
//! result, and reports what a machine instance would be constructed from.
//! With `--probe-drives` each configured block image is opened read-only and
//! sized. The actual machine (interpreter + devices) is supplied by the
//! embedding host through the [`coracle::machine::Machine`] contract; this
//! binary stops at the construction boundary.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use coracle::boot::{self, FileSlot, LocalFetcher};
use coracle::storage::{BlockMode, BlockStorage, FileDisk};

/// Machine-emulator boot driver.
#[derive(Parser, Debug)]
#[command(name = "coracle", version, about = "Machine-emulator boot driver")]
struct Args {
    /// Path to the boot descriptor (JSON)
    descriptor: String,

    /// Override the descriptor's memory size, in megabytes
    #[arg(long)]
    memory_mb: Option<u64>,

    /// Append a fragment to the guest command line ('!' replaces it)
    #[arg(long)]
    append: Option<String>,

    /// Open each configured drive image read-only and report its size
    #[arg(long)]
    probe_drives: bool,

    /// Print the loaded configuration as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct FileReport {
    slot: &'static str,
    filename: String,
    bytes: usize,
}

#[derive(Serialize)]
struct BootReport {
    machine: String,
    memory_bytes: u64,
    cmdline: Option<String>,
    files: Vec<FileReport>,
    drives: Vec<String>,
    filesystems: Vec<String>,
    interfaces: Vec<String>,
}

fn main() -> Result<()> {
    let _log_guard = coracle::logging::init();
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let mut config = boot::load_boot_config(&LocalFetcher, &args.descriptor)
        .await
        .with_context(|| format!("loading boot descriptor {}", args.descriptor))?;

    if let Some(mb) = args.memory_mb {
        config.memory_bytes = mb << 20;
    }
    if let Some(fragment) = &args.append {
        config.append_cmdline(fragment);
    }

    let report = BootReport {
        machine: config.machine.clone(),
        memory_bytes: config.memory_bytes,
        cmdline: config.cmdline.clone(),
        files: FileSlot::ALL
            .into_iter()
            .filter_map(|slot| {
                let file = config.file(slot);
                Some(FileReport {
                    slot: slot.name(),
                    filename: file.filename.clone()?,
                    bytes: file.blob.as_ref().map_or(0, Vec::len),
                })
            })
            .collect(),
        drives: config.drives.iter().map(|d| d.file.clone()).collect(),
        filesystems: config
            .filesystems
            .iter()
            .map(|fs| format!("{} ({})", fs.file, fs.tag))
            .collect(),
        interfaces: config.interfaces.iter().map(|e| e.driver.clone()).collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("machine:  {}", report.machine);
        println!("memory:   {} MB", report.memory_bytes >> 20);
        if let Some(cmdline) = &report.cmdline {
            println!("cmdline:  {cmdline}");
        }
        for file in &report.files {
            println!("{:<9} {} ({} bytes)", format!("{}:", file.slot), file.filename, file.bytes);
        }
        for drive in &report.drives {
            println!("drive:    {drive}");
        }
        for fs in &report.filesystems {
            println!("fs:       {fs}");
        }
        for eth in &report.interfaces {
            println!("eth:      {eth}");
        }
    }

    if args.probe_drives {
        for drive in &config.drives {
            let locator = boot::resolve_locator(&args.descriptor, &drive.file);
            match FileDisk::open(Path::new(&locator), BlockMode::ReadOnly) {
                Ok(disk) => {
                    info!(image = %locator, sectors = disk.sector_count(), "drive probed");
                    println!("probe:    {}: {} sectors", locator, disk.sector_count());
                }
                Err(e) => warn!(image = %locator, error = %e, "drive probe failed"),
            }
        }
    }

    Ok(())
}
