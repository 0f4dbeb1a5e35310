//! Boot configuration: descriptor parsing and the file-loading pipeline.
//!
//! A boot descriptor is a small JSON document naming the machine, its memory
//! size, and the binary blobs (bios, kernel, initrd, drives…) the machine is
//! constructed from. [`loader::load_boot_config`] turns a descriptor locator
//! into a fully-populated [`BootConfig`]; the caller then owns the config
//! outright and hands it to machine construction.

pub mod descriptor;
pub mod loader;

pub use descriptor::{ConfigError, DESCRIPTOR_VERSION, parse_descriptor};
pub use loader::{FileFetcher, LoadError, LocalFetcher, load_boot_config, resolve_locator};

/// Fixed file-reference slots, walked in this order by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSlot {
    Bios,
    VgaBios,
    Kernel,
    Initrd,
}

impl FileSlot {
    pub const ALL: [FileSlot; 4] = [
        FileSlot::Bios,
        FileSlot::VgaBios,
        FileSlot::Kernel,
        FileSlot::Initrd,
    ];

    fn index(self) -> usize {
        match self {
            FileSlot::Bios => 0,
            FileSlot::VgaBios => 1,
            FileSlot::Kernel => 2,
            FileSlot::Initrd => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileSlot::Bios => "bios",
            FileSlot::VgaBios => "vga_bios",
            FileSlot::Kernel => "kernel",
            FileSlot::Initrd => "initrd",
        }
    }
}

/// One file-reference slot: the descriptor-supplied filename and, once the
/// loader has fetched it, the file's bytes.
#[derive(Debug, Clone, Default)]
pub struct FileRef {
    pub filename: Option<String>,
    pub blob: Option<Vec<u8>>,
}

/// `driveN` entry: a block image path plus an optional device-type string.
#[derive(Debug, Clone)]
pub struct DriveEntry {
    pub file: String,
    pub device: Option<String>,
}

/// `fsN` entry: an exported filesystem image and its mount tag.
#[derive(Debug, Clone)]
pub struct FsEntry {
    pub file: String,
    pub tag: String,
}

/// `ethN` entry: driver name plus the host interface for tap-style drivers.
#[derive(Debug, Clone)]
pub struct EthEntry {
    pub driver: String,
    pub ifname: Option<String>,
}

/// `display0` block.
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// Guest acceleration mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accel {
    None,
    /// Use host acceleration when available (the default when the
    /// descriptor is silent).
    #[default]
    Auto,
}

/// The validated boot aggregate a machine instance is constructed from.
#[derive(Debug, Default)]
pub struct BootConfig {
    pub machine: String,
    pub memory_bytes: u64,
    pub cmdline: Option<String>,
    files: [FileRef; 4],
    pub drives: Vec<DriveEntry>,
    pub filesystems: Vec<FsEntry>,
    pub interfaces: Vec<EthEntry>,
    pub display: Option<DisplayConfig>,
    pub input_device: Option<String>,
    pub accel: Accel,
    pub rtc_local_time: bool,
}

impl BootConfig {
    pub fn file(&self, slot: FileSlot) -> &FileRef {
        &self.files[slot.index()]
    }

    pub(crate) fn file_mut(&mut self, slot: FileSlot) -> &mut FileRef {
        &mut self.files[slot.index()]
    }

    /// The loaded bytes for `slot`, if the descriptor referenced a file
    /// there and the loader has fetched it.
    pub fn blob(&self, slot: FileSlot) -> Option<&[u8]> {
        self.file(slot).blob.as_deref()
    }

    /// Append `fragment` to the guest command line with a space separator.
    /// A fragment starting with `!` replaces the command line instead.
    pub fn append_cmdline(&mut self, fragment: &str) {
        if let Some(replacement) = fragment.strip_prefix('!') {
            self.cmdline = Some(replacement.to_string());
            return;
        }
        self.cmdline = Some(match self.cmdline.take() {
            Some(existing) => format!("{existing} {fragment}"),
            None => fragment.to_string(),
        });
    }
}
