//! coracle: host-side driver for embedding a machine emulator.
//!
//! The driver covers four pieces, leaves first:
//!
//! - [`storage`]: sector-addressable block storage with Read-Only,
//!   Read-Write and Snapshot (copy-on-write) persistence modes.
//! - [`console`]: the byte bridge between host input/output and the
//!   guest's character device.
//! - [`boot`]: the sequential pipeline that turns a descriptor plus its
//!   referenced binary blobs into a validated [`boot::BootConfig`].
//! - [`scheduler`]: the cooperative run loop driving interpreter bursts
//!   under cycle and time budgets, built to live inside an event loop the
//!   host owns.
//!
//! The instruction-set interpreter and the virtio device models live
//! outside this crate, behind the [`machine::Machine`] contract.

pub mod boot;
pub mod console;
pub mod logging;
pub mod machine;
pub mod scheduler;
pub mod storage;

pub use boot::{BootConfig, FileFetcher, LoadError, LocalFetcher, load_boot_config};
pub use console::{CharDevice, ConsoleRing, HostConsole};
pub use machine::Machine;
pub use scheduler::{Session, SliceOutcome};
pub use storage::{BlockMode, BlockStorage, FileDisk, SECTOR_SIZE, StorageError};
