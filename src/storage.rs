//! Sector-addressable block storage with selectable persistence semantics.
//!
//! A guest block device is backed by a flat image file: contiguous 512-byte
//! sectors, no header. Three modes are supported:
//!
//! - [`BlockMode::ReadOnly`]: writes always fail, the image is never touched.
//! - [`BlockMode::ReadWrite`]: writes go straight to the image file.
//! - [`BlockMode::Snapshot`]: copy-on-write: writes land in a sparse
//!   in-memory overlay keyed by sector index and die with the process, so any
//!   number of sessions can share one base image without interfering.
//!
//! All offsets are sector-aligned; the sector count is fixed when the device
//! is opened and derived from the actual file length.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

/// Fixed addressable unit of block storage, in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Persistence semantics of an open block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    ReadOnly,
    ReadWrite,
    Snapshot,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("write to read-only block device")]
    ReadOnly,

    #[error("sector range {start}+{sectors} exceeds device size of {sector_count} sectors")]
    OutOfRange {
        start: u64,
        sectors: u64,
        sector_count: u64,
    },

    #[error("buffer length {0} is not a multiple of the 512-byte sector size")]
    UnalignedBuffer(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Sector-granular storage as seen by the machine's block device model.
///
/// Buffer lengths carry the transfer size: a call moves
/// `buf.len() / SECTOR_SIZE` sectors starting at `start`.
pub trait BlockStorage {
    fn sector_count(&self) -> u64;

    /// All-or-nothing: on failure `out` holds no partial image data.
    fn read_sectors(&mut self, start: u64, out: &mut [u8]) -> Result<(), StorageError>;

    /// No partial mutation: a failed call leaves every prior sector intact.
    fn write_sectors(&mut self, start: u64, data: &[u8]) -> Result<(), StorageError>;
}

/// A block device over a flat image file, with an optional copy-on-write
/// overlay in [`BlockMode::Snapshot`].
pub struct FileDisk {
    file: File,
    mode: BlockMode,
    sector_count: u64,
    /// Sparse sector → contents map, used only in Snapshot mode. An entry
    /// means the sector diverged from the base image during this session.
    overlay: HashMap<u64, Box<[u8; SECTOR_SIZE]>>,
}

impl FileDisk {
    /// Open `path` with the requested persistence mode.
    ///
    /// ReadWrite requires an existing file openable for writing; ReadOnly and
    /// Snapshot only need read access. The sector count is the file length
    /// divided by [`SECTOR_SIZE`] (a trailing partial sector is not
    /// addressable).
    pub fn open(path: &Path, mode: BlockMode) -> Result<Self, StorageError> {
        let file = match mode {
            BlockMode::ReadOnly | BlockMode::Snapshot => {
                OpenOptions::new().read(true).open(path)?
            }
            BlockMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path)?,
        };
        let sector_count = file.metadata()?.len() / SECTOR_SIZE as u64;
        debug!(path = %path.display(), ?mode, sector_count, "opened block image");
        Ok(Self {
            file,
            mode,
            sector_count,
            overlay: HashMap::new(),
        })
    }

    pub fn mode(&self) -> BlockMode {
        self.mode
    }

    /// Number of sectors that diverged from the base image (Snapshot mode;
    /// always zero otherwise).
    pub fn diverged_sectors(&self) -> usize {
        self.overlay.len()
    }

    fn check_range(&self, start: u64, sectors: u64) -> Result<(), StorageError> {
        let fits = start
            .checked_add(sectors)
            .is_some_and(|end| end <= self.sector_count);
        if fits {
            Ok(())
        } else {
            Err(StorageError::OutOfRange {
                start,
                sectors,
                sector_count: self.sector_count,
            })
        }
    }
}

fn byte_offset(sector: u64) -> u64 {
    sector * SECTOR_SIZE as u64
}

fn sector_span(buf_len: usize) -> Result<u64, StorageError> {
    if buf_len % SECTOR_SIZE != 0 {
        return Err(StorageError::UnalignedBuffer(buf_len));
    }
    Ok((buf_len / SECTOR_SIZE) as u64)
}

impl BlockStorage for FileDisk {
    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read_sectors(&mut self, start: u64, out: &mut [u8]) -> Result<(), StorageError> {
        let sectors = sector_span(out.len())?;
        self.check_range(start, sectors)?;

        match self.mode {
            BlockMode::ReadOnly | BlockMode::ReadWrite => {
                if let Err(e) = self.file.read_exact_at(out, byte_offset(start)) {
                    out.fill(0);
                    return Err(e.into());
                }
            }
            BlockMode::Snapshot => {
                // Sector-by-sector: overlay hits are memory copies, misses
                // fall back to small unbuffered reads of the base image.
                for i in 0..out.len() / SECTOR_SIZE {
                    let sector = start + i as u64;
                    let span = i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE;
                    match self.overlay.get(&sector) {
                        Some(entry) => out[span].copy_from_slice(&entry[..]),
                        None => {
                            if let Err(e) =
                                self.file.read_exact_at(&mut out[span], byte_offset(sector))
                            {
                                out.fill(0);
                                return Err(e.into());
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn write_sectors(&mut self, start: u64, data: &[u8]) -> Result<(), StorageError> {
        let sectors = sector_span(data.len())?;

        match self.mode {
            BlockMode::ReadOnly => Err(StorageError::ReadOnly),
            BlockMode::ReadWrite => {
                self.check_range(start, sectors)?;
                self.file.write_all_at(data, byte_offset(start))?;
                Ok(())
            }
            BlockMode::Snapshot => {
                // Bounds check precedes any overlay mutation so a range
                // failure leaves every sector untouched.
                self.check_range(start, sectors)?;
                for (i, chunk) in data.chunks_exact(SECTOR_SIZE).enumerate() {
                    let sector = start + i as u64;
                    let entry = self
                        .overlay
                        .entry(sector)
                        .or_insert_with(|| Box::new([0u8; SECTOR_SIZE]));
                    entry.copy_from_slice(chunk);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Write a temp image of `sectors` sectors where sector `i` is filled
    /// with the byte `i as u8`.
    fn image(sectors: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("temp image");
        for i in 0..sectors {
            f.write_all(&[i as u8; SECTOR_SIZE]).expect("fill sector");
        }
        f.flush().expect("flush image");
        f
    }

    #[test]
    fn sector_count_comes_from_file_length() {
        let img = image(8);
        let disk = FileDisk::open(img.path(), BlockMode::ReadOnly).unwrap();
        assert_eq!(disk.sector_count(), 8);
    }

    #[test]
    fn trailing_partial_sector_is_not_addressable() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; SECTOR_SIZE * 3 + 100]).unwrap();
        f.flush().unwrap();
        let disk = FileDisk::open(f.path(), BlockMode::ReadOnly).unwrap();
        assert_eq!(disk.sector_count(), 3);
    }

    #[test]
    fn read_write_mode_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.img");
        let result = FileDisk::open(&missing, BlockMode::ReadWrite);
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn snapshot_writes_shadow_the_base_image() {
        let img = image(8);
        let mut disk = FileDisk::open(img.path(), BlockMode::Snapshot).unwrap();

        let payload = [0xABu8; SECTOR_SIZE * 2];
        disk.write_sectors(3, &payload).unwrap();
        assert_eq!(disk.diverged_sectors(), 2);

        // The written sectors read back the new bytes, a neighbour reads the
        // base image.
        let mut buf = [0u8; SECTOR_SIZE * 3];
        disk.read_sectors(3, &mut buf).unwrap();
        assert_eq!(&buf[..SECTOR_SIZE * 2], &payload[..]);
        assert!(buf[SECTOR_SIZE * 2..].iter().all(|&b| b == 5));

        // A fresh ReadOnly open of the same file sees the original bytes.
        let mut fresh = FileDisk::open(img.path(), BlockMode::ReadOnly).unwrap();
        let mut orig = [0u8; SECTOR_SIZE];
        fresh.read_sectors(3, &mut orig).unwrap();
        assert!(orig.iter().all(|&b| b == 3));
    }

    #[test]
    fn read_write_mode_persists_across_reopen() {
        let img = image(4);
        let payload = [0x5Au8; SECTOR_SIZE];
        {
            let mut disk = FileDisk::open(img.path(), BlockMode::ReadWrite).unwrap();
            disk.write_sectors(2, &payload).unwrap();
        }
        let mut disk = FileDisk::open(img.path(), BlockMode::ReadWrite).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sectors(2, &mut buf).unwrap();
        assert_eq!(buf, payload);
    }

    #[test]
    fn read_only_write_fails_and_image_is_unchanged() {
        let img = image(4);
        let mut disk = FileDisk::open(img.path(), BlockMode::ReadOnly).unwrap();

        let result = disk.write_sectors(0, &[0xFFu8; SECTOR_SIZE]);
        assert!(matches!(result, Err(StorageError::ReadOnly)));

        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sectors(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn snapshot_out_of_range_write_leaves_overlay_untouched() {
        let img = image(4);
        let mut disk = FileDisk::open(img.path(), BlockMode::Snapshot).unwrap();

        // 2 + 3 > 4: must fail before any sector is copied.
        let result = disk.write_sectors(2, &[0u8; SECTOR_SIZE * 3]);
        assert!(matches!(result, Err(StorageError::OutOfRange { .. })));
        assert_eq!(disk.diverged_sectors(), 0);
    }

    #[test]
    fn unaligned_buffer_is_rejected_before_io() {
        let img = image(4);
        let mut disk = FileDisk::open(img.path(), BlockMode::ReadWrite).unwrap();

        let mut buf = [0u8; 100];
        assert!(matches!(
            disk.read_sectors(0, &mut buf),
            Err(StorageError::UnalignedBuffer(100))
        ));
        assert!(matches!(
            disk.write_sectors(0, &buf),
            Err(StorageError::UnalignedBuffer(100))
        ));
    }

    #[test]
    fn out_of_range_read_is_rejected() {
        let img = image(4);
        let mut disk = FileDisk::open(img.path(), BlockMode::ReadOnly).unwrap();
        let mut buf = [0u8; SECTOR_SIZE * 2];
        assert!(matches!(
            disk.read_sectors(3, &mut buf),
            Err(StorageError::OutOfRange { .. })
        ));
    }
}
