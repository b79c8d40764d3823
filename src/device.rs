//! The block device capability (spec §1, §6). Out of core scope in the
//! production sense — a real driver lives elsewhere — but the core needs
//! *some* concrete implementation to run against in tests and the `mkfs`
//! binary, the same way the teacher's `virtio_disk.rs` is the concrete
//! backing for its abstract `hal().disk()` seam.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use crate::param::SECTOR_SIZE;

/// Identifies one fixed-size sector on a `BlockDevice`.
pub type SectorId = u32;

/// Synchronous, infallible-from-the-core's-perspective block I/O.
///
/// Device failure is assumed not to occur (spec §7); an implementation that
/// hits a real I/O error should panic rather than return it, since the core
/// has no representation for "the device is gone".
pub trait BlockDevice: Send + Sync {
    /// Reads sector `sector` into `buf`, which is exactly `SECTOR_SIZE` bytes.
    fn read(&self, sector: SectorId, buf: &mut [u8]);

    /// Writes `buf` (exactly `SECTOR_SIZE` bytes) to sector `sector`.
    fn write(&self, sector: SectorId, buf: &[u8]);

    /// Total number of addressable sectors on the device.
    fn sector_count(&self) -> u64;
}

/// An in-memory block device, used by tests and as the default backing for
/// `mkfs` when asked to create a fresh image.
pub struct MemBlockDevice {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
    /// Total reads observed, for cache-shape tests (spec §8 S7).
    read_count: std::sync::atomic::AtomicU64,
}

impl MemBlockDevice {
    pub fn new(sector_count: u64) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; sector_count as usize]),
            read_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Number of `read` calls observed since creation.
    pub fn read_count(&self) -> u64 {
        self.read_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl BlockDevice for MemBlockDevice {
    fn read(&self, sector: SectorId, buf: &mut [u8]) {
        self.read_count
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let sectors = self.sectors.lock().unwrap();
        let slot = sectors
            .get(sector as usize)
            .unwrap_or_else(|| panic!("read: sector {sector} out of range"));
        buf[..SECTOR_SIZE].copy_from_slice(slot);
    }

    fn write(&self, sector: SectorId, buf: &[u8]) {
        let mut sectors = self.sectors.lock().unwrap();
        let slot = sectors
            .get_mut(sector as usize)
            .unwrap_or_else(|| panic!("write: sector {sector} out of range"));
        slot.copy_from_slice(&buf[..SECTOR_SIZE]);
    }

    fn sector_count(&self) -> u64 {
        self.sectors.lock().unwrap().len() as u64
    }
}

/// A block device backed by a regular file, one sector per `SECTOR_SIZE`
/// bytes, used by the `mkfs` binary to operate on a real disk image.
pub struct FileBlockDevice {
    file: Mutex<File>,
    sector_count: u64,
}

impl FileBlockDevice {
    /// Opens an existing disk image and uses its current length to derive
    /// the sector count (must be a multiple of `SECTOR_SIZE`).
    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        assert_eq!(
            len as usize % SECTOR_SIZE,
            0,
            "disk image length must be a multiple of the sector size"
        );
        Ok(Self {
            file: Mutex::new(file),
            sector_count: len / SECTOR_SIZE as u64,
        })
    }

    /// Creates a new zero-filled disk image of `sector_count` sectors.
    pub fn create(path: &std::path::Path, sector_count: u64) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(sector_count * SECTOR_SIZE as u64)?;
        Ok(Self {
            file: Mutex::new(file),
            sector_count,
        })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read(&self, sector: SectorId, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .expect("seek for read");
        file.read_exact(&mut buf[..SECTOR_SIZE]).expect("read");
    }

    fn write(&self, sector: SectorId, buf: &[u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .expect("seek for write");
        file.write_all(&buf[..SECTOR_SIZE]).expect("write");
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }
}
