//! On-disk inode and index-block layout (spec §3), and the pure block-map
//! arithmetic over them (spec §4.2). Modeled the way the teacher's
//! `fs/ufs/inode.rs` models `Dinode`/`Dirent`: `#[repr(C)]` structs deriving
//! `AsBytes`/`FromBytes` so a sector's worth of bytes can be reinterpreted
//! in place, with no separate (de)serialization step.

use std::mem;

use zerocopy::{AsBytes, FromBytes};

use crate::param::{
    DIRECT_CNT, INDIRECT_CNT, INODE_MAGIC, MAX_FILE_BYTES, NIL, PTRS_PER_BLOCK, SECTOR_SIZE,
};

/// On-disk inode: exactly one sector (spec §3), padded out to `SECTOR_SIZE`.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, Debug)]
pub struct InodeDisk {
    pub length: i32,
    pub magic: u32,
    /// Inode sector of the parent directory; `NIL` means "this is a
    /// regular file", the one field carrying the directory/file
    /// distinction (spec §3, §9).
    pub parent_dir: u32,
    pub direct: [u32; DIRECT_CNT],
    pub indirect: [u32; INDIRECT_CNT],
    pub double_indirect: u32,
    _reserved: [u8; InodeDisk::PAD_LEN],
}

impl InodeDisk {
    const PAD_LEN: usize = SECTOR_SIZE
        - (4 + 4 + 4 + DIRECT_CNT * 4 + INDIRECT_CNT * 4 + 4);

    /// A freshly-formatted inode: zero length, all block-map entries `NIL`.
    pub fn empty(parent_dir: u32) -> Self {
        Self {
            length: 0,
            magic: INODE_MAGIC,
            parent_dir,
            direct: [NIL; DIRECT_CNT],
            indirect: [NIL; INDIRECT_CNT],
            double_indirect: NIL,
            _reserved: [0; Self::PAD_LEN],
        }
    }

    pub fn is_dir(&self) -> bool {
        self.parent_dir != NIL
    }

    /// Reads one sector's worth of bytes as an `InodeDisk`. Panics (fatal
    /// per spec §7) if the magic doesn't match: that means either on-disk
    /// corruption or a bug in the core, neither of which callers can
    /// meaningfully recover from.
    pub fn from_sector(sector_id: u32, buf: &[u8]) -> Self {
        let disk = Self::read_from(&buf[..mem::size_of::<Self>()])
            .expect("inode sector does not decode as InodeDisk");
        if disk.magic != INODE_MAGIC {
            log::error!("inode at sector {sector_id}: magic mismatch, on-disk corruption");
            panic!("inode at sector {sector_id}: magic mismatch, on-disk corruption");
        }
        if disk.length < 0 || disk.length as u64 > MAX_FILE_BYTES {
            log::error!(
                "inode at sector {sector_id}: length {} exceeds the addressable maximum, on-disk corruption",
                disk.length
            );
            panic!(
                "inode at sector {sector_id}: length {} exceeds the addressable maximum",
                disk.length
            );
        }
        disk
    }

    pub fn to_sector(&self, buf: &mut [u8; SECTOR_SIZE]) {
        buf[..mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
    }
}

static_assertions::const_assert!(mem::size_of::<InodeDisk>() == SECTOR_SIZE);

/// One indirect block: 128 direct sector pointers (spec §3).
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, Debug)]
pub struct IndirectBlock {
    pub direct: [u32; PTRS_PER_BLOCK],
}

impl IndirectBlock {
    pub fn empty() -> Self {
        Self {
            direct: [NIL; PTRS_PER_BLOCK],
        }
    }

    pub fn from_sector(buf: &[u8]) -> Self {
        Self::read_from(&buf[..mem::size_of::<Self>()]).expect("indirect block does not decode")
    }

    pub fn to_sector(&self, buf: &mut [u8; SECTOR_SIZE]) {
        buf[..mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
    }
}

static_assertions::const_assert!(mem::size_of::<IndirectBlock>() == SECTOR_SIZE);

/// The doubly-indirect block: 128 pointers to indirect blocks (spec §3).
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, Debug)]
pub struct DoubleIndirectBlock {
    pub indirect: [u32; PTRS_PER_BLOCK],
}

impl DoubleIndirectBlock {
    pub fn empty() -> Self {
        Self {
            indirect: [NIL; PTRS_PER_BLOCK],
        }
    }

    pub fn from_sector(buf: &[u8]) -> Self {
        Self::read_from(&buf[..mem::size_of::<Self>()]).expect("double-indirect block does not decode")
    }

    pub fn to_sector(&self, buf: &mut [u8; SECTOR_SIZE]) {
        buf[..mem::size_of::<Self>()].copy_from_slice(self.as_bytes());
    }
}

static_assertions::const_assert!(mem::size_of::<DoubleIndirectBlock>() == SECTOR_SIZE);

/// Rounds a byte length up to a whole number of sectors.
pub fn bytes_to_sectors(length: u64) -> usize {
    ((length + SECTOR_SIZE as u64 - 1) / SECTOR_SIZE as u64) as usize
}

/// Sector-index boundary at which the indirect region ends and the
/// doubly-indirect region begins.
pub const INDIRECT_REGION_END: usize = DIRECT_CNT + INDIRECT_CNT * PTRS_PER_BLOCK;
