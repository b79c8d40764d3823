//! Core constants. Named and sized the way the on-disk layout (§3 of the
//! spec) requires; defaults for the cache live here too, the way the teacher
//! groups its tunables in one constants module.

use std::time::Duration;

/// Bytes per sector / block.
pub const SECTOR_SIZE: usize = 512;

/// Sentinel meaning "no sector".
pub const NIL: u32 = u32::MAX;

/// Maximum length of a single path component, not counting the NUL
/// terminator.
pub const NAME_MAX: usize = 14;

/// Number of direct data-sector pointers in an inode.
pub const DIRECT_CNT: usize = 10;

/// Number of indirect-block pointers in an inode.
pub const INDIRECT_CNT: usize = 10;

/// Number of sector pointers packed into one indirect or double-indirect
/// block (each pointer is a 4-byte `SectorId`).
pub const PTRS_PER_BLOCK: usize = 128;

/// Bytes reachable through the direct pointers alone.
pub const DIRECT_BYTES: u64 = (DIRECT_CNT * SECTOR_SIZE) as u64;

/// Bytes reachable through direct + indirect pointers.
pub const INDIRECT_BYTES: u64 =
    DIRECT_BYTES + (INDIRECT_CNT * PTRS_PER_BLOCK * SECTOR_SIZE) as u64;

/// Bytes reachable through direct + indirect + double-indirect pointers:
/// the largest file this layout can address.
pub const MAX_FILE_BYTES: u64 =
    INDIRECT_BYTES + (PTRS_PER_BLOCK * PTRS_PER_BLOCK * SECTOR_SIZE) as u64;

/// Data-sector index at which the double-indirect block takes over, i.e.
/// `DIRECT_CNT + INDIRECT_CNT * PTRS_PER_BLOCK`.
pub const DOUBLE_INDIRECT_START_SECTOR: usize = DIRECT_CNT + INDIRECT_CNT * PTRS_PER_BLOCK;

/// Fixed magic stamped into every on-disk inode for sanity checking.
pub const INODE_MAGIC: u32 = 0x494e4f44;

/// Default number of resident cache slots.
pub const MAX_CACHE_SIZE: usize = 64;

/// Default period of the background write-back task.
pub const WRITE_BACK_INTERVAL: Duration = Duration::from_secs(10);

/// Well-known inode sector of the free-map.
pub const FREE_MAP_SECTOR: u32 = 1;

/// Well-known inode sector of the root directory.
pub const ROOT_DIR_SECTOR: u32 = 2;

/// Reserved boot sector.
pub const BOOT_SECTOR: u32 = 0;

/// Initial directory entry capacity of a freshly created directory, as
/// opposed to the root (see `ROOT_DIR_INITIAL_ENTRIES`).
pub const DIR_INITIAL_ENTRIES: usize = 4;

/// Initial directory entry capacity of the root directory.
pub const ROOT_DIR_INITIAL_ENTRIES: usize = 16;
