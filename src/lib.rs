//! Indexed-inode file-system core: a bounded write-back sector cache and a
//! growable-file directory tree over a block device.
//!
//! This crate implements only the CORE: the sector cache (`cache`) and the
//! multi-level indexed inode layer (`inode`, `dir`, `path`, `file`). The
//! block device, free-sector allocator, and thread runtime are external
//! collaborators, represented here as the `device::BlockDevice` and
//! `alloc::Allocator` trait seams; the runtime capability is realized
//! directly as `std::thread`/`Mutex`/`Condvar`, since this crate runs on a
//! host that already provides one.

pub mod alloc;
pub mod cache;
pub mod device;
pub mod dir;
pub mod error;
pub mod file;
pub mod inode;
pub mod param;
pub mod path;
