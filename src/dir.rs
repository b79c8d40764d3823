//! Directories (spec §4.3): a directory is exactly an inode whose data is
//! packed with fixed-size entry records. Grounded on the teacher's
//! `fs/ufs/inode.rs` `Dirent`/`dirlookup`/`dirlink` (`AsBytes`/`FromBytes`
//! record, linear scan, reuse of a freed slot before appending), extended
//! with the `remove`-rejects-non-empty rule spec §9 calls out as stricter
//! than the source.

use zerocopy::{AsBytes, FromBytes};

use crate::device::SectorId;
use crate::error::{FsError, FsResult};
use crate::inode::{InodeHandle, InodeStore};
use crate::param::NAME_MAX;

/// One directory entry: `{in_use, inode_sector, name}` (spec §3).
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct DirEntry {
    inode_sector: u32,
    in_use: u8,
    name: [u8; NAME_MAX + 1],
}

/// Byte size of one packed directory entry record, exposed so the path
/// resolver can size a freshly-created directory's initial capacity.
pub const DIR_ENTRY_SIZE: usize = std::mem::size_of::<DirEntry>();

impl DirEntry {
    const SIZE: usize = std::mem::size_of::<Self>();

    fn empty() -> Self {
        Self {
            inode_sector: 0,
            in_use: 0,
            name: [0; NAME_MAX + 1],
        }
    }

    fn occupied(sector: SectorId, name: &str) -> Self {
        debug_assert!(name.len() <= NAME_MAX);
        let mut bytes = [0u8; NAME_MAX + 1];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            inode_sector: sector,
            in_use: 1,
            name: bytes,
        }
    }

    fn is_in_use(&self) -> bool {
        self.in_use != 0
    }

    fn name_str(&self) -> &str {
        let nul = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..nul]).expect("directory entry name is not valid UTF-8")
    }
}

/// A directory: an inode handle plus the entry-level operations of spec
/// §4.3.
pub struct Directory {
    inode: InodeHandle,
}

impl Directory {
    /// Wraps an inode handle known to be a directory (`parent_dir != NIL`).
    pub fn new(inode: InodeHandle) -> Self {
        assert!(inode.is_dir(), "Directory::new on a non-directory inode");
        Self { inode }
    }

    pub fn inode(&self) -> &InodeHandle {
        &self.inode
    }

    /// Consumes this view and returns the underlying inode handle, for
    /// callers that need to close it themselves.
    pub fn inode_handle(self) -> InodeHandle {
        self.inode
    }

    pub fn inumber(&self) -> SectorId {
        self.inode.inumber()
    }

    pub fn parent_sector(&self) -> SectorId {
        self.inode.parent()
    }

    fn entry_count(&self) -> usize {
        self.inode.length() as usize / DirEntry::SIZE
    }

    fn read_entry(&self, idx: usize) -> DirEntry {
        let mut buf = [0u8; DirEntry::SIZE];
        let n = self.inode.read_at(&mut buf, (idx * DirEntry::SIZE) as u64);
        assert_eq!(n, DirEntry::SIZE, "short read of a directory entry");
        DirEntry::read_from(&buf[..]).expect("directory entry does not decode")
    }

    fn write_entry(&self, idx: usize, entry: &DirEntry) -> FsResult<()> {
        self.inode.write_at(entry.as_bytes(), (idx * DirEntry::SIZE) as u64)?;
        Ok(())
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        (0..self.entry_count()).find(|&idx| {
            let e = self.read_entry(idx);
            e.is_in_use() && e.name_str() == name
        })
    }

    /// `lookup(dir, name)` (spec §4.3): linear scan for an in-use entry
    /// named `name`.
    pub fn lookup(&self, name: &str) -> Option<SectorId> {
        self.find_index(name).map(|idx| self.read_entry(idx).inode_sector)
    }

    /// `add(dir, name, sector)` (spec §4.3): rejects duplicates and names
    /// over `NAME_MAX`; reuses a freed slot if one exists, else appends.
    pub fn add(&self, name: &str, sector: SectorId) -> FsResult<()> {
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        if self.lookup(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let count = self.entry_count();
        for idx in 0..count {
            if !self.read_entry(idx).is_in_use() {
                return self.write_entry(idx, &DirEntry::occupied(sector, name));
            }
        }
        self.write_entry(count, &DirEntry::occupied(sector, name))
    }

    /// `remove(dir, name)` (spec §4.3, §9): marks the entry free and tells
    /// `store` to remove the child inode. Refuses to remove a directory
    /// that still has in-use entries of its own.
    pub fn remove(&self, name: &str, store: &InodeStore) -> FsResult<()> {
        let idx = self.find_index(name).ok_or(FsError::NotFound)?;
        let entry = self.read_entry(idx);
        let child = store.open(entry.inode_sector);

        if child.is_dir() {
            let child_dir = Directory::new(store.reopen(&child));
            if child_dir.readdir().next().is_some() {
                store.close(child_dir.inode);
                store.close(child);
                return Err(FsError::DirectoryNotEmpty);
            }
        }

        self.write_entry(idx, &DirEntry::empty())?;
        store.remove(&child);
        store.close(child);
        Ok(())
    }

    /// `readdir(dir)` (spec §4.3): the stored in-use entries, in array
    /// order. `.` and `..` are never part of this — they are synthesized
    /// by the path resolver, never stored (spec §9).
    pub fn readdir(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.entry_count()).filter_map(|idx| {
            let e = self.read_entry(idx);
            e.is_in_use().then(|| e.name_str().to_string())
        })
    }
}
