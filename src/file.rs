//! The file handle (spec §4.5): a cursor over an open inode, translating
//! byte-range reads/writes into `InodeHandle::{read_at, write_at}` and
//! tracking per-handle write denial. Grounded on the teacher's `file.rs`
//! (`File` wrapping an `RcInode` plus an offset cell), narrowed to the one
//! file type this core has (no pipes, no devices).

use crate::error::FsResult;
use crate::inode::InodeHandle;
use crate::path::FileSystem;

/// `{ inode, pos, deny_write }` (spec §4.5).
pub struct File {
    inode: InodeHandle,
    pos: u64,
    deny_write: bool,
}

impl File {
    /// Opens `inode` as a file handle positioned at the start. `deny_write`
    /// mirrors the loader's use of `InodeHandle::deny_write` to keep a
    /// running executable from being modified (spec §4.2).
    pub fn new(inode: InodeHandle, deny_write: bool) -> Self {
        if deny_write {
            inode.deny_write();
        }
        Self {
            inode,
            pos: 0,
            deny_write,
        }
    }

    pub fn inumber(&self) -> u32 {
        self.inode.inumber()
    }

    pub fn is_dir(&self) -> bool {
        self.inode.is_dir()
    }

    pub fn length(&self) -> u64 {
        self.inode.length()
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// `read(n)` (spec §4.5): reads up to `buf.len()` bytes starting at the
    /// cursor, advances the cursor by the amount actually read.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.inode.read_at(buf, self.pos);
        self.pos += n as u64;
        n
    }

    /// `write(n)` (spec §4.5): writes `buf` at the cursor, advances it by
    /// the amount actually written (zero if writes are currently denied).
    pub fn write(&mut self, buf: &[u8]) -> FsResult<usize> {
        let n = self.inode.write_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// On close: if `deny_write` was set, lift it, then hand the inode back
    /// to the store (spec §4.5).
    pub fn close(self, fs: &FileSystem) {
        if self.deny_write {
            self.inode.allow_write();
        }
        fs.close(self.inode);
    }
}
