//! Path resolution and the file-system façade (spec §4.4): the entry point
//! the syscall layer calls. Grounded on the teacher's `fs/inode.rs`
//! (`Itable::namex`, the absolute-vs-relative / `skipelem` walk) and on
//! Pintos's `filesys.c` `dir_of_name`, which resolves the same way from
//! either the root or `thread_current()->current_dir`.

use std::sync::Arc;

use crate::alloc::Allocator;
use crate::cache::SectorCache;
use crate::device::SectorId;
use crate::dir::{Directory, DIR_ENTRY_SIZE};
use crate::error::{FsError, FsResult};
use crate::inode::{InodeHandle, InodeStore};
use crate::param::{DIR_INITIAL_ENTRIES, NAME_MAX, NIL, ROOT_DIR_INITIAL_ENTRIES, ROOT_DIR_SECTOR};

/// Splits off the next `/`-separated component, skipping empty ones from
/// `//` or a leading/trailing `/`. Returns `None` once nothing is left.
/// Mirrors the teacher's `fs/path.rs` `skipelem`, generalized from a
/// fixed-length `FileName` to an owned `&str` slice (spec §9: "do not
/// mutate the input buffer in place; take an owned string").
fn skip_elem(path: &str) -> Option<(&str, &str)> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    match path.find('/') {
        Some(i) => Some((&path[..i], &path[i + 1..])),
        None => Some((path, "")),
    }
}

/// The file-system façade (spec §4.4): owns the cache, allocator, and
/// inode store, and exposes the path-based operations the syscall layer
/// is a thin wrapper over.
pub struct FileSystem {
    allocator: Arc<dyn Allocator>,
    inodes: InodeStore,
}

impl FileSystem {
    pub fn new(cache: Arc<SectorCache>, allocator: Arc<dyn Allocator>) -> Self {
        let inodes = InodeStore::new(cache, Arc::clone(&allocator));
        Self { allocator, inodes }
    }

    /// Formats a fresh image (spec §6's `-f` option): creates the free-map
    /// placeholder inode and the root directory (capacity 16 entries,
    /// `parent = self`). The free map's actual bits live in the `Allocator`
    /// capability, out of core scope; the on-disk inode here exists only
    /// to occupy `FREE_MAP_SECTOR` per the fixed layout (spec §6).
    pub fn format(cache: Arc<SectorCache>, allocator: Arc<dyn Allocator>) -> FsResult<Self> {
        let fs = Self::new(cache, allocator);
        let free_map = fs.inodes.create(crate::param::FREE_MAP_SECTOR, 0, NIL)?;
        fs.inodes.close(free_map);
        let root_len = (ROOT_DIR_INITIAL_ENTRIES * DIR_ENTRY_SIZE) as u64;
        let root = fs.inodes.create(ROOT_DIR_SECTOR, root_len, ROOT_DIR_SECTOR)?;
        fs.inodes.close(root);
        Ok(fs)
    }

    pub fn open_root(&self) -> InodeHandle {
        self.inodes.open(ROOT_DIR_SECTOR)
    }

    pub fn close(&self, handle: InodeHandle) {
        self.inodes.close(handle);
    }

    /// One step of a path walk: resolves `name` within directory `cur`,
    /// honoring `.` and `..` (spec §4.4).
    fn step(&self, cur: &InodeHandle, name: &str) -> FsResult<InodeHandle> {
        if !cur.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if name == "." {
            return Ok(self.inodes.reopen(cur));
        }
        if name == ".." {
            return Ok(if cur.inumber() == ROOT_DIR_SECTOR {
                self.inodes.reopen(cur)
            } else {
                self.inodes.open(cur.parent())
            });
        }
        let dir = Directory::new(self.inodes.reopen(cur));
        let sector = dir.lookup(name).ok_or(FsError::NotFound)?;
        Ok(self.inodes.open(sector))
    }

    /// `dir_of(path)` (spec §4.4): walks every component but the last,
    /// starting at the root for an absolute path or `cwd` for a relative
    /// one. Returns the containing directory's inode and the final
    /// component (which the caller interprets: as a name to create, a name
    /// to look up, or `.`/`..` to resolve specially).
    fn dir_of<'a>(&self, path: &'a str, cwd: &InodeHandle) -> FsResult<(InodeHandle, &'a str)> {
        let (mut name, mut rest) = skip_elem(path).ok_or(FsError::BadPath)?;
        let mut cur = if path.starts_with('/') {
            self.open_root()
        } else {
            self.inodes.reopen(cwd)
        };
        loop {
            match skip_elem(rest) {
                None => return Ok((cur, name)),
                Some((next_name, next_rest)) => {
                    cur = self.step(&cur, name)?;
                    name = next_name;
                    rest = next_rest;
                }
            }
        }
    }

    /// `create(path, size, is_dir)` (spec §4.4).
    pub fn create(&self, path: &str, cwd: &InodeHandle, size: u64, is_dir: bool) -> FsResult<()> {
        let (dir_inode, name) = self.dir_of(path, cwd)?;
        if name.is_empty() || name == "." || name == ".." {
            self.inodes.close(dir_inode);
            return Err(FsError::BadPath);
        }
        if name.len() > NAME_MAX {
            self.inodes.close(dir_inode);
            return Err(FsError::NameTooLong);
        }
        if !dir_inode.is_dir() {
            self.inodes.close(dir_inode);
            return Err(FsError::NotADirectory);
        }
        let dir = Directory::new(dir_inode);

        let sector = match self.allocator.allocate(1) {
            Some(s) => s,
            None => {
                self.inodes.close(dir.inode_handle());
                return Err(FsError::NoSpace);
            }
        };

        let created = if is_dir {
            self.inodes
                .create(sector, (DIR_INITIAL_ENTRIES * DIR_ENTRY_SIZE) as u64, dir.inumber())
        } else {
            self.inodes.create(sector, size, NIL)
        };
        let handle = match created {
            Ok(h) => h,
            Err(e) => {
                self.allocator.release(sector, 1);
                self.inodes.close(dir.inode_handle());
                return Err(e);
            }
        };

        if let Err(e) = dir.add(name, sector) {
            self.inodes.remove(&handle);
            self.inodes.close(handle);
            self.inodes.close(dir.inode_handle());
            return Err(e);
        }
        self.inodes.close(handle);
        self.inodes.close(dir.inode_handle());
        Ok(())
    }

    /// `open(path)` (spec §4.4): `.`/`..` at the final component return the
    /// directory itself or its parent.
    pub fn open(&self, path: &str, cwd: &InodeHandle) -> FsResult<InodeHandle> {
        let (dir_inode, name) = self.dir_of(path, cwd)?;
        if name == "." {
            return Ok(dir_inode);
        }
        if name == ".." {
            let parent = if dir_inode.inumber() == ROOT_DIR_SECTOR {
                dir_inode.inumber()
            } else {
                dir_inode.parent()
            };
            self.inodes.close(dir_inode);
            return Ok(self.inodes.open(parent));
        }
        if !dir_inode.is_dir() {
            self.inodes.close(dir_inode);
            return Err(FsError::NotADirectory);
        }
        let dir = Directory::new(dir_inode);
        let result = dir
            .lookup(name)
            .map(|sector| self.inodes.open(sector))
            .ok_or(FsError::NotFound);
        self.inodes.close(dir.inode_handle());
        result
    }

    /// `remove(path)` (spec §4.4): disallows removing `.`, `..`, or a
    /// non-empty directory (the latter enforced by `Directory::remove`).
    pub fn remove(&self, path: &str, cwd: &InodeHandle) -> FsResult<()> {
        let (dir_inode, name) = self.dir_of(path, cwd)?;
        if name.is_empty() || name == "." || name == ".." {
            self.inodes.close(dir_inode);
            return Err(FsError::BadPath);
        }
        let dir = Directory::new(dir_inode);
        let result = dir.remove(name, &self.inodes);
        self.inodes.close(dir.inode_handle());
        result
    }

    /// `chdir(path)` (spec §4.4): resolves to a directory; the caller
    /// (`Cwd`) is responsible for closing its previous handle.
    pub fn chdir(&self, path: &str, cwd: &InodeHandle) -> FsResult<InodeHandle> {
        let target = self.open(path, cwd)?;
        if !target.is_dir() {
            self.inodes.close(target);
            return Err(FsError::NotADirectory);
        }
        Ok(target)
    }

    pub fn root_sector(&self) -> SectorId {
        ROOT_DIR_SECTOR
    }
}

/// A caller's current-directory handle (spec §4.4, §5: "a per-caller inode
/// handle"). Replaces and closes the previous handle on `chdir`.
pub struct Cwd {
    handle: InodeHandle,
}

impl Cwd {
    pub fn at_root(fs: &FileSystem) -> Self {
        Self { handle: fs.open_root() }
    }

    pub fn handle(&self) -> &InodeHandle {
        &self.handle
    }

    pub fn chdir(&mut self, fs: &FileSystem, path: &str) -> FsResult<()> {
        let new_handle = fs.chdir(path, &self.handle)?;
        let old = std::mem::replace(&mut self.handle, new_handle);
        fs.close(old);
        Ok(())
    }

    pub fn close(self, fs: &FileSystem) {
        fs.close(self.handle);
    }
}
