//! Integration tests against the public API: the universal properties and
//! the seeded scenarios.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use indexfs::alloc::{Allocator, BitmapAllocator};
use indexfs::cache::SectorCache;
use indexfs::device::MemBlockDevice;
use indexfs::error::FsError;
use indexfs::param::{BOOT_SECTOR, FREE_MAP_SECTOR, ROOT_DIR_SECTOR};
use indexfs::path::{Cwd, FileSystem};

static LOG_INIT: Once = Once::new();

fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A freshly formatted file system over an in-memory device, with a large
/// write-back interval so background flushing never interferes with a
/// test's own `flush()` calls.
fn new_fs(sectors: u64) -> (Arc<SectorCache>, Arc<BitmapAllocator>, FileSystem) {
    init_logging();
    let device: Arc<dyn indexfs::device::BlockDevice> = Arc::new(MemBlockDevice::new(sectors));
    let cache = Arc::new(SectorCache::new(
        Arc::clone(&device),
        64,
        Duration::from_secs(3600),
    ));
    let allocator = Arc::new(BitmapAllocator::new(0, sectors as u32));
    allocator.reserve(BOOT_SECTOR, 1);
    allocator.reserve(FREE_MAP_SECTOR, 1);
    allocator.reserve(ROOT_DIR_SECTOR, 1);
    let fs = FileSystem::format(Arc::clone(&cache), Arc::clone(&allocator) as Arc<dyn Allocator>).unwrap();
    (cache, allocator, fs)
}

#[test]
fn s1_small_file() {
    let (_cache, _alloc, fs) = new_fs(4096);
    let mut cwd = Cwd::at_root(&fs);

    fs.create("/a", cwd.handle(), 0, false).unwrap();
    let inode = fs.open("/a", cwd.handle()).unwrap();
    let mut file = indexfs::file::File::new(inode, false);

    file.write(b"hello world").unwrap();
    file.seek(0);
    let mut buf = [0u8; 11];
    let n = file.read(&mut buf);
    assert_eq!(n, 11);
    assert_eq!(&buf, b"hello world");
    assert_eq!(file.length(), 11);

    file.close(&fs);
    cwd.close(&fs);
}

#[test]
fn s2_sparse_growth() {
    let (_cache, _alloc, fs) = new_fs(4096);
    let cwd = Cwd::at_root(&fs);

    fs.create("/b", cwd.handle(), 0, false).unwrap();
    let inode = fs.open("/b", cwd.handle()).unwrap();
    let mut file = indexfs::file::File::new(inode, false);

    file.seek(10_000);
    file.write(&[0x42]).unwrap();
    assert_eq!(file.length(), 10_001);

    let mut byte = [0xffu8; 1];
    file.seek(5_000);
    assert_eq!(file.read(&mut byte), 1);
    assert_eq!(byte[0], 0x00);

    file.seek(10_000);
    assert_eq!(file.read(&mut byte), 1);
    assert_eq!(byte[0], 0x42);

    file.close(&fs);
    cwd.close(&fs);
}

#[test]
fn s3_indirect_crossing() {
    let (_cache, _alloc, fs) = new_fs(8192);
    let cwd = Cwd::at_root(&fs);

    fs.create("/c", cwd.handle(), 0, false).unwrap();
    let inode = fs.open("/c", cwd.handle()).unwrap();
    let mut file = indexfs::file::File::new(inode, false);

    let pattern: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
    file.write(&pattern).unwrap();

    let mut readback = vec![0u8; pattern.len()];
    file.seek(0);
    let n = file.read(&mut readback);
    assert_eq!(n, pattern.len());
    assert_eq!(readback, pattern);
    assert_eq!(readback[6000], (6000u32 % 251) as u8);

    file.close(&fs);
    cwd.close(&fs);
}

#[test]
fn s4_double_indirect_crossing() {
    let (_cache, _alloc, fs) = new_fs(16384);
    let cwd = Cwd::at_root(&fs);

    fs.create("/d", cwd.handle(), 0, false).unwrap();
    let inode = fs.open("/d", cwd.handle()).unwrap();
    let mut file = indexfs::file::File::new(inode, false);

    file.seek(700_000);
    file.write(&[0x7a]).unwrap();

    let mut byte = [0u8; 1];
    file.seek(700_000);
    assert_eq!(file.read(&mut byte), 1);
    assert_eq!(byte[0], 0x7a);

    file.seek(660_000);
    assert_eq!(file.read(&mut byte), 1);
    assert_eq!(byte[0], 0x00);

    file.close(&fs);
    cwd.close(&fs);
}

#[test]
fn s5_directory_ops() {
    let (_cache, _alloc, fs) = new_fs(4096);
    let cwd = Cwd::at_root(&fs);

    fs.create("/x", cwd.handle(), 0, true).unwrap();
    fs.create("/x/y", cwd.handle(), 0, false).unwrap();

    let x_inode = fs.open("/x", cwd.handle()).unwrap();
    let x_dir = indexfs::dir::Directory::new(x_inode);
    let names: Vec<String> = x_dir.readdir().collect();
    assert_eq!(names, vec!["y".to_string()]);

    assert_eq!(fs.remove("/x", cwd.handle()), Err(FsError::DirectoryNotEmpty));

    fs.remove("/x/y", cwd.handle()).unwrap();
    fs.remove("/x", cwd.handle()).unwrap();

    fs.close(x_dir.inode_handle());
    cwd.close(&fs);
}

#[test]
fn s6_persistence_across_flush() {
    let (cache, _alloc, fs) = new_fs(4096);
    let cwd = Cwd::at_root(&fs);

    fs.create("/a", cwd.handle(), 0, false).unwrap();
    let inode = fs.open("/a", cwd.handle()).unwrap();
    let mut file = indexfs::file::File::new(inode, false);
    file.write(b"hello world").unwrap();
    file.close(&fs);

    cache.flush();

    let inode = fs.open("/a", cwd.handle()).unwrap();
    let mut file = indexfs::file::File::new(inode, false);
    let mut buf = [0u8; 11];
    assert_eq!(file.read(&mut buf), 11);
    assert_eq!(&buf, b"hello world");
    file.close(&fs);

    cwd.close(&fs);
}

#[test]
fn s7_cache_shape() {
    let (cache, _alloc, _fs) = new_fs(200);
    for sector in 0..100u32 {
        let mut buf = [0u8; 512];
        cache.read_sector(sector, &mut buf);
    }
    // Read-ahead means the exact resident set can run slightly ahead of the
    // last sector explicitly read, but it never exceeds the configured
    // capacity and always contains the most recently touched sectors.
    let resident = cache.resident_sectors();
    assert!(resident.len() <= 64);
    assert!(resident.contains(&99));
    assert!(cache.check_rw_invariant());
}

#[test]
fn property_allocator_balance() {
    let (_cache, alloc, fs) = new_fs(4096);
    let before = alloc.free_count();
    let cwd = Cwd::at_root(&fs);

    fs.create("/tmp", cwd.handle(), 4096, false).unwrap();
    fs.remove("/tmp", cwd.handle()).unwrap();

    assert_eq!(alloc.free_count(), before);
    cwd.close(&fs);
}

#[test]
fn property_directory_uniqueness() {
    let (_cache, _alloc, fs) = new_fs(4096);
    let cwd = Cwd::at_root(&fs);

    fs.create("/dup", cwd.handle(), 0, false).unwrap();
    assert_eq!(
        fs.create("/dup", cwd.handle(), 0, false),
        Err(FsError::AlreadyExists)
    );
    fs.remove("/dup", cwd.handle()).unwrap();
    fs.create("/dup", cwd.handle(), 0, false).unwrap();
    fs.remove("/dup", cwd.handle()).unwrap();

    cwd.close(&fs);
}

#[test]
fn property_path_semantics() {
    let (_cache, _alloc, fs) = new_fs(4096);
    let cwd = Cwd::at_root(&fs);

    fs.create("/a", cwd.handle(), 0, true).unwrap();
    fs.create("/a/b", cwd.handle(), 0, false).unwrap();

    let abs = fs.open("/a/b", cwd.handle()).unwrap();
    let rel = fs.open("a/b", cwd.handle()).unwrap();
    assert_eq!(abs.inumber(), rel.inumber());
    fs.close(abs);
    fs.close(rel);

    let dotted = fs.open("/a/./b", cwd.handle()).unwrap();
    assert_eq!(dotted.inumber(), rel.inumber());
    fs.close(dotted);

    fs.create("/a/c", cwd.handle(), 0, true).unwrap();
    let dotdot = fs.open("/a/c/..", cwd.handle()).unwrap();
    let a_dir = fs.open("/a", cwd.handle()).unwrap();
    assert_eq!(dotdot.inumber(), a_dir.inumber());
    fs.close(dotdot);
    fs.close(a_dir);

    let root_via_dotdot = fs.open("/..", cwd.handle()).unwrap();
    let root = fs.open_root();
    assert_eq!(root_via_dotdot.inumber(), root.inumber());
    fs.close(root_via_dotdot);
    fs.close(root);

    cwd.close(&fs);
}

#[test]
fn property_open_identity() {
    let (_cache, _alloc, fs) = new_fs(4096);
    let cwd = Cwd::at_root(&fs);

    fs.create("/shared", cwd.handle(), 0, false).unwrap();
    let a = fs.open("/shared", cwd.handle()).unwrap();
    let b = fs.open("/shared", cwd.handle()).unwrap();
    assert_eq!(a.inumber(), b.inumber());

    let file_a = indexfs::file::File::new(a, false);
    let mut writer = file_a;
    writer.write(b"abc").unwrap();

    // `b` shares the same underlying inode state, so its view of length is
    // immediately up to date.
    assert_eq!(b.length(), 3);

    writer.close(&fs);
    fs.close(b);
    cwd.close(&fs);
}

#[test]
fn property_idempotent_flush() {
    let (cache, _alloc, fs) = new_fs(4096);
    let cwd = Cwd::at_root(&fs);

    fs.create("/f", cwd.handle(), 0, false).unwrap();
    let inode = fs.open("/f", cwd.handle()).unwrap();
    let mut file = indexfs::file::File::new(inode, false);
    file.write(b"flush me twice").unwrap();
    file.close(&fs);

    cache.flush();
    cache.flush();

    let inode = fs.open("/f", cwd.handle()).unwrap();
    let mut file = indexfs::file::File::new(inode, false);
    let mut buf = [0u8; 14];
    assert_eq!(file.read(&mut buf), 14);
    assert_eq!(&buf, b"flush me twice");
    file.close(&fs);

    cwd.close(&fs);
}

#[test]
fn concurrency_disjoint_sectors_never_corrupt() {
    let (cache, _alloc, _fs) = new_fs(256);
    let stop = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0u32..8)
        .map(|thread_idx| {
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let sector = 10 + thread_idx;
                let mut iterations = 0;
                while !stop.load(Ordering::Relaxed) && iterations < 200 {
                    let mut buf = [thread_idx as u8; 512];
                    cache.write_sector(sector, &buf);
                    cache.read_sector(sector, &mut buf);
                    assert!(buf.iter().all(|&b| b == thread_idx as u8));
                    iterations += 1;
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(cache.check_rw_invariant());
}

#[test]
fn concurrency_reader_never_sees_torn_write() {
    let (cache, _alloc, _fs) = new_fs(256);
    let sector = 5;
    cache.write_sector(sector, &[0u8; 512]);

    let writer_cache = Arc::clone(&cache);
    let writer = thread::spawn(move || {
        for round in 0..100u8 {
            writer_cache.write_sector(sector, &[round; 512]);
        }
    });

    let reader_cache = Arc::clone(&cache);
    let reader = thread::spawn(move || {
        for _ in 0..100 {
            let mut buf = [0u8; 512];
            reader_cache.read_sector(sector, &mut buf);
            let first = buf[0];
            assert!(buf.iter().all(|&b| b == first), "torn read observed");
        }
    });

    writer.join().unwrap();
    reader.join().unwrap();
}
