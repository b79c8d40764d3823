//! `mkfs`: the CLI surface spec §6 names — a `-f` (format) option that
//! creates the free-map placeholder and the root directory on a disk
//! image. A thin wrapper over the public API, the way the teacher's own
//! binaries (`kernel_main.rs`, `main.rs`) are thin wrappers over `fs::fs()`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use indexfs::alloc::BitmapAllocator;
use indexfs::cache::SectorCache;
use indexfs::device::FileBlockDevice;
use indexfs::param::{BOOT_SECTOR, FREE_MAP_SECTOR, MAX_CACHE_SIZE, ROOT_DIR_SECTOR, WRITE_BACK_INTERVAL};
use indexfs::path::FileSystem;

#[derive(Parser)]
#[command(name = "mkfs", about = "Format or inspect an indexfs disk image")]
struct Args {
    /// Path to the disk image.
    image: PathBuf,

    /// Format the image: create the free-map and root directory.
    #[arg(short = 'f', long = "format")]
    format: bool,

    /// Number of sectors in a freshly created image (only used with -f on
    /// an image that does not yet exist).
    #[arg(long = "sectors", default_value_t = 8192)]
    sectors: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let device = if args.format && !args.image.exists() {
        FileBlockDevice::create(&args.image, args.sectors).expect("create disk image")
    } else {
        FileBlockDevice::open(&args.image).expect("open disk image")
    };
    let sector_count = device.sector_count();
    let device: Arc<dyn indexfs::device::BlockDevice> = Arc::new(device);

    let cache = Arc::new(SectorCache::new(Arc::clone(&device), MAX_CACHE_SIZE, WRITE_BACK_INTERVAL));
    let allocator = Arc::new(BitmapAllocator::new(0, sector_count as u32));
    allocator.reserve(BOOT_SECTOR, 1);
    allocator.reserve(FREE_MAP_SECTOR, 1);
    allocator.reserve(ROOT_DIR_SECTOR, 1);

    if args.format {
        let fs = FileSystem::format(Arc::clone(&cache), allocator).expect("format");
        let root = fs.open_root();
        fs.close(root);
        log::info!("formatted {} ({} sectors)", args.image.display(), sector_count);
    }

    cache.flush();
    cache.shutdown();
}
