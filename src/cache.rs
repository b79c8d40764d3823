//! The write-back sector cache (spec §4.1). A bounded set of slots, each
//! holding one sector plus a short-lived metadata lock (guarding `sector`,
//! `dirty`, and LRU membership) kept deliberately separate from the
//! reader/writer lock guarding the slot's data, per the design notes in
//! spec §9. This mirrors the teacher's `bio.rs` buffer cache (`BufEntry` /
//! `Bcache`, an `MruArena` of slots with a `SleepLock`-guarded payload) but
//! trades the kernel's arena/branded-lifetime machinery for plain
//! `Arc`/`Mutex`/`Condvar`, since this crate runs on a host that already
//! provides real threads and blocking locks.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::{BlockDevice, SectorId};
use crate::param::SECTOR_SIZE;

struct SlotMeta {
    sector: Option<SectorId>,
    dirty: bool,
}

struct RwState {
    readers: u32,
    writer: bool,
}

/// One cache slot: a sector's worth of data plus the bookkeeping spec §3
/// requires.
struct CacheSlot {
    meta: Mutex<SlotMeta>,
    rw: Mutex<RwState>,
    cv: Condvar,
    data: std::cell::UnsafeCell<[u8; SECTOR_SIZE]>,
}

// SAFETY: `data` is only ever read or written while the accessor holds a
// `ReadGuard` or `WriteGuard`, which are only handed out while the `rw`
// reader/writer discipline guarantees exclusive (write) or shared (read)
// access, so concurrent accessors never alias mutably.
unsafe impl Sync for CacheSlot {}

impl CacheSlot {
    fn new() -> Self {
        Self {
            meta: Mutex::new(SlotMeta {
                sector: None,
                dirty: false,
            }),
            rw: Mutex::new(RwState {
                readers: 0,
                writer: false,
            }),
            cv: Condvar::new(),
            data: std::cell::UnsafeCell::new([0u8; SECTOR_SIZE]),
        }
    }

    /// Blocking acquire: waits while a writer holds the slot.
    fn lock_read(&self) -> ReadGuard<'_> {
        let mut state = self.rw.lock().unwrap();
        while state.writer {
            state = self.cv.wait(state).unwrap();
        }
        state.readers += 1;
        ReadGuard { slot: self }
    }

    /// Blocking acquire: waits while a writer holds the slot or any reader
    /// is active.
    fn lock_write(&self) -> WriteGuard<'_> {
        let mut state = self.rw.lock().unwrap();
        while state.writer || state.readers > 0 {
            state = self.cv.wait(state).unwrap();
        }
        state.writer = true;
        WriteGuard { slot: self }
    }

    /// Non-blocking: succeeds only if the slot is wholly idle (no readers,
    /// no writer), used by eviction and write-back, which must never block
    /// on an in-use slot.
    fn try_lock_write(&self) -> bool {
        let mut state = self.rw.lock().unwrap();
        if state.writer || state.readers > 0 {
            false
        } else {
            state.writer = true;
            true
        }
    }

    fn unlock_read(&self) {
        let mut state = self.rw.lock().unwrap();
        state.readers -= 1;
        if state.readers == 0 {
            self.cv.notify_all();
        }
    }

    fn unlock_write(&self) {
        let mut state = self.rw.lock().unwrap();
        state.writer = false;
        self.cv.notify_all();
    }

    fn reader_count(&self) -> u32 {
        self.rw.lock().unwrap().readers
    }

    fn is_writer_locked(&self) -> bool {
        self.rw.lock().unwrap().writer
    }
}

struct ReadGuard<'a> {
    slot: &'a CacheSlot,
}

impl std::ops::Deref for ReadGuard<'_> {
    type Target = [u8; SECTOR_SIZE];
    fn deref(&self) -> &Self::Target {
        // SAFETY: a read guard exists, so no writer can be active.
        unsafe { &*self.slot.data.get() }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.slot.unlock_read();
    }
}

struct WriteGuard<'a> {
    slot: &'a CacheSlot,
}

impl std::ops::Deref for WriteGuard<'_> {
    type Target = [u8; SECTOR_SIZE];
    fn deref(&self) -> &Self::Target {
        // SAFETY: a write guard is exclusive.
        unsafe { &*self.slot.data.get() }
    }
}

impl std::ops::DerefMut for WriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: a write guard is exclusive.
        unsafe { &mut *self.slot.data.get() }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.slot.unlock_write();
    }
}

struct CacheInner {
    device: Arc<dyn BlockDevice>,
    slots: Vec<CacheSlot>,
    /// MRU at the front, LRU at the back. Always holds every slot index
    /// exactly once (spec §3 invariant 4), whether or not the slot is
    /// currently occupied.
    lru: Mutex<VecDeque<usize>>,
    shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
}

impl CacheInner {
    fn find_slot(&self, sector: SectorId) -> Option<usize> {
        for (idx, slot) in self.slots.iter().enumerate() {
            let meta = slot.meta.lock().unwrap();
            if meta.sector == Some(sector) {
                return Some(idx);
            }
        }
        None
    }

    fn touch_mru(&self, idx: usize) {
        let mut lru = self.lru.lock().unwrap();
        lru.retain(|&x| x != idx);
        lru.push_front(idx);
    }

    fn touch_lru(&self, idx: usize) {
        let mut lru = self.lru.lock().unwrap();
        lru.retain(|&x| x != idx);
        lru.push_back(idx);
    }

    /// Writes back a dirty slot (if force, regardless of current holders;
    /// otherwise only if idle) and marks it free. Returns whether the slot
    /// ended up free as a result of this call.
    fn force_one(&self, idx: usize, force: bool) -> bool {
        let slot = &self.slots[idx];
        let mut meta = slot.meta.lock().unwrap();
        if meta.sector.is_none() {
            return false;
        }
        if force {
            // Shutdown-only: caller guarantees quiescence, so we don't wait
            // for anyone to release the slot.
            let mut rw = slot.rw.lock().unwrap();
            rw.writer = true;
            rw.readers = 0;
        } else if !slot.try_lock_write() {
            return false;
        }
        let sector = meta.sector.unwrap();
        if meta.dirty {
            // SAFETY: we hold exclusive (writer) access to the slot.
            let data = unsafe { &*slot.data.get() };
            self.device.write(sector, data);
            meta.dirty = false;
        }
        meta.sector = None;
        drop(meta);
        slot.unlock_write();
        self.touch_lru(idx);
        true
    }

    fn evict_one(&self) -> bool {
        let tail = match self.lru.lock().unwrap().back().copied() {
            Some(idx) => idx,
            None => return false,
        };
        self.force_one(tail, false)
    }

    /// Claims a free slot for `sector`, evicting if necessary, and returns it
    /// already write-locked. Blocks (yielding between attempts) until a slot
    /// becomes available. The write lock is acquired while `meta` is still
    /// held, so `sector` is never visible to a concurrent `find_slot` without
    /// the slot already being exclusively locked: a racing `read_sector`/
    /// `write_sector` that matches this slot blocks on the rw-lock until the
    /// caller's load has filled it in, instead of observing unloaded bytes.
    fn get_free_for(&self, sector: SectorId) -> (usize, WriteGuard<'_>) {
        loop {
            for (idx, slot) in self.slots.iter().enumerate() {
                if let Ok(mut meta) = slot.meta.try_lock() {
                    if meta.sector.is_none() {
                        meta.sector = Some(sector);
                        meta.dirty = false;
                        let guard = slot.lock_write();
                        drop(meta);
                        self.touch_mru(idx);
                        return (idx, guard);
                    }
                }
            }
            if !self.evict_one() {
                thread::yield_now();
            }
        }
    }

    fn write_back_pass(&self) {
        for slot in &self.slots {
            let sector = {
                let meta = slot.meta.lock().unwrap();
                match (meta.sector, meta.dirty) {
                    (Some(s), true) => s,
                    _ => continue,
                }
            };
            if !slot.try_lock_write() {
                // Busy right now; the next period will catch it.
                continue;
            }
            let mut meta = slot.meta.lock().unwrap();
            if meta.sector == Some(sector) && meta.dirty {
                // SAFETY: we hold exclusive access to the slot.
                let data = unsafe { &*slot.data.get() };
                self.device.write(sector, data);
                meta.dirty = false;
            }
            drop(meta);
            slot.unlock_write();
        }
    }
}

/// The bounded, write-back sector cache fronting a `BlockDevice` (spec
/// §4.1).
pub struct SectorCache {
    inner: Arc<CacheInner>,
    writeback_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SectorCache {
    /// Creates a cache of `capacity` slots over `device`, with a background
    /// write-back task waking every `interval`.
    pub fn new(device: Arc<dyn BlockDevice>, capacity: usize, interval: Duration) -> Self {
        let slots = (0..capacity).map(|_| CacheSlot::new()).collect();
        let inner = Arc::new(CacheInner {
            device,
            slots,
            lru: Mutex::new((0..capacity).collect()),
            shutdown: Mutex::new(false),
            shutdown_cv: Condvar::new(),
        });

        let bg = Arc::clone(&inner);
        let writeback_thread = thread::spawn(move || loop {
            let guard = bg.shutdown.lock().unwrap();
            let (guard, _) = bg
                .shutdown_cv
                .wait_timeout(guard, interval)
                .unwrap();
            let should_stop = *guard;
            drop(guard);
            bg.write_back_pass();
            if should_stop {
                break;
            }
        });

        Self {
            inner,
            writeback_thread: Mutex::new(Some(writeback_thread)),
        }
    }

    /// Copies the current contents of `sector` into `out`. Loads the sector
    /// if it is not resident, and may trigger read-ahead of `sector + 1`.
    pub fn read_sector(&self, sector: SectorId, out: &mut [u8]) {
        loop {
            if let Some(idx) = self.inner.find_slot(sector) {
                let guard = self.inner.slots[idx].lock_read();
                let still_matches = {
                    let meta = self.inner.slots[idx].meta.lock().unwrap();
                    meta.sector == Some(sector)
                };
                if !still_matches {
                    // Re-purposed between the scan and the lock: treat as a
                    // miss and retry from scratch.
                    drop(guard);
                    continue;
                }
                out[..SECTOR_SIZE].copy_from_slice(&*guard);
                drop(guard);
                self.inner.touch_mru(idx);
                return;
            }
            self.load_block(sector);
        }
    }

    /// Copies `data` into the resident slot for `sector` (loading it first
    /// if necessary) and marks it dirty.
    pub fn write_sector(&self, sector: SectorId, data: &[u8]) {
        loop {
            if let Some(idx) = self.inner.find_slot(sector) {
                let mut guard = self.inner.slots[idx].lock_write();
                let still_matches = {
                    let meta = self.inner.slots[idx].meta.lock().unwrap();
                    meta.sector == Some(sector)
                };
                if !still_matches {
                    drop(guard);
                    continue;
                }
                guard[..SECTOR_SIZE].copy_from_slice(&data[..SECTOR_SIZE]);
                drop(guard);
                {
                    let mut meta = self.inner.slots[idx].meta.lock().unwrap();
                    meta.dirty = true;
                }
                self.inner.touch_mru(idx);
                return;
            }
            self.load_block(sector);
        }
    }

    /// Writes every dirty slot back and resets every slot to empty. Called
    /// at shutdown only (spec §4.1).
    pub fn flush(&self) {
        for idx in 0..self.inner.slots.len() {
            loop {
                if self.inner.force_one(idx, true) {
                    break;
                }
                // `force_one` only fails to make progress if the slot was
                // already free; nothing further to do for this slot.
                let meta = self.inner.slots[idx].meta.lock().unwrap();
                if meta.sector.is_none() {
                    break;
                }
            }
        }
    }

    fn load_block(&self, sector: SectorId) {
        let (idx, mut guard) = self.inner.get_free_for(sector);
        self.inner.device.read(sector, &mut *guard);
        drop(guard);
        self.inner.touch_mru(idx);
        log::trace!("cache: loaded sector {sector} into slot {idx}");
        self.spawn_read_ahead(sector.wrapping_add(1));
    }

    /// Spawns a read-ahead task for `target` and blocks until it has
    /// reserved its slot (or decided there is nothing to do), closing the
    /// race where a concurrent `read_sector(target)` would otherwise race
    /// the read-ahead task's own `get_free_for`. A rendezvous channel
    /// (`sync_channel(0)`) plays the role of the one-shot semaphore in
    /// spec §9's design notes. The slot is already write-locked by the time
    /// the rendezvous fires, so a concurrent `read_sector(target)` that
    /// matches the reserved slot blocks on the rw-lock rather than reading
    /// it before the device read below has filled it in.
    fn spawn_read_ahead(&self, target: SectorId) {
        let (tx, rx) = mpsc::sync_channel::<()>(0);
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            if inner.find_slot(target).is_some() || target as u64 >= inner.device.sector_count() {
                let _ = tx.send(());
                return;
            }
            let (idx, mut guard) = inner.get_free_for(target);
            let _ = tx.send(());
            inner.device.read(target, &mut *guard);
            drop(guard);
            inner.touch_mru(idx);
            log::trace!("cache: read-ahead loaded sector {target} into slot {idx}");
        });
        let _ = rx.recv();
    }

    /// Stops the background write-back task, blocking until it has exited.
    /// Does not flush; callers wanting a clean shutdown should call
    /// `flush()` first, per spec §5's shutdown sequence.
    pub fn shutdown(&self) {
        {
            let mut stop = self.inner.shutdown.lock().unwrap();
            *stop = true;
        }
        self.inner.shutdown_cv.notify_all();
        if let Some(handle) = self.writeback_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Number of resident (occupied) slots, for tests.
    pub fn resident_count(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|s| s.meta.lock().unwrap().sector.is_some())
            .count()
    }

    /// The sectors currently resident, for invariant tests (spec §8
    /// property 4 and scenario S7).
    pub fn resident_sectors(&self) -> Vec<SectorId> {
        self.inner
            .slots
            .iter()
            .filter_map(|s| s.meta.lock().unwrap().sector)
            .collect()
    }

    /// Checks that no slot simultaneously holds a writer and a positive
    /// reader count, for invariant tests (spec §8 property 4).
    pub fn check_rw_invariant(&self) -> bool {
        self.inner
            .slots
            .iter()
            .all(|s| !(s.is_writer_locked() && s.reader_count() > 0))
    }
}

impl Drop for SectorCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}
