// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::Arc,
    time::Instant,
};

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use parking_lot::FairMutex;
use tracing::{debug, trace};

use crate::{
    block::{Block, BlockFile},
    stream::{PackExt, StreamKey},
};

mod clock;
mod entry;
mod metrics;
mod table;

pub mod config;

pub use config::{error, Config, WaitObserver};
pub use metrics::StatsView;

use clock::Clock;
use entry::{Entry, Payload};
use table::{Node, Table};

/// The process-wide cache instance.
///
/// Replacing it via [`reconfigure`] is atomic; readers that obtained the old
/// instance keep operating on it until they drop their handle, after which
/// its entries are released like any other memory.
static INSTANCE: Lazy<ArcSwap<BlockCache>> = Lazy::new(|| {
    let cache = BlockCache::new(Config::default()).expect("default configuration is valid");
    ArcSwap::from_pointee(cache)
});

pub fn instance() -> Arc<BlockCache> {
    INSTANCE.load_full()
}

pub fn reconfigure(config: Config) -> Result<(), error::Configuration> {
    let cache = BlockCache::new(config)?;
    INSTANCE.store(Arc::new(cache));
    Ok(())
}

/// The artifact and size estimate a ref loader hands back to the cache. The
/// size is charged against the byte ceiling for as long as the artifact
/// stays cached.
pub struct Loaded<T> {
    pub value: T,
    pub size: u64,
}

/// Caller-visible handle onto a cached ref entry.
///
/// The handle pins the entry, not the artifact: after an eviction
/// [`Handle::get`] returns `None` and the caller is expected to load again
/// through the cache.
pub struct Handle<T> {
    entry: Arc<Entry>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Handle<T>
where
    T: Send + Sync + 'static,
{
    fn new(entry: Arc<Entry>) -> Self {
        Self {
            entry,
            _marker: PhantomData,
        }
    }

    /// The cached artifact, or `None` once evicted (or if the entry was
    /// populated under this key with a different type). Marks the entry hot.
    pub fn get(&self) -> Option<Arc<T>> {
        self.entry.get().and_then(|payload| payload.downcast::<T>())
    }

    pub fn has(&self) -> bool {
        !self.entry.is_stale()
    }

    pub fn key(&self) -> &StreamKey {
        self.entry.key()
    }

    pub fn position(&self) -> u64 {
        self.entry.position()
    }

    pub fn size(&self) -> u64 {
        self.entry.size()
    }
}

/// Block cache between a git object storage layer and the DFS holding its
/// packfiles.
///
/// Many small random reads are smoothed into block-sized DFS reads, and
/// parsed pack-auxiliary artifacts (indexes, bitmaps, commit graphs) are held
/// so repeated lookups do not re-read and re-parse large files.
///
/// Lookups are lock-free: a hit costs a bucket head load, a short chain
/// walk and one payload load. Misses serialize per key on a fixed array of
/// fair stripe locks, so for any one key at most a single loader runs no
/// matter how many threads miss at once; the rest block, re-check, and hit.
/// Memory is bounded by a byte ceiling enforced by a second-chance (clock)
/// sweep over all live entries — an approximation of LRU that costs nothing
/// on the hit path beyond flipping a hotness counter.
pub struct BlockCache {
    table: Table,
    load_locks: Box<[FairMutex<()>]>,
    ref_locks: Box<[FairMutex<()>]>,
    clock: FairMutex<Clock>,
    stats: metrics::Stats,
    block_size: usize,
    block_size_shift: u32,
    max_bytes: u64,
    max_stream_through: u64,
    hot_max: HashMap<PackExt, u32>,
    ref_lock_wait: Option<WaitObserver>,
}

const DEFAULT_HOT_MAX: u32 = 1;

impl BlockCache {
    pub fn new(config: Config) -> Result<Self, error::Configuration> {
        config.validate()?;
        let Config {
            block_size,
            block_limit,
            concurrency_level,
            stream_ratio,
            cache_hot_max,
            ref_lock_wait,
        } = config;

        let table_size =
            (5 * (block_limit / block_size as u64) / 2).min(i32::max_value() as u64) as usize;
        debug!(
            "dfs block cache: {} byte blocks, {} byte ceiling, {} table slots",
            block_size, block_limit, table_size
        );

        Ok(Self {
            table: Table::new(table_size, block_size.trailing_zeros()),
            load_locks: locks(concurrency_level),
            ref_locks: locks(concurrency_level),
            clock: FairMutex::new(Clock::new()),
            stats: metrics::Stats::new(),
            block_size,
            block_size_shift: block_size.trailing_zeros(),
            max_bytes: block_limit,
            max_stream_through: (block_limit as f64 * stream_ratio) as u64,
            hot_max: cache_hot_max,
            ref_lock_wait,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// True iff a stream of `length` bytes is small enough to be read
    /// through the cache instead of streamed around it.
    pub fn should_copy_through_cache(&self, length: u64) -> bool {
        length <= self.max_stream_through
    }

    /// The block covering `position` of `file`, read through the cache.
    ///
    /// On a miss the stripe lock for the aligned position is taken, the
    /// lookup is repeated, and only a confirmed miss invokes
    /// [`BlockFile::read_block`]. Loader errors surface verbatim with the
    /// byte reservation rolled back; the key is not poisoned, the next
    /// caller simply tries again.
    ///
    /// A file may answer with a block starting before the aligned position
    /// (its native block size turned out smaller than configured). Such a
    /// block is cached as read, and the lookup recurses on the original
    /// position; the file's alignment is stable after that first read, so
    /// the recursion terminates.
    pub fn get_or_load_block<F>(&self, file: &F, position: u64) -> Result<Arc<Block>, F::Error>
    where
        F: BlockFile,
    {
        let requested = position;
        let key = file.stream();
        let aligned = file.align(position);

        let mut slot = self.table.slot(key, aligned);
        let e1 = self.table.head(slot);
        if let Some(v) = scan_block(&e1, key, aligned) {
            if v.contains(key, requested) {
                self.stats.record_hit(key.ext());
                return Ok(v);
            }
        }

        self.reserve_space(self.block_size as u64, key);

        let block;
        {
            let _load = self.load_lock(key, aligned).lock();

            let mut e2 = self.table.head(slot);
            if !table::same(&e2, &e1) {
                if let Some(v) = scan_block(&e2, key, aligned) {
                    self.stats.record_hit(key.ext());
                    self.credit_space(self.block_size as u64, key);
                    return Ok(v);
                }
            }

            self.stats.record_miss(key.ext());
            let loaded = match file.read_block(aligned) {
                Ok(block) => block,
                Err(e) => {
                    self.credit_space(self.block_size as u64, key);
                    return Err(e);
                },
            };

            let mut position = aligned;
            if loaded.start() != position {
                // The file discovered its native block size and adjusted.
                position = loaded.start();
                slot = self.table.slot(key, position);
                e2 = self.table.head(slot);
            }

            let v = Arc::new(loaded);
            let entry = Arc::new(Entry::new(
                key.clone(),
                position,
                v.len() as u64,
                self.hot_limit(key.ext()),
                Payload::Block(v.clone()),
            ));
            self.table.install(slot, e2, entry.clone());
            self.add_to_clock(entry, self.block_size as i64 - v.len() as i64);
            block = v;
        }

        if block.contains(key, requested) {
            return Ok(block);
        }
        self.get_or_load_block(file, requested)
    }

    /// The parsed artifact for `key`, loading and caching it on a miss.
    ///
    /// The loader supplies the artifact's size estimate, so the byte
    /// reservation happens after the load rather than before it. A loader
    /// error leaves no trace in the cache.
    pub fn get_or_load_ref<T, E, F>(
        &self,
        key: &StreamKey,
        position: u64,
        loader: F,
    ) -> Result<Handle<T>, E>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<Loaded<T>, E>,
    {
        let slot = self.table.slot(key, position);
        let e1 = self.table.head(slot);
        if let Some(entry) = Table::scan(&e1, key, position) {
            if entry.get().is_some() {
                self.stats.record_hit(key.ext());
                return Ok(Handle::new(entry));
            }
        }

        let lock = self.ref_lock(key);
        let waited = Instant::now();
        let _ref_lock = lock.lock();

        let e2 = self.table.head(slot);
        if !table::same(&e2, &e1) {
            if let Some(entry) = Table::scan(&e2, key, position) {
                if entry.get().is_some() {
                    self.stats.record_hit(key.ext());
                    return Ok(Handle::new(entry));
                }
            }
        }

        if let Some(observe) = &self.ref_lock_wait {
            observe(waited.elapsed());
        }

        self.stats.record_miss(key.ext());
        let Loaded { value, size } = loader()?;
        let entry = Arc::new(Entry::new(
            key.clone(),
            position,
            size,
            self.hot_limit(key.ext()),
            Payload::Ref(Arc::new(value)),
        ));
        entry.mark_hotter();
        // The size was unknown before the load; reserve now, evicting
        // whatever it takes to make room.
        self.reserve_space(size, key);
        self.table.install(slot, e2, entry.clone());
        self.add_to_clock(entry.clone(), 0);
        Ok(Handle::new(entry))
    }

    /// Cache a block obtained outside the load path, e.g. written by the
    /// inserter before it ever hits the DFS. Idempotent: if an equivalent
    /// live block is already cached, that one is kept and returned.
    pub fn put(&self, block: Block) -> Arc<Block> {
        let key = block.stream().clone();
        let start = block.start();
        let size = block.len() as u64;
        let v = Arc::new(block);
        let entry = self.put_entry(&key, start, size, Payload::Block(v.clone()), false);
        entry.peek().and_then(|p| p.as_block()).unwrap_or(v)
    }

    /// Cache a preloaded artifact under `key` at position 0.
    pub fn put_ref<T>(&self, key: &StreamKey, size: u64, value: T) -> Handle<T>
    where
        T: Send + Sync + 'static,
    {
        Handle::new(self.put_entry(key, 0, size, Payload::Ref(Arc::new(value)), true))
    }

    fn put_entry(
        &self,
        key: &StreamKey,
        position: u64,
        size: u64,
        value: Payload,
        hot: bool,
    ) -> Arc<Entry> {
        let slot = self.table.slot(key, position);
        let e1 = self.table.head(slot);
        if let Some(entry) = Table::scan(&e1, key, position) {
            if entry.get().is_some() {
                return entry;
            }
        }

        self.reserve_space(size, key);
        let _load = self.load_lock(key, position).lock();

        let e2 = self.table.head(slot);
        if !table::same(&e2, &e1) {
            if let Some(entry) = Table::scan(&e2, key, position) {
                if entry.get().is_some() {
                    self.credit_space(size, key);
                    return entry;
                }
            }
        }

        let entry = Arc::new(Entry::new(
            key.clone(),
            position,
            size,
            self.hot_limit(key.ext()),
            value,
        ));
        if hot {
            entry.mark_hotter();
        }
        self.table.install(slot, e2, entry.clone());
        self.add_to_clock(entry.clone(), 0);
        entry
    }

    /// Existence probe. Does not count as an access: neither the hit/miss
    /// counters nor the entry's hotness are touched.
    pub fn contains(&self, key: &StreamKey, position: u64) -> bool {
        let head = self.table.head(self.table.slot(key, position));
        Table::scan(&head, key, position).is_some()
    }

    /// The cached block covering exactly `(key, position)`, if any. Counts
    /// as an access.
    pub fn get_block(&self, key: &StreamKey, position: u64) -> Option<Arc<Block>> {
        let head = self.table.head(self.table.slot(key, position));
        let v = Table::scan(&head, key, position)
            .and_then(|entry| entry.get())
            .and_then(|payload| payload.as_block());
        match &v {
            Some(_) => self.stats.record_hit(key.ext()),
            None => self.stats.record_miss(key.ext()),
        }
        v
    }

    /// The cached artifact for `key`, if any. Counts as an access.
    pub fn get_ref<T>(&self, key: &StreamKey) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let head = self.table.head(self.table.slot(key, 0));
        let v = Table::scan(&head, key, 0)
            .and_then(|entry| entry.get())
            .and_then(|payload| payload.downcast::<T>());
        match &v {
            Some(_) => self.stats.record_hit(key.ext()),
            None => self.stats.record_miss(key.ext()),
        }
        v
    }

    /// True iff the block at position 0 of `key` is cached. Small artifacts
    /// probe this before deciding to read through the block path.
    pub fn has_block_0(&self, key: &StreamKey) -> bool {
        let head = self.table.head(self.table.slot(key, 0));
        Table::scan(&head, key, 0)
            .and_then(|entry| entry.get())
            .and_then(|payload| payload.as_block())
            .map(|block| block.contains(key, 0))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> StatsView {
        self.stats.snapshot(self.max_bytes)
    }

    /// Bytes currently charged against the ceiling. Only consistent with
    /// concurrent insertions when observed from within them; see
    /// [`StatsView`].
    pub fn current_size(&self) -> u64 {
        self.stats.live_total()
    }

    pub fn fill_percentage(&self) -> u64 {
        self.current_size() * 100 / self.max_bytes
    }

    fn hot_limit(&self, ext: PackExt) -> u32 {
        self.hot_max
            .get(&ext)
            .copied()
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_HOT_MAX)
    }

    fn load_lock(&self, key: &StreamKey, position: u64) -> &FairMutex<()> {
        let index = (table::mix(key.hash, position, self.block_size_shift) >> 1) as usize;
        &self.load_locks[index % self.load_locks.len()]
    }

    fn ref_lock(&self, key: &StreamKey) -> &FairMutex<()> {
        &self.ref_locks[(key.hash >> 1) as usize % self.ref_locks.len()]
    }

    /// Charge `reserve` bytes for `key`, first sweeping the clock until the
    /// new total fits under the ceiling.
    ///
    /// Each entry the hand passes loses one hotness level; entries found
    /// cold are reclaimed. The sweep stops early when a full revolution
    /// yields nothing further to evict, so a single entry larger than the
    /// whole ceiling is still admitted.
    fn reserve_space(&self, reserve: u64, key: &StreamKey) {
        let mut clock = self.clock.lock();
        let mut live = self.stats.live_total() + reserve;
        if self.max_bytes < live {
            let mut prev = clock.hand;
            let mut curr = clock.next(prev);
            loop {
                let hot = match clock.entry(curr) {
                    Some(entry) if entry.is_hot() => {
                        // Recently used; cool it down but give it another
                        // revolution.
                        entry.mark_colder();
                        true
                    },
                    _ => false,
                };
                if hot {
                    prev = curr;
                    curr = clock.next(curr);
                    continue;
                }
                if prev == curr {
                    // Full revolution, nothing further to evict.
                    break;
                }
                if curr == clock::SENTINEL {
                    prev = curr;
                    curr = clock.next(curr);
                    continue;
                }

                let dead = clock.unlink_after(prev);
                dead.clear();
                live = live.saturating_sub(dead.size());
                self.stats.record_eviction(dead.key().ext(), dead.size());
                trace!("evicted {:?} at {}", dead.key(), dead.position());

                curr = clock.next(prev);
                if live <= self.max_bytes {
                    break;
                }
            }
            clock.hand = prev;
        }
        self.stats.add_live(key.ext(), reserve as i64);
    }

    /// Roll back a reservation that was not (fully) consumed.
    fn credit_space(&self, credit: u64, key: &StreamKey) {
        let _clock = self.clock.lock();
        self.stats.add_live(key.ext(), -(credit as i64));
    }

    /// Enter `entry` into the clock ring. `credit` reconciles a speculative
    /// reservation with the size actually held; it is negative when the
    /// loaded block turned out larger than the configured block size.
    fn add_to_clock(&self, entry: Arc<Entry>, credit: i64) {
        let mut clock = self.clock.lock();
        if credit != 0 {
            self.stats.add_live(entry.key().ext(), -credit);
        }
        clock.insert_after_hand(entry);
    }
}

fn locks(n: usize) -> Box<[FairMutex<()>]> {
    (0..n).map(|_| FairMutex::new(())).collect()
}

fn scan_block(head: &Option<Arc<Node>>, key: &StreamKey, position: u64) -> Option<Arc<Block>> {
    Table::scan(head, key, position)
        .and_then(|entry| entry.get())
        .and_then(|payload| payload.as_block())
}
