// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arc_swap::ArcSwap;
use tracing::trace;

use crate::stream::PackExt;

/// A point-in-time view of the cache counters, indexed by
/// [`PackExt::position`].
///
/// The vectors are snapshots of independently updated atomics: they may
/// differ in length (an extension first seen between two reads grows the
/// backing array), and counts taken while loads are in flight may be
/// mutually skewed. Each individual counter is monotonic.
pub struct StatsView {
    /// Requests satisfied from the cache, per extension.
    pub hits: Vec<u64>,
    /// Requests that had to invoke a loader, per extension.
    ///
    /// A miss can be followed by a hit for the same request if another
    /// thread completed the load first, so `hits + misses` does not
    /// necessarily equal the number of cache accesses.
    pub misses: Vec<u64>,
    /// `hits + misses`, per extension.
    pub total_requests: Vec<u64>,
    /// `hits * 100 / (hits + misses)`, per extension; 0 when idle.
    pub hit_ratios: Vec<u64>,
    /// Entries reclaimed by the clock sweep, per extension.
    pub evictions: Vec<u64>,
    /// Bytes currently charged against the ceiling, per extension.
    pub live_bytes: Vec<u64>,
    /// `live bytes * 100 / ceiling` for the whole cache.
    pub fill_percentage: u64,
}

/// One monotonically growing array of per-extension counters.
///
/// The backing vector is replaced wholesale through a compare-and-swap when
/// an extension position beyond its current length shows up; the cells are
/// shared between generations, so updates racing a growth are never lost and
/// readers of either generation see a consistent snapshot.
pub(crate) struct PerExt {
    cells: ArcSwap<Vec<Arc<AtomicU64>>>,
}

impl PerExt {
    pub fn new() -> Self {
        Self {
            cells: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn cell(&self, pos: usize) -> Arc<AtomicU64> {
        loop {
            let cur = self.cells.load_full();
            if let Some(cell) = cur.get(pos) {
                return cell.clone();
            }
            let mut grown: Vec<Arc<AtomicU64>> = cur.iter().cloned().collect();
            grown.resize_with(pos + 1, || Arc::new(AtomicU64::new(0)));
            self.cells.compare_and_swap(&cur, Arc::new(grown));
            // Whether we won or lost the swap, the position exists now.
        }
    }

    /// Add `delta` to the counter at `pos`. Negative deltas rely on wrapping
    /// arithmetic; the accounting discipline keeps the true value
    /// nonnegative.
    pub fn add(&self, pos: usize, delta: i64) {
        self.cell(pos).fetch_add(delta as u64, Ordering::Relaxed);
    }

    pub fn values(&self) -> Vec<u64> {
        self.cells
            .load()
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.values().iter().sum()
    }
}

pub(crate) struct Stats {
    hit: PerExt,
    miss: PerExt,
    evict: PerExt,
    live: PerExt,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            hit: PerExt::new(),
            miss: PerExt::new(),
            evict: PerExt::new(),
            live: PerExt::new(),
        }
    }

    pub fn record_hit(&self, ext: PackExt) {
        trace!("cache hit");
        self.hit.add(ext.position(), 1);
    }

    pub fn record_miss(&self, ext: PackExt) {
        trace!("cache miss");
        self.miss.add(ext.position(), 1);
    }

    pub fn record_eviction(&self, ext: PackExt, size: u64) {
        self.evict.add(ext.position(), 1);
        self.live.add(ext.position(), -(size as i64));
    }

    pub fn add_live(&self, ext: PackExt, delta: i64) {
        self.live.add(ext.position(), delta);
    }

    pub fn live_total(&self) -> u64 {
        self.live.total()
    }

    pub fn snapshot(&self, max_bytes: u64) -> StatsView {
        let hits = self.hit.values();
        let misses = self.miss.values();
        let len = hits.len().max(misses.len());
        let mut total_requests = Vec::with_capacity(len);
        let mut hit_ratios = Vec::with_capacity(len);
        for pos in 0..len {
            let hit = hits.get(pos).copied().unwrap_or(0);
            let miss = misses.get(pos).copied().unwrap_or(0);
            let total = hit + miss;
            total_requests.push(total);
            hit_ratios.push(if total == 0 { 0 } else { hit * 100 / total });
        }
        let live_bytes = self.live.values();
        let fill_percentage = live_bytes.iter().sum::<u64>() * 100 / max_bytes;
        StatsView {
            hits,
            misses,
            total_requests,
            hit_ratios,
            evictions: self.evict.values(),
            live_bytes,
            fill_percentage,
        }
    }
}
