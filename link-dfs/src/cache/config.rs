// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::stream::PackExt;

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum Configuration {
        #[error("block size {0} is not a positive power of two")]
        BlockSize(usize),

        #[error("block limit {limit} is smaller than the block size {block_size}")]
        BlockLimit { limit: u64, block_size: usize },

        #[error("concurrency level must be positive")]
        ConcurrencyLevel,

        #[error("stream ratio {0} is not within (0, 1]")]
        StreamRatio(f64),
    }
}

/// Observer of the time a ref load spent waiting for its stripe lock.
///
/// Invoked while no cache lock is held; implementations are expected not to
/// call back into the cache.
pub type WaitObserver = Arc<dyn Fn(Duration) + Send + Sync>;

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;

/// Construction-time configuration of a [`crate::cache::BlockCache`].
///
/// Validated once when the cache is built; a cache never changes its
/// configuration afterwards (replacing the process-wide instance installs a
/// whole new cache).
#[derive(Clone)]
pub struct Config {
    /// Byte length of a single cache block. Must be a positive power of two.
    pub block_size: usize,
    /// Soft ceiling on live bytes. Must be at least `block_size`.
    pub block_limit: u64,
    /// Number of stripe locks in each of the block and ref lock arrays.
    pub concurrency_level: usize,
    /// Streams longer than `stream_ratio * block_limit` should bypass the
    /// cache; see [`crate::cache::BlockCache::should_copy_through_cache`].
    pub stream_ratio: f64,
    /// Per-extension ceiling for the hotness counter. Extensions without an
    /// override use a ceiling of 1, i.e. a plain second-chance bit.
    pub cache_hot_max: HashMap<PackExt, u32>,
    /// Reports the milliseconds-scale wait for a ref stripe lock, for
    /// metrics export.
    pub ref_lock_wait: Option<WaitObserver>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: (64 * KB) as usize,
            block_limit: 32 * MB,
            concurrency_level: 32,
            stream_ratio: 0.30,
            cache_hot_max: HashMap::new(),
            ref_lock_wait: None,
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) -> Result<(), error::Configuration> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(error::Configuration::BlockSize(self.block_size));
        }
        if self.block_limit < self.block_size as u64 {
            return Err(error::Configuration::BlockLimit {
                limit: self.block_limit,
                block_size: self.block_size,
            });
        }
        if self.concurrency_level == 0 {
            return Err(error::Configuration::ConcurrencyLevel);
        }
        if !(self.stream_ratio > 0.0 && self.stream_ratio <= 1.0) {
            return Err(error::Configuration::StreamRatio(self.stream_ratio));
        }
        Ok(())
    }
}
