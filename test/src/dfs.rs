// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use std::{
    io,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use link_dfs::{Block, BlockCache, BlockFile, Config, PackExt, StreamKey};

pub fn stream(name: &str, ext: PackExt) -> StreamKey {
    StreamKey::new("unit-test", name, ext)
}

pub fn cache(block_size: usize, block_limit: u64) -> BlockCache {
    BlockCache::new(Config {
        block_size,
        block_limit,
        ..Config::default()
    })
    .expect("valid test configuration")
}

/// The byte every test stream holds at `pos`, so block contents can be
/// checked without carrying fixtures around.
pub fn byte_at(pos: u64) -> u8 {
    (pos % 251) as u8
}

pub fn contents(start: u64, end: u64) -> Vec<u8> {
    (start..end).map(byte_at).collect()
}

/// A parsed artifact stand-in for the ref paths.
#[derive(Debug, PartialEq)]
pub struct Parsed(pub &'static str);

/// An in-memory [`BlockFile`] over the deterministic [`byte_at`] stream.
///
/// `block_size` is the file's native block size. [`TestFile::assuming`]
/// makes the file align to a different (typically the cache's) block size
/// until the first successful read, mimicking a file that only discovers
/// its native block size once bytes come back from storage.
pub struct TestFile {
    key: StreamKey,
    native_size: u64,
    align_size: AtomicU64,
    len: u64,
    delay: Option<Duration>,
    loads: AtomicUsize,
    fail_next: AtomicBool,
}

impl TestFile {
    pub fn new(key: StreamKey, block_size: u64, len: u64) -> Self {
        Self {
            key,
            native_size: block_size,
            align_size: AtomicU64::new(block_size),
            len,
            delay: None,
            loads: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn assuming(self, block_size: u64) -> Self {
        self.align_size.store(block_size, Ordering::SeqCst);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Number of times [`BlockFile::read_block`] was invoked, failed
    /// attempts included.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Make the next read fail with an I/O error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst)
    }
}

impl BlockFile for TestFile {
    type Error = io::Error;

    fn stream(&self) -> &StreamKey {
        &self.key
    }

    fn align(&self, position: u64) -> u64 {
        let size = self.align_size.load(Ordering::SeqCst);
        position - position % size
    }

    fn read_block(&self, position: u64) -> Result<Block, io::Error> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted read failure"));
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.align_size.store(self.native_size, Ordering::SeqCst);
        let start = position - position % self.native_size;
        let end = (start + self.native_size).min(self.len);
        Ok(Block::new(self.key.clone(), start, contents(start, end)))
    }
}
