// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use crate::stream::StreamKey;

/// A block-aligned slice of a packfile, loaded into memory.
///
/// `start` is the position of `data[0]` within the stream. The block length is
/// at most the block size of the file it was read from, which is not
/// necessarily the block size the cache was configured with.
pub struct Block {
    stream: StreamKey,
    start: u64,
    data: Box<[u8]>,
}

impl Block {
    pub fn new(stream: StreamKey, start: u64, data: impl Into<Box<[u8]>>) -> Self {
        Self {
            stream,
            start,
            data: data.into(),
        }
    }

    pub fn stream(&self) -> &StreamKey {
        &self.stream
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// One past the last position covered by this block.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// True iff this block belongs to `key` and covers `position`.
    pub fn contains(&self, key: &StreamKey, position: u64) -> bool {
        self.stream == *key && self.start <= position && position < self.end()
    }

    /// Copy bytes starting at `position` into `dst`, returning the number of
    /// bytes copied. Copies nothing if `position` lies outside the block.
    pub fn copy(&self, position: u64, dst: &mut [u8]) -> usize {
        if position < self.start || position >= self.end() {
            return 0;
        }
        let off = (position - self.start) as usize;
        let n = dst.len().min(self.data.len() - off);
        dst[..n].copy_from_slice(&self.data[off..off + n]);
        n
    }
}

/// A file the cache can read blocks from on a miss.
///
/// Implementors carry whatever reader state and channel handles the
/// underlying storage needs; the cache only ever sees positions and the
/// returned [`Block`].
///
/// A file may discover its native block size during the first read and from
/// then on align (and return blocks) to that size instead of the one the
/// cache assumed. The cache detects the adjusted `start` and re-requests
/// unsatisfied positions, so `align` must be stable once a read succeeded.
pub trait BlockFile {
    type Error;

    /// The cache key of this file's byte stream.
    fn stream(&self) -> &StreamKey;

    /// Align `position` down to a block boundary of this file.
    fn align(&self, position: u64) -> u64;

    /// Read the single block covering `position`.
    fn read_block(&self, position: u64) -> Result<Block, Self::Error>;
}
