// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwapOption;

use crate::{block::Block, stream::StreamKey};

/// What an [`Entry`] holds: either packfile bytes, or a parsed auxiliary
/// artifact behind a type-erased pointer.
///
/// The erasure is undone exactly once per typed access, at the
/// [`crate::cache::Handle`] and `get_ref` seams.
pub(crate) enum Payload {
    Block(Arc<Block>),
    Ref(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub fn as_block(&self) -> Option<Arc<Block>> {
        match self {
            Self::Block(b) => Some(b.clone()),
            Self::Ref(_) => None,
        }
    }

    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        match self {
            Self::Ref(any) => Arc::clone(any).downcast::<T>().ok(),
            Self::Block(_) => None,
        }
    }
}

/// A cached value, shared between the hash table and the clock ring.
///
/// The payload is cleared by the evictor; an entry without a payload is
/// stale, is never reported as a hit, and is dropped from its bucket chain
/// the next time the chain is rewritten.
///
/// Hotness is a small counter clamped to a per-extension ceiling: a hit
/// increments it, a clock sweep decrements it, and the entry survives the
/// sweep while the counter is positive. The default ceiling of 1 makes it
/// behave like a plain second-chance bit.
pub(crate) struct Entry {
    key: StreamKey,
    position: u64,
    size: u64,
    hot_max: u32,
    hot: AtomicU32,
    value: ArcSwapOption<Payload>,
}

impl Entry {
    pub fn new(key: StreamKey, position: u64, size: u64, hot_max: u32, value: Payload) -> Self {
        Self {
            key,
            position,
            size,
            hot_max,
            hot: AtomicU32::new(0),
            value: ArcSwapOption::from_pointee(value),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fetch the payload without touching hotness.
    pub fn peek(&self) -> Option<Arc<Payload>> {
        self.value.load_full()
    }

    /// Fetch the payload, marking the entry hotter on success.
    pub fn get(&self) -> Option<Arc<Payload>> {
        let value = self.value.load_full();
        if value.is_some() {
            self.mark_hotter();
        }
        value
    }

    pub fn is_stale(&self) -> bool {
        self.value.load().is_none()
    }

    /// Release the payload and mark the entry stale.
    pub fn clear(&self) {
        self.value.store(None)
    }

    pub fn mark_hotter(&self) {
        let max = self.hot_max;
        let _ = self
            .hot
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |hot| {
                if hot < max {
                    Some(hot + 1)
                } else {
                    None
                }
            });
    }

    pub fn mark_colder(&self) {
        let _ = self
            .hot
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |hot| {
                hot.checked_sub(1)
            });
    }

    pub fn is_hot(&self) -> bool {
        self.hot.load(Ordering::Relaxed) > 0
    }
}
