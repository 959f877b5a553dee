// Copyright © 2021 The Radicle Link Contributors
//
// This file is part of radicle-link, distributed under the GPLv3 with Radicle
// Linking Exception. For full terms see the included LICENSE file.

use std::sync::Arc;

use arc_swap::{ArcSwapOption, Guard};

use super::entry::Entry;
use crate::stream::StreamKey;

/// An immutable bucket chain node. Membership of a bucket changes only by
/// swapping the whole head pointer, so readers can walk a chain without any
/// lock.
pub(crate) struct Node {
    pub entry: Arc<Entry>,
    pub next: Option<Arc<Node>>,
}

/// Fixed-size bucket directory of the cache.
///
/// Positions within one cache block compress to the same slot: the block
/// offset is shifted out of the position before it is mixed into the key
/// hash.
pub(crate) struct Table {
    slots: Box<[ArcSwapOption<Node>]>,
    shift: u32,
}

impl Table {
    pub fn new(size: usize, shift: u32) -> Self {
        Self {
            slots: (0..size).map(|_| ArcSwapOption::from(None)).collect(),
            shift,
        }
    }

    pub fn slot(&self, key: &StreamKey, position: u64) -> usize {
        (mix(key.hash, position, self.shift) >> 1) as usize % self.slots.len()
    }

    pub fn head(&self, slot: usize) -> Option<Arc<Node>> {
        self.slots[slot].load_full()
    }

    /// Walk `head` for a live entry at `(key, position)`.
    ///
    /// A matching entry whose payload has been evicted ends the walk: at most
    /// one entry per `(key, position)` is ever reachable, so there is nothing
    /// further down the chain. Hotness is left untouched.
    pub fn scan(head: &Option<Arc<Node>>, key: &StreamKey, position: u64) -> Option<Arc<Entry>> {
        let mut node = head.as_deref();
        while let Some(n) = node {
            let entry = &n.entry;
            if entry.position() == position && entry.key() == key {
                if entry.is_stale() {
                    return None;
                }
                return Some(entry.clone());
            }
            node = n.next.as_deref();
        }
        None
    }

    /// Prepend `entry` to the chain at `slot`, dropping stale nodes from the
    /// tail while at it. `expect` is the head the caller last observed; on a
    /// lost race the chain is rebuilt from the fresh head and the swap is
    /// retried.
    pub fn install(&self, slot: usize, expect: Option<Arc<Node>>, entry: Arc<Entry>) {
        let mut expect = expect;
        loop {
            let head = Arc::new(Node {
                entry: entry.clone(),
                next: clean(expect.clone()),
            });
            let prev = self.slots[slot].compare_and_swap(&expect, Some(head));
            if same(&*prev, &expect) {
                return;
            }
            expect = Guard::into_inner(prev);
        }
    }
}

pub(crate) fn mix(hash: u32, position: u64, shift: u32) -> u32 {
    hash.wrapping_add((position >> shift) as u32)
}

pub(crate) fn same(a: &Option<Arc<Node>>, b: &Option<Arc<Node>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Copy of `top` without the stale nodes, sharing the longest unchanged
/// tail with the original chain.
fn clean(top: Option<Arc<Node>>) -> Option<Arc<Node>> {
    let mut top = top;
    while let Some(node) = &top {
        if !node.entry.is_stale() {
            break;
        }
        let next = node.next.clone();
        top = next;
    }
    match top {
        None => None,
        Some(node) => {
            let next = clean(node.next.clone());
            if same(&next, &node.next) {
                Some(node)
            } else {
                Some(Arc::new(Node {
                    entry: node.entry.clone(),
                    next,
                }))
            }
        },
    }
}
