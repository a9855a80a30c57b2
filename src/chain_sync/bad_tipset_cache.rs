// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::RefCell;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::blocks::TipsetHash;

/// Bounded cache of tipsets whose interpretation or storage failed, with the
/// reason. Checked before admitting a sync target, to ensure no duplicate
/// work on a chain already known to be defective.
#[derive(Debug)]
pub struct BadTipsetCache {
    cache: RefCell<LruCache<TipsetHash, String>>,
}

impl BadTipsetCache {
    pub fn new(cap: NonZeroUsize) -> Self {
        Self {
            cache: RefCell::new(LruCache::new(cap)),
        }
    }

    /// Puts a bad tipset hash in the cache with a given reason.
    pub fn put(&self, hash: TipsetHash, reason: String) -> Option<String> {
        self.cache.borrow_mut().put(hash, reason)
    }

    /// Returns `Some` with the reason if the tipset is known bad. This also
    /// updates the key to the head of the cache.
    pub fn get(&self, hash: &TipsetHash) -> Option<String> {
        self.cache.borrow_mut().get(hash).cloned()
    }

    /// Like `get`, without touching the LRU order.
    pub fn peek(&self, hash: &TipsetHash) -> Option<String> {
        self.cache.borrow().peek(hash).cloned()
    }
}

impl Default for BadTipsetCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(1 << 15).expect("nonzero"))
    }
}
