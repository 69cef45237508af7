//! Cache of resolved channel limits.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use super::header::ChannelLimit;

/// Resolved limits keyed by channel id, evicting the least recently used
/// channel once full.
///
/// Every invalidation bumps a generation counter. A caller that resolves a
/// limit outside the lock reads the generation first and stores its result
/// with [`ChannelConfigCache::insert_if_current`], so a limit fetched before
/// an invalidation can never be written back after it.
pub struct ChannelConfigCache {
    inner: Mutex<CacheState>,
}

struct CacheState {
    entries: LruCache<String, ChannelLimit>,
    generation: u64,
}

impl ChannelConfigCache {
    /// Create a cache holding at most `capacity` channels; 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        let entries = match NonZeroUsize::new(capacity) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            inner: Mutex::new(CacheState {
                entries,
                generation: 0,
            }),
        }
    }

    /// Look up a channel, marking it recently used.
    pub fn get(&self, channel_id: &str) -> Option<ChannelLimit> {
        self.inner.lock().entries.get(channel_id).copied()
    }

    /// Look up a channel together with the generation to pass to
    /// [`ChannelConfigCache::insert_if_current`] on a miss.
    pub fn get_with_generation(&self, channel_id: &str) -> (Option<ChannelLimit>, u64) {
        let mut inner = self.inner.lock();
        let generation = inner.generation;
        (inner.entries.get(channel_id).copied(), generation)
    }

    /// Store the limit for a channel, replacing any previous one.
    pub fn insert(&self, channel_id: &str, limit: ChannelLimit) {
        self.inner.lock().entries.put(channel_id.to_string(), limit);
    }

    /// Store the limit only if nothing was invalidated since `generation` was read.
    ///
    /// Returns whether the limit was stored.
    pub fn insert_if_current(&self, channel_id: &str, limit: ChannelLimit, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return false;
        }
        inner.entries.put(channel_id.to_string(), limit);
        true
    }

    /// Drop a channel's entry. Returns whether one was present.
    ///
    /// Lookups already in flight for any channel will not be cached.
    pub fn remove(&self, channel_id: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.generation = inner.generation.wrapping_add(1);
        inner.entries.pop(channel_id).is_some()
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Number of cached channels.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.generation = inner.generation.wrapping_add(1);
        inner.entries.clear();
    }
}
