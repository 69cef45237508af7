//! Last accepted post time per key.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

use super::key::PostKey;

/// Outcome of a check against the last accepted post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCheck {
    /// The post is accepted and its time recorded
    Allowed,
    /// The post came too soon
    Limited {
        /// Time left until the next post would be accepted
        remaining: Duration,
    },
}

/// Last accepted post time for every key seen so far.
///
/// The map is sharded; the read, compare and write for one key all happen
/// under that key's shard lock, so concurrent posts for the same key are
/// decided one after another.
#[derive(Debug, Default)]
pub struct LastPostStore {
    last_post: DashMap<PostKey, DateTime<Utc>>,
}

impl LastPostStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the post and record `now` if at least `interval` has passed
    /// since the last accepted post for `key`.
    ///
    /// Rejected posts leave the stored time untouched. A clock that went
    /// backwards counts as no time elapsed.
    pub fn check_and_record(&self, key: &PostKey, now: DateTime<Utc>, interval: Duration) -> PostCheck {
        match self.last_post.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                let elapsed = now
                    .signed_duration_since(last)
                    .to_std()
                    .unwrap_or(Duration::ZERO);

                if elapsed < interval {
                    return PostCheck::Limited {
                        remaining: interval - elapsed,
                    };
                }

                entry.insert(now.max(last));
                PostCheck::Allowed
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                PostCheck::Allowed
            }
        }
    }

    /// The last accepted post time for `key`.
    pub fn get(&self, key: &PostKey) -> Option<DateTime<Utc>> {
        self.last_post.get(key).map(|last| *last)
    }

    /// Drop entries whose last accepted post is older than `cutoff`.
    ///
    /// Returns the number of entries removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.last_post.len();
        self.last_post.retain(|_, last| *last >= cutoff);
        before.saturating_sub(self.last_post.len())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.last_post.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.last_post.is_empty()
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.last_post.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scope;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn key(user: &str) -> PostKey {
        PostKey::new(Scope::PerChannel, user, "c1")
    }

    const INTERVAL: Duration = Duration::from_secs(30);

    #[test]
    fn test_first_post_allowed_and_recorded() {
        let store = LastPostStore::new();
        assert!(store.is_empty());

        assert_eq!(store.check_and_record(&key("u"), t0(), INTERVAL), PostCheck::Allowed);
        assert_eq!(store.get(&key("u")), Some(t0()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_too_soon_is_limited_and_not_recorded() {
        let store = LastPostStore::new();
        store.check_and_record(&key("u"), t0(), INTERVAL);

        let check = store.check_and_record(&key("u"), t0() + TimeDelta::seconds(10), INTERVAL);
        assert_eq!(
            check,
            PostCheck::Limited {
                remaining: Duration::from_secs(20)
            }
        );
        assert_eq!(store.get(&key("u")), Some(t0()));
    }

    #[test]
    fn test_exactly_interval_is_allowed() {
        let store = LastPostStore::new();
        store.check_and_record(&key("u"), t0(), INTERVAL);

        let later = t0() + TimeDelta::seconds(30);
        assert_eq!(store.check_and_record(&key("u"), later, INTERVAL), PostCheck::Allowed);
        assert_eq!(store.get(&key("u")), Some(later));
    }

    #[test]
    fn test_clock_going_backwards() {
        let store = LastPostStore::new();
        store.check_and_record(&key("u"), t0(), INTERVAL);

        let earlier = t0() - TimeDelta::seconds(5);
        assert_eq!(
            store.check_and_record(&key("u"), earlier, INTERVAL),
            PostCheck::Limited { remaining: INTERVAL }
        );

        // With no interval the post goes through but the stored time never moves back.
        assert_eq!(store.check_and_record(&key("u"), earlier, Duration::ZERO), PostCheck::Allowed);
        assert_eq!(store.get(&key("u")), Some(t0()));
    }

    #[test]
    fn test_prune_before() {
        let store = LastPostStore::new();
        store.check_and_record(&key("old"), t0(), INTERVAL);
        store.check_and_record(&key("new"), t0() + TimeDelta::hours(2), INTERVAL);

        let removed = store.prune_before(t0() + TimeDelta::hours(1));
        assert_eq!(removed, 1);
        assert_eq!(store.get(&key("old")), None);
        assert!(store.get(&key("new")).is_some());

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_posts_accept_exactly_one() {
        let store = LastPostStore::new();
        let allowed = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    if store.check_and_record(&key("u"), t0(), INTERVAL) == PostCheck::Allowed {
                        allowed.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(allowed.load(Ordering::SeqCst), 1);
    }
}
