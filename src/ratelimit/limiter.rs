//! Core rate limiter implementation.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::{Scope, SlowmodeConfig};
use crate::error::Result;
use crate::host::{Channel, PluginApi};

use super::cache::ChannelConfigCache;
use super::header::{self, ChannelLimit};
use super::key::PostKey;
use super::store::{LastPostStore, PostCheck};

/// Interval used when a channel has no usable configuration.
pub const DEFAULT_POST_LIMIT: Duration = Duration::from_secs(30);
/// Channels whose limits are cached before the least recently used is evicted.
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Result of a rate limit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The post may go through; its time has been recorded
    Allowed,
    /// The post came too soon after the user's last accepted post
    Limited {
        /// Time left until the user may post again
        remaining: Duration,
        /// The interval in force for the channel
        interval: Duration,
    },
}

impl Decision {
    /// Whether the post was accepted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Decides whether a user may post, based on the time since their last
/// accepted post and the interval configured for the channel.
///
/// This struct is thread-safe and can be shared across host worker threads.
pub struct RateLimiter<A: PluginApi> {
    /// Host used to look channels up on a cache miss
    api: Arc<A>,
    /// How last-post times are keyed
    scope: Scope,
    /// Interval for channels without usable configuration
    default_interval: Duration,
    /// Last accepted post per key
    last_post: LastPostStore,
    /// Resolved per-channel intervals
    channel_limits: ChannelConfigCache,
}

impl<A: PluginApi> RateLimiter<A> {
    /// Create a per-channel rate limiter with default settings.
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            scope: Scope::PerChannel,
            default_interval: DEFAULT_POST_LIMIT,
            last_post: LastPostStore::new(),
            channel_limits: ChannelConfigCache::new(DEFAULT_CACHE_CAPACITY),
        }
    }

    /// Create a rate limiter from plugin settings.
    pub fn with_config(api: Arc<A>, config: &SlowmodeConfig) -> Result<Self> {
        Ok(Self {
            api,
            scope: config.scope,
            default_interval: config.default_interval()?,
            last_post: LastPostStore::new(),
            channel_limits: ChannelConfigCache::new(config.channel_cache_capacity),
        })
    }

    /// How last-post times are keyed.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Interval used when a channel has no usable configuration.
    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    /// Resolve the interval for a channel, from cache or from its header.
    ///
    /// Configuration problems fall back to the default interval and are
    /// cached like any other result. Only a failed host lookup is an error,
    /// and it is not cached. A result whose lookup overlapped an invalidation
    /// is returned but not cached, so the next call fetches the header again.
    pub fn channel_limit(&self, channel_id: &str) -> Result<ChannelLimit> {
        let (cached, generation) = self.channel_limits.get_with_generation(channel_id);
        if let Some(limit) = cached {
            return Ok(limit);
        }

        let channel = self.api.get_channel(channel_id)?;
        let limit = header::resolve_header(channel_id, &channel.header, self.default_interval);

        if self.channel_limits.insert_if_current(channel_id, limit, generation) {
            debug!(
                channel_id = %channel_id,
                interval_ms = limit.interval.as_millis() as u64,
                source = ?limit.source,
                "Caching channel post limit"
            );
        } else {
            debug!(channel_id = %channel_id, "Channel invalidated during lookup, not caching");
        }

        Ok(limit)
    }

    /// Decide whether `user_id` may post in `channel_id` at `now`.
    ///
    /// An accepted post becomes the user's new last post.
    pub fn check(&self, user_id: &str, channel_id: &str, now: DateTime<Utc>) -> Result<Decision> {
        let limit = self.channel_limit(channel_id)?;
        let key = PostKey::new(self.scope, user_id, channel_id);

        trace!(
            key = %key,
            interval_ms = limit.interval.as_millis() as u64,
            "Checking post limit"
        );

        match self.last_post.check_and_record(&key, now, limit.interval) {
            PostCheck::Allowed => Ok(Decision::Allowed),
            PostCheck::Limited { remaining } => {
                debug!(
                    key = %key,
                    remaining_ms = remaining.as_millis() as u64,
                    "Post limit exceeded"
                );
                Ok(Decision::Limited {
                    remaining,
                    interval: limit.interval,
                })
            }
        }
    }

    /// Drop the cached limit for a channel. Returns whether one was cached.
    pub fn invalidate(&self, channel_id: &str) -> bool {
        self.channel_limits.remove(channel_id)
    }

    /// React to a channel update: invalidate the cached limit if the header changed.
    pub fn on_channel_updated(&self, old: &Channel, new: &Channel) -> bool {
        if old.header == new.header {
            return false;
        }

        debug!(channel_id = %new.id, "Channel header changed, invalidating post limit");
        self.invalidate(&new.id);
        true
    }

    /// Forget users whose last accepted post is older than `idle_for`.
    ///
    /// Returns the number of entries removed.
    pub fn prune_idle(&self, now: DateTime<Utc>, idle_for: Duration) -> usize {
        let cutoff = TimeDelta::from_std(idle_for)
            .ok()
            .and_then(|idle_for| now.checked_sub_signed(idle_for));

        match cutoff {
            Some(cutoff) => {
                let removed = self.last_post.prune_before(cutoff);
                debug!(removed = removed, "Pruned idle posters");
                removed
            }
            None => 0,
        }
    }

    /// Clear all last-post times and cached limits.
    pub fn reset(&self) {
        self.last_post.clear();
        self.channel_limits.clear();
    }

    /// The last accepted post time for a user, under this limiter's scope.
    pub fn last_post(&self, user_id: &str, channel_id: &str) -> Option<DateTime<Utc>> {
        self.last_post.get(&PostKey::new(self.scope, user_id, channel_id))
    }

    /// Number of tracked last-post entries.
    pub fn tracked_posters(&self) -> usize {
        self.last_post.len()
    }

    /// Number of channels with a cached limit.
    pub fn cached_channels(&self) -> usize {
        self.channel_limits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AppError, InMemoryHost};
    use crate::ratelimit::LimitSource;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;

    /// Host whose next lookup stops after reading the channel until released.
    struct PausingHost {
        channels: InMemoryHost,
        pause_next: AtomicBool,
        fetched: Barrier,
        resume: Barrier,
    }

    impl PluginApi for PausingHost {
        fn get_channel(&self, channel_id: &str) -> std::result::Result<Channel, AppError> {
            let channel = self.channels.get_channel(channel_id);
            if self.pause_next.swap(false, Ordering::SeqCst) {
                self.fetched.wait();
                self.resume.wait();
            }
            channel
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    fn create_test_limiter(channels: &[(&str, &str)]) -> (Arc<InMemoryHost>, RateLimiter<InMemoryHost>) {
        let host = Arc::new(InMemoryHost::new());
        for (id, header) in channels {
            host.upsert_channel(Channel::new(*id, *header));
        }
        let limiter = RateLimiter::new(host.clone());
        (host, limiter)
    }

    fn global_limiter(channels: &[(&str, &str)]) -> RateLimiter<InMemoryHost> {
        let host = Arc::new(InMemoryHost::new());
        for (id, header) in channels {
            host.upsert_channel(Channel::new(*id, *header));
        }
        let config = SlowmodeConfig {
            scope: Scope::Global,
            ..SlowmodeConfig::default()
        };
        RateLimiter::with_config(host, &config).unwrap()
    }

    #[test]
    fn test_rate_limiter_creation() {
        let (_, limiter) = create_test_limiter(&[]);
        assert_eq!(limiter.scope(), Scope::PerChannel);
        assert_eq!(limiter.default_interval(), Duration::from_secs(30));
        assert_eq!(limiter.tracked_posters(), 0);
        assert_eq!(limiter.cached_channels(), 0);
    }

    #[test]
    fn test_wait_then_post_again() {
        let (_, limiter) = create_test_limiter(&[("c", "---\npost_limit: 30s\n---")]);

        assert_eq!(limiter.check("u", "c", at(0)).unwrap(), Decision::Allowed);
        assert_eq!(
            limiter.check("u", "c", at(10)).unwrap(),
            Decision::Limited {
                remaining: Duration::from_secs(20),
                interval: Duration::from_secs(30),
            }
        );
        assert_eq!(limiter.check("u", "c", at(31)).unwrap(), Decision::Allowed);
        assert_eq!(limiter.last_post("u", "c"), Some(at(31)));
    }

    #[test]
    fn test_header_limit_is_used() {
        let (_, limiter) = create_test_limiter(&[("c", "---\npost_limit: 5s\n---")]);

        assert!(limiter.check("u", "c", at(0)).unwrap().is_allowed());
        assert!(!limiter.check("u", "c", at(4)).unwrap().is_allowed());
        assert!(limiter.check("u", "c", at(5)).unwrap().is_allowed());
    }

    #[test]
    fn test_default_limit_without_fragment() {
        let (_, limiter) = create_test_limiter(&[("c", "A plain header")]);

        let limit = limiter.channel_limit("c").unwrap();
        assert_eq!(limit.interval, Duration::from_secs(30));
        assert_eq!(limit.source, LimitSource::Default);

        assert!(limiter.check("u", "c", at(0)).unwrap().is_allowed());
        assert!(!limiter.check("u", "c", at(29)).unwrap().is_allowed());
        assert!(limiter.check("u", "c", at(30)).unwrap().is_allowed());
    }

    #[test]
    fn test_default_limit_with_bad_duration() {
        let (_, limiter) = create_test_limiter(&[("c", "---\npost_limit: notaduration\n---")]);

        let limit = limiter.channel_limit("c").unwrap();
        assert_eq!(limit, ChannelLimit::fallback(Duration::from_secs(30)));
    }

    #[test]
    fn test_channel_limit_is_cached() {
        let (host, limiter) = create_test_limiter(&[("c", "---\npost_limit: 5s\n---")]);

        limiter.check("u1", "c", at(0)).unwrap();
        limiter.check("u2", "c", at(0)).unwrap();
        limiter.check("u1", "c", at(1)).unwrap();

        assert_eq!(host.lookups(), 1);
        assert_eq!(limiter.cached_channels(), 1);
    }

    #[test]
    fn test_host_failure_is_error_and_not_cached() {
        let (host, limiter) = create_test_limiter(&[("c", "---\npost_limit: 5s\n---")]);
        host.set_unavailable("c", true);

        assert!(limiter.check("u", "c", at(0)).is_err());
        assert_eq!(limiter.cached_channels(), 0);
        assert_eq!(limiter.tracked_posters(), 0);

        host.set_unavailable("c", false);
        assert!(limiter.check("u", "c", at(0)).unwrap().is_allowed());
        assert_eq!(host.lookups(), 2);
    }

    #[test]
    fn test_header_change_invalidates_cache() {
        let (host, limiter) = create_test_limiter(&[("c", "---\npost_limit: 5s\n---")]);
        assert_eq!(limiter.channel_limit("c").unwrap().interval, Duration::from_secs(5));

        let old = Channel::new("c", "---\npost_limit: 5s\n---");
        let new = Channel::new("c", "---\npost_limit: 1m\n---");
        host.upsert_channel(new.clone());

        assert!(limiter.on_channel_updated(&old, &new));
        assert_eq!(limiter.cached_channels(), 0);
        assert_eq!(limiter.channel_limit("c").unwrap().interval, Duration::from_secs(60));
    }

    #[test]
    fn test_header_change_during_lookup_is_not_lost() {
        const HOUR: &str = "---\npost_limit: 1h\n---";
        const SECOND: &str = "---\npost_limit: 1s\n---";

        let host = Arc::new(PausingHost {
            channels: InMemoryHost::new(),
            pause_next: AtomicBool::new(true),
            fetched: Barrier::new(2),
            resume: Barrier::new(2),
        });
        host.channels.upsert_channel(Channel::new("c", HOUR));
        let limiter = RateLimiter::new(host.clone());

        std::thread::scope(|s| {
            let lookup = s.spawn(|| limiter.channel_limit("c").unwrap());

            // The lookup has read the old header and not yet cached it.
            host.fetched.wait();
            let old = Channel::new("c", HOUR);
            let new = Channel::new("c", SECOND);
            host.channels.upsert_channel(new.clone());
            assert!(limiter.on_channel_updated(&old, &new));
            host.resume.wait();

            assert_eq!(lookup.join().unwrap().interval, Duration::from_secs(3600));
        });

        assert_eq!(limiter.cached_channels(), 0);
        assert_eq!(limiter.channel_limit("c").unwrap().interval, Duration::from_secs(1));
        assert_eq!(limiter.cached_channels(), 1);
    }

    #[test]
    fn test_unchanged_header_keeps_cache() {
        let (_, limiter) = create_test_limiter(&[("c", "---\npost_limit: 5s\n---")]);
        limiter.channel_limit("c").unwrap();

        let old = Channel::new("c", "---\npost_limit: 5s\n---");
        let mut new = old.clone();
        new.name = "renamed".to_string();

        assert!(!limiter.on_channel_updated(&old, &new));
        assert_eq!(limiter.cached_channels(), 1);
    }

    #[test]
    fn test_per_channel_scope_is_independent() {
        let (_, limiter) = create_test_limiter(&[("c1", ""), ("c2", "")]);

        assert!(limiter.check("u", "c1", at(0)).unwrap().is_allowed());
        assert!(!limiter.check("u", "c1", at(1)).unwrap().is_allowed());
        assert!(limiter.check("u", "c2", at(1)).unwrap().is_allowed());
        assert_eq!(limiter.tracked_posters(), 2);
    }

    #[test]
    fn test_global_scope_spans_channels() {
        let limiter = global_limiter(&[("c1", ""), ("c2", "---\npost_limit: 5s\n---")]);

        assert!(limiter.check("u", "c1", at(0)).unwrap().is_allowed());
        // The target channel's interval applies to the user's global last post.
        assert_eq!(
            limiter.check("u", "c2", at(2)).unwrap(),
            Decision::Limited {
                remaining: Duration::from_secs(3),
                interval: Duration::from_secs(5),
            }
        );
        assert!(limiter.check("u", "c2", at(5)).unwrap().is_allowed());
        assert_eq!(limiter.tracked_posters(), 1);
    }

    #[test]
    fn test_different_users_are_independent() {
        let (_, limiter) = create_test_limiter(&[("c", "")]);

        assert!(limiter.check("alice", "c", at(0)).unwrap().is_allowed());
        assert!(limiter.check("bob", "c", at(0)).unwrap().is_allowed());
    }

    #[test]
    fn test_prune_idle() {
        let (_, limiter) = create_test_limiter(&[("c", "")]);
        limiter.check("old", "c", at(0)).unwrap();
        limiter.check("new", "c", at(3000)).unwrap();

        assert_eq!(limiter.prune_idle(at(3600), Duration::from_secs(3000)), 1);
        assert_eq!(limiter.last_post("old", "c"), None);
        assert_eq!(limiter.prune_idle(at(3600), Duration::MAX), 0);
    }

    #[test]
    fn test_reset() {
        let (_, limiter) = create_test_limiter(&[("c", "")]);
        limiter.check("u", "c", at(0)).unwrap();

        limiter.reset();
        assert_eq!(limiter.tracked_posters(), 0);
        assert_eq!(limiter.cached_channels(), 0);
        assert!(limiter.check("u", "c", at(1)).unwrap().is_allowed());
    }

    #[test]
    fn test_concurrent_checks_same_user() {
        let (_, limiter) = create_test_limiter(&[("c", "---\npost_limit: 1m\n---")]);

        let allowed: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| limiter.check("u", "c", at(0)).unwrap().is_allowed()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });

        assert_eq!(allowed, 1);
    }
}
