//! Host hook entry points.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use crate::config::{Scope, SlowmodeConfig};
use crate::duration;
use crate::error::Result;
use crate::host::{Channel, Clock, PluginApi, Post, SystemClock};
use crate::ratelimit::{Decision, RateLimiter};

/// What the host should do with a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostVerdict {
    /// Post the message unmodified
    Allow(Post),
    /// Drop the message and show the reason to its author
    Reject(String),
}

impl PostVerdict {
    /// Split into the host's `(post, rejection reason)` pair.
    ///
    /// Accepted posts come back with an empty reason, rejected ones with no post.
    pub fn into_parts(self) -> (Option<Post>, String) {
        match self {
            PostVerdict::Allow(post) => (Some(post), String::new()),
            PostVerdict::Reject(reason) => (None, reason),
        }
    }

    /// Whether the post goes through.
    pub fn is_allowed(&self) -> bool {
        matches!(self, PostVerdict::Allow(_))
    }

    /// The rejection reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            PostVerdict::Allow(_) => None,
            PostVerdict::Reject(reason) => Some(reason.as_str()),
        }
    }
}

/// Text shown to a user who posted too soon.
pub fn rejection_message(scope: Scope, remaining: Duration) -> String {
    let wait = duration::format_wait(remaining);
    match scope {
        Scope::PerChannel => format!("Please wait {} before posting again in this channel.", wait),
        Scope::Global => format!("Please wait {} before posting again.", wait),
    }
}

/// The slow mode plugin as seen by the host.
pub struct SlowmodePlugin<A: PluginApi, C: Clock = SystemClock> {
    limiter: RateLimiter<A>,
    clock: Arc<C>,
    config: SlowmodeConfig,
}

impl<A: PluginApi> SlowmodePlugin<A, SystemClock> {
    /// Create a plugin that reads the wall clock.
    pub fn new(api: Arc<A>, config: SlowmodeConfig) -> Result<Self> {
        Self::with_clock(api, Arc::new(SystemClock), config)
    }
}

impl<A: PluginApi, C: Clock> SlowmodePlugin<A, C> {
    /// Create a plugin with an explicit time source.
    pub fn with_clock(api: Arc<A>, clock: Arc<C>, config: SlowmodeConfig) -> Result<Self> {
        let limiter = RateLimiter::with_config(api, &config)?;
        Ok(Self {
            limiter,
            clock,
            config,
        })
    }

    /// The underlying rate limiter.
    pub fn limiter(&self) -> &RateLimiter<A> {
        &self.limiter
    }

    /// Called by the host when the plugin is activated.
    pub fn on_activate(&self) {
        self.limiter.reset();
        info!(
            scope = ?self.config.scope,
            default_post_limit = %self.config.default_post_limit,
            channel_cache_capacity = self.config.channel_cache_capacity,
            "Slowmode plugin activated"
        );
    }

    /// Called by the host before a message is posted.
    #[instrument(
        skip(self, post),
        fields(user_id = %post.user_id, channel_id = %post.channel_id)
    )]
    pub fn message_will_be_posted(&self, post: Post) -> PostVerdict {
        let now = self.clock.now();

        match self.limiter.check(&post.user_id, &post.channel_id, now) {
            Ok(Decision::Allowed) => {
                debug!("Post allowed");
                PostVerdict::Allow(post)
            }
            Ok(Decision::Limited { remaining, interval }) => {
                let reason = rejection_message(self.limiter.scope(), remaining);
                debug!(
                    remaining_secs = duration::round_to_secs(remaining).as_secs(),
                    interval_ms = interval.as_millis() as u64,
                    "Post rejected"
                );
                PostVerdict::Reject(reason)
            }
            Err(e) => {
                error!(error = %e, "Failed to get channel config");
                PostVerdict::Reject(self.config.internal_error_message.clone())
            }
        }
    }

    /// Called by the host after a channel has been updated.
    pub fn channel_has_been_updated(&self, new_channel: &Channel, old_channel: &Channel) {
        self.limiter.on_channel_updated(old_channel, new_channel);
    }
}
