//! The surface the chat server exposes to the plugin.
//!
//! The host owns activation, hook dispatch and the posting pipeline. The plugin
//! only needs the records passed to its hooks, a way to look a channel up, and
//! the current time.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// A message about to be posted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Post {
    /// Post identifier
    #[serde(default)]
    pub id: String,
    /// Author of the post
    pub user_id: String,
    /// Channel the post targets
    pub channel_id: String,
    /// Message body
    #[serde(default)]
    pub message: String,
    /// Host post type; empty for regular user messages
    #[serde(default)]
    pub post_type: String,
}

impl Post {
    /// Create a regular post.
    pub fn new(user_id: impl Into<String>, channel_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            message: message.into(),
            post_type: String::new(),
        }
    }
}

/// A channel record as the host stores it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Free-text header, may embed a configuration fragment
    #[serde(default)]
    pub header: String,
}

impl Channel {
    /// Create a channel with the given header.
    pub fn new(id: impl Into<String>, header: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            header: header.into(),
        }
    }
}

/// Error reported by the host API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{where_}: {message} (status {status_code})")]
pub struct AppError {
    /// Host call that failed
    pub where_: String,
    /// Human-readable detail
    pub message: String,
    /// HTTP-like status code
    pub status_code: u16,
}

impl AppError {
    /// Create a new host error.
    pub fn new(where_: impl Into<String>, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            where_: where_.into(),
            message: message.into(),
            status_code,
        }
    }
}

/// Host capabilities used by the plugin.
pub trait PluginApi: Send + Sync {
    /// Fetch a channel by identifier.
    fn get_channel(&self, channel_id: &str) -> Result<Channel, AppError>;
}

/// A host that keeps channels in memory.
///
/// Backs the scenario replay and tests. Channels can be marked unavailable to
/// simulate lookup failures.
#[derive(Debug, Default)]
pub struct InMemoryHost {
    channels: RwLock<HashMap<String, Channel>>,
    unavailable: RwLock<HashSet<String>>,
    lookups: AtomicUsize,
}

impl InMemoryHost {
    /// Create a host with no channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a channel, returning the previous record.
    pub fn upsert_channel(&self, channel: Channel) -> Option<Channel> {
        self.channels.write().insert(channel.id.clone(), channel)
    }

    /// Read a channel directly, bypassing availability and lookup counting.
    pub fn channel(&self, channel_id: &str) -> Option<Channel> {
        self.channels.read().get(channel_id).cloned()
    }

    /// Make lookups of a channel fail (or succeed again).
    pub fn set_unavailable(&self, channel_id: &str, unavailable: bool) {
        let mut set = self.unavailable.write();
        if unavailable {
            set.insert(channel_id.to_string());
        } else {
            set.remove(channel_id);
        }
    }

    /// Number of `get_channel` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl PluginApi for InMemoryHost {
    fn get_channel(&self, channel_id: &str) -> Result<Channel, AppError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        if self.unavailable.read().contains(channel_id) {
            return Err(AppError::new("GetChannel", "host unavailable", 503));
        }

        self.channels
            .read()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| AppError::new("GetChannel", format!("channel {} not found", channel_id), 404))
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Used by the scenario replay and by tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock to an absolute time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::TimeDelta) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
