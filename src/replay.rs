//! Scenario replay.
//!
//! A scenario lists channels and a timeline of events. Replaying it drives the
//! plugin against an in-memory host and a manual clock, producing one outcome
//! per event. Operators use it to try header configurations before rolling
//! them out.
//!
//! ```yaml
//! channels:
//!   - id: town-square
//!     header: "---\npost_limit: 10s\n---"
//! events:
//!   - kind: post
//!     at: 0s
//!     user_id: alice
//!     channel_id: town-square
//!   - kind: update_channel
//!     at: 4s
//!     channel_id: town-square
//!     header: "---\npost_limit: 2s\n---"
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SlowmodeConfig;
use crate::duration;
use crate::error::{Result, SlowmodeError};
use crate::host::{Channel, InMemoryHost, ManualClock, Post};
use crate::plugin::SlowmodePlugin;

/// A replayable scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Wall-clock time of offset zero; defaults to the Unix epoch
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Channels known to the host before the first event
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// Events in the order they reach the plugin
    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
}

/// One step of a scenario. `at` is a duration string offset from the start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioEvent {
    /// A user posts a message
    Post {
        at: String,
        user_id: String,
        channel_id: String,
        #[serde(default)]
        message: String,
    },
    /// A channel's header is edited
    UpdateChannel {
        at: String,
        channel_id: String,
        header: String,
    },
    /// Channel lookups start or stop failing
    SetUnavailable {
        at: String,
        channel_id: String,
        #[serde(default = "default_true")]
        unavailable: bool,
    },
}

fn default_true() -> bool {
    true
}

impl ScenarioEvent {
    fn at(&self) -> &str {
        match self {
            ScenarioEvent::Post { at, .. }
            | ScenarioEvent::UpdateChannel { at, .. }
            | ScenarioEvent::SetUnavailable { at, .. } => at,
        }
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayOutcome {
    Post {
        at: String,
        user_id: String,
        channel_id: String,
        allowed: bool,
        #[serde(skip_serializing_if = "String::is_empty")]
        reason: String,
    },
    UpdateChannel {
        at: String,
        channel_id: String,
        header_changed: bool,
    },
    SetUnavailable {
        at: String,
        channel_id: String,
        unavailable: bool,
    },
}

impl Scenario {
    /// Parse a scenario from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a scenario from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading scenario");
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Replay every event through a freshly activated plugin.
    pub fn replay(&self, config: SlowmodeConfig) -> Result<Vec<ReplayOutcome>> {
        let start = self.start.unwrap_or_default();

        let host = Arc::new(InMemoryHost::new());
        for channel in &self.channels {
            host.upsert_channel(channel.clone());
        }

        let clock = Arc::new(ManualClock::new(start));
        let plugin = SlowmodePlugin::with_clock(host.clone(), clock.clone(), config)?;
        plugin.on_activate();

        let mut outcomes = Vec::with_capacity(self.events.len());
        for event in &self.events {
            let offset = duration::parse(event.at())?;
            let offset = TimeDelta::from_std(offset)
                .map_err(|_| SlowmodeError::InvalidDuration(format!("{:?}: out of range", event.at())))?;
            clock.set(start + offset);

            debug!(at = %event.at(), "Replaying event");

            let outcome = match event {
                ScenarioEvent::Post {
                    at,
                    user_id,
                    channel_id,
                    message,
                } => {
                    let post = Post::new(user_id.as_str(), channel_id.as_str(), message.as_str());
                    let (post, reason) = plugin.message_will_be_posted(post).into_parts();
                    ReplayOutcome::Post {
                        at: at.clone(),
                        user_id: user_id.clone(),
                        channel_id: channel_id.clone(),
                        allowed: post.is_some(),
                        reason,
                    }
                }
                ScenarioEvent::UpdateChannel {
                    at,
                    channel_id,
                    header,
                } => {
                    let old = host
                        .channel(channel_id)
                        .unwrap_or_else(|| Channel::new(channel_id.as_str(), ""));
                    let new = Channel {
                        header: header.clone(),
                        ..old.clone()
                    };
                    host.upsert_channel(new.clone());
                    plugin.channel_has_been_updated(&new, &old);
                    ReplayOutcome::UpdateChannel {
                        at: at.clone(),
                        channel_id: channel_id.clone(),
                        header_changed: old.header != new.header,
                    }
                }
                ScenarioEvent::SetUnavailable {
                    at,
                    channel_id,
                    unavailable,
                } => {
                    host.set_unavailable(channel_id, *unavailable);
                    ReplayOutcome::SetUnavailable {
                        at: at.clone(),
                        channel_id: channel_id.clone(),
                        unavailable: *unavailable,
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}
