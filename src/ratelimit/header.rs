//! Per-channel configuration embedded in channel headers.
//!
//! A channel opts into a custom interval by putting a YAML block between two
//! `---` markers anywhere in its header:
//!
//! ```text
//! Welcome! Please keep it on topic.
//! ---
//! post_limit: 45s
//! ---
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::duration;
use crate::error::{Result, SlowmodeError};

/// Marker that opens and closes the configuration fragment.
pub const FRAGMENT_DELIMITER: &str = "---";

/// Configuration parsed from a header fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Minimum interval between posts, as a duration string
    #[serde(default)]
    pub post_limit: Option<String>,
}

impl ChannelConfig {
    /// Parse `post_limit` into a duration.
    pub fn post_limit(&self) -> Result<Duration> {
        match self.post_limit.as_deref() {
            Some(raw) => duration::parse(raw),
            None => Err(SlowmodeError::InvalidDuration("post_limit is not set".to_string())),
        }
    }
}

/// Where a channel's interval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitSource {
    /// Parsed from the channel header
    Header,
    /// Fallback interval
    Default,
}

/// The resolved interval for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLimit {
    /// Minimum interval between accepted posts
    pub interval: Duration,
    /// Origin of the interval
    pub source: LimitSource,
}

impl ChannelLimit {
    /// A limit that uses the fallback interval.
    pub fn fallback(interval: Duration) -> Self {
        Self {
            interval,
            source: LimitSource::Default,
        }
    }
}

/// Return the text between the first and second `---` markers.
pub fn extract_fragment(header: &str) -> Result<&str> {
    let mut parts = header.split(FRAGMENT_DELIMITER);
    parts.next();
    let fragment = parts.next().ok_or(SlowmodeError::MissingFragment)?;
    // A lone marker opens a fragment that is never closed.
    parts.next().ok_or(SlowmodeError::MissingFragment)?;
    Ok(fragment)
}

/// Parse a fragment as YAML.
pub fn parse_fragment(fragment: &str) -> Result<ChannelConfig> {
    Ok(serde_yaml::from_str(fragment)?)
}

/// Parse the interval configured in a header.
pub fn parse_header(header: &str) -> Result<Duration> {
    let fragment = extract_fragment(header)?;
    parse_fragment(fragment)?.post_limit()
}

/// Resolve a channel's interval, falling back to `default` on any problem.
pub fn resolve_header(channel_id: &str, header: &str, default: Duration) -> ChannelLimit {
    match parse_header(header) {
        Ok(interval) => {
            debug!(
                channel_id = %channel_id,
                interval_ms = interval.as_millis() as u64,
                "Using post limit from channel header"
            );
            ChannelLimit {
                interval,
                source: LimitSource::Header,
            }
        }
        Err(SlowmodeError::MissingFragment) => {
            debug!(channel_id = %channel_id, "No post limit in channel header, using default");
            ChannelLimit::fallback(default)
        }
        Err(e) => {
            warn!(
                channel_id = %channel_id,
                error = %e,
                "Invalid post limit in channel header, using default"
            );
            ChannelLimit::fallback(default)
        }
    }
}
