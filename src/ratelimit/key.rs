//! Keys for last-post timestamps.

use crate::config::Scope;

/// Identifies whose last post a timestamp belongs to.
///
/// In per-channel scope the key carries the channel, so a user's posts in
/// different channels are limited independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostKey {
    /// The posting user
    pub user_id: String,
    /// The channel, when timestamps are scoped per channel
    pub channel_id: Option<String>,
}

impl PostKey {
    /// Build the key for a post under the given scope.
    pub fn new(scope: Scope, user_id: &str, channel_id: &str) -> Self {
        let channel_id = match scope {
            Scope::PerChannel => Some(channel_id.to_string()),
            Scope::Global => None,
        };
        Self {
            user_id: user_id.to_string(),
            channel_id,
        }
    }
}

impl std::fmt::Display for PostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.channel_id {
            Some(channel_id) => write!(f, "{}:{}", channel_id, self.user_id),
            None => write!(f, "*:{}", self.user_id),
        }
    }
}
