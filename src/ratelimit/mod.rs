//! Rate limiting logic and state management.

mod cache;
pub mod header;
mod key;
mod limiter;
mod store;

pub use cache::ChannelConfigCache;
pub use header::{ChannelConfig, ChannelLimit, LimitSource};
pub use key::PostKey;
pub use limiter::{Decision, RateLimiter, DEFAULT_POST_LIMIT};
pub use store::{LastPostStore, PostCheck};
