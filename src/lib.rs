//! Slowmode - per-user post rate limiting for chat channels
//!
//! This crate implements a chat-server message plugin that enforces a minimum
//! delay between successive posts from the same user, optionally per channel.
//! Channels configure the delay through a YAML fragment in their header.

pub mod config;
pub mod duration;
pub mod error;
pub mod host;
pub mod plugin;
pub mod ratelimit;
pub mod replay;
