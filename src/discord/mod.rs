//! Discord bot integration.
//!
//! This module provides the Discord side of the bridge: the gateway
//! connection, the webhook-backed chat platform, and inbound message
//! handling.

pub mod client;
pub mod handler;
pub mod platform;

// Re-export main types for external use
pub use client::{DiscordBot, DiscordSession};
pub use handler::MessageHandler;
pub use platform::DiscordPlatform;
