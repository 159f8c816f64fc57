//! The two external capabilities the bridge core depends on.
//!
//! The dispatcher and inbound relay only ever talk to the chat platform
//! and the game process through these traits, so everything above them
//! can be driven by in-memory fakes in tests.

use async_trait::async_trait;

use crate::common::error::{BridgeResult, PlatformResult};

/// Opaque handle of one identity's session on the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who a chat-platform message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author<'a> {
    /// A live identity's own session.
    Session(SessionId),
    /// A game name with no live identity, posted through the bridge's own handle.
    Display(&'a str),
}

/// Chat platform side of the bridge.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Open a session presenting `handle`.
    ///
    /// Fails with `PlatformError::HandleTaken` when the handle collides.
    async fn open_session(&self, handle: &str) -> PlatformResult<SessionId>;

    /// Change the handle of an open session.
    async fn rename_session(&self, session: SessionId, handle: &str) -> PlatformResult<()>;

    /// Terminate a session.
    async fn close_session(&self, session: SessionId) -> PlatformResult<()>;

    /// Post text to the bridged channel.
    async fn send_outbound(&self, author: Author<'_>, text: &str) -> PlatformResult<()>;

    /// The bridge's own handle on the platform.
    fn primary_handle(&self) -> String;
}

/// Game process side of the bridge.
#[async_trait]
pub trait GameSink: Send + Sync {
    /// Write one console command to the game's stdin.
    async fn send_to_process(&self, text: &str) -> BridgeResult<()>;
}
