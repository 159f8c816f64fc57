//! Chat → game relay.
//!
//! Turns a message posted in the bridged channel into `s_talkbot_fakesay`
//! console commands. Runs beside the dispatcher, not through it.

use std::sync::Arc;

use tracing::{debug, info};

use crate::bridge::registry::OwnedHandles;
use crate::bridge::relay::GameSink;
use crate::bridge::sanitize::fakesay_command;
use crate::common::error::BridgeResult;
use crate::common::types::InboundMessage;

/// Sender shown in game when the platform gave no name.
pub const UNKNOWN_SENDER: &str = "?!?!?";

pub struct InboundRelay {
    sink: Arc<dyn GameSink>,
    owned: OwnedHandles,
}

impl InboundRelay {
    pub fn new(sink: Arc<dyn GameSink>, owned: OwnedHandles) -> Self {
        Self { sink, owned }
    }

    /// Forward one message to the game. Returns the number of commands written.
    ///
    /// Messages from a handle the bridge controls are echoes and are skipped.
    pub async fn relay(&self, message: &InboundMessage) -> BridgeResult<usize> {
        let sender = message.sender.as_deref().unwrap_or(UNKNOWN_SENDER);
        if message.sender.is_some() && self.owned.contains(sender) {
            debug!("Ignoring echo from owned handle '{}'", sender);
            return Ok(0);
        }

        let mut written = 0;
        for line in message.content.split('\n') {
            if line.trim().is_empty() {
                continue;
            }
            self.write(&fakesay_command(sender, line)).await?;
            written += 1;
        }

        for (name, url) in &message.attachments {
            let line = format!("has uploaded the file {}: {}", name, url);
            self.write(&fakesay_command(sender, &line)).await?;
            written += 1;
        }

        Ok(written)
    }

    async fn write(&self, command: &str) -> BridgeResult<()> {
        info!(target: "game::stdin", "{}", command);
        self.sink.send_to_process(command).await
    }
}
