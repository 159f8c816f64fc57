//! Discord message event handling.
//!
//! Decides which channel messages reach the game and reduces them to an
//! `InboundMessage` for the inbound relay.

use serenity::all::{ChannelId, Context, Message, UserId, WebhookId};
use tracing::{debug, warn};

use crate::bridge::inbound::InboundRelay;
use crate::common::types::InboundMessage;

/// Which messages are relayed to the game.
#[derive(Debug, Clone, Copy)]
pub struct InboundFilter {
    pub channel_id: ChannelId,
    pub bot_id: UserId,
    /// The bridge's own webhook; its posts are echoes.
    pub webhook_id: Option<WebhookId>,
}

impl InboundFilter {
    pub fn accepts(
        &self,
        channel_id: ChannelId,
        author_id: UserId,
        webhook_id: Option<WebhookId>,
    ) -> bool {
        channel_id == self.channel_id
            && author_id != self.bot_id
            && (webhook_id.is_none() || webhook_id != self.webhook_id)
    }
}

/// Sender name as shown in the guild: nickname, then global name, then username.
pub fn pick_sender(nick: Option<&str>, global_name: Option<&str>, username: &str) -> Option<String> {
    [nick, global_name, Some(username)]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|n| !n.is_empty())
        .map(str::to_string)
}

/// Reduce a Discord message to what the game needs.
pub fn to_inbound(context: &Context, message: &Message) -> InboundMessage {
    let nick = message.member.as_ref().and_then(|m| m.nick.as_deref());
    let sender = pick_sender(
        nick,
        message.author.global_name.as_deref(),
        &message.author.name,
    );

    InboundMessage {
        sender,
        content: message.content_safe(&context.cache),
        attachments: message
            .attachments
            .iter()
            .map(|a| (a.filename.clone(), a.url.clone()))
            .collect(),
    }
}

/// Handles messages arriving from the gateway.
pub struct MessageHandler {
    filter: InboundFilter,
    relay: InboundRelay,
}

impl MessageHandler {
    pub fn new(filter: InboundFilter, relay: InboundRelay) -> Self {
        Self { filter, relay }
    }

    pub async fn handle_message(&self, context: &Context, message: &Message) {
        if !self
            .filter
            .accepts(message.channel_id, message.author.id, message.webhook_id)
        {
            return;
        }

        let inbound = to_inbound(context, message);
        if inbound.content.trim().is_empty() && inbound.attachments.is_empty() {
            return;
        }

        match self.relay.relay(&inbound).await {
            Ok(count) => debug!(
                "Discord -> game: {} command(s) from {}",
                count,
                inbound.sender.as_deref().unwrap_or("?")
            ),
            Err(e) => warn!("Failed to relay Discord message to the game: {}", e),
        }
    }
}
