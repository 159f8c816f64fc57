//! Discord implementation of the chat platform.
//!
//! Discord has no per-user sessions the bridge could open, so every game
//! client gets a virtual session: a handle the bridge tracks itself and
//! presents as the webhook username on each post. In shared mode the bot
//! posts `**name**: text` in its own name instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serenity::all::{ChannelId, CreateWebhook, ExecuteWebhook, Guild, Http, Webhook, WebhookId};
use tracing::{debug, info};

use crate::bridge::relay::{Author, ChatPlatform, SessionId};
use crate::bridge::sanitize::{display_name, escape_markdown};
use crate::common::error::{PlatformError, PlatformResult};
use crate::config::types::Config;
use crate::game::formatter::{split_message, MAX_CHAT_MESSAGE_LEN};

/// Virtual sessions and the names they must not collide with.
///
/// All comparisons are case-insensitive.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, String>,
    next_id: u64,
    /// The bot's own name.
    reserved: HashSet<String>,
    /// Display names of human guild members.
    members: HashSet<String>,
}

impl SessionTable {
    pub fn new(bot_name: &str) -> Self {
        let mut table = Self::default();
        table.reserved.insert(bot_name.to_lowercase());
        table
    }

    /// Replace the known guild member names.
    pub fn set_members<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.members = names
            .into_iter()
            .map(|n| n.as_ref().to_lowercase())
            .collect();
    }

    pub fn is_taken(&self, handle: &str, except: Option<SessionId>) -> bool {
        let lower = handle.to_lowercase();
        self.reserved.contains(&lower)
            || self.members.contains(&lower)
            || self
                .sessions
                .iter()
                .any(|(id, h)| Some(*id) != except && h.to_lowercase() == lower)
    }

    pub fn open(&mut self, handle: &str) -> PlatformResult<SessionId> {
        if self.is_taken(handle, None) {
            return Err(PlatformError::HandleTaken {
                handle: handle.to_string(),
            });
        }
        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.sessions.insert(id, handle.to_string());
        Ok(id)
    }

    pub fn rename(&mut self, session: SessionId, handle: &str) -> PlatformResult<()> {
        if !self.sessions.contains_key(&session) {
            return Err(PlatformError::SessionNotFound(session.0));
        }
        if self.is_taken(handle, Some(session)) {
            return Err(PlatformError::HandleTaken {
                handle: handle.to_string(),
            });
        }
        self.sessions.insert(session, handle.to_string());
        Ok(())
    }

    pub fn close(&mut self, session: SessionId) -> PlatformResult<String> {
        self.sessions
            .remove(&session)
            .ok_or(PlatformError::SessionNotFound(session.0))
    }

    pub fn handle(&self, session: SessionId) -> PlatformResult<String> {
        self.sessions
            .get(&session)
            .cloned()
            .ok_or(PlatformError::SessionNotFound(session.0))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

pub struct DiscordPlatform {
    http: Arc<Http>,
    channel_id: ChannelId,
    /// `None` in shared mode.
    webhook: Option<Webhook>,
    bot_name: String,
    /// Appended to every display name: the server tag, or the bot's name.
    marker: String,
    table: Mutex<SessionTable>,
}

impl DiscordPlatform {
    /// Set up posting into the bridged channel of `guild`.
    pub async fn connect(
        http: Arc<Http>,
        config: &Config,
        channel_id: ChannelId,
        bot_name: &str,
        guild: &Guild,
    ) -> PlatformResult<Self> {
        let webhook = if config.discord.use_webhook {
            Some(resolve_webhook(&http, channel_id, &config.discord.webhook_name).await?)
        } else {
            None
        };

        let marker = config
            .server
            .tag
            .clone()
            .unwrap_or_else(|| bot_name.to_string());

        let platform = Self {
            http,
            channel_id,
            webhook,
            bot_name: bot_name.to_string(),
            marker,
            table: Mutex::new(SessionTable::new(bot_name)),
        };
        platform.refresh_members(guild);

        info!(
            "Bridging into channel {} of '{}' ({})",
            channel_id,
            guild.name,
            if platform.webhook.is_some() { "webhook" } else { "shared" }
        );
        Ok(platform)
    }

    /// Id of the webhook the bridge posts through, for echo filtering.
    pub fn webhook_id(&self) -> Option<WebhookId> {
        self.webhook.as_ref().map(|w| w.id)
    }

    /// Re-read member display names from a guild snapshot.
    pub fn refresh_members(&self, guild: &Guild) {
        let names: Vec<&str> = guild
            .members
            .values()
            .filter(|m| !m.user.bot)
            .map(|m| m.display_name())
            .collect();
        debug!("Tracking {} member names of '{}'", names.len(), guild.name);
        self.table.lock().set_members(names);
    }

    async fn post(&self, display: &str, text: &str) -> PlatformResult<()> {
        match &self.webhook {
            Some(webhook) => {
                let builder = ExecuteWebhook::new().content(text).username(display);
                webhook.execute(&self.http, false, builder).await?;
            }
            None => {
                let prefix = shared_prefix(display);
                let room = MAX_CHAT_MESSAGE_LEN.saturating_sub(prefix.len()).max(1);
                for chunk in split_message(text, room) {
                    self.channel_id
                        .say(&self.http, format!("{}{}", prefix, chunk))
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[serenity::async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn open_session(&self, handle: &str) -> PlatformResult<SessionId> {
        let session = self.table.lock().open(handle)?;
        debug!("Opened session {} for '{}'", session, handle);
        Ok(session)
    }

    async fn rename_session(&self, session: SessionId, handle: &str) -> PlatformResult<()> {
        self.table.lock().rename(session, handle)
    }

    async fn close_session(&self, session: SessionId) -> PlatformResult<()> {
        let (handle, remaining) = {
            let mut table = self.table.lock();
            (table.close(session)?, table.len())
        };
        debug!("Closed session {} ('{}'), {} still open", session, handle, remaining);
        Ok(())
    }

    async fn send_outbound(&self, author: Author<'_>, text: &str) -> PlatformResult<()> {
        let name = match author {
            Author::Session(session) => self.table.lock().handle(session)?,
            Author::Display(name) => name.to_string(),
        };
        let display = display_name(&name, &self.marker);
        self.post(&display, text).await
    }

    fn primary_handle(&self) -> String {
        self.bot_name.clone()
    }
}

/// Bold author prefix for shared mode; webhook usernames render as-is.
fn shared_prefix(display: &str) -> String {
    format!("**{}**: ", escape_markdown(display))
}

/// Find the channel webhook with this name, creating it if absent.
async fn resolve_webhook(http: &Arc<Http>, channel_id: ChannelId, name: &str) -> PlatformResult<Webhook> {
    let existing = channel_id.webhooks(http).await?;
    if let Some(webhook) = existing
        .into_iter()
        .find(|w| w.name.as_deref() == Some(name))
    {
        debug!("Using existing webhook '{}'", name);
        return Ok(webhook);
    }

    info!("Creating webhook '{}' in channel {}", name, channel_id);
    let webhook = channel_id.create_webhook(http, CreateWebhook::new(name)).await?;
    Ok(webhook)
}
