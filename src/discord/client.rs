//! Discord bot client abstraction.
//!
//! Runs the serenity gateway connection, forwards gateway events to a
//! channel, and hands the rest of the application a ready `DiscordPlatform`
//! once the bridged channel's guild is known.

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use serenity::all::{ChannelId, Context, EventHandler, GatewayIntents, Guild, Message, Ready};
use serenity::async_trait;
use serenity::http::HttpBuilder;
use serenity::Client;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::types::Config;
use crate::discord::handler::{InboundFilter, MessageHandler};
use crate::discord::platform::DiscordPlatform;

/// How long startup waits for the gateway to deliver the bridged guild.
const INIT_TIMEOUT: Duration = Duration::from_secs(15);

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub enum DiscordBotEvent {
    /// Bot connected and ready.
    Ready(Ready),
    /// Guild data received.
    GuildCreate { context: Context, guild: Guild },
    /// Message received.
    Message { context: Context, message: Message },
    Disconnected,
}

struct DiscordBotEvents {
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
}

impl DiscordBotEvents {
    fn new(discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> Self {
        Self { discord_events_tx }
    }
}

#[async_trait]
impl EventHandler for DiscordBotEvents {
    async fn ready(&self, _context: Context, ready: Ready) {
        if let Err(error) = self.discord_events_tx.send(DiscordBotEvent::Ready(ready)) {
            warn!("Failed to process discord event: {}", error);
        }
    }

    async fn guild_create(&self, context: Context, guild: Guild, _is_new: Option<bool>) {
        if let Err(error) = self
            .discord_events_tx
            .send(DiscordBotEvent::GuildCreate { context, guild })
        {
            warn!("Failed to process discord event: {}", error);
        }
    }

    async fn message(&self, context: Context, message: Message) {
        if let Err(error) = self
            .discord_events_tx
            .send(DiscordBotEvent::Message { context, message })
        {
            warn!("Failed to process discord event: {}", error);
        }
    }
}

async fn build_client(
    token: &str,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
) -> anyhow::Result<Client> {
    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS;

    // Build a custom reqwest client with timeout settings
    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let http = HttpBuilder::new(token).client(reqwest_client).build();

    let events = DiscordBotEvents::new(discord_events_tx);
    let client = serenity::client::ClientBuilder::new_with_http(http, intents)
        .event_handler(events)
        .await?;
    Ok(client)
}

/// A gateway connection that has not finished starting up yet.
pub struct DiscordBot {
    token: String,
    client: Option<Client>,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
    discord_events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
}

/// A running gateway connection, split so each part can live on its own task.
pub struct DiscordSession {
    pub platform: Arc<DiscordPlatform>,
    pub filter: InboundFilter,
    pub events: DiscordEvents,
    pub connection: DiscordConnection,
}

/// Gateway events after startup.
pub struct DiscordEvents {
    discord_events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
    platform: Arc<DiscordPlatform>,
    channel_id: ChannelId,
}

/// Handle to the reconnect loop.
pub struct DiscordConnection {
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl DiscordBot {
    pub async fn build(token: &str) -> anyhow::Result<Self> {
        let (discord_events_tx, discord_events_rx) = mpsc::unbounded_channel::<DiscordBotEvent>();
        let client = build_client(token, discord_events_tx.clone()).await?;

        Ok(Self {
            token: token.to_string(),
            client: Some(client),
            discord_events_tx,
            discord_events_rx,
        })
    }

    /// Connect, wait for the bridged channel's guild, and set up the platform.
    pub async fn start(mut self, config: &Config, channel_id: ChannelId) -> anyhow::Result<DiscordSession> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(
            self.client.take(),
            self.token.clone(),
            self.discord_events_tx.clone(),
            shutdown_rx,
        ));

        info!("Waiting for Discord to become ready...");
        let startup = tokio::time::timeout(
            INIT_TIMEOUT,
            wait_for_guild(&mut self.discord_events_rx, channel_id),
        )
        .await;

        let (context, ready, guild) = match startup {
            Ok(Some(found)) => found,
            Ok(None) => {
                let _ = shutdown_tx.send(true);
                anyhow::bail!("Discord event channel closed during startup");
            }
            Err(_) => {
                let _ = shutdown_tx.send(true);
                anyhow::bail!(
                    "Timed out after {}s waiting for the guild containing channel {}",
                    INIT_TIMEOUT.as_secs(),
                    channel_id
                );
            }
        };

        let platform = DiscordPlatform::connect(
            context.http.clone(),
            config,
            channel_id,
            &ready.user.name,
            &guild,
        )
        .await?;

        let filter = InboundFilter {
            channel_id,
            bot_id: ready.user.id,
            webhook_id: platform.webhook_id(),
        };

        let platform = Arc::new(platform);
        Ok(DiscordSession {
            platform: platform.clone(),
            filter,
            events: DiscordEvents {
                discord_events_rx: self.discord_events_rx,
                platform,
                channel_id,
            },
            connection: DiscordConnection { shutdown_tx, task },
        })
    }
}

/// Consume events until Ready and the guild containing `channel_id` have arrived.
async fn wait_for_guild(
    discord_events_rx: &mut mpsc::UnboundedReceiver<DiscordBotEvent>,
    channel_id: ChannelId,
) -> Option<(Context, Ready, Guild)> {
    let mut ready = None;

    while let Some(event) = discord_events_rx.recv().await {
        match event {
            DiscordBotEvent::Ready(r) => {
                info!("Discord bot connected as {}", r.user.name);
                ready = Some(r);
            }
            DiscordBotEvent::GuildCreate { context, guild } => {
                if !guild.channels.contains_key(&channel_id) {
                    debug!("Guild '{}' does not contain the bridged channel", guild.name);
                    continue;
                }
                match ready.take() {
                    Some(r) => return Some((context, r, guild)),
                    None => error!("Received GuildCreate event before Ready event"),
                }
            }
            DiscordBotEvent::Message { .. } => {
                debug!("Dropping Discord message received during startup");
            }
            DiscordBotEvent::Disconnected => {
                ready = None;
            }
        }
    }
    None
}

impl DiscordEvents {
    /// Relay channel messages to the game until the gateway shuts down.
    pub async fn run(mut self, handler: MessageHandler) {
        while let Some(event) = self.discord_events_rx.recv().await {
            match event {
                DiscordBotEvent::Ready(ready) => {
                    info!("Discord bot reconnected as {}", ready.user.name);
                }
                DiscordBotEvent::GuildCreate { guild, .. } => {
                    if guild.channels.contains_key(&self.channel_id) {
                        self.platform.refresh_members(&guild);
                    }
                }
                DiscordBotEvent::Message { context, message } => {
                    handler.handle_message(&context, &message).await;
                }
                DiscordBotEvent::Disconnected => {
                    warn!("Discord disconnected; messages are dropped until it reconnects");
                }
            }
        }
        debug!("Discord events channel closed.");
    }
}

impl DiscordConnection {
    /// Stop the gateway connection and wait for the shards to close.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("Discord connection task failed: {}", e);
        }
    }
}

/// Create an exponential backoff iterator for Discord reconnection.
/// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
fn discord_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(MAX_RECONNECT_DELAY)
        .with_factor(1.1)
        .with_jitter()
        .without_max_times()
        .build()
}

async fn run_connection(
    mut client: Option<Client>,
    token: String,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = discord_backoff();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        info!("Connecting to Discord...");

        let mut current = match client.take() {
            Some(client) => client,
            None => {
                // serenity mostly handles reconnections itself.
                match build_client(&token, discord_events_tx.clone()).await {
                    Ok(client) => {
                        backoff = discord_backoff();
                        client
                    }
                    Err(e) => {
                        error!("Failed to rebuild Discord client: {}", e);
                        let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                        warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                        if wait_or_shutdown(delay, &mut shutdown_rx).await {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        let shard_manager = current.shard_manager.clone();
        tokio::select! {
            result = current.start() => match result {
                Ok(()) => {
                    info!("Discord client disconnected normally");
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    break;
                }
                Err(e) => {
                    error!("Discord client error: {}", e);
                    let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                    warn!(
                        "Discord disconnected. Reconnecting in {:.1}s...",
                        delay.as_secs_f64(),
                    );
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    if wait_or_shutdown(delay, &mut shutdown_rx).await {
                        break;
                    }
                }
            },
            _ = shutdown_requested(&mut shutdown_rx) => {
                info!("Initiating graceful Discord shutdown...");
                shard_manager.shutdown_all().await;
                info!("Discord shutdown complete");
                break;
            }
        }
    }
    info!("Discord task ended");
}

/// Sleep for `delay`; returns true if shutdown was requested meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(delay) => false,
        _ = shutdown_requested(shutdown_rx) => true,
    }
}

/// Resolves once shutdown is requested or the requester is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
