//! Sauerbridge - Discord chat bridge for Sauerbraten game servers
//!
//! Runs the game server as a child process, relays its console events to a
//! Discord channel with one virtual identity per connected player, and
//! relays channel messages back into the game.

mod bridge;
mod common;
mod config;
mod discord;
mod game;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use serenity::all::ChannelId;
use tokio::io::AsyncRead;
use tokio::signal;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use bridge::{Dispatcher, DispatcherHandle, DispatcherOptions, GameSink, InboundRelay};
use common::error::{BridgeError, ConfigError};
use common::Event;
use config::{env::get_config_path, load_and_validate};
use discord::{DiscordBot, DiscordSession, MessageHandler};
use game::codec::ConsoleCodec;
use game::{console_lines, GameProcess, LineClassifier, ProcessStdin};

/// How long the console reader may take to reach EOF after the server stops.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the dispatcher may take to finish queued jobs and close sessions.
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Sauerbridge v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = match load_and_validate(&config_path) {
        Ok(config) => config,
        Err(e) => exit_with_config_error(&config_path, e),
    };
    let Some(channel_id) = config.channel_id().map(ChannelId::new) else {
        exit_with_config_error(&config_path, ConfigError::MissingChannel);
    };

    info!("Configuration loaded successfully");
    info!("  Server: {} {}", config.server.executable, config.server.args.join(" "));
    info!("  Channel: {}", channel_id);
    info!(
        "  Mode: {}",
        if config.discord.use_webhook { "webhook" } else { "shared" }
    );

    // ============================================================
    // Start Discord
    // ============================================================
    info!("Starting Discord bot...");
    let bot = DiscordBot::build(&config.discord.token).await?;
    let DiscordSession {
        platform,
        filter,
        events,
        connection,
    } = bot.start(&config, channel_id).await.map_err(|e| {
        error!("Failed to initialize Discord client: {}", e);
        e
    })?;
    info!("Discord initialization complete! Starting game server...");

    // ============================================================
    // Start the game server
    // ============================================================
    let (mut process, stdin, stdout) = match GameProcess::spawn(&config.server) {
        Ok(spawned) => spawned,
        Err(e) => {
            error!("Failed to start game server '{}': {}", config.server.executable, e);
            connection.shutdown().await;
            return Err(e.into());
        }
    };
    let stdin = Arc::new(ProcessStdin::new(stdin));

    // ============================================================
    // Spawn bridge tasks
    // ============================================================
    let (dispatcher, handle) = Dispatcher::new(platform.clone(), DispatcherOptions::from_config(&config));
    let relay = InboundRelay::new(stdin.clone(), dispatcher.owned_handles());

    // Task 1: ordered game -> Discord dispatch
    let dispatcher_task = tokio::spawn(dispatcher.run());

    // Task 2: game console reader
    let reader_task = tokio::spawn(read_console(console_lines(stdout), handle));

    // Task 3: Discord -> game relay
    let events_task = tokio::spawn(events.run(MessageHandler::new(filter, relay)));

    // Task 4: operator console passthrough
    let operator_task = tokio::spawn(forward_operator_input(stdin.clone()));

    // ============================================================
    // Run until a signal or the server exits
    // ============================================================
    tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - stopping game server...");
        }
        status = process.wait() => match status {
            Ok(status) => warn!("Game server exited ({})", status),
            Err(e) => error!("Failed to wait for game server: {}", e),
        },
    }

    operator_task.abort();

    match process.terminate().await {
        Ok(status) => info!("Game server stopped ({})", status),
        Err(e) => warn!("Failed to stop game server: {}", e),
    }

    // The reader owns the dispatcher handle; once it is gone the dispatcher
    // finishes its queue and closes every session.
    let reader_abort = reader_task.abort_handle();
    if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader_task).await.is_err() {
        warn!("Game console did not close, abandoning remaining output");
        reader_abort.abort();
    }

    match tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, dispatcher_task).await {
        Ok(Ok(())) => info!("All chat sessions closed"),
        Ok(Err(e)) => warn!("Dispatcher task panicked: {}", e),
        Err(_) => warn!("Dispatcher drain timed out"),
    }

    connection.shutdown().await;
    if let Err(e) = events_task.await {
        debug!("Discord event task ended abnormally: {}", e);
    }

    info!("Exiting...");
    Ok(())
}

fn exit_with_config_error(config_path: &str, e: ConfigError) -> ! {
    error!("Failed to load configuration: {}", e);
    error!("Please ensure {} exists and is properly formatted.", config_path);
    std::process::exit(e.exit_code());
}

/// Echo, classify, and submit every console line until the server's stdout closes.
async fn read_console<R>(mut lines: FramedRead<R, ConsoleCodec>, handle: DispatcherHandle)
where
    R: AsyncRead + Unpin,
{
    let classifier = LineClassifier::new();

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read game console: {}", e);
                break;
            }
        };
        info!(target: "game", "{}", line);

        let event = classifier.classify(&line);
        if let Event::Unrecognized { .. } = event {
            continue;
        }
        match handle.submit(event).await {
            Ok(()) => {}
            Err(BridgeError::QueueClosed) => {
                warn!("Dispatcher stopped, no longer relaying game events");
                break;
            }
            Err(e) => debug!("Dropping console line: {}", e),
        }
    }
    info!("Game console closed");
}

/// Forward lines typed on the bridge's own stdin to the game server.
async fn forward_operator_input(sink: Arc<dyn GameSink>) {
    let mut lines = console_lines(tokio::io::stdin());

    while let Some(Ok(line)) = lines.next().await {
        if line.trim().is_empty() {
            continue;
        }
        info!(target: "game::stdin", "{}", line);
        if let Err(e) = sink.send_to_process(&line).await {
            warn!("Failed to forward operator input: {}", e);
            break;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
