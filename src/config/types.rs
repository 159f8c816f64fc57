//! Configuration type definitions.

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    pub formats: Option<FormatsConfig>,
}

impl Config {
    /// The bridged channel id, if it is set and numeric.
    pub fn channel_id(&self) -> Option<u64> {
        self.discord
            .channel_id
            .trim()
            .parse()
            .ok()
            .filter(|id| *id != 0)
    }
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
    /// Kept as a string so a quoted id in the file still parses.
    #[serde(default)]
    pub channel_id: String,
    /// Post through a webhook with one display name per client.
    /// When false, the bot posts `**name**: text` itself.
    #[serde(default = "default_use_webhook")]
    pub use_webhook: bool,
    #[serde(default = "default_webhook_name")]
    pub webhook_name: String,
}

/// Game server process configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<String>,
    /// Marker appended to every display name; defaults to the bot's name.
    pub tag: Option<String>,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// Bridge core tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Strip all markup characters instead of escaping a few.
    pub escape_all_game_input: bool,
    pub max_handle_retries: u32,
    pub queue_capacity: usize,
    pub job_timeout_secs: Option<u64>,
    pub geoip_ttl_secs: Option<u64>,
    pub geoip_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            escape_all_game_input: false,
            max_handle_retries: 5,
            queue_capacity: 1024,
            job_timeout_secs: None,
            geoip_ttl_secs: Some(60),
            geoip_capacity: 256,
        }
    }
}

/// Message template overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatsConfig {
    pub chat: Option<String>,
    pub connect: Option<String>,
    pub disconnect: Option<String>,
    pub master: Option<String>,
    pub rename: Option<String>,
    pub kick: Option<String>,
}

fn default_use_webhook() -> bool {
    true
}

fn default_webhook_name() -> String {
    "ZMDB_HOOK".to_string()
}

fn default_shutdown_grace() -> u64 {
    3
}
