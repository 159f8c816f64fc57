//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `SAUERBRIDGE_DISCORD_TOKEN` - Discord bot token
//! - `SAUERBRIDGE_CHANNEL_ID` - Bridged Discord channel
//! - `SAUERBRIDGE_SERVER_EXECUTABLE` - Game server binary

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "SAUERBRIDGE";

/// Apply environment variable overrides to a config.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(token) = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)) {
        config.discord.token = token;
    }
    if let Ok(channel_id) = env::var(format!("{}_CHANNEL_ID", ENV_PREFIX)) {
        config.discord.channel_id = channel_id;
    }
    if let Ok(executable) = env::var(format!("{}_SERVER_EXECUTABLE", ENV_PREFIX)) {
        config.server.executable = executable;
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `SAUERBRIDGE_CONFIG`, otherwise returns "config.toml".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "config.toml".to_string())
}
