//! Configuration validation.
//!
//! Missing essentials map to their own errors (and exit codes); everything
//! else is collected into a single `ValidationError`.

use std::path::Path;

use crate::common::error::ConfigError;
use crate::config::env::apply_env_overrides;
use crate::config::parser::load_config;
use crate::config::types::Config;

const TOKEN_PLACEHOLDER: &str = "YOUR_DISCORD_TOKEN_HERE";

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let token = config.discord.token.trim();
    if token.is_empty() || token == TOKEN_PLACEHOLDER {
        return Err(ConfigError::MissingToken);
    }
    if config.server.executable.trim().is_empty() {
        return Err(ConfigError::MissingExecutable);
    }
    if config.channel_id().is_none() {
        return Err(ConfigError::MissingChannel);
    }

    let mut errors = Vec::new();

    if config.discord.use_webhook && config.discord.webhook_name.trim().is_empty() {
        errors.push("discord.webhook_name must not be empty when use_webhook is set".to_string());
    }
    if config.discord.webhook_name.chars().count() > 80 {
        errors.push("discord.webhook_name must be at most 80 characters".to_string());
    }

    let bridge = &config.bridge;
    if bridge.queue_capacity == 0 {
        errors.push("bridge.queue_capacity must be non-zero".to_string());
    }
    if bridge.geoip_capacity == 0 {
        errors.push("bridge.geoip_capacity must be non-zero".to_string());
    }
    if bridge.job_timeout_secs == Some(0) {
        errors.push("bridge.job_timeout_secs must be non-zero (omit it to disable)".to_string());
    }
    if bridge.geoip_ttl_secs == Some(0) {
        errors.push("bridge.geoip_ttl_secs must be non-zero (omit it to disable)".to_string());
    }

    if let Some(ref formats) = config.formats {
        let templates = [
            ("chat", &formats.chat),
            ("connect", &formats.connect),
            ("disconnect", &formats.disconnect),
            ("master", &formats.master),
            ("rename", &formats.rename),
            ("kick", &formats.kick),
        ];
        for (name, template) in templates {
            if template.as_deref().is_some_and(|t| t.trim().is_empty()) {
                errors.push(format!("formats.{} must not be empty", name));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

/// Load, apply environment overrides, and validate.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config = apply_env_overrides(load_config(path)?);
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn make_valid_config() -> Config {
        Config {
            discord: DiscordConfig {
                token: "valid_token_here".to_string(),
                channel_id: "987654321".to_string(),
                use_webhook: true,
                webhook_name: "ZMDB_HOOK".to_string(),
            },
            server: ServerConfig {
                executable: "./sauer_server".to_string(),
                shutdown_grace_secs: 3,
                ..Default::default()
            },
            bridge: BridgeConfig::default(),
            formats: None,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_token_fails() {
        let mut config = make_valid_config();
        config.discord.token = String::new();

        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_placeholder_token_fails() {
        let mut config = make_valid_config();
        config.discord.token = "YOUR_DISCORD_TOKEN_HERE".to_string();

        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn test_missing_executable_fails() {
        let mut config = make_valid_config();
        config.server.executable = "  ".to_string();

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_invalid_channel_fails() {
        let mut config = make_valid_config();
        config.discord.channel_id = "general".to_string();

        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::MissingChannel));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_other_errors_are_collected() {
        let mut config = make_valid_config();
        config.bridge.queue_capacity = 0;
        config.bridge.job_timeout_secs = Some(0);
        config.formats = Some(FormatsConfig {
            kick: Some(" ".to_string()),
            ..Default::default()
        });

        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.exit_code(), 5);
        let message = err.to_string();
        assert!(message.contains("queue_capacity"));
        assert!(message.contains("job_timeout_secs"));
        assert!(message.contains("formats.kick"));
    }
}
