//! Configuration file parsing (TOML format).

use std::path::Path;

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Load configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;

    load_config_str(&content)
}

/// Load configuration from a TOML string.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_str(
            r#"
            [discord]
            token = "abc"
            channel_id = "42"

            [server]
            executable = "./sauer_server"
            "#,
        )
        .unwrap();

        assert_eq!(config.channel_id(), Some(42));
        assert!(config.discord.use_webhook);
        assert_eq!(config.discord.webhook_name, "ZMDB_HOOK");
        assert_eq!(config.server.shutdown_grace_secs, 3);
        assert!(config.server.args.is_empty());
        assert_eq!(config.bridge.max_handle_retries, 5);
        assert_eq!(config.bridge.geoip_ttl_secs, Some(60));
        assert!(config.formats.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            [discord]
            token = "abc"
            channel_id = "42"
            use_webhook = false

            [server]
            executable = "/opt/sauer/server"
            args = ["-c", "server-init.cfg"]
            cwd = "/opt/sauer"
            tag = "insta"

            [bridge]
            escape_all_game_input = true
            job_timeout_secs = 10

            [formats]
            connect = "connected%location"
            "#,
        )
        .unwrap();

        assert!(!config.discord.use_webhook);
        assert_eq!(config.server.args, vec!["-c", "server-init.cfg"]);
        assert_eq!(config.server.tag.as_deref(), Some("insta"));
        assert!(config.bridge.escape_all_game_input);
        assert_eq!(config.bridge.job_timeout_secs, Some(10));
        assert_eq!(config.bridge.queue_capacity, 1024);
        let formats = config.formats.unwrap();
        assert_eq!(formats.connect.as_deref(), Some("connected%location"));
        assert!(formats.chat.is_none());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = load_config_str("[discord\ntoken = ");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_config("/nonexistent/sauerbridge.toml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
        assert_eq!(err.exit_code(), 4);
    }
}
