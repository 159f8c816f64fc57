//! Error types for the application.

use thiserror::Error;

use crate::common::types::ClientId;

/// Configuration-related errors.
///
/// These are the only fatal errors: each one aborts startup with its own
/// exit code before any event loop runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("No Discord token found in the config")]
    MissingToken,

    #[error("server.executable is not set or is empty")]
    MissingExecutable,

    #[error("discord.channel_id is not set or is not a valid channel id")]
    MissingChannel,

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl ConfigError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingToken => 1,
            Self::MissingExecutable => 2,
            Self::MissingChannel => 3,
            Self::IoError { .. } | Self::ParseError { .. } => 4,
            Self::ValidationError { .. } => 5,
        }
    }
}

/// Chat platform errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Handle '{handle}' is already taken")]
    HandleTaken { handle: String },

    #[error("Unknown session {0}")]
    SessionNotFound(u64),

    #[error("Chat platform is not ready: {message}")]
    NotReady { message: String },

    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),
}

/// Per-job and per-line errors.
///
/// None of these are fatal; the dispatcher logs them and moves on.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Unrecognized line: {line}")]
    MalformedInput { line: String },

    #[error("Handle collision for client {client_id}: '{handle}' gave up after {attempts} attempts")]
    IdentityCollision {
        client_id: ClientId,
        handle: String,
        attempts: u32,
    },

    #[error("No live identity for client {client_id}")]
    IdentityNotFound { client_id: ClientId },

    #[error("Client {client_id} already has a live identity")]
    AlreadyLive { client_id: ClientId },

    #[error("Platform call failed: {0}")]
    ExternalCall(#[from] PlatformError),

    #[error("Game process I/O failed: {0}")]
    Process(#[from] std::io::Error),

    #[error("Job timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Dispatcher queue is closed")]
    QueueClosed,
}

/// Result type alias for dispatcher jobs.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Result type alias for platform operations.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_exit_codes_are_distinct() {
        let codes = [
            ConfigError::MissingToken.exit_code(),
            ConfigError::MissingExecutable.exit_code(),
            ConfigError::MissingChannel.exit_code(),
            ConfigError::ParseError {
                message: String::new(),
            }
            .exit_code(),
            ConfigError::ValidationError {
                message: String::new(),
            }
            .exit_code(),
        ];
        assert_eq!(codes, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_platform_error_converts() {
        let err: BridgeError = PlatformError::HandleTaken {
            handle: "Alice".to_string(),
        }
        .into();
        assert!(err.to_string().contains("Alice"));
    }
}
