//! Error types for the chat bridge.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid contact pattern '{pattern}': {source}")]
    InvalidContactPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid pattern '{pattern}' in rule #{index}: {source}")]
    InvalidRulePattern {
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to connect: {reason}")]
    ConnectFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Receive failed on channel {name}: {reason}")]
    ReceiveFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} disconnected")]
    Disconnected { name: String },
}

/// Failure to launch or await an external program.
///
/// A program that runs and exits with a non-zero status is not an error;
/// its exit code is reported in [`crate::process::CommandResult`]. These
/// errors end one dispatch and never stop the session.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Failed to launch {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed while running {path}: {source}")]
    Wait {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;
