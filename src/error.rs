// src/error.rs - Error types for the admission, scheduling, automation and storage layers

use thiserror::Error;

/// Failures of the durable record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record id '{0}'")]
    InvalidId(String),
}

/// Failures reported by the chat platform API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// Target member, role or ban does not exist (already reversed, already left...)
    #[error("target not found")]
    NotFound,

    #[error("missing platform permission: {0}")]
    Forbidden(String),

    #[error("transient platform failure: {0}")]
    Transient(String),

    #[error("platform call timed out")]
    Timeout,
}

/// Failures of a single command execution
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("{actor} may not run '{command}'")]
    PermissionDenied { actor: String, command: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("command failed: {0}")]
    Failed(String),
}

/// Failures creating or reversing temporal actions
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("temporal action duration must be positive")]
    InvalidDuration,

    #[error("failed to apply moderation effect: {0}")]
    Apply(PlatformError),

    #[error("failed to reverse moderation effect: {0}")]
    Reverse(PlatformError),

    #[error("failed to persist temporal action: {0}")]
    Persist(#[from] StoreError),

    #[error("temporal action {0} not found")]
    NotFound(uuid::Uuid),
}

/// Invalid configuration documents and declarations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
