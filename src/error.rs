//! Error types for the agent core.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task scheduling errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} already exists")]
    Duplicate { id: String },

    #[error("Task {id} not found")]
    NotFound { id: String },

    #[error("Task {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        state: String,
        target: String,
    },
}

/// Memory store errors.
///
/// Misses and expiry are not errors; lookups return `None` or `false` for those.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Malformed memory record at index {index}: {reason}")]
    MalformedRecord { index: usize, reason: String },
}

/// Result type alias for the agent core.
pub type Result<T> = std::result::Result<T, Error>;
