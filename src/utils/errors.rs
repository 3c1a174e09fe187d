// src/utils/errors.rs
//! Engine error types
//!
//! One closed error taxonomy for the whole core. Validation rejections are
//! deliberately NOT here: they are values (`RejectionCode`), not errors,
//! and never propagate as `Err`.

use thiserror::Error;

/// Convenience result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the simulation core
#[derive(Debug, Error)]
pub enum EngineError {
    /// A queue operation was called against the wrong channel mode
    #[error("queue '{queue}' opened as {mode} does not allow {operation}")]
    QueueMode {
        queue: String,
        mode: &'static str,
        operation: &'static str,
    },

    /// The backing queue store rejected an operation
    #[error("queue store error: {0}")]
    QueueStore(String),

    /// Sandbox pool could not produce an instance
    #[error("sandbox pool exhausted")]
    PoolExhausted,

    /// Loading a user's execution context failed
    #[error("script store error for user '{user_id}': {message}")]
    ScriptStore { user_id: String, message: String },

    /// A state provider lookup failed
    #[error("state provider error: {0}")]
    StateProvider(String),

    /// A mutation dispatcher rejected a batch
    #[error("mutation dispatch failed: {0}")]
    Dispatch(String),

    /// A collaborator sink (memory, notification, history) failed
    #[error("sink error: {0}")]
    Sink(String),

    /// Unit of work exceeded its deadline
    #[error("execution timed out")]
    ExecutionTimeout,

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// JSON (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for runtime wiring failures
    #[error("runtime error: {0}")]
    Runtime(String),
}
