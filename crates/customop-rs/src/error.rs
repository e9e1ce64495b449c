//! Error types for the custom operator engine.

use thiserror::Error;

/// Failures reported synchronously by registry and dispatch calls.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("custom operator '{0}' is not registered")]
    OperatorNotFound(String),

    #[error("creator for custom operator '{op_type}' failed: {message}")]
    CreatorFailed { op_type: String, message: String },

    #[error("custom operator engine is shutting down; no further tasks are accepted")]
    ShutDown,

    #[error("tag count ({tags}) does not match array count ({arrs})")]
    TagCountMismatch { arrs: usize, tags: usize },

    #[error("expected {expected} sparse output handles to rebind, got {actual}")]
    OutputCountMismatch { expected: usize, actual: usize },

    #[error("the process-wide custom operator engine is already initialized")]
    AlreadyInitialized,
}

/// Failure of a single task, delivered to its completion signal.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("custom operator callback failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("custom operator callback panicked: {0}")]
    Panicked(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
