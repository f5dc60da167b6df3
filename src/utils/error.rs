//! Error types for the HDR merge workflow.
//!
//! Provides a hierarchy of error types using `thiserror` for ergonomic error handling.
//! Everything here is `Serialize` so command handlers can hand errors straight to
//! the frontend.

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use serde::Serialize;

/// File path errors raised while probing dropped or picked files.
#[derive(Error, Debug, Clone, Serialize, PartialEq, Eq)]
pub enum PathError {
    /// File does not exist
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    /// Path exists but is not a file
    #[error("Not a file: {0}")]
    NotFile(PathBuf),
    /// IO error accessing the path
    #[error("IO error: {0}")]
    IO(String),
}

/// Failures at the engine boundary.
///
/// Cloneable so the lifecycle manager can hand the same failure to every
/// caller that waited on one initialization.
#[derive(Error, Debug, Clone, Serialize, PartialEq, Eq)]
pub enum EngineError {
    /// The interpreter process could not be started or never became ready
    #[error("Engine spawn failed: {0}")]
    Spawn(String),

    /// A native capability (numeric arrays, image codecs) failed to load
    #[error("Capability load failed: {0}")]
    Capability(String),

    /// The routine source could not be retrieved
    #[error("Routine fetch failed: {0}")]
    RoutineFetch(String),

    /// The routine source was rejected by the interpreter
    #[error("Routine install failed: {0}")]
    Install(String),

    /// The routine raised, or the host faulted while running it
    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// The host answered with something that is not a valid frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The host went away (killed, crashed, or shut down)
    #[error("Engine closed: {0}")]
    Closed(String),

    /// Capability loading and routine install did not finish in time
    #[error("Engine initialization timed out after {0} ms")]
    InitTimeout(u64),
}

/// Convenience result type for engine boundary operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn spawn<T: Into<String>>(msg: T) -> Self {
        Self::Spawn(msg.into())
    }

    pub fn invocation<T: Into<String>>(msg: T) -> Self {
        Self::Invocation(msg.into())
    }

    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn closed<T: Into<String>>(msg: T) -> Self {
        Self::Closed(msg.into())
    }
}

/// Why a merge request was turned away without changing any state.
#[derive(Error, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum MergeRejection {
    /// The working set is outside the permitted size
    #[error("Merge needs between {min} and {max} images, {count} staged")]
    InvalidImageCount { count: usize, min: usize, max: usize },

    /// Another attempt is still between engine wait and invocation
    #[error("A merge is already in progress")]
    AttemptInFlight,
}

/// Main error type for the application.
///
/// All errors in the application are converted to this type before being
/// returned to the frontend.
#[derive(Error, Debug, Serialize)]
pub enum HdrError {
    /// Input or configuration validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Path probing failed
    #[error("Path error: {0}")]
    Path(#[from] PathError),

    /// Engine boundary failure outside of a merge attempt (warmup)
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Merge request rejected by the orchestrator guard
    #[error("Merge rejected: {0}")]
    Rejected(#[from] MergeRejection),

    /// File IO error
    #[error("IO error: {0}")]
    IO(String),

    /// Unsupported or invalid image format
    #[error("Format error: {0}")]
    Format(String),

    /// A download or thumbnail reference no longer points at anything
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Convenience result type for application operations.
pub type HdrResult<T> = Result<T, HdrError>;

// Helper methods for error creation
impl HdrError {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }

    pub fn io<T: Into<String>>(msg: T) -> Self {
        Self::IO(msg.into())
    }

    pub fn format<T: Into<String>>(msg: T) -> Self {
        Self::Format(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
}

// Convert std::io::Error to HdrError
impl From<io::Error> for HdrError {
    fn from(err: io::Error) -> Self {
        Self::IO(err.to_string())
    }
}

// Convert io::Error to PathError
impl From<io::Error> for PathError {
    fn from(err: io::Error) -> Self {
        Self::IO(err.to_string())
    }
}

// Convert io::Error to EngineError; any pipe failure means the host is gone.
impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        Self::Closed(err.to_string())
    }
}

impl From<serde_json::Error> for HdrError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON: {err}"))
    }
}
