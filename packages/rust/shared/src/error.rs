//! Error types for Notecast.
//!
//! Library crates use [`NotecastError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only two variants are fatal to a generation job:
//! [`NotecastError::NoUsableContent`] and [`NotecastError::SynthesisFailed`].
//! Render, poll and publish problems never surface as errors from the
//! pipeline; they are absorbed into explicit outcome enums in `notecast-core`.

use std::path::PathBuf;

/// Top-level error type for all Notecast operations.
#[derive(Debug, thiserror::Error)]
pub enum NotecastError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP transport error talking to an external service.
    #[error("network error: {0}")]
    Network(String),

    /// An external generation capability returned an error or a malformed response.
    #[error("provider error: {0}")]
    Provider(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Blob storage upload/delete error.
    #[error("blob storage error: {0}")]
    Blob(String),

    /// Media encoding or inspection error.
    #[error("media error: {0}")]
    Media(String),

    /// A record that was looked up does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad variant, illegal state transition, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The selected sources produced no text to generate from.
    #[error("no usable source content")]
    NoUsableContent,

    /// The text-generation stage could not produce a script.
    #[error("script synthesis failed: {0}")]
    SynthesisFailed(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NotecastError>;

impl NotecastError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for the given entity kind.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error ends a generation job in the `failed` state.
    pub fn is_fatal_to_job(&self) -> bool {
        matches!(self, Self::NoUsableContent | Self::SynthesisFailed(_))
    }
}
