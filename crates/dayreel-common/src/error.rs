//! Error taxonomy shared by the media layer and the coordinator.
//!
//! The three processing failures are [`Error::MediaEngine`],
//! [`Error::MetadataParse`] and [`Error::NoInputs`]. None of them are retried
//! automatically: a failed clip keeps its pending marker and a failed merge
//! keeps the merge marker until an operator intervenes.

use std::fmt;
use std::path::PathBuf;

/// Unified error type for dayreel library crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An external tool (ffmpeg, ffprobe) exited non-zero, could not be
    /// spawned, timed out, or produced no usable output.
    #[error("Media engine error [{tool}]: {message}")]
    MediaEngine {
        /// Name of the tool that failed.
        tool: String,
        /// Exit status and diagnostic text.
        message: String,
    },

    /// Probe output was missing or malformed for a field the pipeline needs.
    #[error("Metadata parse error: {0}")]
    MetadataParse(String),

    /// A merge was attempted with zero canonical clips.
    #[error("No canonical clips found in {}", dir.display())]
    NoInputs {
        /// Directory that was scanned.
        dir: PathBuf,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Caller-supplied data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an HTTP status code for the upload boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::MediaEngine { .. } => 502,
            Error::MetadataParse(_) => 422,
            Error::NoInputs { .. } => 409,
            Error::Validation(_) => 400,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::MediaEngine`].
    pub fn media_engine(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::MediaEngine {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::MetadataParse`].
    pub fn metadata(message: impl fmt::Display) -> Self {
        Error::MetadataParse(message.to_string())
    }

    /// Whether this failure came from the external media engine.
    pub fn is_media_engine(&self) -> bool {
        matches!(self, Error::MediaEngine { .. })
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
