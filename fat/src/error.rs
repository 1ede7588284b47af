//! Error types for FAT image operations

use thiserror::Error;

/// Result type for FAT image operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while writing or reading a FAT image
#[derive(Debug, Error)]
pub enum Error {
    /// Failure reading or writing the sink or the scratch file. The
    /// writer is unusable afterwards and the partial image is invalid.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// A path component names an existing file where a directory is
    /// required.
    #[error("path {path:?} invalid: component {component:?} identifies a file")]
    InvalidPath { path: String, component: String },

    /// No directory slot matches the requested path.
    #[error("{path:?} not found")]
    NotFound { path: String },

    /// The image bytes are inconsistent with the declared format.
    #[error("malformed image: {reason}")]
    Malformed { reason: &'static str },
}
