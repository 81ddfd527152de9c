//! Error types for metadata parsing and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading package metadata
#[derive(Error, Debug)]
pub enum Error {
    /// Metadata file does not exist
    #[error("metadata file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Content parsed as neither YAML nor JSON
    #[error("failed to parse metadata: {0}")]
    Parse(String),

    /// Document parsed but violates the package schema
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Result type for metadata operations
pub type Result<T> = std::result::Result<T, Error>;
