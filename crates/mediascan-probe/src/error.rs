//! Error types for mediascan-probe

use std::path::PathBuf;

/// Errors that can occur while probing a media file.
///
/// Local corruption (bad packets, sections, PES headers, codec frames) is
/// never surfaced here; it is skipped by the scanner. Only conditions that make
/// the whole probe meaningless end up as an error.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unsupported container format
    #[error("Unsupported container format: {0}")]
    UnsupportedContainer(String),

    /// Failed to parse container
    #[error("Failed to parse container: {0}")]
    ContainerParse(String),

    /// No transport packet sync could be established anywhere in the probed region
    #[error("No valid packet sync found in the first {probed} bytes")]
    NoSync { probed: u64 },

    /// Invalid data encountered
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProbeError>;
