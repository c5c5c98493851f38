//! Error types for the fillsign form engine.

use thiserror::Error;

/// Primary error type for form extraction and export operations.
#[derive(Error, Debug)]
pub enum FillError {
    #[error("failed to parse PDF: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("invalid PDF structure: {0}")]
    Structure(String),

    #[error("page {0} not found in document")]
    PageNotFound(u32),

    #[error("signature image error: {0}")]
    Signature(String),

    #[error("failed to serialize PDF: {0}")]
    Export(String),
}

/// Convenience result type used throughout the crate.
pub type Result<T> = std::result::Result<T, FillError>;
