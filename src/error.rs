//! Error types for the layered mesher.

use thiserror::Error;

/// Result type alias using MesherError.
pub type Result<T> = std::result::Result<T, MesherError>;

/// Main error type for layered mesh builds.
#[derive(Error, Debug)]
pub enum MesherError {
    /// Failed to read or decode an image.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Failed to parse or write JSON data.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to format export text.
    #[error("Format error: {0}")]
    Format(#[from] std::fmt::Error),

    /// The source image has zero width or height.
    #[error("Image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// A color string could not be parsed as hex.
    #[error("Invalid color: {0}")]
    InvalidColor(String),

    /// Build parameters failed validation.
    #[error("Invalid build parameters: {0}")]
    InvalidParams(String),
}
