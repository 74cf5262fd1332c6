//! Error types for decoding operations.

use std::fmt;

/// Errors that can occur while validating or decoding tile payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Invalid data format or structure.
    InvalidFormat {
        context: &'static str,
        detail: String,
    },
    /// Two parallel attribute arrays disagree in length.
    AttributeMismatch {
        attribute: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Index out of bounds.
    IndexOutOfBounds { index: usize, len: usize },
    /// The image codec rejected the texture bytes.
    Image { detail: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat { context, detail } => {
                write!(f, "invalid format in {context}: {detail}")
            }
            Self::AttributeMismatch {
                attribute,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "{attribute} count mismatch: expected {expected}, got {actual}"
                )
            }
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
            Self::Image { detail } => write!(f, "image decoding failed: {detail}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<image::ImageError> for DecodeError {
    fn from(e: image::ImageError) -> Self {
        Self::Image {
            detail: e.to_string(),
        }
    }
}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
