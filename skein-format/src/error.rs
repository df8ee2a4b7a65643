//! Error types for skein columns

use thiserror::Error;

/// Errors surfaced to callers of the column encoder.
///
/// Recoverable conditions inside the encoder (a delta that cannot be packed,
/// a rescale that does not pay off, a reference merge that fails) are handled
/// locally and never reach this enum.
#[derive(Debug, Error)]
pub enum ColumnError {
    /// MinKey and MaxKey have no storable representation, at any depth.
    /// The encoder instance must be discarded after this error.
    #[error("MinKey or MaxKey is not valid for storage")]
    InvalidInput,
    /// A byte outside the closed set of storable type tags.
    #[error("Unknown type tag: {0:#04x}")]
    UnknownTypeTag(u8),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ColumnError>;
