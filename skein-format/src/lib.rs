//! Skein format - wire-level primitives for the skein columnar format
//!
//! This crate provides the building blocks the column encoder is assembled
//! from, with no encoder state of its own:
//!
//! - Type tags and the owned value/record model
//! - Element payload and document serialization
//! - Scalar-to-integer codecs (zig-zag, double scaling, short strings,
//!   binaries, decimals, object ids)
//! - Simple-8b block packing
//! - Control-byte constants
//! - Error types

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod constants;
pub mod encode;
pub mod error;
pub mod simple8b;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use error::{ColumnError, Result};
pub use types::TypeTag;
pub use value::{Binary, ObjectId, Record, Value};
