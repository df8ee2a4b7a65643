//! Skein codec - column encoder state machines
//!
//! This crate turns a stream of heterogeneous, semi-structured values into
//! a single compact column:
//!
//! - [`ColumnBuilder`] - the top-level assembler (`append`/`skip`/
//!   `finalize`/`detach`)
//! - A per-stream scalar encoder choosing literals, deltas and
//!   delta-of-deltas, with lossless double scaling
//! - Interleaved sub-object compression transposing compatible records
//!   into per-leaf streams behind a shared reference record
//!
//! ```
//! use skein_codec::{ColumnBuilder, Value};
//!
//! let mut builder = ColumnBuilder::new();
//! builder.append(&Value::Int32(10))?;
//! builder.append(&Value::Int32(11))?;
//! builder.skip();
//! let column = builder.finalize()?;
//! assert_eq!(column.element_count(), 3);
//! # Ok::<(), skein_codec::ColumnError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod column;

mod interleave;
mod scalar;

// Re-export commonly used types
pub use column::{ColumnBuilder, EncodedColumn};
pub use skein_format::{Binary, ColumnError, ObjectId, Record, Result, TypeTag, Value};
