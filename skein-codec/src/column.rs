//! Column builder
//!
//! Top-level assembler for a single column: owns the output buffer, routes
//! appended values between the scalar stream and interleaved sub-object
//! compression, and finishes the column with its element-count prefix and
//! terminator.

use crate::interleave::{
    flush_interleaved, leaf_count, merge_records, traverse_lock_step, LeafEncoder,
};
use crate::scalar::ScalarEncoder;
use skein_format::constants::{ELEMENT_COUNT_BYTES, INTERLEAVED_START, TERMINATOR};
use skein_format::{ColumnError, Record, Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Regular,
    DeterminingReference,
    SubObjAppending,
}

/// Builds one compressed column from a stream of values and skips.
///
/// Values are borrowed; the builder keeps owned copies only where the
/// format requires them. The builder is single-threaded and one-shot:
/// [`finalize`](ColumnBuilder::finalize) or
/// [`detach`](ColumnBuilder::detach) consume it. After an
/// [`InvalidInput`](ColumnError::InvalidInput) error the builder must be
/// discarded; the buffer contents are unspecified.
#[derive(Debug)]
pub struct ColumnBuilder {
    buf: Vec<u8>,
    state: ScalarEncoder,
    mode: Mode,
    reference: Record,
    buffered: Vec<Record>,
    leaves: Vec<LeafEncoder>,
    element_count: u32,
}

impl ColumnBuilder {
    /// Create a builder with a fresh output buffer.
    pub fn new() -> Self {
        Self::with_buffer(Vec::new())
    }

    /// Create a builder reusing a detached buffer's allocation.
    pub fn with_buffer(mut buf: Vec<u8>) -> Self {
        buf.clear();
        // placeholder for the element count, patched in finalize
        buf.resize(ELEMENT_COUNT_BYTES, 0);
        Self {
            buf,
            state: ScalarEncoder::new(false),
            mode: Mode::Regular,
            reference: Record::new(),
            buffered: Vec::new(),
            leaves: Vec::new(),
            element_count: 0,
        }
    }

    /// Append one value.
    pub fn append(&mut self, value: &Value) -> Result<()> {
        validate_value(value)?;

        let record = match value {
            Value::Object(record) if !record.is_empty() => record,
            _ => {
                // Non-record values (and empty records) end any open
                // interleaved run and go through the scalar stream.
                if self.mode != Mode::Regular {
                    self.flush_sub_obj_mode()?;
                }
                self.state.append(value, &mut self.buf)?;
                self.element_count = self.element_count.wrapping_add(1);
                return Ok(());
            }
        };

        match self.mode {
            Mode::Regular => self.start_determine_reference(record),
            Mode::DeterminingReference => {
                let compatible = traverse_lock_step(&self.reference, record, |_, _| Ok(()))?;
                if !compatible {
                    match merge_records(&self.reference, record) {
                        Some(merged) => self.reference = merged,
                        None => {
                            // Shape cannot be reconciled: close the current
                            // segment and restart determination from this
                            // record.
                            self.flush_sub_obj_mode()?;
                            self.start_determine_reference(record);
                            self.element_count = self.element_count.wrapping_add(1);
                            return Ok(());
                        }
                    }
                }

                self.buffered.push(record.clone());
                // Once we have buffered more than twice as many records as
                // the reference has leaves, the reference is considered
                // stable and the segment starts for real.
                if leaf_count(&self.reference) * 2 < self.buffered.len() {
                    self.finish_determine_reference()?;
                }
            }
            Mode::SubObjAppending => self.append_sub_elements(record)?,
        }

        self.element_count = self.element_count.wrapping_add(1);
        Ok(())
    }

    /// Record a missing value at the current position.
    pub fn skip(&mut self) {
        self.element_count = self.element_count.wrapping_add(1);
        match self.mode {
            Mode::Regular => self.state.skip(&mut self.buf),
            // an empty record buffers as "every leaf missing"
            Mode::DeterminingReference => self.buffered.push(Record::new()),
            Mode::SubObjAppending => {
                for leaf in &mut self.leaves {
                    leaf.state.skip(&mut leaf.buf);
                }
            }
        }
    }

    /// Finish the column: flush open state, write the terminator and patch
    /// the element-count prefix.
    pub fn finalize(mut self) -> Result<EncodedColumn> {
        match self.mode {
            Mode::Regular => self.state.flush(&mut self.buf),
            _ => self.flush_sub_obj_mode()?,
        }

        self.buf.push(TERMINATOR);
        let count = self.element_count.to_le_bytes();
        self.buf[..ELEMENT_COUNT_BYTES].copy_from_slice(&count);
        Ok(EncodedColumn { bytes: self.buf })
    }

    /// Abandon the column and take the raw buffer back for reuse.
    pub fn detach(self) -> Vec<u8> {
        self.buf
    }

    fn start_determine_reference(&mut self, record: &Record) {
        self.state.flush(&mut self.buf);
        self.state = ScalarEncoder::new(false);

        self.reference = record.clone();
        self.buffered.push(record.clone());
        self.mode = Mode::DeterminingReference;
    }

    // Freeze the reference: write the segment header, create one leaf
    // encoder per reference leaf seeded for zero deltas, and feed the
    // buffered records through.
    fn finish_determine_reference(&mut self) -> Result<()> {
        self.buf.push(INTERLEAVED_START);
        self.reference.write_document(&mut self.buf);

        let buffered = std::mem::take(&mut self.buffered);
        let first = buffered.first().cloned().unwrap_or_default();
        let mut leaves = Vec::new();
        traverse_lock_step(&self.reference, &first, |ref_value, value| {
            let mut leaf = LeafEncoder::new();
            leaf.state.seed(ref_value);
            match value {
                Some(value) => leaf.state.append(value, &mut leaf.buf)?,
                None => leaf.state.skip(&mut leaf.buf),
            }
            leaves.push(leaf);
            Ok(())
        })?;
        self.leaves = leaves;
        self.mode = Mode::SubObjAppending;

        for record in buffered.iter().skip(1) {
            self.append_sub_elements(record)?;
        }
        Ok(())
    }

    fn append_sub_elements(&mut self, record: &Record) -> Result<()> {
        // A buffered skip reaches here as an empty record: every leaf skips.
        if record.is_empty() {
            for leaf in &mut self.leaves {
                leaf.state.skip(&mut leaf.buf);
            }
            return Ok(());
        }

        let mut values: Vec<Option<&Value>> = Vec::with_capacity(self.leaves.len());
        let compatible = traverse_lock_step(&self.reference, record, |_, value| {
            values.push(value);
            Ok(())
        })?;
        if !compatible {
            // Shape drifted away from the reference: close the segment and
            // start determining a new one from this record.
            self.flush_sub_obj_mode()?;
            self.start_determine_reference(record);
            return Ok(());
        }

        debug_assert_eq!(values.len(), self.leaves.len());
        for (leaf, value) in self.leaves.iter_mut().zip(values) {
            match value {
                Some(value) => leaf.state.append(value, &mut leaf.buf)?,
                None => leaf.state.skip(&mut leaf.buf),
            }
        }
        Ok(())
    }

    fn flush_sub_obj_mode(&mut self) -> Result<()> {
        if self.mode == Mode::DeterminingReference {
            self.finish_determine_reference()?;
        }

        let leaves = std::mem::take(&mut self.leaves);
        flush_interleaved(leaves, &mut self.buf);
        self.mode = Mode::Regular;
        Ok(())
    }
}

impl Default for ColumnBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A finished column: element-count prefix, blocks, terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedColumn {
    bytes: Vec<u8>,
}

impl EncodedColumn {
    /// The complete column bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True only for a column that was never valid; finished columns always
    /// carry at least the prefix and terminator.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The number of appends and skips recorded in the prefix.
    pub fn element_count(&self) -> u32 {
        let mut prefix = [0u8; ELEMENT_COUNT_BYTES];
        let n = self.bytes.len().min(ELEMENT_COUNT_BYTES);
        prefix[..n].copy_from_slice(&self.bytes[..n]);
        u32::from_le_bytes(prefix)
    }

    /// Take the buffer, e.g. to hand its allocation back to
    /// [`ColumnBuilder::with_buffer`].
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

// MinKey/MaxKey are rejected at any depth, including inside arrays and
// code scopes that would only ever be stored as opaque literals.
fn validate_value(value: &Value) -> Result<()> {
    match value {
        Value::MinKey | Value::MaxKey => Err(ColumnError::InvalidInput),
        Value::Object(record) => {
            for (_, value) in record.iter() {
                validate_value(value)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for value in items {
                validate_value(value)?;
            }
            Ok(())
        }
        Value::CodeWScope { scope, .. } => {
            for (_, value) in scope.iter() {
                validate_value(value)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
