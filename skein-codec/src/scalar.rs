//! Scalar stream encoder
//!
//! One `ScalarEncoder` compresses a single homogeneous stream of primitive
//! values: the whole column in regular mode, or one leaf field in
//! interleaved mode. It decides per value between an uncompressed literal,
//! a zero delta, a plain delta or a delta-of-delta, keeps the previous
//! element as an owned copy, and accounts Simple-8b blocks under control
//! bytes.

use skein_format::constants::{
    CONTROL_FOR_SCALE_INDEX, CONTROL_MASK, COUNT_MASK, MAX_BLOCKS_PER_CONTROL, MEMORY_AS_INTEGER,
};
use skein_format::encode::{
    calc_delta128, calc_delta64, decode_double, encode_binary, encode_decimal128, encode_double,
    encode_object_id, encode_string, expand_delta64, scale_and_encode_double, zigzag_decode64,
    zigzag_encode128, zigzag_encode64,
};
use skein_format::simple8b::{BlockSink, FnSink, Simple8bBuilder};
use skein_format::{ColumnError, Result, TypeTag, Value};
use smallvec::SmallVec;

/// Owned copy of the previously appended element: type byte, empty-name
/// terminator, value payload. Grows to the largest element seen and is
/// reused in place.
#[derive(Debug)]
struct PreviousElement {
    bytes: SmallVec<[u8; 32]>,
}

impl PreviousElement {
    fn new() -> Self {
        let mut bytes = SmallVec::new();
        bytes.push(TypeTag::Eoo.as_u8());
        bytes.push(0);
        Self { bytes }
    }

    fn store_from(&mut self, serialized: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(serialized);
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn matches(&self, serialized: &[u8]) -> bool {
        self.bytes[..] == *serialized
    }

    fn type_tag(&self) -> TypeTag {
        TypeTag::from_u8(self.bytes[0]).unwrap_or(TypeTag::Eoo)
    }

    fn payload(&self) -> &[u8] {
        &self.bytes[2..]
    }

    fn as_int32(&self) -> i32 {
        i32::from_le_bytes(read_le(self.payload()))
    }

    fn as_int64(&self) -> i64 {
        i64::from_le_bytes(read_le(self.payload()))
    }

    fn as_double(&self) -> f64 {
        f64::from_le_bytes(read_le(self.payload()))
    }

    fn as_bool(&self) -> bool {
        self.payload().first().copied().unwrap_or(0) != 0
    }

    fn as_date_ms(&self) -> i64 {
        self.as_int64()
    }

    fn as_timestamp(&self) -> u64 {
        u64::from_le_bytes(read_le(self.payload()))
    }

    fn object_id_bytes(&self) -> [u8; 12] {
        read_le(self.payload())
    }

    fn object_id_instance_unique(&self) -> &[u8] {
        let payload = self.payload();
        &payload[4.min(payload.len())..9.min(payload.len())]
    }

    fn string_bytes(&self) -> &[u8] {
        // string payload: i32 length including terminator, bytes, 0x00
        let payload = self.payload();
        let len = i32::from_le_bytes(read_le::<4>(payload)) as usize;
        &payload[4..4 + len.saturating_sub(1).min(payload.len().saturating_sub(4))]
    }

    fn binary_size(&self) -> usize {
        i32::from_le_bytes(read_le(self.payload())) as usize
    }

    fn binary_subtype(&self) -> u8 {
        self.payload().get(4).copied().unwrap_or(0)
    }

    fn binary_data(&self) -> &[u8] {
        let payload = self.payload();
        let size = self.binary_size().min(payload.len().saturating_sub(5));
        &payload[5..5 + size]
    }

    fn decimal_bytes(&self) -> [u8; 16] {
        read_le(self.payload())
    }
}

// Total little-endian read: missing bytes decode as zero. The previous
// element is always self-consistent, so the padding never triggers in
// practice.
fn read_le<const N: usize>(payload: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    let n = payload.len().min(N);
    buf[..n].copy_from_slice(&payload[..n]);
    buf
}

/// Control-byte accounting: at most one control byte is open at a time, and
/// completed control blocks (and literals) are optionally announced as
/// `(offset, length)` ranges for interleaved reordering.
#[derive(Debug)]
struct ControlState {
    byte_offset: Option<usize>,
    ranges: Option<Vec<(usize, usize)>>,
}

impl ControlState {
    fn new(track_ranges: bool) -> Self {
        Self {
            byte_offset: None,
            ranges: track_ranges.then(Vec::new),
        }
    }

    // Open or bump the control byte for one more Simple-8b block. Returns
    // the offset of a control byte that just reached its 16-block capacity;
    // the caller announces it after writing the block itself.
    fn increment(&mut self, out: &mut Vec<u8>, control: u8) -> Option<usize> {
        let (offset, count) = match self.byte_offset {
            None => {
                let offset = out.len();
                out.push(0);
                self.byte_offset = Some(offset);
                (offset, 0u8)
            }
            Some(offset) => {
                if out[offset] & CONTROL_MASK != control {
                    // scale class changed: close the open byte, start fresh
                    self.close(out);
                    return self.increment(out, control);
                }
                (offset, (out[offset] & COUNT_MASK) + 1)
            }
        };

        out[offset] = control | (count & COUNT_MASK);
        if count + 1 == MAX_BLOCKS_PER_CONTROL {
            self.byte_offset = None;
            return Some(offset);
        }
        None
    }

    fn close(&mut self, out: &mut Vec<u8>) {
        if let Some(offset) = self.byte_offset.take() {
            self.announce(offset, out.len() - offset);
        }
    }

    fn announce(&mut self, offset: usize, len: usize) {
        if let Some(ranges) = &mut self.ranges {
            ranges.push((offset, len));
        }
    }
}

// Block sink bridging the Simple-8b builders to the output buffer and the
// control-byte accounting.
struct ControlWriter<'a> {
    out: &'a mut Vec<u8>,
    control: &'a mut ControlState,
    control_byte: u8,
}

impl BlockSink for ControlWriter<'_> {
    fn write_block(&mut self, block: u64) {
        let full_offset = self.control.increment(self.out, self.control_byte);
        self.out.extend_from_slice(&block.to_le_bytes());
        if let Some(offset) = full_offset {
            self.control.announce(offset, self.out.len() - offset);
        }
    }
}

/// Per-stream delta encoder. The output buffer is passed into every
/// operation; in regular mode it is the column's master buffer, in
/// interleaved mode each leaf owns a private one.
#[derive(Debug)]
pub(crate) struct ScalarEncoder {
    prev: PreviousElement,
    prev_delta: i64,
    pending64: Simple8bBuilder,
    pending128: Simple8bBuilder,
    store_with_128: bool,
    control: ControlState,
    prev_encoded64: i64,
    prev_encoded128: i128,
    last_value_in_prev_block: f64,
    scale_index: u8,
    scratch: Vec<u8>,
}

impl ScalarEncoder {
    pub(crate) fn new(track_control_blocks: bool) -> Self {
        Self {
            prev: PreviousElement::new(),
            prev_delta: 0,
            pending64: Simple8bBuilder::new(),
            pending128: Simple8bBuilder::new(),
            store_with_128: false,
            control: ControlState::new(track_control_blocks),
            prev_encoded64: 0,
            prev_encoded128: 0,
            last_value_in_prev_block: 0.0,
            scale_index: MEMORY_AS_INTEGER,
            scratch: Vec::new(),
        }
    }

    /// Completed control-block and literal ranges, in write order.
    pub(crate) fn take_control_ranges(&mut self) -> Vec<(usize, usize)> {
        self.control.ranges.take().unwrap_or_default()
    }

    /// Install a previous element without emitting a literal. Used to seed
    /// leaf encoders from the interleaved reference record so the first fed
    /// element produces a zero delta.
    pub(crate) fn seed(&mut self, value: &Value) {
        self.serialize_into_scratch(value);
        self.prev.store_from(&self.scratch);
        self.initialize_from_previous();
    }

    pub(crate) fn append(&mut self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        let tag = value.type_tag();
        if !tag.is_storable() {
            return Err(ColumnError::InvalidInput);
        }

        self.serialize_into_scratch(value);

        // Type change (or first value): flush pending deltas and write the
        // new value as an uncompressed literal.
        if self.prev.type_tag() != tag {
            self.prev.store_from(&self.scratch);
            self.flush_pending(out);
            self.write_literal_from_previous(out);
            return Ok(());
        }

        let mut compressed = false;
        if !tag.uses_delta_of_delta() && self.prev.matches(&self.scratch) {
            // byte-equal repeat: a zero delta always packs
            let before = out.len();
            compressed = if self.store_with_128 {
                self.pending128.append(
                    0,
                    &mut ControlWriter {
                        out: &mut *out,
                        control: &mut self.control,
                        control_byte: CONTROL_FOR_SCALE_INDEX[self.scale_index as usize],
                    },
                )
            } else {
                self.pending64.append(
                    0,
                    &mut ControlWriter {
                        out: &mut *out,
                        control: &mut self.control,
                        control_byte: CONTROL_FOR_SCALE_INDEX[self.scale_index as usize],
                    },
                )
            };
            if out.len() != before && tag == TypeTag::Double {
                self.last_value_in_prev_block = self.prev.as_double();
            }
        } else if self.store_with_128 {
            compressed = self.append_delta128(value, out);
        } else if let Value::Double(double) = value {
            let previous = self.prev.as_double();
            compressed = self.append_double(*double, previous, out);
        } else {
            compressed = self.append_delta64(value, out);
        }

        self.prev.store_from(&self.scratch);

        // Value out of range for every compressed form: store it raw.
        if !compressed {
            self.flush_pending(out);
            self.write_literal_from_previous(out);
        }
        Ok(())
    }

    pub(crate) fn skip(&mut self, out: &mut Vec<u8>) {
        let before = out.len();
        let control_byte = CONTROL_FOR_SCALE_INDEX[self.scale_index as usize];
        if self.store_with_128 {
            self.pending128.skip(&mut ControlWriter {
                out: &mut *out,
                control: &mut self.control,
                control_byte,
            });
        } else {
            self.pending64.skip(&mut ControlWriter {
                out: &mut *out,
                control: &mut self.control,
                control_byte,
            });
        }

        // A skip that flushed blocks breaks the double delta chain;
        // re-derive the scale from the last value in the previous block.
        if out.len() != before && self.prev.type_tag() == TypeTag::Double {
            self.last_value_in_prev_block = self.prev.as_double();
            let (encoded, scale_index) =
                scale_and_encode_double(self.last_value_in_prev_block, 0);
            self.prev_encoded64 = encoded;
            self.scale_index = scale_index;
        }
    }

    pub(crate) fn flush(&mut self, out: &mut Vec<u8>) {
        let control_byte = CONTROL_FOR_SCALE_INDEX[self.scale_index as usize];
        self.pending128.flush(&mut ControlWriter {
            out: &mut *out,
            control: &mut self.control,
            control_byte,
        });
        self.pending64.flush(&mut ControlWriter {
            out: &mut *out,
            control: &mut self.control,
            control_byte,
        });
        self.control.close(out);
    }

    fn serialize_into_scratch(&mut self, value: &Value) {
        self.scratch.clear();
        self.scratch.push(value.type_tag().as_u8());
        self.scratch.push(0);
        value.write_payload(&mut self.scratch);
    }

    fn flush_pending(&mut self, out: &mut Vec<u8>) {
        let control_byte = CONTROL_FOR_SCALE_INDEX[self.scale_index as usize];
        self.pending128.flush(&mut ControlWriter {
            out: &mut *out,
            control: &mut self.control,
            control_byte,
        });
        self.pending64.flush(&mut ControlWriter {
            out: &mut *out,
            control: &mut self.control,
            control_byte,
        });
    }

    // Write the cached previous element as a literal and reset the delta
    // state around it.
    fn write_literal_from_previous(&mut self, out: &mut Vec<u8>) {
        self.control.close(out);
        let start = out.len();
        out.extend_from_slice(self.prev.bytes());
        self.control.announce(start, out.len() - start);

        self.scale_index = MEMORY_AS_INTEGER;
        self.prev_delta = 0;
        self.initialize_from_previous();
    }

    // Derive the per-type encoded state from the cached previous element.
    fn initialize_from_previous(&mut self) {
        let tag = self.prev.type_tag();
        self.store_with_128 = tag.uses_128bit();
        match tag {
            TypeTag::Double => {
                self.last_value_in_prev_block = self.prev.as_double();
                let (encoded, scale_index) =
                    scale_and_encode_double(self.last_value_in_prev_block, 0);
                self.prev_encoded64 = encoded;
                self.scale_index = scale_index;
            }
            TypeTag::String => {
                self.prev_encoded128 = encode_string(
                    std::str::from_utf8(self.prev.string_bytes()).unwrap_or(""),
                )
                .unwrap_or(0) as i128;
            }
            TypeTag::Binary => {
                self.prev_encoded128 =
                    encode_binary(self.prev.binary_data()).unwrap_or(0) as i128;
            }
            TypeTag::Decimal128 => {
                self.prev_encoded128 = encode_decimal128(&self.prev.decimal_bytes()) as i128;
            }
            TypeTag::ObjectId => {
                self.prev_encoded64 = encode_object_id(&self.prev.object_id_bytes()) as i64;
            }
            _ => {}
        }
    }

    fn append_delta128(&mut self, value: &Value, out: &mut Vec<u8>) -> bool {
        let encoded: Option<i128> = match value {
            Value::String(s) => encode_string(s).map(|u| u as i128),
            Value::Binary(binary) => {
                // Only equally-sized binaries of the same subtype can ride a
                // delta; the length and subtype come from the last literal.
                if binary.data.len() != self.prev.binary_size()
                    || binary.subtype != self.prev.binary_subtype()
                {
                    None
                } else {
                    encode_binary(&binary.data).map(|u| u as i128)
                }
            }
            Value::Decimal128(bytes) => Some(encode_decimal128(bytes) as i128),
            _ => None,
        };

        match encoded {
            Some(encoded) => {
                let delta = calc_delta128(encoded, self.prev_encoded128);
                let appended = self.pending128.append(
                    zigzag_encode128(delta),
                    &mut ControlWriter {
                        out: &mut *out,
                        control: &mut self.control,
                        control_byte: CONTROL_FOR_SCALE_INDEX[self.scale_index as usize],
                    },
                );
                self.prev_encoded128 = encoded;
                appended
            }
            None => false,
        }
    }

    fn append_delta64(&mut self, value: &Value, out: &mut Vec<u8>) -> bool {
        let delta = match value {
            Value::Int32(i) => calc_delta64(*i as i64, self.prev.as_int32() as i64),
            Value::Int64(i) => calc_delta64(*i, self.prev.as_int64()),
            Value::Date(ms) => calc_delta64(*ms, self.prev.as_date_ms()),
            Value::Bool(b) => *b as i64 - self.prev.as_bool() as i64,
            Value::Undefined | Value::Null => 0,
            Value::Timestamp(t) => {
                let current_delta = calc_delta64(*t as i64, self.prev.as_timestamp() as i64);
                let delta_of_delta = calc_delta64(current_delta, self.prev_delta);
                self.prev_delta = current_delta;
                delta_of_delta
            }
            Value::ObjectId(oid) => {
                if oid.instance_unique() != self.prev.object_id_instance_unique() {
                    return false;
                }
                let encoded = encode_object_id(&oid.0) as i64;
                let delta = calc_delta64(encoded, self.prev_encoded64);
                self.prev_encoded64 = encoded;
                delta
            }
            // objects, arrays, regexes, refs, code and symbols are always
            // stored as literals
            _ => return false,
        };

        self.pending64.append(
            u128::from(zigzag_encode64(delta)),
            &mut ControlWriter {
                out: &mut *out,
                control: &mut self.control,
                control_byte: CONTROL_FOR_SCALE_INDEX[self.scale_index as usize],
            },
        )
    }

    // Double append protocol: find the smallest workable scale at or above
    // the current one, rescaling or restarting the pending block as needed,
    // and opportunistically shrink the scale after a block is written.
    fn append_double(&mut self, value: f64, previous: f64, out: &mut Vec<u8>) -> bool {
        let (mut encoded, mut scale_index) = scale_and_encode_double(value, self.scale_index);

        if scale_index != self.scale_index {
            // The new value needs a larger scale. Rescaling the pending
            // values in place compresses better than flushing, when it fits.
            if let Some(rescaled) = self.try_rescale_pending(encoded, scale_index) {
                self.pending64 = rescaled;
                self.prev_encoded64 = encoded;
                self.scale_index = scale_index;
                return true;
            }

            // Flush and restart the run at the higher scale. The previous
            // value must agree on the scale; re-derive at most twice before
            // giving up and storing a literal.
            let control_byte = CONTROL_FOR_SCALE_INDEX[self.scale_index as usize];
            self.pending64.flush(&mut ControlWriter {
                out: &mut *out,
                control: &mut self.control,
                control_byte,
            });
            self.control.close(out);

            let (mut prev_encoded, mut prev_scale) =
                scale_and_encode_double(previous, scale_index);
            if prev_scale != scale_index {
                let (value_encoded, value_scale) = scale_and_encode_double(value, prev_scale);
                encoded = value_encoded;
                scale_index = value_scale;
                let (encoded_again, scale_again) =
                    scale_and_encode_double(previous, scale_index);
                prev_encoded = encoded_again;
                prev_scale = scale_again;
                if prev_scale != scale_index {
                    return false;
                }
            }
            self.prev_encoded64 = prev_encoded;
            self.scale_index = scale_index;
        }

        let before = out.len();
        let delta = calc_delta64(encoded, self.prev_encoded64);
        let appended = self.pending64.append(
            u128::from(zigzag_encode64(delta)),
            &mut ControlWriter {
                out: &mut *out,
                control: &mut self.control,
                control_byte: CONTROL_FOR_SCALE_INDEX[self.scale_index as usize],
            },
        );
        if !appended {
            return false;
        }

        if out.len() != before {
            // A block was written. Restart the chain from the last value in
            // that block at scale 0 and re-drive what is still pending; the
            // scale can only shrink or stay.
            self.last_value_in_prev_block = previous;
            let previous_scale = self.scale_index;
            let (encoded_base, scale_index) =
                scale_and_encode_double(self.last_value_in_prev_block, 0);
            self.prev_encoded64 = encoded_base;
            self.scale_index = scale_index;

            let drained = std::mem::take(&mut self.pending64);
            let mut prev_value = self.last_value_in_prev_block;
            let mut prev_encoded =
                encode_double(prev_value, previous_scale).unwrap_or(encoded_base);
            for slot in drained.pending() {
                match slot {
                    Some(packed) => {
                        prev_encoded =
                            expand_delta64(prev_encoded, zigzag_decode64(packed as u64));
                        let reconstructed = decode_double(prev_encoded, previous_scale);
                        if !self.append_double(reconstructed, prev_value, out) {
                            return false;
                        }
                        prev_value = reconstructed;
                    }
                    None => {
                        let control_byte =
                            CONTROL_FOR_SCALE_INDEX[self.scale_index as usize];
                        self.pending64.skip(&mut ControlWriter {
                            out: &mut *out,
                            control: &mut self.control,
                            control_byte,
                        });
                    }
                }
            }
            return true;
        }

        self.prev_encoded64 = encoded;
        true
    }

    // Probe whether every pending delta re-encodes at the new scale without
    // completing a Simple-8b block; returns the replacement builder if so.
    fn try_rescale_pending(&self, encoded: i64, new_scale: u8) -> Option<Simple8bBuilder> {
        let mut prev = encode_double(self.last_value_in_prev_block, self.scale_index)?;
        let mut prev_rescaled = encode_double(self.last_value_in_prev_block, new_scale)?;

        let mut wrote = false;
        let mut builder = Simple8bBuilder::new();
        for slot in self.pending64.pending() {
            match slot {
                None => builder.skip(&mut FnSink(|_| wrote = true)),
                Some(packed) => {
                    prev = expand_delta64(prev, zigzag_decode64(packed as u64));
                    let rescaled =
                        encode_double(decode_double(prev, self.scale_index), new_scale)?;
                    let appended = builder.append(
                        u128::from(zigzag_encode64(calc_delta64(rescaled, prev_rescaled))),
                        &mut FnSink(|_| wrote = true),
                    );
                    if !appended || wrote {
                        return None;
                    }
                    prev_rescaled = rescaled;
                }
            }
        }

        let appended = builder.append(
            u128::from(zigzag_encode64(calc_delta64(encoded, prev_rescaled))),
            &mut FnSink(|_| wrote = true),
        );
        if !appended || wrote {
            return None;
        }
        Some(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_all(encoder: &mut ScalarEncoder, out: &mut Vec<u8>, values: &[Value]) {
        for value in values {
            encoder.append(value, out).unwrap();
        }
    }

    #[test]
    fn test_first_append_writes_literal() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        encoder.append(&Value::Int32(10), &mut out).unwrap();

        // type byte, empty name terminator, 4-byte payload
        assert_eq!(out, vec![0x10, 0x00, 0x0A, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_deltas_share_one_control_block() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        append_all(
            &mut encoder,
            &mut out,
            &[Value::Int32(10), Value::Int32(11), Value::Int32(12)],
        );
        encoder.flush(&mut out);

        // literal, then one raw-memory control byte with one block
        assert_eq!(out[..6], [0x10, 0x00, 0x0A, 0x00, 0x00, 0x00]);
        assert_eq!(out[6], 0x80);
        assert_eq!(out.len(), 6 + 1 + 8);
    }

    #[test]
    fn test_type_change_forces_literal() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        append_all(
            &mut encoder,
            &mut out,
            &[Value::Int32(1), Value::Int32(2), Value::Int64(2)],
        );
        encoder.flush(&mut out);

        // int32 literal, one control block for the +1 delta, int64 literal
        assert_eq!(out[0], 0x10);
        assert_eq!(out[6], 0x80);
        assert_eq!(out[15], 0x12);
    }

    #[test]
    fn test_equal_values_produce_zero_deltas() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        let values = vec![Value::Int64(7); 61];
        append_all(&mut encoder, &mut out, &values);
        encoder.flush(&mut out);

        // literal + one control byte + one block of 60 zero deltas
        assert_eq!(out[0], 0x12);
        assert_eq!(out[10], 0x80);
        assert_eq!(out.len(), 10 + 1 + 8);
    }

    #[test]
    fn test_control_byte_rolls_over_at_sixteen_blocks() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        encoder.append(&Value::Int32(0), &mut out).unwrap();
        // 16 * 60 zero deltas fill one control byte; one more starts another
        for _ in 0..(16 * 60 + 1) {
            encoder.append(&Value::Int32(0), &mut out).unwrap();
        }
        encoder.flush(&mut out);

        let literal_len = 6;
        assert_eq!(out[literal_len], 0x8F);
        let second_control = literal_len + 1 + 16 * 8;
        assert_eq!(out[second_control], 0x80);
        assert_eq!(out.len(), second_control + 1 + 8);
    }

    #[test]
    fn test_skip_only_column_flushes_skips() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        encoder.skip(&mut out);
        encoder.skip(&mut out);
        encoder.flush(&mut out);

        assert_eq!(out[0], 0x80);
        assert_eq!(out.len(), 1 + 8);
    }

    #[test]
    fn test_double_starts_at_smallest_scale() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        append_all(
            &mut encoder,
            &mut out,
            &[Value::Double(1.0), Value::Double(2.0), Value::Double(3.0)],
        );
        encoder.flush(&mut out);

        // literal then scale-0 control byte (integral doubles)
        assert_eq!(out[0], 0x01);
        assert_eq!(out[10] & 0xF0, 0x90);
    }

    #[test]
    fn test_double_rescales_pending_in_place() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        append_all(
            &mut encoder,
            &mut out,
            &[Value::Double(1.0), Value::Double(2.0), Value::Double(2.5)],
        );
        encoder.flush(&mut out);

        // 2.5 forces scale 1; the pending +1 delta rescales in place so a
        // single scale-1 control block covers both deltas
        assert_eq!(out[0], 0x01);
        assert_eq!(out[10] & 0xF0, 0xA0);
        assert_eq!(out.len(), 10 + 1 + 8);
    }

    #[test]
    fn test_double_unrepresentable_uses_memory_scale() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        append_all(
            &mut encoder,
            &mut out,
            &[Value::Double(0.1), Value::Double(0.2)],
        );
        encoder.flush(&mut out);

        assert_eq!(out[0], 0x01);
        // raw-memory class; the bit-pattern delta may need several blocks
        assert_eq!(out[10] & 0xF0, 0x80);
    }

    #[test]
    fn test_object_id_delta_requires_shared_instance() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        let a = Value::ObjectId(skein_format::ObjectId([
            0, 0, 0, 1, 5, 5, 5, 5, 5, 0, 0, 1,
        ]));
        let b = Value::ObjectId(skein_format::ObjectId([
            0, 0, 0, 1, 5, 5, 5, 5, 5, 0, 0, 2,
        ]));
        let c = Value::ObjectId(skein_format::ObjectId([
            0, 0, 0, 1, 9, 9, 9, 9, 9, 0, 0, 3,
        ]));
        append_all(&mut encoder, &mut out, &[a, b, c]);
        encoder.flush(&mut out);

        // a literal, a delta block for b, then c's instance-unique bytes
        // differ: flush and literal
        assert_eq!(out[0], 0x07);
        assert_eq!(out[14], 0x80);
        assert_eq!(out[14 + 9], 0x07);
    }

    #[test]
    fn test_long_string_falls_back_to_literal() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        append_all(
            &mut encoder,
            &mut out,
            &[
                Value::String("short".into()),
                Value::String("this string is much longer than sixteen bytes".into()),
            ],
        );
        encoder.flush(&mut out);

        // both stored as literals
        let first_len = 2 + 4 + 5 + 1;
        assert_eq!(out[0], 0x02);
        assert_eq!(out[first_len], 0x02);
    }

    #[test]
    fn test_string_deltas_pack() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        append_all(
            &mut encoder,
            &mut out,
            &[
                Value::String("user1".into()),
                Value::String("user2".into()),
                Value::String("user3".into()),
            ],
        );
        encoder.flush(&mut out);

        let literal_len = 2 + 4 + 5 + 1;
        assert_eq!(out[0], 0x02);
        assert_eq!(out[literal_len], 0x80);
        assert_eq!(out.len(), literal_len + 1 + 8);
    }

    #[test]
    fn test_timestamp_delta_of_delta_is_zero_for_constant_rate() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        append_all(
            &mut encoder,
            &mut out,
            &[
                Value::Timestamp(1000),
                Value::Timestamp(2000),
                Value::Timestamp(3000),
                Value::Timestamp(4000),
            ],
        );
        encoder.flush(&mut out);

        // first delta is +1000, the remaining delta-of-deltas are zero;
        // everything fits one block
        assert_eq!(out[0], 0x11);
        assert_eq!(out[10], 0x80);
        assert_eq!(out.len(), 10 + 1 + 8);
    }

    #[test]
    fn test_binary_size_change_forces_literal() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        append_all(
            &mut encoder,
            &mut out,
            &[
                Value::Binary(skein_format::Binary {
                    subtype: 0,
                    data: vec![1, 2],
                }),
                Value::Binary(skein_format::Binary {
                    subtype: 0,
                    data: vec![1, 2, 3],
                }),
            ],
        );
        encoder.flush(&mut out);

        let first_len = 2 + 4 + 1 + 2;
        assert_eq!(out[0], 0x05);
        assert_eq!(out[first_len], 0x05);
    }

    #[test]
    fn test_min_key_rejected() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(false);
        assert!(matches!(
            encoder.append(&Value::MinKey, &mut out),
            Err(ColumnError::InvalidInput)
        ));
    }

    #[test]
    fn test_control_ranges_cover_all_output() {
        let mut out = Vec::new();
        let mut encoder = ScalarEncoder::new(true);
        append_all(
            &mut encoder,
            &mut out,
            &[
                Value::Int32(1),
                Value::Int32(2),
                Value::Int64(9),
                Value::Int64(10),
            ],
        );
        encoder.flush(&mut out);

        let ranges = encoder.take_control_ranges();
        // literal, control block, literal, control block - contiguous
        assert_eq!(ranges.len(), 4);
        let mut cursor = 0;
        for (offset, len) in ranges {
            assert_eq!(offset, cursor);
            cursor += len;
        }
        assert_eq!(cursor, out.len());
    }
}
