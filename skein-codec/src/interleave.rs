//! Interleaved sub-object support
//!
//! A run of records with compatible shape is transposed into one scalar
//! stream per leaf field, all sharing a reference record that a decoder
//! reads the schema from. This module holds the pure pieces: the lock-step
//! traversal that matches a record against the reference, the merge that
//! widens the reference, and the flush that interleaves the per-leaf
//! control blocks back into a single stream.

use crate::scalar::ScalarEncoder;
use skein_format::constants::{blocks_for_control_byte, is_literal_control_byte, TERMINATOR};
use skein_format::simple8b::block_slot_count;
use skein_format::{Record, Result, Value};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

/// One scalar stream for one leaf of the reference record, writing into a
/// private buffer so the controller can reorder control blocks at flush.
#[derive(Debug)]
pub(crate) struct LeafEncoder {
    pub(crate) state: ScalarEncoder,
    pub(crate) buf: Vec<u8>,
}

impl LeafEncoder {
    pub(crate) fn new() -> Self {
        Self {
            state: ScalarEncoder::new(true),
            buf: Vec::new(),
        }
    }
}

/// Visit every leaf of `record` in order, passing `None` for the record
/// side. Nested records recurse; empty nested records contribute no leaves.
pub(crate) fn traverse_leaves<'a, F>(record: &'a Record, f: &mut F) -> Result<()>
where
    F: FnMut(&'a Value, Option<&'a Value>) -> Result<()>,
{
    for (_, value) in record.iter() {
        if let Value::Object(sub) = value {
            traverse_leaves(sub, f)?;
        } else {
            f(value, None)?;
        }
    }
    Ok(())
}

/// Walk `reference` and `record` in lock-step, calling `f` once per
/// reference leaf with the matching record value or `None` when the record
/// omits it. Returns whether the record is compatible: same field order,
/// records where the reference has records, no additional fields, and empty
/// nested records mirrored exactly.
pub(crate) fn traverse_lock_step<'a, F>(
    reference: &'a Record,
    record: &'a Record,
    mut f: F,
) -> Result<bool>
where
    F: FnMut(&'a Value, Option<&'a Value>) -> Result<()>,
{
    let (consumed, compatible) = lock_step_inner(reference, record, &mut f)?;
    Ok(compatible && consumed == record.len())
}

fn lock_step_inner<'a, F>(
    reference: &'a Record,
    record: &'a Record,
    f: &mut F,
) -> Result<(usize, bool)>
where
    F: FnMut(&'a Value, Option<&'a Value>) -> Result<()>,
{
    let fields = record.fields();
    let mut pos = 0;

    for (ref_name, ref_value) in reference.iter() {
        if let Value::Object(ref_obj) = ref_value {
            let has_current = pos < fields.len();
            // An empty nested record in the reference must be mirrored, so
            // an exhausted record cannot be compatible here.
            if !has_current && ref_obj.is_empty() {
                return Ok((pos, false));
            }

            let name_match = has_current && fields[pos].0 == ref_name;
            if name_match {
                match &fields[pos].1 {
                    Value::Object(sub) => {
                        if ref_obj.is_empty() != sub.is_empty() {
                            return Ok((pos, false));
                        }
                        let (_, compatible) = lock_step_inner(ref_obj, sub, f)?;
                        pos += 1;
                        if !compatible {
                            return Ok((pos, false));
                        }
                    }
                    // a record in the reference must stay a record
                    _ => return Ok((pos, false)),
                }
            } else {
                // Assume the record's field comes later in the reference
                // and treat this whole subtree as missing. A real mismatch
                // surfaces as unconsumed fields at the end.
                traverse_leaves(ref_obj, f)?;
            }
        } else {
            let name_match = pos < fields.len() && fields[pos].0 == ref_name;
            if name_match {
                f(ref_value, Some(&fields[pos].1))?;
                pos += 1;
            } else {
                f(ref_value, None)?;
            }
        }
    }

    Ok((pos, pos == fields.len()))
}

/// Try to widen `reference` into a superset of itself and `record`,
/// preserving the relative order of both. `None` means the shapes cannot be
/// reconciled: conflicting field order, a leaf colliding with a record, or
/// an empty-record mismatch. O(N^2) in field count; records are small.
pub(crate) fn merge_records(reference: &Record, record: &Record) -> Option<Record> {
    let mut merged = Record::new();
    merge_inner(&mut merged, reference, record).then_some(merged)
}

fn merge_inner(out: &mut Record, reference: &Record, record: &Record) -> bool {
    let ref_fields = reference.fields();
    let fields = record.fields();
    let mut ref_pos = 0;
    let mut pos = 0;

    while ref_pos < ref_fields.len() && pos < fields.len() {
        let (ref_name, ref_value) = &ref_fields[ref_pos];
        let (name, value) = &fields[pos];

        if ref_name == name {
            match (ref_value, value) {
                (Value::Object(ref_obj), Value::Object(obj)) => {
                    if ref_obj.is_empty() != obj.is_empty() {
                        return false;
                    }
                    let mut sub = Record::new();
                    if !merge_inner(&mut sub, ref_obj, obj) {
                        return false;
                    }
                    out.push(ref_name.clone(), Value::Object(sub));
                }
                // both or neither must be records
                (Value::Object(_), _) | (_, Value::Object(_)) => return false,
                _ => out.push(ref_name.clone(), ref_value.clone()),
            }
            ref_pos += 1;
            pos += 1;
            continue;
        }

        // Name mismatch. If the reference field appears later in the record
        // the record's field sorts first; otherwise the reference field does.
        let appears_later = fields[pos + 1..].iter().any(|(n, _)| n == ref_name);
        if !appears_later {
            out.push(ref_name.clone(), ref_value.clone());
            ref_pos += 1;
        } else {
            if out.has_field(name) {
                return false;
            }
            out.push(name.clone(), value.clone());
            pos += 1;
        }
    }

    for (name, value) in &ref_fields[ref_pos..] {
        if matches!(value, Value::Object(obj) if obj.is_empty()) {
            return false;
        }
        if out.has_field(name) {
            return false;
        }
        out.push(name.clone(), value.clone());
    }

    for (name, value) in &fields[pos..] {
        if matches!(value, Value::Object(obj) if obj.is_empty()) {
            return false;
        }
        if out.has_field(name) {
            return false;
        }
        out.push(name.clone(), value.clone());
    }

    true
}

/// Number of leaf fields, the quantity the reference-determination
/// heuristic compares against the buffered record count.
pub(crate) fn leaf_count(record: &Record) -> usize {
    record
        .iter()
        .map(|(_, value)| match value {
            Value::Object(sub) => leaf_count(sub),
            _ => 1,
        })
        .sum()
}

/// Flush the leaf encoders and interleave their control blocks into `out`
/// in decode order: always the block from the leaf with the fewest logical
/// elements emitted so far, ties broken by leaf index. Ends the segment
/// with the terminator byte.
pub(crate) fn flush_interleaved(mut leaves: Vec<LeafEncoder>, out: &mut Vec<u8>) {
    let mut queues: Vec<VecDeque<(usize, usize)>> = Vec::with_capacity(leaves.len());
    for leaf in &mut leaves {
        leaf.state.flush(&mut leaf.buf);
        queues.push(leaf.state.take_control_ranges().into());
    }

    let mut heap: BinaryHeap<Reverse<(u64, usize)>> =
        (0..leaves.len()).map(|index| Reverse((0, index))).collect();

    while let Some(Reverse((written, index))) = heap.pop() {
        let Some((offset, len)) = queues[index].pop_front() else {
            continue;
        };
        let block = &leaves[index].buf[offset..offset + len];
        out.extend_from_slice(block);

        if queues[index].is_empty() {
            continue;
        }
        heap.push(Reverse((written + logical_elements(block), index)));
    }

    out.push(TERMINATOR);
}

// Logical element count of one announced range: a literal stands for one
// element, a control block for the sum of its blocks' slot counts.
fn logical_elements(block: &[u8]) -> u64 {
    let Some(&control) = block.first() else {
        return 0;
    };
    if is_literal_control_byte(control) {
        return 1;
    }

    let mut elements = 0u64;
    for index in 0..blocks_for_control_byte(control) {
        let start = 1 + index * 8;
        let word = u64::from_le_bytes(read_word(&block[start.min(block.len())..]));
        elements += block_slot_count(word).unwrap_or(0) as u64;
    }
    elements
}

fn read_word(bytes: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}
