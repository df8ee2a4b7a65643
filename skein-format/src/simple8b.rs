//! Simple-8b integer packing
//!
//! Packs a variable number of fixed-width unsigned integers into 64-bit
//! blocks. The selector lives in the low 4 bits and chooses one of 13 slot
//! widths over the remaining 60 data bits. Within a slot the all-ones
//! pattern is reserved as the skip marker, so a slot of width `w` stores
//! values `0..2^w-2`.
//!
//! The builder holds appended values pending until they can no longer share
//! a single block, then drains the whole queue. This keeps an invariant the
//! double rescale protocol depends on: after any append-triggered write, the
//! only pending value is the one that triggered it, and the delta chain of
//! the pending queue is always based on the last value of the last block.

use std::collections::VecDeque;

/// Slot `(width, count)` per selector value, starting at selector 1.
/// Selectors 0, 14 and 15 are reserved.
const SELECTORS: [(u8, usize); 13] = [
    (1, 60),
    (2, 30),
    (3, 20),
    (4, 15),
    (5, 12),
    (6, 10),
    (8, 7),
    (10, 6),
    (12, 5),
    (15, 4),
    (20, 3),
    (30, 2),
    (60, 1),
];

/// Receiver for completed 64-bit blocks.
pub trait BlockSink {
    /// Called once per completed block, in stream order.
    fn write_block(&mut self, block: u64);
}

/// Adapter running a closure for every completed block.
pub struct FnSink<F: FnMut(u64)>(pub F);

impl<F: FnMut(u64)> BlockSink for FnSink<F> {
    fn write_block(&mut self, block: u64) {
        (self.0)(block)
    }
}

/// Smallest slot width that can hold `value`, leaving the all-ones pattern
/// free for the skip marker. `None` if the value needs more than 60 bits.
pub fn required_bits(value: u128) -> Option<u8> {
    SELECTORS
        .iter()
        .map(|&(bits, _)| bits)
        .find(|&bits| value < (1u128 << bits) - 1)
}

/// Slot count advertised by a block's selector, `None` for reserved
/// selectors.
pub fn block_slot_count(block: u64) -> Option<usize> {
    let selector = (block & 0xF) as usize;
    if (1..=SELECTORS.len()).contains(&selector) {
        Some(SELECTORS[selector - 1].1)
    } else {
        None
    }
}

/// Decode one block into its slots, `None` per skip marker. Intended for
/// tests and accounting; full column decoding lives elsewhere.
pub fn unpack_block(block: u64) -> Option<Vec<Option<u128>>> {
    let selector = (block & 0xF) as usize;
    if !(1..=SELECTORS.len()).contains(&selector) {
        return None;
    }
    let (bits, slots) = SELECTORS[selector - 1];
    let ones = (1u64 << bits) - 1;
    let mut out = Vec::with_capacity(slots);
    let mut data = block >> 4;
    for _ in 0..slots {
        let slot = data & ones;
        out.push(if slot == ones {
            None
        } else {
            Some(slot as u128)
        });
        data >>= bits;
    }
    Some(out)
}

/// Pending-value builder emitting packed 64-bit blocks to a [`BlockSink`].
///
/// One instance handles one logical value width; the encoder keeps a 64-bit
/// and a 128-bit instance side by side and only ever feeds one of them per
/// element type.
#[derive(Debug, Default)]
pub struct Simple8bBuilder {
    pending: VecDeque<Option<u128>>,
}

impl Simple8bBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value. Returns `false` without touching state if the value
    /// cannot be packed at any width; the caller falls back to a literal.
    pub fn append(&mut self, value: u128, sink: &mut impl BlockSink) -> bool {
        if required_bits(value).is_none() {
            return false;
        }
        self.pending.push_back(Some(value));
        if !self.fits_in_one_block() {
            self.spill(sink);
        }
        true
    }

    /// Append a skip marker at the current position.
    pub fn skip(&mut self, sink: &mut impl BlockSink) {
        self.pending.push_back(None);
        if !self.fits_in_one_block() {
            self.spill(sink);
        }
    }

    /// Drain every pending slot into blocks. The final block's unused slots
    /// are padded with skip markers.
    pub fn flush(&mut self, sink: &mut impl BlockSink) {
        while !self.pending.is_empty() {
            let (selector_index, take) = self.best_fit(self.pending.len());
            self.write_block(selector_index, take, sink);
        }
    }

    /// Iterate over pending slots in append order.
    pub fn pending(&self) -> impl Iterator<Item = Option<u128>> + '_ {
        self.pending.iter().copied()
    }

    /// Number of pending slots.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // Emit blocks until only the most recently appended slot remains. Never
    // packs that slot, so the pending delta base stays at the last value of
    // the last written block.
    fn spill(&mut self, sink: &mut impl BlockSink) {
        while self.pending.len() > 1 {
            let older = self.pending.len() - 1;
            let (selector_index, take) = self.best_fit(older);
            self.write_block(selector_index, take, sink);
        }
    }

    fn fits_in_one_block(&self) -> bool {
        let len = self.pending.len();
        if len > 60 {
            return false;
        }
        let need = self.max_bits(len);
        SELECTORS
            .iter()
            .any(|&(bits, slots)| slots >= len && bits >= need)
    }

    // Widest slot required by the first `limit` pending entries. Skip
    // markers fit any width.
    fn max_bits(&self, limit: usize) -> u8 {
        self.pending
            .iter()
            .take(limit)
            .map(|slot| slot.map_or(1, |v| required_bits(v).unwrap_or(61)))
            .max()
            .unwrap_or(1)
    }

    // Best selector for the next block over the first `limit` entries:
    // maximize packed entries, then minimize padded slots.
    fn best_fit(&self, limit: usize) -> (usize, usize) {
        SELECTORS
            .iter()
            .enumerate()
            .filter_map(|(index, &(bits, slots))| {
                let take = limit.min(slots);
                (self.max_bits(take) <= bits).then_some((index, take, slots - take))
            })
            .max_by_key(|&(_, take, padding)| (take, std::cmp::Reverse(padding)))
            .map(|(index, take, _)| (index, take))
            // the single-slot selector always qualifies
            .unwrap_or((SELECTORS.len() - 1, limit.min(1)))
    }

    fn write_block(&mut self, selector_index: usize, take: usize, sink: &mut impl BlockSink) {
        let (bits, slots) = SELECTORS[selector_index];
        let ones = (1u64 << bits) - 1;
        let mut block = (selector_index + 1) as u64;
        for slot in 0..slots {
            let pattern = if slot < take {
                match self.pending.pop_front().flatten() {
                    Some(v) => v as u64,
                    None => ones,
                }
            } else {
                ones
            };
            block |= pattern << (4 + slot as u32 * bits as u32);
        }
        sink.write_block(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_sink(blocks: &mut Vec<u64>) -> FnSink<impl FnMut(u64) + '_> {
        FnSink(|block| blocks.push(block))
    }

    #[test]
    fn test_required_bits_excludes_skip_pattern() {
        assert_eq!(required_bits(0), Some(1));
        // all-ones of width 1 is the skip marker, so 1 needs width 2
        assert_eq!(required_bits(1), Some(2));
        assert_eq!(required_bits(2), Some(2));
        assert_eq!(required_bits(3), Some(3));
        assert_eq!(required_bits((1 << 60) - 2), Some(60));
        assert_eq!(required_bits((1 << 60) - 1), None);
        assert_eq!(required_bits(u128::MAX), None);
    }

    #[test]
    fn test_sixty_zeros_fill_one_block() {
        let mut blocks = Vec::new();
        let mut builder = Simple8bBuilder::new();
        for _ in 0..61 {
            assert!(builder.append(0, &mut collect_sink(&mut blocks)));
        }
        // the 61st forced the first 60 out as a single width-1 block
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], 1); // selector 1, all slots zero
        assert_eq!(builder.pending_len(), 1);

        builder.flush(&mut collect_sink(&mut blocks));
        assert_eq!(blocks.len(), 2);
        assert_eq!(builder.pending_len(), 0);
    }

    #[test]
    fn test_flush_prefers_exact_fit() {
        let mut blocks = Vec::new();
        let mut builder = Simple8bBuilder::new();
        assert!(builder.append(2, &mut collect_sink(&mut blocks)));
        assert!(builder.append(2, &mut collect_sink(&mut blocks)));
        builder.flush(&mut collect_sink(&mut blocks));

        assert_eq!(blocks.len(), 1);
        // two width-30 slots, no padding: selector 12
        assert_eq!(blocks[0], 12 | (2 << 4) | (2 << 34));
    }

    #[test]
    fn test_skip_marker_in_block() {
        let mut blocks = Vec::new();
        let mut builder = Simple8bBuilder::new();
        assert!(builder.append(5, &mut collect_sink(&mut blocks)));
        builder.skip(&mut collect_sink(&mut blocks));
        builder.flush(&mut collect_sink(&mut blocks));

        assert_eq!(blocks.len(), 1);
        let slots = unpack_block(blocks[0]).unwrap();
        assert_eq!(slots, vec![Some(5), None]);
    }

    #[test]
    fn test_unpack_roundtrip() {
        let values = [0u128, 7, 3, 0, 200, 1, 90_000];
        let mut blocks = Vec::new();
        let mut builder = Simple8bBuilder::new();
        for &v in &values {
            assert!(builder.append(v, &mut collect_sink(&mut blocks)));
        }
        builder.flush(&mut collect_sink(&mut blocks));

        let mut decoded = Vec::new();
        for block in blocks {
            decoded.extend(unpack_block(block).unwrap());
        }
        // padded trailing skips may follow the real values
        assert_eq!(
            decoded[..values.len()],
            values.map(Some)[..],
        );
        assert!(decoded[values.len()..].iter().all(|slot| slot.is_none()));
    }

    #[test]
    fn test_oversize_value_rejected_without_side_effects() {
        let mut blocks = Vec::new();
        let mut builder = Simple8bBuilder::new();
        assert!(builder.append(9, &mut collect_sink(&mut blocks)));
        assert!(!builder.append(u128::MAX, &mut collect_sink(&mut blocks)));
        assert_eq!(builder.pending_len(), 1);
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_spill_drains_all_older_values() {
        let wide = (1u128 << 29) + 1; // needs 30 bits
        let mut blocks = Vec::new();
        let mut builder = Simple8bBuilder::new();
        for _ in 0..3 {
            assert!(builder.append(wide, &mut collect_sink(&mut blocks)));
        }
        // third append cannot share a block with the first two
        assert_eq!(blocks.len(), 1);
        assert_eq!(builder.pending_len(), 1);
        assert_eq!(
            unpack_block(blocks[0]).unwrap(),
            vec![Some(wide), Some(wide)]
        );
    }

    #[test]
    fn test_skip_can_trigger_spill() {
        let huge = (1u128 << 60) - 2; // needs the single-slot width
        let mut blocks = Vec::new();
        let mut builder = Simple8bBuilder::new();
        assert!(builder.append(huge, &mut collect_sink(&mut blocks)));
        builder.skip(&mut collect_sink(&mut blocks));
        assert_eq!(blocks.len(), 1);
        assert_eq!(unpack_block(blocks[0]).unwrap(), vec![Some(huge)]);
        assert_eq!(builder.pending_len(), 1);
    }

    #[test]
    fn test_block_slot_count() {
        assert_eq!(block_slot_count(1), Some(60));
        assert_eq!(block_slot_count(12), Some(2));
        assert_eq!(block_slot_count(13), Some(1));
        assert_eq!(block_slot_count(0), None);
        assert_eq!(block_slot_count(14), None);
        assert_eq!(block_slot_count(15), None);
    }
}
