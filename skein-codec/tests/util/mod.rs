//! Structural column walker shared by the integration suites
//!
//! Parses a finished column into its block structure without decompressing
//! values: enough to assert literals, control runs, scale classes and
//! interleaved segments exactly where the format says they must be.

use skein_format::constants::{
    blocks_for_control_byte, is_literal_control_byte, INTERLEAVED_START, TERMINATOR,
};

/// One parsed block.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Uncompressed literal: type byte and total length including payload.
    Literal { type_byte: u8, len: usize },
    /// Simple-8b run: control byte and its 64-bit blocks.
    Run { control: u8, words: Vec<u64> },
    /// Interleaved segment: serialized reference record and inner blocks.
    Interleaved {
        reference: Vec<u8>,
        blocks: Vec<Block>,
    },
}

impl Block {
    pub fn scale_nibble(&self) -> Option<u8> {
        match self {
            Block::Run { control, .. } => Some(control & 0xF0),
            _ => None,
        }
    }
}

/// Parse `(element_count, blocks)` out of a finished column, asserting the
/// prefix and terminator framing along the way.
pub fn parse_column(bytes: &[u8]) -> (u32, Vec<Block>) {
    assert!(bytes.len() >= 5, "column too short: {bytes:02X?}");
    let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let mut pos = 4;
    let blocks = parse_blocks(bytes, &mut pos);
    assert_eq!(bytes[pos], TERMINATOR, "missing column terminator");
    assert_eq!(pos + 1, bytes.len(), "trailing bytes after terminator");
    (count, blocks)
}

fn parse_blocks(bytes: &[u8], pos: &mut usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    while bytes[*pos] != TERMINATOR {
        let control = bytes[*pos];
        if control == INTERLEAVED_START {
            *pos += 1;
            let doc_len =
                i32::from_le_bytes([bytes[*pos], bytes[*pos + 1], bytes[*pos + 2], bytes[*pos + 3]])
                    as usize;
            let reference = bytes[*pos..*pos + doc_len].to_vec();
            *pos += doc_len;
            let inner = parse_blocks(bytes, pos);
            assert_eq!(bytes[*pos], TERMINATOR, "missing segment terminator");
            *pos += 1;
            blocks.push(Block::Interleaved {
                reference,
                blocks: inner,
            });
        } else if is_literal_control_byte(control) {
            let payload = &bytes[*pos + 2..];
            let len = 2 + literal_payload_size(control, payload);
            blocks.push(Block::Literal {
                type_byte: control,
                len,
            });
            *pos += len;
        } else {
            *pos += 1;
            let mut words = Vec::new();
            for _ in 0..blocks_for_control_byte(control) {
                let mut word = [0u8; 8];
                word.copy_from_slice(&bytes[*pos..*pos + 8]);
                words.push(u64::from_le_bytes(word));
                *pos += 8;
            }
            blocks.push(Block::Run { control, words });
        }
    }
    blocks
}

fn literal_payload_size(type_byte: u8, payload: &[u8]) -> usize {
    let prefix = || {
        i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize
    };
    match type_byte {
        0x01 | 0x09 | 0x11 | 0x12 => 8,
        0x10 => 4,
        0x08 => 1,
        0x07 => 12,
        0x13 => 16,
        0x06 | 0x0A => 0,
        0x02 | 0x0E => 4 + prefix(),
        0x03 | 0x04 | 0x0F => prefix(),
        0x05 => 4 + 1 + prefix(),
        0x0C => 4 + prefix() + 12,
        0x0B => {
            let first = payload.iter().position(|&b| b == 0).expect("regex pattern");
            let second = payload[first + 1..]
                .iter()
                .position(|&b| b == 0)
                .expect("regex options");
            first + 1 + second + 1
        }
        other => panic!("unexpected literal type byte {other:#04x}"),
    }
}

/// Field names of a serialized reference record, in order (top level only).
pub fn reference_field_names(reference: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut pos = 4;
    while reference[pos] != TERMINATOR {
        let type_byte = reference[pos];
        pos += 1;
        let name_end = reference[pos..]
            .iter()
            .position(|&b| b == 0)
            .expect("field name terminator");
        names.push(String::from_utf8_lossy(&reference[pos..pos + name_end]).into_owned());
        pos += name_end + 1;
        pos += literal_payload_size(type_byte, &reference[pos..]);
    }
    names
}
