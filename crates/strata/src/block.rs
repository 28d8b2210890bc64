//! Recursive block framing.
//!
//! ┌──────────────────────────────────────────┐
//! │Block                                     │
//! │┌ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ ┐│
//! │  kind       length          payload      │
//! ││  u8   │  unsigned VLQ │  length bytes  ││
//! │ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ │
//! └──────────────────────────────────────────┘
//!
//! Blocks nest freely. A reader that does not need a nested block's
//! contents can skip it using only the length field.

use bytes::{Buf, Bytes};

use crate::error::{StrataError, StrataResult};
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    HashMap,
    SkipIndex,
    HashDeltas,
    KeyStream,
    ValueStream,
    HashTable,
}

impl TryFrom<u8> for BlockKind {
    type Error = StrataError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BlockKind::HashMap),
            1 => Ok(BlockKind::SkipIndex),
            2 => Ok(BlockKind::HashDeltas),
            3 => Ok(BlockKind::KeyStream),
            4 => Ok(BlockKind::ValueStream),
            5 => Ok(BlockKind::HashTable),
            _ => Err(StrataError::DecodeError(
                format!("Invalid block kind: {}", value).into(),
            )),
        }
    }
}

impl From<BlockKind> for u8 {
    fn from(value: BlockKind) -> Self {
        match value {
            BlockKind::HashMap => 0,
            BlockKind::SkipIndex => 1,
            BlockKind::HashDeltas => 2,
            BlockKind::KeyStream => 3,
            BlockKind::ValueStream => 4,
            BlockKind::HashTable => 5,
        }
    }
}

/// Writes one framed block to `sink`.
pub fn write_frame(kind: BlockKind, payload: &[u8], sink: &mut Vec<u8>) {
    sink.push(kind.into());
    varint::write_unsigned(sink, payload.len() as u64);
    sink.extend_from_slice(payload);
}

/// Reads the next block from `cursor`, checking that it has the expected
/// kind. Returns the payload and advances the cursor past the block.
pub fn read_frame(expected: BlockKind, cursor: &mut Bytes) -> StrataResult<Bytes> {
    let (kind, payload) = read_any_frame(cursor)?;
    if kind != expected {
        return Err(StrataError::DecodeError(
            format!("Expected {:?} block, found {:?}", expected, kind).into(),
        ));
    }
    Ok(payload)
}

/// Reads the next block from `cursor` regardless of kind.
pub fn read_any_frame(cursor: &mut Bytes) -> StrataResult<(BlockKind, Bytes)> {
    if cursor.is_empty() {
        return Err(StrataError::decode("Unexpected end of input"));
    }
    let kind = BlockKind::try_from(cursor[0])?;
    cursor.advance(1);
    let len = varint::read_unsigned_from(cursor)? as usize;
    if cursor.len() < len {
        return Err(StrataError::decode("Truncated block"));
    }
    let payload = cursor.slice(..len);
    cursor.advance(len);
    Ok((kind, payload))
}

/// Advances `cursor` past the next block without decoding its payload.
pub fn skip_frame(cursor: &mut Bytes) -> StrataResult<BlockKind> {
    read_any_frame(cursor).map(|(kind, _)| kind)
}
