//! Tiered, delta-encoded mapping from a monotonically increasing
//! position to a byte offset, with `floor` queries in O(log₃₂ n).
//!
//! ┌───────────────────────────────────────────────────────────┐
//! │SkipIndex block                                            │
//! │┌ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ┬ ─ ─ ─┌ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ┐│
//! │  tier len     top tier   ...  │  tier len    bottom tier  │
//! ││   VLQ     │   bytes   │      │    VLQ    │    bytes    ││
//! │ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ │
//! └───────────────────────────────────────────────────────────┘
//!
//! Each tier is a run of `(position_delta, offset_delta)` unsigned VLQ
//! pairs. Every 32nd entry appended to a tier is mirrored into its
//! parent as `(position, child_byte_len)` and the child's delta baseline
//! resets, so the parent's byte offset is a valid decode restart point:
//! the mirrored entry is stored in the child with absolute values.
//! Position 0 implicitly maps to offset 0 and is never stored.

use bytes::Bytes;

use crate::error::{StrataError, StrataResult};
use crate::{block, block::BlockKind, varint};

const FAN_OUT: usize = 32;

#[derive(Debug, Default)]
struct Tier {
    buf: Vec<u8>,
    last_position: u64,
    last_offset: u64,
    count: usize,
}

#[derive(Debug, Default)]
pub struct SkipIndexWriter {
    // tiers[0] is the leaf tier holding every entry
    tiers: Vec<Tier>,
    first_position: u64,
    last_position: u64,
    last_offset: u64,
}

impl SkipIndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one `(position, offset)` entry. Positions must be
    /// strictly increasing and greater than zero; offsets must be
    /// non-decreasing.
    pub fn append(&mut self, position: u64, offset: u64) {
        assert!(
            position > self.last_position,
            "skip index positions must be strictly increasing: {} after {}",
            position,
            self.last_position
        );
        assert!(
            offset >= self.last_offset,
            "skip index offsets must be non-decreasing"
        );
        if self.tiers.is_empty() {
            self.first_position = position;
        }
        self.last_position = position;
        self.last_offset = offset;
        self.append_at(0, position, offset);
    }

    fn append_at(&mut self, level: usize, position: u64, offset: u64) {
        if self.tiers.len() == level {
            self.tiers.push(Tier::default());
        }
        let cascade = {
            let tier = &self.tiers[level];
            tier.count > 0 && tier.count % FAN_OUT == 0
        };
        if cascade {
            let child_len = self.tiers[level].buf.len() as u64;
            if self.tiers.len() == level + 1 {
                // a freshly created parent is seeded with the child's
                // first entry (byte offset 0), so a descent for a query
                // below the first cascaded position still reaches the
                // pre-cascade prefix of the child
                self.tiers.push(Tier::default());
                self.raw_append(level + 1, self.first_position, 0);
            }
            self.append_at(level + 1, position, child_len);
            // reset the baseline so the entry below is decodable from
            // the byte offset the parent recorded
            let tier = &mut self.tiers[level];
            tier.last_position = 0;
            tier.last_offset = 0;
        }
        self.raw_append(level, position, offset);
    }

    fn raw_append(&mut self, level: usize, position: u64, offset: u64) {
        let tier = &mut self.tiers[level];
        varint::write_unsigned(&mut tier.buf, position - tier.last_position);
        varint::write_unsigned(&mut tier.buf, offset - tier.last_offset);
        tier.last_position = position;
        tier.last_offset = offset;
        tier.count += 1;
    }

    /// 0 if nothing was appended, else 1 + the number of cascaded parent
    /// tiers.
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Serializes all tiers (top first) as one `SkipIndex` block.
    pub fn finish(self, sink: &mut Vec<u8>) {
        let mut payload = Vec::new();
        for tier in self.tiers.iter().rev() {
            varint::write_unsigned(&mut payload, tier.buf.len() as u64);
            payload.extend_from_slice(&tier.buf);
        }
        block::write_frame(BlockKind::SkipIndex, &payload, sink);
    }
}

/// Immutable reader over a serialized skip index. Cheap to clone; the
/// tier slices share the backing bytes.
#[derive(Debug, Clone)]
pub struct SkipIndexReader {
    // top tier first
    tiers: Vec<Bytes>,
}

impl SkipIndexReader {
    /// Parses the payload of a `SkipIndex` block with a known tier
    /// count (carried in the enclosing header).
    pub fn parse(payload: Bytes, tier_count: usize) -> StrataResult<Self> {
        let mut cursor = payload;
        let mut tiers = Vec::with_capacity(tier_count);
        for _ in 0..tier_count {
            let len = varint::read_unsigned_from(&mut cursor)? as usize;
            if cursor.len() < len {
                return Err(StrataError::decode("Truncated skip index tier"));
            }
            tiers.push(cursor.slice(..len));
            cursor = cursor.slice(len..);
        }
        if !cursor.is_empty() {
            return Err(StrataError::decode("Trailing bytes after skip index"));
        }
        Ok(SkipIndexReader { tiers })
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Returns the greatest recorded `(position, offset)` with
    /// `position <= query`, or `(0, 0)` if no such entry exists.
    pub fn floor(&self, query: u64) -> (u64, u64) {
        let mut start_byte = 0usize;
        let mut ans = (0u64, 0u64);
        for (depth, tier) in self.tiers.iter().enumerate() {
            let Some(mut rest) = tier.get(start_byte..) else {
                return (0, 0);
            };
            let mut position = 0u64;
            let mut offset = 0u64;
            let mut consumed = false;
            loop {
                let mut peek = rest;
                let Ok(dp) = varint::read_unsigned(&mut peek) else {
                    break;
                };
                let Ok(doff) = varint::read_unsigned(&mut peek) else {
                    break;
                };
                if position + dp > query {
                    break;
                }
                position += dp;
                offset += doff;
                rest = peek;
                consumed = true;
            }
            if !consumed {
                // only reachable at the top tier: lower tiers are
                // entered at an entry the parent proved <= query
                debug_assert_eq!(depth, 0);
                return (0, 0);
            }
            ans = (position, offset);
            start_byte = offset as usize;
        }
        ans
    }
}

fn hash_to_key(hash: i32) -> u64 {
    // monotone shift into the strictly positive domain
    (hash as i64 - i32::MIN as i64) as u64 + 1
}

/// Skip index keyed by a non-decreasing `i32` hash instead of a
/// position. Only the first chunk containing a given hash is indexed, so
/// a lookup may need to keep scanning into subsequent chunks.
#[derive(Debug, Default)]
pub struct HashSkipIndexWriter {
    inner: SkipIndexWriter,
}

impl HashSkipIndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, hash: i32, offset: u64) {
        self.inner.append(hash_to_key(hash), offset);
    }

    pub fn tier_count(&self) -> usize {
        self.inner.tier_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn finish(self, sink: &mut Vec<u8>) {
        self.inner.finish(sink);
    }
}

#[derive(Debug, Clone)]
pub struct HashSkipIndexReader {
    inner: SkipIndexReader,
}

impl HashSkipIndexReader {
    pub fn parse(payload: Bytes, tier_count: usize) -> StrataResult<Self> {
        SkipIndexReader::parse(payload, tier_count).map(|inner| HashSkipIndexReader { inner })
    }

    /// Byte offset of the chunk whose first new hash is the greatest one
    /// `<= hash`; 0 when every indexed hash is greater.
    pub fn floor_hash(&self, hash: i32) -> u64 {
        self.inner.floor(hash_to_key(hash)).1
    }
}
