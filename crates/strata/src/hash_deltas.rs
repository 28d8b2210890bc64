//! Delta-compressed ascending sequence of 32-bit hash codes.
//!
//! ┌──────────────────────────────────────────────┐
//! │HashDeltas block                              │
//! │┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ┐│
//! │  first hash      delta            delta      │
//! ││  i32 (LE)   │  zig-zag VLQ  │     ...     ││
//! │ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ │
//! └──────────────────────────────────────────────┘

use bytes::{Buf, Bytes};

use crate::error::{StrataError, StrataResult};
use crate::{block, block::BlockKind, varint};

#[derive(Debug, Default)]
pub struct HashDeltaWriter {
    buf: Vec<u8>,
    last: i32,
    count: usize,
}

impl HashDeltaWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one hash. Hashes must be supplied in non-decreasing
    /// order.
    pub fn append(&mut self, hash: i32) {
        if self.count == 0 {
            self.buf.extend_from_slice(&hash.to_le_bytes());
        } else {
            assert!(
                hash >= self.last,
                "hashes must be non-decreasing: {} after {}",
                hash,
                self.last
            );
            varint::write_signed(&mut self.buf, hash as i64 - self.last as i64);
        }
        self.last = hash;
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Serializes the sequence as one `HashDeltas` block.
    pub fn finish(self, sink: &mut Vec<u8>) {
        block::write_frame(BlockKind::HashDeltas, &self.buf, sink);
    }
}

/// The index range inside one chunk whose hash equals a query value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidates {
    /// First index whose hash equals the query, or -1 if no exact match
    /// was found before the scan ended.
    pub start: isize,
    /// First index whose hash is strictly greater than the query; equals
    /// the scanned length when no greater hash was seen.
    pub end: usize,
    /// True when a strictly greater hash was actually observed, so the
    /// range is known-complete. False means a matching run may continue
    /// in a subsequent chunk.
    pub is_bounded: bool,
}

/// Lazy cursor over a serialized hash sequence. `clone()` yields an
/// independent, restartable cursor over the shared bytes.
#[derive(Debug, Clone)]
pub struct HashDeltaReader {
    rest: Bytes,
    prev: i32,
    started: bool,
}

impl HashDeltaReader {
    pub fn new(payload: Bytes) -> Self {
        HashDeltaReader {
            rest: payload,
            prev: 0,
            started: false,
        }
    }

    /// Next reconstructed hash, or `None` once the sequence is
    /// exhausted.
    pub fn try_next(&mut self) -> StrataResult<Option<i32>> {
        if self.rest.is_empty() {
            return Ok(None);
        }
        let hash = if !self.started {
            if self.rest.len() < 4 {
                return Err(StrataError::decode("Truncated hash sequence"));
            }
            let first = (&self.rest[..4]).get_i32_le();
            self.rest.advance(4);
            self.started = true;
            first
        } else {
            let delta = varint::read_signed_from(&mut self.rest)?;
            let hash = self.prev as i64 + delta;
            i32::try_from(hash).map_err(|_| StrataError::decode("Hash delta out of range"))?
        };
        self.prev = hash;
        Ok(Some(hash))
    }

    /// Scans forward from the start of this cursor, locating the index
    /// range equal to `hash`.
    pub fn candidate_indices(&self, hash: i32) -> StrataResult<Candidates> {
        let mut cursor = self.clone();
        let mut idx = 0usize;
        let mut start = -1isize;
        while let Some(h) = cursor.try_next()? {
            if h > hash {
                return Ok(Candidates {
                    start,
                    end: idx,
                    is_bounded: true,
                });
            }
            if h == hash && start < 0 {
                start = idx as isize;
            }
            idx += 1;
        }
        Ok(Candidates {
            start,
            end: idx,
            is_bounded: false,
        })
    }

    /// Eagerly decodes the remaining hashes. Testing/diagnostic use.
    pub fn collect_all(&self) -> StrataResult<Vec<i32>> {
        let mut cursor = self.clone();
        let mut ans = Vec::new();
        while let Some(h) = cursor.try_next()? {
            ans.push(h);
        }
        Ok(ans)
    }
}
