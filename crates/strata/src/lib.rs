//! # Strata
//!
//! Durable block encoding layer for persistent collections: turns a
//! hash-sorted stream of `(hash, key, value)` entries into one
//! self-contained, randomly-queryable binary block, and back. Point
//! lookup (`get`) and positional access (`nth`) work without
//! materializing the whole block.
//!
//! ## Overall structure
//!
//! Everything on the wire is a block: `[kind: u8][length: VLQ][payload]`,
//! nested recursively, so a reader can skip any section it does not
//! need using only the length field.
//!
//! ┌────────────────────────────────────────────────────────────────────────────────────┐
//! │ HashMap block                                                                      │
//! │┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─┌ ─ ─ ─ ─ ─ ┐│
//! │  entry count   skip tiers u8 │ hash     │  SkipIndex     SkipIndex   │  chunks    │
//! ││    VLQ      │   tiers u8               │    block    │ (hash keyed) │   bytes   ││
//! │ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ │
//! └────────────────────────────────────────────────────────────────────────────────────┘
//!
//! Entries are partitioned into bounded chunks. Each chunk carries its
//! entry count, a delta-compressed hash sequence, and two
//! independently encoded streams (keys, values) produced by a
//! pluggable [`ElementCodec`]. Two tiered indices sit in front:
//!
//! - the **skip index** maps a chunk's start position to its byte
//!   offset, answering `nth` in O(log₃₂ n);
//! - the **hash skip index** maps the first *new* hash of a chunk to
//!   its byte offset, answering `get`. A hash run continuing across a
//!   chunk boundary is found by scanning forward, guided by the
//!   hash sequence's bounded/unbounded candidate ranges.
//!
//! A standalone Robin-Hood [`hash_table`] block offers a flat
//! hash → offset index as a complementary alternative, and the
//! [`alloc`] module provides the buddy-allocated arena that backs its
//! construction.
//!
//! Writers are single-use and single-threaded; readers are immutable,
//! cheap to clone, and safe for unsynchronized concurrent queries.

pub mod alloc;
pub mod block;
pub mod entry_store;
pub mod error;
pub mod hash_deltas;
pub mod hash_table;
pub mod map;
pub mod skip_index;
pub mod varint;

pub use alloc::{Arena, BuddyAllocator, Range};
pub use entry_store::{BytesCodec, ElementCodec};
pub use error::{StrataError, StrataResult};
pub use hash_table::{HashTableReader, HashTableWriter};
pub use map::{MapBuilder, MapReader};

pub(crate) const XXH_SEED: u32 = u32::from_le_bytes(*b"STRA");

/// Convenience 32-bit key hash for callers that do not bring their own.
pub fn key_hash(key: &[u8]) -> i32 {
    xxhash_rust::xxh32::xxh32(key, XXH_SEED) as i32
}
