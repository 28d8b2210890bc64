//! Build and query the composite hash-map block.
//!
//! ┌──────────────────────────────────────────────────────────────────────────────────┐
//! │HashMap block payload                                                             │
//! │┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─┌ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ┐│
//! │  entry count   skip tiers    hash tiers │ SkipIndex    SkipIndex     chunk      │
//! ││    VLQ      │     u8      │    u8      │   block   │ block (hash) │  bytes... ││
//! │ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ │
//! └──────────────────────────────────────────────────────────────────────────────────┘
//!
//! With fewer than two chunks both indices are omitted and their tier
//! counts are zero. The writer consumes an externally hash-sorted
//! entry stream; the reader slices the sections lazily and shares its
//! backing bytes across clones, so queries from independent clones
//! never interfere.

use std::sync::Arc;

use bytes::{Buf, Bytes};
use tracing::debug;

use crate::entry_store::{self, ChunkReader, ElementCodec};
use crate::error::{StrataError, StrataResult};
use crate::skip_index::{
    HashSkipIndexReader, HashSkipIndexWriter, SkipIndexReader, SkipIndexWriter,
};
use crate::{block, block::BlockKind, varint};

const DEFAULT_CACHE_ITEMS: usize = 1 << 10;

/// Cache of decoded chunks, keyed by chunk byte offset. Shareable
/// across readers of the same block.
pub type ChunkCache = quick_cache::sync::Cache<usize, Arc<ChunkReader>>;

/// Single-use writer for one hash-map block. Entries must arrive in
/// non-decreasing hash order (the external merge-sort's contract).
pub struct MapBuilder<C: ElementCodec> {
    codec: C,
    chunk: Vec<(i32, Bytes, Bytes)>,
    skip: SkipIndexWriter,
    hash_skip: HashSkipIndexWriter,
    entry_bytes: Vec<u8>,
    flushed: u64,
    chunks: u64,
    prev_last_hash: Option<i32>,
    last_hash: Option<i32>,
}

impl<C: ElementCodec> MapBuilder<C> {
    pub fn new(codec: C) -> Self {
        MapBuilder {
            codec,
            chunk: Vec::new(),
            skip: SkipIndexWriter::new(),
            hash_skip: HashSkipIndexWriter::new(),
            entry_bytes: Vec::new(),
            flushed: 0,
            chunks: 0,
            prev_last_hash: None,
            last_hash: None,
        }
    }

    /// Encodes a whole pre-sorted stream as one block, returning the
    /// entry count.
    pub fn encode(
        entries: impl IntoIterator<Item = (i32, Bytes, Bytes)>,
        codec: C,
        sink: &mut Vec<u8>,
    ) -> u64 {
        let mut builder = MapBuilder::new(codec);
        for (hash, key, value) in entries {
            builder.append(hash, key, value);
        }
        builder.finish(sink)
    }

    pub fn append(&mut self, hash: i32, key: Bytes, value: Bytes) {
        debug_assert!(
            self.last_hash.map_or(true, |last| hash >= last),
            "entries must be appended in non-decreasing hash order"
        );
        self.last_hash = Some(hash);
        if self.codec.is_atomic(&key, &value) {
            // an atomic element is never grouped with others
            self.flush_chunk();
            self.chunk.push((hash, key, value));
            self.flush_chunk();
            return;
        }
        self.chunk.push((hash, key, value));
        if self.chunk.len() >= self.codec.max_chunk_entries() {
            self.flush_chunk();
        }
    }

    fn flush_chunk(&mut self) {
        if self.chunk.is_empty() {
            return;
        }
        let offset = self.entry_bytes.len() as u64;
        let first_hash = self.chunk[0].0;
        if self.flushed > 0 {
            // chunk 0 starts at position 0 / offset 0, which the skip
            // index leaves implicit
            self.skip.append(self.flushed, offset);
        }
        // index only the first chunk that contains a given hash; a
        // chunk continuing its predecessor's hash run is found by
        // scanning forward from that predecessor
        if self.prev_last_hash != Some(first_hash) {
            self.hash_skip.append(first_hash, offset);
        }
        entry_store::encode_chunk(&self.codec, &self.chunk, &mut self.entry_bytes);
        self.prev_last_hash = Some(self.chunk[self.chunk.len() - 1].0);
        self.flushed += self.chunk.len() as u64;
        self.chunks += 1;
        self.chunk.clear();
    }

    /// Flushes the trailing chunk and writes the whole `HashMap` block.
    /// Returns the total entry count.
    pub fn finish(mut self, sink: &mut Vec<u8>) -> u64 {
        self.flush_chunk();
        let mut payload = Vec::new();
        varint::write_unsigned(&mut payload, self.flushed);
        if self.chunks < 2 {
            payload.push(0);
            payload.push(0);
        } else {
            let skip_tiers = self.skip.tier_count();
            let hash_tiers = self.hash_skip.tier_count();
            assert!(skip_tiers <= u8::MAX as usize && hash_tiers <= u8::MAX as usize);
            payload.push(skip_tiers as u8);
            payload.push(hash_tiers as u8);
            if skip_tiers > 0 {
                self.skip.finish(&mut payload);
            }
            if hash_tiers > 0 {
                self.hash_skip.finish(&mut payload);
            }
        }
        payload.extend_from_slice(&self.entry_bytes);
        debug!(
            entries = self.flushed,
            chunks = self.chunks,
            bytes = payload.len(),
            "encoded hash map block"
        );
        block::write_frame(BlockKind::HashMap, &payload, sink);
        self.flushed
    }
}

/// Reader over one encoded hash-map block.
///
/// Cloning is cheap: clones share the backing bytes and the decoded
/// chunk cache, and each query runs on its own cursors, so clones are
/// safe for unsynchronized concurrent use.
pub struct MapReader<C: ElementCodec> {
    codec: Arc<C>,
    entry_count: u64,
    skip: Option<SkipIndexReader>,
    hash_skip: Option<HashSkipIndexReader>,
    entries: Bytes,
    cache: Arc<ChunkCache>,
}

impl<C: ElementCodec> Clone for MapReader<C> {
    fn clone(&self) -> Self {
        MapReader {
            codec: self.codec.clone(),
            entry_count: self.entry_count,
            skip: self.skip.clone(),
            hash_skip: self.hash_skip.clone(),
            entries: self.entries.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<C: ElementCodec> MapReader<C> {
    pub fn decode(bytes: Bytes, codec: C) -> StrataResult<Self> {
        Self::decode_with_cache(
            bytes,
            codec,
            Arc::new(ChunkCache::new(DEFAULT_CACHE_ITEMS)),
        )
    }

    /// Decode sharing a caller-supplied chunk cache (e.g. one cache
    /// across many readers of the same block).
    pub fn decode_with_cache(
        bytes: Bytes,
        codec: C,
        cache: Arc<ChunkCache>,
    ) -> StrataResult<Self> {
        let mut cursor = bytes;
        let mut payload = block::read_frame(BlockKind::HashMap, &mut cursor)?;
        let entry_count = varint::read_unsigned_from(&mut payload)?;
        if payload.len() < 2 {
            return Err(StrataError::decode("Truncated hash map header"));
        }
        let skip_tiers = payload[0] as usize;
        let hash_tiers = payload[1] as usize;
        payload.advance(2);
        let skip = if skip_tiers > 0 {
            let section = block::read_frame(BlockKind::SkipIndex, &mut payload)?;
            Some(SkipIndexReader::parse(section, skip_tiers)?)
        } else {
            None
        };
        let hash_skip = if hash_tiers > 0 {
            let section = block::read_frame(BlockKind::SkipIndex, &mut payload)?;
            Some(HashSkipIndexReader::parse(section, hash_tiers)?)
        } else {
            None
        };
        debug!(entry_count, skip_tiers, hash_tiers, "decoded hash map block");
        Ok(MapReader {
            codec: Arc::new(codec),
            entry_count,
            skip,
            hash_skip,
            entries: payload,
            cache,
        })
    }

    pub fn len(&self) -> u64 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    fn chunk_at(&self, offset: usize) -> StrataResult<Arc<ChunkReader>> {
        self.cache.get_or_insert_with(&offset, || {
            let mut cursor = self.entries.slice(offset..);
            ChunkReader::decode(self.codec.as_ref(), &mut cursor).map(Arc::new)
        })
    }

    /// Value stored under `(hash, key)`, or `None`. When the candidate
    /// hash run is not known to end inside a chunk, the scan continues
    /// into subsequent chunks until a chunk proves absence or input is
    /// exhausted.
    pub fn get(&self, hash: i32, key: &[u8]) -> StrataResult<Option<Bytes>> {
        let mut offset = self
            .hash_skip
            .as_ref()
            .map_or(0, |index| index.floor_hash(hash)) as usize;
        while offset < self.entries.len() {
            let chunk = self.chunk_at(offset)?;
            if matches!(chunk.first_hash(), Some(first) if first > hash) {
                return Ok(None);
            }
            let candidates = chunk.hashes().candidate_indices(hash)?;
            if candidates.start >= 0 {
                for i in candidates.start as usize..candidates.end {
                    if let Some((k, v)) = chunk.nth(i) {
                        if self.codec.keys_equal(&k, key) {
                            return Ok(Some(v));
                        }
                    }
                }
            }
            if candidates.is_bounded {
                return Ok(None);
            }
            offset += chunk.encoded_len();
        }
        Ok(None)
    }

    /// The `index`-th entry in hash-sorted order, or `None` when out of
    /// range.
    pub fn nth(&self, index: u64) -> StrataResult<Option<(Bytes, Bytes)>> {
        if index >= self.entry_count {
            return Ok(None);
        }
        let (mut position, start) = self
            .skip
            .as_ref()
            .map_or((0, 0), |index_reader| index_reader.floor(index));
        let mut offset = start as usize;
        while offset < self.entries.len() {
            let chunk = self.chunk_at(offset)?;
            let local = (index - position) as usize;
            if local < chunk.len() {
                return Ok(chunk.nth(local));
            }
            position += chunk.len() as u64;
            offset += chunk.encoded_len();
        }
        Ok(None)
    }
}
