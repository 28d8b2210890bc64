//! Chunked storage of the actual key/value payloads.
//!
//! ┌──────────────────────────────────────────────────────────────────┐
//! │Chunk                                                             │
//! │┌ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ ─ ─┌ ─ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ │
//! │  entry count   HashDeltas block │KeyStream block  ValueStream   ││
//! ││    VLQ      │                  │               │     block     ││
//! │ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘│
//! └──────────────────────────────────────────────────────────────────┘
//!
//! Chunks are self-delimiting, so a reader can walk from one chunk to
//! the next using only length fields. Key and value bytes are produced
//! by a pluggable [`ElementCodec`] as two independent streams.

use bytes::Bytes;

use crate::error::{StrataError, StrataResult};
use crate::hash_deltas::{HashDeltaReader, HashDeltaWriter};
use crate::{block, block::BlockKind, varint};

/// Per-type encode/decode strategy for keys and values.
///
/// An element the codec marks atomic is never grouped with other
/// entries; it becomes a chunk of its own.
pub trait ElementCodec {
    /// Upper bound on entries per chunk.
    fn max_chunk_entries(&self) -> usize;

    fn is_atomic(&self, _key: &[u8], _value: &[u8]) -> bool {
        false
    }

    fn encode_keys(&self, keys: &[Bytes], buf: &mut Vec<u8>);

    fn decode_keys(&self, bytes: &Bytes, count: usize) -> StrataResult<Vec<Bytes>>;

    fn encode_values(&self, values: &[Bytes], buf: &mut Vec<u8>);

    fn decode_values(&self, bytes: &Bytes, count: usize) -> StrataResult<Vec<Bytes>>;

    fn keys_equal(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }
}

const DEFAULT_CHUNK_ENTRIES: usize = 1024;
const DEFAULT_LARGE_VALUE: usize = 1 << 16;

/// Default codec: keys and values as length-prefixed byte strings.
/// Values past the large-value threshold are atomic.
#[derive(Debug, Clone)]
pub struct BytesCodec {
    pub chunk_entries: usize,
    pub large_value: usize,
}

impl Default for BytesCodec {
    fn default() -> Self {
        BytesCodec {
            chunk_entries: DEFAULT_CHUNK_ENTRIES,
            large_value: DEFAULT_LARGE_VALUE,
        }
    }
}

impl BytesCodec {
    pub fn with_chunk_entries(chunk_entries: usize) -> Self {
        BytesCodec {
            chunk_entries,
            ..Default::default()
        }
    }

    fn encode_stream(items: &[Bytes], buf: &mut Vec<u8>) {
        for item in items {
            varint::write_unsigned(buf, item.len() as u64);
            buf.extend_from_slice(item);
        }
    }

    fn decode_stream(bytes: &Bytes, count: usize) -> StrataResult<Vec<Bytes>> {
        let mut cursor = bytes.clone();
        let mut ans = Vec::with_capacity(count);
        for _ in 0..count {
            let len = varint::read_unsigned_from(&mut cursor)? as usize;
            if cursor.len() < len {
                return Err(StrataError::decode("Truncated element stream"));
            }
            ans.push(cursor.slice(..len));
            cursor = cursor.slice(len..);
        }
        if !cursor.is_empty() {
            return Err(StrataError::decode("Trailing bytes in element stream"));
        }
        Ok(ans)
    }
}

impl ElementCodec for BytesCodec {
    fn max_chunk_entries(&self) -> usize {
        self.chunk_entries
    }

    fn is_atomic(&self, _key: &[u8], value: &[u8]) -> bool {
        value.len() > self.large_value
    }

    fn encode_keys(&self, keys: &[Bytes], buf: &mut Vec<u8>) {
        Self::encode_stream(keys, buf);
    }

    fn decode_keys(&self, bytes: &Bytes, count: usize) -> StrataResult<Vec<Bytes>> {
        Self::decode_stream(bytes, count)
    }

    fn encode_values(&self, values: &[Bytes], buf: &mut Vec<u8>) {
        Self::encode_stream(values, buf);
    }

    fn decode_values(&self, bytes: &Bytes, count: usize) -> StrataResult<Vec<Bytes>> {
        Self::decode_stream(bytes, count)
    }
}

/// Writes one chunk of hash-ordered entries to `sink`.
pub(crate) fn encode_chunk<C: ElementCodec>(
    codec: &C,
    entries: &[(i32, Bytes, Bytes)],
    sink: &mut Vec<u8>,
) {
    varint::write_unsigned(sink, entries.len() as u64);
    let mut hashes = HashDeltaWriter::new();
    for (hash, _, _) in entries {
        hashes.append(*hash);
    }
    hashes.finish(sink);

    let keys: Vec<Bytes> = entries.iter().map(|(_, k, _)| k.clone()).collect();
    let mut buf = Vec::new();
    codec.encode_keys(&keys, &mut buf);
    block::write_frame(BlockKind::KeyStream, &buf, sink);

    let values: Vec<Bytes> = entries.iter().map(|(_, _, v)| v.clone()).collect();
    buf.clear();
    codec.encode_values(&values, &mut buf);
    block::write_frame(BlockKind::ValueStream, &buf, sink);
}

/// One decoded chunk. Immutable and cheaply shareable; the hash cursor
/// and key/value slices all share the chunk's backing bytes.
#[derive(Debug)]
pub struct ChunkReader {
    count: usize,
    encoded_len: usize,
    first_hash: Option<i32>,
    hashes: HashDeltaReader,
    keys: Vec<Bytes>,
    values: Vec<Bytes>,
}

impl ChunkReader {
    /// Decodes the chunk at the head of `cursor`, advancing the cursor
    /// past it.
    pub(crate) fn decode<C: ElementCodec>(codec: &C, cursor: &mut Bytes) -> StrataResult<Self> {
        let before = cursor.len();
        let count = varint::read_unsigned_from(cursor)? as usize;
        let hash_payload = block::read_frame(BlockKind::HashDeltas, cursor)?;
        let key_payload = block::read_frame(BlockKind::KeyStream, cursor)?;
        let value_payload = block::read_frame(BlockKind::ValueStream, cursor)?;
        let keys = codec.decode_keys(&key_payload, count)?;
        let values = codec.decode_values(&value_payload, count)?;
        if keys.len() != count || values.len() != count {
            return Err(StrataError::decode("Chunk stream count mismatch"));
        }
        let hashes = HashDeltaReader::new(hash_payload);
        let first_hash = hashes.clone().try_next()?;
        if first_hash.is_none() && count > 0 {
            return Err(StrataError::decode("Chunk hash sequence is empty"));
        }
        Ok(ChunkReader {
            count,
            encoded_len: before - cursor.len(),
            first_hash,
            hashes,
            keys,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Byte length of this chunk on the wire; the next chunk starts
    /// right after.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }

    pub fn first_hash(&self) -> Option<i32> {
        self.first_hash
    }

    /// Paired key/value at local index `i`.
    pub fn nth(&self, i: usize) -> Option<(Bytes, Bytes)> {
        if i >= self.count {
            return None;
        }
        Some((self.keys[i].clone(), self.values[i].clone()))
    }

    /// Independent cursor over the chunk's hash sequence.
    pub fn hashes(&self) -> HashDeltaReader {
        self.hashes.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn chunk(entries: &[(i32, &str, &str)]) -> Vec<(i32, Bytes, Bytes)> {
        entries
            .iter()
            .map(|(h, k, v)| {
                (
                    *h,
                    Bytes::copy_from_slice(k.as_bytes()),
                    Bytes::copy_from_slice(v.as_bytes()),
                )
            })
            .collect()
    }

    #[test]
    fn chunk_round_trip() {
        let codec = BytesCodec::default();
        let entries = chunk(&[(-3, "a", "va"), (0, "bb", ""), (0, "cc", "vc"), (9, "d", "vd")]);
        let mut sink = Vec::new();
        encode_chunk(&codec, &entries, &mut sink);
        let mut cursor = Bytes::from(sink);
        let reader = ChunkReader::decode(&codec, &mut cursor).unwrap();
        assert!(cursor.is_empty());
        assert_eq!(reader.len(), 4);
        assert_eq!(reader.first_hash(), Some(-3));
        assert_eq!(reader.hashes().collect_all().unwrap(), vec![-3, 0, 0, 9]);
        for (i, (_, key, value)) in entries.iter().enumerate() {
            let (k, v) = reader.nth(i).unwrap();
            assert_eq!((k, v), (key.clone(), value.clone()));
        }
        assert_eq!(reader.nth(4), None);
    }

    #[test]
    fn chunks_are_self_delimiting() {
        let codec = BytesCodec::default();
        let mut sink = Vec::new();
        encode_chunk(&codec, &chunk(&[(1, "k1", "v1")]), &mut sink);
        encode_chunk(&codec, &chunk(&[(2, "k2", "v2")]), &mut sink);
        let mut cursor = Bytes::from(sink);
        let first = ChunkReader::decode(&codec, &mut cursor).unwrap();
        let second = ChunkReader::decode(&codec, &mut cursor).unwrap();
        assert!(cursor.is_empty());
        assert_eq!(first.first_hash(), Some(1));
        assert_eq!(second.first_hash(), Some(2));
        assert_eq!(first.encoded_len() + second.encoded_len(), {
            let mut buf = Vec::new();
            encode_chunk(&codec, &chunk(&[(1, "k1", "v1")]), &mut buf);
            encode_chunk(&codec, &chunk(&[(2, "k2", "v2")]), &mut buf);
            buf.len()
        });
    }

    #[test]
    fn truncated_chunk_is_corrupt() {
        let codec = BytesCodec::default();
        let mut sink = Vec::new();
        encode_chunk(&codec, &chunk(&[(5, "key", "value")]), &mut sink);
        sink.truncate(sink.len() - 3);
        let mut cursor = Bytes::from(sink);
        assert!(ChunkReader::decode(&codec, &mut cursor).is_err());
    }

    #[test]
    fn atomic_threshold() {
        let codec = BytesCodec {
            chunk_entries: 8,
            large_value: 4,
        };
        assert!(!codec.is_atomic(b"k", b"1234"));
        assert!(codec.is_atomic(b"k", b"12345"));
    }
}
