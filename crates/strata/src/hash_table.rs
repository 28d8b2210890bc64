//! Open-addressing, Robin-Hood-probed flat hash → offset table.
//!
//! ┌─────────────────────────────────────────────────────┐
//! │HashTable block                                      │
//! │┌ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ─ │
//! │          slot 0                          ...       ││
//! ││ hash: i32 LE │ offset field: 1-8 B │              ││
//! │ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┘─ ─ ─ ─ ─ ─ ─ ┘│
//! └─────────────────────────────────────────────────────┘
//!
//! The offset field stores `(offset << 1) | 1`; its low bit is an
//! explicit presence flag, so an all-zero field marks an empty slot and
//! a genuine `(hash = 0, offset = 0)` entry stays representable. The
//! field width is fixed per table, sized from the largest offset.
//!
//! Robin-Hood invariant: an entry at probe distance `d` from its home
//! slot is never bumped by an entry whose current distance is smaller,
//! which lets reads stop early the moment they out-distance a resident.

use bytes::{Buf, Bytes};

use tracing::debug;

use crate::alloc::Arena;
use crate::error::{StrataError, StrataResult};
use crate::{block, block::BlockKind};

const SIZE_OF_HASH: usize = 4;
pub const DEFAULT_LOAD_FACTOR: f64 = 0.85;
const MAX_LOAD_FACTOR: f64 = 0.95;

fn check_load_factor(load_factor: f64) -> StrataResult<()> {
    if !(load_factor > 0.0 && load_factor <= MAX_LOAD_FACTOR) {
        return Err(StrataError::InvalidConfig(
            format!("load factor {} not in (0, {}]", load_factor, MAX_LOAD_FACTOR).into(),
        ));
    }
    Ok(())
}

fn table_size_for(count: usize, load_factor: f64) -> usize {
    (count as f64 / load_factor).ceil() as usize
}

fn home_slot(hash: i32, table_size: usize) -> usize {
    (hash as u32 as u64 % table_size as u64) as usize
}

fn probe_distance(hash: i32, slot: usize, table_size: usize) -> usize {
    let home = home_slot(hash, table_size);
    (slot + table_size - home) % table_size
}

fn read_slot(slab: &[u8], slot: usize, entry_bytes: usize) -> Option<(i32, u64)> {
    let base = slot * entry_bytes;
    let record = &slab[base..base + entry_bytes];
    let mut field = 0u64;
    for (i, &b) in record[SIZE_OF_HASH..].iter().enumerate() {
        field |= (b as u64) << (8 * i);
    }
    if field & 1 == 0 {
        return None;
    }
    let hash = (&record[..SIZE_OF_HASH]).get_i32_le();
    Some((hash, field >> 1))
}

fn write_slot(slab: &mut [u8], slot: usize, entry_bytes: usize, hash: i32, offset: u64) {
    let base = slot * entry_bytes;
    let record = &mut slab[base..base + entry_bytes];
    record[..SIZE_OF_HASH].copy_from_slice(&hash.to_le_bytes());
    let field = (offset << 1) | 1;
    for (i, b) in record[SIZE_OF_HASH..].iter_mut().enumerate() {
        *b = (field >> (8 * i)) as u8;
    }
}

#[derive(Debug)]
pub struct HashTableWriter {
    entries: Vec<(i32, u64)>,
    max_offset: u64,
    load_factor: f64,
}

impl HashTableWriter {
    pub fn new(load_factor: f64) -> StrataResult<Self> {
        check_load_factor(load_factor)?;
        Ok(HashTableWriter {
            entries: Vec::new(),
            max_offset: 0,
            load_factor,
        })
    }

    pub fn put(&mut self, hash: i32, offset: u64) {
        self.max_offset = self.max_offset.max(offset);
        self.entries.push((hash, offset));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Width of one slot: 4 hash bytes plus an offset field wide enough
    /// for the largest offset and its presence bit.
    pub fn entry_bytes(&self) -> usize {
        let offset_bits = 64 - self.max_offset.leading_zeros() as usize;
        SIZE_OF_HASH + (offset_bits + 1).div_ceil(8)
    }

    /// Builds the probed table inside an arena-backed slab and writes it
    /// as one `HashTable` block. The slab is released on every exit
    /// path.
    pub fn flush(self, arena: &mut Arena, sink: &mut Vec<u8>) -> StrataResult<()> {
        if self.entries.is_empty() {
            block::write_frame(BlockKind::HashTable, &[], sink);
            return Ok(());
        }
        let table_size = table_size_for(self.entries.len(), self.load_factor);
        let entry_bytes = self.entry_bytes();
        debug!(
            count = self.entries.len(),
            table_size, entry_bytes, "flushing probed hash table"
        );
        arena.scoped(table_size * entry_bytes, |slab| {
            for &(hash, offset) in &self.entries {
                insert(slab, table_size, entry_bytes, hash, offset);
            }
            block::write_frame(BlockKind::HashTable, slab, sink);
            Ok(())
        })
    }
}

fn insert(slab: &mut [u8], table_size: usize, entry_bytes: usize, hash: i32, offset: u64) {
    let mut current = (hash, offset);
    let mut slot = home_slot(hash, table_size);
    let mut dist = 0usize;
    loop {
        match read_slot(slab, slot, entry_bytes) {
            None => {
                write_slot(slab, slot, entry_bytes, current.0, current.1);
                return;
            }
            Some(resident) => {
                if resident.0 == current.0 {
                    // same hash contends for the slot: the lower offset
                    // wins it, the other keeps probing
                    if current.1 < resident.1 {
                        write_slot(slab, slot, entry_bytes, current.0, current.1);
                        current = resident;
                    }
                } else {
                    let resident_dist = probe_distance(resident.0, slot, table_size);
                    if resident_dist < dist {
                        write_slot(slab, slot, entry_bytes, current.0, current.1);
                        current = resident;
                        dist = resident_dist;
                    }
                }
            }
        }
        slot = (slot + 1) % table_size;
        dist += 1;
    }
}

/// Immutable reader over a flushed table. Table geometry is re-derived
/// from the entry count and load factor agreed at build time plus the
/// block's byte length.
#[derive(Debug, Clone)]
pub struct HashTableReader {
    data: Bytes,
    table_size: usize,
    entry_bytes: usize,
}

impl HashTableReader {
    pub fn new(payload: Bytes, count: usize, load_factor: f64) -> StrataResult<Self> {
        check_load_factor(load_factor)?;
        if count == 0 {
            if !payload.is_empty() {
                return Err(StrataError::decode("Non-empty table with zero entries"));
            }
            return Ok(HashTableReader {
                data: payload,
                table_size: 0,
                entry_bytes: 0,
            });
        }
        let table_size = table_size_for(count, load_factor);
        if payload.is_empty() || payload.len() % table_size != 0 {
            return Err(StrataError::decode("Hash table length mismatch"));
        }
        let entry_bytes = payload.len() / table_size;
        if !(SIZE_OF_HASH + 1..=SIZE_OF_HASH + 8).contains(&entry_bytes) {
            return Err(StrataError::decode("Invalid hash table slot width"));
        }
        Ok(HashTableReader {
            data: payload,
            table_size,
            entry_bytes,
        })
    }

    /// Offset stored for `hash`, or `None`. Probing stops at an empty
    /// slot or as soon as the resident entry is closer to its home slot
    /// than the scan is to its own.
    pub fn get(&self, hash: i32) -> Option<u64> {
        if self.table_size == 0 {
            return None;
        }
        let mut slot = home_slot(hash, self.table_size);
        let mut dist = 0usize;
        while dist < self.table_size {
            match read_slot(&self.data, slot, self.entry_bytes) {
                None => return None,
                Some((h, offset)) => {
                    if h == hash {
                        return Some(offset);
                    }
                    if probe_distance(h, slot, self.table_size) < dist {
                        return None;
                    }
                }
            }
            slot = (slot + 1) % self.table_size;
            dist += 1;
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::alloc::Range;

    fn flush_and_reload(writer: HashTableWriter, count: usize, load_factor: f64) -> HashTableReader {
        let mut arena = Arena::new(64, 1 << 20).unwrap();
        let mut sink = Vec::new();
        writer.flush(&mut arena, &mut sink).unwrap();
        // every slab acquired during the flush was released
        assert_eq!(arena.available(), vec![Range::new(0, 1 << 20)]);
        let mut cursor = Bytes::from(sink);
        let payload = block::read_frame(BlockKind::HashTable, &mut cursor).unwrap();
        HashTableReader::new(payload, count, load_factor).unwrap()
    }

    #[test]
    fn invalid_load_factor() {
        assert!(HashTableWriter::new(0.0).is_err());
        assert!(HashTableWriter::new(1.2).is_err());
        assert!(HashTableWriter::new(-0.5).is_err());
        assert!(HashTableWriter::new(0.95).is_ok());
    }

    #[test]
    fn empty_table() {
        let writer = HashTableWriter::new(DEFAULT_LOAD_FACTOR).unwrap();
        let reader = flush_and_reload(writer, 0, DEFAULT_LOAD_FACTOR);
        assert_eq!(reader.get(0), None);
        assert_eq!(reader.get(-1), None);
    }

    #[test]
    fn zero_hash_zero_offset_is_present() {
        let mut writer = HashTableWriter::new(DEFAULT_LOAD_FACTOR).unwrap();
        writer.put(0, 0);
        let reader = flush_and_reload(writer, 1, DEFAULT_LOAD_FACTOR);
        assert_eq!(reader.get(0), Some(0));
        assert_eq!(reader.get(1), None);
    }

    #[test]
    fn wide_offsets_round_trip() {
        let mut writer = HashTableWriter::new(DEFAULT_LOAD_FACTOR).unwrap();
        writer.put(7, u32::MAX as u64 + 17);
        writer.put(-7, 3);
        assert_eq!(writer.entry_bytes(), 4 + 5);
        let reader = flush_and_reload(writer, 2, DEFAULT_LOAD_FACTOR);
        assert_eq!(reader.get(7), Some(u32::MAX as u64 + 17));
        assert_eq!(reader.get(-7), Some(3));
    }

    #[test]
    fn duplicate_hash_prefers_lower_offset() {
        let mut writer = HashTableWriter::new(DEFAULT_LOAD_FACTOR).unwrap();
        writer.put(42, 900);
        writer.put(42, 5);
        let reader = flush_and_reload(writer, 2, DEFAULT_LOAD_FACTOR);
        assert_eq!(reader.get(42), Some(5));
    }

    #[test]
    fn randomized_lookup_at_high_load() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        for load_factor in [0.5, 0.85, 0.95] {
            let mut rng = StdRng::seed_from_u64(11);
            let mut writer = HashTableWriter::new(load_factor).unwrap();
            let mut expected = std::collections::BTreeMap::new();
            while expected.len() < 5000 {
                let hash: i32 = rng.gen();
                let offset: u64 = rng.gen_range(0..1 << 40);
                if expected.insert(hash, offset).is_none() {
                    writer.put(hash, offset);
                }
            }
            let reader = flush_and_reload(writer, expected.len(), load_factor);
            for (&hash, &offset) in &expected {
                assert_eq!(reader.get(hash), Some(offset));
            }
            for _ in 0..2000 {
                let hash: i32 = rng.gen();
                if !expected.contains_key(&hash) {
                    assert_eq!(reader.get(hash), None);
                }
            }
        }
    }

    #[test]
    fn length_mismatch_is_corrupt() {
        let mut writer = HashTableWriter::new(DEFAULT_LOAD_FACTOR).unwrap();
        for i in 0..10 {
            writer.put(i, i as u64);
        }
        let mut arena = Arena::new(64, 1 << 16).unwrap();
        let mut sink = Vec::new();
        writer.flush(&mut arena, &mut sink).unwrap();
        let mut cursor = Bytes::from(sink);
        let payload = block::read_frame(BlockKind::HashTable, &mut cursor).unwrap();
        let truncated = payload.slice(..payload.len() - 1);
        assert!(HashTableReader::new(truncated, 10, DEFAULT_LOAD_FACTOR).is_err());
    }
}
