//! Buddy allocation over a power-of-two address space.
//!
//! The allocator hands out power-of-two-sized [`Range`]s and coalesces
//! them eagerly on release: a freed range whose buddy (address XOR size)
//! is also free merges into the parent size class, all the way up.
//! [`Arena`] pairs the allocator with an owned byte buffer and a scoped
//! acquire/release discipline so no range leaks on error paths.

use std::collections::BTreeSet;

use tracing::trace;

use crate::error::{StrataError, StrataResult};

/// A half-open `[start, end)` byte interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Range { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Free lists are a fixed array of size classes; tier `k` holds disjoint
/// free ranges of length `block_size << k`, keyed by start address.
#[derive(Debug)]
pub struct BuddyAllocator {
    block_size: u64,
    capacity: u64,
    tiers: Vec<BTreeSet<u64>>,
}

impl BuddyAllocator {
    pub fn new(block_size: u64, capacity: u64) -> StrataResult<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(StrataError::InvalidConfig(
                format!("block size {} is not a power of two", block_size).into(),
            ));
        }
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(StrataError::InvalidConfig(
                format!("capacity {} is not a power of two", capacity).into(),
            ));
        }
        if block_size > capacity {
            return Err(StrataError::InvalidConfig(
                format!("block size {} exceeds capacity {}", block_size, capacity).into(),
            ));
        }
        let tier_count = (capacity / block_size).trailing_zeros() as usize + 1;
        let mut tiers = vec![BTreeSet::new(); tier_count];
        // the whole address space starts as one free top-tier range
        tiers[tier_count - 1].insert(0);
        Ok(BuddyAllocator {
            block_size,
            capacity,
            tiers,
        })
    }

    fn tier_len(&self, tier: usize) -> u64 {
        self.block_size << tier
    }

    fn tier_of(&self, len: u64) -> usize {
        (len / self.block_size).trailing_zeros() as usize
    }

    /// Rounds `size` up to a power of two no smaller than the block size
    /// and returns a free range of that length, splitting larger blocks
    /// downward as needed.
    pub fn acquire(&mut self, size: u64) -> StrataResult<Range> {
        let len = size.max(self.block_size).next_power_of_two();
        if len > self.capacity {
            return Err(StrataError::CapacityExhausted {
                requested: size as usize,
                capacity: self.capacity as usize,
            });
        }
        let target = self.tier_of(len);
        let source = (target..self.tiers.len())
            .find(|&t| !self.tiers[t].is_empty())
            .ok_or(StrataError::CapacityExhausted {
                requested: size as usize,
                capacity: self.capacity as usize,
            })?;
        let start = *self.tiers[source].iter().next().unwrap();
        self.tiers[source].remove(&start);
        // split down to the target tier, freeing the upper half each time
        let mut tier = source;
        while tier > target {
            tier -= 1;
            let half = self.tier_len(tier);
            self.tiers[tier].insert(start + half);
        }
        let range = Range::new(start, start + len);
        trace!(start = range.start, len = len, "buddy acquire");
        Ok(range)
    }

    /// Returns `range` to the free lists, merging with its buddy upward
    /// as long as the buddy is free.
    pub fn release(&mut self, range: Range) {
        debug_assert!(range.len().is_power_of_two() && range.len() >= self.block_size);
        debug_assert!(range.start % range.len() == 0 && range.end <= self.capacity);
        let mut start = range.start;
        let mut len = range.len();
        let mut tier = self.tier_of(len);
        while tier + 1 < self.tiers.len() {
            let buddy = start ^ len;
            if !self.tiers[tier].remove(&buddy) {
                break;
            }
            start = start.min(buddy);
            len *= 2;
            tier += 1;
        }
        trace!(start = start, len = len, "buddy release");
        self.tiers[tier].insert(start);
    }

    /// Current free ranges across all tiers, in ascending address order.
    pub fn available(&self) -> Vec<Range> {
        let mut ans: Vec<Range> = self
            .tiers
            .iter()
            .enumerate()
            .flat_map(|(tier, starts)| {
                let len = self.tier_len(tier);
                starts.iter().map(move |&s| Range::new(s, s + len))
            })
            .collect();
        ans.sort_by_key(|r| r.start);
        ans
    }
}

/// An owned byte buffer managed by a [`BuddyAllocator`].
///
/// Acquired ranges are not garbage collected; every range must be
/// released on all exit paths. [`Arena::scoped`] does this
/// deterministically, including when the closure fails.
pub struct Arena {
    buf: Box<[u8]>,
    alloc: BuddyAllocator,
}

impl Arena {
    pub fn new(block_size: u64, capacity: u64) -> StrataResult<Self> {
        let alloc = BuddyAllocator::new(block_size, capacity)?;
        Ok(Arena {
            buf: vec![0u8; capacity as usize].into_boxed_slice(),
            alloc,
        })
    }

    pub fn acquire(&mut self, size: u64) -> StrataResult<Range> {
        self.alloc.acquire(size)
    }

    pub fn release(&mut self, range: Range) {
        self.alloc.release(range);
    }

    pub fn slice_mut(&mut self, range: Range) -> &mut [u8] {
        &mut self.buf[range.start as usize..range.end as usize]
    }

    pub fn available(&self) -> Vec<Range> {
        self.alloc.available()
    }

    /// Acquires `size` bytes, passes them (zeroed) to `f`, and releases
    /// the backing range whether or not `f` succeeds.
    pub fn scoped<T>(
        &mut self,
        size: usize,
        f: impl FnOnce(&mut [u8]) -> StrataResult<T>,
    ) -> StrataResult<T> {
        let range = self.alloc.acquire(size as u64)?;
        let slab = &mut self.buf[range.start as usize..range.start as usize + size];
        slab.fill(0);
        let ans = f(slab);
        self.alloc.release(range);
        ans
    }
}
