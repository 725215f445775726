use bitflags::bitflags;

use crate::core::errors::BufError;
use crate::core::{PageId, NIL_PAGE};

pub(crate) const NIL_INDEX: i32 = -1;

bitflags! {
    /// State bits of a buffer table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufBits: u8 {
        const VALID = 0x1;
        const REFER = 0x2;
        const DIRTY = 0x4;
    }
}

/// One entry of the buffer table, parallel to the frame vector. Hash-chain
/// links are kept in-band (`next_hash` indexes another entry).
#[derive(Debug, Clone, Copy)]
pub(crate) struct BufEntry {
    pub key: PageId,
    pub fixed: u32,
    pub bits: BufBits,
    pub next_hash: i32,
}

impl BufEntry {
    pub fn empty() -> Self {
        Self {
            key: PageId::new(0, NIL_PAGE),
            fixed: 0,
            bits: BufBits::empty(),
            next_hash: NIL_INDEX,
        }
    }
}

/// Closed-addressing hash table from `PageId` to frame index, chained
/// through the entries themselves.
#[derive(Debug)]
pub(crate) struct BufTable {
    pub entries: Vec<BufEntry>,
    buckets: Vec<i32>,
}

impl BufTable {
    pub fn new(n_bufs: usize) -> Self {
        Self {
            entries: vec![BufEntry::empty(); n_bufs],
            buckets: vec![NIL_INDEX; n_bufs],
        }
    }

    fn bucket_of(&self, key: PageId) -> usize {
        let h = (key.page_no as i64 + key.vol_no as i64).unsigned_abs();
        (h % self.buckets.len() as u64) as usize
    }

    /// Walk the chain of `key`'s bucket comparing full keys.
    pub fn lookup(&self, key: PageId) -> Option<usize> {
        let mut idx = self.buckets[self.bucket_of(key)];
        while idx != NIL_INDEX {
            let entry = &self.entries[idx as usize];
            if entry.key == key {
                return Some(idx as usize);
            }
            idx = entry.next_hash;
        }
        None
    }

    /// Prepend `index` to its bucket chain.
    pub fn insert(&mut self, key: PageId, index: usize) {
        let bucket = self.bucket_of(key);
        self.entries[index].next_hash = self.buckets[bucket];
        self.buckets[bucket] = index as i32;
    }

    /// Unlink `key`'s entry from its bucket chain.
    pub fn delete(&mut self, key: PageId) -> Result<(), BufError> {
        let bucket = self.bucket_of(key);
        let mut idx = self.buckets[bucket];
        let mut prev = NIL_INDEX;
        while idx != NIL_INDEX {
            if self.entries[idx as usize].key == key {
                let next = self.entries[idx as usize].next_hash;
                if prev == NIL_INDEX {
                    self.buckets[bucket] = next;
                } else {
                    self.entries[prev as usize].next_hash = next;
                }
                self.entries[idx as usize].next_hash = NIL_INDEX;
                return Ok(());
            }
            prev = idx;
            idx = self.entries[idx as usize].next_hash;
        }
        Err(BufError::NotResident(key))
    }

    /// Reset every entry and empty every bucket.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            *entry = BufEntry::empty();
        }
        for bucket in &mut self.buckets {
            *bucket = NIL_INDEX;
        }
    }
}
