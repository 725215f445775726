//! Buffer manager: two pools of fixed-size frames (pages and trains) with
//! pin counts, dirty tracking, a hash lookup index, and second-chance
//! replacement.
//!
//! Pinning hands the caller a [`PinnedTrain`] holding a private copy of the
//! frame bytes. Mutations become visible (and durable on the next flush)
//! only when published with [`BufMgr::set_dirty`]; a pin released without
//! publishing discards its changes.

mod table;

use log::debug;

use crate::core::config::EngineConfig;
use crate::core::errors::{BufError, EngineError};
use crate::core::{PageId, PAGE_SIZE, TRAIN_SIZE};
use crate::storage::volume::Volume;

pub(crate) use table::BufBits;
use table::{BufEntry, BufTable};

/// The two buffer unit kinds. They share one design; only the frame size
/// differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufKind {
    Page,
    Train,
}

impl BufKind {
    pub fn size(self) -> usize {
        match self {
            BufKind::Page => PAGE_SIZE,
            BufKind::Train => TRAIN_SIZE,
        }
    }

    fn index(self) -> usize {
        match self {
            BufKind::Page => 0,
            BufKind::Train => 1,
        }
    }
}

/// A pinned train: a private copy of the frame contents plus the identity
/// needed to publish or release it. Every pin must be handed back through
/// [`BufMgr::free_train`], on success and error paths alike.
#[derive(Debug)]
pub struct PinnedTrain {
    pid: PageId,
    kind: BufKind,
    bytes: Vec<u8>,
}

impl PinnedTrain {
    pub fn pid(&self) -> PageId {
        self.pid
    }

    pub fn kind(&self) -> BufKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[derive(Debug)]
struct Pool {
    kind: BufKind,
    frames: Vec<Box<[u8]>>,
    table: BufTable,
    next_victim: usize,
}

impl Pool {
    fn new(kind: BufKind, n_bufs: usize) -> Self {
        assert!(n_bufs > 0, "buffer pool must have at least one frame");
        Self {
            kind,
            frames: (0..n_bufs)
                .map(|_| vec![0u8; kind.size()].into_boxed_slice())
                .collect(),
            table: BufTable::new(n_bufs),
            next_victim: 0,
        }
    }

    /// Write the frame back if dirty, then clear the dirty bit.
    fn flush_frame(&mut self, disk: &mut Volume, index: usize) -> Result<(), EngineError> {
        let entry = &self.table.entries[index];
        if entry.bits.contains(BufBits::DIRTY) {
            disk.write_train(entry.key, &self.frames[index])?;
            self.table.entries[index].bits.remove(BufBits::DIRTY);
        }
        Ok(())
    }

    /// Second-chance victim selection. Scans from `next_victim`, clearing
    /// REFER bits on the first encounter and selecting on the second; two
    /// full passes without an unfixed entry is a capacity failure.
    fn alloc_frame(&mut self, disk: &mut Volume) -> Result<usize, EngineError> {
        let n_bufs = self.frames.len();
        let start = self.next_victim;
        for step in 0..n_bufs * 2 {
            let i = (start + step) % n_bufs;
            let entry = &mut self.table.entries[i];
            if entry.fixed != 0 {
                continue;
            }
            if entry.bits.contains(BufBits::REFER) {
                entry.bits.remove(BufBits::REFER);
                continue;
            }

            self.next_victim = (i + 1) % n_bufs;
            if entry.bits.contains(BufBits::VALID) {
                let key = entry.key;
                debug!("evicting {key} from the {:?} pool", self.kind);
                self.flush_frame(disk, i)?;
                self.table.delete(key)?;
            }
            self.table.entries[i].bits = BufBits::empty();
            return Ok(i);
        }
        Err(BufError::NoUnfixedBuffer.into())
    }
}

/// The buffer manager: one pool per [`BufKind`].
#[derive(Debug)]
pub struct BufMgr {
    pools: [Pool; 2],
}

impl BufMgr {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            pools: [
                Pool::new(BufKind::Page, config.page_bufs),
                Pool::new(BufKind::Train, config.train_bufs),
            ],
        }
    }

    fn pool_mut(&mut self, kind: BufKind) -> &mut Pool {
        &mut self.pools[kind.index()]
    }

    fn pool(&self, kind: BufKind) -> &Pool {
        &self.pools[kind.index()]
    }

    /// Pin the train holding `pid`, reading it from disk on a miss.
    pub fn get_train(
        &mut self,
        disk: &mut Volume,
        pid: PageId,
        kind: BufKind,
    ) -> Result<PinnedTrain, EngineError> {
        let pool = self.pool_mut(kind);
        if let Some(index) = pool.table.lookup(pid) {
            let entry = &mut pool.table.entries[index];
            entry.fixed += 1;
            entry.bits.insert(BufBits::REFER);
            return Ok(PinnedTrain {
                pid,
                kind,
                bytes: pool.frames[index].to_vec(),
            });
        }

        let index = pool.alloc_frame(disk)?;
        disk.read_train(pid, &mut pool.frames[index])?;
        pool.table.entries[index] = BufEntry {
            key: pid,
            fixed: 1,
            bits: BufBits::VALID | BufBits::REFER,
            next_hash: table::NIL_INDEX,
        };
        pool.table.insert(pid, index);
        Ok(PinnedTrain {
            pid,
            kind,
            bytes: pool.frames[index].to_vec(),
        })
    }

    /// Pin `pid` without reading it from disk; the caller is about to
    /// overwrite the whole train. On a miss the returned copy is zeroed.
    pub fn get_new_train(
        &mut self,
        disk: &mut Volume,
        pid: PageId,
        kind: BufKind,
    ) -> Result<PinnedTrain, EngineError> {
        let pool = self.pool_mut(kind);
        if let Some(index) = pool.table.lookup(pid) {
            let entry = &mut pool.table.entries[index];
            entry.fixed += 1;
            entry.bits.insert(BufBits::REFER);
            return Ok(PinnedTrain {
                pid,
                kind,
                bytes: pool.frames[index].to_vec(),
            });
        }

        let index = pool.alloc_frame(disk)?;
        pool.frames[index].fill(0);
        pool.table.entries[index] = BufEntry {
            key: pid,
            fixed: 1,
            bits: BufBits::VALID | BufBits::REFER,
            next_hash: table::NIL_INDEX,
        };
        pool.table.insert(pid, index);
        Ok(PinnedTrain {
            pid,
            kind,
            bytes: vec![0u8; kind.size()],
        })
    }

    /// Publish the pin's bytes into the resident frame and set its dirty
    /// bit. Without this call the pin's mutations are lost on release.
    pub fn set_dirty(&mut self, pin: &PinnedTrain) -> Result<(), BufError> {
        let pool = self.pool_mut(pin.kind);
        let index = pool
            .table
            .lookup(pin.pid)
            .ok_or(BufError::NotResident(pin.pid))?;
        pool.frames[index].copy_from_slice(&pin.bytes);
        pool.table.entries[index].bits.insert(BufBits::DIRTY);
        Ok(())
    }

    /// Release a pin.
    pub fn free_train(&mut self, pin: PinnedTrain) -> Result<(), BufError> {
        let pool = self.pool_mut(pin.kind);
        let index = pool
            .table
            .lookup(pin.pid)
            .ok_or(BufError::NotResident(pin.pid))?;
        let entry = &mut pool.table.entries[index];
        if entry.fixed == 0 {
            return Err(BufError::NotFixed(pin.pid));
        }
        entry.fixed -= 1;
        Ok(())
    }

    /// Write every dirty resident frame back to disk, clearing dirty bits.
    pub fn flush_all(&mut self, disk: &mut Volume) -> Result<(), EngineError> {
        for pool in &mut self.pools {
            for index in 0..pool.frames.len() {
                if !pool.table.entries[index].bits.is_empty() {
                    pool.flush_frame(disk, index)?;
                }
            }
        }
        Ok(())
    }

    /// Drop all residency without flushing. The replacement cursor keeps
    /// its position.
    pub fn discard_all(&mut self) {
        for pool in &mut self.pools {
            pool.table.reset();
        }
    }

    /// Whether `pid` currently occupies a frame. Introspection for tests
    /// and diagnostics.
    pub fn resident(&self, pid: PageId, kind: BufKind) -> bool {
        self.pool(kind).table.lookup(pid).is_some()
    }

    /// Current pin count of `pid`, if resident.
    pub fn fix_count(&self, pid: PageId, kind: BufKind) -> Option<u32> {
        let pool = self.pool(kind);
        pool.table
            .lookup(pid)
            .map(|index| pool.table.entries[index].fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_volume(pages: usize) -> (tempfile::TempDir, Volume) {
        let tmp = tempdir().unwrap();
        let mut vol = Volume::create(tmp.path().join("vol.rc"), 0).unwrap();
        for _ in 0..pages {
            vol.alloc_page(None).unwrap();
        }
        (tmp, vol)
    }

    fn pid(page_no: i32) -> PageId {
        PageId::new(0, page_no)
    }

    #[test]
    fn hit_returns_same_bytes_and_counts_fixes() {
        let (_tmp, mut disk) = test_volume(2);
        let mut buf = BufMgr::new(&EngineConfig::small(4, 2));

        let mut pin = buf.get_new_train(&mut disk, pid(1), BufKind::Page).unwrap();
        pin.bytes_mut()[0] = 0x5A;
        buf.set_dirty(&pin).unwrap();
        buf.free_train(pin).unwrap();

        let pin_a = buf.get_train(&mut disk, pid(1), BufKind::Page).unwrap();
        let pin_b = buf.get_train(&mut disk, pid(1), BufKind::Page).unwrap();
        assert_eq!(buf.fix_count(pid(1), BufKind::Page), Some(2));
        assert_eq!(pin_a.bytes()[0], 0x5A);
        assert_eq!(pin_b.bytes()[0], 0x5A);
        buf.free_train(pin_a).unwrap();
        buf.free_train(pin_b).unwrap();
        assert_eq!(buf.fix_count(pid(1), BufKind::Page), Some(0));
    }

    #[test]
    fn unpublished_mutation_is_lost() {
        let (_tmp, mut disk) = test_volume(1);
        let mut buf = BufMgr::new(&EngineConfig::small(4, 2));

        let mut pin = buf.get_new_train(&mut disk, pid(1), BufKind::Page).unwrap();
        pin.bytes_mut()[0] = 0x77;
        buf.free_train(pin).unwrap();

        let pin = buf.get_train(&mut disk, pid(1), BufKind::Page).unwrap();
        assert_eq!(pin.bytes()[0], 0);
        buf.free_train(pin).unwrap();
    }

    #[test]
    fn second_chance_evicts_the_oldest_unreferenced() {
        let (_tmp, mut disk) = test_volume(4);
        let mut buf = BufMgr::new(&EngineConfig::small(3, 1));

        // Pin and release A, B, C; each is resident with REFER set.
        for page_no in 1..=3 {
            let pin = buf.get_new_train(&mut disk, pid(page_no), BufKind::Page).unwrap();
            buf.free_train(pin).unwrap();
        }

        // Pinning D walks the ring once clearing REFER, then evicts A.
        let pin = buf.get_new_train(&mut disk, pid(4), BufKind::Page).unwrap();
        buf.free_train(pin).unwrap();

        assert!(!buf.resident(pid(1), BufKind::Page));
        assert!(buf.resident(pid(2), BufKind::Page));
        assert!(buf.resident(pid(3), BufKind::Page));
        assert!(buf.resident(pid(4), BufKind::Page));
    }

    #[test]
    fn fixed_frames_are_never_victims() {
        let (_tmp, mut disk) = test_volume(3);
        let mut buf = BufMgr::new(&EngineConfig::small(2, 1));

        let pin_a = buf.get_new_train(&mut disk, pid(1), BufKind::Page).unwrap();
        let pin_b = buf.get_new_train(&mut disk, pid(2), BufKind::Page).unwrap();

        let err = buf.get_new_train(&mut disk, pid(3), BufKind::Page).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Buffer(BufError::NoUnfixedBuffer)
        ));

        buf.free_train(pin_a).unwrap();
        let pin_c = buf.get_new_train(&mut disk, pid(3), BufKind::Page).unwrap();
        assert!(!buf.resident(pid(1), BufKind::Page));
        buf.free_train(pin_b).unwrap();
        buf.free_train(pin_c).unwrap();
    }

    #[test]
    fn dirty_eviction_writes_back() {
        let (_tmp, mut disk) = test_volume(3);
        let mut buf = BufMgr::new(&EngineConfig::small(1, 1));

        let mut pin = buf.get_new_train(&mut disk, pid(1), BufKind::Page).unwrap();
        pin.bytes_mut().fill(0xAB);
        buf.set_dirty(&pin).unwrap();
        buf.free_train(pin).unwrap();

        // Pool of one: pinning page 2 evicts (and flushes) page 1.
        let pin = buf.get_new_train(&mut disk, pid(2), BufKind::Page).unwrap();
        buf.free_train(pin).unwrap();

        let pin = buf.get_train(&mut disk, pid(1), BufKind::Page).unwrap();
        assert!(pin.bytes().iter().all(|b| *b == 0xAB));
        buf.free_train(pin).unwrap();
    }

    #[test]
    fn flush_all_then_discard_all_round_trips_through_disk() {
        let (_tmp, mut disk) = test_volume(1);
        let mut buf = BufMgr::new(&EngineConfig::small(4, 2));

        let mut pin = buf.get_new_train(&mut disk, pid(1), BufKind::Page).unwrap();
        pin.bytes_mut().fill(0xAB);
        buf.set_dirty(&pin).unwrap();
        buf.free_train(pin).unwrap();

        buf.flush_all(&mut disk).unwrap();
        buf.discard_all();
        assert!(!buf.resident(pid(1), BufKind::Page));

        let pin = buf.get_train(&mut disk, pid(1), BufKind::Page).unwrap();
        assert!(pin.bytes().iter().all(|b| *b == 0xAB));
        buf.free_train(pin).unwrap();
    }

    #[test]
    fn discard_all_drops_unflushed_changes() {
        let (_tmp, mut disk) = test_volume(1);
        let mut buf = BufMgr::new(&EngineConfig::small(4, 2));

        let mut pin = buf.get_new_train(&mut disk, pid(1), BufKind::Page).unwrap();
        pin.bytes_mut().fill(0xCD);
        buf.set_dirty(&pin).unwrap();
        buf.free_train(pin).unwrap();
        buf.discard_all();

        let pin = buf.get_train(&mut disk, pid(1), BufKind::Page).unwrap();
        assert!(pin.bytes().iter().all(|b| *b == 0));
        buf.free_train(pin).unwrap();
    }

    #[test]
    fn free_of_unfixed_train_fails() {
        let (_tmp, mut disk) = test_volume(1);
        let mut buf = BufMgr::new(&EngineConfig::small(4, 2));

        let pin = buf.get_new_train(&mut disk, pid(1), BufKind::Page).unwrap();
        let ghost = PinnedTrain {
            pid: pid(1),
            kind: BufKind::Page,
            bytes: Vec::new(),
        };
        buf.free_train(pin).unwrap();
        assert_eq!(
            buf.free_train(ghost).unwrap_err(),
            BufError::NotFixed(pid(1))
        );
    }

    #[test]
    fn train_pool_is_independent_of_page_pool() {
        let (_tmp, mut disk) = test_volume(0);
        let t = disk.alloc_train().unwrap();
        let mut buf = BufMgr::new(&EngineConfig::small(2, 2));

        let mut pin = buf
            .get_new_train(&mut disk, pid(t), BufKind::Train)
            .unwrap();
        assert_eq!(pin.bytes().len(), TRAIN_SIZE);
        pin.bytes_mut().fill(0xEE);
        buf.set_dirty(&pin).unwrap();
        buf.free_train(pin).unwrap();
        buf.flush_all(&mut disk).unwrap();
        buf.discard_all();

        let pin = buf.get_train(&mut disk, pid(t), BufKind::Train).unwrap();
        assert!(pin.bytes().iter().all(|b| *b == 0xEE));
        buf.free_train(pin).unwrap();
        assert!(!buf.resident(pid(t), BufKind::Page));
    }
}
