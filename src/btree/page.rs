//! Leaf and internal index pages, layered over the slotted page.
//!
//! Leaf entries are `{n_objects, klen, kval[aligned], oid}`; `n_objects`
//! is always 1 in this unique-key tree but the field stays reserved.
//! Internal entries are `{spid, klen, kval}` padded to a 4-byte boundary,
//! with the leftmost child in the header `p0`.

use byteorder::{ByteOrder, LittleEndian};

use crate::core::errors::{BtreeError, EngineError, PageError};
use crate::core::{aligned_length, FileId, ObjectId, PageId, PageNo};
use crate::storage::page::{PageFlags, SlottedPage, DATA_CAPACITY, EMPTY_SLOT, SLOT_SIZE};

pub(crate) const OID_SIZE: usize = 12;

/// Split and underflow thresholds work against half the data area.
pub(crate) const HALF_PAGE: usize = DATA_CAPACITY / 2;

pub(crate) fn leaf_entry_size(klen: usize) -> usize {
    4 + aligned_length(klen) + OID_SIZE
}

pub(crate) fn internal_entry_size(klen: usize) -> usize {
    4 + aligned_length(2 + klen)
}

pub(crate) fn leaf_entry_len_at(view: &SlottedPage<'_>, offset: usize) -> Result<usize, PageError> {
    let klen = LittleEndian::read_u16(view.data(offset + 2, 2)?) as usize;
    Ok(leaf_entry_size(klen))
}

pub(crate) fn internal_entry_len_at(
    view: &SlottedPage<'_>,
    offset: usize,
) -> Result<usize, PageError> {
    let klen = LittleEndian::read_u16(view.data(offset + 4, 2)?) as usize;
    Ok(internal_entry_size(klen))
}

fn pack_oid(buf: &mut [u8], oid: ObjectId) {
    LittleEndian::write_i32(&mut buf[0..], oid.page_no);
    LittleEndian::write_i16(&mut buf[4..], oid.vol_no);
    LittleEndian::write_i16(&mut buf[6..], oid.slot_no);
    LittleEndian::write_u32(&mut buf[8..], oid.unique);
}

fn unpack_oid(buf: &[u8]) -> ObjectId {
    ObjectId {
        page_no: LittleEndian::read_i32(&buf[0..]),
        vol_no: LittleEndian::read_i16(&buf[4..]),
        slot_no: LittleEndian::read_i16(&buf[6..]),
        unique: LittleEndian::read_u32(&buf[8..]),
    }
}

#[derive(Debug)]
pub(crate) struct LeafPage<'a> {
    pub sp: SlottedPage<'a>,
}

impl<'a> LeafPage<'a> {
    pub fn init(
        buf: &'a mut [u8],
        pid: PageId,
        fid: FileId,
        root: bool,
    ) -> Result<Self, PageError> {
        let mut flags = PageFlags::LEAF;
        if root {
            flags |= PageFlags::ROOT;
        }
        Ok(Self {
            sp: SlottedPage::init(buf, pid, fid, flags)?,
        })
    }

    pub fn open(buf: &'a mut [u8]) -> Result<Self, EngineError> {
        let sp = SlottedPage::open(buf)?;
        if !sp.flags().contains(PageFlags::LEAF) {
            return Err(BtreeError::BadPageType(sp.page_id(), "leaf").into());
        }
        Ok(Self { sp })
    }

    pub fn n_entries(&self) -> usize {
        self.sp.n_slots()
    }

    fn entry_offset(&self, index: usize) -> Result<usize, PageError> {
        let (offset, _) = self.sp.slot(index)?;
        if offset == EMPTY_SLOT {
            return Err(PageError::EmptySlot(index as i16));
        }
        Ok(offset as usize)
    }

    pub fn key_at(&self, index: usize) -> Result<&[u8], PageError> {
        let offset = self.entry_offset(index)?;
        let klen = LittleEndian::read_u16(self.sp.data(offset + 2, 2)?) as usize;
        self.sp.data(offset + 4, klen)
    }

    pub fn oid_at(&self, index: usize) -> Result<ObjectId, PageError> {
        let offset = self.entry_offset(index)?;
        let klen = LittleEndian::read_u16(self.sp.data(offset + 2, 2)?) as usize;
        let oid_bytes = self.sp.data(offset + 4 + aligned_length(klen), OID_SIZE)?;
        Ok(unpack_oid(oid_bytes))
    }

    pub fn entry_len_at_slot(&self, index: usize) -> Result<usize, PageError> {
        leaf_entry_len_at(&self.sp, self.entry_offset(index)?)
    }

    pub fn entry_bytes(&self, index: usize) -> Result<Vec<u8>, PageError> {
        let offset = self.entry_offset(index)?;
        let len = leaf_entry_len_at(&self.sp, offset)?;
        Ok(self.sp.data(offset, len)?.to_vec())
    }

    /// Insert `key -> oid` at slot position `index`, keeping slot order.
    /// `Full` when the whole entry plus its slot no longer fits.
    pub fn insert_at(&mut self, index: usize, key: &[u8], oid: ObjectId) -> Result<(), PageError> {
        let size = leaf_entry_size(key.len());
        if self.sp.sp_free() < size + SLOT_SIZE {
            return Err(PageError::Full);
        }
        if self.sp.sp_cfree() < size + SLOT_SIZE {
            self.sp.compact_with(None, leaf_entry_len_at)?;
        }
        let offset = self.sp.free();
        {
            let buf = self.sp.data_mut(offset, size)?;
            LittleEndian::write_u16(&mut buf[0..], 1);
            LittleEndian::write_u16(&mut buf[2..], key.len() as u16);
            buf[4..4 + key.len()].copy_from_slice(key);
            let oid_start = 4 + aligned_length(key.len());
            pack_oid(&mut buf[oid_start..oid_start + OID_SIZE], oid);
        }
        self.sp.set_free(offset + size);
        self.sp.insert_slot(index, offset as i16, 0)?;
        Ok(())
    }

    /// Place a raw entry (as produced by `entry_bytes`) at slot position
    /// `index`.
    pub fn insert_raw(&mut self, index: usize, entry: &[u8]) -> Result<(), PageError> {
        if self.sp.sp_free() < entry.len() + SLOT_SIZE {
            return Err(PageError::Full);
        }
        if self.sp.sp_cfree() < entry.len() + SLOT_SIZE {
            self.sp.compact_with(None, leaf_entry_len_at)?;
        }
        let offset = self.sp.free();
        self.sp.data_mut(offset, entry.len())?.copy_from_slice(entry);
        self.sp.set_free(offset + entry.len());
        self.sp.insert_slot(index, offset as i16, 0)?;
        Ok(())
    }

    /// Drop the entry at `index`; the freed bytes wait for compaction.
    pub fn remove_at(&mut self, index: usize) -> Result<usize, PageError> {
        let len = self.entry_len_at_slot(index)?;
        self.sp.remove_slot(index)?;
        self.sp.set_unused(self.sp.unused() + len);
        Ok(len)
    }
}

#[derive(Debug)]
pub(crate) struct InternalPage<'a> {
    pub sp: SlottedPage<'a>,
}

impl<'a> InternalPage<'a> {
    pub fn init(
        buf: &'a mut [u8],
        pid: PageId,
        fid: FileId,
        root: bool,
    ) -> Result<Self, PageError> {
        let mut flags = PageFlags::INTERNAL;
        if root {
            flags |= PageFlags::ROOT;
        }
        Ok(Self {
            sp: SlottedPage::init(buf, pid, fid, flags)?,
        })
    }

    pub fn open(buf: &'a mut [u8]) -> Result<Self, EngineError> {
        let sp = SlottedPage::open(buf)?;
        if !sp.flags().contains(PageFlags::INTERNAL) {
            return Err(BtreeError::BadPageType(sp.page_id(), "internal").into());
        }
        Ok(Self { sp })
    }

    pub fn n_entries(&self) -> usize {
        self.sp.n_slots()
    }

    pub fn p0(&self) -> PageNo {
        self.sp.p0()
    }

    pub fn set_p0(&mut self, page_no: PageNo) {
        self.sp.set_p0(page_no);
    }

    fn entry_offset(&self, index: usize) -> Result<usize, PageError> {
        let (offset, _) = self.sp.slot(index)?;
        if offset == EMPTY_SLOT {
            return Err(PageError::EmptySlot(index as i16));
        }
        Ok(offset as usize)
    }

    pub fn child_at(&self, index: usize) -> Result<PageNo, PageError> {
        let offset = self.entry_offset(index)?;
        Ok(LittleEndian::read_i32(self.sp.data(offset, 4)?))
    }

    pub fn key_at(&self, index: usize) -> Result<&[u8], PageError> {
        let offset = self.entry_offset(index)?;
        let klen = LittleEndian::read_u16(self.sp.data(offset + 4, 2)?) as usize;
        self.sp.data(offset + 6, klen)
    }

    pub fn entry_len_at_slot(&self, index: usize) -> Result<usize, PageError> {
        internal_entry_len_at(&self.sp, self.entry_offset(index)?)
    }

    pub fn entry_bytes(&self, index: usize) -> Result<Vec<u8>, PageError> {
        let offset = self.entry_offset(index)?;
        let len = internal_entry_len_at(&self.sp, offset)?;
        Ok(self.sp.data(offset, len)?.to_vec())
    }

    /// Insert a separator `key -> spid` at slot position `index`.
    pub fn insert_at(&mut self, index: usize, spid: PageNo, key: &[u8]) -> Result<(), PageError> {
        let size = internal_entry_size(key.len());
        if self.sp.sp_free() < size + SLOT_SIZE {
            return Err(PageError::Full);
        }
        if self.sp.sp_cfree() < size + SLOT_SIZE {
            self.sp.compact_with(None, internal_entry_len_at)?;
        }
        let offset = self.sp.free();
        {
            let buf = self.sp.data_mut(offset, size)?;
            LittleEndian::write_i32(&mut buf[0..], spid);
            LittleEndian::write_u16(&mut buf[4..], key.len() as u16);
            buf[6..6 + key.len()].copy_from_slice(key);
        }
        self.sp.set_free(offset + size);
        self.sp.insert_slot(index, offset as i16, 0)?;
        Ok(())
    }

    pub fn insert_raw(&mut self, index: usize, entry: &[u8]) -> Result<(), PageError> {
        if self.sp.sp_free() < entry.len() + SLOT_SIZE {
            return Err(PageError::Full);
        }
        if self.sp.sp_cfree() < entry.len() + SLOT_SIZE {
            self.sp.compact_with(None, internal_entry_len_at)?;
        }
        let offset = self.sp.free();
        self.sp.data_mut(offset, entry.len())?.copy_from_slice(entry);
        self.sp.set_free(offset + entry.len());
        self.sp.insert_slot(index, offset as i16, 0)?;
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<usize, PageError> {
        let len = self.entry_len_at_slot(index)?;
        self.sp.remove_slot(index)?;
        self.sp.set_unused(self.sp.unused() + len);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PAGE_SIZE;

    fn oid(n: i32) -> ObjectId {
        ObjectId::new(0, n, 0, n as u32)
    }

    #[test]
    fn leaf_entries_round_trip() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut leaf = LeafPage::init(&mut buf, PageId::new(0, 3), 1, true).unwrap();

        leaf.insert_at(0, b"bb", oid(2)).unwrap();
        leaf.insert_at(0, b"a", oid(1)).unwrap();
        leaf.insert_at(2, b"ccc", oid(3)).unwrap();

        assert_eq!(leaf.n_entries(), 3);
        assert_eq!(leaf.key_at(0).unwrap(), b"a");
        assert_eq!(leaf.key_at(1).unwrap(), b"bb");
        assert_eq!(leaf.key_at(2).unwrap(), b"ccc");
        assert_eq!(leaf.oid_at(1).unwrap(), oid(2));
    }

    #[test]
    fn leaf_remove_leaves_a_hole_that_insert_reclaims() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut leaf = LeafPage::init(&mut buf, PageId::new(0, 3), 1, false).unwrap();

        // Fill the page, then punch a hole in the middle.
        let filler = vec![0x6D; 100];
        let mut n = 0;
        while leaf.insert_at(n, &filler, oid(n as i32)).is_ok() {
            n += 1;
        }
        let removed = leaf.remove_at(n / 2).unwrap();
        assert_eq!(removed, leaf_entry_size(100));
        assert_eq!(leaf.sp.unused(), removed);

        // The hole is not contiguous, so the next insert must compact.
        assert!(leaf.sp.sp_cfree() < leaf.sp.sp_free());
        leaf.insert_at(leaf.n_entries(), &filler, oid(999)).unwrap();
        assert_eq!(leaf.sp.unused(), 0);
        assert_eq!(leaf.key_at(0).unwrap(), &filler[..]);
    }

    #[test]
    fn leaf_rejects_an_entry_that_cannot_fit() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut leaf = LeafPage::init(&mut buf, PageId::new(0, 3), 1, false).unwrap();
        let big = vec![0x61; 200];
        let mut inserted = 0;
        loop {
            match leaf.insert_at(inserted, &big, oid(1)) {
                Ok(()) => inserted += 1,
                Err(PageError::Full) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(inserted > 0);
        assert!(leaf.sp.sp_free() < leaf_entry_size(big.len()) + SLOT_SIZE);
    }

    #[test]
    fn internal_entries_round_trip() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = InternalPage::init(&mut buf, PageId::new(0, 4), 1, true).unwrap();
        page.set_p0(11);

        page.insert_at(0, 12, b"k1").unwrap();
        page.insert_at(1, 13, b"k2").unwrap();

        assert_eq!(page.p0(), 11);
        assert_eq!(page.child_at(0).unwrap(), 12);
        assert_eq!(page.key_at(1).unwrap(), b"k2");

        let raw = page.entry_bytes(0).unwrap();
        page.remove_at(0).unwrap();
        assert_eq!(page.n_entries(), 1);
        let n = page.n_entries();
        page.insert_raw(n, &raw).unwrap();
        assert_eq!(page.child_at(1).unwrap(), 12);
        assert_eq!(page.key_at(1).unwrap(), b"k1");
    }
}
