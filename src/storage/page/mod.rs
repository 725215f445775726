//! Slotted page layout shared by the object manager and the B+ tree:
//! a fixed header, a data area growing down from the header, and a slot
//! array growing up from the page tail.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use crate::core::errors::PageError;
use crate::core::{FileId, PageId, PageNo, VolNo, NIL_PAGE, PAGE_SIZE};

pub const HEADER_SIZE: usize = 48;
pub const SLOT_SIZE: usize = 8;
pub const DATA_CAPACITY: usize = PAGE_SIZE - HEADER_SIZE;

/// Offset value of an unused slot.
pub const EMPTY_SLOT: i16 = -1;

// Header layout (little-endian), offsets in bytes.
const HDR_PAGE_NO: usize = 0;
const HDR_VOL_NO: usize = 4;
const HDR_FLAGS: usize = 6;
const HDR_FID: usize = 8;
const HDR_N_SLOTS: usize = 12;
const HDR_FREE: usize = 14;
const HDR_UNUSED: usize = 16;
const HDR_NEXT_PAGE: usize = 20;
const HDR_PREV_PAGE: usize = 24;
const HDR_SPACE_NEXT: usize = 28;
const HDR_SPACE_PREV: usize = 32;
const HDR_P0: usize = 36;
const HDR_UNIQUE_SEQ: usize = 40;

bitflags! {
    /// Page type bits stored in the header `flags` word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u16 {
        const SLOTTED = 0x2;
        const LEAF = 0x10;
        const INTERNAL = 0x20;
        const ROOT = 0x40;
    }
}

/// Mutable view over one page worth of bytes.
///
/// All offsets handed out by slots are relative to the data area, which
/// spans `[HEADER_SIZE, PAGE_SIZE)` minus the slot array at the tail.
#[derive(Debug)]
pub struct SlottedPage<'a> {
    buf: &'a mut [u8],
}

impl<'a> SlottedPage<'a> {
    /// Initialize `buf` as an empty slotted page owned by file `fid`.
    pub fn init(buf: &'a mut [u8], pid: PageId, fid: FileId, flags: PageFlags) -> Result<Self, PageError> {
        if buf.len() != PAGE_SIZE {
            return Err(PageError::Corrupt(format!(
                "page buffer of {} bytes",
                buf.len()
            )));
        }
        buf.fill(0);
        let mut page = Self { buf };
        page.set_page_id(pid);
        page.set_flags(flags);
        page.set_fid(fid);
        page.set_n_slots(0);
        page.set_free(0);
        page.set_unused(0);
        page.set_next_page(NIL_PAGE);
        page.set_prev_page(NIL_PAGE);
        page.set_space_next(NIL_PAGE);
        page.set_space_prev(NIL_PAGE);
        page.set_p0(NIL_PAGE);
        Ok(page)
    }

    pub fn open(buf: &'a mut [u8]) -> Result<Self, PageError> {
        if buf.len() != PAGE_SIZE {
            return Err(PageError::Corrupt(format!(
                "page buffer of {} bytes",
                buf.len()
            )));
        }
        let page = Self { buf };
        page.validate()?;
        Ok(page)
    }

    fn validate(&self) -> Result<(), PageError> {
        let free = self.free();
        let n_slots = self.n_slots();
        let unused = self.unused();
        if free + n_slots * SLOT_SIZE > DATA_CAPACITY {
            return Err(PageError::Corrupt(format!(
                "free={free} with {n_slots} slots overflows the data area"
            )));
        }
        if unused > free {
            return Err(PageError::Corrupt(format!(
                "unused={unused} exceeds free={free}"
            )));
        }
        Ok(())
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(
            LittleEndian::read_i16(&self.buf[HDR_VOL_NO..]),
            LittleEndian::read_i32(&self.buf[HDR_PAGE_NO..]),
        )
    }

    pub fn set_page_id(&mut self, pid: PageId) {
        LittleEndian::write_i32(&mut self.buf[HDR_PAGE_NO..], pid.page_no);
        LittleEndian::write_i16(&mut self.buf[HDR_VOL_NO..], pid.vol_no);
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(LittleEndian::read_u16(&self.buf[HDR_FLAGS..]))
    }

    pub fn set_flags(&mut self, flags: PageFlags) {
        LittleEndian::write_u16(&mut self.buf[HDR_FLAGS..], flags.bits());
    }

    pub fn fid(&self) -> FileId {
        LittleEndian::read_i32(&self.buf[HDR_FID..])
    }

    pub fn set_fid(&mut self, fid: FileId) {
        LittleEndian::write_i32(&mut self.buf[HDR_FID..], fid);
    }

    pub fn n_slots(&self) -> usize {
        LittleEndian::read_u16(&self.buf[HDR_N_SLOTS..]) as usize
    }

    pub fn set_n_slots(&mut self, n: usize) {
        LittleEndian::write_u16(&mut self.buf[HDR_N_SLOTS..], n as u16);
    }

    /// Start of the contiguous free region, relative to the data area.
    pub fn free(&self) -> usize {
        LittleEndian::read_u16(&self.buf[HDR_FREE..]) as usize
    }

    pub fn set_free(&mut self, free: usize) {
        LittleEndian::write_u16(&mut self.buf[HDR_FREE..], free as u16);
    }

    /// Freed bytes inside `[0, free)` that compaction will reclaim.
    pub fn unused(&self) -> usize {
        LittleEndian::read_u16(&self.buf[HDR_UNUSED..]) as usize
    }

    pub fn set_unused(&mut self, unused: usize) {
        LittleEndian::write_u16(&mut self.buf[HDR_UNUSED..], unused as u16);
    }

    pub fn next_page(&self) -> PageNo {
        LittleEndian::read_i32(&self.buf[HDR_NEXT_PAGE..])
    }

    pub fn set_next_page(&mut self, page_no: PageNo) {
        LittleEndian::write_i32(&mut self.buf[HDR_NEXT_PAGE..], page_no);
    }

    pub fn prev_page(&self) -> PageNo {
        LittleEndian::read_i32(&self.buf[HDR_PREV_PAGE..])
    }

    pub fn set_prev_page(&mut self, page_no: PageNo) {
        LittleEndian::write_i32(&mut self.buf[HDR_PREV_PAGE..], page_no);
    }

    pub fn space_next(&self) -> PageNo {
        LittleEndian::read_i32(&self.buf[HDR_SPACE_NEXT..])
    }

    pub fn set_space_next(&mut self, page_no: PageNo) {
        LittleEndian::write_i32(&mut self.buf[HDR_SPACE_NEXT..], page_no);
    }

    pub fn space_prev(&self) -> PageNo {
        LittleEndian::read_i32(&self.buf[HDR_SPACE_PREV..])
    }

    pub fn set_space_prev(&mut self, page_no: PageNo) {
        LittleEndian::write_i32(&mut self.buf[HDR_SPACE_PREV..], page_no);
    }

    /// Leftmost child of an internal index page; `NIL_PAGE` elsewhere.
    pub fn p0(&self) -> PageNo {
        LittleEndian::read_i32(&self.buf[HDR_P0..])
    }

    pub fn set_p0(&mut self, page_no: PageNo) {
        LittleEndian::write_i32(&mut self.buf[HDR_P0..], page_no);
    }

    /// Next per-page unique, used to stamp slots against stale ObjectIds.
    pub fn next_unique(&mut self) -> u32 {
        let seq = LittleEndian::read_u32(&self.buf[HDR_UNIQUE_SEQ..]) + 1;
        LittleEndian::write_u32(&mut self.buf[HDR_UNIQUE_SEQ..], seq);
        seq
    }

    pub fn vol_no(&self) -> VolNo {
        LittleEndian::read_i16(&self.buf[HDR_VOL_NO..])
    }

    fn slot_pos(&self, index: usize) -> usize {
        PAGE_SIZE - (index + 1) * SLOT_SIZE
    }

    pub fn slot(&self, index: usize) -> Result<(i16, u32), PageError> {
        if index >= self.n_slots() {
            return Err(PageError::Corrupt(format!(
                "slot index {index} out of bounds (n_slots={})",
                self.n_slots()
            )));
        }
        let pos = self.slot_pos(index);
        Ok((
            LittleEndian::read_i16(&self.buf[pos..]),
            LittleEndian::read_u32(&self.buf[pos + 4..]),
        ))
    }

    pub fn set_slot(&mut self, index: usize, offset: i16, unique: u32) -> Result<(), PageError> {
        if index >= self.n_slots() {
            return Err(PageError::Corrupt(format!(
                "slot index {index} out of bounds (n_slots={})",
                self.n_slots()
            )));
        }
        let pos = self.slot_pos(index);
        LittleEndian::write_i16(&mut self.buf[pos..], offset);
        LittleEndian::write_u32(&mut self.buf[pos + 4..], unique);
        Ok(())
    }

    /// Open slot `index`, shifting later slots one position toward the
    /// page interior. Fails with `Full` if the slot array would collide
    /// with the free region.
    pub fn insert_slot(&mut self, index: usize, offset: i16, unique: u32) -> Result<(), PageError> {
        let n_slots = self.n_slots();
        if index > n_slots {
            return Err(PageError::Corrupt(format!(
                "slot insert at {index} with n_slots={n_slots}"
            )));
        }
        if self.free() + (n_slots + 1) * SLOT_SIZE > DATA_CAPACITY {
            return Err(PageError::Full);
        }
        for j in (index..n_slots).rev() {
            let src = self.slot_pos(j);
            let dst = self.slot_pos(j + 1);
            self.buf.copy_within(src..src + SLOT_SIZE, dst);
        }
        self.set_n_slots(n_slots + 1);
        self.set_slot(index, offset, unique)
    }

    /// Close slot `index`, shifting later slots one position toward the
    /// page tail.
    pub fn remove_slot(&mut self, index: usize) -> Result<(), PageError> {
        let n_slots = self.n_slots();
        if index >= n_slots {
            return Err(PageError::Corrupt(format!(
                "slot remove at {index} with n_slots={n_slots}"
            )));
        }
        for j in index + 1..n_slots {
            let src = self.slot_pos(j);
            let dst = self.slot_pos(j - 1);
            self.buf.copy_within(src..src + SLOT_SIZE, dst);
        }
        self.set_n_slots(n_slots - 1);
        Ok(())
    }

    /// Borrow `len` bytes of the data area starting at `offset`.
    pub fn data(&self, offset: usize, len: usize) -> Result<&[u8], PageError> {
        if offset + len > DATA_CAPACITY {
            return Err(PageError::Corrupt(format!(
                "data range {offset}..{} out of bounds",
                offset + len
            )));
        }
        Ok(&self.buf[HEADER_SIZE + offset..HEADER_SIZE + offset + len])
    }

    pub fn data_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], PageError> {
        if offset + len > DATA_CAPACITY {
            return Err(PageError::Corrupt(format!(
                "data range {offset}..{} out of bounds",
                offset + len
            )));
        }
        Ok(&mut self.buf[HEADER_SIZE + offset..HEADER_SIZE + offset + len])
    }

    /// Contiguous free bytes between the data area and the slot array.
    pub fn sp_cfree(&self) -> usize {
        DATA_CAPACITY - self.n_slots() * SLOT_SIZE - self.free()
    }

    /// Reclaimable free bytes, counting holes compaction would recover.
    pub fn sp_free(&self) -> usize {
        self.sp_cfree() + self.unused()
    }

    /// Repack live entries to the front of the data area in ascending slot
    /// order, placing `preserve`'s entry last so an in-progress insert can
    /// append beside it. `entry_len_of` reports the stored length of the
    /// entry starting at a given data offset.
    pub fn compact_with<F>(&mut self, preserve: Option<i16>, entry_len_of: F) -> Result<(), PageError>
    where
        F: Fn(&SlottedPage<'_>, usize) -> Result<usize, PageError>,
    {
        let n_slots = self.n_slots();
        let mut live: Vec<(usize, usize, usize)> = Vec::with_capacity(n_slots);
        let mut preserved: Option<(usize, usize, usize)> = None;
        for i in 0..n_slots {
            let (offset, _) = self.slot(i)?;
            if offset == EMPTY_SLOT {
                continue;
            }
            let len = entry_len_of(&*self, offset as usize)?;
            if preserve == Some(i as i16) {
                preserved = Some((i, offset as usize, len));
            } else {
                live.push((i, offset as usize, len));
            }
        }
        if let Some(entry) = preserved {
            live.push(entry);
        }

        let mut image = vec![0u8; DATA_CAPACITY];
        let mut cursor = 0usize;
        let mut moves: Vec<(usize, usize)> = Vec::with_capacity(live.len());
        for (slot_no, offset, len) in live {
            image[cursor..cursor + len].copy_from_slice(self.data(offset, len)?);
            moves.push((slot_no, cursor));
            cursor += len;
        }

        self.buf[HEADER_SIZE..HEADER_SIZE + cursor].copy_from_slice(&image[..cursor]);
        for (slot_no, new_offset) in moves {
            let (_, unique) = self.slot(slot_no)?;
            self.set_slot(slot_no, new_offset as i16, unique)?;
        }
        self.set_free(cursor);
        self.set_unused(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(buf: &mut [u8]) -> SlottedPage<'_> {
        SlottedPage::init(buf, PageId::new(1, 9), 5, PageFlags::SLOTTED).unwrap()
    }

    // Test entries are self-describing: a u16 length prefix then payload.
    fn push_entry(page: &mut SlottedPage<'_>, payload: &[u8]) -> usize {
        let len = 2 + payload.len();
        let offset = page.free();
        let data = page.data_mut(offset, len).unwrap();
        LittleEndian::write_u16(data, len as u16);
        data[2..].copy_from_slice(payload);
        let n = page.n_slots();
        page.insert_slot(n, offset as i16, 1).unwrap();
        page.set_free(offset + len);
        n
    }

    fn entry_len(page: &SlottedPage<'_>, offset: usize) -> Result<usize, PageError> {
        Ok(LittleEndian::read_u16(page.data(offset, 2)?) as usize)
    }

    #[test]
    fn header_roundtrip() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh(&mut buf);
        assert_eq!(page.page_id(), PageId::new(1, 9));
        assert_eq!(page.fid(), 5);
        assert_eq!(page.flags(), PageFlags::SLOTTED);
        assert_eq!(page.next_page(), NIL_PAGE);
        assert_eq!(page.p0(), NIL_PAGE);
        assert_eq!(page.sp_free(), DATA_CAPACITY);

        page.set_next_page(17);
        page.set_space_prev(3);
        assert_eq!(page.next_page(), 17);
        assert_eq!(page.space_prev(), 3);
        assert_eq!(page.next_unique(), 1);
        assert_eq!(page.next_unique(), 2);
    }

    #[test]
    fn accounting_matches_the_page_equation() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh(&mut buf);
        push_entry(&mut page, &[0xAA; 10]);
        push_entry(&mut page, &[0xBB; 6]);

        // free + slots + contiguous free covers the whole data area.
        assert_eq!(
            page.free() + page.n_slots() * SLOT_SIZE + page.sp_cfree(),
            DATA_CAPACITY
        );
        assert_eq!(page.sp_free(), page.sp_cfree());
    }

    #[test]
    fn slot_insert_and_remove_shift_neighbors() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh(&mut buf);
        push_entry(&mut page, b"aa");
        push_entry(&mut page, b"bb");

        let (off_b, _) = page.slot(1).unwrap();
        page.insert_slot(1, 99, 7).unwrap();
        assert_eq!(page.n_slots(), 3);
        assert_eq!(page.slot(1).unwrap(), (99, 7));
        assert_eq!(page.slot(2).unwrap().0, off_b);

        page.remove_slot(1).unwrap();
        assert_eq!(page.n_slots(), 2);
        assert_eq!(page.slot(1).unwrap().0, off_b);
    }

    #[test]
    fn compaction_squeezes_holes_and_is_idempotent() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh(&mut buf);
        push_entry(&mut page, &[0xAA; 10]);
        let b = push_entry(&mut page, &[0xBB; 14]);
        push_entry(&mut page, &[0xCC; 10]);

        // Kill the middle entry the way the object manager does.
        let len_b = entry_len(&page, page.slot(b).unwrap().0 as usize).unwrap();
        page.set_slot(b, EMPTY_SLOT, 0).unwrap();
        page.set_unused(page.unused() + len_b);

        let free_before = page.sp_free();
        page.compact_with(None, entry_len).unwrap();
        assert_eq!(page.unused(), 0);
        assert_eq!(page.sp_free(), free_before);
        assert_eq!(page.sp_cfree(), page.sp_free());

        let (off_a, _) = page.slot(0).unwrap();
        let (off_c, _) = page.slot(2).unwrap();
        assert_eq!(off_a, 0);
        assert!(off_c > off_a);
        assert_eq!(page.data(off_c as usize + 2, 10).unwrap(), &[0xCC; 10]);

        let snapshot = page.free();
        page.compact_with(None, entry_len).unwrap();
        assert_eq!(page.free(), snapshot);
    }

    #[test]
    fn compaction_places_the_preserved_slot_last() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = fresh(&mut buf);
        let a = push_entry(&mut page, &[0xAA; 10]);
        push_entry(&mut page, &[0xBB; 10]);

        page.compact_with(Some(a as i16), entry_len).unwrap();
        let (off_a, _) = page.slot(0).unwrap();
        let (off_b, _) = page.slot(1).unwrap();
        assert!(off_a > off_b, "preserved entry should move to the end");
        assert_eq!(page.data(off_a as usize + 2, 10).unwrap(), &[0xAA; 10]);
    }
}
