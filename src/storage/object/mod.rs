//! Object manager: variable-length records in slotted pages, with file-wide
//! available-space lists and sequential scan.

pub(crate) mod avail;
mod scan;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::core::errors::{EngineError, ObjectError, PageError};
use crate::core::{aligned_length, ObjectId, PageId};
use crate::engine::Engine;
use crate::storage::buffer::{BufKind, PinnedTrain};
use crate::storage::catalog::{self, DataCatEntry};
use crate::storage::dealloc::{DeallocKind, DeallocList};
use crate::storage::page::{
    PageFlags, SlottedPage, DATA_CAPACITY, EMPTY_SLOT, SLOT_SIZE,
};

pub const OBJECT_HEADER_SIZE: usize = 8;

/// Largest aligned record that fits a single page; anything bigger would
/// need train-backed large-object storage, which this engine rejects.
pub const LARGE_OBJECT_THRESHOLD: usize = DATA_CAPACITY - OBJECT_HEADER_SIZE - SLOT_SIZE;

/// In-page record header preceding the data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub properties: u32,
    pub tag: i16,
    pub length: u16,
}

pub(crate) fn read_object_header(
    view: &SlottedPage<'_>,
    offset: usize,
) -> Result<ObjectHeader, PageError> {
    let buf = view.data(offset, OBJECT_HEADER_SIZE)?;
    Ok(ObjectHeader {
        properties: LittleEndian::read_u32(&buf[0..]),
        tag: LittleEndian::read_i16(&buf[4..]),
        length: LittleEndian::read_u16(&buf[6..]),
    })
}

fn write_object_header(
    view: &mut SlottedPage<'_>,
    offset: usize,
    header: ObjectHeader,
) -> Result<(), PageError> {
    let buf = view.data_mut(offset, OBJECT_HEADER_SIZE)?;
    LittleEndian::write_u32(&mut buf[0..], header.properties);
    LittleEndian::write_i16(&mut buf[4..], header.tag);
    LittleEndian::write_u16(&mut buf[6..], header.length);
    Ok(())
}

/// Stored length of the object entry starting at `offset`; the shape
/// compaction needs.
pub(crate) fn object_entry_len(
    view: &SlottedPage<'_>,
    offset: usize,
) -> Result<usize, PageError> {
    let header = read_object_header(view, offset)?;
    Ok(OBJECT_HEADER_SIZE + aligned_length(header.length as usize))
}

/// Find `oid`'s live entry in the page; offset of its header plus the
/// decoded header.
pub(crate) fn locate_object(
    view: &SlottedPage<'_>,
    oid: &ObjectId,
) -> Result<(usize, ObjectHeader), EngineError> {
    let slot_no = oid.slot_no as usize;
    if oid.slot_no < 0 || slot_no >= view.n_slots() {
        return Err(ObjectError::NoSuchObject(*oid).into());
    }
    let (offset, unique) = view.slot(slot_no)?;
    if offset == EMPTY_SLOT || unique != oid.unique {
        return Err(ObjectError::NoSuchObject(*oid).into());
    }
    let header = read_object_header(view, offset as usize)?;
    Ok((offset as usize, header))
}

/// Reclaimable bytes of the pinned page, without holding a view across
/// buffer calls.
fn page_sp_free(pin: &mut PinnedTrain) -> Result<usize, PageError> {
    let view = SlottedPage::open(pin.bytes_mut())?;
    Ok(view.sp_free())
}

/// Place a record in the page: reuse the first empty slot or append a new
/// one, stamp a fresh unique, copy header and data at the free cursor.
/// The caller has already compacted if the contiguous region was short.
pub(crate) fn insert_object_into_page(
    view: &mut SlottedPage<'_>,
    tag: i16,
    data: &[u8],
) -> Result<(i16, u32), PageError> {
    let aligned = aligned_length(data.len());
    let body = OBJECT_HEADER_SIZE + aligned;

    let n_slots = view.n_slots();
    let mut reuse = None;
    for i in 0..n_slots {
        if view.slot(i)?.0 == EMPTY_SLOT {
            reuse = Some(i);
            break;
        }
    }
    let need = body + if reuse.is_none() { SLOT_SIZE } else { 0 };
    if view.sp_cfree() < need {
        return Err(PageError::Full);
    }

    let offset = view.free();
    let unique = view.next_unique();
    write_object_header(
        view,
        offset,
        ObjectHeader {
            properties: 0,
            tag,
            length: data.len() as u16,
        },
    )?;
    view.data_mut(offset + OBJECT_HEADER_SIZE, data.len())?
        .copy_from_slice(data);
    view.set_free(offset + body);

    let slot_no = match reuse {
        Some(i) => {
            view.set_slot(i, offset as i16, unique)?;
            i
        }
        None => {
            view.insert_slot(n_slots, offset as i16, unique)?;
            n_slots
        }
    };
    Ok((slot_no as i16, unique))
}

impl Engine {
    /// Store a new record in the file owned by catalog object `cat`,
    /// near `near` when given. Returns the new record's id.
    pub fn create_object(
        &mut self,
        cat: &ObjectId,
        near: Option<&ObjectId>,
        tag: i16,
        data: &[u8],
    ) -> Result<ObjectId, EngineError> {
        let aligned = aligned_length(data.len());
        if aligned > LARGE_OBJECT_THRESHOLD {
            return Err(ObjectError::TooLarge(aligned).into());
        }

        let (mut cat_pin, mut entry) = catalog::read_data_entry(self, cat)?;
        let result = self
            .create_in_file(&mut entry, near, tag, data)
            .and_then(|oid| {
                catalog::write_data_entry(&mut cat_pin, cat, &entry)?;
                Ok(oid)
            });
        match result {
            Ok(oid) => {
                self.release(cat_pin, true)?;
                Ok(oid)
            }
            Err(e) => {
                let _ = self.release(cat_pin, false);
                Err(e)
            }
        }
    }

    fn create_in_file(
        &mut self,
        cat_entry: &mut DataCatEntry,
        near: Option<&ObjectId>,
        tag: i16,
        data: &[u8],
    ) -> Result<ObjectId, EngineError> {
        let vol = self.vol_no();
        let need = OBJECT_HEADER_SIZE + aligned_length(data.len()) + SLOT_SIZE;
        let mut pin = self.select_target_page(cat_entry, near, need)?;
        let result = (|| {
            let (slot_no, unique, page_no) = {
                let mut view = SlottedPage::open(pin.bytes_mut())?;
                if view.sp_cfree() < need {
                    view.compact_with(None, object_entry_len)?;
                }
                let (slot_no, unique) = insert_object_into_page(&mut view, tag, data)?;
                (slot_no, unique, view.page_id().page_no)
            };
            avail::insert_into_avail(self, cat_entry, &mut pin)?;
            Ok(ObjectId::new(vol, page_no, slot_no, unique))
        })();
        match result {
            Ok(oid) => {
                self.release(pin, true)?;
                debug!("created object {oid} ({} bytes)", data.len());
                Ok(oid)
            }
            Err(e) => {
                let _ = self.release(pin, false);
                Err(e)
            }
        }
    }

    /// Pick the page the new record goes to, pinned and already unlinked
    /// from its available-space list.
    fn select_target_page(
        &mut self,
        cat: &mut DataCatEntry,
        near: Option<&ObjectId>,
        need: usize,
    ) -> Result<PinnedTrain, EngineError> {
        let vol = self.vol_no();

        if let Some(near_oid) = near {
            let near_pid = near_oid.page_id();
            let mut pin = self.get_train(near_pid, BufKind::Page)?;
            let fits = match page_sp_free(&mut pin) {
                Ok(sp_free) => sp_free >= need,
                Err(e) => {
                    let _ = self.release(pin, false);
                    return Err(e.into());
                }
            };
            if fits {
                if let Err(e) = avail::remove_from_avail(self, cat, &mut pin) {
                    let _ = self.release(pin, false);
                    return Err(e);
                }
                return Ok(pin);
            }

            // No room beside the near object: splice a fresh page in right
            // after its page.
            let new_no = match self.alloc_page_near(Some(near_pid.page_no)) {
                Ok(n) => n,
                Err(e) => {
                    let _ = self.release(pin, false);
                    return Err(e);
                }
            };
            let new_pid = PageId::new(vol, new_no);
            let mut new_pin = match self.get_new_train(new_pid, BufKind::Page) {
                Ok(p) => p,
                Err(e) => {
                    let _ = self.release(pin, false);
                    return Err(e);
                }
            };
            let inited =
                SlottedPage::init(new_pin.bytes_mut(), new_pid, cat.fid, PageFlags::SLOTTED)
                    .map(|_| ());
            let spliced = match inited {
                Ok(()) => avail::file_map_add_after(self, cat, &mut pin, &mut new_pin),
                Err(e) => Err(e.into()),
            };
            return match spliced {
                Ok(()) => match self.release(pin, true) {
                    Ok(()) => Ok(new_pin),
                    Err(e) => {
                        let _ = self.release(new_pin, false);
                        Err(e)
                    }
                },
                Err(e) => {
                    let _ = self.release(pin, false);
                    let _ = self.release(new_pin, false);
                    Err(e)
                }
            };
        }

        // No near hint: first page of the smallest suitable band.
        if let Some(head_no) = avail::pick_list_head(cat, need) {
            let mut pin = self.get_train(PageId::new(vol, head_no), BufKind::Page)?;
            return match avail::remove_from_avail(self, cat, &mut pin) {
                Ok(()) => Ok(pin),
                Err(e) => {
                    let _ = self.release(pin, false);
                    Err(e)
                }
            };
        }

        // Then the file's last page, if it fits.
        let last_pid = PageId::new(vol, cat.last_page);
        let mut pin = self.get_train(last_pid, BufKind::Page)?;
        let fits = match page_sp_free(&mut pin) {
            Ok(sp_free) => sp_free >= need,
            Err(e) => {
                let _ = self.release(pin, false);
                return Err(e.into());
            }
        };
        if fits {
            return match avail::remove_from_avail(self, cat, &mut pin) {
                Ok(()) => Ok(pin),
                Err(e) => {
                    let _ = self.release(pin, false);
                    Err(e)
                }
            };
        }
        self.free_train(pin)?;

        // Finally grow the file at its tail.
        let new_no = self.alloc_page_near(Some(cat.last_page))?;
        let new_pid = PageId::new(vol, new_no);
        let mut new_pin = self.get_new_train(new_pid, BufKind::Page)?;
        let inited = SlottedPage::init(new_pin.bytes_mut(), new_pid, cat.fid, PageFlags::SLOTTED)
            .map(|_| ());
        let appended = match inited {
            Ok(()) => avail::file_map_append(self, cat, &mut new_pin),
            Err(e) => Err(e.into()),
        };
        match appended {
            Ok(()) => Ok(new_pin),
            Err(e) => {
                let _ = self.release(new_pin, false);
                Err(e)
            }
        }
    }

    /// Remove a record. A page emptied by the removal (other than the
    /// file's first page) leaves the file list and is queued on `dl`.
    pub fn destroy_object(
        &mut self,
        cat: &ObjectId,
        oid: &ObjectId,
        dl: &mut DeallocList,
    ) -> Result<(), EngineError> {
        let (mut cat_pin, mut entry) = catalog::read_data_entry(self, cat)?;
        let result = self
            .destroy_in_file(&mut entry, oid, dl)
            .and_then(|()| catalog::write_data_entry(&mut cat_pin, cat, &entry));
        match result {
            Ok(()) => self.release(cat_pin, true),
            Err(e) => {
                let _ = self.release(cat_pin, false);
                Err(e)
            }
        }
    }

    fn destroy_in_file(
        &mut self,
        cat_entry: &mut DataCatEntry,
        oid: &ObjectId,
        dl: &mut DeallocList,
    ) -> Result<(), EngineError> {
        let mut pin = self.get_train(oid.page_id(), BufKind::Page)?;
        let result = (|| {
            avail::remove_from_avail(self, cat_entry, &mut pin)?;
            let emptied = {
                let mut view = SlottedPage::open(pin.bytes_mut())?;
                let (offset, header) = locate_object(&view, oid)?;
                let size = OBJECT_HEADER_SIZE + aligned_length(header.length as usize);
                let slot_no = oid.slot_no as usize;

                view.set_slot(slot_no, EMPTY_SLOT, 0)?;
                if slot_no == view.n_slots() - 1 {
                    view.set_n_slots(view.n_slots() - 1);
                }
                // Reclaim in place when the entry sat at the free cursor;
                // otherwise the hole waits for compaction.
                if offset + size == view.free() {
                    view.set_free(view.free() - size);
                } else {
                    view.set_unused(view.unused() + size);
                }
                view.n_slots() == 0
            };

            if emptied && oid.page_no != cat_entry.first_page {
                avail::file_map_remove(self, cat_entry, &mut pin)?;
                dl.prepend(DeallocKind::Page, oid.page_id());
                debug!("page {} emptied, queued for dealloc", oid.page_id());
            } else {
                avail::insert_into_avail(self, cat_entry, &mut pin)?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => self.release(pin, true),
            Err(e) => {
                let _ = self.release(pin, false);
                Err(e)
            }
        }
    }

    /// Read `length` bytes of the record starting at byte `start`;
    /// `None` reads to the end.
    pub fn read_object(
        &mut self,
        oid: &ObjectId,
        start: usize,
        length: Option<usize>,
    ) -> Result<Vec<u8>, EngineError> {
        let mut pin = self.get_train(oid.page_id(), BufKind::Page)?;
        let result: Result<Vec<u8>, EngineError> = (|| {
            let view = SlottedPage::open(pin.bytes_mut())?;
            let (offset, header) = locate_object(&view, oid)?;
            let len = header.length as usize;
            let wanted = length.unwrap_or_else(|| len.saturating_sub(start));
            if start + wanted > len {
                return Err(ObjectError::BadReadRange {
                    start,
                    end: start + wanted,
                    len,
                }
                .into());
            }
            Ok(view
                .data(offset + OBJECT_HEADER_SIZE + start, wanted)?
                .to_vec())
        })();
        let freed = self.free_train(pin);
        let bytes = result?;
        freed?;
        Ok(bytes)
    }

    /// Decode a record's header without its data.
    pub fn object_header(&mut self, oid: &ObjectId) -> Result<ObjectHeader, EngineError> {
        let mut pin = self.get_train(oid.page_id(), BufKind::Page)?;
        let result: Result<ObjectHeader, EngineError> = (|| {
            let view = SlottedPage::open(pin.bytes_mut())?;
            let (_, header) = locate_object(&view, oid)?;
            Ok(header)
        })();
        let freed = self.free_train(pin);
        let header = result?;
        freed?;
        Ok(header)
    }
}
