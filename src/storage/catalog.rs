//! Catalog entries: packed overlays stored as ordinary objects inside the
//! catalog page, plus the minimal file-creation bootstrap the engine needs
//! to be usable on its own.

use byteorder::{ByteOrder, LittleEndian};

use crate::core::errors::{EngineError, ObjectError, PageError};
use crate::core::{aligned_length, FileId, ObjectId, PageId, PageNo, NIL_PAGE};
use crate::engine::Engine;
use crate::storage::buffer::{BufKind, PinnedTrain};
use crate::storage::object::{
    insert_object_into_page, object_entry_len, read_object_header, OBJECT_HEADER_SIZE,
};
use crate::storage::page::{PageFlags, SlottedPage, EMPTY_SLOT, SLOT_SIZE};

/// File id of the catalog itself.
pub const CATALOG_FID: FileId = 0;

/// Number of available-space list bands.
pub const AVAIL_BANDS: usize = 5;

/// Catalog overlay for a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataCatEntry {
    pub fid: FileId,
    pub first_page: PageNo,
    pub last_page: PageNo,
    /// Heads of the 10/20/30/40/50% available-space lists.
    pub avail: [PageNo; AVAIL_BANDS],
    /// Extent fill factor, carried but not interpreted by the allocator.
    pub eff: i16,
}

impl DataCatEntry {
    pub const LEN: usize = 36;

    pub fn pack(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        LittleEndian::write_i32(&mut out[0..], self.fid);
        LittleEndian::write_i32(&mut out[4..], self.first_page);
        LittleEndian::write_i32(&mut out[8..], self.last_page);
        for (i, head) in self.avail.iter().enumerate() {
            LittleEndian::write_i32(&mut out[12 + 4 * i..], *head);
        }
        LittleEndian::write_i16(&mut out[32..], self.eff);
        out
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, PageError> {
        if buf.len() < Self::LEN {
            return Err(PageError::Corrupt(format!(
                "data catalog entry of {} bytes",
                buf.len()
            )));
        }
        let mut avail = [NIL_PAGE; AVAIL_BANDS];
        for (i, head) in avail.iter_mut().enumerate() {
            *head = LittleEndian::read_i32(&buf[12 + 4 * i..]);
        }
        Ok(Self {
            fid: LittleEndian::read_i32(&buf[0..]),
            first_page: LittleEndian::read_i32(&buf[4..]),
            last_page: LittleEndian::read_i32(&buf[8..]),
            avail,
            eff: LittleEndian::read_i16(&buf[32..]),
        })
    }
}

/// Catalog overlay for a B+ tree file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtreeCatEntry {
    pub fid: FileId,
    pub first_page: PageNo,
    pub root_page: PageNo,
}

impl BtreeCatEntry {
    pub const LEN: usize = 12;

    pub fn pack(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        LittleEndian::write_i32(&mut out[0..], self.fid);
        LittleEndian::write_i32(&mut out[4..], self.first_page);
        LittleEndian::write_i32(&mut out[8..], self.root_page);
        out
    }

    pub fn unpack(buf: &[u8]) -> Result<Self, PageError> {
        if buf.len() < Self::LEN {
            return Err(PageError::Corrupt(format!(
                "btree catalog entry of {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            fid: LittleEndian::read_i32(&buf[0..]),
            first_page: LittleEndian::read_i32(&buf[4..]),
            root_page: LittleEndian::read_i32(&buf[8..]),
        })
    }
}

/// Locate the data bytes of the catalog object `cat` inside its page.
fn locate(view: &SlottedPage<'_>, cat: &ObjectId) -> Result<(usize, usize), EngineError> {
    let slot_no = cat.slot_no as usize;
    if cat.slot_no < 0 || slot_no >= view.n_slots() {
        return Err(ObjectError::BadCatalogObject(*cat).into());
    }
    let (offset, unique) = view.slot(slot_no)?;
    if offset == EMPTY_SLOT || unique != cat.unique {
        return Err(ObjectError::BadCatalogObject(*cat).into());
    }
    let header = read_object_header(view, offset as usize)?;
    Ok((offset as usize + OBJECT_HEADER_SIZE, header.length as usize))
}

/// Pin the catalog page and decode `cat` as a data-file entry. The caller
/// owns the returned pin and must release it on every path.
pub(crate) fn read_data_entry(
    engine: &mut Engine,
    cat: &ObjectId,
) -> Result<(PinnedTrain, DataCatEntry), EngineError> {
    let mut pin = engine.get_train(cat.page_id(), BufKind::Page)?;
    let decoded = (|| {
        let view = SlottedPage::open(pin.bytes_mut())?;
        let (offset, len) = locate(&view, cat)?;
        if len < DataCatEntry::LEN {
            return Err(ObjectError::BadCatalogObject(*cat).into());
        }
        Ok(DataCatEntry::unpack(view.data(offset, len)?)?)
    })();
    match decoded {
        Ok(entry) => Ok((pin, entry)),
        Err(e) => {
            let _ = engine.free_train(pin);
            Err(e)
        }
    }
}

/// Re-encode a data-file entry into the pinned catalog page. The caller
/// still has to publish the pin.
pub(crate) fn write_data_entry(
    pin: &mut PinnedTrain,
    cat: &ObjectId,
    entry: &DataCatEntry,
) -> Result<(), EngineError> {
    let mut view = SlottedPage::open(pin.bytes_mut())?;
    let (offset, len) = locate(&view, cat)?;
    if len < DataCatEntry::LEN {
        return Err(ObjectError::BadCatalogObject(*cat).into());
    }
    view.data_mut(offset, DataCatEntry::LEN)?
        .copy_from_slice(&entry.pack());
    Ok(())
}

pub(crate) fn read_btree_entry(
    engine: &mut Engine,
    cat: &ObjectId,
) -> Result<(PinnedTrain, BtreeCatEntry), EngineError> {
    let mut pin = engine.get_train(cat.page_id(), BufKind::Page)?;
    let decoded = (|| {
        let view = SlottedPage::open(pin.bytes_mut())?;
        let (offset, len) = locate(&view, cat)?;
        if len < BtreeCatEntry::LEN {
            return Err(ObjectError::BadCatalogObject(*cat).into());
        }
        Ok(BtreeCatEntry::unpack(view.data(offset, len)?)?)
    })();
    match decoded {
        Ok(entry) => Ok((pin, entry)),
        Err(e) => {
            let _ = engine.free_train(pin);
            Err(e)
        }
    }
}

pub(crate) fn write_btree_entry(
    pin: &mut PinnedTrain,
    cat: &ObjectId,
    entry: &BtreeCatEntry,
) -> Result<(), EngineError> {
    let mut view = SlottedPage::open(pin.bytes_mut())?;
    let (offset, len) = locate(&view, cat)?;
    if len < BtreeCatEntry::LEN {
        return Err(ObjectError::BadCatalogObject(*cat).into());
    }
    view.data_mut(offset, BtreeCatEntry::LEN)?
        .copy_from_slice(&entry.pack());
    Ok(())
}

impl Engine {
    /// Create a data file: allocate and initialize its first page, then
    /// record a catalog entry for it. Returns the catalog object id that
    /// all object operations take.
    pub fn create_data_file(&mut self, fid: FileId, eff: i16) -> Result<ObjectId, EngineError> {
        let vol = self.vol_no();
        let page_no = self.alloc_page_near(None)?;
        let pid = PageId::new(vol, page_no);
        let mut pin = self.get_new_train(pid, BufKind::Page)?;
        let inited = SlottedPage::init(pin.bytes_mut(), pid, fid, PageFlags::SLOTTED).map(|_| ());
        match inited {
            Ok(()) => self.release(pin, true)?,
            Err(e) => {
                let _ = self.release(pin, false);
                return Err(e.into());
            }
        }

        let entry = DataCatEntry {
            fid,
            first_page: page_no,
            last_page: page_no,
            avail: [NIL_PAGE; AVAIL_BANDS],
            eff,
        };
        self.insert_catalog_object(&entry.pack())
    }

    /// Create a B+ tree file with no root yet; `create_index` allocates
    /// the root later.
    pub fn create_index_file(&mut self, fid: FileId) -> Result<ObjectId, EngineError> {
        let entry = BtreeCatEntry {
            fid,
            first_page: NIL_PAGE,
            root_page: NIL_PAGE,
        };
        self.insert_catalog_object(&entry.pack())
    }

    fn insert_catalog_object(&mut self, data: &[u8]) -> Result<ObjectId, EngineError> {
        let vol = self.vol_no();
        let page_no = self.catalog_page_no();
        let pid = PageId::new(vol, page_no);
        let mut pin = self.get_train(pid, BufKind::Page)?;
        let result = (|| {
            let mut view = SlottedPage::open(pin.bytes_mut())?;
            let need = OBJECT_HEADER_SIZE + aligned_length(data.len()) + SLOT_SIZE;
            if view.sp_cfree() < need {
                view.compact_with(None, object_entry_len)?;
            }
            let (slot_no, unique) = insert_object_into_page(&mut view, 0, data)?;
            Ok(ObjectId::new(vol, page_no, slot_no, unique))
        })();
        match result {
            Ok(oid) => {
                self.release(pin, true)?;
                Ok(oid)
            }
            Err(e) => {
                let _ = self.release(pin, false);
                Err(e)
            }
        }
    }
}
