//! Sequential scan over a file's records in page order, then slot order.

use crate::core::errors::EngineError;
use crate::core::{ObjectId, PageId, PageNo, NIL_PAGE};
use crate::engine::Engine;
use crate::storage::buffer::BufKind;
use crate::storage::catalog::{self, DataCatEntry};
use crate::storage::page::{SlottedPage, EMPTY_SLOT};

use super::{read_object_header, ObjectHeader};

impl Engine {
    /// The record after `cur` in file order, or the file's first record
    /// when `cur` is `None`. `None` result means end of scan.
    pub fn next_object(
        &mut self,
        cat: &ObjectId,
        cur: Option<&ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>, EngineError> {
        let (cat_pin, entry) = catalog::read_data_entry(self, cat)?;
        let result = self.scan_forward(&entry, cur);
        let freed = self.free_train(cat_pin);
        let out = result?;
        freed?;
        Ok(out)
    }

    /// The record before `cur`, or the file's last record when `cur` is
    /// `None`.
    pub fn prev_object(
        &mut self,
        cat: &ObjectId,
        cur: Option<&ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>, EngineError> {
        let (cat_pin, entry) = catalog::read_data_entry(self, cat)?;
        let result = self.scan_backward(&entry, cur);
        let freed = self.free_train(cat_pin);
        let out = result?;
        freed?;
        Ok(out)
    }

    fn scan_forward(
        &mut self,
        entry: &DataCatEntry,
        cur: Option<&ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>, EngineError> {
        let vol = self.vol_no();
        let (mut page_no, mut start) = match cur {
            None => (entry.first_page, 0usize),
            Some(oid) => (oid.page_no, oid.slot_no as usize + 1),
        };

        while page_no != NIL_PAGE {
            let mut pin = self.get_train(PageId::new(vol, page_no), BufKind::Page)?;
            let mut next_no: PageNo = NIL_PAGE;
            let found = (|| {
                let view = SlottedPage::open(pin.bytes_mut())?;
                next_no = view.next_page();
                for i in start..view.n_slots() {
                    let (offset, unique) = view.slot(i)?;
                    if offset == EMPTY_SLOT {
                        continue;
                    }
                    let header = read_object_header(&view, offset as usize)?;
                    return Ok(Some((
                        ObjectId::new(vol, page_no, i as i16, unique),
                        header,
                    )));
                }
                Ok(None)
            })();
            match found {
                Err(e) => {
                    let _ = self.free_train(pin);
                    return Err(e);
                }
                Ok(Some(hit)) => {
                    self.free_train(pin)?;
                    return Ok(Some(hit));
                }
                Ok(None) => {
                    self.free_train(pin)?;
                    page_no = next_no;
                    start = 0;
                }
            }
        }
        Ok(None)
    }

    fn scan_backward(
        &mut self,
        entry: &DataCatEntry,
        cur: Option<&ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>, EngineError> {
        let vol = self.vol_no();
        // `None` start means "from the page's top slot".
        let (mut page_no, mut start): (PageNo, Option<i32>) = match cur {
            None => (entry.last_page, None),
            Some(oid) => (oid.page_no, Some(oid.slot_no as i32 - 1)),
        };

        while page_no != NIL_PAGE {
            let mut pin = self.get_train(PageId::new(vol, page_no), BufKind::Page)?;
            let mut prev_no: PageNo = NIL_PAGE;
            let found = (|| {
                let view = SlottedPage::open(pin.bytes_mut())?;
                prev_no = view.prev_page();
                let top = start.unwrap_or(view.n_slots() as i32 - 1);
                let mut i = top.min(view.n_slots() as i32 - 1);
                while i >= 0 {
                    let (offset, unique) = view.slot(i as usize)?;
                    if offset != EMPTY_SLOT {
                        let header = read_object_header(&view, offset as usize)?;
                        return Ok(Some((
                            ObjectId::new(vol, page_no, i as i16, unique),
                            header,
                        )));
                    }
                    i -= 1;
                }
                Ok(None)
            })();
            match found {
                Err(e) => {
                    let _ = self.free_train(pin);
                    return Err(e);
                }
                Ok(Some(hit)) => {
                    self.free_train(pin)?;
                    return Ok(Some(hit));
                }
                Ok(None) => {
                    self.free_train(pin)?;
                    page_no = prev_no;
                    start = None;
                }
            }
        }
        Ok(None)
    }
}
