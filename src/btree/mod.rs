//! B+ tree manager: a persistent unique-key index over slotted pages,
//! with recursive split/underflow propagation, a stable root page, and
//! leaf-chained range scans.

pub mod key;

mod cursor;
mod delete;
mod insert;
mod page;
mod root;
mod search;
mod split;

pub use cursor::{CompOp, Cursor, CursorFlag};

use log::debug;

use crate::core::errors::EngineError;
use crate::core::{FileId, ObjectId, PageId, PageNo, NIL_PAGE};
use crate::engine::Engine;
use crate::storage::buffer::BufKind;
use crate::storage::catalog;
use crate::storage::dealloc::{DeallocKind, DeallocList};
use crate::storage::page::{PageFlags, SlottedPage};

use key::{KeyDesc, KeyValue};
use page::{InternalPage, LeafPage};

/// Separator propagated upward by a split: the new sibling's page number
/// and its discriminating key.
#[derive(Debug, Clone)]
pub(crate) struct InternalItem {
    pub spid: PageNo,
    pub key: Vec<u8>,
}

impl Engine {
    /// Allocate and initialize the index's root page (an empty leaf) and
    /// record it in the catalog. The returned page id stays the root for
    /// the index's whole lifetime.
    pub fn create_index(&mut self, cat: &ObjectId) -> Result<PageId, EngineError> {
        let (mut cat_pin, mut entry) = catalog::read_btree_entry(self, cat)?;
        let result = (|| {
            let near = if entry.first_page == NIL_PAGE {
                None
            } else {
                Some(entry.first_page)
            };
            let root_no = self.alloc_page_near(near)?;
            let root_pid = PageId::new(self.vol_no(), root_no);
            let mut pin = self.get_new_train(root_pid, BufKind::Page)?;
            let inited = LeafPage::init(pin.bytes_mut(), root_pid, entry.fid, true).map(|_| ());
            match inited {
                Ok(()) => self.release(pin, true)?,
                Err(e) => {
                    let _ = self.release(pin, false);
                    return Err(e.into());
                }
            }
            entry.root_page = root_no;
            if entry.first_page == NIL_PAGE {
                entry.first_page = root_no;
            }
            catalog::write_btree_entry(&mut cat_pin, cat, &entry)?;
            debug!("created index rooted at {root_pid}");
            Ok(root_pid)
        })();
        match result {
            Ok(pid) => {
                self.release(cat_pin, true)?;
                Ok(pid)
            }
            Err(e) => {
                let _ = self.release(cat_pin, false);
                Err(e)
            }
        }
    }

    /// Walk the whole index depth-first, queueing every page on `dl`, and
    /// clear the catalog root.
    pub fn drop_index(&mut self, cat: &ObjectId, dl: &mut DeallocList) -> Result<(), EngineError> {
        let (mut cat_pin, mut entry) = catalog::read_btree_entry(self, cat)?;
        let result = (|| {
            if entry.root_page != NIL_PAGE {
                let root_pid = PageId::new(self.vol_no(), entry.root_page);
                free_pages(self, root_pid, dl)?;
                entry.root_page = NIL_PAGE;
                catalog::write_btree_entry(&mut cat_pin, cat, &entry)?;
                debug!("dropped index rooted at {root_pid}");
            }
            Ok(())
        })();
        match result {
            Ok(()) => self.release(cat_pin, true),
            Err(e) => {
                let _ = self.release(cat_pin, false);
                Err(e)
            }
        }
    }

    /// Insert `key -> oid` into the index rooted at `root`.
    pub fn insert_object(
        &mut self,
        cat: &ObjectId,
        root: PageId,
        kdesc: &KeyDesc,
        key: &KeyValue,
        oid: ObjectId,
    ) -> Result<(), EngineError> {
        kdesc.validate()?;
        key.validate()?;
        let fid = self.index_fid(cat)?;
        if let Some(item) = insert::insert_rec(self, fid, root, kdesc, key.as_bytes(), oid)? {
            root::root_insert(self, fid, root, &item)?;
        }
        Ok(())
    }

    /// Remove `key -> oid` from the index rooted at `root`. Pages freed
    /// by merges or a root collapse land on `dl`.
    pub fn delete_object(
        &mut self,
        cat: &ObjectId,
        root: PageId,
        kdesc: &KeyDesc,
        key: &KeyValue,
        oid: &ObjectId,
        dl: &mut DeallocList,
    ) -> Result<(), EngineError> {
        kdesc.validate()?;
        key.validate()?;
        let fid = self.index_fid(cat)?;
        let status = delete::delete_rec(self, fid, root, kdesc, key.as_bytes(), oid, dl)?;
        if let Some(item) = status.item {
            root::root_insert(self, fid, root, &item)?;
        } else if status.underflow {
            root::root_collapse(self, root, dl)?;
        }
        Ok(())
    }

    fn index_fid(&mut self, cat: &ObjectId) -> Result<FileId, EngineError> {
        let (pin, entry) = catalog::read_btree_entry(self, cat)?;
        self.free_train(pin)?;
        Ok(entry.fid)
    }
}

/// Depth-first walk over the index, children before their parent, every
/// visited page prepended to the dealloc list (so the root ends up at the
/// head).
fn free_pages(engine: &mut Engine, pid: PageId, dl: &mut DeallocList) -> Result<(), EngineError> {
    let mut children: Vec<PageNo> = Vec::new();
    let mut pin = engine.get_train(pid, BufKind::Page)?;
    let gathered = (|| {
        let is_internal = {
            let view = SlottedPage::open(pin.bytes_mut())?;
            view.flags().contains(PageFlags::INTERNAL)
        };
        if is_internal {
            let page = InternalPage::open(pin.bytes_mut())?;
            children.push(page.p0());
            for i in 0..page.n_entries() {
                children.push(page.child_at(i)?);
            }
        }
        Ok::<(), EngineError>(())
    })();
    let freed = engine.free_train(pin);
    gathered?;
    freed?;

    for child in children {
        free_pages(engine, PageId::new(pid.vol_no, child), dl)?;
    }
    dl.prepend(DeallocKind::Page, pid);
    Ok(())
}
