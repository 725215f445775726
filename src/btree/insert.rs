//! Recursive insert. The descent pins one page per level; a child that
//! split reports the separator for its new sibling through the return
//! value, and the parent places it (possibly splitting in turn).

use crate::core::errors::{BtreeError, EngineError, PageError};
use crate::core::{FileId, ObjectId, PageId};
use crate::engine::Engine;
use crate::storage::buffer::{BufKind, PinnedTrain};
use crate::storage::page::{PageFlags, SlottedPage};

use super::key::KeyDesc;
use super::page::{InternalPage, LeafPage};
use super::search;
use super::split;
use super::InternalItem;

/// Insert `key -> oid` into the subtree rooted at `pid`. `Some` means this
/// page split and the caller must place the returned separator.
pub(crate) fn insert_rec(
    engine: &mut Engine,
    fid: FileId,
    pid: PageId,
    kdesc: &KeyDesc,
    key: &[u8],
    oid: ObjectId,
) -> Result<Option<InternalItem>, EngineError> {
    let mut pin = engine.get_train(pid, BufKind::Page)?;
    let result = (|| {
        let flags = {
            let view = SlottedPage::open(pin.bytes_mut())?;
            view.flags()
        };
        if flags.contains(PageFlags::INTERNAL) {
            let child_no = {
                let page = InternalPage::open(pin.bytes_mut())?;
                let (_, idx) = search::search_internal(&page, kdesc, key)?;
                if idx < 0 {
                    page.p0()
                } else {
                    page.child_at(idx as usize)?
                }
            };
            let child_item = insert_rec(
                engine,
                fid,
                PageId::new(pid.vol_no, child_no),
                kdesc,
                key,
                oid,
            )?;
            match child_item {
                Some(item) => {
                    let idx = {
                        let page = InternalPage::open(pin.bytes_mut())?;
                        search::search_internal(&page, kdesc, &item.key)?.1
                    };
                    insert_internal(engine, fid, &mut pin, idx, &item)
                }
                None => Ok(None),
            }
        } else if flags.contains(PageFlags::LEAF) {
            insert_leaf(engine, fid, &mut pin, kdesc, key, oid)
        } else {
            Err(BtreeError::BadPageType(pid, "index").into())
        }
    })();
    match result {
        Ok(split) => {
            engine.release(pin, true)?;
            Ok(split)
        }
        Err(e) => {
            let _ = engine.release(pin, false);
            Err(e)
        }
    }
}

/// Place the entry in the pinned leaf, splitting on overflow. Duplicate
/// keys are rejected; the tree is unique-key.
fn insert_leaf(
    engine: &mut Engine,
    fid: FileId,
    pin: &mut PinnedTrain,
    kdesc: &KeyDesc,
    key: &[u8],
    oid: ObjectId,
) -> Result<Option<InternalItem>, EngineError> {
    let (found, idx) = {
        let leaf = LeafPage::open(pin.bytes_mut())?;
        search::search_leaf(&leaf, kdesc, key)?
    };
    if found {
        return Err(BtreeError::DuplicateKey.into());
    }

    let inserted = {
        let mut leaf = LeafPage::open(pin.bytes_mut())?;
        leaf.insert_at((idx + 1) as usize, key, oid)
    };
    match inserted {
        Ok(()) => Ok(None),
        Err(PageError::Full) => split::split_leaf(engine, fid, pin, idx, key, oid).map(Some),
        Err(e) => Err(e.into()),
    }
}

/// Place a separator in the pinned internal page at slot `idx + 1`,
/// splitting on overflow.
pub(crate) fn insert_internal(
    engine: &mut Engine,
    fid: FileId,
    pin: &mut PinnedTrain,
    idx: i16,
    item: &InternalItem,
) -> Result<Option<InternalItem>, EngineError> {
    let inserted = {
        let mut page = InternalPage::open(pin.bytes_mut())?;
        page.insert_at((idx + 1) as usize, item.spid, &item.key)
    };
    match inserted {
        Ok(()) => Ok(None),
        Err(PageError::Full) => split::split_internal(engine, fid, pin, idx, item).map(Some),
        Err(e) => Err(e.into()),
    }
}
