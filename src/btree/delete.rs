//! Recursive delete. A leaf that drops below half full reports underflow;
//! its parent resolves it against an adjacent sibling, either merging the
//! pair (freeing the right page) or redistributing entries (replacing the
//! separator, which can itself split the parent).

use log::debug;

use crate::core::errors::{BtreeError, EngineError};
use crate::core::{FileId, ObjectId, PageId, NIL_PAGE};
use crate::engine::Engine;
use crate::storage::buffer::{BufKind, PinnedTrain};
use crate::storage::dealloc::{DeallocKind, DeallocList};
use crate::storage::page::{PageFlags, SlottedPage, DATA_CAPACITY, SLOT_SIZE};

use super::insert::insert_internal;
use super::key::KeyDesc;
use super::page::{internal_entry_size, InternalPage, LeafPage, HALF_PAGE};
use super::search;
use super::InternalItem;

pub(crate) struct DeleteStatus {
    /// The page ended not half full; the parent must rebalance it.
    pub underflow: bool,
    /// Separator promoted by a parent split during rebalancing.
    pub item: Option<InternalItem>,
}

pub(crate) fn delete_rec(
    engine: &mut Engine,
    fid: FileId,
    pid: PageId,
    kdesc: &KeyDesc,
    key: &[u8],
    oid: &ObjectId,
    dl: &mut DeallocList,
) -> Result<DeleteStatus, EngineError> {
    let mut pin = engine.get_train(pid, BufKind::Page)?;
    let result = (|| {
        let flags = {
            let view = SlottedPage::open(pin.bytes_mut())?;
            view.flags()
        };
        if flags.contains(PageFlags::INTERNAL) {
            let (idx, child_no) = {
                let page = InternalPage::open(pin.bytes_mut())?;
                let (_, idx) = search::search_internal(&page, kdesc, key)?;
                let child = if idx < 0 {
                    page.p0()
                } else {
                    page.child_at(idx as usize)?
                };
                (idx, child)
            };
            let status = delete_rec(
                engine,
                fid,
                PageId::new(pid.vol_no, child_no),
                kdesc,
                key,
                oid,
                dl,
            )?;

            let mut item = None;
            let mut modified = false;
            if let Some(child_item) = status.item {
                // The child split while rebalancing below; place its
                // separator here.
                let at = {
                    let page = InternalPage::open(pin.bytes_mut())?;
                    search::search_internal(&page, kdesc, &child_item.key)?.1
                };
                item = insert_internal(engine, fid, &mut pin, at, &child_item)?;
                modified = true;
            } else if status.underflow {
                item = resolve_underflow(engine, fid, &mut pin, idx, kdesc, dl)?;
                modified = true;
            }

            // Only a page this delete actually touched reports underflow;
            // a thin page left alone is not the parent's problem.
            let under = modified && {
                let view = SlottedPage::open(pin.bytes_mut())?;
                view.sp_free() >= HALF_PAGE
            };
            Ok(DeleteStatus {
                underflow: item.is_none() && under,
                item,
            })
        } else if flags.contains(PageFlags::LEAF) {
            delete_from_leaf(&mut pin, kdesc, key, oid)
        } else {
            Err(BtreeError::BadPageType(pid, "index").into())
        }
    })();
    match result {
        Ok(status) => {
            engine.release(pin, true)?;
            Ok(status)
        }
        Err(e) => {
            let _ = engine.release(pin, false);
            Err(e)
        }
    }
}

fn delete_from_leaf(
    pin: &mut PinnedTrain,
    kdesc: &KeyDesc,
    key: &[u8],
    oid: &ObjectId,
) -> Result<DeleteStatus, EngineError> {
    let mut leaf = LeafPage::open(pin.bytes_mut())?;
    let (found, idx) = search::search_leaf(&leaf, kdesc, key)?;
    if !found {
        return Err(BtreeError::NotFound.into());
    }
    if leaf.oid_at(idx as usize)? != *oid {
        return Err(BtreeError::NotFound.into());
    }
    leaf.remove_at(idx as usize)?;
    Ok(DeleteStatus {
        underflow: leaf.sp.sp_free() >= HALF_PAGE,
        item: None,
    })
}

/// Rebalance the underflowed child at routing index `child_idx` against
/// an adjacent sibling. Works on the separator-adjacent pair
/// `(left, right)`; merging always survives on the left page.
fn resolve_underflow(
    engine: &mut Engine,
    fid: FileId,
    parent_pin: &mut PinnedTrain,
    child_idx: i16,
    kdesc: &KeyDesc,
    dl: &mut DeallocList,
) -> Result<Option<InternalItem>, EngineError> {
    let vol = parent_pin.pid().vol_no;
    let sep = child_idx.max(0) as usize;
    let (left_no, right_no, sep_key) = {
        let page = InternalPage::open(parent_pin.bytes_mut())?;
        let left = if sep == 0 {
            page.p0()
        } else {
            page.child_at(sep - 1)?
        };
        (left, page.child_at(sep)?, page.key_at(sep)?.to_vec())
    };

    let mut left_pin = engine.get_train(PageId::new(vol, left_no), BufKind::Page)?;
    let mut right_pin = match engine.get_train(PageId::new(vol, right_no), BufKind::Page) {
        Ok(pin) => pin,
        Err(e) => {
            let _ = engine.release(left_pin, false);
            return Err(e);
        }
    };

    let result = (|| {
        let is_leaf = {
            let view = SlottedPage::open(left_pin.bytes_mut())?;
            view.flags().contains(PageFlags::LEAF)
        };
        let left_free = {
            let view = SlottedPage::open(left_pin.bytes_mut())?;
            view.sp_free()
        };
        let right_used = {
            let view = SlottedPage::open(right_pin.bytes_mut())?;
            DATA_CAPACITY - view.sp_free()
        };
        let merge_fits = if is_leaf {
            left_free >= right_used
        } else {
            left_free >= right_used + internal_entry_size(sep_key.len()) + SLOT_SIZE
        };

        if merge_fits {
            merge_into_left(
                engine,
                parent_pin,
                &mut left_pin,
                &mut right_pin,
                sep,
                &sep_key,
                is_leaf,
                dl,
            )?;
            Ok((false, None))
        } else {
            redistribute(
                engine,
                fid,
                parent_pin,
                &mut left_pin,
                &mut right_pin,
                sep,
                sep_key,
                is_leaf,
                kdesc,
            )
            .map(|item| (true, item))
        }
    })();

    match result {
        Ok((right_dirty, item)) => {
            let left_released = engine.release(left_pin, true);
            let right_released = engine.release(right_pin, right_dirty);
            left_released?;
            right_released?;
            Ok(item)
        }
        Err(e) => {
            let _ = engine.release(left_pin, false);
            let _ = engine.release(right_pin, false);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn merge_into_left(
    engine: &mut Engine,
    parent_pin: &mut PinnedTrain,
    left_pin: &mut PinnedTrain,
    right_pin: &mut PinnedTrain,
    sep: usize,
    sep_key: &[u8],
    is_leaf: bool,
    dl: &mut DeallocList,
) -> Result<(), EngineError> {
    let left_no = left_pin.pid().page_no;
    let right_pid = right_pin.pid();

    if is_leaf {
        let (right_entries, right_next) = {
            let right = LeafPage::open(right_pin.bytes_mut())?;
            let mut entries = Vec::with_capacity(right.n_entries());
            for i in 0..right.n_entries() {
                entries.push(right.entry_bytes(i)?);
            }
            (entries, right.sp.next_page())
        };
        {
            let mut left = LeafPage::open(left_pin.bytes_mut())?;
            for entry in &right_entries {
                let n = left.n_entries();
                left.insert_raw(n, entry)?;
            }
            left.sp.set_next_page(right_next);
        }
        if right_next != NIL_PAGE {
            engine.with_page(PageId::new(right_pid.vol_no, right_next), |view| {
                view.set_prev_page(left_no);
                Ok(())
            })?;
        }
    } else {
        let (right_p0, right_entries) = {
            let right = InternalPage::open(right_pin.bytes_mut())?;
            let mut entries = Vec::with_capacity(right.n_entries());
            for i in 0..right.n_entries() {
                entries.push(right.entry_bytes(i)?);
            }
            (right.p0(), entries)
        };
        let mut left = InternalPage::open(left_pin.bytes_mut())?;
        // The separator comes down between the two halves.
        let n = left.n_entries();
        left.insert_at(n, right_p0, sep_key)?;
        for entry in &right_entries {
            let n = left.n_entries();
            left.insert_raw(n, entry)?;
        }
    }

    {
        let mut parent = InternalPage::open(parent_pin.bytes_mut())?;
        parent.remove_at(sep)?;
    }
    dl.prepend(DeallocKind::Page, right_pid);
    debug!("merged {right_pid} into page {left_no}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn redistribute(
    engine: &mut Engine,
    fid: FileId,
    parent_pin: &mut PinnedTrain,
    left_pin: &mut PinnedTrain,
    right_pin: &mut PinnedTrain,
    sep: usize,
    sep_key: Vec<u8>,
    is_leaf: bool,
    kdesc: &KeyDesc,
) -> Result<Option<InternalItem>, EngineError> {
    let right_no = right_pin.pid().page_no;
    let mut cur_sep = sep_key;

    if is_leaf {
        let mut left = LeafPage::open(left_pin.bytes_mut())?;
        let mut right = LeafPage::open(right_pin.bytes_mut())?;
        if left.sp.sp_free() >= HALF_PAGE {
            // Left is starved; take from the front of the right page.
            let mut guard = right.n_entries();
            while left.sp.sp_free() >= HALF_PAGE && guard > 0 {
                let entry = right.entry_bytes(0)?;
                right.remove_at(0)?;
                let n = left.n_entries();
                left.insert_raw(n, &entry)?;
                guard -= 1;
            }
        } else {
            // Right is starved; feed it from the tail of the left page.
            let mut guard = left.n_entries();
            while right.sp.sp_free() >= HALF_PAGE && guard > 0 {
                let n = left.n_entries();
                let entry = left.entry_bytes(n - 1)?;
                left.remove_at(n - 1)?;
                right.insert_raw(0, &entry)?;
                guard -= 1;
            }
        }
        cur_sep = right.key_at(0)?.to_vec();
    } else {
        let mut left = InternalPage::open(left_pin.bytes_mut())?;
        let mut right = InternalPage::open(right_pin.bytes_mut())?;
        if left.sp.sp_free() >= HALF_PAGE {
            // Rotate through the separator, right to left.
            let mut guard = right.n_entries();
            while left.sp.sp_free() >= HALF_PAGE && guard > 1 {
                let n = left.n_entries();
                left.insert_at(n, right.p0(), &cur_sep)?;
                cur_sep = right.key_at(0)?.to_vec();
                let new_p0 = right.child_at(0)?;
                right.set_p0(new_p0);
                right.remove_at(0)?;
                guard -= 1;
            }
        } else {
            // Rotate left to right.
            let mut guard = left.n_entries();
            while right.sp.sp_free() >= HALF_PAGE && guard > 1 {
                let n = left.n_entries();
                let donated_key = left.key_at(n - 1)?.to_vec();
                let donated_child = left.child_at(n - 1)?;
                right.insert_at(0, right.p0(), &cur_sep)?;
                right.set_p0(donated_child);
                left.remove_at(n - 1)?;
                cur_sep = donated_key;
                guard -= 1;
            }
        }
    }

    // Replace the parent separator with the post-move boundary; the
    // reinsert can split the parent.
    {
        let mut parent = InternalPage::open(parent_pin.bytes_mut())?;
        parent.remove_at(sep)?;
    }
    let at = {
        let parent = InternalPage::open(parent_pin.bytes_mut())?;
        search::search_internal(&parent, kdesc, &cur_sep)?.1
    };
    debug!("redistributed entries; new separator points at page {right_no}");
    insert_internal(
        engine,
        fid,
        parent_pin,
        at,
        &InternalItem {
            spid: right_no,
            key: cur_sep,
        },
    )
}
