//! Page splits. A split walks the would-be entry sequence (existing
//! entries plus the incoming one at its insert position) accumulating
//! entry and slot bytes until the running sum crosses half the page
//! payload; that cutoff fixes the left page, the rest moves to a freshly
//! allocated sibling.

use log::debug;

use crate::core::errors::EngineError;
use crate::core::{FileId, ObjectId, PageId, PageNo, NIL_PAGE};
use crate::engine::Engine;
use crate::storage::buffer::{BufKind, PinnedTrain};
use crate::storage::page::{PageFlags, SLOT_SIZE};

use super::page::{internal_entry_size, leaf_entry_size, InternalPage, LeafPage, HALF_PAGE};
use super::InternalItem;

/// Split the pinned leaf while inserting `key -> oid` at slot position
/// `high + 1`. Returns the separator for the parent: the sibling's first
/// key.
pub(crate) fn split_leaf(
    engine: &mut Engine,
    fid: FileId,
    pin: &mut PinnedTrain,
    high: i16,
    key: &[u8],
    oid: ObjectId,
) -> Result<InternalItem, EngineError> {
    let vol = pin.pid().vol_no;
    let new_no = engine.alloc_page_near(Some(pin.pid().page_no))?;
    let new_pid = PageId::new(vol, new_no);
    let mut new_pin = engine.get_new_train(new_pid, BufKind::Page)?;

    let inner = split_leaf_pages(pin, &mut new_pin, fid, new_pid, high, key, oid);
    let (item, old_next) = match inner {
        Ok(v) => v,
        Err(e) => {
            let _ = engine.release(new_pin, false);
            return Err(e);
        }
    };

    // Fourth link of the chain splice: the old successor's back pointer.
    if old_next != NIL_PAGE {
        if let Err(e) = engine.with_page(PageId::new(vol, old_next), |view| {
            view.set_prev_page(new_pid.page_no);
            Ok(())
        }) {
            let _ = engine.release(new_pin, false);
            return Err(e);
        }
    }

    engine.release(new_pin, true)?;
    debug!("leaf {} split, new sibling {new_pid}", pin.pid());
    Ok(item)
}

fn split_leaf_pages(
    pin: &mut PinnedTrain,
    new_pin: &mut PinnedTrain,
    fid: FileId,
    new_pid: PageId,
    high: i16,
    key: &[u8],
    oid: ObjectId,
) -> Result<(InternalItem, PageNo), EngineError> {
    let mut left = LeafPage::open(pin.bytes_mut())?;
    let mut right = LeafPage::init(new_pin.bytes_mut(), new_pid, fid, false)?;

    let max_loop = left.n_entries() + 1;
    let item_pos = (high + 1) as usize;
    let item_len = leaf_entry_size(key.len());

    // Fix the cutoff: consume positions until the running size crosses half.
    let mut sum = 0usize;
    let mut pos = 0usize;
    let mut kept = 0usize;
    let mut item_in_left = false;
    while pos < max_loop && sum <= HALF_PAGE {
        let len = if pos == item_pos {
            item_in_left = true;
            item_len
        } else {
            let len = left.entry_len_at_slot(kept)?;
            kept += 1;
            len
        };
        sum += len + SLOT_SIZE;
        pos += 1;
    }

    // Pull the moving entries out of the left page before truncating it.
    let mut right_parts: Vec<Option<Vec<u8>>> = Vec::with_capacity(max_loop - pos);
    let mut reclaimed: Vec<(usize, usize)> = Vec::new();
    {
        let mut from = kept;
        for p in pos..max_loop {
            if p == item_pos {
                right_parts.push(None);
            } else {
                let (offset, _) = left.sp.slot(from)?;
                let bytes = left.entry_bytes(from)?;
                reclaimed.push((offset as usize, bytes.len()));
                right_parts.push(Some(bytes));
                from += 1;
            }
        }
    }
    left.sp.set_n_slots(kept);
    for (offset, len) in reclaimed {
        if offset + len == left.sp.free() {
            left.sp.set_free(left.sp.free() - len);
        } else {
            left.sp.set_unused(left.sp.unused() + len);
        }
    }

    for part in right_parts {
        match part {
            Some(bytes) => {
                let n = right.n_entries();
                right.insert_raw(n, &bytes)?;
            }
            None => {
                let n = right.n_entries();
                right.insert_at(n, key, oid)?;
            }
        }
    }
    if item_in_left {
        left.insert_at(item_pos, key, oid)?;
    }

    // Chain splice; the successor's back pointer is fixed by the caller.
    let old_next = left.sp.next_page();
    right.sp.set_prev_page(left.sp.page_id().page_no);
    right.sp.set_next_page(old_next);
    left.sp.set_next_page(new_pid.page_no);

    let separator = right.key_at(0)?.to_vec();

    // A split root stays a plain leaf; the root-insert path rebuilds the
    // root page itself.
    let flags = left.sp.flags();
    if flags.contains(PageFlags::ROOT) {
        left.sp.set_flags(flags - PageFlags::ROOT);
    }

    Ok((
        InternalItem {
            spid: new_pid.page_no,
            key: separator,
        },
        old_next,
    ))
}

/// Split the pinned internal page while inserting `item` at slot position
/// `high + 1`. The median's key is promoted and its child becomes the
/// sibling's `p0`.
pub(crate) fn split_internal(
    engine: &mut Engine,
    fid: FileId,
    pin: &mut PinnedTrain,
    high: i16,
    item: &InternalItem,
) -> Result<InternalItem, EngineError> {
    let vol = pin.pid().vol_no;
    let new_no = engine.alloc_page_near(Some(pin.pid().page_no))?;
    let new_pid = PageId::new(vol, new_no);
    let mut new_pin = engine.get_new_train(new_pid, BufKind::Page)?;

    let inner = split_internal_pages(pin, &mut new_pin, fid, new_pid, high, item);
    match inner {
        Ok(ritem) => {
            engine.release(new_pin, true)?;
            debug!("internal {} split, new sibling {new_pid}", pin.pid());
            Ok(ritem)
        }
        Err(e) => {
            let _ = engine.release(new_pin, false);
            Err(e)
        }
    }
}

fn split_internal_pages(
    pin: &mut PinnedTrain,
    new_pin: &mut PinnedTrain,
    fid: FileId,
    new_pid: PageId,
    high: i16,
    item: &InternalItem,
) -> Result<InternalItem, EngineError> {
    let mut left = InternalPage::open(pin.bytes_mut())?;
    let mut right = InternalPage::init(new_pin.bytes_mut(), new_pid, fid, false)?;

    let max_loop = left.n_entries() + 1;
    let item_pos = (high + 1) as usize;
    let item_len = internal_entry_size(item.key.len());

    let mut sum = 0usize;
    let mut pos = 0usize;
    let mut kept = 0usize;
    let mut item_in_left = false;
    while pos < max_loop && sum <= HALF_PAGE {
        let len = if pos == item_pos {
            item_in_left = true;
            item_len
        } else {
            let len = left.entry_len_at_slot(kept)?;
            kept += 1;
            len
        };
        sum += len + SLOT_SIZE;
        pos += 1;
    }

    // The next position is the median: promoted, never stored in either
    // half; its child pointer seeds the sibling's p0.
    let mut reclaimed: Vec<(usize, usize)> = Vec::new();
    let mut from = kept;
    let (median_key, median_spid) = if pos == item_pos {
        (item.key.clone(), item.spid)
    } else {
        let (offset, _) = left.sp.slot(from)?;
        let len = left.entry_len_at_slot(from)?;
        reclaimed.push((offset as usize, len));
        let key = left.key_at(from)?.to_vec();
        let spid = left.child_at(from)?;
        from += 1;
        (key, spid)
    };
    pos += 1;

    let mut right_parts: Vec<Option<Vec<u8>>> = Vec::with_capacity(max_loop - pos);
    for p in pos..max_loop {
        if p == item_pos {
            right_parts.push(None);
        } else {
            let (offset, _) = left.sp.slot(from)?;
            let bytes = left.entry_bytes(from)?;
            reclaimed.push((offset as usize, bytes.len()));
            right_parts.push(Some(bytes));
            from += 1;
        }
    }

    left.sp.set_n_slots(kept);
    for (offset, len) in reclaimed {
        if offset + len == left.sp.free() {
            left.sp.set_free(left.sp.free() - len);
        } else {
            left.sp.set_unused(left.sp.unused() + len);
        }
    }

    right.set_p0(median_spid);
    for part in right_parts {
        match part {
            Some(bytes) => {
                let n = right.n_entries();
                right.insert_raw(n, &bytes)?;
            }
            None => {
                let n = right.n_entries();
                right.insert_at(n, item.spid, &item.key)?;
            }
        }
    }
    if item_in_left {
        left.insert_at(item_pos, item.spid, &item.key)?;
    }

    let flags = left.sp.flags();
    if flags.contains(PageFlags::ROOT) {
        left.sp.set_flags(flags - PageFlags::ROOT);
    }

    Ok(InternalItem {
        spid: new_pid.page_no,
        key: median_key,
    })
}
