//! Root transitions. The root's page id never changes: a split copies the
//! old root aside and rebuilds the root page as a one-entry internal
//! node; a collapse copies the sole surviving child back over the root
//! page.

use log::debug;

use crate::core::errors::EngineError;
use crate::core::{FileId, PageId};
use crate::engine::Engine;
use crate::storage::buffer::BufKind;
use crate::storage::dealloc::{DeallocKind, DeallocList};
use crate::storage::page::{PageFlags, SlottedPage};

use super::page::InternalPage;
use super::InternalItem;

/// After the root split, rebuild it in place: its old contents move to a
/// fresh page that becomes `p0`, and `item` (the split's separator)
/// becomes the sole entry.
pub(crate) fn root_insert(
    engine: &mut Engine,
    fid: FileId,
    root_pid: PageId,
    item: &InternalItem,
) -> Result<(), EngineError> {
    let vol = root_pid.vol_no;
    let new_no = engine.alloc_page_near(Some(root_pid.page_no))?;
    let new_pid = PageId::new(vol, new_no);
    let mut new_pin = engine.get_new_train(new_pid, BufKind::Page)?;
    let mut root_pin = match engine.get_train(root_pid, BufKind::Page) {
        Ok(pin) => pin,
        Err(e) => {
            let _ = engine.release(new_pin, false);
            return Err(e);
        }
    };

    let inner = (|| {
        new_pin.bytes_mut().copy_from_slice(root_pin.bytes());
        let new_is_leaf = {
            let mut view = SlottedPage::open(new_pin.bytes_mut())?;
            view.set_page_id(new_pid);
            let flags = view.flags();
            if flags.contains(PageFlags::ROOT) {
                view.set_flags(flags - PageFlags::ROOT);
            }
            flags.contains(PageFlags::LEAF)
        };
        {
            let mut root = InternalPage::init(root_pin.bytes_mut(), root_pid, fid, true)?;
            root.set_p0(new_pid.page_no);
            root.insert_at(0, item.spid, &item.key)?;
        }
        Ok::<bool, EngineError>(new_is_leaf)
    })();

    let new_is_leaf = match inner {
        Ok(v) => v,
        Err(e) => {
            let _ = engine.release(new_pin, false);
            let _ = engine.release(root_pin, false);
            return Err(e);
        }
    };

    // When the children are leaves, the sibling's back link must follow
    // the copied-out left half.
    if new_is_leaf {
        if let Err(e) = engine.with_page(PageId::new(vol, item.spid), |view| {
            view.set_prev_page(new_pid.page_no);
            Ok(())
        }) {
            let _ = engine.release(new_pin, false);
            let _ = engine.release(root_pin, false);
            return Err(e);
        }
    }

    let new_released = engine.release(new_pin, true);
    let root_released = engine.release(root_pin, true);
    new_released?;
    root_released?;
    debug!("root {root_pid} rebuilt over children {new_pid} and {}", item.spid);
    Ok(())
}

/// After a delete left the root underflowed: an internal root holding a
/// single child absorbs that child; an empty root leaf is a valid empty
/// tree and stays as is.
pub(crate) fn root_collapse(
    engine: &mut Engine,
    root_pid: PageId,
    dl: &mut DeallocList,
) -> Result<(), EngineError> {
    let mut root_pin = engine.get_train(root_pid, BufKind::Page)?;

    let inner = (|| {
        let (flags, n_slots, p0) = {
            let view = SlottedPage::open(root_pin.bytes_mut())?;
            (view.flags(), view.n_slots(), view.p0())
        };
        if !flags.contains(PageFlags::INTERNAL) || n_slots != 0 {
            return Ok(false);
        }

        let child_pid = PageId::new(root_pid.vol_no, p0);
        let child_pin = engine.get_train(child_pid, BufKind::Page)?;
        let copied = (|| {
            root_pin.bytes_mut().copy_from_slice(child_pin.bytes());
            let mut view = SlottedPage::open(root_pin.bytes_mut())?;
            view.set_page_id(root_pid);
            view.set_flags(view.flags() | PageFlags::ROOT);
            Ok::<(), EngineError>(())
        })();
        let freed = engine.free_train(child_pin);
        copied?;
        freed?;
        dl.prepend(DeallocKind::Page, child_pid);
        debug!("root {root_pid} absorbed its sole child {child_pid}");
        Ok(true)
    })();

    match inner {
        Ok(changed) => engine.release(root_pin, changed),
        Err(e) => {
            let _ = engine.release(root_pin, false);
            Err(e)
        }
    }
}
