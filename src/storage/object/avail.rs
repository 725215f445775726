//! Available-space lists and the file page list.
//!
//! Every header-changing operation removes the touched page from its list
//! first and re-inserts it afterwards, so membership always reflects the
//! page's current `sp_free`. Helpers here receive the target page already
//! pinned by the caller and pin only strictly-distinct neighbor pages.

use log::trace;

use crate::core::errors::EngineError;
use crate::core::{PageId, PageNo, NIL_PAGE};
use crate::engine::Engine;
use crate::storage::buffer::PinnedTrain;
use crate::storage::catalog::{DataCatEntry, AVAIL_BANDS};
use crate::storage::page::{SlottedPage, DATA_CAPACITY};

/// Floor of reclaimable bytes for each band: a page on band `b` holds at
/// least `BAND_FLOOR[b]` free bytes.
const BAND_FLOOR: [usize; AVAIL_BANDS] = [
    DATA_CAPACITY / 10,
    DATA_CAPACITY / 5,
    3 * DATA_CAPACITY / 10,
    2 * DATA_CAPACITY / 5,
    DATA_CAPACITY / 2,
];

/// Band a page with `sp_free` reclaimable bytes files under; pages below
/// the 10% floor are on no list.
pub(crate) fn band_of(sp_free: usize) -> Option<usize> {
    (0..AVAIL_BANDS).rev().find(|b| sp_free >= BAND_FLOOR[*b])
}

/// Head of the smallest non-empty list guaranteed to accommodate `need`.
pub(crate) fn pick_list_head(cat: &DataCatEntry, need: usize) -> Option<PageNo> {
    (0..AVAIL_BANDS)
        .filter(|b| BAND_FLOOR[*b] >= need)
        .map(|b| cat.avail[b])
        .find(|head| *head != NIL_PAGE)
}

/// Unlink the pinned page from whichever available-space list it is on.
/// A page on no list is left alone.
pub(crate) fn remove_from_avail(
    engine: &mut Engine,
    cat: &mut DataCatEntry,
    pin: &mut PinnedTrain,
) -> Result<(), EngineError> {
    let (pid, s_prev, s_next) = {
        let view = SlottedPage::open(pin.bytes_mut())?;
        (view.page_id(), view.space_prev(), view.space_next())
    };

    if s_prev != NIL_PAGE {
        engine.with_page(PageId::new(pid.vol_no, s_prev), |view| {
            view.set_space_next(s_next);
            Ok(())
        })?;
    } else if let Some(band) = (0..AVAIL_BANDS).find(|b| cat.avail[*b] == pid.page_no) {
        cat.avail[band] = s_next;
    } else {
        // Not on any list.
        return Ok(());
    }

    if s_next != NIL_PAGE {
        engine.with_page(PageId::new(pid.vol_no, s_next), |view| {
            view.set_space_prev(s_prev);
            Ok(())
        })?;
    }

    let mut view = SlottedPage::open(pin.bytes_mut())?;
    view.set_space_next(NIL_PAGE);
    view.set_space_prev(NIL_PAGE);
    Ok(())
}

/// File the pinned page under the band matching its current `sp_free`,
/// prepending it to that list.
pub(crate) fn insert_into_avail(
    engine: &mut Engine,
    cat: &mut DataCatEntry,
    pin: &mut PinnedTrain,
) -> Result<(), EngineError> {
    let (pid, sp_free) = {
        let view = SlottedPage::open(pin.bytes_mut())?;
        (view.page_id(), view.sp_free())
    };

    let Some(band) = band_of(sp_free) else {
        let mut view = SlottedPage::open(pin.bytes_mut())?;
        view.set_space_next(NIL_PAGE);
        view.set_space_prev(NIL_PAGE);
        return Ok(());
    };

    let head = cat.avail[band];
    {
        let mut view = SlottedPage::open(pin.bytes_mut())?;
        view.set_space_next(head);
        view.set_space_prev(NIL_PAGE);
    }
    if head != NIL_PAGE {
        engine.with_page(PageId::new(pid.vol_no, head), |view| {
            view.set_space_prev(pid.page_no);
            Ok(())
        })?;
    }
    cat.avail[band] = pid.page_no;
    trace!("page {pid} filed under band {band} with {sp_free} free bytes");
    Ok(())
}

/// Splice the pinned new page into the file list right after `near_pin`'s
/// page. The caller publishes both pins.
pub(crate) fn file_map_add_after(
    engine: &mut Engine,
    cat: &mut DataCatEntry,
    near_pin: &mut PinnedTrain,
    new_pin: &mut PinnedTrain,
) -> Result<(), EngineError> {
    let (near_no, near_next, vol_no) = {
        let view = SlottedPage::open(near_pin.bytes_mut())?;
        (view.page_id().page_no, view.next_page(), view.vol_no())
    };
    let new_no = {
        let mut view = SlottedPage::open(new_pin.bytes_mut())?;
        view.set_prev_page(near_no);
        view.set_next_page(near_next);
        view.page_id().page_no
    };
    {
        let mut view = SlottedPage::open(near_pin.bytes_mut())?;
        view.set_next_page(new_no);
    }
    if near_next != NIL_PAGE {
        engine.with_page(PageId::new(vol_no, near_next), |view| {
            view.set_prev_page(new_no);
            Ok(())
        })?;
    } else {
        cat.last_page = new_no;
    }
    Ok(())
}

/// Append the pinned new page at the tail of the file list.
pub(crate) fn file_map_append(
    engine: &mut Engine,
    cat: &mut DataCatEntry,
    new_pin: &mut PinnedTrain,
) -> Result<(), EngineError> {
    let last_no = cat.last_page;
    let (new_no, vol_no) = {
        let mut view = SlottedPage::open(new_pin.bytes_mut())?;
        view.set_prev_page(last_no);
        view.set_next_page(NIL_PAGE);
        (view.page_id().page_no, view.vol_no())
    };
    engine.with_page(PageId::new(vol_no, last_no), |view| {
        view.set_next_page(new_no);
        Ok(())
    })?;
    cat.last_page = new_no;
    Ok(())
}

/// Unlink the pinned page from the file list.
pub(crate) fn file_map_remove(
    engine: &mut Engine,
    cat: &mut DataCatEntry,
    pin: &mut PinnedTrain,
) -> Result<(), EngineError> {
    let (pid, prev, next) = {
        let view = SlottedPage::open(pin.bytes_mut())?;
        (view.page_id(), view.prev_page(), view.next_page())
    };

    if prev != NIL_PAGE {
        engine.with_page(PageId::new(pid.vol_no, prev), |view| {
            view.set_next_page(next);
            Ok(())
        })?;
    } else {
        cat.first_page = next;
    }
    if next != NIL_PAGE {
        engine.with_page(PageId::new(pid.vol_no, next), |view| {
            view.set_prev_page(prev);
            Ok(())
        })?;
    } else {
        cat.last_page = prev;
    }

    let mut view = SlottedPage::open(pin.bytes_mut())?;
    view.set_next_page(NIL_PAGE);
    view.set_prev_page(NIL_PAGE);
    Ok(())
}
