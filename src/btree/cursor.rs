//! Cursored scans. A cursor names a leaf slot plus the entry it held; it
//! stays valid only while the leaf's structure is unchanged, so callers
//! refetch after inserts and deletes.

use crate::core::errors::{BtreeError, EngineError};
use crate::core::{ObjectId, PageId, PageNo, NIL_PAGE};
use crate::engine::Engine;
use crate::storage::buffer::{BufKind, PinnedTrain};
use crate::storage::page::{PageFlags, SlottedPage};

use super::key::{self, KeyDesc, KeyValue};
use super::page::{InternalPage, LeafPage};
use super::search;

/// Comparison operators for scan bounds. `Bof`/`Eof` start a scan at the
/// first or last key and never stop one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Bof,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorFlag {
    On,
    Eos,
}

#[derive(Debug, Clone)]
pub struct Cursor {
    pub flag: CursorFlag,
    pub oid: ObjectId,
    pub key: KeyValue,
    pub leaf: PageId,
    pub slot_no: i16,
}

impl Cursor {
    pub fn eos() -> Self {
        Self {
            flag: CursorFlag::Eos,
            oid: ObjectId::default(),
            key: KeyValue::default(),
            leaf: PageId::new(0, NIL_PAGE),
            slot_no: -1,
        }
    }

    pub fn is_eos(&self) -> bool {
        self.flag == CursorFlag::Eos
    }
}

fn stop_violated(
    kdesc: &KeyDesc,
    cursor_key: &[u8],
    stop_key: Option<&KeyValue>,
    stop_op: CompOp,
    include_eq: bool,
) -> Result<bool, EngineError> {
    let Some(stop) = stop_key else {
        return Ok(false);
    };
    let cmp = key::compare(kdesc, cursor_key, stop.as_bytes())?;
    use std::cmp::Ordering::*;
    Ok(match stop_op {
        CompOp::Lt => cmp != Less,
        CompOp::Le => cmp == Greater,
        CompOp::Gt => cmp != Greater,
        CompOp::Ge => cmp == Less,
        CompOp::Eq => include_eq && cmp != Equal,
        CompOp::Bof | CompOp::Eof => false,
    })
}

impl Engine {
    /// Position a cursor on the first entry satisfying the start
    /// condition, then check it against the stop condition.
    pub fn fetch(
        &mut self,
        root: PageId,
        kdesc: &KeyDesc,
        start_key: Option<&KeyValue>,
        start_op: CompOp,
        stop_key: Option<&KeyValue>,
        stop_op: CompOp,
    ) -> Result<Cursor, EngineError> {
        kdesc.validate()?;
        match start_op {
            CompOp::Bof => self.edge_object(root, kdesc, stop_key, stop_op, true),
            CompOp::Eof => self.edge_object(root, kdesc, stop_key, stop_op, false),
            _ => {
                let start = start_key.ok_or(BtreeError::BadKeyDesc("start key required"))?;
                start.validate()?;
                self.fetch_from(root, kdesc, start.as_bytes(), start_op, stop_key, stop_op)
            }
        }
    }

    /// Step the cursor one entry in the direction the stop operator
    /// implies, crossing leaves through the chain.
    pub fn fetch_next(
        &mut self,
        kdesc: &KeyDesc,
        stop_key: Option<&KeyValue>,
        stop_op: CompOp,
        current: &Cursor,
    ) -> Result<Cursor, EngineError> {
        kdesc.validate()?;
        if current.is_eos() {
            return Ok(Cursor::eos());
        }

        let vol = current.leaf.vol_no;
        let mut pin = self.get_train(current.leaf, BufKind::Page)?;
        let info = (|| {
            let leaf = LeafPage::open(pin.bytes_mut())?;
            Ok::<_, EngineError>((
                leaf.n_entries() as i32,
                leaf.sp.prev_page(),
                leaf.sp.next_page(),
            ))
        })();
        let (n, prev, next) = match info {
            Ok(v) => v,
            Err(_) => {
                let _ = self.free_train(pin);
                return Err(BtreeError::BadCursor.into());
            }
        };

        let backward = matches!(stop_op, CompOp::Gt | CompOp::Ge | CompOp::Bof);
        let slot = current.slot_no as i32 + if backward { -1 } else { 1 };
        match self.hop_if_off(pin, vol, slot, n, prev, next)? {
            None => Ok(Cursor::eos()),
            Some((pin, slot)) => self.load_cursor(pin, slot, kdesc, stop_key, stop_op, true),
        }
    }

    fn fetch_from(
        &mut self,
        root: PageId,
        kdesc: &KeyDesc,
        start: &[u8],
        start_op: CompOp,
        stop_key: Option<&KeyValue>,
        stop_op: CompOp,
    ) -> Result<Cursor, EngineError> {
        let mut pid = root;
        loop {
            let mut pin = self.get_train(pid, BufKind::Page)?;
            let step = (|| {
                let flags = {
                    let view = SlottedPage::open(pin.bytes_mut())?;
                    view.flags()
                };
                if flags.contains(PageFlags::INTERNAL) {
                    let page = InternalPage::open(pin.bytes_mut())?;
                    let (_, idx) = search::search_internal(&page, kdesc, start)?;
                    let child = if idx < 0 {
                        page.p0()
                    } else {
                        page.child_at(idx as usize)?
                    };
                    Ok::<Option<PageNo>, EngineError>(Some(child))
                } else if flags.contains(PageFlags::LEAF) {
                    Ok(None)
                } else {
                    Err(BtreeError::BadPageType(pid, "index").into())
                }
            })();
            match step {
                Err(e) => {
                    let _ = self.free_train(pin);
                    return Err(e);
                }
                Ok(Some(child)) => {
                    self.free_train(pin)?;
                    pid = PageId::new(pid.vol_no, child);
                }
                Ok(None) => {
                    return self.position_in_leaf(pin, kdesc, start, start_op, stop_key, stop_op);
                }
            }
        }
    }

    fn position_in_leaf(
        &mut self,
        mut pin: PinnedTrain,
        kdesc: &KeyDesc,
        start: &[u8],
        start_op: CompOp,
        stop_key: Option<&KeyValue>,
        stop_op: CompOp,
    ) -> Result<Cursor, EngineError> {
        let vol = pin.pid().vol_no;
        let seek = (|| {
            let leaf = LeafPage::open(pin.bytes_mut())?;
            let (found, idx) = search::search_leaf(&leaf, kdesc, start)?;
            Ok::<_, EngineError>((
                found,
                idx as i32,
                leaf.n_entries() as i32,
                leaf.sp.prev_page(),
                leaf.sp.next_page(),
            ))
        })();
        let (found, idx, n, prev, next) = match seek {
            Ok(v) => v,
            Err(e) => {
                let _ = self.free_train(pin);
                return Err(e);
            }
        };

        let mut slot = idx;
        match start_op {
            CompOp::Eq => {
                if !found {
                    self.free_train(pin)?;
                    return Ok(Cursor::eos());
                }
            }
            CompOp::Lt => {
                if found {
                    slot -= 1;
                }
            }
            CompOp::Le => {}
            CompOp::Gt => slot += 1,
            CompOp::Ge => {
                if !found {
                    slot += 1;
                }
            }
            CompOp::Bof | CompOp::Eof => {
                self.free_train(pin)?;
                return Err(BtreeError::BadKeyDesc("edge operator with a start key").into());
            }
        }

        match self.hop_if_off(pin, vol, slot, n, prev, next)? {
            None => Ok(Cursor::eos()),
            Some((pin, slot)) => self.load_cursor(pin, slot, kdesc, stop_key, stop_op, false),
        }
    }

    /// When the adjusted slot fell off the page, move to the neighbor
    /// leaf. `None` means the scan ran off the chain.
    fn hop_if_off(
        &mut self,
        pin: PinnedTrain,
        vol: crate::core::VolNo,
        slot: i32,
        n: i32,
        prev: PageNo,
        next: PageNo,
    ) -> Result<Option<(PinnedTrain, i32)>, EngineError> {
        if slot < 0 {
            self.free_train(pin)?;
            if prev == NIL_PAGE {
                return Ok(None);
            }
            let mut neighbor = self.get_train(PageId::new(vol, prev), BufKind::Page)?;
            let last = (|| {
                let leaf = LeafPage::open(neighbor.bytes_mut())?;
                Ok::<i32, EngineError>(leaf.n_entries() as i32 - 1)
            })();
            match last {
                Ok(last) if last >= 0 => Ok(Some((neighbor, last))),
                Ok(_) => {
                    self.free_train(neighbor)?;
                    Ok(None)
                }
                Err(e) => {
                    let _ = self.free_train(neighbor);
                    Err(e)
                }
            }
        } else if slot >= n {
            self.free_train(pin)?;
            if next == NIL_PAGE {
                return Ok(None);
            }
            let mut neighbor = self.get_train(PageId::new(vol, next), BufKind::Page)?;
            let empty = (|| {
                let leaf = LeafPage::open(neighbor.bytes_mut())?;
                Ok::<bool, EngineError>(leaf.n_entries() == 0)
            })();
            match empty {
                Ok(false) => Ok(Some((neighbor, 0))),
                Ok(true) => {
                    self.free_train(neighbor)?;
                    Ok(None)
                }
                Err(e) => {
                    let _ = self.free_train(neighbor);
                    Err(e)
                }
            }
        } else {
            Ok(Some((pin, slot)))
        }
    }

    /// Build the cursor from the entry and apply the stop predicate.
    fn load_cursor(
        &mut self,
        mut pin: PinnedTrain,
        slot: i32,
        kdesc: &KeyDesc,
        stop_key: Option<&KeyValue>,
        stop_op: CompOp,
        include_eq: bool,
    ) -> Result<Cursor, EngineError> {
        let leaf_pid = pin.pid();
        let built = (|| {
            let leaf = LeafPage::open(pin.bytes_mut())?;
            let key = leaf.key_at(slot as usize)?.to_vec();
            let oid = leaf.oid_at(slot as usize)?;
            Ok::<_, EngineError>(Cursor {
                flag: CursorFlag::On,
                oid,
                key: KeyValue::from_bytes(key),
                leaf: leaf_pid,
                slot_no: slot as i16,
            })
        })();
        let freed = self.free_train(pin);
        let cursor = built?;
        freed?;

        if stop_violated(kdesc, cursor.key.as_bytes(), stop_key, stop_op, include_eq)? {
            Ok(Cursor::eos())
        } else {
            Ok(cursor)
        }
    }

    /// Descend to the leftmost (`first`) or rightmost leaf edge.
    fn edge_object(
        &mut self,
        root: PageId,
        kdesc: &KeyDesc,
        stop_key: Option<&KeyValue>,
        stop_op: CompOp,
        first: bool,
    ) -> Result<Cursor, EngineError> {
        let mut pid = root;
        loop {
            let mut pin = self.get_train(pid, BufKind::Page)?;
            let step = (|| {
                let flags = {
                    let view = SlottedPage::open(pin.bytes_mut())?;
                    view.flags()
                };
                if flags.contains(PageFlags::INTERNAL) {
                    let page = InternalPage::open(pin.bytes_mut())?;
                    let n = page.n_entries();
                    let child = if first || n == 0 {
                        page.p0()
                    } else {
                        page.child_at(n - 1)?
                    };
                    Ok::<(Option<PageNo>, usize), EngineError>((Some(child), 0))
                } else if flags.contains(PageFlags::LEAF) {
                    let leaf = LeafPage::open(pin.bytes_mut())?;
                    Ok((None, leaf.n_entries()))
                } else {
                    Err(BtreeError::BadPageType(pid, "index").into())
                }
            })();
            match step {
                Err(e) => {
                    let _ = self.free_train(pin);
                    return Err(e);
                }
                Ok((Some(child), _)) => {
                    self.free_train(pin)?;
                    pid = PageId::new(pid.vol_no, child);
                }
                Ok((None, 0)) => {
                    self.free_train(pin)?;
                    return Ok(Cursor::eos());
                }
                Ok((None, n)) => {
                    let slot = if first { 0 } else { n as i32 - 1 };
                    return self.load_cursor(pin, slot, kdesc, stop_key, stop_op, false);
                }
            }
        }
    }
}
