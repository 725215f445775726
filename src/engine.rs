//! The engine shell: one volume plus the buffer manager, threaded through
//! every object and index operation as a single owned context.

use std::path::Path;

use crate::core::config::EngineConfig;
use crate::core::errors::{DiskError, EngineError};
use crate::core::{PageId, PageNo, VolNo, NIL_PAGE};
use crate::storage::buffer::{BufKind, BufMgr, PinnedTrain};
use crate::storage::dealloc::{DeallocKind, DeallocList};
use crate::storage::page::{PageFlags, SlottedPage};
use crate::storage::volume::Volume;

#[derive(Debug)]
pub struct Engine {
    disk: Volume,
    buf: BufMgr,
    catalog_page: PageNo,
}

impl Engine {
    /// Create a fresh volume with an empty catalog page.
    pub fn create<P: AsRef<Path>>(
        path: P,
        vol_no: VolNo,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let mut disk = Volume::create(path, vol_no)?;
        let mut buf = BufMgr::new(config);

        let page_no = disk.alloc_page(None)?;
        disk.set_catalog_page(page_no)?;
        let pid = PageId::new(vol_no, page_no);
        let mut pin = buf.get_new_train(&mut disk, pid, BufKind::Page)?;
        SlottedPage::init(pin.bytes_mut(), pid, crate::storage::catalog::CATALOG_FID, PageFlags::SLOTTED)?;
        buf.set_dirty(&pin)?;
        buf.free_train(pin)?;

        let mut engine = Self {
            disk,
            buf,
            catalog_page: page_no,
        };
        engine.flush_all()?;
        Ok(engine)
    }

    /// Open an existing volume.
    pub fn open<P: AsRef<Path>>(path: P, config: &EngineConfig) -> Result<Self, EngineError> {
        let disk = Volume::open(path)?;
        let catalog_page = disk.catalog_page();
        if catalog_page == NIL_PAGE {
            return Err(DiskError::Corrupt("volume has no catalog page".into()).into());
        }
        Ok(Self {
            disk,
            buf: BufMgr::new(config),
            catalog_page,
        })
    }

    pub fn vol_no(&self) -> VolNo {
        self.disk.vol_no()
    }

    pub fn disk(&self) -> &Volume {
        &self.disk
    }

    pub fn buf(&self) -> &BufMgr {
        &self.buf
    }

    pub(crate) fn catalog_page_no(&self) -> PageNo {
        self.catalog_page
    }

    /// Pin the train holding `pid`, reading it on a miss.
    pub fn get_train(&mut self, pid: PageId, kind: BufKind) -> Result<PinnedTrain, EngineError> {
        self.buf.get_train(&mut self.disk, pid, kind)
    }

    /// Pin `pid` without the disk read; the caller overwrites it.
    pub fn get_new_train(&mut self, pid: PageId, kind: BufKind) -> Result<PinnedTrain, EngineError> {
        self.buf.get_new_train(&mut self.disk, pid, kind)
    }

    /// Publish a pin's bytes and mark the frame dirty.
    pub fn set_dirty(&mut self, pin: &PinnedTrain) -> Result<(), EngineError> {
        self.buf.set_dirty(pin)?;
        Ok(())
    }

    /// Release a pin.
    pub fn free_train(&mut self, pin: PinnedTrain) -> Result<(), EngineError> {
        self.buf.free_train(pin)?;
        Ok(())
    }

    /// Pin the page `pid`, apply `f` to its slotted view, publish and
    /// release. The pin is released on the error path too.
    pub(crate) fn with_page<F>(&mut self, pid: PageId, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut SlottedPage<'_>) -> Result<(), crate::core::errors::PageError>,
    {
        let mut pin = self.get_train(pid, BufKind::Page)?;
        let result = (|| {
            let mut view = SlottedPage::open(pin.bytes_mut())?;
            f(&mut view)
        })();
        match result {
            Ok(()) => self.release(pin, true),
            Err(e) => {
                let _ = self.release(pin, false);
                Err(e.into())
            }
        }
    }

    /// Release a pin, publishing it first when `dirty`. Frees the pin even
    /// if publishing fails.
    pub(crate) fn release(&mut self, pin: PinnedTrain, dirty: bool) -> Result<(), EngineError> {
        let published = if dirty {
            self.set_dirty(&pin)
        } else {
            Ok(())
        };
        let freed = self.free_train(pin);
        published.and(freed)
    }

    /// Write every dirty buffer back and sync the volume.
    pub fn flush_all(&mut self) -> Result<(), EngineError> {
        self.buf.flush_all(&mut self.disk)?;
        self.disk.sync_all()?;
        Ok(())
    }

    /// Drop all buffer residency without flushing.
    pub fn discard_all(&mut self) {
        self.buf.discard_all();
    }

    /// Return every page queued on `dl` to the volume free lists.
    pub fn apply_dealloc(&mut self, dl: &mut DeallocList) -> Result<(), EngineError> {
        for elem in dl.drain() {
            match elem.kind {
                DeallocKind::Page => self.disk.free_page(elem.pid.page_no)?,
                DeallocKind::Train => self.disk.free_train(elem.pid.page_no)?,
            }
        }
        Ok(())
    }

    /// Allocate a raw page, preferring the extent of `near`.
    pub(crate) fn alloc_page_near(&mut self, near: Option<PageNo>) -> Result<PageNo, EngineError> {
        Ok(self.disk.alloc_page(near)?)
    }

    pub fn close(mut self) -> Result<(), EngineError> {
        self.buf.flush_all(&mut self.disk)?;
        self.disk.close()?;
        Ok(())
    }
}
