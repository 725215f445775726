use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use log::trace;

use crate::core::errors::DiskError;
use crate::core::{PageId, PageNo, VolNo, EXTENT_PAGES, NIL_PAGE, PAGE_SIZE, TRAIN_PAGES};

const MAGIC: [u8; 8] = *b"RAILVOL1";
const VERSION: u16 = 1;
const CHECKSUM_SIZE: usize = 4;
const HEADER_FIXED_SIZE: usize = 8 + 2 + 4 + 2 + 4 + 4 + 4 + 4;
const HEADER_PAYLOAD: usize = PAGE_SIZE - CHECKSUM_SIZE;

/// Extent number a page belongs to. The allocator prefers handing out pages
/// from the extent of the `near` hint.
pub fn page_to_extent(page_no: PageNo) -> PageNo {
    page_no / EXTENT_PAGES
}

/// A volume file: one checksummed header page followed by raw pages.
///
/// The header carries the free-page and free-train lists and the location of
/// the catalog page; everything else on the volume is opaque to this layer.
/// Page 0 is reserved for the header itself.
#[derive(Debug)]
pub struct Volume {
    path: PathBuf,
    file: File,
    vol_no: VolNo,
    num_pages: PageNo,
    catalog_page: PageNo,
    free_pages: Vec<PageNo>,
    free_trains: Vec<PageNo>,
}

impl Volume {
    pub fn create<P: AsRef<Path>>(path: P, vol_no: VolNo) -> Result<Self, DiskError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() && path.metadata()?.len() > 0 {
            return Err(DiskError::Corrupt(format!("file already exists: {path:?}")));
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(PAGE_SIZE as u64)?;

        let mut volume = Self {
            path,
            file,
            vol_no,
            num_pages: 1,
            catalog_page: NIL_PAGE,
            free_pages: Vec::new(),
            free_trains: Vec::new(),
        };
        volume.write_header()?;
        volume.file.sync_all()?;
        Ok(volume)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DiskError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(DiskError::Corrupt(format!("file not found: {path:?}")));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut page0 = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut page0)
            .map_err(|_| DiskError::Corrupt("short read on volume header".into()))?;

        let stored_checksum = LittleEndian::read_u32(&page0[..CHECKSUM_SIZE]);
        let payload = &page0[CHECKSUM_SIZE..];
        if crc32(payload) != stored_checksum {
            return Err(DiskError::Corrupt("volume header checksum mismatch".into()));
        }

        let mut rdr = std::io::Cursor::new(payload);
        let mut magic = [0u8; 8];
        rdr.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(DiskError::Corrupt("invalid volume magic".into()));
        }
        let version = rdr.read_u16::<LittleEndian>()?;
        if version != VERSION {
            return Err(DiskError::Corrupt(format!("unsupported version: {version}")));
        }
        let page_size = rdr.read_u32::<LittleEndian>()? as usize;
        if page_size != PAGE_SIZE {
            return Err(DiskError::Corrupt(format!("unexpected page size: {page_size}")));
        }
        let vol_no = rdr.read_i16::<LittleEndian>()?;
        let num_pages = rdr.read_i32::<LittleEndian>()?;
        let catalog_page = rdr.read_i32::<LittleEndian>()?;
        let free_page_count = rdr.read_u32::<LittleEndian>()?;
        let free_train_count = rdr.read_u32::<LittleEndian>()?;

        let mut free_pages = Vec::with_capacity(free_page_count as usize);
        for _ in 0..free_page_count {
            free_pages.push(rdr.read_i32::<LittleEndian>()?);
        }
        let mut free_trains = Vec::with_capacity(free_train_count as usize);
        for _ in 0..free_train_count {
            free_trains.push(rdr.read_i32::<LittleEndian>()?);
        }

        Ok(Self {
            path,
            file,
            vol_no,
            num_pages,
            catalog_page,
            free_pages,
            free_trains,
        })
    }

    pub fn vol_no(&self) -> VolNo {
        self.vol_no
    }

    pub fn num_pages(&self) -> PageNo {
        self.num_pages
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Page holding the catalog objects, recorded by the engine at format
    /// time.
    pub fn catalog_page(&self) -> PageNo {
        self.catalog_page
    }

    pub fn set_catalog_page(&mut self, page_no: PageNo) -> Result<(), DiskError> {
        self.catalog_page = page_no;
        self.write_header()
    }

    fn write_header(&mut self) -> Result<(), DiskError> {
        let mut payload = Vec::with_capacity(HEADER_FIXED_SIZE);
        payload.extend_from_slice(&MAGIC);
        payload.write_u16::<LittleEndian>(VERSION)?;
        payload.write_u32::<LittleEndian>(PAGE_SIZE as u32)?;
        payload.write_i16::<LittleEndian>(self.vol_no)?;
        payload.write_i32::<LittleEndian>(self.num_pages)?;
        payload.write_i32::<LittleEndian>(self.catalog_page)?;
        payload.write_u32::<LittleEndian>(self.free_pages.len() as u32)?;
        payload.write_u32::<LittleEndian>(self.free_trains.len() as u32)?;
        for page_no in &self.free_pages {
            payload.write_i32::<LittleEndian>(*page_no)?;
        }
        for page_no in &self.free_trains {
            payload.write_i32::<LittleEndian>(*page_no)?;
        }
        if payload.len() > HEADER_PAYLOAD {
            return Err(DiskError::Corrupt(
                "free-list metadata exceeds header payload".into(),
            ));
        }
        payload.resize(HEADER_PAYLOAD, 0);

        let checksum = crc32(&payload);
        self.file.seek(SeekFrom::Start(0))?;
        let mut writer = std::io::BufWriter::new(&mut self.file);
        writer.write_u32::<LittleEndian>(checksum)?;
        writer.write_all(&payload)?;
        writer.flush()?;
        Ok(())
    }

    fn check_range(&self, pid: PageId, pages: usize) -> Result<(), DiskError> {
        if pid.page_no < 1 {
            return Err(DiskError::OutOfRange(pid.page_no, self.num_pages));
        }
        let end = pid.page_no as i64 + pages as i64;
        if end > self.num_pages as i64 {
            return Err(DiskError::OutOfRange(pid.page_no, self.num_pages));
        }
        Ok(())
    }

    /// Read a whole train (`buf.len()` bytes, a page-size multiple) starting
    /// at `pid`.
    pub fn read_train(&mut self, pid: PageId, buf: &mut [u8]) -> Result<(), DiskError> {
        debug_assert_eq!(buf.len() % PAGE_SIZE, 0);
        self.check_range(pid, buf.len() / PAGE_SIZE)?;
        let offset = pid.page_no as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .read_exact(buf)
            .map_err(|_| DiskError::Corrupt(format!("short read for train {pid}")))?;
        Ok(())
    }

    /// Write a whole train starting at `pid`.
    pub fn write_train(&mut self, pid: PageId, bytes: &[u8]) -> Result<(), DiskError> {
        debug_assert_eq!(bytes.len() % PAGE_SIZE, 0);
        self.check_range(pid, bytes.len() / PAGE_SIZE)?;
        let offset = pid.page_no as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.file.flush()?;
        Ok(())
    }

    /// Allocate one page, preferring a freed page from the extent of `near`.
    pub fn alloc_page(&mut self, near: Option<PageNo>) -> Result<PageNo, DiskError> {
        if let Some(near) = near {
            let ext = page_to_extent(near);
            if let Some(pos) = self
                .free_pages
                .iter()
                .position(|p| page_to_extent(*p) == ext)
            {
                let page_no = self.free_pages.swap_remove(pos);
                self.write_header()?;
                trace!("alloc page {page_no} (reused near extent {ext})");
                return Ok(page_no);
            }
        }
        if let Some(page_no) = self.free_pages.pop() {
            self.write_header()?;
            trace!("alloc page {page_no} (reused)");
            return Ok(page_no);
        }

        let page_no = self.grow(1)?;
        trace!("alloc page {page_no} (grown)");
        Ok(page_no)
    }

    /// Allocate a train: `TRAIN_PAGES` consecutive pages on a train-aligned
    /// boundary.
    pub fn alloc_train(&mut self) -> Result<PageNo, DiskError> {
        if let Some(page_no) = self.free_trains.pop() {
            self.write_header()?;
            trace!("alloc train {page_no} (reused)");
            return Ok(page_no);
        }

        // Pad out to a train boundary; the pad pages stay usable as pages.
        while self.num_pages % TRAIN_PAGES as PageNo != 0 {
            let pad = self.grow(1)?;
            self.free_pages.push(pad);
        }
        let page_no = self.grow(TRAIN_PAGES as PageNo)?;
        self.write_header()?;
        trace!("alloc train {page_no} (grown)");
        Ok(page_no)
    }

    pub fn free_page(&mut self, page_no: PageNo) -> Result<(), DiskError> {
        self.check_freeable(page_no, 1)?;
        self.free_pages.push(page_no);
        self.write_header()
    }

    pub fn free_train(&mut self, page_no: PageNo) -> Result<(), DiskError> {
        self.check_freeable(page_no, TRAIN_PAGES)?;
        self.free_trains.push(page_no);
        self.write_header()
    }

    fn check_freeable(&self, page_no: PageNo, pages: usize) -> Result<(), DiskError> {
        if page_no < 1 || page_no as i64 + pages as i64 > self.num_pages as i64 {
            return Err(DiskError::OutOfRange(page_no, self.num_pages));
        }
        if page_no == self.catalog_page {
            return Err(DiskError::Corrupt("cannot free the catalog page".into()));
        }
        Ok(())
    }

    fn grow(&mut self, pages: PageNo) -> Result<PageNo, DiskError> {
        let first = self.num_pages;
        self.num_pages += pages;
        self.file.set_len(self.num_pages as u64 * PAGE_SIZE as u64)?;
        self.write_header()?;
        Ok(first)
    }

    pub fn sync_all(&mut self) -> Result<(), DiskError> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<(), DiskError> {
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
