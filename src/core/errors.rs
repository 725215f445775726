use thiserror::Error;

use super::{ObjectId, PageId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("disk error: {0}")]
    Disk(#[from] DiskError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufError),

    #[error("page error: {0}")]
    Page(#[from] PageError),

    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    #[error("btree error: {0}")]
    Btree(#[from] BtreeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("volume corrupt: {0}")]
    Corrupt(String),

    #[error("page {0} out of range (volume has {1} pages)")]
    OutOfRange(i32, i32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufError {
    #[error("no unfixed buffer available")]
    NoUnfixedBuffer,

    #[error("train {0} is not resident")]
    NotResident(PageId),

    #[error("train {0} is not fixed")]
    NotFixed(PageId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("page full")]
    Full,

    #[error("page corrupt: {0}")]
    Corrupt(String),

    #[error("slot {0} is empty")]
    EmptySlot(i16),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("bad catalog object {0}")]
    BadCatalogObject(ObjectId),

    #[error("object {0} does not exist")]
    NoSuchObject(ObjectId),

    #[error("aligned length {0} exceeds the large-object threshold")]
    TooLarge(usize),

    #[error("read range {start}..{end} outside object of {len} bytes")]
    BadReadRange { start: usize, end: usize, len: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BtreeError {
    #[error("duplicate key")]
    DuplicateKey,

    #[error("key not found")]
    NotFound,

    #[error("page {0} is not a {1} page")]
    BadPageType(PageId, &'static str),

    #[error("cursor does not point at a live leaf entry")]
    BadCursor,

    #[error("bad key descriptor: {0}")]
    BadKeyDesc(&'static str),

    #[error("key of {0} bytes exceeds the maximum key length")]
    KeyTooLong(usize),

    #[error("malformed key value")]
    BadKeyValue,
}
