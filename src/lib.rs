//! railcar: a learning-oriented object-storage engine.
//!
//! Three layers turn a raw volume of fixed-size disk units ("trains")
//! into a navigable collection of variable-length records indexed by
//! B+ trees:
//!
//! - the **buffer manager** caches trains in two fixed pools with pin
//!   counts, dirty tracking and second-chance replacement;
//! - the **object manager** stores records in slotted pages, keeps
//!   per-file available-space lists and walks files sequentially;
//! - the **B+ tree manager** maintains persistent unique-key indexes
//!   with recursive split/underflow propagation, a stable root page and
//!   leaf-chained range scans.
//!
//! Everything hangs off [`Engine`], the single owned context threaded
//! through all operations. There is no concurrency, no transactions and
//! no recovery: one caller, explicit flushes.
//!
//! ```no_run
//! use railcar::{CompOp, Engine, EngineConfig, KeyDesc, KeyValue};
//!
//! let config = EngineConfig::default();
//! let mut engine = Engine::create("/tmp/demo.rc", 0, &config).unwrap();
//!
//! let file = engine.create_data_file(1, 100).unwrap();
//! let oid = engine.create_object(&file, None, 0, b"hello").unwrap();
//!
//! let index = engine.create_index_file(2).unwrap();
//! let root = engine.create_index(&index).unwrap();
//! let kdesc = KeyDesc::single_int();
//! engine
//!     .insert_object(&index, root, &kdesc, &KeyValue::from_i32(42), oid)
//!     .unwrap();
//!
//! let cursor = engine
//!     .fetch(root, &kdesc, Some(&KeyValue::from_i32(42)), CompOp::Eq, None, CompOp::Eof)
//!     .unwrap();
//! assert_eq!(cursor.oid, oid);
//! ```

mod core;
mod engine;

pub mod btree;
pub mod storage;

pub use crate::btree::key::{KeyDesc, KeyKind, KeyPart, KeyValue, MAX_KEY_LEN, MAX_KEY_PARTS};
pub use crate::btree::{CompOp, Cursor, CursorFlag};
pub use crate::core::config::EngineConfig;
pub use crate::core::errors::{
    BtreeError, BufError, DiskError, EngineError, ObjectError, PageError,
};
pub use crate::core::{
    aligned_length, FileId, ObjectId, PageId, PageNo, VolNo, EXTENT_PAGES, NIL_PAGE, PAGE_SIZE,
    TRAIN_PAGES, TRAIN_SIZE,
};
pub use crate::engine::Engine;
pub use crate::storage::buffer::{BufKind, BufMgr, PinnedTrain};
pub use crate::storage::catalog::{BtreeCatEntry, DataCatEntry, AVAIL_BANDS, CATALOG_FID};
pub use crate::storage::dealloc::{DeallocElem, DeallocKind, DeallocList};
pub use crate::storage::object::{ObjectHeader, LARGE_OBJECT_THRESHOLD, OBJECT_HEADER_SIZE};
pub use crate::storage::page::{
    PageFlags, SlottedPage, DATA_CAPACITY, EMPTY_SLOT, HEADER_SIZE, SLOT_SIZE,
};
pub use crate::storage::volume::{page_to_extent, Volume};
