//! Binary search within index pages.
//!
//! Both flavors return `(found, idx)`. On a miss, `idx` is the greatest
//! slot whose key is less than the search key, `-1` when every key is
//! greater. Internal routing uses that convention directly: `-1` picks
//! `p0`, anything else picks the indexed entry's child.

use std::cmp::Ordering;

use crate::core::errors::EngineError;

use super::key::{self, KeyDesc};
use super::page::{InternalPage, LeafPage};

pub(crate) fn search_leaf(
    page: &LeafPage<'_>,
    kdesc: &KeyDesc,
    key: &[u8],
) -> Result<(bool, i16), EngineError> {
    let mut low: i32 = 0;
    let mut high: i32 = page.n_entries() as i32 - 1;
    while low <= high {
        let mid = (low + high) / 2;
        match key::compare(kdesc, key, page.key_at(mid as usize)?)? {
            Ordering::Greater => low = mid + 1,
            Ordering::Less => high = mid - 1,
            Ordering::Equal => return Ok((true, mid as i16)),
        }
    }
    Ok((false, high as i16))
}

pub(crate) fn search_internal(
    page: &InternalPage<'_>,
    kdesc: &KeyDesc,
    key: &[u8],
) -> Result<(bool, i16), EngineError> {
    let mut low: i32 = 0;
    let mut high: i32 = page.n_entries() as i32 - 1;
    while low <= high {
        let mid = (low + high) / 2;
        match key::compare(kdesc, key, page.key_at(mid as usize)?)? {
            Ordering::Greater => low = mid + 1,
            Ordering::Less => high = mid - 1,
            Ordering::Equal => return Ok((true, mid as i16)),
        }
    }
    Ok((false, high as i16))
}
