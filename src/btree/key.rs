//! Key descriptors and packed key values.
//!
//! A compound key is a concatenation of parts: `Int` parts are 4-byte
//! little-endian `i32`s, `VarString` parts carry a `u16` length prefix.
//! Comparison runs part by part.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::core::errors::BtreeError;

pub const MAX_KEY_LEN: usize = 256;
pub const MAX_KEY_PARTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Int,
    VarString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPart {
    pub kind: KeyKind,
    /// Declared maximum length of the part; informational for `VarString`.
    pub length: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDesc {
    pub parts: Vec<KeyPart>,
}

impl KeyDesc {
    pub fn single_int() -> Self {
        Self {
            parts: vec![KeyPart {
                kind: KeyKind::Int,
                length: 4,
            }],
        }
    }

    pub fn single_varstring(max_len: u16) -> Self {
        Self {
            parts: vec![KeyPart {
                kind: KeyKind::VarString,
                length: max_len,
            }],
        }
    }

    pub fn validate(&self) -> Result<(), BtreeError> {
        if self.parts.is_empty() {
            return Err(BtreeError::BadKeyDesc("no key parts"));
        }
        if self.parts.len() > MAX_KEY_PARTS {
            return Err(BtreeError::BadKeyDesc("too many key parts"));
        }
        Ok(())
    }
}

/// Packed bytes of a key, built part by part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyValue {
    bytes: Vec<u8>,
}

impl KeyValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_i32(value: i32) -> Self {
        Self::new().push_i32(value)
    }

    pub fn from_text(text: &str) -> Self {
        Self::new().push_text(text)
    }

    pub fn push_i32(mut self, value: i32) -> Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    pub fn push_text(mut self, text: &str) -> Self {
        let mut len = [0u8; 2];
        LittleEndian::write_u16(&mut len, text.len() as u16);
        self.bytes.extend_from_slice(&len);
        self.bytes.extend_from_slice(text.as_bytes());
        self
    }

    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the leading `Int` part, if any. Handy when inspecting
    /// cursors over integer keys.
    pub fn as_i32(&self) -> Option<i32> {
        if self.bytes.len() >= 4 {
            Some(LittleEndian::read_i32(&self.bytes))
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), BtreeError> {
        if self.bytes.is_empty() {
            return Err(BtreeError::BadKeyValue);
        }
        if self.bytes.len() > MAX_KEY_LEN {
            return Err(BtreeError::KeyTooLong(self.bytes.len()));
        }
        Ok(())
    }
}

/// Compare two packed keys under `kdesc`, part by part. Either side may
/// stop at a part boundary, making it a prefix of the other; exhausted
/// prefixes compare equal.
pub fn compare(kdesc: &KeyDesc, a: &[u8], b: &[u8]) -> Result<Ordering, BtreeError> {
    let mut ia = 0usize;
    let mut ib = 0usize;
    for part in &kdesc.parts {
        if ia == a.len() && ib == b.len() {
            break;
        }
        if ia >= a.len() || ib >= b.len() {
            break;
        }
        let ord = match part.kind {
            KeyKind::Int => {
                if ia + 4 > a.len() || ib + 4 > b.len() {
                    return Err(BtreeError::BadKeyValue);
                }
                let va = LittleEndian::read_i32(&a[ia..]);
                let vb = LittleEndian::read_i32(&b[ib..]);
                ia += 4;
                ib += 4;
                va.cmp(&vb)
            }
            KeyKind::VarString => {
                if ia + 2 > a.len() || ib + 2 > b.len() {
                    return Err(BtreeError::BadKeyValue);
                }
                let la = LittleEndian::read_u16(&a[ia..]) as usize;
                let lb = LittleEndian::read_u16(&b[ib..]) as usize;
                if ia + 2 + la > a.len() || ib + 2 + lb > b.len() {
                    return Err(BtreeError::BadKeyValue);
                }
                let sa = &a[ia + 2..ia + 2 + la];
                let sb = &b[ib + 2..ib + 2 + lb];
                ia += 2 + la;
                ib += 2 + lb;
                sa.cmp(sb)
            }
        };
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_keys_compare_numerically() {
        let kdesc = KeyDesc::single_int();
        let cases = [(-5, 3), (3, 3), (7, 3)];
        let expected = [Ordering::Less, Ordering::Equal, Ordering::Greater];
        for ((a, b), want) in cases.iter().zip(expected) {
            let ka = KeyValue::from_i32(*a);
            let kb = KeyValue::from_i32(*b);
            assert_eq!(
                compare(&kdesc, ka.as_bytes(), kb.as_bytes()).unwrap(),
                want,
                "{a} vs {b}"
            );
        }
    }

    #[test]
    fn varstring_keys_compare_bytewise_with_length_tiebreak() {
        let kdesc = KeyDesc::single_varstring(32);
        let ab = KeyValue::from_text("ab");
        let abc = KeyValue::from_text("abc");
        let b = KeyValue::from_text("b");
        assert_eq!(
            compare(&kdesc, ab.as_bytes(), abc.as_bytes()).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&kdesc, b.as_bytes(), abc.as_bytes()).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            compare(&kdesc, ab.as_bytes(), ab.as_bytes()).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn compound_keys_compare_lexicographically_by_part() {
        let kdesc = KeyDesc {
            parts: vec![
                KeyPart {
                    kind: KeyKind::Int,
                    length: 4,
                },
                KeyPart {
                    kind: KeyKind::VarString,
                    length: 16,
                },
            ],
        };
        let a = KeyValue::new().push_i32(1).push_text("zzz");
        let b = KeyValue::new().push_i32(2).push_text("aaa");
        let c = KeyValue::new().push_i32(2).push_text("bbb");
        assert_eq!(
            compare(&kdesc, a.as_bytes(), b.as_bytes()).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&kdesc, b.as_bytes(), c.as_bytes()).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn oversized_and_empty_keys_are_rejected() {
        assert_eq!(
            KeyValue::new().validate().unwrap_err(),
            BtreeError::BadKeyValue
        );
        let big = KeyValue::from_text(&"x".repeat(MAX_KEY_LEN + 1));
        assert!(matches!(
            big.validate().unwrap_err(),
            BtreeError::KeyTooLong(_)
        ));
    }
}
