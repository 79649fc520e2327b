//! Row-key encoding: hash and range doc keys, tuple ids, doc paths.
//!
//! Two encodings coexist. A *hash doc key* covers the partition bucket:
//! hash code plus hash column values. A *range doc key* adds the range
//! column values and identifies one row; its encoded form doubles as
//! the opaque tuple id handed back to clients. Encodings are
//! order-preserving so that encoded keys sort in
//! `(hash_code, hash_components, range_components)` order.

use crate::core::error::{Result, Status};
use crate::plan::schema::ColumnId;
use crate::plan::value::Value;
use bytes::Bytes;

// Component type tags. Tag order matters only within one column, where
// all values share a tag.
const TAG_NULL: u8 = b'$';
const TAG_FALSE: u8 = b'F';
const TAG_TRUE: u8 = b'T';
const TAG_INT32: u8 = b'H';
const TAG_INT64: u8 = b'I';
const TAG_DOUBLE: u8 = b'D';
const TAG_STRING: u8 = b'S';
const TAG_BINARY: u8 = b'B';
const TAG_TIMESTAMP: u8 = b'M';
const TAG_HASH_CODE: u8 = b'G';
const TAG_GROUP_END: u8 = b'!';
const TAG_COLUMN_ID: u8 = b'C';
const TAG_SYSTEM_COLUMN: u8 = b'#';

/// Id of the liveness system column written on insert to materialize
/// the row even when every user column is null.
pub const LIVENESS_COLUMN_ID: i32 = 0;

/// One key component.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyEntry {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Str(Bytes),
    Binary(Bytes),
    Timestamp(i64),
}

impl KeyEntry {
    pub fn from_value(value: &Value) -> Result<KeyEntry> {
        Ok(match value {
            Value::Null => KeyEntry::Null,
            Value::Bool(b) => KeyEntry::Bool(*b),
            Value::Int32(v) => KeyEntry::Int32(*v),
            Value::Int64(v) => KeyEntry::Int64(*v),
            Value::Double(v) => KeyEntry::Double(*v),
            Value::String(s) => KeyEntry::Str(Bytes::copy_from_slice(s.as_bytes())),
            Value::Binary(b) => KeyEntry::Binary(b.clone()),
            Value::Timestamp(v) => KeyEntry::Timestamp(*v),
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            KeyEntry::Null => Value::Null,
            KeyEntry::Bool(b) => Value::Bool(*b),
            KeyEntry::Int32(v) => Value::Int32(*v),
            KeyEntry::Int64(v) => Value::Int64(*v),
            KeyEntry::Double(v) => Value::Double(*v),
            KeyEntry::Str(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
            KeyEntry::Binary(b) => Value::Binary(b.clone()),
            KeyEntry::Timestamp(v) => Value::Timestamp(*v),
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            KeyEntry::Null => buf.push(TAG_NULL),
            KeyEntry::Bool(false) => buf.push(TAG_FALSE),
            KeyEntry::Bool(true) => buf.push(TAG_TRUE),
            KeyEntry::Int32(v) => {
                buf.push(TAG_INT32);
                buf.extend_from_slice(&(*v as u32 ^ 0x8000_0000).to_be_bytes());
            }
            KeyEntry::Int64(v) => {
                buf.push(TAG_INT64);
                buf.extend_from_slice(&order_preserving_i64(*v));
            }
            KeyEntry::Timestamp(v) => {
                buf.push(TAG_TIMESTAMP);
                buf.extend_from_slice(&order_preserving_i64(*v));
            }
            KeyEntry::Double(v) => {
                buf.push(TAG_DOUBLE);
                buf.extend_from_slice(&order_preserving_f64(*v));
            }
            KeyEntry::Str(s) => {
                buf.push(TAG_STRING);
                encode_zero_escaped(s, buf);
            }
            KeyEntry::Binary(b) => {
                buf.push(TAG_BINARY);
                encode_zero_escaped(b, buf);
            }
        }
    }

    fn decode(data: &[u8]) -> Result<(KeyEntry, usize)> {
        let tag = *data
            .first()
            .ok_or_else(|| Status::corruption("truncated key component"))?;
        let body = &data[1..];
        match tag {
            TAG_NULL => Ok((KeyEntry::Null, 1)),
            TAG_FALSE => Ok((KeyEntry::Bool(false), 1)),
            TAG_TRUE => Ok((KeyEntry::Bool(true), 1)),
            TAG_INT32 => {
                let raw = take_array::<4>(body)?;
                let value = (u32::from_be_bytes(raw) ^ 0x8000_0000) as i32;
                Ok((KeyEntry::Int32(value), 5))
            }
            TAG_INT64 => {
                let raw = take_array::<8>(body)?;
                Ok((KeyEntry::Int64(decode_i64(raw)), 9))
            }
            TAG_TIMESTAMP => {
                let raw = take_array::<8>(body)?;
                Ok((KeyEntry::Timestamp(decode_i64(raw)), 9))
            }
            TAG_DOUBLE => {
                let raw = take_array::<8>(body)?;
                Ok((KeyEntry::Double(decode_f64(raw)), 9))
            }
            TAG_STRING => {
                let (bytes, used) = decode_zero_escaped(body)?;
                Ok((KeyEntry::Str(bytes), used + 1))
            }
            TAG_BINARY => {
                let (bytes, used) = decode_zero_escaped(body)?;
                Ok((KeyEntry::Binary(bytes), used + 1))
            }
            other => Err(Status::corruption(format!(
                "unknown key component tag {:#04x}",
                other
            ))),
        }
    }
}

fn order_preserving_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

fn decode_i64(raw: [u8; 8]) -> i64 {
    (u64::from_be_bytes(raw) ^ 0x8000_0000_0000_0000) as i64
}

fn order_preserving_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let mapped = if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    };
    mapped.to_be_bytes()
}

fn decode_f64(raw: [u8; 8]) -> f64 {
    let mapped = u64::from_be_bytes(raw);
    let bits = if mapped & 0x8000_0000_0000_0000 != 0 {
        mapped & !0x8000_0000_0000_0000
    } else {
        !mapped
    };
    f64::from_bits(bits)
}

// Zero bytes escape to 0x00 0x01 and the component terminates with
// 0x00 0x00, keeping prefix order intact.
fn encode_zero_escaped(data: &[u8], buf: &mut Vec<u8>) {
    for &b in data {
        if b == 0 {
            buf.extend_from_slice(&[0, 1]);
        } else {
            buf.push(b);
        }
    }
    buf.extend_from_slice(&[0, 0]);
}

fn decode_zero_escaped(data: &[u8]) -> Result<(Bytes, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        let b = *data
            .get(i)
            .ok_or_else(|| Status::corruption("unterminated key component"))?;
        if b != 0 {
            out.push(b);
            i += 1;
            continue;
        }
        let next = *data
            .get(i + 1)
            .ok_or_else(|| Status::corruption("unterminated key component"))?;
        match next {
            0 => return Ok((Bytes::from(out), i + 2)),
            1 => {
                out.push(0);
                i += 2;
            }
            other => {
                return Err(Status::corruption(format!(
                    "invalid escape byte {:#04x} in key component",
                    other
                )))
            }
        }
    }
}

fn take_array<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or_else(|| Status::corruption("truncated key component"))
}

/// Partition hash code of a row's hash components.
///
/// Hashes the order-preserving encoding so equal component lists hash
/// identically regardless of how the caller produced them.
pub fn hash_code_for(hashed_components: &[KeyEntry]) -> u16 {
    use std::hash::Hasher;
    let mut buf = Vec::with_capacity(16);
    for entry in hashed_components {
        entry.encode(&mut buf);
    }
    let mut hasher = twox_hash::XxHash64::with_seed(0);
    hasher.write(&buf);
    (hasher.finish() & 0xFFFF) as u16
}

/// An encoded row key: optional hash portion plus range components.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocKey {
    pub hash_code: Option<u16>,
    pub hashed_components: Vec<KeyEntry>,
    pub range_components: Vec<KeyEntry>,
}

impl DocKey {
    /// Hash portion only: identifies the partition bucket.
    pub fn new_hash(hash_code: u16, hashed_components: Vec<KeyEntry>) -> Self {
        Self {
            hash_code: Some(hash_code),
            hashed_components,
            range_components: Vec::new(),
        }
    }

    /// Range components only: tables without a hash portion.
    pub fn new_range(range_components: Vec<KeyEntry>) -> Self {
        Self {
            hash_code: None,
            hashed_components: Vec::new(),
            range_components,
        }
    }

    pub fn new(
        hash_code: u16,
        hashed_components: Vec<KeyEntry>,
        range_components: Vec<KeyEntry>,
    ) -> Self {
        Self {
            hash_code: Some(hash_code),
            hashed_components,
            range_components,
        }
    }

    /// The empty-group key: routes by tablet only, no primary key.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(16);
        if let Some(hash_code) = self.hash_code {
            buf.push(TAG_HASH_CODE);
            buf.extend_from_slice(&hash_code.to_be_bytes());
            for entry in &self.hashed_components {
                entry.encode(&mut buf);
            }
            buf.push(TAG_GROUP_END);
        }
        for entry in &self.range_components {
            entry.encode(&mut buf);
        }
        buf.push(TAG_GROUP_END);
        Bytes::from(buf)
    }

    pub fn decode(data: &[u8]) -> Result<DocKey> {
        let mut key = DocKey::default();
        let mut pos = 0;
        if data.first() == Some(&TAG_HASH_CODE) {
            let raw = take_array::<2>(&data[1..])?;
            key.hash_code = Some(u16::from_be_bytes(raw));
            pos = 3;
            loop {
                match data.get(pos) {
                    Some(&TAG_GROUP_END) => {
                        pos += 1;
                        break;
                    }
                    Some(_) => {
                        let (entry, used) = KeyEntry::decode(&data[pos..])?;
                        key.hashed_components.push(entry);
                        pos += used;
                    }
                    None => return Err(Status::corruption("doc key missing group end")),
                }
            }
        }
        loop {
            match data.get(pos) {
                Some(&TAG_GROUP_END) => {
                    pos += 1;
                    break;
                }
                Some(_) => {
                    let (entry, used) = KeyEntry::decode(&data[pos..])?;
                    key.range_components.push(entry);
                    pos += used;
                }
                None => return Err(Status::corruption("doc key missing group end")),
            }
        }
        if pos != data.len() {
            return Err(Status::corruption("trailing bytes after doc key"));
        }
        Ok(key)
    }
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocKey(")?;
        if let Some(code) = self.hash_code {
            write!(f, "0x{:04x}, {:?}, ", code, self.hashed_components)?;
        }
        write!(f, "{:?})", self.range_components)
    }
}

/// Target of one sub-document mutation: an encoded row key plus an
/// optional column beneath it.
#[derive(Debug, Clone, PartialEq)]
pub struct DocPath {
    pub root: Bytes,
    pub sub: SubPath,
}

/// The sub-document addressed within a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubPath {
    /// The whole row.
    Row,
    /// One declared column.
    Column(ColumnId),
    /// The liveness system column.
    Liveness,
}

impl DocPath {
    pub fn row(root: Bytes) -> Self {
        Self {
            root,
            sub: SubPath::Row,
        }
    }

    pub fn column(root: Bytes, id: ColumnId) -> Self {
        Self {
            root,
            sub: SubPath::Column(id),
        }
    }

    pub fn liveness(root: Bytes) -> Self {
        Self {
            root,
            sub: SubPath::Liveness,
        }
    }

    /// Full encoded byte path, for lock manager consumption.
    pub fn encoded(&self) -> Bytes {
        match self.sub {
            SubPath::Row => self.root.clone(),
            SubPath::Column(id) => {
                let mut buf = Vec::with_capacity(self.root.len() + 5);
                buf.extend_from_slice(&self.root);
                buf.push(TAG_COLUMN_ID);
                buf.extend_from_slice(&(id.0 as u32 ^ 0x8000_0000).to_be_bytes());
                Bytes::from(buf)
            }
            SubPath::Liveness => {
                let mut buf = Vec::with_capacity(self.root.len() + 2);
                buf.extend_from_slice(&self.root);
                buf.push(TAG_SYSTEM_COLUMN);
                buf.push(LIVENESS_COLUMN_ID as u8);
                Bytes::from(buf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_key_roundtrip_hash_and_range() {
        let key = DocKey::new(
            0xBEEF,
            vec![KeyEntry::Int64(42)],
            vec![KeyEntry::Str(Bytes::from_static(b"row")), KeyEntry::Int64(-1)],
        );
        let encoded = key.encode();
        let decoded = DocKey::decode(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_doc_key_roundtrip_range_only() {
        let key = DocKey::new_range(vec![KeyEntry::Str(Bytes::from_static(b"pk"))]);
        let decoded = DocKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(decoded.hash_code, None);
    }

    #[test]
    fn test_empty_group_key() {
        let encoded = DocKey::empty().encode();
        assert_eq!(encoded.as_ref(), &[TAG_GROUP_END]);
        assert_eq!(DocKey::decode(&encoded).unwrap(), DocKey::empty());
    }

    #[test]
    fn test_int64_encoding_orders() {
        let values = [i64::MIN, -5, 0, 3, i64::MAX];
        let mut encoded: Vec<Vec<u8>> = values
            .iter()
            .map(|&v| {
                let mut buf = Vec::new();
                KeyEntry::Int64(v).encode(&mut buf);
                buf
            })
            .collect();
        let sorted = encoded.clone();
        encoded.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn test_double_encoding_orders() {
        let values = [f64::NEG_INFINITY, -2.5, 0.0, 1.0, f64::INFINITY];
        let mut encoded: Vec<Vec<u8>> = values
            .iter()
            .map(|&v| {
                let mut buf = Vec::new();
                KeyEntry::Double(v).encode(&mut buf);
                buf
            })
            .collect();
        let sorted = encoded.clone();
        encoded.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn test_string_with_zero_bytes_roundtrip() {
        let key = DocKey::new_range(vec![KeyEntry::Binary(Bytes::from_static(b"a\x00b\x00"))]);
        let decoded = DocKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_string_prefix_orders_before_longer() {
        let mut a = Vec::new();
        KeyEntry::Str(Bytes::from_static(b"ab")).encode(&mut a);
        let mut b = Vec::new();
        KeyEntry::Str(Bytes::from_static(b"ab0")).encode(&mut b);
        assert!(a < b);
    }

    #[test]
    fn test_truncated_key_is_corruption() {
        let key = DocKey::new_range(vec![KeyEntry::Int64(5)]);
        let encoded = key.encode();
        let err = DocKey::decode(&encoded[..encoded.len() - 2]).unwrap_err();
        assert!(matches!(err, Status::Corruption(_)));
    }

    #[test]
    fn test_doc_path_encodings_diverge() {
        let root = DocKey::new_range(vec![KeyEntry::Int64(1)]).encode();
        let row = DocPath::row(root.clone()).encoded();
        let liveness = DocPath::liveness(root.clone()).encoded();
        let column = DocPath::column(root.clone(), ColumnId(3)).encoded();
        assert!(liveness.starts_with(&row));
        assert!(column.starts_with(&row));
        assert_ne!(liveness, column);
    }
}
