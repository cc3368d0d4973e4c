//! AMQP field tables and the typed values they carry
//!
//! A field table is a u32 byte-length prefix followed by (short-string key,
//! tagged value) pairs. The value tag is a single ASCII byte. Tables nest
//! through the `F` (table) and `A` (array) tags.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::util::{
    ensure, get_bytes, get_f32, get_f64, get_i16, get_i32, get_i64, get_i8, get_long_str, get_u16,
    get_u32, get_u64, get_u8, put_long_bytes, put_long_str, put_short_str,
};

/// A decimal value: `raw` scaled down by 10^`scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decimal {
    /// Number of decimal digits after the point
    pub scale: u8,
    /// Unscaled value
    pub raw: i32,
}

/// A single typed value in a field table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// `t` boolean
    Bool(bool),
    /// `b` signed 8-bit integer
    I8(i8),
    /// `B` unsigned 8-bit integer
    U8(u8),
    /// `s` signed 16-bit integer
    I16(i16),
    /// `u` unsigned 16-bit integer
    U16(u16),
    /// `I` signed 32-bit integer
    I32(i32),
    /// `i` unsigned 32-bit integer
    U32(u32),
    /// `l` signed 64-bit integer
    I64(i64),
    /// `f` 32-bit float
    F32(f32),
    /// `d` 64-bit float
    F64(f64),
    /// `D` decimal
    Decimal(Decimal),
    /// `S` long string
    Str(String),
    /// `A` array of values
    Array(Vec<FieldValue>),
    /// `T` timestamp, seconds since the epoch on the wire
    Timestamp(DateTime<Utc>),
    /// `F` nested table
    Table(FieldTable),
    /// `V` void
    Void,
    /// `x` byte array
    Bytes(Vec<u8>),
}

impl FieldValue {
    fn tag(&self) -> u8 {
        match self {
            FieldValue::Bool(_) => b't',
            FieldValue::I8(_) => b'b',
            FieldValue::U8(_) => b'B',
            FieldValue::I16(_) => b's',
            FieldValue::U16(_) => b'u',
            FieldValue::I32(_) => b'I',
            FieldValue::U32(_) => b'i',
            FieldValue::I64(_) => b'l',
            FieldValue::F32(_) => b'f',
            FieldValue::F64(_) => b'd',
            FieldValue::Decimal(_) => b'D',
            FieldValue::Str(_) => b'S',
            FieldValue::Array(_) => b'A',
            FieldValue::Timestamp(_) => b'T',
            FieldValue::Table(_) => b'F',
            FieldValue::Void => b'V',
            FieldValue::Bytes(_) => b'x',
        }
    }

    /// Encodes the tag byte followed by the value
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.tag());
        match self {
            FieldValue::Bool(v) => dst.put_u8(*v as u8),
            FieldValue::I8(v) => dst.put_i8(*v),
            FieldValue::U8(v) => dst.put_u8(*v),
            FieldValue::I16(v) => dst.put_i16(*v),
            FieldValue::U16(v) => dst.put_u16(*v),
            FieldValue::I32(v) => dst.put_i32(*v),
            FieldValue::U32(v) => dst.put_u32(*v),
            FieldValue::I64(v) => dst.put_i64(*v),
            FieldValue::F32(v) => dst.put_f32(*v),
            FieldValue::F64(v) => dst.put_f64(*v),
            FieldValue::Decimal(v) => {
                dst.put_u8(v.scale);
                dst.put_i32(v.raw);
            }
            FieldValue::Str(v) => put_long_str(dst, v),
            FieldValue::Array(items) => {
                let mut inner = BytesMut::new();
                for item in items {
                    item.encode(&mut inner);
                }
                put_long_bytes(dst, &inner);
            }
            FieldValue::Timestamp(v) => dst.put_u64(v.timestamp() as u64),
            FieldValue::Table(v) => v.encode(dst),
            FieldValue::Void => {}
            FieldValue::Bytes(v) => put_long_bytes(dst, v),
        }
    }

    /// Decodes a tag byte and the value that follows it
    pub fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let tag = get_u8(src, "field value tag")?;
        let value = match tag {
            b't' => FieldValue::Bool(get_u8(src, "bool")? != 0),
            b'b' => FieldValue::I8(get_i8(src, "i8")?),
            b'B' => FieldValue::U8(get_u8(src, "u8")?),
            b's' => FieldValue::I16(get_i16(src, "i16")?),
            b'u' => FieldValue::U16(get_u16(src, "u16")?),
            b'I' => FieldValue::I32(get_i32(src, "i32")?),
            b'i' => FieldValue::U32(get_u32(src, "u32")?),
            b'l' => FieldValue::I64(get_i64(src, "i64")?),
            b'f' => FieldValue::F32(get_f32(src, "f32")?),
            b'd' => FieldValue::F64(get_f64(src, "f64")?),
            b'D' => FieldValue::Decimal(Decimal {
                scale: get_u8(src, "decimal scale")?,
                raw: get_i32(src, "decimal value")?,
            }),
            b'S' => FieldValue::Str(get_long_str(src, "long string")?),
            b'A' => {
                let len = get_u32(src, "array length")? as usize;
                let mut inner = get_bytes(src, len, "array body")?;
                let mut items = Vec::new();
                while !inner.is_empty() {
                    items.push(FieldValue::decode(&mut inner)?);
                }
                FieldValue::Array(items)
            }
            b'T' => {
                let secs = get_u64(src, "timestamp")?;
                let ts = Utc
                    .timestamp_opt(secs as i64, 0)
                    .single()
                    .ok_or_else(|| Error::syntax(format!("timestamp {secs} out of range")))?;
                FieldValue::Timestamp(ts)
            }
            b'F' => FieldValue::Table(FieldTable::decode(src)?),
            b'V' => FieldValue::Void,
            b'x' => {
                let len = get_u32(src, "byte array length")? as usize;
                FieldValue::Bytes(get_bytes(src, len, "byte array")?.to_vec())
            }
            other => {
                return Err(Error::syntax(format!(
                    "unknown field value tag 0x{other:02x}"
                )))
            }
        };
        Ok(value)
    }
}

/// An insertion-ordered field table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTable(pub IndexMap<String, FieldValue>);

impl FieldTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key-value pair, replacing any previous value for the key
    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(key.into(), value)
    }

    /// Looks up a value by key
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Encodes the u32 byte-length prefix and the entries
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut inner = BytesMut::new();
        self.encode_inner(&mut inner);
        put_long_bytes(dst, &inner);
    }

    /// Encodes the entries without the length prefix
    pub fn encode_inner(&self, dst: &mut BytesMut) {
        for (key, value) in &self.0 {
            put_short_str(dst, key);
            value.encode(dst);
        }
    }

    /// Decodes a length-prefixed table
    pub fn decode(src: &mut Bytes) -> Result<Self, Error> {
        let len = get_u32(src, "table length")? as usize;
        ensure(src, len, "table body")?;
        let mut inner = src.split_to(len);
        Self::decode_inner(&mut inner)
    }

    /// Decodes entries until `src` is exhausted. AMQPLAIN credentials are a
    /// bare entry sequence with no length prefix, hence the split.
    pub fn decode_inner(src: &mut Bytes) -> Result<Self, Error> {
        let mut table = IndexMap::new();
        while !src.is_empty() {
            let key = crate::util::get_short_str(src, "table key")?;
            let value = FieldValue::decode(src)?;
            table.insert(key, value);
        }
        Ok(Self(table))
    }
}

impl FromIterator<(String, FieldValue)> for FieldTable {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(table: &FieldTable) -> FieldTable {
        let mut buf = BytesMut::new();
        table.encode(&mut buf);
        let mut src = buf.freeze();
        let decoded = FieldTable::decode(&mut src).unwrap();
        assert!(src.is_empty(), "trailing bytes after table");
        decoded
    }

    #[test]
    fn roundtrip_every_type() {
        let mut inner = FieldTable::new();
        inner.insert("deep", FieldValue::Str("value".into()));

        let mut table = FieldTable::new();
        table.insert("bool", FieldValue::Bool(true));
        table.insert("i8", FieldValue::I8(-8));
        table.insert("u8", FieldValue::U8(8));
        table.insert("i16", FieldValue::I16(-1600));
        table.insert("u16", FieldValue::U16(1600));
        table.insert("i32", FieldValue::I32(-320_000));
        table.insert("u32", FieldValue::U32(320_000));
        table.insert("i64", FieldValue::I64(-64_000_000_000));
        table.insert("f32", FieldValue::F32(1.5));
        table.insert("f64", FieldValue::F64(-2.25));
        table.insert(
            "decimal",
            FieldValue::Decimal(Decimal { scale: 2, raw: 314 }),
        );
        table.insert("str", FieldValue::Str("hello".into()));
        table.insert(
            "array",
            FieldValue::Array(vec![FieldValue::I32(1), FieldValue::Str("two".into())]),
        );
        table.insert(
            "ts",
            FieldValue::Timestamp(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        );
        table.insert("table", FieldValue::Table(inner));
        table.insert("void", FieldValue::Void);
        table.insert("bytes", FieldValue::Bytes(vec![0, 1, 2, 0xFF]));

        assert_eq!(roundtrip(&table), table);
    }

    #[test]
    fn roundtrip_preserves_order() {
        let mut table = FieldTable::new();
        table.insert("z", FieldValue::U8(1));
        table.insert("a", FieldValue::U8(2));
        table.insert("m", FieldValue::U8(3));

        let decoded = roundtrip(&table);
        let keys: Vec<_> = decoded.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn empty_table_is_four_zero_bytes() {
        let mut buf = BytesMut::new();
        FieldTable::new().encode(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn unknown_tag_is_a_syntax_error() {
        // length 6, key "k", tag '?'
        let raw: &[u8] = &[0, 0, 0, 4, 1, b'k', b'?', 0];
        let mut src = Bytes::copy_from_slice(raw);
        let err = FieldTable::decode(&mut src).unwrap_err();
        assert!(matches!(err, Error::Syntax(_)));
    }

    #[test]
    fn truncated_value_is_a_syntax_error() {
        // declares an i32 but carries only two bytes of it
        let raw: &[u8] = &[0, 0, 0, 5, 1, b'k', b'I', 0, 0];
        let mut src = Bytes::copy_from_slice(raw);
        assert!(FieldTable::decode(&mut src).is_err());
    }
}
