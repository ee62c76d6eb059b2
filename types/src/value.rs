//! Self-describing state values.
//!
//! Account states are opaque trees of [`Value`]. The binary encoding is tagged and
//! deterministic (dictionary keys are kept sorted), so equal values always encode to
//! equal bytes and can be hashed into state commitments.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

use crate::codec::{
    bytes_encode_size, read_bytes, read_i128, read_string, string_encode_size, write_bytes,
    write_i128, write_string, I128_ENCODE_SIZE,
};

pub const MAX_VALUE_DEPTH: usize = 64;
pub const MAX_BINARY_LEN: usize = 1 << 20;
pub const MAX_TEXT_LEN: usize = 1 << 20;
pub const MAX_COLLECTION_LEN: usize = 1 << 16;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_BINARY: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_LIST: u8 = 5;
const TAG_DICT: u8 = 6;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(#[serde(with = "crate::serde_i128")] i128),
    Binary(#[serde(with = "serde_hex_bytes")] Vec<u8>),
    Text(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a dictionary.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|entries| entries.get(key))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i128> for Value {
    fn from(value: i128) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Integer(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Binary(bytes) => write!(f, "b\"0x{}\"", commonware_utils::hex(bytes)),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl Write for Value {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Value::Null => TAG_NULL.write(writer),
            Value::Bool(b) => {
                TAG_BOOL.write(writer);
                b.write(writer);
            }
            Value::Integer(i) => {
                TAG_INTEGER.write(writer);
                write_i128(*i, writer);
            }
            Value::Binary(bytes) => {
                TAG_BINARY.write(writer);
                write_bytes(bytes, writer);
            }
            Value::Text(s) => {
                TAG_TEXT.write(writer);
                write_string(s, writer);
            }
            Value::List(items) => {
                TAG_LIST.write(writer);
                (items.len() as u32).write(writer);
                for item in items {
                    item.write(writer);
                }
            }
            Value::Dict(entries) => {
                TAG_DICT.write(writer);
                (entries.len() as u32).write(writer);
                for (key, value) in entries {
                    write_string(key, writer);
                    value.write(writer);
                }
            }
        }
    }
}

fn read_value(reader: &mut impl Buf, depth: usize) -> Result<Value, Error> {
    if depth > MAX_VALUE_DEPTH {
        return Err(Error::Invalid("Value", "nesting too deep"));
    }
    let tag = u8::read(reader)?;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => Ok(Value::Bool(bool::read(reader)?)),
        TAG_INTEGER => Ok(Value::Integer(read_i128(reader)?)),
        TAG_BINARY => Ok(Value::Binary(read_bytes(reader, MAX_BINARY_LEN)?)),
        TAG_TEXT => Ok(Value::Text(read_string(reader, MAX_TEXT_LEN)?)),
        TAG_LIST => {
            let len = read_collection_len(reader)?;
            let mut items = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                items.push(read_value(reader, depth + 1)?);
            }
            Ok(Value::List(items))
        }
        TAG_DICT => {
            let len = read_collection_len(reader)?;
            let mut entries = BTreeMap::new();
            let mut previous: Option<String> = None;
            for _ in 0..len {
                let key = read_string(reader, MAX_TEXT_LEN)?;
                if previous.as_ref().is_some_and(|prev| *prev >= key) {
                    return Err(Error::Invalid("Value", "dictionary keys not sorted"));
                }
                let value = read_value(reader, depth + 1)?;
                previous = Some(key.clone());
                entries.insert(key, value);
            }
            Ok(Value::Dict(entries))
        }
        other => Err(Error::InvalidEnum(other)),
    }
}

fn read_collection_len(reader: &mut impl Buf) -> Result<usize, Error> {
    let len = u32::read(reader)? as usize;
    if len > MAX_COLLECTION_LEN {
        return Err(Error::Invalid("Value", "collection too long"));
    }
    Ok(len)
}

impl Read for Value {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        read_value(reader, 0)
    }
}

impl EncodeSize for Value {
    fn encode_size(&self) -> usize {
        1 + match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) => I128_ENCODE_SIZE,
            Value::Binary(bytes) => bytes_encode_size(bytes),
            Value::Text(s) => string_encode_size(s),
            Value::List(items) => 4 + items.iter().map(EncodeSize::encode_size).sum::<usize>(),
            Value::Dict(entries) => {
                4 + entries
                    .iter()
                    .map(|(k, v)| string_encode_size(k) + v.encode_size())
                    .sum::<usize>()
            }
        }
    }
}

mod serde_hex_bytes {
    use commonware_utils::{from_hex_formatted, hex};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        from_hex_formatted(&s).ok_or_else(|| serde::de::Error::custom("invalid hex string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use proptest::prelude::*;

    fn sample() -> Value {
        Value::dict([
            ("type_id", Value::from("transfer_asset")),
            (
                "values",
                Value::List(vec![
                    Value::Null,
                    Value::Bool(true),
                    Value::Integer(-7),
                    Value::Binary(vec![0xde, 0xad]),
                ]),
            ),
        ])
    }

    #[test]
    fn encode_size_matches_encoding() {
        let value = sample();
        assert_eq!(value.encode().len(), value.encode_size());
        assert_eq!(Value::decode(value.encode().as_ref()).unwrap(), value);
    }

    #[test]
    fn dictionary_encoding_ignores_insertion_order() {
        let a = Value::dict([("b", Value::from(1i64)), ("a", Value::from(2i64))]);
        let b = Value::dict([("a", Value::from(2i64)), ("b", Value::from(1i64))]);
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn read_rejects_unknown_tag_and_deep_nesting() {
        assert!(matches!(
            Value::decode(&[9u8][..]),
            Err(Error::InvalidEnum(9))
        ));

        let mut nested = Value::Null;
        for _ in 0..=MAX_VALUE_DEPTH + 1 {
            nested = Value::List(vec![nested]);
        }
        assert!(matches!(
            Value::decode(nested.encode().as_ref()),
            Err(Error::Invalid("Value", "nesting too deep"))
        ));
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(
            sample().to_string(),
            "{\"type_id\": \"transfer_asset\", \"values\": [null, true, -7, b\"0xdead\"]}"
        );
    }

    #[test]
    fn serde_uses_hex_for_binary() {
        let json = serde_json::to_string(&Value::Binary(vec![1, 2])).unwrap();
        assert_eq!(json, "{\"Binary\":\"0102\"}");
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Binary(vec![1, 2]));
    }

    proptest! {
        /// Arbitrary input either decodes to a value that re-encodes to the same bytes
        /// or is rejected; it never panics.
        #[test]
        fn decode_is_canonical(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            if let Ok(value) = Value::decode(bytes.as_slice()) {
                let encoded = value.encode();
                prop_assert_eq!(encoded.as_ref(), bytes.as_slice());
            }
        }
    }
}
