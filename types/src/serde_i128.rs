//! Serde helper for `i128` fields.
//!
//! Values that fit an `i64` are written as plain numbers so fixtures stay readable;
//! larger magnitudes fall back to decimal strings. Both forms are accepted on read.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &i128, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match i64::try_from(*value) {
        Ok(small) => serializer.serialize_i64(small),
        Err(_) => serializer.serialize_str(&value.to_string()),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<i128, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Signed(i64),
        Unsigned(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Signed(value) => Ok(value.into()),
        Repr::Unsigned(value) => Ok(value.into()),
        Repr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid integer: {text}"))),
    }
}
