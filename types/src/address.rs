//! Account addresses and the digest aliases used to identify blocks and transactions.

use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, Write};
use commonware_cryptography::sha256::Digest;
use commonware_utils::{from_hex_formatted, hex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error as ThisError;

/// Length of an address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Identifier of a signed transaction.
pub type TxId = Digest;

/// Hash of a block (including the genesis block).
pub type BlockHash = Digest;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be hex: {0}")]
    InvalidHex(String),
    #[error("address must be {ADDRESS_LEN} bytes (got {0})")]
    InvalidLength(usize),
}

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let raw: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Self(raw))
    }

    /// Lowercase hex without a `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            from_hex_formatted(s.trim()).ok_or_else(|| AddressError::InvalidHex(s.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Write for Address {
    fn write(&self, writer: &mut impl BufMut) {
        writer.put_slice(&self.0);
    }
}

impl Read for Address {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        if reader.remaining() < ADDRESS_LEN {
            return Err(Error::EndOfBuffer);
        }
        let mut raw = [0u8; ADDRESS_LEN];
        reader.copy_to_slice(&mut raw);
        Ok(Self(raw))
    }
}

impl FixedSize for Address {
    const SIZE: usize = ADDRESS_LEN;
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    #[test]
    fn display_and_parse_agree() {
        let address = Address::new([0xab; ADDRESS_LEN]);
        let shown = address.to_string();
        assert_eq!(shown, format!("0x{}", "ab".repeat(ADDRESS_LEN)));
        assert_eq!(shown.parse::<Address>().unwrap(), address);
        assert_eq!(address.to_hex().parse::<Address>().unwrap(), address);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert_eq!(
            "0x0102".parse::<Address>(),
            Err(AddressError::InvalidLength(2))
        );
        assert!(matches!(
            "not-hex".parse::<Address>(),
            Err(AddressError::InvalidHex(_))
        ));
    }

    #[test]
    fn encoding_is_raw_bytes() {
        let address = Address::new([7; ADDRESS_LEN]);
        let encoded = address.encode();
        assert_eq!(encoded.as_ref(), &[7u8; ADDRESS_LEN]);
        assert_eq!(Address::decode(encoded.as_ref()).unwrap(), address);
    }
}
