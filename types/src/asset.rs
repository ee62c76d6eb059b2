//! Currencies and fungible asset values.

use bytes::{Buf, BufMut};
use commonware_codec::{Encode, EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use sha1::{Digest as _, Sha1};
use std::{cmp::Ordering, collections::BTreeSet, fmt};
use thiserror::Error as ThisError;

use crate::{
    address::Address,
    codec::{read_i128, read_string, string_encode_size, write_i128, write_string, I128_ENCODE_SIZE},
};

/// Raw (minor-unit) quantity of a currency.
pub type RawAmount = i128;

/// Largest supported number of decimal places.
pub const MAX_DECIMAL_PLACES: u8 = 18;
pub const MAX_TICKER_LEN: usize = 64;
pub const MAX_MINTERS: usize = 1024;

/// Length of a [`Currency::hash`].
pub const CURRENCY_HASH_LEN: usize = 20;

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("ticker must not be empty or padded: {0:?}")]
    InvalidTicker(String),
    #[error("decimal places must be at most {MAX_DECIMAL_PLACES} (got {0})")]
    InvalidDecimalPlaces(u8),
    #[error("minor unit {minor} does not fit {decimal_places} decimal places")]
    InvalidMinorUnit { minor: u64, decimal_places: u8 },
    #[error("maximum supply must be positive")]
    InvalidMaximumSupply,
    #[error("currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: String, got: String },
    #[error("amount overflow")]
    AmountOverflow,
}

fn scale(decimal_places: u8) -> RawAmount {
    10i128.pow(u32::from(decimal_places))
}

/// A fungible token descriptor.
///
/// `minters == None` means any address may mint and burn. Legacy currencies do not
/// track their total supply.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Currency {
    ticker: String,
    decimal_places: u8,
    minters: Option<BTreeSet<Address>>,
    total_supply_trackable: bool,
    maximum_supply: Option<RawAmount>,
}

impl Currency {
    fn build(
        ticker: &str,
        decimal_places: u8,
        minters: Option<BTreeSet<Address>>,
        total_supply_trackable: bool,
        maximum_supply: Option<RawAmount>,
    ) -> Result<Self, AssetError> {
        if ticker.is_empty() || ticker.trim() != ticker || ticker.len() > MAX_TICKER_LEN {
            return Err(AssetError::InvalidTicker(ticker.to_string()));
        }
        if decimal_places > MAX_DECIMAL_PLACES {
            return Err(AssetError::InvalidDecimalPlaces(decimal_places));
        }
        Ok(Self {
            ticker: ticker.to_string(),
            decimal_places,
            minters,
            total_supply_trackable,
            maximum_supply,
        })
    }

    /// A currency that predates supply tracking.
    pub fn legacy(
        ticker: &str,
        decimal_places: u8,
        minters: Option<BTreeSet<Address>>,
    ) -> Result<Self, AssetError> {
        Self::build(ticker, decimal_places, minters, false, None)
    }

    /// A supply-tracked currency without a cap.
    pub fn uncapped(
        ticker: &str,
        decimal_places: u8,
        minters: Option<BTreeSet<Address>>,
    ) -> Result<Self, AssetError> {
        Self::build(ticker, decimal_places, minters, true, None)
    }

    /// A supply-tracked currency whose supply may never exceed `max_major.max_minor`.
    pub fn capped(
        ticker: &str,
        decimal_places: u8,
        max_major: u64,
        max_minor: u64,
        minters: Option<BTreeSet<Address>>,
    ) -> Result<Self, AssetError> {
        if decimal_places > MAX_DECIMAL_PLACES {
            return Err(AssetError::InvalidDecimalPlaces(decimal_places));
        }
        let factor = scale(decimal_places);
        if RawAmount::from(max_minor) >= factor {
            return Err(AssetError::InvalidMinorUnit {
                minor: max_minor,
                decimal_places,
            });
        }
        let maximum = RawAmount::from(max_major)
            .checked_mul(factor)
            .and_then(|raw| raw.checked_add(RawAmount::from(max_minor)))
            .ok_or(AssetError::AmountOverflow)?;
        Self::capped_raw(ticker, decimal_places, maximum, minters)
    }

    /// Like [`Currency::capped`], with the cap given in raw units.
    pub fn capped_raw(
        ticker: &str,
        decimal_places: u8,
        maximum: RawAmount,
        minters: Option<BTreeSet<Address>>,
    ) -> Result<Self, AssetError> {
        if maximum <= 0 {
            return Err(AssetError::InvalidMaximumSupply);
        }
        Self::build(ticker, decimal_places, minters, true, Some(maximum))
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn decimal_places(&self) -> u8 {
        self.decimal_places
    }

    pub fn minters(&self) -> Option<&BTreeSet<Address>> {
        self.minters.as_ref()
    }

    pub fn total_supply_trackable(&self) -> bool {
        self.total_supply_trackable
    }

    /// Maximum supply in raw units, if capped.
    pub fn maximum_supply(&self) -> Option<RawAmount> {
        self.maximum_supply
    }

    pub fn allows_to_mint(&self, minter: &Address) -> bool {
        self.minters
            .as_ref()
            .map_or(true, |minters| minters.contains(minter))
    }

    /// SHA-1 over the canonical encoding. Used to derive raw ledger keys.
    pub fn hash(&self) -> [u8; CURRENCY_HASH_LEN] {
        let digest = Sha1::digest(self.encode());
        let mut out = [0u8; CURRENCY_HASH_LEN];
        out.copy_from_slice(&digest);
        out
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ticker)
    }
}

impl Write for Currency {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.ticker, writer);
        self.decimal_places.write(writer);
        match &self.minters {
            None => 0u8.write(writer),
            Some(minters) => {
                1u8.write(writer);
                (minters.len() as u32).write(writer);
                for minter in minters {
                    minter.write(writer);
                }
            }
        }
        self.total_supply_trackable.write(writer);
        match self.maximum_supply {
            None => 0u8.write(writer),
            Some(max) => {
                1u8.write(writer);
                write_i128(max, writer);
            }
        }
    }
}

impl Read for Currency {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let ticker = read_string(reader, MAX_TICKER_LEN)?;
        let decimal_places = u8::read(reader)?;
        let minters = match u8::read(reader)? {
            0 => None,
            1 => {
                let count = u32::read(reader)? as usize;
                if count > MAX_MINTERS {
                    return Err(Error::Invalid("Currency", "too many minters"));
                }
                let mut minters = BTreeSet::new();
                for _ in 0..count {
                    minters.insert(Address::read(reader)?);
                }
                Some(minters)
            }
            other => return Err(Error::InvalidEnum(other)),
        };
        let total_supply_trackable = bool::read(reader)?;
        let maximum_supply = match u8::read(reader)? {
            0 => None,
            1 => Some(read_i128(reader)?),
            other => return Err(Error::InvalidEnum(other)),
        };
        if maximum_supply.is_some() && !total_supply_trackable {
            return Err(Error::Invalid("Currency", "capped supply must be trackable"));
        }
        Self::build(
            &ticker,
            decimal_places,
            minters,
            total_supply_trackable,
            maximum_supply,
        )
        .map_err(|_| Error::Invalid("Currency", "invalid descriptor"))
    }
}

impl EncodeSize for Currency {
    fn encode_size(&self) -> usize {
        string_encode_size(&self.ticker)
            + 1
            + 1
            + self
                .minters
                .as_ref()
                .map_or(0, |minters| 4 + minters.len() * Address::SIZE)
            + 1
            + 1
            + self.maximum_supply.map_or(0, |_| I128_ENCODE_SIZE)
    }
}

/// A signed quantity of one [`Currency`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FungibleAssetValue {
    currency: Currency,
    raw_value: RawAmount,
}

impl FungibleAssetValue {
    pub fn from_raw(currency: Currency, raw_value: RawAmount) -> Self {
        Self {
            currency,
            raw_value,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::from_raw(currency, 0)
    }

    /// Builds `major.minor`. A negative `major` makes the whole value negative.
    pub fn from_major_minor(
        currency: Currency,
        major: i128,
        minor: u64,
    ) -> Result<Self, AssetError> {
        let factor = scale(currency.decimal_places);
        let minor_raw = RawAmount::from(minor);
        if minor_raw >= factor {
            return Err(AssetError::InvalidMinorUnit {
                minor,
                decimal_places: currency.decimal_places,
            });
        }
        let major_raw = major.checked_mul(factor).ok_or(AssetError::AmountOverflow)?;
        let raw_value = if major < 0 {
            major_raw.checked_sub(minor_raw)
        } else {
            major_raw.checked_add(minor_raw)
        }
        .ok_or(AssetError::AmountOverflow)?;
        Ok(Self::from_raw(currency, raw_value))
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn raw_value(&self) -> RawAmount {
        self.raw_value
    }

    /// `-1`, `0`, or `1`.
    pub fn sign(&self) -> i8 {
        self.raw_value.signum() as i8
    }

    pub fn major_unit(&self) -> RawAmount {
        self.raw_value / scale(self.currency.decimal_places)
    }

    pub fn minor_unit(&self) -> RawAmount {
        (self.raw_value % scale(self.currency.decimal_places)).abs()
    }

    fn ensure_same_currency(&self, other: &Self) -> Result<(), AssetError> {
        if self.currency != other.currency {
            return Err(AssetError::CurrencyMismatch {
                expected: self.currency.ticker.clone(),
                got: other.currency.ticker.clone(),
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Self) -> Result<Self, AssetError> {
        self.ensure_same_currency(other)?;
        let raw_value = self
            .raw_value
            .checked_add(other.raw_value)
            .ok_or(AssetError::AmountOverflow)?;
        Ok(Self::from_raw(self.currency.clone(), raw_value))
    }

    pub fn checked_sub(&self, other: &Self) -> Result<Self, AssetError> {
        self.ensure_same_currency(other)?;
        let raw_value = self
            .raw_value
            .checked_sub(other.raw_value)
            .ok_or(AssetError::AmountOverflow)?;
        Ok(Self::from_raw(self.currency.clone(), raw_value))
    }
}

impl PartialOrd for FungibleAssetValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        Some(self.raw_value.cmp(&other.raw_value))
    }
}

impl fmt::Display for FungibleAssetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.raw_value < 0 { "-" } else { "" };
        let major = self.major_unit().abs();
        let minor = self.minor_unit();
        if minor == 0 {
            return write!(f, "{sign}{major} {}", self.currency.ticker);
        }
        let width = usize::from(self.currency.decimal_places);
        let minor = format!("{minor:0width$}");
        write!(
            f,
            "{sign}{major}.{} {}",
            minor.trim_end_matches('0'),
            self.currency.ticker
        )
    }
}

impl Write for FungibleAssetValue {
    fn write(&self, writer: &mut impl BufMut) {
        self.currency.write(writer);
        write_i128(self.raw_value, writer);
    }
}

impl Read for FungibleAssetValue {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let currency = Currency::read(reader)?;
        let raw_value = read_i128(reader)?;
        Ok(Self::from_raw(currency, raw_value))
    }
}

impl EncodeSize for FungibleAssetValue {
    fn encode_size(&self) -> usize {
        self.currency.encode_size() + I128_ENCODE_SIZE
    }
}
