//! Data model shared by the ledgerplay crates.

pub mod address;
pub use address::{Address, AddressError, BlockHash, TxId, ADDRESS_LEN};
pub mod asset;
pub use asset::{AssetError, Currency, FungibleAssetValue, RawAmount};
pub mod codec;
pub mod serde_i128;
pub mod value;
pub use value::Value;

#[cfg(test)]
mod compat;
