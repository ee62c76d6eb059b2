//! Replay fixtures: configuration, validation and the replay runner.
//!
//! A fixture is a YAML file describing currencies, the committed base state and the
//! transactions to replay on top of it. [`Config`] mirrors the file; [`Config::validate`]
//! turns it into a [`ValidatedConfig`] with every hex string, amount and action parsed.

use anyhow::Context as _;
use commonware_cryptography::sha256::Digest;
use commonware_utils::from_hex_formatted;
use ledgerplay_execution::{
    native::{BurnAsset, DrawRandom, MintAsset, SetState, TransferAsset},
    Action, MemoryState,
};
use ledgerplay_types::{
    Address, AssetError, BlockHash, Currency, FungibleAssetValue, RawAmount, TxId, Value,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    str::FromStr,
};
use thiserror::Error;
use tracing::Level;

pub mod replay;

pub use replay::{replay, ReplayOutcome};

pub const DEFAULT_LOG_LEVEL: &str = "info";

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_trackable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    pub decimal_places: u8,
    /// Hex addresses allowed to mint and burn. Omitted means anyone.
    #[serde(default)]
    pub minters: Option<Vec<String>>,
    #[serde(default = "default_trackable")]
    pub total_supply_trackable: bool,
    /// Decimal amount, e.g. `"1000000.00"`.
    #[serde(default)]
    pub maximum_supply: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub address: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    pub address: String,
    pub currency: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionConfig {
    SetState {
        address: String,
        value: Value,
    },
    MintAsset {
        recipient: String,
        currency: String,
        amount: String,
    },
    TransferAsset {
        sender: String,
        recipient: String,
        currency: String,
        amount: String,
    },
    BurnAsset {
        owner: String,
        currency: String,
        amount: String,
    },
    DrawRandom {
        address: String,
        max: i32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Omitted for block actions.
    #[serde(default)]
    pub tx_id: Option<String>,
    pub block_index: u64,
    #[serde(default)]
    pub block_protocol_version: i32,
    pub pre_evaluation_hash: String,
    pub signer: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub miner: Option<String>,
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub genesis_hash: Option<String>,
    /// Tickers treated as the chain's native tokens.
    #[serde(default)]
    pub native_tokens: Vec<String>,
    #[serde(default)]
    pub currencies: BTreeMap<String, CurrencyConfig>,
    #[serde(default)]
    pub states: Vec<StateConfig>,
    #[serde(default)]
    pub balances: Vec<BalanceConfig>,
    #[serde(default)]
    pub transactions: Vec<TransactionConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be hex: {value}")]
    InvalidHex { field: &'static str, value: String },
    #[error("{field} must be {expected} bytes (got {got})")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{field} is not an address: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("currency {ticker} is invalid")]
    InvalidCurrency {
        ticker: String,
        #[source]
        source: AssetError,
    },
    #[error("currency {ticker} caps its supply but does not track it")]
    UntrackedCap { ticker: String },
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),
    #[error("{value:?} is not a valid {currency} amount")]
    InvalidAmount { currency: String, value: String },
    #[error("initial supply of {ticker} exceeds its maximum")]
    SupplyExceedsMaximum { ticker: String },
    #[error("transaction #{index} is invalid")]
    Transaction {
        index: usize,
        #[source]
        source: Box<ConfigError>,
    },
}

/// One transaction ready to evaluate. Actions are kept as plain values and loaded at
/// replay time.
#[derive(Debug, Clone)]
pub struct ReplayTransaction {
    pub tx_id: Option<TxId>,
    pub block_index: u64,
    pub block_protocol_version: i32,
    pub pre_evaluation_hash: Digest,
    pub signer: Address,
    pub signature: Vec<u8>,
    pub miner: Address,
    pub actions: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub log_level: Level,
    pub genesis_hash: Option<BlockHash>,
    pub native_tokens: BTreeSet<String>,
    pub currencies: BTreeMap<String, Currency>,
    pub base: MemoryState,
    /// Committed raw entries of `base`, keyed like trie entries.
    pub base_entries: BTreeMap<String, Value>,
    pub transactions: Vec<ReplayTransaction>,
}

fn parse_bytes(field: &'static str, value: &str) -> Result<Vec<u8>, ConfigError> {
    from_hex_formatted(value.trim()).ok_or_else(|| ConfigError::InvalidHex {
        field,
        value: value.to_string(),
    })
}

fn parse_digest(field: &'static str, value: &str) -> Result<Digest, ConfigError> {
    let bytes = parse_bytes(field, value)?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ConfigError::InvalidLength {
            field,
            expected: 32,
            got: bytes.len(),
        })?;
    Ok(Digest::from(bytes))
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value).map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// Parses a decimal amount such as `"12.5"` into raw units of `currency`.
pub fn parse_amount(currency: &Currency, value: &str) -> Result<FungibleAssetValue, ConfigError> {
    let invalid = || ConfigError::InvalidAmount {
        currency: currency.ticker().to_string(),
        value: value.to_string(),
    };
    let trimmed = value.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (major, minor) = digits.split_once('.').unwrap_or((digits, ""));
    let decimal_places = usize::from(currency.decimal_places());
    if major.is_empty()
        || !major.bytes().all(|b| b.is_ascii_digit())
        || !minor.bytes().all(|b| b.is_ascii_digit())
        || minor.len() > decimal_places
    {
        return Err(invalid());
    }

    let mut raw: RawAmount = major.parse().map_err(|_| invalid())?;
    for position in 0..decimal_places {
        let digit = minor
            .as_bytes()
            .get(position)
            .map_or(0, |b| RawAmount::from(b - b'0'));
        raw = raw
            .checked_mul(10)
            .and_then(|raw| raw.checked_add(digit))
            .ok_or_else(invalid)?;
    }
    Ok(FungibleAssetValue::from_raw(
        currency.clone(),
        if negative { -raw } else { raw },
    ))
}

/// Reads and parses a fixture file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read config file {}", path.display()))?;
    serde_yaml::from_str(&contents).context("Could not parse config file")
}

impl CurrencyConfig {
    fn build(&self, ticker: &str) -> Result<Currency, ConfigError> {
        let invalid = |source| ConfigError::InvalidCurrency {
            ticker: ticker.to_string(),
            source,
        };
        let minters = self
            .minters
            .as_ref()
            .map(|minters| {
                minters
                    .iter()
                    .map(|minter| parse_address("minters", minter))
                    .collect::<Result<BTreeSet<_>, _>>()
            })
            .transpose()?;

        match (&self.maximum_supply, self.total_supply_trackable) {
            (Some(_), false) => Err(ConfigError::UntrackedCap {
                ticker: ticker.to_string(),
            }),
            (Some(maximum), true) => {
                // Parse the cap against an uncapped twin to learn its raw value.
                let twin = Currency::uncapped(ticker, self.decimal_places, None).map_err(invalid)?;
                let maximum = parse_amount(&twin, maximum)?.raw_value();
                Currency::capped_raw(ticker, self.decimal_places, maximum, minters).map_err(invalid)
            }
            (None, true) => {
                Currency::uncapped(ticker, self.decimal_places, minters).map_err(invalid)
            }
            (None, false) => Currency::legacy(ticker, self.decimal_places, minters).map_err(invalid),
        }
    }
}

fn lookup<'a>(
    currencies: &'a BTreeMap<String, Currency>,
    ticker: &str,
) -> Result<&'a Currency, ConfigError> {
    currencies
        .get(ticker)
        .ok_or_else(|| ConfigError::UnknownCurrency(ticker.to_string()))
}

impl ActionConfig {
    fn plain_value(&self, currencies: &BTreeMap<String, Currency>) -> Result<Value, ConfigError> {
        let amount = |currency: &str, amount: &str| parse_amount(lookup(currencies, currency)?, amount);
        Ok(match self {
            ActionConfig::SetState { address, value } => SetState {
                address: parse_address("address", address)?,
                value: value.clone(),
            }
            .plain_value(),
            ActionConfig::MintAsset {
                recipient,
                currency,
                amount: value,
            } => MintAsset::new(
                parse_address("recipient", recipient)?,
                amount(currency, value)?,
            )
            .plain_value(),
            ActionConfig::TransferAsset {
                sender,
                recipient,
                currency,
                amount: value,
            } => TransferAsset::new(
                parse_address("sender", sender)?,
                parse_address("recipient", recipient)?,
                amount(currency, value)?,
            )
            .plain_value(),
            ActionConfig::BurnAsset {
                owner,
                currency,
                amount: value,
            } => BurnAsset::new(parse_address("owner", owner)?, amount(currency, value)?)
                .plain_value(),
            ActionConfig::DrawRandom { address, max } => DrawRandom {
                address: parse_address("address", address)?,
                max: *max,
            }
            .plain_value(),
        })
    }
}

impl TransactionConfig {
    fn validate(
        &self,
        currencies: &BTreeMap<String, Currency>,
    ) -> Result<ReplayTransaction, ConfigError> {
        Ok(ReplayTransaction {
            tx_id: self
                .tx_id
                .as_deref()
                .map(|tx_id| parse_digest("tx_id", tx_id))
                .transpose()?,
            block_index: self.block_index,
            block_protocol_version: self.block_protocol_version,
            pre_evaluation_hash: parse_digest("pre_evaluation_hash", &self.pre_evaluation_hash)?,
            signer: parse_address("signer", &self.signer)?,
            signature: self
                .signature
                .as_deref()
                .map(|signature| parse_bytes("signature", signature))
                .transpose()?
                .unwrap_or_default(),
            miner: self
                .miner
                .as_deref()
                .map(|miner| parse_address("miner", miner))
                .transpose()?
                .unwrap_or_default(),
            actions: self
                .actions
                .iter()
                .map(|action| action.plain_value(currencies))
                .collect::<Result<_, _>>()?,
        })
    }
}

impl Config {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;
        let genesis_hash = self
            .genesis_hash
            .as_deref()
            .map(|hash| parse_digest("genesis_hash", hash))
            .transpose()?;

        let currencies = self
            .currencies
            .iter()
            .map(|(ticker, currency)| Ok((ticker.clone(), currency.build(ticker)?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;
        for ticker in &self.native_tokens {
            lookup(&currencies, ticker)?;
        }

        let mut base = MemoryState::new();
        let mut base_entries = BTreeMap::new();
        for state in &self.states {
            let address = parse_address("address", &state.address)?;
            base_entries.insert(ledgerplay_execution::state_key(&address), state.value.clone());
            base = base.with_state(address, state.value.clone());
        }

        let mut supplies: BTreeMap<String, RawAmount> = BTreeMap::new();
        for balance in &self.balances {
            let address = parse_address("address", &balance.address)?;
            let currency = lookup(&currencies, &balance.currency)?;
            let amount = parse_amount(currency, &balance.amount)?;
            let supply = supplies.entry(balance.currency.clone()).or_default();
            *supply = supply
                .checked_add(amount.raw_value())
                .ok_or_else(|| ConfigError::SupplyExceedsMaximum {
                    ticker: balance.currency.clone(),
                })?;
            base_entries.insert(
                ledgerplay_execution::fungible_key(&address, currency),
                Value::Integer(amount.raw_value()),
            );
            base = base.with_balance(address, currency.clone(), amount.raw_value());
        }
        for (ticker, supply) in supplies {
            let currency = lookup(&currencies, &ticker)?;
            if !currency.total_supply_trackable() {
                continue;
            }
            if currency.maximum_supply().is_some_and(|maximum| supply > maximum) {
                return Err(ConfigError::SupplyExceedsMaximum { ticker });
            }
            base_entries.insert(
                ledgerplay_execution::total_supply_key(currency),
                Value::Integer(supply),
            );
            base = base.with_total_supply(currency.clone(), supply);
        }

        let transactions = self
            .transactions
            .iter()
            .enumerate()
            .map(|(index, transaction)| {
                transaction
                    .validate(&currencies)
                    .map_err(|source| ConfigError::Transaction {
                        index,
                        source: Box::new(source),
                    })
            })
            .collect::<Result<_, _>>()?;

        Ok(ValidatedConfig {
            log_level,
            genesis_hash,
            native_tokens: self.native_tokens.into_iter().collect(),
            currencies,
            base,
            base_entries,
            transactions,
        })
    }
}
