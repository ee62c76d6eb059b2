//! Conversion of ledgers, contexts and evaluations into [`Value`] trees.
//!
//! Marshalled values are what replay tooling hashes and compares, so the layout is
//! fixed: state deltas are `{states, balances, totalSupplies}` and contexts carry
//! `block_action`, `miner`, `rehearsal`, `block_index`, `random_seed`, `signer`,
//! `previous_states` and, when present, `genesis_hash`, `tx_id` and
//! `previous_state_root_hash`.

use anyhow::{anyhow, bail, Context as _, Result};
use commonware_codec::Encode;
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Hasher,
};
use ledgerplay_types::{Address, Currency, FungibleAssetValue, RawAmount, Value};
use std::{collections::BTreeSet, sync::Arc};

use crate::{
    context::{ActionContext, ContextMetadata},
    delta::StateDelta,
    evaluator::{ActionEvaluation, EvaluationError},
    state::MemoryState,
    trie::TrieError,
};

fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value
        .get(key)
        .ok_or_else(|| anyhow!("missing field {key:?}"))
}

fn integer(value: &Value, key: &str) -> Result<RawAmount> {
    field(value, key)?
        .as_integer()
        .ok_or_else(|| anyhow!("field {key:?} must be an integer"))
}

fn boolean(value: &Value, key: &str) -> Result<bool> {
    field(value, key)?
        .as_bool()
        .ok_or_else(|| anyhow!("field {key:?} must be a boolean"))
}

fn text<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    field(value, key)?
        .as_text()
        .ok_or_else(|| anyhow!("field {key:?} must be text"))
}

pub fn address_to_value(address: &Address) -> Value {
    Value::Binary(address.as_bytes().to_vec())
}

pub fn address_from_value(value: &Value) -> Result<Address> {
    let bytes = value
        .as_binary()
        .ok_or_else(|| anyhow!("address must be binary"))?;
    Ok(Address::from_slice(bytes)?)
}

pub fn digest_to_value(digest: &Digest) -> Value {
    Value::Binary(digest.as_ref().to_vec())
}

pub fn digest_from_value(value: &Value) -> Result<Digest> {
    let bytes = value
        .as_binary()
        .ok_or_else(|| anyhow!("digest must be binary"))?;
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("digest must be 32 bytes (got {})", bytes.len()))?;
    Ok(Digest::from(raw))
}

pub fn currency_to_value(currency: &Currency) -> Value {
    let mut entries = vec![
        ("ticker", Value::from(currency.ticker())),
        (
            "decimalPlaces",
            Value::Integer(currency.decimal_places().into()),
        ),
        (
            "minters",
            currency.minters().map_or(Value::Null, |minters| {
                Value::List(minters.iter().map(address_to_value).collect())
            }),
        ),
    ];
    if currency.total_supply_trackable() {
        entries.push(("totalSupplyTrackable", Value::Bool(true)));
    }
    if let Some(maximum) = currency.maximum_supply() {
        entries.push(("maximumSupply", Value::Integer(maximum)));
    }
    Value::dict(entries)
}

pub fn currency_from_value(value: &Value) -> Result<Currency> {
    let ticker = text(value, "ticker")?;
    let decimal_places = u8::try_from(integer(value, "decimalPlaces")?)
        .context("decimalPlaces out of range")?;
    let minters = match field(value, "minters")? {
        Value::Null => None,
        Value::List(items) => Some(
            items
                .iter()
                .map(address_from_value)
                .collect::<Result<BTreeSet<_>>>()?,
        ),
        _ => bail!("minters must be null or a list"),
    };
    let trackable = value
        .get("totalSupplyTrackable")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let maximum = value.get("maximumSupply").and_then(Value::as_integer);
    let currency = match (trackable, maximum) {
        (false, None) => Currency::legacy(ticker, decimal_places, minters)?,
        (false, Some(_)) => bail!("capped currency {ticker} must track its supply"),
        (true, None) => Currency::uncapped(ticker, decimal_places, minters)?,
        (true, Some(maximum)) => Currency::capped_raw(ticker, decimal_places, maximum, minters)?,
    };
    Ok(currency)
}

pub fn fungible_asset_value_to_value(value: &FungibleAssetValue) -> Value {
    Value::List(vec![
        currency_to_value(value.currency()),
        Value::Integer(value.raw_value()),
    ])
}

pub fn fungible_asset_value_from_value(value: &Value) -> Result<FungibleAssetValue> {
    match value.as_list() {
        Some([currency, Value::Integer(raw)]) => Ok(FungibleAssetValue::from_raw(
            currency_from_value(currency)?,
            *raw,
        )),
        _ => bail!("fungible asset value must be [currency, amount]"),
    }
}

/// Marshals the pending writes of `delta`.
pub fn marshal_state_delta(delta: &StateDelta) -> Value {
    let states = Value::dict(
        delta
            .updated_states()
            .into_iter()
            .map(|(address, value)| (address.to_hex(), value)),
    );
    let balances = Value::List(
        delta
            .updated_balances()
            .into_iter()
            .map(|((address, currency), balance)| {
                Value::dict([
                    ("address", address_to_value(&address)),
                    ("currency", currency_to_value(&currency)),
                    ("amount", Value::Integer(balance.raw_value())),
                ])
            })
            .collect(),
    );
    let total_supplies = Value::List(
        delta
            .updated_total_supplies()
            .into_iter()
            .map(|(currency, supply)| {
                Value::dict([
                    ("currency", currency_to_value(&currency)),
                    ("amount", Value::Integer(supply.raw_value())),
                ])
            })
            .collect(),
    );
    Value::dict([
        ("states", states),
        ("balances", balances),
        ("totalSupplies", total_supplies),
    ])
}

/// Rebuilds a delta over an empty base.
pub fn unmarshal_state_delta(value: &Value, signer: Address) -> Result<StateDelta> {
    let mut delta = StateDelta::new(Arc::new(MemoryState::new()), signer);

    let states = field(value, "states")?
        .as_dict()
        .ok_or_else(|| anyhow!("states must be a dictionary"))?;
    for (key, state) in states {
        let address: Address = key.parse()?;
        delta = delta.set_state(address, state.clone());
    }

    let balances = field(value, "balances")?
        .as_list()
        .ok_or_else(|| anyhow!("balances must be a list"))?;
    for entry in balances {
        let address = address_from_value(field(entry, "address")?)?;
        let currency = currency_from_value(field(entry, "currency")?)?;
        let amount = integer(entry, "amount")?;
        delta = delta.with_balance(address, &FungibleAssetValue::from_raw(currency, amount));
    }

    let supplies = field(value, "totalSupplies")?
        .as_list()
        .ok_or_else(|| anyhow!("totalSupplies must be a list"))?;
    for entry in supplies {
        let currency = currency_from_value(field(entry, "currency")?)?;
        let amount = integer(entry, "amount")?;
        delta = delta.with_supply(&FungibleAssetValue::from_raw(currency, amount));
    }
    Ok(delta)
}

/// Marshals `context`, computing its previous state root hash if needed.
pub fn marshal_context(context: &ActionContext) -> Result<Value, TrieError> {
    let mut entries = vec![
        ("block_action", Value::Bool(context.block_action())),
        ("miner", Value::from(context.miner().to_hex())),
        ("rehearsal", Value::Bool(context.rehearsal())),
        ("block_index", Value::from(context.block_index())),
        (
            "block_protocol_version",
            Value::Integer(context.block_protocol_version().into()),
        ),
        ("random_seed", Value::Integer(context.random_seed().into())),
        ("signer", Value::from(context.signer().to_hex())),
        ("previous_states", marshal_state_delta(context.previous_states())),
    ];
    if let Some(genesis_hash) = context.genesis_hash() {
        entries.push(("genesis_hash", digest_to_value(genesis_hash)));
    }
    if let Some(tx_id) = context.tx_id() {
        entries.push(("tx_id", digest_to_value(tx_id)));
    }
    if let Some(root) = context.previous_state_root_hash()? {
        entries.push(("previous_state_root_hash", digest_to_value(&root)));
    }
    Ok(Value::dict(entries))
}

/// Rebuilds a context. Its ledger sits over an empty base and it has no trie; a
/// marshalled root hash is restored as-is.
pub fn unmarshal_context(value: &Value) -> Result<ActionContext> {
    let signer: Address = text(value, "signer")?.parse()?;
    let tx_id = value.get("tx_id").map(digest_from_value).transpose()?;
    let block_action = boolean(value, "block_action")?;
    if block_action != tx_id.is_none() {
        bail!("block_action disagrees with tx_id");
    }
    let metadata = ContextMetadata {
        genesis_hash: value
            .get("genesis_hash")
            .map(digest_from_value)
            .transpose()?,
        signer,
        tx_id,
        miner: text(value, "miner")?.parse()?,
        block_index: u64::try_from(integer(value, "block_index")?)
            .context("block_index out of range")?,
        block_protocol_version: value
            .get("block_protocol_version")
            .and_then(Value::as_integer)
            .map(i32::try_from)
            .transpose()
            .context("block_protocol_version out of range")?
            .unwrap_or_default(),
        rehearsal: boolean(value, "rehearsal")?,
        native_token_predicate: None,
    };
    let random_seed =
        i32::try_from(integer(value, "random_seed")?).context("random_seed out of range")?;
    let previous_states = unmarshal_state_delta(field(value, "previous_states")?, signer)?;
    let root = value
        .get("previous_state_root_hash")
        .map(digest_from_value)
        .transpose()?;
    Ok(ActionContext::new(metadata, previous_states, random_seed, None)
        .with_previous_state_root_hash(root))
}

/// Marshals an evaluation: `{action, input_context, output_states, exception}`.
pub fn marshal_evaluation(evaluation: &ActionEvaluation) -> Result<Value, TrieError> {
    let exception = evaluation
        .exception
        .as_ref()
        .map_or(Value::Null, |err| {
            Value::dict([
                ("type", Value::from(exception_kind(err))),
                ("message", Value::from(err.to_string())),
                ("cause", Value::from(err.cause().to_string())),
            ])
        });
    Ok(Value::dict([
        ("action", evaluation.action.plain_value()),
        ("input_context", marshal_context(&evaluation.input_context)?),
        ("output_states", marshal_state_delta(&evaluation.output_states)),
        ("exception", exception),
    ]))
}

fn exception_kind(err: &EvaluationError) -> &'static str {
    match err {
        EvaluationError::NotRehearsalSafe { .. } => "not_rehearsal_safe",
        EvaluationError::UnexpectedlyTerminated { .. } => "unexpectedly_terminated",
    }
}

/// SHA-256 of the encoded marshalled evaluation.
pub fn evaluation_digest(evaluation: &ActionEvaluation) -> Result<Digest, TrieError> {
    Ok(Sha256::hash(&marshal_evaluation(evaluation)?.encode()))
}
