//! Immutable ledger overlay.
//!
//! A [`StateDelta`] layers pending writes over a read-only [`State`]. Every write
//! returns a new delta, leaving the receiver (and anything else derived from the same
//! base) untouched, so rehearsal branches can simply be dropped.

use commonware_utils::hex;
use ledgerplay_types::{
    asset::AssetError, Address, Currency, FungibleAssetValue, RawAmount, Value,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};
use thiserror::Error as ThisError;
use tracing::debug;

use crate::{overlay::CowMap, state::State};

/// Committed state shared between overlays.
pub type SharedState = Arc<dyn State + Send + Sync>;

#[derive(Debug, ThisError)]
pub enum LedgerError {
    #[error("value to {operation} must be greater than zero: {value}")]
    InvalidAmount {
        operation: &'static str,
        value: FungibleAssetValue,
    },
    #[error("{signer} is not allowed to {operation} {currency}")]
    CurrencyPermission {
        operation: &'static str,
        signer: Address,
        currency: Currency,
    },
    #[error("cannot mint {value}: total supply {current} would exceed maximum {maximum}")]
    SupplyOverflow {
        value: FungibleAssetValue,
        current: FungibleAssetValue,
        maximum: FungibleAssetValue,
    },
    #[error("{address} holds {balance}, cannot spend {value}")]
    InsufficientBalance {
        address: Address,
        balance: FungibleAssetValue,
        value: FungibleAssetValue,
    },
    #[error("total supply of {0} is not trackable")]
    TotalSupplyNotTrackable(Currency),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("state lookup failed: {0:#}")]
    State(anyhow::Error),
}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        LedgerError::State(err)
    }
}

/// Raw key of an account state: lowercase hex of the address.
pub fn state_key(address: &Address) -> String {
    address.to_hex()
}

/// Raw key of a balance: `_<address>_<currency hash>`.
pub fn fungible_key(address: &Address, currency: &Currency) -> String {
    format!("_{}_{}", address.to_hex(), hex(&currency.hash()))
}

/// Raw key of a total supply: `__<currency hash>`.
pub fn total_supply_key(currency: &Currency) -> String {
    format!("__{}", hex(&currency.hash()))
}

#[derive(Clone)]
pub struct StateDelta {
    base: SharedState,
    signer: Address,
    states: CowMap<Address, Value>,
    balances: CowMap<(Address, Currency), RawAmount>,
    supplies: CowMap<Currency, RawAmount>,
}

impl fmt::Debug for StateDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDelta")
            .field("signer", &self.signer)
            .field("states", &self.states)
            .field("balances", &self.balances)
            .field("supplies", &self.supplies)
            .finish_non_exhaustive()
    }
}

impl StateDelta {
    /// An empty overlay over `base`. `signer` is checked for mint and burn authority.
    pub fn new(base: SharedState, signer: Address) -> Self {
        Self {
            base,
            signer,
            states: CowMap::new(),
            balances: CowMap::new(),
            supplies: CowMap::new(),
        }
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    /// The same pending writes, authorized as `signer`.
    pub fn with_signer(&self, signer: Address) -> Self {
        Self {
            signer,
            ..self.clone()
        }
    }

    pub fn get_state(&self, address: &Address) -> Result<Option<Value>, LedgerError> {
        if let Some(value) = self.states.get(address) {
            return Ok(Some(value.clone()));
        }
        let mut fetched = self.base.get_states(std::slice::from_ref(address))?;
        if fetched.len() != 1 {
            return Err(unexpected_len(1, fetched.len()));
        }
        Ok(fetched.pop().flatten())
    }

    /// Looks up many addresses at once. The result has one entry per requested address,
    /// in request order. Misses are fetched from the base in a single batch.
    pub fn get_states(&self, addresses: &[Address]) -> Result<Vec<Option<Value>>, LedgerError> {
        let mut values = vec![None; addresses.len()];
        let mut missing = Vec::new();
        let mut missing_positions = Vec::new();
        for (i, address) in addresses.iter().enumerate() {
            match self.states.get(address) {
                Some(value) => values[i] = Some(value.clone()),
                None => {
                    missing.push(*address);
                    missing_positions.push(i);
                }
            }
        }
        if missing.is_empty() {
            return Ok(values);
        }

        let fetched = self.base.get_states(&missing)?;
        if fetched.len() != missing.len() {
            return Err(unexpected_len(missing.len(), fetched.len()));
        }
        for (position, value) in missing_positions.into_iter().zip(fetched) {
            values[position] = value;
        }
        Ok(values)
    }

    pub fn get_balance(
        &self,
        address: &Address,
        currency: &Currency,
    ) -> Result<FungibleAssetValue, LedgerError> {
        let raw = match self.balances.get(&(*address, currency.clone())) {
            Some(raw) => *raw,
            None => self.base.get_balance(address, currency)?,
        };
        Ok(FungibleAssetValue::from_raw(currency.clone(), raw))
    }

    pub fn get_total_supply(&self, currency: &Currency) -> Result<FungibleAssetValue, LedgerError> {
        if !currency.total_supply_trackable() {
            return Err(LedgerError::TotalSupplyNotTrackable(currency.clone()));
        }
        let raw = match self.supplies.get(currency) {
            Some(raw) => *raw,
            None => self.base.get_total_supply(currency)?,
        };
        Ok(FungibleAssetValue::from_raw(currency.clone(), raw))
    }

    #[must_use]
    pub fn set_state(&self, address: Address, value: Value) -> Self {
        Self {
            states: self.states.set(address, value),
            ..self.clone()
        }
    }

    fn ensure_positive(operation: &'static str, value: &FungibleAssetValue) -> Result<(), LedgerError> {
        if value.sign() <= 0 {
            return Err(LedgerError::InvalidAmount {
                operation,
                value: value.clone(),
            });
        }
        Ok(())
    }

    fn ensure_minter(&self, operation: &'static str, currency: &Currency) -> Result<(), LedgerError> {
        if !currency.allows_to_mint(&self.signer) {
            debug!(signer = %self.signer, currency = %currency, operation, "currency permission denied");
            return Err(LedgerError::CurrencyPermission {
                operation,
                signer: self.signer,
                currency: currency.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn with_balance(&self, address: Address, value: &FungibleAssetValue) -> Self {
        Self {
            balances: self
                .balances
                .set((address, value.currency().clone()), value.raw_value()),
            ..self.clone()
        }
    }

    pub(crate) fn with_supply(&self, value: &FungibleAssetValue) -> Self {
        Self {
            supplies: self
                .supplies
                .set(value.currency().clone(), value.raw_value()),
            ..self.clone()
        }
    }

    /// Credits `value` to `recipient`, growing the total supply when it is tracked.
    pub fn mint_asset(
        &self,
        recipient: &Address,
        value: &FungibleAssetValue,
    ) -> Result<Self, LedgerError> {
        Self::ensure_positive("mint", value)?;
        let currency = value.currency();
        self.ensure_minter("mint", currency)?;

        if !currency.total_supply_trackable() {
            let balance = self.get_balance(recipient, currency)?.checked_add(value)?;
            return Ok(self.with_balance(*recipient, &balance));
        }

        let current = self.get_total_supply(currency)?;
        if let Some(maximum) = currency.maximum_supply() {
            // Compare against the headroom so sums past i128 still hit the cap.
            let exceeds = maximum
                .checked_sub(current.raw_value())
                .map_or(true, |headroom| value.raw_value() > headroom);
            if exceeds {
                debug!(currency = %currency, current = %current, maximum = %maximum, "mint exceeds maximum supply");
                return Err(LedgerError::SupplyOverflow {
                    value: value.clone(),
                    current,
                    maximum: FungibleAssetValue::from_raw(currency.clone(), maximum),
                });
            }
        }
        let supply = current.checked_add(value)?;
        let balance = self.get_balance(recipient, currency)?.checked_add(value)?;
        Ok(self.with_balance(*recipient, &balance).with_supply(&supply))
    }

    /// Moves `value` from `sender` to `recipient`.
    ///
    /// The sender's debit is applied first and the recipient's balance is read back from
    /// that draft, so a transfer to oneself leaves the balance unchanged.
    pub fn transfer_asset(
        &self,
        sender: &Address,
        recipient: &Address,
        value: &FungibleAssetValue,
        allow_negative_balance: bool,
    ) -> Result<Self, LedgerError> {
        Self::ensure_positive("transfer", value)?;
        let currency = value.currency();

        let sender_balance = self.get_balance(sender, currency)?;
        if !allow_negative_balance && sender_balance < *value {
            return Err(LedgerError::InsufficientBalance {
                address: *sender,
                balance: sender_balance,
                value: value.clone(),
            });
        }

        let draft = self.with_balance(*sender, &sender_balance.checked_sub(value)?);
        let recipient_balance = draft.get_balance(recipient, currency)?.checked_add(value)?;
        Ok(draft.with_balance(*recipient, &recipient_balance))
    }

    /// Debits `value` from `owner`, shrinking the total supply when it is tracked.
    /// Burning requires the same authority as minting.
    pub fn burn_asset(&self, owner: &Address, value: &FungibleAssetValue) -> Result<Self, LedgerError> {
        Self::ensure_positive("burn", value)?;
        let currency = value.currency();
        self.ensure_minter("burn", currency)?;

        let balance = self.get_balance(owner, currency)?;
        if balance < *value {
            return Err(LedgerError::InsufficientBalance {
                address: *owner,
                balance,
                value: value.clone(),
            });
        }

        let next = self.with_balance(*owner, &balance.checked_sub(value)?);
        if !currency.total_supply_trackable() {
            return Ok(next);
        }
        let supply = self.get_total_supply(currency)?.checked_sub(value)?;
        Ok(next.with_supply(&supply))
    }

    pub fn updated_states(&self) -> BTreeMap<Address, Value> {
        self.states
            .iter()
            .map(|(address, value)| (*address, value.clone()))
            .collect()
    }

    pub fn updated_balances(&self) -> BTreeMap<(Address, Currency), FungibleAssetValue> {
        self.balances
            .iter()
            .map(|((address, currency), raw)| {
                (
                    (*address, currency.clone()),
                    FungibleAssetValue::from_raw(currency.clone(), *raw),
                )
            })
            .collect()
    }

    pub fn updated_total_supplies(&self) -> BTreeMap<Currency, FungibleAssetValue> {
        self.supplies
            .iter()
            .map(|(currency, raw)| {
                (
                    currency.clone(),
                    FungibleAssetValue::from_raw(currency.clone(), *raw),
                )
            })
            .collect()
    }

    /// Addresses whose state or balance this overlay changed.
    pub fn updated_addresses(&self) -> BTreeSet<Address> {
        self.states
            .keys()
            .copied()
            .chain(self.balances.keys().map(|(address, _)| *address))
            .collect()
    }

    /// Flattens the overlay into trie keys. Balances and supplies become
    /// [`Value::Integer`] entries.
    pub fn updated_raw_states(&self) -> BTreeMap<String, Option<Value>> {
        let mut raw = BTreeMap::new();
        for (address, value) in self.states.iter() {
            raw.insert(state_key(address), Some(value.clone()));
        }
        for ((address, currency), amount) in self.balances.iter() {
            raw.insert(fungible_key(address, currency), Some(Value::Integer(*amount)));
        }
        for (currency, amount) in self.supplies.iter() {
            raw.insert(total_supply_key(currency), Some(Value::Integer(*amount)));
        }
        raw
    }
}

fn unexpected_len(expected: usize, got: usize) -> LedgerError {
    LedgerError::State(anyhow::anyhow!(
        "state getter returned {got} values for {expected} addresses"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryState;

    fn minter() -> Address {
        Address::new([0xaa; 20])
    }

    fn ncg() -> Currency {
        Currency::capped("NCG", 2, 1_000, 0, Some(BTreeSet::from([minter()]))).unwrap()
    }

    fn fav(raw: RawAmount) -> FungibleAssetValue {
        FungibleAssetValue::from_raw(ncg(), raw)
    }

    fn delta(base: MemoryState, signer: Address) -> StateDelta {
        StateDelta::new(Arc::new(base), signer)
    }

    #[test]
    fn get_state_prefers_overlay() {
        let a = Address::new([1; 20]);
        let base = MemoryState::new().with_state(a, Value::from("base"));
        let original = delta(base, minter());
        let written = original.set_state(a, Value::from("overlay"));

        assert_eq!(original.get_state(&a).unwrap(), Some(Value::from("base")));
        assert_eq!(written.get_state(&a).unwrap(), Some(Value::from("overlay")));
        assert_eq!(written.get_state(&Address::new([2; 20])).unwrap(), None);
    }

    #[test]
    fn get_states_splices_batch_results() {
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);
        let c = Address::new([3; 20]);
        let base = MemoryState::new().with_state(b, Value::from("b"));
        let ledger = delta(base, minter()).set_state(a, Value::from("a"));

        assert_eq!(
            ledger.get_states(&[c, a, b, a, c]).unwrap(),
            vec![
                None,
                Some(Value::from("a")),
                Some(Value::from("b")),
                Some(Value::from("a")),
                None
            ]
        );
        assert!(ledger.get_states(&[]).unwrap().is_empty());
    }

    #[test]
    fn mint_credits_balance_and_supply() {
        let recipient = Address::new([1; 20]);
        let ledger = delta(MemoryState::new(), minter());
        let minted = ledger.mint_asset(&recipient, &fav(10_000)).unwrap();

        assert_eq!(minted.get_balance(&recipient, &ncg()).unwrap(), fav(10_000));
        assert_eq!(minted.get_total_supply(&ncg()).unwrap(), fav(10_000));
        assert_eq!(ledger.get_balance(&recipient, &ncg()).unwrap(), fav(0));
    }

    #[test]
    fn mint_rejects_in_order() {
        let recipient = Address::new([1; 20]);
        let ledger = delta(MemoryState::new(), minter());
        assert!(matches!(
            ledger.mint_asset(&recipient, &fav(0)),
            Err(LedgerError::InvalidAmount { operation: "mint", .. })
        ));

        let stranger = ledger.with_signer(Address::new([9; 20]));
        assert!(matches!(
            stranger.mint_asset(&recipient, &fav(-1)),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            stranger.mint_asset(&recipient, &fav(1)),
            Err(LedgerError::CurrencyPermission { operation: "mint", .. })
        ));

        let full = ledger.mint_asset(&recipient, &fav(100_000)).unwrap();
        assert!(matches!(
            full.mint_asset(&recipient, &fav(1)),
            Err(LedgerError::SupplyOverflow { .. })
        ));
        assert_eq!(full.get_balance(&recipient, &ncg()).unwrap(), fav(100_000));
    }

    #[test]
    fn mint_past_i128_reports_supply_overflow() {
        let big = Currency::capped_raw("BIG", 0, RawAmount::MAX, None).unwrap();
        let recipient = Address::new([1; 20]);
        let base = MemoryState::new()
            .with_total_supply(big.clone(), RawAmount::MAX - 1)
            .with_balance(recipient, big.clone(), RawAmount::MAX);
        let ledger = delta(base, minter());

        let err = ledger
            .mint_asset(&recipient, &FungibleAssetValue::from_raw(big.clone(), 2))
            .unwrap_err();
        assert!(matches!(err, LedgerError::SupplyOverflow { .. }), "got {err:?}");
        assert!(ledger.updated_balances().is_empty());

        let exact = ledger
            .mint_asset(&Address::new([2; 20]), &FungibleAssetValue::from_raw(big.clone(), 1))
            .unwrap();
        assert_eq!(exact.get_total_supply(&big).unwrap().raw_value(), RawAmount::MAX);
    }

    #[test]
    fn mint_of_legacy_currency_skips_supply() {
        let legacy = Currency::legacy("OLD", 0, None).unwrap();
        let recipient = Address::new([1; 20]);
        let value = FungibleAssetValue::from_raw(legacy.clone(), 5);
        let minted = delta(MemoryState::new(), minter())
            .mint_asset(&recipient, &value)
            .unwrap();

        assert_eq!(minted.get_balance(&recipient, &legacy).unwrap(), value);
        assert!(minted.updated_total_supplies().is_empty());
        assert!(matches!(
            minted.get_total_supply(&legacy),
            Err(LedgerError::TotalSupplyNotTrackable(_))
        ));
    }

    #[test]
    fn transfer_moves_balance() {
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);
        let base = MemoryState::new().with_balance(a, ncg(), 5_000);
        let ledger = delta(base, a);
        let moved = ledger.transfer_asset(&a, &b, &fav(3_000), false).unwrap();

        assert_eq!(moved.get_balance(&a, &ncg()).unwrap(), fav(2_000));
        assert_eq!(moved.get_balance(&b, &ncg()).unwrap(), fav(3_000));
        assert_eq!(
            moved.updated_addresses(),
            BTreeSet::from([a, b])
        );
    }

    #[test]
    fn transfer_to_self_is_neutral() {
        let a = Address::new([1; 20]);
        let base = MemoryState::new().with_balance(a, ncg(), 5_000);
        let moved = delta(base, a)
            .transfer_asset(&a, &a, &fav(5_000), false)
            .unwrap();
        assert_eq!(moved.get_balance(&a, &ncg()).unwrap(), fav(5_000));
    }

    #[test]
    fn transfer_rejects_insufficient_balance() {
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);
        let base = MemoryState::new().with_balance(a, ncg(), 5_000);
        let ledger = delta(base, a);

        assert!(matches!(
            ledger.transfer_asset(&a, &b, &fav(8_000), false),
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(ledger.get_balance(&a, &ncg()).unwrap(), fav(5_000));
        assert_eq!(ledger.get_balance(&b, &ncg()).unwrap(), fav(0));

        let overdrawn = ledger.transfer_asset(&a, &b, &fav(8_000), true).unwrap();
        assert_eq!(overdrawn.get_balance(&a, &ncg()).unwrap(), fav(-3_000));
    }

    #[test]
    fn burn_requires_authority_and_balance() {
        let owner = Address::new([1; 20]);
        let base = MemoryState::new()
            .with_balance(owner, ncg(), 500)
            .with_total_supply(ncg(), 500);
        let ledger = delta(base, minter());

        let burnt = ledger.burn_asset(&owner, &fav(200)).unwrap();
        assert_eq!(burnt.get_balance(&owner, &ncg()).unwrap(), fav(300));
        assert_eq!(burnt.get_total_supply(&ncg()).unwrap(), fav(300));

        assert!(matches!(
            ledger.burn_asset(&owner, &fav(501)),
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            ledger.with_signer(owner).burn_asset(&owner, &fav(1)),
            Err(LedgerError::CurrencyPermission { operation: "burn", .. })
        ));
    }

    #[test]
    fn raw_states_use_disjoint_key_families() {
        let a = Address::new([0xab; 20]);
        let ledger = delta(MemoryState::new(), minter())
            .set_state(a, Value::Bool(true))
            .mint_asset(&a, &fav(7))
            .unwrap();
        let raw = ledger.updated_raw_states();
        let hash = hex(&ncg().hash());

        assert_eq!(raw.get(&"ab".repeat(20)), Some(&Some(Value::Bool(true))));
        assert_eq!(
            raw.get(&format!("_{}_{}", "ab".repeat(20), hash)),
            Some(&Some(Value::Integer(7)))
        );
        assert_eq!(
            raw.get(&format!("__{hash}")),
            Some(&Some(Value::Integer(7)))
        );
        assert_eq!(raw.len(), 3);
    }
}
