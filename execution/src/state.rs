use anyhow::Result;
use ledgerplay_types::{Address, Currency, RawAmount, Value};
use std::collections::BTreeMap;

/// Read-only access to committed ledger state.
///
/// Implementations must return exactly one entry per requested address, in request
/// order, with `None` for unknown addresses. Unknown balances are zero.
pub trait State {
    fn get_states(&self, addresses: &[Address]) -> Result<Vec<Option<Value>>>;
    fn get_balance(&self, address: &Address, currency: &Currency) -> Result<RawAmount>;
    fn get_total_supply(&self, currency: &Currency) -> Result<RawAmount>;
}

/// In-memory committed state.
#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    states: BTreeMap<Address, Value>,
    balances: BTreeMap<(Address, Currency), RawAmount>,
    supplies: BTreeMap<Currency, RawAmount>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, address: Address, value: Value) -> Self {
        self.states.insert(address, value);
        self
    }

    pub fn with_balance(mut self, address: Address, currency: Currency, amount: RawAmount) -> Self {
        self.balances.insert((address, currency), amount);
        self
    }

    pub fn with_total_supply(mut self, currency: Currency, amount: RawAmount) -> Self {
        self.supplies.insert(currency, amount);
        self
    }
}

impl State for MemoryState {
    fn get_states(&self, addresses: &[Address]) -> Result<Vec<Option<Value>>> {
        Ok(addresses
            .iter()
            .map(|address| self.states.get(address).cloned())
            .collect())
    }

    fn get_balance(&self, address: &Address, currency: &Currency) -> Result<RawAmount> {
        Ok(self
            .balances
            .get(&(*address, currency.clone()))
            .copied()
            .unwrap_or_default())
    }

    fn get_total_supply(&self, currency: &Currency) -> Result<RawAmount> {
        Ok(self.supplies.get(currency).copied().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_state_defaults() {
        let currency = Currency::uncapped("GOLD", 0, None).unwrap();
        let known = Address::new([1; 20]);
        let unknown = Address::new([2; 20]);
        let state = MemoryState::new()
            .with_state(known, Value::from("hello"))
            .with_balance(known, currency.clone(), 5)
            .with_total_supply(currency.clone(), 5);

        assert_eq!(
            state.get_states(&[unknown, known, unknown]).unwrap(),
            vec![None, Some(Value::from("hello")), None]
        );
        assert_eq!(state.get_balance(&known, &currency).unwrap(), 5);
        assert_eq!(state.get_balance(&unknown, &currency).unwrap(), 0);
        assert_eq!(state.get_total_supply(&currency).unwrap(), 5);
    }
}
