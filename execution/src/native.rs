//! Built-in ledger actions.
//!
//! Plain values have the shape `{type_id: <text>, values: {...}}`.

use anyhow::{anyhow, bail, Result};
use ledgerplay_types::{Address, FungibleAssetValue, Value};

use crate::{
    action::{Action, TypedActionLoader, TYPE_ID_KEY},
    context::ActionContext,
    delta::StateDelta,
    marshal::{
        address_from_value, address_to_value, fungible_asset_value_from_value,
        fungible_asset_value_to_value,
    },
};

pub const SET_STATE: &str = "set_state";
pub const MINT_ASSET: &str = "mint_asset";
pub const TRANSFER_ASSET: &str = "transfer_asset";
pub const BURN_ASSET: &str = "burn_asset";
pub const DRAW_RANDOM: &str = "draw_random";

/// A loader that knows every built-in action.
pub fn native_action_loader() -> TypedActionLoader {
    TypedActionLoader::new()
        .register::<SetState>(SET_STATE)
        .register::<MintAsset>(MINT_ASSET)
        .register::<TransferAsset>(TRANSFER_ASSET)
        .register::<BurnAsset>(BURN_ASSET)
        .register::<DrawRandom>(DRAW_RANDOM)
}

fn plain(type_id: &str, values: Vec<(&str, Value)>) -> Value {
    Value::dict([
        (TYPE_ID_KEY, Value::from(type_id)),
        ("values", Value::dict(values)),
    ])
}

fn values<'a>(value: &'a Value, type_id: &str) -> Result<&'a Value> {
    match value.get(TYPE_ID_KEY).and_then(Value::as_text) {
        Some(found) if found == type_id => {}
        found => bail!("expected {type_id} plain value, got {found:?}"),
    }
    value
        .get("values")
        .filter(|values| values.as_dict().is_some())
        .ok_or_else(|| anyhow!("{type_id} plain value has no values"))
}

fn entry<'a>(values: &'a Value, key: &str) -> Result<&'a Value> {
    values
        .get(key)
        .ok_or_else(|| anyhow!("missing value {key:?}"))
}

fn loaded<'a>(amount: &'a Option<FungibleAssetValue>, type_id: &str) -> Result<&'a FungibleAssetValue> {
    amount
        .as_ref()
        .ok_or_else(|| anyhow!("{type_id} action has not been loaded"))
}

/// Writes `value` at `address`.
#[derive(Clone, Debug, PartialEq)]
pub struct SetState {
    pub address: Address,
    pub value: Value,
}

impl Default for SetState {
    fn default() -> Self {
        Self {
            address: Address::default(),
            value: Value::Null,
        }
    }
}

impl Action for SetState {
    fn action_type(&self) -> &str {
        SET_STATE
    }

    fn plain_value(&self) -> Value {
        plain(
            SET_STATE,
            vec![
                ("address", address_to_value(&self.address)),
                ("value", self.value.clone()),
            ],
        )
    }

    fn load_plain_value(&mut self, value: &Value) -> Result<()> {
        let values = values(value, SET_STATE)?;
        self.address = address_from_value(entry(values, "address")?)?;
        self.value = entry(values, "value")?.clone();
        Ok(())
    }

    fn execute(&self, context: &mut ActionContext) -> Result<StateDelta> {
        Ok(context
            .previous_states()
            .set_state(self.address, self.value.clone()))
    }
}

/// Mints `amount` to `recipient` on behalf of the signer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MintAsset {
    pub recipient: Address,
    pub amount: Option<FungibleAssetValue>,
}

impl MintAsset {
    pub fn new(recipient: Address, amount: FungibleAssetValue) -> Self {
        Self {
            recipient,
            amount: Some(amount),
        }
    }
}

impl Action for MintAsset {
    fn action_type(&self) -> &str {
        MINT_ASSET
    }

    fn plain_value(&self) -> Value {
        plain(
            MINT_ASSET,
            vec![
                ("recipient", address_to_value(&self.recipient)),
                (
                    "amount",
                    self.amount
                        .as_ref()
                        .map_or(Value::Null, fungible_asset_value_to_value),
                ),
            ],
        )
    }

    fn load_plain_value(&mut self, value: &Value) -> Result<()> {
        let values = values(value, MINT_ASSET)?;
        self.recipient = address_from_value(entry(values, "recipient")?)?;
        self.amount = Some(fungible_asset_value_from_value(entry(values, "amount")?)?);
        Ok(())
    }

    fn execute(&self, context: &mut ActionContext) -> Result<StateDelta> {
        let amount = loaded(&self.amount, MINT_ASSET)?;
        Ok(context
            .previous_states()
            .mint_asset(&self.recipient, amount)?)
    }
}

/// Transfers `amount` from `sender` to `recipient`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransferAsset {
    pub sender: Address,
    pub recipient: Address,
    pub amount: Option<FungibleAssetValue>,
}

impl TransferAsset {
    pub fn new(sender: Address, recipient: Address, amount: FungibleAssetValue) -> Self {
        Self {
            sender,
            recipient,
            amount: Some(amount),
        }
    }
}

impl Action for TransferAsset {
    fn action_type(&self) -> &str {
        TRANSFER_ASSET
    }

    fn plain_value(&self) -> Value {
        plain(
            TRANSFER_ASSET,
            vec![
                ("sender", address_to_value(&self.sender)),
                ("recipient", address_to_value(&self.recipient)),
                (
                    "amount",
                    self.amount
                        .as_ref()
                        .map_or(Value::Null, fungible_asset_value_to_value),
                ),
            ],
        )
    }

    fn load_plain_value(&mut self, value: &Value) -> Result<()> {
        let values = values(value, TRANSFER_ASSET)?;
        self.sender = address_from_value(entry(values, "sender")?)?;
        self.recipient = address_from_value(entry(values, "recipient")?)?;
        self.amount = Some(fungible_asset_value_from_value(entry(values, "amount")?)?);
        Ok(())
    }

    fn execute(&self, context: &mut ActionContext) -> Result<StateDelta> {
        let amount = loaded(&self.amount, TRANSFER_ASSET)?;
        Ok(context.previous_states().transfer_asset(
            &self.sender,
            &self.recipient,
            amount,
            false,
        )?)
    }
}

/// Burns `amount` held by `owner`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BurnAsset {
    pub owner: Address,
    pub amount: Option<FungibleAssetValue>,
}

impl BurnAsset {
    pub fn new(owner: Address, amount: FungibleAssetValue) -> Self {
        Self {
            owner,
            amount: Some(amount),
        }
    }
}

impl Action for BurnAsset {
    fn action_type(&self) -> &str {
        BURN_ASSET
    }

    fn plain_value(&self) -> Value {
        plain(
            BURN_ASSET,
            vec![
                ("owner", address_to_value(&self.owner)),
                (
                    "amount",
                    self.amount
                        .as_ref()
                        .map_or(Value::Null, fungible_asset_value_to_value),
                ),
            ],
        )
    }

    fn load_plain_value(&mut self, value: &Value) -> Result<()> {
        let values = values(value, BURN_ASSET)?;
        self.owner = address_from_value(entry(values, "owner")?)?;
        self.amount = Some(fungible_asset_value_from_value(entry(values, "amount")?)?);
        Ok(())
    }

    fn execute(&self, context: &mut ActionContext) -> Result<StateDelta> {
        let amount = loaded(&self.amount, BURN_ASSET)?;
        Ok(context.previous_states().burn_asset(&self.owner, amount)?)
    }
}

/// Draws a number below `max` from the context's random stream and stores it at
/// `address`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrawRandom {
    pub address: Address,
    pub max: i32,
}

impl Action for DrawRandom {
    fn action_type(&self) -> &str {
        DRAW_RANDOM
    }

    fn plain_value(&self) -> Value {
        plain(
            DRAW_RANDOM,
            vec![
                ("address", address_to_value(&self.address)),
                ("max", Value::Integer(self.max.into())),
            ],
        )
    }

    fn load_plain_value(&mut self, value: &Value) -> Result<()> {
        let values = values(value, DRAW_RANDOM)?;
        self.address = address_from_value(entry(values, "address")?)?;
        let max = entry(values, "max")?
            .as_integer()
            .ok_or_else(|| anyhow!("max must be an integer"))?;
        self.max = i32::try_from(max)?;
        Ok(())
    }

    fn execute(&self, context: &mut ActionContext) -> Result<StateDelta> {
        let drawn = context.random().next_below(self.max)?;
        Ok(context
            .previous_states()
            .set_state(self.address, Value::Integer(drawn.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{action::ActionLoader, delta::LedgerError, mocks, state::MemoryState};

    #[test]
    fn loader_restores_every_native_action() {
        let loader = native_action_loader();
        let amount = FungibleAssetValue::from_raw(mocks::currency(), 10);
        let actions: Vec<Box<dyn Action>> = vec![
            Box::new(SetState {
                address: mocks::address(1),
                value: Value::from("v"),
            }),
            Box::new(MintAsset::new(mocks::address(2), amount.clone())),
            Box::new(TransferAsset::new(
                mocks::address(2),
                mocks::address(3),
                amount.clone(),
            )),
            Box::new(BurnAsset::new(mocks::address(3), amount)),
            Box::new(DrawRandom {
                address: mocks::address(4),
                max: 100,
            }),
        ];
        for action in actions {
            let plain = action.plain_value();
            let loaded = loader.load(0, &plain).unwrap();
            assert_eq!(loaded.action_type(), action.action_type());
            assert_eq!(loaded.plain_value(), plain);
        }
    }

    #[test]
    fn load_rejects_foreign_plain_values() {
        let plain = DrawRandom::default().plain_value();
        let mut set_state = SetState::default();
        assert!(set_state.load_plain_value(&plain).is_err());
    }

    #[test]
    fn unloaded_asset_actions_fail() {
        let mut context = mocks::action_context(None, 0);
        let err = MintAsset::default().execute(&mut context).unwrap_err();
        assert_eq!(err.to_string(), "mint_asset action has not been loaded");
    }

    #[test]
    fn mint_surfaces_ledger_errors() {
        let base = MemoryState::new();
        let mut context = mocks::action_context_with(base, mocks::address(9), 0);
        let mint = MintAsset::new(
            mocks::address(2),
            FungibleAssetValue::from_raw(mocks::currency(), 10),
        );
        let err = mint.execute(&mut context).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::CurrencyPermission { .. })
        ));
    }

    #[test]
    fn draw_random_uses_context_seed() {
        let action = DrawRandom {
            address: mocks::address(4),
            max: 1_000,
        };
        let mut first = mocks::action_context(None, 77);
        let mut second = mocks::action_context(None, 77);
        let a = action.execute(&mut first).unwrap();
        let b = action.execute(&mut second).unwrap();
        assert_eq!(a.updated_states(), b.updated_states());

        let drawn = a
            .get_state(&mocks::address(4))
            .unwrap()
            .and_then(|value| value.as_integer())
            .unwrap();
        assert!((0..1_000).contains(&drawn));
    }

    #[test]
    fn self_transfer_is_neutral_under_any_protocol_version() {
        let owner = mocks::address(2);
        let amount = FungibleAssetValue::from_raw(mocks::currency(), 40);
        let transfer = TransferAsset::new(owner, owner, amount);
        for version in [0, 1, 7] {
            let base = MemoryState::new().with_balance(owner, mocks::currency(), 100);
            let mut metadata = mocks::metadata(owner, None);
            metadata.block_protocol_version = version;
            let mut context = ActionContext::new(
                metadata,
                StateDelta::new(std::sync::Arc::new(base), owner),
                0,
                None,
            );
            let after = transfer.execute(&mut context).unwrap();
            assert_eq!(
                after.get_balance(&owner, &mocks::currency()).unwrap().raw_value(),
                100
            );
        }
    }
}
