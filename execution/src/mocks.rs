//! Fixtures for tests in this crate and downstream crates.

use anyhow::{anyhow, bail, Result};
use commonware_cryptography::{sha256::Sha256, Hasher};
use ledgerplay_types::{Address, Currency, TxId, Value};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    action::{Action, TYPE_ID_KEY},
    context::{ActionContext, ContextMetadata},
    delta::StateDelta,
    evaluator::{EvaluationInput, OutOfMemory},
    marshal::address_to_value,
    state::MemoryState,
};

/// Address whose every byte is `n`.
pub fn address(n: u8) -> Address {
    Address::new([n; 20])
}

/// The only address allowed to mint [`currency`].
pub fn minter() -> Address {
    address(0xaa)
}

/// A capped, supply-tracked currency with two decimal places minted by [`minter`].
pub fn currency() -> Currency {
    Currency::capped("NCG", 2, 1_000_000, 0, Some(BTreeSet::from([minter()])))
        .expect("valid test currency")
}

/// An empty ledger over `base`, signed by [`minter`].
pub fn state_delta(base: MemoryState) -> StateDelta {
    StateDelta::new(Arc::new(base), minter())
}

pub fn metadata(signer: Address, tx_id: Option<TxId>) -> ContextMetadata {
    ContextMetadata {
        genesis_hash: None,
        signer,
        tx_id,
        miner: address(0xbb),
        block_index: 1,
        block_protocol_version: 0,
        rehearsal: false,
        native_token_predicate: None,
    }
}

/// A context over an empty ledger signed by [`minter`].
pub fn action_context(tx_id: Option<TxId>, seed: i32) -> ActionContext {
    ActionContext::new(
        metadata(minter(), tx_id),
        state_delta(MemoryState::new()),
        seed,
        None,
    )
}

/// A block-action context over `base` signed by `signer`.
pub fn action_context_with(base: MemoryState, signer: Address, seed: i32) -> ActionContext {
    ActionContext::new(
        metadata(signer, None),
        StateDelta::new(Arc::new(base), signer),
        seed,
        None,
    )
}

/// Input for a transaction signed by [`minter`] at block 1.
pub fn evaluation_input() -> EvaluationInput {
    let mut input = EvaluationInput::new(
        Sha256::hash(b"pre-evaluation"),
        1,
        minter(),
        b"signature".to_vec(),
    );
    input.tx_id = Some(Sha256::hash(b"tx"));
    input.miner = address(0xbb);
    input
}

/// What a [`MockAction`] does when executed.
#[derive(Clone, Debug, PartialEq)]
pub enum Behavior {
    /// Writes `value` at `address`.
    Write { address: Address, value: Value },
    /// Stores the first draw from the context's random stream at `address`.
    Draw { address: Address },
    Fail { message: String },
    Panic { message: String },
    OutOfMemory,
}

/// Scriptable action that counts its executions.
#[derive(Clone, Debug)]
pub struct MockAction {
    pub behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl MockAction {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn write(address: Address, value: impl Into<Value>) -> Self {
        Self::new(Behavior::Write {
            address,
            value: value.into(),
        })
    }

    pub fn draw(address: Address) -> Self {
        Self::new(Behavior::Draw { address })
    }

    pub fn fail(message: &str) -> Self {
        Self::new(Behavior::Fail {
            message: message.to_string(),
        })
    }

    pub fn panic(message: &str) -> Self {
        Self::new(Behavior::Panic {
            message: message.to_string(),
        })
    }

    pub fn out_of_memory() -> Self {
        Self::new(Behavior::OutOfMemory)
    }

    /// Number of times [`Action::execute`] ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Action for MockAction {
    fn action_type(&self) -> &str {
        match self.behavior {
            Behavior::Write { .. } => "mock_write",
            Behavior::Draw { .. } => "mock_draw",
            Behavior::Fail { .. } => "mock_fail",
            Behavior::Panic { .. } => "mock_panic",
            Behavior::OutOfMemory => "mock_out_of_memory",
        }
    }

    fn plain_value(&self) -> Value {
        let mut entries = vec![(TYPE_ID_KEY, Value::from(self.action_type()))];
        match &self.behavior {
            Behavior::Write { address, value } => {
                entries.push(("address", address_to_value(address)));
                entries.push(("value", value.clone()));
            }
            Behavior::Draw { address } => entries.push(("address", address_to_value(address))),
            Behavior::Fail { message } | Behavior::Panic { message } => {
                entries.push(("message", Value::from(message.as_str())))
            }
            Behavior::OutOfMemory => {}
        }
        Value::dict(entries)
    }

    fn load_plain_value(&mut self, _: &Value) -> Result<()> {
        bail!("mock actions cannot be loaded")
    }

    fn execute(&self, context: &mut ActionContext) -> Result<StateDelta> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Write { address, value } => {
                Ok(context.previous_states().set_state(*address, value.clone()))
            }
            Behavior::Draw { address } => {
                let drawn = context.random().next_i32();
                Ok(context
                    .previous_states()
                    .set_state(*address, Value::Integer(drawn.into())))
            }
            Behavior::Fail { message } => Err(anyhow!("{message}")),
            Behavior::Panic { message } => panic!("{message}"),
            Behavior::OutOfMemory => Err(anyhow::Error::new(OutOfMemory).context("allocating")),
        }
    }
}
