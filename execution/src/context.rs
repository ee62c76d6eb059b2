//! Per-action execution environment.

use commonware_cryptography::sha256::Digest;
use ledgerplay_types::{Address, BlockHash, Currency, FungibleAssetValue, TxId, Value};
use std::{cell::OnceCell, fmt, sync::Arc};

use crate::{
    delta::{LedgerError, StateDelta},
    random::SeededRandom,
    trie::{root_hash_after, Trie, TrieError},
};

/// Decides whether a currency is the chain's native token.
#[derive(Clone)]
pub struct NativeTokenPredicate(Arc<dyn Fn(&Currency) -> bool + Send + Sync>);

impl NativeTokenPredicate {
    pub fn new(predicate: impl Fn(&Currency) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub fn is_native(&self, currency: &Currency) -> bool {
        (self.0)(currency)
    }
}

impl fmt::Debug for NativeTokenPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeTokenPredicate(..)")
    }
}

/// Block and transaction metadata visible to an action.
#[derive(Clone, Debug)]
pub struct ContextMetadata {
    pub genesis_hash: Option<BlockHash>,
    pub signer: Address,
    /// `None` for block actions.
    pub tx_id: Option<TxId>,
    pub miner: Address,
    pub block_index: u64,
    /// Carried for actions and marshalling only. Ledger operations, transfers
    /// included, behave the same under every version.
    pub block_protocol_version: i32,
    pub rehearsal: bool,
    pub native_token_predicate: Option<NativeTokenPredicate>,
}

impl ContextMetadata {
    pub fn block_action(&self) -> bool {
        self.tx_id.is_none()
    }
}

/// The read environment handed to a single action.
///
/// The random stream is consumed as the action draws from it, so a context is meant
/// to be used once. [`ActionContext::unconsumed_context`] rebuilds one from the stored
/// seed.
pub struct ActionContext {
    metadata: ContextMetadata,
    previous_states: StateDelta,
    random: SeededRandom,
    previous_trie: Option<Arc<dyn Trie>>,
    previous_state_root_hash: OnceCell<Option<Digest>>,
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("metadata", &self.metadata)
            .field("random_seed", &self.random.seed())
            .field("previous_states", &self.previous_states)
            .finish_non_exhaustive()
    }
}

impl ActionContext {
    pub fn new(
        metadata: ContextMetadata,
        previous_states: StateDelta,
        random_seed: i32,
        previous_trie: Option<Arc<dyn Trie>>,
    ) -> Self {
        Self {
            metadata,
            previous_states,
            random: SeededRandom::new(random_seed),
            previous_trie,
            previous_state_root_hash: OnceCell::new(),
        }
    }

    pub fn metadata(&self) -> &ContextMetadata {
        &self.metadata
    }

    pub fn genesis_hash(&self) -> Option<&BlockHash> {
        self.metadata.genesis_hash.as_ref()
    }

    pub fn signer(&self) -> Address {
        self.metadata.signer
    }

    pub fn tx_id(&self) -> Option<&TxId> {
        self.metadata.tx_id.as_ref()
    }

    pub fn miner(&self) -> Address {
        self.metadata.miner
    }

    pub fn block_index(&self) -> u64 {
        self.metadata.block_index
    }

    pub fn block_protocol_version(&self) -> i32 {
        self.metadata.block_protocol_version
    }

    pub fn rehearsal(&self) -> bool {
        self.metadata.rehearsal
    }

    pub fn block_action(&self) -> bool {
        self.metadata.block_action()
    }

    /// Whether `currency` is native. Without a predicate nothing is.
    pub fn is_native_token(&self, currency: &Currency) -> bool {
        self.metadata
            .native_token_predicate
            .as_ref()
            .is_some_and(|predicate| predicate.is_native(currency))
    }

    pub fn previous_states(&self) -> &StateDelta {
        &self.previous_states
    }

    pub fn random_seed(&self) -> i32 {
        self.random.seed()
    }

    pub fn random(&mut self) -> &mut SeededRandom {
        &mut self.random
    }

    pub fn get_state(&self, address: &Address) -> Result<Option<Value>, LedgerError> {
        self.previous_states.get_state(address)
    }

    pub fn get_states(&self, addresses: &[Address]) -> Result<Vec<Option<Value>>, LedgerError> {
        self.previous_states.get_states(addresses)
    }

    pub fn get_balance(
        &self,
        address: &Address,
        currency: &Currency,
    ) -> Result<FungibleAssetValue, LedgerError> {
        self.previous_states.get_balance(address, currency)
    }

    pub fn get_total_supply(&self, currency: &Currency) -> Result<FungibleAssetValue, LedgerError> {
        self.previous_states.get_total_supply(currency)
    }

    /// Root hash of the previous trie after applying this context's pending writes.
    ///
    /// `None` without a trie. Computed on first success and cached.
    pub fn previous_state_root_hash(&self) -> Result<Option<Digest>, TrieError> {
        if let Some(hash) = self.previous_state_root_hash.get() {
            return Ok(*hash);
        }
        let hash = match &self.previous_trie {
            None => None,
            Some(trie) => Some(root_hash_after(trie.as_ref(), &self.previous_states)?),
        };
        let _ = self.previous_state_root_hash.set(hash);
        Ok(hash)
    }

    /// Presets the cached root hash, for contexts restored without their trie.
    pub(crate) fn with_previous_state_root_hash(self, hash: Option<Digest>) -> Self {
        let _ = self.previous_state_root_hash.set(hash);
        self
    }

    /// A fresh context with the same metadata, states, trie and seed.
    pub fn unconsumed_context(&self) -> ActionContext {
        let previous_state_root_hash = OnceCell::new();
        if let Some(hash) = self.previous_state_root_hash.get() {
            let _ = previous_state_root_hash.set(*hash);
        }
        ActionContext {
            metadata: self.metadata.clone(),
            previous_states: self.previous_states.clone(),
            random: SeededRandom::new(self.random.seed()),
            previous_trie: self.previous_trie.clone(),
            previous_state_root_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{state::MemoryState, trie::MemoryTrie};

    fn metadata(tx_id: Option<TxId>) -> ContextMetadata {
        ContextMetadata {
            genesis_hash: None,
            signer: Address::new([1; 20]),
            tx_id,
            miner: Address::new([2; 20]),
            block_index: 7,
            block_protocol_version: 0,
            rehearsal: false,
            native_token_predicate: None,
        }
    }

    fn states() -> StateDelta {
        StateDelta::new(Arc::new(MemoryState::new()), Address::new([1; 20]))
    }

    #[test]
    fn block_action_iff_no_tx() {
        assert!(metadata(None).block_action());
        assert!(!metadata(Some(Digest::from([3u8; 32]))).block_action());
    }

    #[test]
    fn unconsumed_context_restarts_random_stream() {
        let mut context = ActionContext::new(metadata(None), states(), 5, None);
        let first = context.random().next_i32();
        let second = context.random().next_i32();

        let mut fresh = context.unconsumed_context();
        assert_eq!(fresh.random_seed(), 5);
        assert_eq!(fresh.random().next_i32(), first);
        assert_eq!(fresh.random().next_i32(), second);
        assert_eq!(fresh.block_index(), 7);
    }

    #[test]
    fn root_hash_is_none_without_trie() {
        let context = ActionContext::new(metadata(None), states(), 0, None);
        assert_eq!(context.previous_state_root_hash().unwrap(), None);
    }

    #[test]
    fn root_hash_replays_pending_writes() {
        let address = Address::new([9; 20]);
        let pending = states().set_state(address, Value::from("x"));
        let trie: Arc<dyn Trie> = Arc::new(MemoryTrie::new());
        let context = ActionContext::new(metadata(None), pending, 0, Some(trie));

        let expected = MemoryTrie::new()
            .set(&address.to_hex(), Value::from("x"))
            .unwrap()
            .root_hash();
        assert_eq!(context.previous_state_root_hash().unwrap(), Some(expected));
        assert_eq!(context.previous_state_root_hash().unwrap(), Some(expected));
    }

    #[test]
    fn native_token_predicate_is_consulted() {
        let gold = Currency::uncapped("GOLD", 0, None).unwrap();
        let mut meta = metadata(None);
        let context = ActionContext::new(meta.clone(), states(), 0, None);
        assert!(!context.is_native_token(&gold));

        meta.native_token_predicate =
            Some(NativeTokenPredicate::new(|c: &Currency| c.ticker() == "GOLD"));
        let context = ActionContext::new(meta, states(), 0, None);
        assert!(context.is_native_token(&gold));
    }
}
