//! Sequential evaluation of one transaction's actions.
//!
//! Actions run strictly in order, each against the ledger produced by its predecessor.
//! Every action gets a seed one greater than the previous one. The first failing action
//! ends the transaction: it is recorded with the ledger it started from and nothing
//! after it runs. Running out of memory is not a per-action failure; it aborts the
//! whole evaluation.

use commonware_cryptography::sha256::Digest;
use commonware_utils::hex;
use ledgerplay_types::{Address, BlockHash, TxId, Value};
use sha1::{Digest as _, Sha1};
use std::{
    any::Any,
    collections::TryReserveError,
    iter::FusedIterator,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error as ThisError;
use tracing::{debug, error, warn};

use crate::{
    action::Action,
    context::{ActionContext, ContextMetadata, NativeTokenPredicate},
    delta::StateDelta,
    trie::Trie,
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Derives the seed of an action from `(pre-evaluation hash, SHA-1(signature),
/// signature, offset)`.
pub type SeedGenerator = fn(&[u8], &[u8], &[u8], i32) -> i32;

/// Receives each successfully executed action and how long it took.
pub type Observer = Box<dyn FnMut(&dyn Action, Duration) -> anyhow::Result<()>>;

fn le_i32_prefix(bytes: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    let len = bytes.len().min(buf.len());
    buf[..len].copy_from_slice(&bytes[..len]);
    i32::from_le_bytes(buf)
}

/// XOR of the little-endian leading words of the pre-evaluation hash and the hashed
/// signature, plus `offset`. An empty input contributes zero.
pub fn generate_random_seed(
    pre_evaluation_hash: &[u8],
    hashed_signature: &[u8],
    signature: &[u8],
    offset: i32,
) -> i32 {
    let seed = if pre_evaluation_hash.is_empty() {
        0
    } else {
        le_i32_prefix(pre_evaluation_hash)
    };
    let salt = if signature.is_empty() {
        0
    } else {
        le_i32_prefix(hashed_signature)
    };
    (seed ^ salt).wrapping_add(offset)
}

/// Marker for resource exhaustion inside an action.
///
/// An action error whose chain contains this (or a [`TryReserveError`]) aborts the
/// evaluation instead of being recorded.
#[derive(Debug, Default, Clone, Copy, ThisError)]
#[error("out of memory")]
pub struct OutOfMemory;

fn is_out_of_memory(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.is::<OutOfMemory>() || cause.is::<TryReserveError>())
}

fn display_hash(digest: &Digest) -> String {
    hex(digest.as_ref())
}

fn display_tx(tx_id: &Option<TxId>) -> String {
    tx_id
        .as_ref()
        .map_or_else(|| "none".to_string(), display_hash)
}

fn display_digest(digest: &Option<Digest>) -> String {
    digest
        .as_ref()
        .map_or_else(|| "none".to_string(), display_hash)
}

/// Why an action failed, with the surrounding evaluation details.
#[derive(Debug, ThisError)]
pub enum EvaluationError {
    #[error("the action {action_type} is not rehearsal-safe")]
    NotRehearsalSafe {
        action_type: String,
        action: Value,
        #[source]
        source: BoxError,
    },
    #[error(
        "the action {action_type} (block #{block_index}, pre-evaluation hash {}, tx {}, previous state root hash {}) threw an exception during execution",
        display_hash(.pre_evaluation_hash),
        display_tx(.tx_id),
        display_digest(.previous_state_root_hash)
    )]
    UnexpectedlyTerminated {
        action_type: String,
        action: Value,
        tx_id: Option<TxId>,
        block_index: u64,
        pre_evaluation_hash: Digest,
        previous_state_root_hash: Option<Digest>,
        #[source]
        source: BoxError,
    },
}

impl EvaluationError {
    pub fn action_type(&self) -> &str {
        match self {
            EvaluationError::NotRehearsalSafe { action_type, .. }
            | EvaluationError::UnexpectedlyTerminated { action_type, .. } => action_type,
        }
    }

    /// The error the action itself raised.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            EvaluationError::NotRehearsalSafe { source, .. }
            | EvaluationError::UnexpectedlyTerminated { source, .. } => source.as_ref(),
        }
    }
}

/// Evaluation stopped because an action ran out of memory.
#[derive(Debug, ThisError)]
#[error(
    "action {action_type} of tx {} of block #{block_index} ran out of memory",
    display_tx(.tx_id)
)]
pub struct EvaluationAbort {
    pub action_type: String,
    pub tx_id: Option<TxId>,
    pub block_index: u64,
    #[source]
    pub source: BoxError,
}

/// The outcome of one attempted action.
#[derive(Debug)]
pub struct ActionEvaluation {
    pub action: Arc<dyn Action>,
    /// A context equivalent to the one the action ran with, rebuilt from its seed.
    pub input_context: ActionContext,
    /// The action's output, or the ledger it started from when it failed.
    pub output_states: StateDelta,
    pub exception: Option<EvaluationError>,
}

impl ActionEvaluation {
    pub fn is_success(&self) -> bool {
        self.exception.is_none()
    }
}

/// Block and transaction details an evaluation runs under.
#[derive(Clone)]
pub struct EvaluationInput {
    pub pre_evaluation_hash: Digest,
    pub block_index: u64,
    pub block_protocol_version: i32,
    pub tx_id: Option<TxId>,
    pub miner: Address,
    pub signer: Address,
    pub signature: Vec<u8>,
    pub genesis_hash: Option<BlockHash>,
    pub rehearsal: bool,
    pub native_token_predicate: Option<NativeTokenPredicate>,
    pub previous_trie: Option<Arc<dyn Trie>>,
    pub seed_generator: SeedGenerator,
}

impl EvaluationInput {
    pub fn new(
        pre_evaluation_hash: Digest,
        block_index: u64,
        signer: Address,
        signature: Vec<u8>,
    ) -> Self {
        Self {
            pre_evaluation_hash,
            block_index,
            block_protocol_version: 0,
            tx_id: None,
            miner: Address::default(),
            signer,
            signature,
            genesis_hash: None,
            rehearsal: false,
            native_token_predicate: None,
            previous_trie: None,
            seed_generator: generate_random_seed,
        }
    }

    /// Seed of the first action.
    pub fn initial_seed(&self) -> i32 {
        let hashed_signature = Sha1::digest(&self.signature);
        (self.seed_generator)(
            self.pre_evaluation_hash.as_ref(),
            &hashed_signature,
            &self.signature,
            0,
        )
    }

    fn metadata(&self) -> ContextMetadata {
        ContextMetadata {
            genesis_hash: self.genesis_hash,
            signer: self.signer,
            tx_id: self.tx_id,
            miner: self.miner,
            block_index: self.block_index,
            block_protocol_version: self.block_protocol_version,
            rehearsal: self.rehearsal,
            native_token_predicate: self.native_token_predicate.clone(),
        }
    }
}

/// Lazily evaluates `actions` against `previous_state`.
///
/// Nothing runs until the returned iterator is pulled; dropping it early skips the
/// remaining actions. `previous_state` is rebound to the input's signer.
pub fn evaluate_actions(
    input: EvaluationInput,
    previous_state: StateDelta,
    actions: Vec<Arc<dyn Action>>,
) -> ActionEvaluations {
    let seed = input.initial_seed();
    ActionEvaluations {
        metadata: input.metadata(),
        pre_evaluation_hash: input.pre_evaluation_hash,
        previous_trie: input.previous_trie,
        actions: actions.into_iter(),
        states: previous_state.with_signer(input.signer),
        seed,
        halted: false,
        observer: None,
    }
}

/// Iterator over the evaluations of one transaction.
///
/// Yields `Ok` for every attempted action (including the failing one) and a single
/// `Err` if an action ran out of memory. Fused once it halts.
pub struct ActionEvaluations {
    metadata: ContextMetadata,
    pre_evaluation_hash: Digest,
    previous_trie: Option<Arc<dyn Trie>>,
    actions: std::vec::IntoIter<Arc<dyn Action>>,
    states: StateDelta,
    seed: i32,
    halted: bool,
    observer: Option<Observer>,
}

impl ActionEvaluations {
    /// Calls `observer` after every successful action. Its errors and panics are
    /// discarded.
    pub fn with_observer(
        mut self,
        observer: impl FnMut(&dyn Action, Duration) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Seed the next action will receive.
    pub fn next_seed(&self) -> i32 {
        self.seed
    }

    fn observe(&mut self, action: &dyn Action, elapsed: Duration) {
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| observer(action, elapsed))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(?err, "observer failed"),
            Err(payload) => debug!(panic = %panic_message(&*payload), "observer panicked"),
        }
    }

    fn fail(
        &self,
        action: &dyn Action,
        context: &ActionContext,
        err: anyhow::Error,
    ) -> EvaluationError {
        let action_type = action.action_type().to_string();
        if context.rehearsal() {
            debug!(
                action = %action_type,
                tx_id = %display_tx(&self.metadata.tx_id),
                error = %format!("{err:#}"),
                "action is not rehearsal-safe"
            );
            return EvaluationError::NotRehearsalSafe {
                action_type,
                action: action.plain_value(),
                source: err.into(),
            };
        }
        error!(
            action = %action_type,
            tx_id = %display_tx(&self.metadata.tx_id),
            block_index = self.metadata.block_index,
            pre_evaluation_hash = %hex(self.pre_evaluation_hash.as_ref()),
            error = %format!("{err:#}"),
            "action threw an exception during execution"
        );
        let previous_state_root_hash = match context.previous_state_root_hash() {
            Ok(hash) => hash,
            Err(trie_err) => {
                warn!(error = %trie_err, "failed to compute previous state root hash");
                None
            }
        };
        EvaluationError::UnexpectedlyTerminated {
            action_type,
            action: action.plain_value(),
            tx_id: self.metadata.tx_id,
            block_index: self.metadata.block_index,
            pre_evaluation_hash: self.pre_evaluation_hash,
            previous_state_root_hash,
            source: err.into(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Iterator for ActionEvaluations {
    type Item = Result<ActionEvaluation, EvaluationAbort>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted {
            return None;
        }
        let Some(action) = self.actions.next() else {
            self.halted = true;
            return None;
        };

        let mut context = ActionContext::new(
            self.metadata.clone(),
            self.states.clone(),
            self.seed,
            self.previous_trie.clone(),
        );
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| action.execute(&mut context)))
            .unwrap_or_else(|payload| {
                Err(anyhow::anyhow!(
                    "action panicked: {}",
                    panic_message(&*payload)
                ))
            });

        match result {
            Ok(output_states) => {
                let elapsed = started.elapsed();
                debug!(
                    action = action.action_type(),
                    seed = self.seed,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "action executed"
                );
                self.observe(action.as_ref(), elapsed);
                let evaluation = ActionEvaluation {
                    action: Arc::clone(&action),
                    input_context: context.unconsumed_context(),
                    output_states: output_states.clone(),
                    exception: None,
                };
                self.states = output_states;
                self.seed = self.seed.wrapping_add(1);
                Some(Ok(evaluation))
            }
            Err(err) if is_out_of_memory(&err) => {
                self.halted = true;
                error!(
                    action = action.action_type(),
                    tx_id = %display_tx(&self.metadata.tx_id),
                    block_index = self.metadata.block_index,
                    pre_evaluation_hash = %hex(self.pre_evaluation_hash.as_ref()),
                    "action ran out of memory"
                );
                Some(Err(EvaluationAbort {
                    action_type: action.action_type().to_string(),
                    tx_id: self.metadata.tx_id,
                    block_index: self.metadata.block_index,
                    source: err.into(),
                }))
            }
            Err(err) => {
                self.halted = true;
                let exception = self.fail(action.as_ref(), &context, err);
                Some(Ok(ActionEvaluation {
                    action: Arc::clone(&action),
                    input_context: context.unconsumed_context(),
                    output_states: self.states.clone(),
                    exception: Some(exception),
                }))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.halted {
            return (0, Some(0));
        }
        (0, Some(self.actions.len()))
    }
}

impl FusedIterator for ActionEvaluations {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_combines_hash_and_signature() {
        let hash = [1u8, 0, 0, 0, 9, 9];
        let hashed = [3u8, 0, 0, 0];
        assert_eq!(generate_random_seed(&hash, &hashed, b"sig", 0), 1 ^ 3);
        assert_eq!(generate_random_seed(&hash, &hashed, b"", 0), 1);
        assert_eq!(generate_random_seed(&[], &hashed, b"sig", 5), 3 + 5);
        assert_eq!(
            generate_random_seed(&[0xff, 0xff, 0xff, 0x7f], &[], b"", 1),
            i32::MIN
        );
    }

    #[test]
    fn initial_seed_hashes_signature_with_sha1() {
        let input = EvaluationInput::new(
            Digest::from([0u8; 32]),
            1,
            Address::default(),
            b"abc".to_vec(),
        );
        let hashed = Sha1::digest(b"abc");
        let expected = i32::from_le_bytes([hashed[0], hashed[1], hashed[2], hashed[3]]);
        assert_eq!(input.initial_seed(), expected);

        let unsigned =
            EvaluationInput::new(Digest::from([0u8; 32]), 1, Address::default(), vec![]);
        assert_eq!(unsigned.initial_seed(), 0);
    }

    #[test]
    fn out_of_memory_is_found_anywhere_in_chain() {
        let direct = anyhow::Error::new(OutOfMemory);
        assert!(is_out_of_memory(&direct));
        let wrapped = anyhow::Error::new(OutOfMemory).context("while loading");
        assert!(is_out_of_memory(&wrapped));
        let reserve = Vec::<u8>::new().try_reserve(usize::MAX).unwrap_err();
        assert!(is_out_of_memory(&anyhow::Error::new(reserve)));
        assert!(!is_out_of_memory(&anyhow::anyhow!("plain failure")));
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic payload");
    }
}
