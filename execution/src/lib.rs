//! Ledgerplay execution layer.
//!
//! This crate replays the actions of a transaction against a copy-on-write ledger
//! overlay ([`StateDelta`]) and records what each action saw and produced.
//!
//! ## Determinism requirements
//! - Actions draw randomness only from [`ActionContext::random`], seeded per action.
//! - Do not use wall-clock time inside actions. The evaluator measures elapsed time for
//!   observers only.
//! - All collections that feed marshalled output are ordered (`BTreeMap`/`BTreeSet`).
//!
//! ## Minimal evaluation (example)
//! ```rust,ignore
//! use ledgerplay_execution::{evaluate_actions, native::SetState, EvaluationInput, MemoryState, StateDelta};
//! use std::sync::Arc;
//!
//! let input = EvaluationInput::new(pre_evaluation_hash, block_index, signer, signature);
//! let ledger = StateDelta::new(Arc::new(MemoryState::new()), signer);
//! for evaluation in evaluate_actions(input, ledger, vec![Arc::new(SetState::default())]) {
//!     let evaluation = evaluation?;
//!     println!("{} success={}", evaluation.action.action_type(), evaluation.is_success());
//! }
//! ```

pub mod action;
pub mod context;
pub mod delta;
pub mod evaluator;
pub mod fork;
pub mod marshal;
pub mod native;
pub mod overlay;
pub mod random;
pub mod state;
pub mod trie;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;


pub use action::{Action, ActionLoader, TypedActionLoader, TYPE_ID_KEY};
pub use context::{ActionContext, ContextMetadata, NativeTokenPredicate};
pub use delta::{fungible_key, state_key, total_supply_key, LedgerError, SharedState, StateDelta};
pub use evaluator::{
    evaluate_actions, generate_random_seed, ActionEvaluation, ActionEvaluations,
    EvaluationAbort, EvaluationError, EvaluationInput, Observer, OutOfMemory, SeedGenerator,
};
pub use fork::{ForkRouter, ForkRouterError};
pub use marshal::{
    evaluation_digest, marshal_context, marshal_evaluation, marshal_state_delta,
    unmarshal_context, unmarshal_state_delta,
};
pub use native::native_action_loader;
pub use overlay::CowMap;
pub use random::{RandomError, SeededRandom};
pub use state::{MemoryState, State};
pub use trie::{root_hash_after, MemoryTrie, Trie, TrieError};
