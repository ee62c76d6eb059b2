//! Replays the transactions of a validated fixture and reports what each action did.

use anyhow::{Context as _, Result};
use commonware_cryptography::sha256::Digest;
use commonware_utils::hex;
use ledgerplay_execution::{
    evaluate_actions, evaluation_digest, native_action_loader, root_hash_after, Action,
    ActionEvaluation, ActionLoader, EvaluationError, EvaluationInput, ForkRouter, MemoryTrie,
    NativeTokenPredicate, StateDelta, Trie,
};
use ledgerplay_types::{Address, TxId};
use std::{io::Write, sync::Arc};
use tracing::{debug, info, warn};

use crate::{ReplayTransaction, ValidatedConfig};

/// Totals of one replay run.
#[derive(Debug)]
pub struct ReplayOutcome {
    pub transactions: usize,
    pub evaluations: usize,
    pub failures: usize,
    /// Ledger after the last transaction.
    pub ledger: StateDelta,
    /// State root after the last transaction.
    pub state_root_hash: Digest,
}

fn display_tx(tx_id: Option<&TxId>) -> String {
    tx_id.map_or_else(|| "none".to_string(), |tx_id| hex(tx_id.as_ref()))
}

fn describe(err: &EvaluationError) -> String {
    format!("{err}: {}", err.cause())
}

fn load_actions(
    loader: &impl ActionLoader,
    transaction: &ReplayTransaction,
) -> Result<Vec<Arc<dyn Action>>> {
    transaction
        .actions
        .iter()
        .enumerate()
        .map(|(n, plain)| {
            loader
                .load(transaction.block_index, plain)
                .map(Arc::<dyn Action>::from)
                .with_context(|| format!("failed to load action #{}", n + 1))
        })
        .collect()
}

fn write_digests(out: &mut impl Write, evaluations: &[ActionEvaluation]) -> Result<()> {
    let count = evaluations.len();
    for (i, evaluation) in evaluations.iter().enumerate() {
        let delta = evaluation_digest(evaluation)?;
        let line = format!(
            "--- action evaluation {}/{count}: tx-id({}), action-type(\"{}\"), delta: {}",
            i + 1,
            display_tx(evaluation.input_context.tx_id()),
            evaluation.action.action_type(),
            hex(delta.as_ref()),
        );
        match &evaluation.exception {
            None => writeln!(out, "{line}, no-exception")?,
            Some(err) => {
                writeln!(out, "{line}, exception below")?;
                writeln!(out, "---- {}", describe(err))?;
            }
        }
    }
    Ok(())
}

/// Evaluates every transaction of `config` in order, writing the report to `out`.
///
/// Each transaction starts from the ledger the previous one ended with. A failing action
/// stops its transaction only; running out of memory stops the replay.
pub fn replay(
    config: &ValidatedConfig,
    verbose: bool,
    out: &mut impl Write,
) -> Result<ReplayOutcome> {
    let loader = ForkRouter::single(native_action_loader());
    let native_tokens = config.native_tokens.clone();
    let predicate =
        NativeTokenPredicate::new(move |currency| native_tokens.contains(currency.ticker()));
    let trie: Arc<dyn Trie> = Arc::new(
        config
            .base_entries
            .clone()
            .into_iter()
            .collect::<MemoryTrie>(),
    );
    let mut ledger = StateDelta::new(Arc::new(config.base.clone()), Address::default());
    let (mut evaluated, mut failures) = (0, 0);
    info!(
        transactions = config.transactions.len(),
        state_root_hash = %hex(trie.root_hash().as_ref()),
        "replay started"
    );

    for (index, transaction) in config.transactions.iter().enumerate() {
        writeln!(out, "tx id: {}", display_tx(transaction.tx_id.as_ref()))?;
        if verbose {
            writeln!(
                out,
                "block #{} pre-evaluation hash: {}",
                transaction.block_index,
                hex(transaction.pre_evaluation_hash.as_ref())
            )?;
        }
        let actions = match load_actions(&loader, transaction) {
            Ok(actions) => actions,
            Err(err) => {
                warn!(tx = index, error = %format!("{err:#}"), "skipping transaction");
                writeln!(out, "tx #{} skipped: {err:#}", index + 1)?;
                failures += 1;
                continue;
            }
        };

        let input = EvaluationInput {
            tx_id: transaction.tx_id,
            miner: transaction.miner,
            block_protocol_version: transaction.block_protocol_version,
            genesis_hash: config.genesis_hash,
            native_token_predicate: Some(predicate.clone()),
            previous_trie: Some(Arc::clone(&trie)),
            ..EvaluationInput::new(
                transaction.pre_evaluation_hash,
                transaction.block_index,
                transaction.signer,
                transaction.signature.clone(),
            )
        };

        let mut evaluations = Vec::with_capacity(actions.len());
        for (n, evaluation) in evaluate_actions(input, ledger.clone(), actions).enumerate() {
            let evaluation = evaluation.context("replay ended with exception")?;
            let action_num = n + 1;
            match &evaluation.exception {
                Some(err) => {
                    writeln!(out, "action #{action_num} exception: {}", describe(err))?;
                    failures += 1;
                }
                None => {
                    writeln!(out, "- action #{action_num}: {}", evaluation.action.action_type())?;
                    if verbose {
                        let states = evaluation.output_states.updated_states();
                        for (m, (address, value)) in states.iter().enumerate() {
                            let address_num = m + 1;
                            writeln!(
                                out,
                                "- action #{action_num} updated address #{address_num}({address}) beginning.."
                            )?;
                            writeln!(out, "{value}")?;
                            writeln!(
                                out,
                                "- action #{action_num} updated address #{address_num}({address}) end.."
                            )?;
                        }
                    }
                }
            }
            evaluations.push(evaluation);
        }
        evaluated += evaluations.len();

        if let Some(last) = evaluations.last() {
            ledger = last.output_states.clone();
        }
        write_digests(out, &evaluations)?;
        if verbose {
            writeln!(
                out,
                "state root hash: {}",
                hex(root_hash_after(trie.as_ref(), &ledger)?.as_ref())
            )?;
        }
        debug!(tx = index, evaluations = evaluations.len(), "transaction replayed");
    }

    let state_root_hash = root_hash_after(trie.as_ref(), &ledger)?;
    info!(
        evaluations = evaluated,
        failures,
        state_root_hash = %hex(state_root_hash.as_ref()),
        "replay finished"
    );
    Ok(ReplayOutcome {
        transactions: config.transactions.len(),
        evaluations: evaluated,
        failures,
        ledger,
        state_root_hash,
    })
}
