//! State commitment used for failure diagnostics.

use commonware_codec::Encode;
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Hasher,
};
use ledgerplay_types::{codec::write_string, Value};
use thiserror::Error as ThisError;

use crate::{delta::StateDelta, overlay::CowMap};

#[derive(Debug, ThisError)]
pub enum TrieError {
    #[error("unsetting {key} is not supported")]
    UnsetNotSupported { key: String },
}

/// A content-addressed commitment over raw ledger keys.
pub trait Trie {
    /// Returns a new trie with `key` bound to `value`; the receiver is unchanged.
    fn set(&self, key: &str, value: Value) -> Result<Box<dyn Trie>, TrieError>;
    fn root_hash(&self) -> Digest;
}

/// In-memory trie committing to its sorted entries.
#[derive(Clone, Debug, Default)]
pub struct MemoryTrie {
    entries: CowMap<String, Value>,
}

impl MemoryTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(&key.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for MemoryTrie {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Trie for MemoryTrie {
    fn set(&self, key: &str, value: Value) -> Result<Box<dyn Trie>, TrieError> {
        Ok(Box::new(Self {
            entries: self.entries.set(key.to_string(), value),
        }))
    }

    fn root_hash(&self) -> Digest {
        let mut hasher = Sha256::new();
        let mut buf = Vec::new();
        for (key, value) in self.entries.iter() {
            buf.clear();
            write_string(key, &mut buf);
            hasher.update(&buf);
            hasher.update(&value.encode());
        }
        hasher.finalize()
    }
}

/// Root hash of `trie` after replaying every pending raw write of `ledger` onto it.
///
/// Unset entries fail with [`TrieError::UnsetNotSupported`].
pub fn root_hash_after(trie: &dyn Trie, ledger: &StateDelta) -> Result<Digest, TrieError> {
    let mut updated: Option<Box<dyn Trie>> = None;
    for (key, value) in ledger.updated_raw_states() {
        let value = value.ok_or_else(|| TrieError::UnsetNotSupported { key: key.clone() })?;
        let next = match &updated {
            Some(current) => current.set(&key, value)?,
            None => trie.set(&key, value)?,
        };
        updated = Some(next);
    }
    Ok(updated.map_or_else(|| trie.root_hash(), |current| current.root_hash()))
}
