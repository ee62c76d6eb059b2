//! Copy-on-write maps backing the ledger overlay.

use std::{collections::BTreeMap, sync::Arc};

/// An immutable ordered map where every write produces a new map.
///
/// Maps derived from one another share storage until written; a write never changes
/// what an older handle observes.
#[derive(Debug)]
pub struct CowMap<K, V>(Arc<BTreeMap<K, V>>);

impl<K, V> Clone for CowMap<K, V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<K, V> Default for CowMap<K, V> {
    fn default() -> Self {
        Self(Arc::new(BTreeMap::new()))
    }
}

impl<K: Ord + Clone, V: Clone> CowMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.0.get(key)
    }

    /// Returns a new map with `key` bound to `value`.
    #[must_use]
    pub fn set(&self, key: K, value: V) -> Self {
        let mut next = (*self.0).clone();
        next.insert(key, value);
        Self(Arc::new(next))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.0.keys()
    }

    /// Whether both handles point at the same storage.
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<K: Ord + Clone, V: Clone> FromIterator<(K, V)> for CowMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for CowMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<K: Eq, V: Eq> Eq for CowMap<K, V> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_leaves_source_untouched() {
        let empty: CowMap<u8, &str> = CowMap::new();
        let one = empty.set(1, "a");
        let two = one.set(2, "b");
        let replaced = one.set(1, "z");

        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
        assert_eq!(one.get(&1), Some(&"a"));
        assert_eq!(two.len(), 2);
        assert_eq!(replaced.get(&1), Some(&"z"));
        assert!(!one.shares_storage(&two));
    }

    #[test]
    fn clones_share_until_written() {
        let map: CowMap<u8, u8> = [(1, 1), (2, 2)].into_iter().collect();
        let copy = map.clone();
        assert!(map.shares_storage(&copy));
        let written = copy.set(3, 3);
        assert!(!map.shares_storage(&written));
        assert_eq!(map, copy);
        assert_eq!(written.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
