/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A bounded set of [`Trie`]s, addressed by root hash.

use std::{
    collections::{HashMap, VecDeque},
    fmt::{self, Display, Formatter},
};

use crate::types::data_types::CryptoHash;

use super::{
    trie::{Path, Payload, Trie, TrieError},
    trie_update::TrieUpdate,
};

/// Keeps at most `capacity` tries. When a new trie would exceed the capacity, the trie that was added
/// the longest time ago is dropped.
///
/// A new forest holds only the empty trie.
pub struct Forest {
    capacity: usize,
    tries: HashMap<CryptoHash, Trie>,
    // Root hashes, from the oldest trie to the newest.
    order: VecDeque<CryptoHash>,
}

impl Forest {
    pub fn new(capacity: usize) -> Self {
        let mut forest = Self {
            capacity: capacity.max(1),
            tries: HashMap::new(),
            order: VecDeque::new(),
        };
        forest.add_trie(Trie::empty());
        forest
    }

    /// Add `trie`, dropping the oldest trie if the forest is full. Adding a trie whose root hash is
    /// already in the forest does nothing.
    pub fn add_trie(&mut self, trie: Trie) {
        let root_hash = trie.root_hash();
        if self.tries.contains_key(&root_hash) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.tries.remove(&oldest);
            }
        }
        self.order.push_back(root_hash);
        self.tries.insert(root_hash, trie);
    }

    pub fn add_tries(&mut self, tries: impl IntoIterator<Item = Trie>) {
        tries.into_iter().for_each(|trie| self.add_trie(trie))
    }

    pub fn get_trie(&self, root_hash: &CryptoHash) -> Option<&Trie> {
        self.tries.get(root_hash)
    }

    pub fn has_trie(&self, root_hash: &CryptoHash) -> bool {
        self.tries.contains_key(root_hash)
    }

    /// Get every trie, from the oldest to the newest.
    pub fn get_tries(&self) -> Vec<Trie> {
        self.order
            .iter()
            .filter_map(|root_hash| self.tries.get(root_hash))
            .cloned()
            .collect()
    }

    /// Build the trie that results from applying `update`. The new trie is not added to the forest.
    pub fn new_trie(&self, update: &TrieUpdate) -> Result<Trie, ForestError> {
        let base = self
            .get_trie(&update.root_hash)
            .ok_or(ForestError::UnknownState {
                root_hash: update.root_hash,
            })?;
        Ok(base.update(&update.paths, &update.payloads)?)
    }

    /// Apply `update` and add the resulting trie to the forest.
    pub fn update(&mut self, update: &TrieUpdate) -> Result<CryptoHash, ForestError> {
        let trie = self.new_trie(update)?;
        let root_hash = trie.root_hash();
        self.add_trie(trie);
        Ok(root_hash)
    }

    /// Read the payloads at `paths` in the trie with `root_hash`.
    pub fn read(
        &self,
        root_hash: &CryptoHash,
        paths: &[Path],
    ) -> Result<Vec<Option<Payload>>, ForestError> {
        let trie = self
            .get_trie(root_hash)
            .ok_or(ForestError::UnknownState {
                root_hash: *root_hash,
            })?;
        Ok(paths.iter().map(|path| trie.get(path).cloned()).collect())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForestError {
    /// No trie in the forest has this root hash.
    UnknownState { root_hash: CryptoHash },
    Trie(TrieError),
}

impl From<TrieError> for ForestError {
    fn from(value: TrieError) -> Self {
        ForestError::Trie(value)
    }
}

impl Display for ForestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ForestError::UnknownState { root_hash } => {
                write!(f, "no trie with root hash {} in the forest", root_hash)
            }
            ForestError::Trie(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for ForestError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(root_hash: CryptoHash, key: &str, value: &str) -> TrieUpdate {
        TrieUpdate::from_entries(
            root_hash,
            vec![(key.as_bytes().to_vec(), value.as_bytes().to_vec())],
        )
    }

    #[test]
    fn oldest_trie_is_dropped_when_full() {
        let mut forest = Forest::new(3);
        let empty = Trie::empty().root_hash();
        assert!(forest.has_trie(&empty));

        let a = forest.update(&update(empty, "a", "1")).unwrap();
        let b = forest.update(&update(a, "b", "2")).unwrap();
        assert_eq!(forest.len(), 3);

        let c = forest.update(&update(b, "c", "3")).unwrap();
        assert_eq!(forest.len(), 3);
        assert!(!forest.has_trie(&empty));
        assert_eq!(
            forest
                .get_tries()
                .iter()
                .map(Trie::root_hash)
                .collect::<Vec<_>>(),
            vec![a, b, c]
        );
    }

    #[test]
    fn updates_on_unknown_states_fail() {
        let forest = Forest::new(2);
        let unknown = CryptoHash::new([7; 32]);
        assert_eq!(
            forest.new_trie(&update(unknown, "a", "1")).unwrap_err(),
            ForestError::UnknownState { root_hash: unknown }
        );
    }

    #[test]
    fn read_returns_none_for_missing_keys() {
        let mut forest = Forest::new(2);
        let state = forest
            .update(&update(Trie::empty().root_hash(), "a", "1"))
            .unwrap();
        let values = forest
            .read(&state, &[Path::from_key(b"a"), Path::from_key(b"b")])
            .unwrap();
        assert_eq!(values[0].as_ref().unwrap().value(), b"1");
        assert!(values[1].is_none());
    }
}
