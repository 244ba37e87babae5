/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The unit of ledger mutation that is recorded in the WAL.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::CryptoHash;

use super::trie::{Path, Payload};

/// A set of registers to write on top of the trie with root hash `root_hash`.
///
/// `TrieUpdate`s are what the [WAL](crate::wal) records: replaying them in order on top of the tries of
/// a checkpoint reproduces every trie created after the checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TrieUpdate {
    pub root_hash: CryptoHash,
    pub paths: Vec<Path>,
    pub payloads: Vec<Payload>,
}

impl TrieUpdate {
    /// Create an update that writes every `(key, value)` in `entries` on top of the trie with
    /// `root_hash`.
    pub fn from_entries(root_hash: CryptoHash, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        let (paths, payloads) = entries
            .into_iter()
            .map(|(key, value)| (Path::from_key(&key), Payload::new(key, value)))
            .unzip();
        Self {
            root_hash,
            paths,
            payloads,
        }
    }

    /// Number of registers written by this update.
    pub fn size(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
