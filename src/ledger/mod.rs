/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Versioned key-value state, stored as copy-on-write Merkle tries.
//!
//! A [trie](trie::Trie) maps 256-bit [paths](trie::Path) (the SHA256 hash of a key) to
//! [payloads](trie::Payload). Updating a trie creates a new trie that shares every unchanged subtree
//! with the old one, so keeping many recent versions of the state in a [forest](forest::Forest) is
//! cheap. The [`Ledger`] ties the forest to the [WAL](crate::wal) through the
//! [compactor](crate::compactor).

pub mod forest;

pub mod implementation;
pub use implementation::{Ledger, LedgerError};

pub mod trie;

pub mod trie_update;
