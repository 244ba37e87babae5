/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The write-ahead log of trie updates, and checkpoints of the tries it produces.
//!
//! Every [`TrieUpdate`](crate::ledger::trie_update::TrieUpdate) applied to the ledger is first
//! recorded, durably, in the WAL. The WAL is a directory of numbered [segments](segment). Once enough
//! segments are finalized, the [compactor](crate::compactor) writes a [checkpoint] of the most recent
//! tries, numbered after the last segment whose updates it reflects. On start, the ledger is restored
//! by loading the newest checkpoint and replaying the segments after it.

pub mod checkpoint;

pub mod checkpointer;
pub use checkpointer::{CheckpointStore, Checkpointer};

pub mod implementation;
pub use implementation::{DiskWAL, LedgerWAL, WALConfiguration, WALError};

pub mod segment;

pub(crate) mod sync_rename;

pub mod trie_queue;
pub use trie_queue::TrieQueue;
