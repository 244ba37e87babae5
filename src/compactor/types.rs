/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages, configuration, and observers of the [compactor](super).

use std::sync::mpsc::{Receiver, SyncSender};

use typed_builder::TypedBuilder;

use crate::{
    ledger::{trie::Trie, trie_update::TrieUpdate},
    wal::WALError,
};

/// A write sent by the [`Ledger`](crate::ledger::Ledger) to the compactor.
///
/// The two channels form a handshake. The compactor records `update` in the WAL and sends the outcome
/// on `result`, which unblocks the ledger. The ledger then sends the trie that results from `update` on
/// `trie`, or drops its sending end if there is none. Each channel carries at most one message.
pub struct WALTrieUpdate {
    pub update: TrieUpdate,
    pub result: SyncSender<Result<(), WALError>>,
    pub trie: Receiver<Trie>,
}

/// Receives the numbers of new checkpoints.
pub trait CheckpointObserver: Send + Sync {
    /// Called after checkpoint `checkpoint` was written and old checkpoints were cleaned up. Not called
    /// for checkpoint 0, or once the compactor is stopping.
    fn on_next(&self, checkpoint: u64);

    /// Called once, after the compactor has stopped.
    fn on_complete(&self);
}

pub const DEFAULT_CHECKPOINT_CAPACITY: usize = 500;
pub const DEFAULT_CHECKPOINT_DISTANCE: u64 = 20;
pub const DEFAULT_CHECKPOINTS_TO_KEEP: usize = 5;

/// Parameters of a [`Compactor`](super::Compactor).
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [CompactorConfiguration]. On the builder call the following methods to construct a valid [CompactorConfiguration].

    Optional:
    - `.checkpoint_capacity(...)`
    - `.checkpoint_distance(...)`
    - `.checkpoints_to_keep(...)`
"))]
pub struct CompactorConfiguration {
    #[builder(
        default = DEFAULT_CHECKPOINT_CAPACITY,
        setter(doc = "Set the number of most recent tries that a checkpoint holds. Optional, defaults to 500.")
    )]
    pub checkpoint_capacity: usize,
    #[builder(
        default = DEFAULT_CHECKPOINT_DISTANCE,
        setter(doc = "Set the number of segments finalized between two checkpoints. Optional, defaults to 20. Values below 1 are treated as 1.")
    )]
    pub checkpoint_distance: u64,
    #[builder(
        default = DEFAULT_CHECKPOINTS_TO_KEEP,
        setter(doc = "Set the number of most recent checkpoints kept on disk. 0 keeps every checkpoint. Optional, defaults to 5.")
    )]
    pub checkpoints_to_keep: usize,
}

impl Default for CompactorConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}
