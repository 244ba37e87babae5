/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Coordinator between the ledger, the WAL, and checkpointing.
//!
//! ## Writes
//!
//! Every [`Ledger::set`](crate::ledger::Ledger::set) goes through the compactor thread as a
//! [`WALTrieUpdate`]. For each one, in the order they arrive, the compactor:
//! 1. Durably records the update in the WAL.
//! 2. Sends the outcome back to the ledger, which unblocks the writer.
//! 3. Waits for the ledger to send the resulting trie, and pushes it into the trie queue.
//!
//! So the WAL holds the updates in the order they were sent, and a trie only enters the queue after
//! its update is on disk.
//!
//! ## Checkpoints
//!
//! When a recorded update lands in a new segment, the previous segment is finalized, and it is the
//! only time the compactor decides whether to checkpoint. A checkpoint of the trie queue is written on
//! its own thread, so writes are never blocked by checkpointing. If a checkpoint is due while another
//! one is still being written, it is not queued: the compactor tries again when the next segment is
//! finalized. The same goes for a checkpoint that failed.
//!
//! After a checkpoint is written, checkpoints beyond the newest `checkpoints_to_keep` are removed, and
//! every [`CheckpointObserver`] is told the new checkpoint number.
//!
//! ## Shutdown
//!
//! Dropping the [`CompactorHandle`] stops the compactor thread. The writes already sent are recorded
//! before the thread exits, but an in-flight checkpoint is not waited for. A checkpoint that completes
//! after shutdown skips cleanup and observer notification.

pub mod implementation;
pub use implementation::{Compactor, CompactorError, CompactorHandle};

pub mod types;
pub use types::{CheckpointObserver, CompactorConfiguration, WALTrieUpdate};
