/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust library for the epoch-aware committee and the durable, checkpointed ledger of a
//! HotStuff-family replica.
//!
//! ## Overview
//!
//! A replica built on this library has two halves:
//! - The [committee], which answers, for any view of a recently committed epoch, who the voting
//!   members are, who leads the view, and how much weight a certificate needs. It keeps the static
//!   information of at most three epochs in a cache, and a worker thread keeps the cache up to date
//!   with committed epochs and the emergency fallback epoch.
//! - The [ledger], a versioned key-value store backed by copy-on-write Merkle tries. Every write is
//!   durably recorded in a [write-ahead log](wal) by the [compactor] before it is applied, and the
//!   compactor periodically writes [checkpoints](wal::checkpoint) of the most recent tries on a separate
//!   thread, so the ledger can be restored after a restart.
//!
//! The [replica] module wires both halves together, and [events] describes what they report to the
//! [event bus](event_bus).

pub mod committee;

pub mod compactor;

pub mod event_bus;

pub mod events;

pub mod ledger;

pub mod logging;

pub mod replica;

pub mod types;

pub mod wal;
