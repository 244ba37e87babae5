/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Epoch-aware consensus committee.
//!
//! Consensus needs to answer, for any view `v`:
//! 1. Which nodes may vote in `v`, and with what weight.
//! 2. Which node leads `v`.
//! 3. How much weight a Quorum Certificate or a Timeout Certificate for `v` needs.
//! 4. Where replicas find their random beacon key shares for `v`.
//!
//! All of these are fixed per *epoch*, a contiguous range of views with a fixed committee. The
//! [`Committee`] answers them from a small cache of [`StaticEpochInfo`](epoch_info::StaticEpochInfo)s,
//! one per epoch, computed once when the epoch becomes known and never mutated afterwards.
//!
//! ## Epoch lifecycle
//!
//! The committee reads a [`ProtocolState`](protocol::ProtocolState) once, at construction, to prepare
//! the epochs that are already known. Afterwards, it learns about new epochs only through
//! [`ProtocolEvent`](protocol::ProtocolEvent)s, which are consumed by a single
//! [worker thread](Committee::start). Having exactly one writer serializes every change to the cache.
//!
//! Consecutive epochs must be contiguous: the first view of epoch `n + 1` is the final view of epoch
//! `n` plus one. Preparing an epoch that breaks this is an irrecoverable error. So is any other error
//! the worker hits; it is sent on the irrecoverable error channel passed to
//! [`start`](Committee::start), and the worker stops.
//!
//! At most [`MAX_CACHED_EPOCHS`](epoch_cache::MAX_CACHED_EPOCHS) epochs are cached. After every
//! insertion, only the epochs with the highest counters are kept. Queries for a view that is not in
//! any cached epoch fail with [`CommitteeError::ViewForUnknownEpoch`], which is expected and
//! recoverable: callers should look the epoch up in the protocol state instead.
//!
//! ## Epoch emergency fallback
//!
//! If the next epoch's setup fails to be committed in time, the protocol triggers *epoch emergency
//! fallback*. The committee then injects an artificial epoch right after the current one, which keeps
//! the current committee and DKG and lasts
//! [`fallback_epoch_views`](CommitteeConfiguration::fallback_epoch_views) views. Its leaders are drawn
//! from a generator seeded by the current epoch's random source under a separate domain tag, so every
//! replica computes the same fallback epoch without coordinating.
//!
//! ## Leader selection
//!
//! Leaders are computed for every view of an epoch up-front by
//! [`compute_leader_selection`](leader_selection::compute_leader_selection): weighted random draws
//! from a [ChaCha20](rand_chacha::ChaCha20Rng) generator seeded with
//! [`prg_from_random_source`](seed::prg_from_random_source). Given the same random source and
//! committee, every replica computes the same leader for every view.

pub mod dkg;

pub mod epoch_cache;

pub mod epoch_info;

pub mod implementation;
pub use implementation::{Committee, CommitteeConfiguration, CommitteeError, CommitteeWorker};

pub mod leader_selection;

pub mod protocol;

pub mod seed;
