/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Derivation of deterministic pseudo-random generators from an epoch's random source.
//!
//! Each use of the random source is separated by a domain tag, so that the same random source never
//! seeds two generators producing correlated outputs for different purposes.

use std::fmt::{self, Display, Formatter};

use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use sha2::{Digest, Sha256};

use crate::types::data_types::RandomSource;

/// Domain tag for leader selection of regular, committed epochs.
pub const CONSENSUS_LEADER_SELECTION: &[u8] = b"hotstuff_ledger/consensus/leader_selection";

/// Domain tag for leader selection of emergency fallback epochs.
pub const CONSENSUS_FALLBACK_LEADER_SELECTION: &[u8] =
    b"hotstuff_ledger/consensus/fallback_leader_selection";

/// Shortest random source accepted as a seed.
pub const MIN_RANDOM_SOURCE_LEN: usize = 16;

/// Create a ChaCha20 generator seeded with `SHA256(len(domain_tag) || domain_tag || random_source)`.
pub fn prg_from_random_source(
    random_source: &RandomSource,
    domain_tag: &[u8],
) -> Result<ChaCha20Rng, SeedError> {
    if random_source.bytes().len() < MIN_RANDOM_SOURCE_LEN {
        return Err(SeedError::RandomSourceTooShort {
            len: random_source.bytes().len(),
        });
    }

    let mut hasher = Sha256::new();
    hasher.update((domain_tag.len() as u32).to_be_bytes());
    hasher.update(domain_tag);
    hasher.update(random_source.bytes());
    let seed: [u8; 32] = hasher.finalize().into();

    Ok(ChaCha20Rng::from_seed(seed))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedError {
    RandomSourceTooShort { len: usize },
}

impl Display for SeedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SeedError::RandomSourceTooShort { len } => write!(
                f,
                "random source has {} bytes, at least {} are required",
                len, MIN_RANDOM_SOURCE_LEN
            ),
        }
    }
}

impl std::error::Error for SeedError {}
