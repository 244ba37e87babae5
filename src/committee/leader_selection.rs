/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pre-computed, weighted-random leader selection for a contiguous range of views.
//!
//! For every view of an epoch, a leader is drawn independently from the epoch's committee with
//! probability proportional to its weight. Draws use a generator seeded from the epoch's random source
//! (see [`seed`](super::seed)) and consume it in view order, so the whole table is a pure function of
//! `(random source, committee, first view, view count)`.

use std::fmt::{self, Display, Formatter};

use rand_core::RngCore;

use crate::types::{
    data_types::{NodeID, ViewNumber},
    identity::IdentityList,
};

/// Leaders for every view in `[first_view, final_view]`.
#[derive(Clone, Debug)]
pub struct LeaderSelection {
    first_view: ViewNumber,
    final_view: ViewNumber,
    node_ids: Vec<NodeID>,
    // `leader_indices[v - first_view]` is the position in `node_ids` of the leader of view `v`.
    leader_indices: Vec<u32>,
}

impl LeaderSelection {
    /// Get the leader of `view`.
    pub fn leader_for_view(&self, view: ViewNumber) -> Result<NodeID, LeaderSelectionError> {
        if view < self.first_view || view > self.final_view {
            return Err(LeaderSelectionError::InvalidView {
                view,
                first_view: self.first_view,
                final_view: self.final_view,
            });
        }
        let index = self.leader_indices[(view - self.first_view) as usize];
        Ok(self.node_ids[index as usize])
    }

    pub fn first_view(&self) -> ViewNumber {
        self.first_view
    }

    pub fn final_view(&self) -> ViewNumber {
        self.final_view
    }
}

/// Compute leader selection for `view_count` views starting at `first_view`, drawing from `identities`
/// with probability proportional to weight.
pub fn compute_leader_selection<R: RngCore>(
    first_view: ViewNumber,
    rng: &mut R,
    view_count: u64,
    identities: &IdentityList,
) -> Result<LeaderSelection, LeaderSelectionError> {
    if view_count == 0 {
        return Err(LeaderSelectionError::NoViews);
    }
    if identities.is_empty() {
        return Err(LeaderSelectionError::EmptyCommittee);
    }
    if identities.len() > u32::MAX as usize {
        return Err(LeaderSelectionError::CommitteeTooLarge {
            len: identities.len(),
        });
    }
    let final_view = first_view
        .int()
        .checked_add(view_count - 1)
        .map(ViewNumber::new)
        .ok_or(LeaderSelectionError::ViewOverflow { first_view, view_count })?;
    let table_len = usize::try_from(view_count)
        .map_err(|_| LeaderSelectionError::ViewOverflow { first_view, view_count })?;

    // cumulative_weights[i] is the sum of the weights of identities 0..=i.
    let mut cumulative_weights = Vec::with_capacity(identities.len());
    let mut total: u64 = 0;
    for identity in identities.iter() {
        total = total
            .checked_add(identity.weight.int())
            .ok_or(LeaderSelectionError::WeightOverflow)?;
        cumulative_weights.push(total);
    }
    if total == 0 {
        return Err(LeaderSelectionError::ZeroTotalWeight);
    }

    let mut leader_indices = Vec::with_capacity(table_len);
    for _ in 0..table_len {
        let sample = uniform_below(rng, total);
        let index = cumulative_weights.partition_point(|c| *c <= sample);
        leader_indices.push(index as u32);
    }

    Ok(LeaderSelection {
        first_view,
        final_view,
        node_ids: identities.node_ids(),
        leader_indices,
    })
}

/// Draw a uniformly distributed integer in `[0, bound)` using rejection sampling, so that the result
/// depends only on the generator's output stream.
fn uniform_below<R: RngCore>(rng: &mut R, bound: u64) -> u64 {
    // `rem` is 2^64 mod bound. Samples above `u64::MAX - rem` would bias the result.
    let rem = (u64::MAX % bound + 1) % bound;
    let limit = u64::MAX - rem;
    loop {
        let sample = rng.next_u64();
        if sample <= limit {
            return sample % bound;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderSelectionError {
    EmptyCommittee,
    CommitteeTooLarge { len: usize },
    ZeroTotalWeight,
    WeightOverflow,
    NoViews,
    ViewOverflow { first_view: ViewNumber, view_count: u64 },
    InvalidView {
        view: ViewNumber,
        first_view: ViewNumber,
        final_view: ViewNumber,
    },
}

impl Display for LeaderSelectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LeaderSelectionError::EmptyCommittee => write!(f, "committee is empty"),
            LeaderSelectionError::CommitteeTooLarge { len } => {
                write!(f, "committee of {} members is too large", len)
            }
            LeaderSelectionError::ZeroTotalWeight => write!(f, "committee has zero total weight"),
            LeaderSelectionError::WeightOverflow => write!(f, "committee total weight overflows u64"),
            LeaderSelectionError::NoViews => write!(f, "leader selection over zero views"),
            LeaderSelectionError::ViewOverflow { first_view, view_count } => write!(
                f,
                "{} views starting at view {} overflow the view number space",
                view_count, first_view
            ),
            LeaderSelectionError::InvalidView {
                view,
                first_view,
                final_view,
            } => write!(
                f,
                "view {} is outside of the leader selection range [{}, {}]",
                view, first_view, final_view
            ),
        }
    }
}

impl std::error::Error for LeaderSelectionError {}
