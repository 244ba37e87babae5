/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Static, per-epoch committee information that by-view queries are answered from.

use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
};

use crate::types::{
    data_types::{EpochCounter, RandomSource, TotalWeight, ViewNumber},
    identity::IdentityList,
};

use super::{
    dkg::DKG,
    leader_selection::{compute_leader_selection, LeaderSelection, LeaderSelectionError},
    protocol::{Epoch, EpochQueryError},
    seed::{
        prg_from_random_source, SeedError, CONSENSUS_FALLBACK_LEADER_SELECTION,
        CONSENSUS_LEADER_SELECTION,
    },
};

/// Estimated number of views until the next spork, used as the length of emergency fallback epochs.
pub const ESTIMATED_SIX_MONTHS_OF_VIEWS: u64 = 15_000_000;

/// A minimum weight, computed as a fraction of a committee's total weight.
///
/// The threshold for total weight `t` is `t * numerator / denominator + 1`, i.e., the smallest weight
/// that is *strictly greater* than the given fraction of `t`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeightThreshold {
    numerator: u64,
    denominator: u64,
}

impl WeightThreshold {
    /// Supermajority needed to build a Quorum Certificate: more than 2/3 of total weight.
    pub const QUORUM: WeightThreshold = WeightThreshold::new(2, 3);

    /// Weight of timeouts after which a replica can safely time out immediately: more than 1/3 of
    /// total weight.
    pub const TIMEOUT: WeightThreshold = WeightThreshold::new(1, 3);

    /// Create a `WeightThreshold` for the fraction `numerator / denominator`.
    ///
    /// # Panics
    ///
    /// Panics if `denominator` is 0 or `numerator > denominator`.
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        assert!(denominator > 0 && numerator <= denominator);
        Self {
            numerator,
            denominator,
        }
    }

    /// Compute the threshold for a committee with `total_weight`.
    pub fn threshold(&self, total_weight: TotalWeight) -> TotalWeight {
        // Total weight is a sum of u64s over at most u32::MAX members, so this cannot overflow u128.
        TotalWeight::new(
            total_weight.int() * self.numerator as u128 / self.denominator as u128 + 1,
        )
    }
}

/// Leader selection and the initial committee of one epoch.
///
/// Instances are never mutated after construction, so they can be shared between threads behind an
/// `Arc` and queried without holding any lock.
#[derive(Clone)]
pub struct StaticEpochInfo {
    counter: EpochCounter,
    first_view: ViewNumber,
    final_view: ViewNumber,
    random_source: RandomSource,
    leaders: Arc<LeaderSelection>,
    initial_committee: IdentityList,
    weight_threshold_for_qc: TotalWeight,
    weight_threshold_for_to: TotalWeight,
    dkg: Arc<dyn DKG>,
    is_fallback: bool,
}

impl StaticEpochInfo {
    /// Build the static epoch information of a committed `epoch`.
    pub fn new_static_epoch_info(
        epoch: &dyn Epoch,
        qc_threshold: WeightThreshold,
        to_threshold: WeightThreshold,
    ) -> Result<Self, EpochInfoError> {
        let counter = epoch.counter().map_err(EpochInfoError::query("counter"))?;
        let first_view = epoch
            .first_view()
            .map_err(EpochInfoError::query("first view"))?;
        let final_view = epoch
            .final_view()
            .map_err(EpochInfoError::query("final view"))?;
        if first_view > final_view {
            return Err(EpochInfoError::InvalidViewRange {
                counter,
                first_view,
                final_view,
            });
        }
        let random_source = epoch
            .random_source()
            .map_err(EpochInfoError::query("random source"))?;
        let initial_committee = epoch
            .initial_identities()
            .map_err(EpochInfoError::query("initial identities"))?
            .voting_members();
        let dkg = epoch.dkg().map_err(EpochInfoError::query("dkg"))?;

        // An epoch covering every view number has more views than a u64 can count.
        let view_count = (final_view - first_view).checked_add(1).ok_or(
            LeaderSelectionError::ViewOverflow {
                first_view,
                view_count: u64::MAX,
            },
        )?;
        let mut rng = prg_from_random_source(&random_source, CONSENSUS_LEADER_SELECTION)?;
        let leaders =
            compute_leader_selection(first_view, &mut rng, view_count, &initial_committee)?;

        let total_weight = initial_committee.total_weight();
        Ok(Self {
            counter,
            first_view,
            final_view,
            random_source,
            leaders: Arc::new(leaders),
            weight_threshold_for_qc: qc_threshold.threshold(total_weight),
            weight_threshold_for_to: to_threshold.threshold(total_weight),
            initial_committee,
            dkg,
            is_fallback: false,
        })
    }

    /// Build an artificial fallback epoch from the last committed epoch at the time epoch emergency
    /// fallback is triggered. The fallback epoch:
    /// - begins right after `last_committed_epoch` and lasts `view_count` views,
    /// - has the same committee, thresholds and DKG as `last_committed_epoch`,
    /// - draws leaders from a generator seeded with `last_committed_epoch`'s random source under a
    ///   fallback-specific domain tag.
    pub fn new_emergency_fallback_epoch(
        last_committed_epoch: &StaticEpochInfo,
        view_count: u64,
    ) -> Result<Self, EpochInfoError> {
        let first_view = last_committed_epoch
            .final_view
            .int()
            .checked_add(1)
            .map(ViewNumber::new)
            .ok_or(LeaderSelectionError::ViewOverflow {
                first_view: last_committed_epoch.final_view,
                view_count,
            })?;
        let mut rng = prg_from_random_source(
            &last_committed_epoch.random_source,
            CONSENSUS_FALLBACK_LEADER_SELECTION,
        )?;
        let leaders = compute_leader_selection(
            first_view,
            &mut rng,
            view_count,
            &last_committed_epoch.initial_committee,
        )?;

        Ok(Self {
            counter: last_committed_epoch.counter.next(),
            first_view,
            final_view: leaders.final_view(),
            random_source: last_committed_epoch.random_source.clone(),
            leaders: Arc::new(leaders),
            initial_committee: last_committed_epoch.initial_committee.clone(),
            weight_threshold_for_qc: last_committed_epoch.weight_threshold_for_qc,
            weight_threshold_for_to: last_committed_epoch.weight_threshold_for_to,
            dkg: Arc::clone(&last_committed_epoch.dkg),
            is_fallback: true,
        })
    }

    pub fn counter(&self) -> EpochCounter {
        self.counter
    }

    /// First view of the epoch (inclusive).
    pub fn first_view(&self) -> ViewNumber {
        self.first_view
    }

    /// Final view of the epoch (inclusive).
    pub fn final_view(&self) -> ViewNumber {
        self.final_view
    }

    /// Check whether `view` lies in `[first_view, final_view]`.
    pub fn contains(&self, view: ViewNumber) -> bool {
        self.first_view <= view && view <= self.final_view
    }

    pub fn random_source(&self) -> &RandomSource {
        &self.random_source
    }

    pub fn leaders(&self) -> &LeaderSelection {
        &self.leaders
    }

    /// Voting members of the committee as listed by the epoch setup.
    pub fn initial_committee(&self) -> &IdentityList {
        &self.initial_committee
    }

    pub fn weight_threshold_for_qc(&self) -> TotalWeight {
        self.weight_threshold_for_qc
    }

    pub fn weight_threshold_for_to(&self) -> TotalWeight {
        self.weight_threshold_for_to
    }

    pub fn dkg(&self) -> Arc<dyn DKG> {
        Arc::clone(&self.dkg)
    }

    /// Whether this epoch was injected by epoch emergency fallback rather than committed.
    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }
}

impl Debug for StaticEpochInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticEpochInfo")
            .field("counter", &self.counter)
            .field("first_view", &self.first_view)
            .field("final_view", &self.final_view)
            .field("committee_size", &self.initial_committee.len())
            .field("is_fallback", &self.is_fallback)
            .finish()
    }
}

/// Enumerates the ways building a [`StaticEpochInfo`] can fail.
#[derive(Debug)]
pub enum EpochInfoError {
    Query {
        what: &'static str,
        source: EpochQueryError,
    },
    InvalidViewRange {
        counter: EpochCounter,
        first_view: ViewNumber,
        final_view: ViewNumber,
    },
    Seed(SeedError),
    LeaderSelection(LeaderSelectionError),
}

impl EpochInfoError {
    fn query(what: &'static str) -> impl Fn(EpochQueryError) -> EpochInfoError {
        move |source| EpochInfoError::Query { what, source }
    }
}

impl From<SeedError> for EpochInfoError {
    fn from(value: SeedError) -> Self {
        EpochInfoError::Seed(value)
    }
}

impl From<LeaderSelectionError> for EpochInfoError {
    fn from(value: LeaderSelectionError) -> Self {
        EpochInfoError::LeaderSelection(value)
    }
}

impl Display for EpochInfoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EpochInfoError::Query { what, source } => {
                write!(f, "could not get {}: {}", what, source)
            }
            EpochInfoError::InvalidViewRange {
                counter,
                first_view,
                final_view,
            } => write!(
                f,
                "epoch {} has first view {} after its final view {}",
                counter, first_view, final_view
            ),
            EpochInfoError::Seed(err) => write!(f, "could not seed leader selection: {}", err),
            EpochInfoError::LeaderSelection(err) => {
                write!(f, "could not compute leader selection: {}", err)
            }
        }
    }
}

impl std::error::Error for EpochInfoError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        assert_eq!(
            WeightThreshold::QUORUM.threshold(TotalWeight::new(100)),
            TotalWeight::new(67)
        );
        assert_eq!(
            WeightThreshold::QUORUM.threshold(TotalWeight::new(3)),
            TotalWeight::new(3)
        );
        assert_eq!(
            WeightThreshold::TIMEOUT.threshold(TotalWeight::new(100)),
            TotalWeight::new(34)
        );
        assert_eq!(
            WeightThreshold::TIMEOUT.threshold(TotalWeight::new(3)),
            TotalWeight::new(2)
        );
    }
}
