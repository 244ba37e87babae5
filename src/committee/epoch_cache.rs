/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bounded, concurrency-safe cache of [`StaticEpochInfo`]s keyed by epoch counter.
//!
//! ## Lock discipline
//!
//! All state lives behind one `RwLock`. Readers ([`get`](EpochCache::get),
//! [`by_view`](EpochCache::by_view)) take the read lock for the duration of a scan over at most
//! [`MAX_CACHED_EPOCHS`] entries and hand out `Arc` clones, so no lock is held while callers use the
//! result. The only writer, [`insert`](EpochCache::insert), does its existence check, its contiguity
//! checks, the insertion and the pruning under a single write lock acquisition, so no reader can
//! observe a state between these steps.

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::types::data_types::{EpochCounter, ViewNumber};

use super::epoch_info::StaticEpochInfo;

/// Maximum number of epochs kept: enough to cover the previous, current, and next (committed or
/// fallback) epochs at the same time.
pub const MAX_CACHED_EPOCHS: u64 = 3;

pub struct EpochCache {
    epochs: RwLock<BTreeMap<EpochCounter, Arc<StaticEpochInfo>>>,
}

/// What a successful [`EpochCache::insert`] did.
#[derive(Debug)]
pub enum InsertOutcome {
    /// The epoch was already cached; the cached entry is returned and nothing changed.
    AlreadyCached(Arc<StaticEpochInfo>),

    /// The epoch was inserted, and the listed epochs were pruned to respect [`MAX_CACHED_EPOCHS`].
    Inserted {
        epoch: Arc<StaticEpochInfo>,
        pruned: Vec<EpochCounter>,
    },
}

/// The new epoch's view range does not directly follow (or is not directly followed by) a neighbouring
/// cached epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonContiguousEpochs {
    pub lower_counter: EpochCounter,
    pub lower_range: (ViewNumber, ViewNumber),
    pub upper_counter: EpochCounter,
    pub upper_range: (ViewNumber, ViewNumber),
}

impl EpochCache {
    pub fn new() -> Self {
        Self {
            epochs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get the cached epoch with `counter`.
    pub fn get(&self, counter: EpochCounter) -> Option<Arc<StaticEpochInfo>> {
        self.read().get(&counter).cloned()
    }

    /// Get the cached epoch whose `[first_view, final_view]` contains `view`.
    pub fn by_view(&self, view: ViewNumber) -> Option<Arc<StaticEpochInfo>> {
        self.read()
            .values()
            .find(|epoch| epoch.contains(view))
            .cloned()
    }

    pub fn contains(&self, counter: EpochCounter) -> bool {
        self.read().contains_key(&counter)
    }

    /// Counters of the cached epochs, in ascending order.
    pub fn counters(&self) -> Vec<EpochCounter> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Insert `epoch` unless an epoch with the same counter is already cached, then prune every epoch
    /// that is not among the [`MAX_CACHED_EPOCHS`] highest counters.
    ///
    /// Fails, leaving the cache unchanged, if `epoch` is not contiguous with a cached epoch whose counter
    /// is one lower or one higher.
    pub fn insert(&self, epoch: StaticEpochInfo) -> Result<InsertOutcome, NonContiguousEpochs> {
        let mut epochs = self.write();
        let counter = epoch.counter();

        if let Some(existing) = epochs.get(&counter) {
            return Ok(InsertOutcome::AlreadyCached(Arc::clone(existing)));
        }

        if let Some(prev) = counter.prev().and_then(|c| epochs.get(&c)) {
            if !follows(prev, &epoch) {
                return Err(NonContiguousEpochs::between(prev, &epoch));
            }
        }
        if let Some(next) = epochs.get(&counter.next()) {
            if !follows(&epoch, next) {
                return Err(NonContiguousEpochs::between(&epoch, next));
            }
        }

        let epoch = Arc::new(epoch);
        epochs.insert(counter, Arc::clone(&epoch));

        let max = epochs.keys().next_back().copied().unwrap_or(counter);
        let pruned: Vec<EpochCounter> = epochs
            .keys()
            .copied()
            .filter(|c| c.int().saturating_add(MAX_CACHED_EPOCHS) <= max.int())
            .collect();
        for c in &pruned {
            epochs.remove(c);
        }

        Ok(InsertOutcome::Inserted { epoch, pruned })
    }

    // A poisoned lock means a writer panicked half-way through an insertion, after which the cache can
    // no longer be trusted.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<EpochCounter, Arc<StaticEpochInfo>>> {
        self.epochs.read().expect("epoch cache lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<EpochCounter, Arc<StaticEpochInfo>>> {
        self.epochs.write().expect("epoch cache lock poisoned")
    }
}

impl Default for EpochCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NonContiguousEpochs {
    fn between(lower: &StaticEpochInfo, upper: &StaticEpochInfo) -> Self {
        Self {
            lower_counter: lower.counter(),
            lower_range: (lower.first_view(), lower.final_view()),
            upper_counter: upper.counter(),
            upper_range: (upper.first_view(), upper.final_view()),
        }
    }
}

/// Whether `upper` starts on the view right after `lower`'s final view. No epoch follows one that ends
/// on the highest view number.
fn follows(lower: &StaticEpochInfo, upper: &StaticEpochInfo) -> bool {
    lower.final_view().int().checked_add(1) == Some(upper.first_view().int())
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::{
        committee::{
            dkg::{StaticDKG, DKG},
            epoch_info::{EpochInfoError, WeightThreshold},
            leader_selection::LeaderSelectionError,
            protocol::{Epoch, EpochQueryError},
        },
        types::{
            data_types::{NodeID, RandomSource, Weight},
            identity::{Identity, IdentityList},
        },
    };

    struct FixedEpoch {
        counter: u64,
        first_view: u64,
        final_view: u64,
    }

    impl Epoch for FixedEpoch {
        fn counter(&self) -> Result<EpochCounter, EpochQueryError> {
            Ok(EpochCounter::new(self.counter))
        }

        fn first_view(&self) -> Result<ViewNumber, EpochQueryError> {
            Ok(ViewNumber::new(self.first_view))
        }

        fn final_view(&self) -> Result<ViewNumber, EpochQueryError> {
            Ok(ViewNumber::new(self.final_view))
        }

        fn random_source(&self) -> Result<RandomSource, EpochQueryError> {
            Ok(RandomSource::new(vec![self.counter as u8; 32]))
        }

        fn initial_identities(&self) -> Result<IdentityList, EpochQueryError> {
            Ok(IdentityList::new(vec![Identity::new(
                NodeID::new([1; 32]),
                Weight::new(1),
                SigningKey::from_bytes(&[1; 32]).verifying_key(),
            )]))
        }

        fn dkg(&self) -> Result<Arc<dyn DKG>, EpochQueryError> {
            Ok(Arc::new(StaticDKG::new(vec![0; 32], vec![])))
        }
    }

    fn epoch_info(counter: u64, first_view: u64, final_view: u64) -> StaticEpochInfo {
        StaticEpochInfo::new_static_epoch_info(
            &FixedEpoch {
                counter,
                first_view,
                final_view,
            },
            WeightThreshold::QUORUM,
            WeightThreshold::TIMEOUT,
        )
        .unwrap()
    }

    #[test]
    fn insert_is_idempotent() {
        let cache = EpochCache::new();
        assert!(matches!(
            cache.insert(epoch_info(1, 0, 99)),
            Ok(InsertOutcome::Inserted { .. })
        ));
        assert!(matches!(
            cache.insert(epoch_info(1, 0, 99)),
            Ok(InsertOutcome::AlreadyCached(_))
        ));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn non_contiguous_epochs_are_rejected() {
        let cache = EpochCache::new();
        cache.insert(epoch_info(1, 0, 99)).unwrap();

        // Gap after epoch 1.
        let err = cache.insert(epoch_info(2, 101, 199)).unwrap_err();
        assert_eq!(err.lower_counter, EpochCounter::new(1));
        assert_eq!(err.upper_counter, EpochCounter::new(2));

        // Overlap with epoch 1.
        assert!(cache.insert(epoch_info(2, 99, 199)).is_err());

        cache.insert(epoch_info(2, 100, 199)).unwrap();
        cache.insert(epoch_info(3, 200, 299)).unwrap();
        assert_eq!(
            cache.counters(),
            vec![
                EpochCounter::new(1),
                EpochCounter::new(2),
                EpochCounter::new(3)
            ]
        );
    }

    #[test]
    fn only_the_three_highest_epochs_are_kept() {
        let cache = EpochCache::new();
        for counter in 0..10u64 {
            let outcome = cache
                .insert(epoch_info(counter, counter * 100, counter * 100 + 99))
                .unwrap();
            assert!(cache.len() as u64 <= MAX_CACHED_EPOCHS);
            if let InsertOutcome::Inserted { pruned, .. } = outcome {
                if counter >= MAX_CACHED_EPOCHS {
                    assert_eq!(pruned, vec![EpochCounter::new(counter - MAX_CACHED_EPOCHS)]);
                } else {
                    assert!(pruned.is_empty());
                }
            }
        }
        assert_eq!(
            cache.counters(),
            vec![
                EpochCounter::new(7),
                EpochCounter::new(8),
                EpochCounter::new(9)
            ]
        );
    }

    #[test]
    fn by_view_finds_the_containing_epoch() {
        let cache = EpochCache::new();
        cache.insert(epoch_info(5, 500, 999)).unwrap();

        assert!(cache.by_view(ViewNumber::new(499)).is_none());
        assert_eq!(
            cache.by_view(ViewNumber::new(999)).unwrap().counter(),
            EpochCounter::new(5)
        );
        assert!(cache.by_view(ViewNumber::new(1000)).is_none());

        cache.insert(epoch_info(6, 1000, 1499)).unwrap();
        assert_eq!(
            cache.by_view(ViewNumber::new(1000)).unwrap().counter(),
            EpochCounter::new(6)
        );
    }

    #[test]
    fn epoch_ending_on_the_last_view_has_no_successor() {
        let cache = EpochCache::new();
        cache.insert(epoch_info(1, u64::MAX - 9, u64::MAX)).unwrap();
        assert!(cache.insert(epoch_info(2, 0, 9)).is_err());

        let cache = EpochCache::new();
        cache.insert(epoch_info(2, 0, 9)).unwrap();
        assert!(cache.insert(epoch_info(1, u64::MAX - 9, u64::MAX)).is_err());
        assert_eq!(cache.counters(), vec![EpochCounter::new(2)]);
    }

    #[test]
    fn view_ranges_that_overflow_are_rejected() {
        let epoch = FixedEpoch {
            counter: 1,
            first_view: 0,
            final_view: u64::MAX,
        };
        assert!(matches!(
            StaticEpochInfo::new_static_epoch_info(
                &epoch,
                WeightThreshold::QUORUM,
                WeightThreshold::TIMEOUT
            ),
            Err(EpochInfoError::LeaderSelection(
                LeaderSelectionError::ViewOverflow { .. }
            ))
        ));

        let last = epoch_info(1, u64::MAX - 9, u64::MAX);
        assert!(matches!(
            StaticEpochInfo::new_emergency_fallback_epoch(&last, 100),
            Err(EpochInfoError::LeaderSelection(
                LeaderSelectionError::ViewOverflow { .. }
            ))
        ));
        let last = epoch_info(1, u64::MAX - 59, u64::MAX - 50);
        assert!(matches!(
            StaticEpochInfo::new_emergency_fallback_epoch(&last, 100),
            Err(EpochInfoError::LeaderSelection(
                LeaderSelectionError::ViewOverflow { .. }
            ))
        ));
    }
}
