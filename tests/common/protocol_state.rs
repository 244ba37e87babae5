/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An in-memory protocol state with epochs of four identities weighing 1, 2, 3, and 4.

use std::sync::{Arc, Mutex};

use ed25519_dalek::SigningKey;
use hotstuff_ledger::{
    committee::{
        dkg::{StaticDKG, DKG},
        protocol::{Epoch, EpochPhase, EpochQueryError, ProtocolState},
    },
    types::{
        data_types::{EpochCounter, NodeID, RandomSource, ViewNumber, Weight},
        identity::{Identity, IdentityList},
    },
};

pub(crate) fn node_id(i: u8) -> NodeID {
    NodeID::new([i; 32])
}

pub(crate) fn identities() -> IdentityList {
    let mut identities: Vec<Identity> = (1..=4)
        .map(|i| {
            Identity::new(
                node_id(i),
                Weight::new(i as u64),
                SigningKey::from_bytes(&[i; 32]).verifying_key(),
            )
        })
        .collect();
    // A listed identity that may not vote.
    let mut ejected = Identity::new(
        node_id(5),
        Weight::new(5),
        SigningKey::from_bytes(&[5; 32]).verifying_key(),
    );
    ejected.ejected = true;
    identities.push(ejected);
    IdentityList::new(identities)
}

pub(crate) struct MockEpoch {
    counter: u64,
    first_view: u64,
    final_view: u64,
}

impl MockEpoch {
    pub(crate) fn new(counter: u64, first_view: u64, final_view: u64) -> Arc<dyn Epoch> {
        Arc::new(Self {
            counter,
            first_view,
            final_view,
        })
    }
}

impl Epoch for MockEpoch {
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
        Ok(RandomSource::new(self.counter.to_be_bytes().repeat(4)))
    }

    fn initial_identities(&self) -> Result<IdentityList, EpochQueryError> {
        Ok(identities())
    }

    fn dkg(&self) -> Result<Arc<dyn DKG>, EpochQueryError> {
        Ok(Arc::new(StaticDKG::new(
            vec![self.counter as u8; 32],
            (1..=4).map(|i| (node_id(i), vec![i; 32])).collect(),
        )))
    }
}

struct Epochs {
    previous: Option<Arc<dyn Epoch>>,
    current: Arc<dyn Epoch>,
    next: Option<Arc<dyn Epoch>>,
    phase: EpochPhase,
    fallback_triggered: bool,
}

pub(crate) struct MockProtocolState {
    epochs: Mutex<Epochs>,
}

impl MockProtocolState {
    pub(crate) fn new(current: Arc<dyn Epoch>) -> Self {
        Self {
            epochs: Mutex::new(Epochs {
                previous: None,
                current,
                next: None,
                phase: EpochPhase::Staking,
                fallback_triggered: false,
            }),
        }
    }

    pub(crate) fn with_previous(self, previous: Arc<dyn Epoch>) -> Self {
        self.epochs.lock().unwrap().previous = Some(previous);
        self
    }

    /// Commit `next`, moving the epoch phase to `Committed`.
    pub(crate) fn with_next(self, next: Arc<dyn Epoch>) -> Self {
        {
            let mut epochs = self.epochs.lock().unwrap();
            epochs.next = Some(next);
            epochs.phase = EpochPhase::Committed;
        }
        self
    }

    pub(crate) fn with_phase(self, phase: EpochPhase) -> Self {
        self.epochs.lock().unwrap().phase = phase;
        self
    }

    pub(crate) fn with_fallback_triggered(self) -> Self {
        self.epochs.lock().unwrap().fallback_triggered = true;
        self
    }
}

impl ProtocolState for MockProtocolState {
    fn current_epoch(&self) -> Result<Arc<dyn Epoch>, EpochQueryError> {
        Ok(Arc::clone(&self.epochs.lock().unwrap().current))
    }

    fn previous_epoch(&self) -> Result<Option<Arc<dyn Epoch>>, EpochQueryError> {
        Ok(self.epochs.lock().unwrap().previous.clone())
    }

    fn next_epoch(&self) -> Result<Option<Arc<dyn Epoch>>, EpochQueryError> {
        Ok(self.epochs.lock().unwrap().next.clone())
    }

    fn epoch_phase(&self) -> Result<EpochPhase, EpochQueryError> {
        Ok(self.epochs.lock().unwrap().phase)
    }

    fn epoch_fallback_triggered(&self) -> Result<bool, EpochQueryError> {
        Ok(self.epochs.lock().unwrap().fallback_triggered)
    }
}
