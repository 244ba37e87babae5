/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the pluggable protocol state that the [`Committee`](super::Committee) reads epochs from.
//!
//! The committee never owns protocol state. It reads epoch data from a [`ProtocolState`] at
//! construction time and afterwards learns about new epochs only through [`ProtocolEvent`]s sent to its
//! worker thread.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use crate::types::{
    data_types::{EpochCounter, RandomSource, ViewNumber},
    identity::IdentityList,
};

use super::dkg::DKG;

/// Read access to the static setup data of a single epoch.
///
/// Every accessor may fail, for example because the epoch's setup has not been finalized yet or because
/// the underlying storage could not be read.
pub trait Epoch: Send + Sync {
    fn counter(&self) -> Result<EpochCounter, EpochQueryError>;
    fn first_view(&self) -> Result<ViewNumber, EpochQueryError>;
    fn final_view(&self) -> Result<ViewNumber, EpochQueryError>;
    fn random_source(&self) -> Result<RandomSource, EpochQueryError>;

    /// All identities listed by the epoch setup, including ones that are not allowed to vote.
    fn initial_identities(&self) -> Result<IdentityList, EpochQueryError>;

    fn dkg(&self) -> Result<Arc<dyn DKG>, EpochQueryError>;
}

/// The phase of the epoch state machine in the latest finalized block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpochPhase {
    Staking,
    Setup,
    /// The next epoch's setup has been committed, so the next epoch is available.
    Committed,
}

/// Read access to the finalized protocol state, as of the latest finalized block.
pub trait ProtocolState: Send + Sync + 'static {
    fn current_epoch(&self) -> Result<Arc<dyn Epoch>, EpochQueryError>;

    /// The epoch before the current one, or `None` if the current epoch is the first of this spork.
    fn previous_epoch(&self) -> Result<Option<Arc<dyn Epoch>>, EpochQueryError>;

    /// The epoch after the current one. Only expected to exist when [`epoch_phase`](Self::epoch_phase)
    /// is [`EpochPhase::Committed`].
    fn next_epoch(&self) -> Result<Option<Arc<dyn Epoch>>, EpochQueryError>;

    fn epoch_phase(&self) -> Result<EpochPhase, EpochQueryError>;

    /// Whether epoch emergency fallback has been triggered at any point in this spork.
    fn epoch_fallback_triggered(&self) -> Result<bool, EpochQueryError>;
}

/// Protocol events that the committee's worker thread reacts to.
#[derive(Clone)]
pub enum ProtocolEvent {
    /// Fires once per epoch, when the epoch's setup becomes committed.
    EpochCommitted(Arc<dyn Epoch>),

    /// Fires at most once per spork.
    EpochEmergencyFallbackTriggered,
}

/// Error returned by [`Epoch`] and [`ProtocolState`] accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochQueryError {
    /// The requested epoch (or a field of it) is not yet known.
    NotAvailable { what: &'static str },

    /// Storage backing the protocol state failed.
    Storage { message: String },
}

impl Display for EpochQueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EpochQueryError::NotAvailable { what } => write!(f, "{} is not available", what),
            EpochQueryError::Storage { message } => write!(f, "protocol state storage: {}", message),
        }
    }
}

impl std::error::Error for EpochQueryError {}
