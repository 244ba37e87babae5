/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Committee`], which answers by-view questions about the consensus committee, and the worker
//! thread that keeps its epoch cache up to date.

use std::{
    fmt::{self, Display, Formatter},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use typed_builder::TypedBuilder;

use crate::{
    events::{Event, InjectFallbackEpochEvent, PrepareEpochEvent, PruneEpochEvent},
    types::{
        data_types::{EpochCounter, NodeID, TotalWeight, ViewNumber},
        identity::{Identity, IdentityList},
    },
};

use super::{
    dkg::DKG,
    epoch_cache::{EpochCache, InsertOutcome, NonContiguousEpochs},
    epoch_info::{EpochInfoError, StaticEpochInfo, WeightThreshold, ESTIMATED_SIX_MONTHS_OF_VIEWS},
    leader_selection::LeaderSelectionError,
    protocol::{Epoch, EpochPhase, EpochQueryError, ProtocolEvent, ProtocolState},
};

const PROTOCOL_EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Parameters of a [`Committee`].
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [CommitteeConfiguration]. On the builder call the following methods to construct a valid [CommitteeConfiguration].

    Required:
    - `.me(...)`

    Optional:
    - `.fallback_epoch_views(...)`
    - `.qc_threshold(...)`
    - `.timeout_threshold(...)`
"))]
pub struct CommitteeConfiguration {
    #[builder(setter(doc = "Set the node ID of this replica. Required."))]
    pub me: NodeID,
    #[builder(
        default = ESTIMATED_SIX_MONTHS_OF_VIEWS,
        setter(doc = "Set the number of views that an emergency fallback epoch lasts. Optional, defaults to `ESTIMATED_SIX_MONTHS_OF_VIEWS`.")
    )]
    pub fallback_epoch_views: u64,
    #[builder(
        default = WeightThreshold::QUORUM,
        setter(doc = "Set the fraction of total weight needed to build a Quorum Certificate. Optional, defaults to 2/3.")
    )]
    pub qc_threshold: WeightThreshold,
    #[builder(
        default = WeightThreshold::TIMEOUT,
        setter(doc = "Set the fraction of total weight of timeouts needed to time out immediately. Optional, defaults to 1/3.")
    )]
    pub timeout_threshold: WeightThreshold,
}

/// Answers, for any view in a cached epoch, who is in the committee, who leads the view, how much
/// weight a certificate needs, and where the DKG key shares are.
///
/// `Committee` is cheap to clone: clones share the same epoch cache, so a clone handed to the
/// [worker](Committee::start) keeps every other clone's answers up to date.
pub struct Committee<S: ProtocolState> {
    state: Arc<S>,
    epochs: Arc<EpochCache>,
    config: CommitteeConfiguration,
    event_publisher: Option<Sender<Event>>,
}

impl<S: ProtocolState> Clone for Committee<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            epochs: Arc::clone(&self.epochs),
            config: self.config.clone(),
            event_publisher: self.event_publisher.clone(),
        }
    }
}

impl<S: ProtocolState> Committee<S> {
    /// Create a committee and prepare every epoch the finalized protocol state already knows about:
    /// 1. The current epoch.
    /// 2. The previous epoch, if there is one.
    /// 3. The next epoch, if the epoch phase is [`Committed`](EpochPhase::Committed).
    /// 4. The emergency fallback epoch, if epoch emergency fallback has already been triggered.
    ///
    /// Any error here is fatal: no committee is returned with partially prepared epochs.
    pub fn new(
        state: Arc<S>,
        config: CommitteeConfiguration,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, CommitteeError> {
        let committee = Self {
            state,
            epochs: Arc::new(EpochCache::new()),
            config,
            event_publisher,
        };

        let mut epochs: Vec<Arc<dyn Epoch>> = Vec::with_capacity(3);
        epochs.push(
            committee
                .state
                .current_epoch()
                .map_err(CommitteeError::query("current epoch"))?,
        );
        if let Some(previous) = committee
            .state
            .previous_epoch()
            .map_err(CommitteeError::query("previous epoch"))?
        {
            epochs.push(previous);
        }
        let phase = committee
            .state
            .epoch_phase()
            .map_err(CommitteeError::query("epoch phase"))?;
        if phase == EpochPhase::Committed {
            match committee
                .state
                .next_epoch()
                .map_err(CommitteeError::query("next epoch"))?
            {
                Some(next) => epochs.push(next),
                None => {
                    return Err(CommitteeError::EpochQuery {
                        what: "next epoch",
                        source: EpochQueryError::NotAvailable {
                            what: "next epoch in the committed phase",
                        },
                    })
                }
            }
        }

        for epoch in epochs {
            committee.prepare_epoch(epoch.as_ref())?;
        }

        // The fallback epoch is built from the cached current epoch, so it must come after it.
        if committee
            .state
            .epoch_fallback_triggered()
            .map_err(CommitteeError::query("epoch fallback triggered"))?
        {
            committee.on_epoch_emergency_fallback_triggered()?;
        }

        Ok(committee)
    }

    /// Start the worker thread that reacts to `protocol_events`. Errors hit by the worker are
    /// irrecoverable: the worker sends the first one on `irrecoverable_errors` and stops.
    pub fn start(
        &self,
        protocol_events: Receiver<ProtocolEvent>,
        irrecoverable_errors: Sender<CommitteeError>,
    ) -> CommitteeWorker {
        let (shutdown, shutdown_signal) = mpsc::channel();
        let committee = self.clone();
        let handle = thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            let result = match protocol_events.recv_timeout(PROTOCOL_EVENT_POLL_INTERVAL) {
                Ok(ProtocolEvent::EpochCommitted(epoch)) => {
                    committee.prepare_epoch(epoch.as_ref()).map(|_| ())
                }
                Ok(ProtocolEvent::EpochEmergencyFallbackTriggered) => {
                    committee.on_epoch_emergency_fallback_triggered()
                }
                Err(RecvTimeoutError::Timeout) => Ok(()),
                Err(RecvTimeoutError::Disconnected) => return,
            };

            if let Err(err) = result {
                log::error!("committee worker stopped: {}", err);
                let _ = irrecoverable_errors.send(err);
                return;
            }
        });

        CommitteeWorker {
            handle: Some(handle),
            shutdown,
        }
    }

    /// Get the voting members of the epoch that contains `view`.
    pub fn identities_by_epoch(&self, view: ViewNumber) -> Result<IdentityList, CommitteeError> {
        Ok(self.epoch_by_view(view)?.initial_committee().clone())
    }

    /// Get the identity of `node_id` in the epoch that contains `view`. Fails with
    /// [`InvalidSigner`](CommitteeError::InvalidSigner) if `node_id` is not a voting member of that epoch.
    pub fn identity_by_epoch(
        &self,
        view: ViewNumber,
        node_id: &NodeID,
    ) -> Result<Identity, CommitteeError> {
        self.epoch_by_view(view)?
            .initial_committee()
            .by_node_id(node_id)
            .cloned()
            .ok_or(CommitteeError::InvalidSigner {
                view,
                node_id: *node_id,
            })
    }

    pub fn leader_for_view(&self, view: ViewNumber) -> Result<NodeID, CommitteeError> {
        Ok(self.epoch_by_view(view)?.leaders().leader_for_view(view)?)
    }

    /// Get the minimum total weight of votes needed to build a QC in `view`.
    pub fn quorum_threshold_for_view(&self, view: ViewNumber) -> Result<TotalWeight, CommitteeError> {
        Ok(self.epoch_by_view(view)?.weight_threshold_for_qc())
    }

    /// Get the total weight of timeouts after which a replica can time out `view` immediately.
    pub fn timeout_threshold_for_view(
        &self,
        view: ViewNumber,
    ) -> Result<TotalWeight, CommitteeError> {
        Ok(self.epoch_by_view(view)?.weight_threshold_for_to())
    }

    pub fn dkg(&self, view: ViewNumber) -> Result<Arc<dyn DKG>, CommitteeError> {
        Ok(self.epoch_by_view(view)?.dkg())
    }

    pub fn self_id(&self) -> NodeID {
        self.config.me
    }

    /// Counters of the currently cached epochs, in ascending order.
    pub fn cached_epochs(&self) -> Vec<EpochCounter> {
        self.epochs.counters()
    }

    fn epoch_by_view(&self, view: ViewNumber) -> Result<Arc<StaticEpochInfo>, CommitteeError> {
        self.epochs
            .by_view(view)
            .ok_or(CommitteeError::ViewForUnknownEpoch { view })
    }

    /// Compute and cache the static information of `epoch`. Preparing an epoch that is already cached
    /// returns the cached entry.
    pub(crate) fn prepare_epoch(
        &self,
        epoch: &dyn Epoch,
    ) -> Result<Arc<StaticEpochInfo>, CommitteeError> {
        let counter = epoch
            .counter()
            .map_err(CommitteeError::query("epoch counter"))?;
        if let Some(cached) = self.epochs.get(counter) {
            return Ok(cached);
        }

        let epoch_info = StaticEpochInfo::new_static_epoch_info(
            epoch,
            self.config.qc_threshold,
            self.config.timeout_threshold,
        )?;
        match self.epochs.insert(epoch_info)? {
            InsertOutcome::AlreadyCached(cached) => Ok(cached),
            InsertOutcome::Inserted { epoch, pruned } => {
                Event::PrepareEpoch(PrepareEpochEvent {
                    timestamp: SystemTime::now(),
                    counter: epoch.counter(),
                    first_view: epoch.first_view(),
                    final_view: epoch.final_view(),
                })
                .publish(&self.event_publisher);
                self.publish_pruned(pruned);
                Ok(epoch)
            }
        }
    }

    /// Inject the emergency fallback epoch right after the current epoch.
    ///
    /// Fails if the current epoch is not cached, or if the epoch after it is already cached.
    pub(crate) fn on_epoch_emergency_fallback_triggered(&self) -> Result<(), CommitteeError> {
        let counter = self
            .state
            .current_epoch()
            .and_then(|epoch| epoch.counter())
            .map_err(CommitteeError::query("current epoch counter"))?;

        let current = self
            .epochs
            .get(counter)
            .ok_or(CommitteeError::FallbackMissingCurrentEpoch { counter })?;
        if self.epochs.contains(counter.next()) {
            return Err(CommitteeError::FallbackNextEpochCached {
                counter: counter.next(),
            });
        }

        let fallback =
            StaticEpochInfo::new_emergency_fallback_epoch(&current, self.config.fallback_epoch_views)?;
        match self.epochs.insert(fallback)? {
            InsertOutcome::AlreadyCached(_) => Err(CommitteeError::FallbackNextEpochCached {
                counter: counter.next(),
            }),
            InsertOutcome::Inserted { epoch, pruned } => {
                Event::InjectFallbackEpoch(InjectFallbackEpochEvent {
                    timestamp: SystemTime::now(),
                    counter: epoch.counter(),
                    first_view: epoch.first_view(),
                    final_view: epoch.final_view(),
                })
                .publish(&self.event_publisher);
                self.publish_pruned(pruned);
                Ok(())
            }
        }
    }

    fn publish_pruned(&self, pruned: Vec<EpochCounter>) {
        for counter in pruned {
            Event::PruneEpoch(PruneEpochEvent {
                timestamp: SystemTime::now(),
                counter,
            })
            .publish(&self.event_publisher);
        }
    }
}

/// Handle to the committee's worker thread. Dropping it stops the worker and waits for it to exit.
pub struct CommitteeWorker {
    handle: Option<JoinHandle<()>>,
    shutdown: Sender<()>,
}

impl Drop for CommitteeWorker {
    fn drop(&mut self) {
        // The worker may have already stopped after an irrecoverable error.
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("committee worker panicked");
            }
        }
    }
}

/// Enumerates the ways a [`Committee`] operation can fail.
#[derive(Debug)]
pub enum CommitteeError {
    /// No cached epoch contains `view`. Expected: the caller should re-derive the epoch from the
    /// protocol state.
    ViewForUnknownEpoch { view: ViewNumber },

    /// `node_id` is not a voting member of the epoch that contains `view`.
    InvalidSigner { view: ViewNumber, node_id: NodeID },

    EpochQuery {
        what: &'static str,
        source: EpochQueryError,
    },
    EpochInfo(EpochInfoError),
    NonContiguousEpochs(NonContiguousEpochs),
    FallbackMissingCurrentEpoch { counter: EpochCounter },
    FallbackNextEpochCached { counter: EpochCounter },
    LeaderSelection(LeaderSelectionError),
}

impl CommitteeError {
    /// Whether this is the expected [`ViewForUnknownEpoch`](CommitteeError::ViewForUnknownEpoch) error.
    pub fn is_view_for_unknown_epoch(&self) -> bool {
        matches!(self, CommitteeError::ViewForUnknownEpoch { .. })
    }

    fn query(what: &'static str) -> impl Fn(EpochQueryError) -> CommitteeError {
        move |source| CommitteeError::EpochQuery { what, source }
    }
}

impl From<EpochInfoError> for CommitteeError {
    fn from(value: EpochInfoError) -> Self {
        CommitteeError::EpochInfo(value)
    }
}

impl From<NonContiguousEpochs> for CommitteeError {
    fn from(value: NonContiguousEpochs) -> Self {
        CommitteeError::NonContiguousEpochs(value)
    }
}

impl From<LeaderSelectionError> for CommitteeError {
    fn from(value: LeaderSelectionError) -> Self {
        CommitteeError::LeaderSelection(value)
    }
}

impl Display for CommitteeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CommitteeError::ViewForUnknownEpoch { view } => {
                write!(f, "view {} is not in any cached epoch", view)
            }
            CommitteeError::InvalidSigner { view, node_id } => write!(
                f,
                "node {} is not a voting member of the epoch of view {}",
                node_id, view
            ),
            CommitteeError::EpochQuery { what, source } => {
                write!(f, "could not get {}: {}", what, source)
            }
            CommitteeError::EpochInfo(err) => write!(f, "could not prepare epoch: {}", err),
            CommitteeError::NonContiguousEpochs(err) => write!(
                f,
                "epoch {} {:?} is not contiguous with epoch {} {:?}",
                err.lower_counter, err.lower_range, err.upper_counter, err.upper_range
            ),
            CommitteeError::FallbackMissingCurrentEpoch { counter } => write!(
                f,
                "epoch fallback: current epoch {} is not cached",
                counter
            ),
            CommitteeError::FallbackNextEpochCached { counter } => write!(
                f,
                "epoch fallback: next epoch {} is already cached",
                counter
            ),
            CommitteeError::LeaderSelection(err) => write!(f, "leader selection: {}", err),
        }
    }
}

impl std::error::Error for CommitteeError {}
