/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica's committee and ledger.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica's threads alive.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .protocol_state(protocol_state)
//!     .configuration(configuration)
//!     .protocol_events(protocol_events)
//!     .irrecoverable_errors(irrecoverable_errors)
//!     .on_end_checkpoint(end_checkpoint_handler)
//!     .build()
//!     .start()?;
//!
//! let state = replica.ledger().set(state, vec![(key, value)])?;
//! let leader = replica.committee().leader_for_view(view)?;
//! ```
//!
//! ### Required setters
//!
//! - `.protocol_state(...)`
//! - `.configuration(...)`
//! - `.protocol_events(...)`
//! - `.irrecoverable_errors(...)`
//!
//! ### Optional setters
//!
//! The optional setters register user-defined event handlers for events from [crate::events], and
//! observers of new checkpoints:
//! - `.on_prepare_epoch(...)`
//! - `.on_inject_fallback_epoch(...)`
//! - `.on_prune_epoch(...)`
//! - `.on_finalize_segment(...)`
//! - `.on_start_checkpoint(...)`
//! - `.on_end_checkpoint(...)`
//! - `.on_delay_checkpoint(...)`
//! - `.on_remove_checkpoint(...)`
//! - `.checkpoint_observers(...)`
//!
//! The replica's [configuration](Configuration) is also built with the builder pattern:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(node_id)
//!     .wal_dir("/var/lib/replica/wal")
//!     .checkpoint_distance(20)
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    fmt::{self, Display, Formatter},
    path::PathBuf,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread::JoinHandle,
};

use typed_builder::TypedBuilder;

use crate::{
    committee::{
        epoch_info::{WeightThreshold, ESTIMATED_SIX_MONTHS_OF_VIEWS},
        protocol::{ProtocolEvent, ProtocolState},
        Committee, CommitteeConfiguration, CommitteeError, CommitteeWorker,
    },
    compactor::{
        types::{DEFAULT_CHECKPOINTS_TO_KEEP, DEFAULT_CHECKPOINT_CAPACITY, DEFAULT_CHECKPOINT_DISTANCE},
        CheckpointObserver, Compactor, CompactorConfiguration, CompactorError, CompactorHandle,
    },
    event_bus::*,
    events::*,
    ledger::{Ledger, LedgerError},
    types::data_types::NodeID,
    wal::{implementation::DEFAULT_SEGMENT_SIZE, DiskWAL, WALConfiguration, WALError},
};

/// Number of states the ledger keeps in memory by default.
pub const DEFAULT_FOREST_CAPACITY: usize = 500;

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [node ID](crate::types::data_types::NodeID).
/// 2. The directory of the WAL and its checkpoints, and the WAL's segment size.
/// 3. The number of states the ledger keeps in memory.
/// 4. How many tries a checkpoint holds, how many segments apart checkpoints are, and how many
///    checkpoints are kept.
/// 5. The length of an emergency fallback epoch, and the certificate weight thresholds.
/// 6. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.wal_dir(...)`
    - `.log_events(...)`

    Optional:
    - `.segment_size(...)`
    - `.forest_capacity(...)`
    - `.checkpoint_capacity(...)`
    - `.checkpoint_distance(...)`
    - `.checkpoints_to_keep(...)`
    - `.fallback_epoch_views(...)`
    - `.qc_threshold(...)`
    - `.timeout_threshold(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the node ID of this replica. Required."))]
    pub me: NodeID,
    #[builder(setter(into, doc = "Set the directory of the WAL segments and checkpoints. Required."))]
    pub wal_dir: PathBuf,
    #[builder(
        default = DEFAULT_SEGMENT_SIZE,
        setter(doc = "Set the size in bytes after which the WAL moves on to a new segment. Optional, defaults to 32 MiB.")
    )]
    pub segment_size: u64,
    #[builder(
        default = DEFAULT_FOREST_CAPACITY,
        setter(doc = "Set the number of states the ledger keeps in memory. Optional, defaults to 500.")
    )]
    pub forest_capacity: usize,
    #[builder(
        default = DEFAULT_CHECKPOINT_CAPACITY,
        setter(doc = "Set the number of most recent tries that a checkpoint holds. Optional, defaults to 500.")
    )]
    pub checkpoint_capacity: usize,
    #[builder(
        default = DEFAULT_CHECKPOINT_DISTANCE,
        setter(doc = "Set the number of segments finalized between two checkpoints. Optional, defaults to 20.")
    )]
    pub checkpoint_distance: u64,
    #[builder(
        default = DEFAULT_CHECKPOINTS_TO_KEEP,
        setter(doc = "Set the number of checkpoints kept on disk, 0 to keep them all. Optional, defaults to 5.")
    )]
    pub checkpoints_to_keep: usize,
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
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl Into<(CommitteeConfiguration, WALConfiguration, CompactorConfiguration)> for Configuration {
    fn into(self) -> (CommitteeConfiguration, WALConfiguration, CompactorConfiguration) {
        let committee_config = CommitteeConfiguration {
            me: self.me,
            fallback_epoch_views: self.fallback_epoch_views,
            qc_threshold: self.qc_threshold,
            timeout_threshold: self.timeout_threshold,
        };
        let wal_config = WALConfiguration {
            dir: self.wal_dir,
            segment_size: self.segment_size,
        };
        let compactor_config = CompactorConfiguration {
            checkpoint_capacity: self.checkpoint_capacity,
            checkpoint_distance: self.checkpoint_distance,
            checkpoints_to_keep: self.checkpoints_to_keep,
        };
        (committee_config, wal_config, compactor_config)
    }
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.protocol_state(...)`
    - `.configuration(...)`
    - `.protocol_events(...)`
    - `.irrecoverable_errors(...)`

    Optional:
    - `.on_prepare_epoch(...)`
    - `.on_inject_fallback_epoch(...)`
    - `.on_prune_epoch(...)`
    - `.on_finalize_segment(...)`
    - `.on_start_checkpoint(...)`
    - `.on_end_checkpoint(...)`
    - `.on_delay_checkpoint(...)`
    - `.on_remove_checkpoint(...)`
    - `.checkpoint_observers(...)`
"))]
pub struct ReplicaSpec<S: ProtocolState> {
    // Required parameters
    #[builder(setter(doc = "Set the finalized protocol state that epochs are read from. Required."))]
    protocol_state: Arc<S>,
    #[builder(setter(doc = "Set the replica's configuration. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the receiver of committed-epoch and fallback-triggered protocol events. Required."))]
    protocol_events: Receiver<ProtocolEvent>,
    #[builder(setter(doc = "Set the channel that the committee worker reports irrecoverable errors on. Required."))]
    irrecoverable_errors: Sender<CommitteeError>,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&PrepareEpochEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrepareEpochEvent>),
    doc = "Register a handler closure to be invoked after an epoch is prepared. Optional."))]
    on_prepare_epoch: Option<HandlerPtr<PrepareEpochEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InjectFallbackEpochEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InjectFallbackEpochEvent>),
    doc = "Register a handler closure to be invoked after the emergency fallback epoch is injected. Optional."))]
    on_inject_fallback_epoch: Option<HandlerPtr<InjectFallbackEpochEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PruneEpochEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PruneEpochEvent>),
    doc = "Register a handler closure to be invoked after an epoch is evicted from the committee's cache. Optional."))]
    on_prune_epoch: Option<HandlerPtr<PruneEpochEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinalizeSegmentEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinalizeSegmentEvent>),
    doc = "Register a handler closure to be invoked after a WAL segment is finalized. Optional."))]
    on_finalize_segment: Option<HandlerPtr<FinalizeSegmentEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartCheckpointEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartCheckpointEvent>),
    doc = "Register a handler closure to be invoked when a checkpoint starts being written. Optional."))]
    on_start_checkpoint: Option<HandlerPtr<StartCheckpointEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndCheckpointEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndCheckpointEvent>),
    doc = "Register a handler closure to be invoked after a checkpoint is written. Optional."))]
    on_end_checkpoint: Option<HandlerPtr<EndCheckpointEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DelayCheckpointEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DelayCheckpointEvent>),
    doc = "Register a handler closure to be invoked when a due checkpoint is delayed. Optional."))]
    on_delay_checkpoint: Option<HandlerPtr<DelayCheckpointEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RemoveCheckpointEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RemoveCheckpointEvent>),
    doc = "Register a handler closure to be invoked after an old checkpoint is removed. Optional."))]
    on_remove_checkpoint: Option<HandlerPtr<RemoveCheckpointEvent>>,
    #[builder(default, setter(doc = "Set the observers notified of every new checkpoint. Optional."))]
    checkpoint_observers: Vec<Arc<dyn CheckpointObserver>>,
}

impl<S: ProtocolState> ReplicaSpec<S> {
    /// Prepares the committee, restores the ledger from the WAL, starts all threads, and returns the
    /// handles to them in a [Replica] struct.
    pub fn start(self) -> Result<Replica<S>, ReplicaError> {
        let forest_capacity = self.configuration.forest_capacity;
        let log_events = self.configuration.log_events;
        let (committee_config, wal_config, compactor_config) = self.configuration.into();

        let mut event_handlers = EventHandlers::new(log_events);
        if let Some(handler) = self.on_prepare_epoch {
            event_handlers = event_handlers.on_prepare_epoch(handler);
        }
        if let Some(handler) = self.on_inject_fallback_epoch {
            event_handlers = event_handlers.on_inject_fallback_epoch(handler);
        }
        if let Some(handler) = self.on_prune_epoch {
            event_handlers = event_handlers.on_prune_epoch(handler);
        }
        if let Some(handler) = self.on_finalize_segment {
            event_handlers = event_handlers.on_finalize_segment(handler);
        }
        if let Some(handler) = self.on_start_checkpoint {
            event_handlers = event_handlers.on_start_checkpoint(handler);
        }
        if let Some(handler) = self.on_end_checkpoint {
            event_handlers = event_handlers.on_end_checkpoint(handler);
        }
        if let Some(handler) = self.on_delay_checkpoint {
            event_handlers = event_handlers.on_delay_checkpoint(handler);
        }
        if let Some(handler) = self.on_remove_checkpoint {
            event_handlers = event_handlers.on_remove_checkpoint(handler);
        }

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let committee = Committee::new(
            self.protocol_state,
            committee_config,
            event_publisher.clone(),
        )?;

        let wal = DiskWAL::open(wal_config)?;
        let ledger = Arc::new(Ledger::new(&wal, forest_capacity)?);
        let compactor = Compactor::new(&ledger, wal, compactor_config, event_publisher)?;
        for observer in self.checkpoint_observers {
            compactor.subscribe(observer);
        }
        let compactor = compactor.start();

        let committee_worker = committee.start(self.protocol_events, self.irrecoverable_errors);

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                (
                    Some(start_event_bus(event_handlers, event_subscriber, shutdown_receiver)),
                    Some(shutdown),
                )
            }
            None => (None, None),
        };

        Ok(Replica {
            committee,
            ledger,
            committee_worker: Some(committee_worker),
            compactor: Some(compactor),
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica<S: ProtocolState> {
    committee: Committee<S>,
    ledger: Arc<Ledger>,
    committee_worker: Option<CommitteeWorker>,
    compactor: Option<CompactorHandle>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<S: ProtocolState> Replica<S> {
    /// Returns the [Committee], which can be cloned and queried from any thread.
    pub fn committee(&self) -> &Committee<S> {
        &self.committee
    }

    /// Returns the [Ledger] that reads and writes versions of the state.
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Returns the handle to the compactor, to (un)subscribe checkpoint observers.
    pub fn compactor(&self) -> Option<&CompactorHandle> {
        self.compactor.as_ref()
    }
}

impl<S: ProtocolState> Drop for Replica<S> {
    fn drop(&mut self) {
        // The event bus goes last, so that it handles the events published while the other threads stop.
        self.committee_worker.take();
        self.compactor.take();

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| {
                let _ = shutdown.send(());
            });
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("Event bus thread panicked");
            }
        }
    }
}

#[derive(Debug)]
pub enum ReplicaError {
    Committee(CommitteeError),
    WAL(WALError),
    Ledger(LedgerError),
    Compactor(CompactorError),
}

impl From<CommitteeError> for ReplicaError {
    fn from(value: CommitteeError) -> Self {
        ReplicaError::Committee(value)
    }
}

impl From<WALError> for ReplicaError {
    fn from(value: WALError) -> Self {
        ReplicaError::WAL(value)
    }
}

impl From<LedgerError> for ReplicaError {
    fn from(value: LedgerError) -> Self {
        ReplicaError::Ledger(value)
    }
}

impl From<CompactorError> for ReplicaError {
    fn from(value: CompactorError) -> Self {
        ReplicaError::Compactor(value)
    }
}

impl Display for ReplicaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaError::Committee(err) => write!(f, "cannot prepare the committee: {}", err),
            ReplicaError::WAL(err) => write!(f, "cannot open the WAL: {}", err),
            ReplicaError::Ledger(err) => write!(f, "cannot restore the ledger: {}", err),
            ReplicaError::Compactor(err) => write!(f, "cannot start the compactor: {}", err),
        }
    }
}

impl std::error::Error for ReplicaError {}
