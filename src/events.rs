/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of observable events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published by the
//! committee worker and the compactor threads on an optional channel, and consumed by the
//! [event bus](crate::event_bus), which fires the registered handlers.

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::types::data_types::{EpochCounter, ViewNumber};

pub enum Event {
    // Events that change the committee's epoch cache.
    PrepareEpoch(PrepareEpochEvent),
    InjectFallbackEpoch(InjectFallbackEpochEvent),
    PruneEpoch(PruneEpochEvent),
    // Events emitted by the compactor.
    FinalizeSegment(FinalizeSegmentEvent),
    StartCheckpoint(StartCheckpointEvent),
    EndCheckpoint(EndCheckpointEvent),
    DelayCheckpoint(DelayCheckpointEvent),
    RemoveCheckpoint(RemoveCheckpointEvent),
}

impl Event {
    /// Send the event to the event bus, if there is one. Events published after the event bus has shut
    /// down are dropped.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// The static information of a committed epoch was computed and cached.
pub struct PrepareEpochEvent {
    pub timestamp: SystemTime,
    pub counter: EpochCounter,
    pub first_view: ViewNumber,
    pub final_view: ViewNumber,
}

/// An emergency fallback epoch was computed and cached.
pub struct InjectFallbackEpochEvent {
    pub timestamp: SystemTime,
    pub counter: EpochCounter,
    pub first_view: ViewNumber,
    pub final_view: ViewNumber,
}

/// An epoch was evicted from the committee's cache.
pub struct PruneEpochEvent {
    pub timestamp: SystemTime,
    pub counter: EpochCounter,
}

/// A WAL segment was finalized because records started going to the next one.
pub struct FinalizeSegmentEvent {
    pub timestamp: SystemTime,
    pub segment: u64,
}

pub struct StartCheckpointEvent {
    pub timestamp: SystemTime,
    pub checkpoint: u64,
    pub trie_count: usize,
}

pub struct EndCheckpointEvent {
    pub timestamp: SystemTime,
    pub checkpoint: u64,
    pub duration: Duration,
}

/// A checkpoint was due, but another checkpoint was still being written.
pub struct DelayCheckpointEvent {
    pub timestamp: SystemTime,
    pub checkpoint: u64,
}

pub struct RemoveCheckpointEvent {
    pub timestamp: SystemTime,
    pub checkpoint: u64,
}
