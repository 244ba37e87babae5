/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [PrepareEpoch](crate::events::PrepareEpochEvent) is printed:
//!
//! ```text
//! PrepareEpoch, 1701329264, 5, 500000, 999999
//! ```
//!
//! In the snippet, the third value is the epoch counter, and the fourth and fifth values are the first
//! and final views of the epoch.

use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const PREPARE_EPOCH: &str = "PrepareEpoch";
pub const INJECT_FALLBACK_EPOCH: &str = "InjectFallbackEpoch";
pub const PRUNE_EPOCH: &str = "PruneEpoch";

pub const FINALIZE_SEGMENT: &str = "FinalizeSegment";
pub const START_CHECKPOINT: &str = "StartCheckpoint";
pub const END_CHECKPOINT: &str = "EndCheckpoint";
pub const DELAY_CHECKPOINT: &str = "DelayCheckpoint";
pub const REMOVE_CHECKPOINT: &str = "RemoveCheckpoint";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for PrepareEpochEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prepare_epoch_event: &PrepareEpochEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PREPARE_EPOCH,
                secs_since_unix_epoch(prepare_epoch_event.timestamp),
                prepare_epoch_event.counter,
                prepare_epoch_event.first_view,
                prepare_epoch_event.final_view
            )
        };
        Box::new(logger)
    }
}

impl Logger for InjectFallbackEpochEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |inject_fallback_epoch_event: &InjectFallbackEpochEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}",
                INJECT_FALLBACK_EPOCH,
                secs_since_unix_epoch(inject_fallback_epoch_event.timestamp),
                inject_fallback_epoch_event.counter,
                inject_fallback_epoch_event.first_view,
                inject_fallback_epoch_event.final_view
            )
        };
        Box::new(logger)
    }
}

impl Logger for PruneEpochEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prune_epoch_event: &PruneEpochEvent| {
            log::info!(
                "{}, {}, {}",
                PRUNE_EPOCH,
                secs_since_unix_epoch(prune_epoch_event.timestamp),
                prune_epoch_event.counter
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeSegmentEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_segment_event: &FinalizeSegmentEvent| {
            log::debug!(
                "{}, {}, {}",
                FINALIZE_SEGMENT,
                secs_since_unix_epoch(finalize_segment_event.timestamp),
                finalize_segment_event.segment
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartCheckpointEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_checkpoint_event: &StartCheckpointEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_CHECKPOINT,
                secs_since_unix_epoch(start_checkpoint_event.timestamp),
                start_checkpoint_event.checkpoint,
                start_checkpoint_event.trie_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndCheckpointEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_checkpoint_event: &EndCheckpointEvent| {
            log::info!(
                "{}, {}, {}, {:.3}",
                END_CHECKPOINT,
                secs_since_unix_epoch(end_checkpoint_event.timestamp),
                end_checkpoint_event.checkpoint,
                end_checkpoint_event.duration.as_secs_f64()
            )
        };
        Box::new(logger)
    }
}

impl Logger for DelayCheckpointEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |delay_checkpoint_event: &DelayCheckpointEvent| {
            log::info!(
                "{}, {}, {}",
                DELAY_CHECKPOINT,
                secs_since_unix_epoch(delay_checkpoint_event.timestamp),
                delay_checkpoint_event.checkpoint
            )
        };
        Box::new(logger)
    }
}

impl Logger for RemoveCheckpointEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |remove_checkpoint_event: &RemoveCheckpointEvent| {
            log::info!(
                "{}, {}, {}",
                REMOVE_CHECKPOINT,
                secs_since_unix_epoch(remove_checkpoint_event.timestamp),
                remove_checkpoint_event.checkpoint
            )
        };
        Box::new(logger)
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
