/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives published [events](crate::events) and fires the handlers registered for them.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handlers for every kind of [`Event`], grouped by event type.
#[derive(Default)]
pub struct EventHandlers {
    pub(crate) prepare_epoch_handlers: Vec<HandlerPtr<PrepareEpochEvent>>,
    pub(crate) inject_fallback_epoch_handlers: Vec<HandlerPtr<InjectFallbackEpochEvent>>,
    pub(crate) prune_epoch_handlers: Vec<HandlerPtr<PruneEpochEvent>>,
    pub(crate) finalize_segment_handlers: Vec<HandlerPtr<FinalizeSegmentEvent>>,
    pub(crate) start_checkpoint_handlers: Vec<HandlerPtr<StartCheckpointEvent>>,
    pub(crate) end_checkpoint_handlers: Vec<HandlerPtr<EndCheckpointEvent>>,
    pub(crate) delay_checkpoint_handlers: Vec<HandlerPtr<DelayCheckpointEvent>>,
    pub(crate) remove_checkpoint_handlers: Vec<HandlerPtr<RemoveCheckpointEvent>>,
}

impl EventHandlers {
    /// Create a set of handlers which, if `log_events` is true, contains the default
    /// [logging](crate::logging) handler of every event type.
    pub fn new(log_events: bool) -> Self {
        let mut handlers = Self::default();
        if log_events {
            handlers.prepare_epoch_handlers.push(PrepareEpochEvent::get_logger());
            handlers
                .inject_fallback_epoch_handlers
                .push(InjectFallbackEpochEvent::get_logger());
            handlers.prune_epoch_handlers.push(PruneEpochEvent::get_logger());
            handlers
                .finalize_segment_handlers
                .push(FinalizeSegmentEvent::get_logger());
            handlers
                .start_checkpoint_handlers
                .push(StartCheckpointEvent::get_logger());
            handlers.end_checkpoint_handlers.push(EndCheckpointEvent::get_logger());
            handlers
                .delay_checkpoint_handlers
                .push(DelayCheckpointEvent::get_logger());
            handlers
                .remove_checkpoint_handlers
                .push(RemoveCheckpointEvent::get_logger());
        }
        handlers
    }

    /// Register a handler invoked after an epoch is prepared.
    pub fn on_prepare_epoch(mut self, handler: impl Fn(&PrepareEpochEvent) + Send + 'static) -> Self {
        self.prepare_epoch_handlers.push(Box::new(handler));
        self
    }

    /// Register a handler invoked after an emergency fallback epoch is injected.
    pub fn on_inject_fallback_epoch(
        mut self,
        handler: impl Fn(&InjectFallbackEpochEvent) + Send + 'static,
    ) -> Self {
        self.inject_fallback_epoch_handlers.push(Box::new(handler));
        self
    }

    /// Register a handler invoked after an epoch is pruned from the committee's cache.
    pub fn on_prune_epoch(mut self, handler: impl Fn(&PruneEpochEvent) + Send + 'static) -> Self {
        self.prune_epoch_handlers.push(Box::new(handler));
        self
    }

    /// Register a handler invoked after a WAL segment is finalized.
    pub fn on_finalize_segment(
        mut self,
        handler: impl Fn(&FinalizeSegmentEvent) + Send + 'static,
    ) -> Self {
        self.finalize_segment_handlers.push(Box::new(handler));
        self
    }

    /// Register a handler invoked when the compactor starts writing a checkpoint.
    pub fn on_start_checkpoint(
        mut self,
        handler: impl Fn(&StartCheckpointEvent) + Send + 'static,
    ) -> Self {
        self.start_checkpoint_handlers.push(Box::new(handler));
        self
    }

    /// Register a handler invoked after a checkpoint is durably written.
    pub fn on_end_checkpoint(
        mut self,
        handler: impl Fn(&EndCheckpointEvent) + Send + 'static,
    ) -> Self {
        self.end_checkpoint_handlers.push(Box::new(handler));
        self
    }

    /// Register a handler invoked when a due checkpoint is delayed by one that is still running.
    pub fn on_delay_checkpoint(
        mut self,
        handler: impl Fn(&DelayCheckpointEvent) + Send + 'static,
    ) -> Self {
        self.delay_checkpoint_handlers.push(Box::new(handler));
        self
    }

    /// Register a handler invoked after an old checkpoint is removed.
    pub fn on_remove_checkpoint(
        mut self,
        handler: impl Fn(&RemoveCheckpointEvent) + Send + 'static,
    ) -> Self {
        self.remove_checkpoint_handlers.push(Box::new(handler));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.prepare_epoch_handlers.is_empty()
            && self.inject_fallback_epoch_handlers.is_empty()
            && self.prune_epoch_handlers.is_empty()
            && self.finalize_segment_handlers.is_empty()
            && self.start_checkpoint_handlers.is_empty()
            && self.end_checkpoint_handlers.is_empty()
            && self.delay_checkpoint_handlers.is_empty()
            && self.remove_checkpoint_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::PrepareEpoch(prepare_epoch_event) => self
                .prepare_epoch_handlers
                .iter()
                .for_each(|handler| handler(&prepare_epoch_event)),

            Event::InjectFallbackEpoch(inject_fallback_epoch_event) => self
                .inject_fallback_epoch_handlers
                .iter()
                .for_each(|handler| handler(&inject_fallback_epoch_event)),

            Event::PruneEpoch(prune_epoch_event) => self
                .prune_epoch_handlers
                .iter()
                .for_each(|handler| handler(&prune_epoch_event)),

            Event::FinalizeSegment(finalize_segment_event) => self
                .finalize_segment_handlers
                .iter()
                .for_each(|handler| handler(&finalize_segment_event)),

            Event::StartCheckpoint(start_checkpoint_event) => self
                .start_checkpoint_handlers
                .iter()
                .for_each(|handler| handler(&start_checkpoint_event)),

            Event::EndCheckpoint(end_checkpoint_event) => self
                .end_checkpoint_handlers
                .iter()
                .for_each(|handler| handler(&end_checkpoint_event)),

            Event::DelayCheckpoint(delay_checkpoint_event) => self
                .delay_checkpoint_handlers
                .iter()
                .for_each(|handler| handler(&delay_checkpoint_event)),

            Event::RemoveCheckpoint(remove_checkpoint_event) => self
                .remove_checkpoint_handlers
                .iter()
                .for_each(|handler| handler(&remove_checkpoint_event)),
        }
    }
}

/// Start the event bus thread, which fires `event_handlers` for every event received on
/// `event_subscriber` until a message is received on `shutdown_signal`. Events still queued at shutdown
/// are handled before the thread exits.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone; wait for the shutdown signal.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(EVENT_POLL_INTERVAL),
        }
    })
}
