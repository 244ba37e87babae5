/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Compactor`] thread and its checkpoint threads.

use std::{
    fmt::{self, Display, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    events::{
        DelayCheckpointEvent, EndCheckpointEvent, Event, FinalizeSegmentEvent,
        RemoveCheckpointEvent, StartCheckpointEvent,
    },
    ledger::{trie::Trie, Ledger},
    wal::{checkpoint::CheckpointError, CheckpointStore, LedgerWAL, TrieQueue, WALError},
};

use super::types::{CheckpointObserver, CompactorConfiguration, WALTrieUpdate};

const TRIE_UPDATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

type Observers = Arc<Mutex<Vec<Arc<dyn CheckpointObserver>>>>;

/// Records every write to the ledger in the WAL, and periodically checkpoints the most recent tries.
///
/// The compactor keeps the tries produced by the last `checkpoint_capacity` writes in a [`TrieQueue`].
/// Every time the WAL moves on to a new segment, the compactor checks whether `checkpoint_distance`
/// segments were finalized since the last checkpoint. If so, it checkpoints a snapshot of the queue on
/// a separate thread, numbered after the segment that was just finalized.
///
/// At most one checkpoint is written at a time. A checkpoint that is due while another is still being
/// written, or that failed, is retried when the next segment is finalized.
pub struct Compactor<W: LedgerWAL> {
    wal: W,
    checkpointer: Arc<W::Checkpointer>,
    trie_queue: TrieQueue,
    trie_updates: Receiver<WALTrieUpdate>,
    observers: Observers,
    config: CompactorConfiguration,
    event_publisher: Option<Sender<Event>>,
}

impl<W: LedgerWAL> Compactor<W> {
    /// Create a compactor for the writes of `ledger`. The trie queue starts with the ledger's tries.
    pub fn new(
        ledger: &Ledger,
        wal: W,
        mut config: CompactorConfiguration,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, CompactorError> {
        config.checkpoint_distance = config.checkpoint_distance.max(1);

        let checkpointer = Arc::new(wal.new_checkpointer()?);
        let trie_updates = ledger
            .take_trie_updates()
            .ok_or(CompactorError::TrieUpdatesTaken)?;
        let trie_queue = TrieQueue::with_values(config.checkpoint_capacity, ledger.tries());

        Ok(Self {
            wal,
            checkpointer,
            trie_queue,
            trie_updates,
            observers: Arc::new(Mutex::new(Vec::new())),
            config,
            event_publisher,
        })
    }

    pub fn subscribe(&self, observer: Arc<dyn CheckpointObserver>) {
        subscribe(&self.observers, observer)
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn CheckpointObserver>) {
        unsubscribe(&self.observers, observer)
    }

    /// Start the compactor thread. The thread stops when the returned handle is dropped.
    pub fn start(self) -> CompactorHandle {
        let (shutdown, shutdown_receiver) = mpsc::channel();
        let observers = Arc::clone(&self.observers);
        let handle = thread::spawn(move || self.run(shutdown_receiver));
        CompactorHandle {
            handle: Some(handle),
            shutdown,
            observers,
        }
    }

    fn run(mut self, shutdown_signal: Receiver<()>) {
        let checkpoint_in_flight = CheckpointInFlight::default();
        let cancelled = Arc::new(AtomicBool::new(false));
        let (checkpoint_results, checkpoint_result_receiver) = mpsc::sync_channel(1);

        // Failing to read either number is not fatal: the loop recovers the active segment number from
        // the next recorded update.
        let mut active_segment = match self.wal.segments() {
            Ok((_, active)) => Some(active),
            Err(err) => {
                log::error!("Compactor failed to get the active segment number: {}", err);
                None
            }
        };
        let last_checkpoint = match self.checkpointer.latest_checkpoint() {
            Ok(last) => last,
            Err(err) => {
                log::error!("Compactor failed to get the last checkpoint number: {}", err);
                None
            }
        };
        let mut next_checkpoint = initial_next_checkpoint(
            last_checkpoint,
            active_segment,
            self.config.checkpoint_distance,
        );
        log::debug!(
            "Compactor started, active segment {:?}, next checkpoint {}",
            active_segment,
            next_checkpoint
        );

        loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => (),
            }

            while let Ok(CheckpointResult { num, result }) = checkpoint_result_receiver.try_recv() {
                if let Err(err) = result {
                    log::error!("Compactor failed to checkpoint {}: {}", num, err);
                    next_checkpoint = active_segment.unwrap_or(0);
                }
            }

            let update = match self.trie_updates.recv_timeout(TRIE_UPDATE_POLL_INTERVAL) {
                Ok(update) => update,
                Err(RecvTimeoutError::Timeout) => continue,
                // The ledger is gone. Wait for the shutdown signal.
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(TRIE_UPDATE_POLL_INTERVAL);
                    continue;
                }
            };

            let (new_active_segment, checkpoint) =
                self.process_trie_update(update, active_segment, next_checkpoint);
            active_segment = new_active_segment;

            let (checkpoint_num, tries) = match checkpoint {
                Some(checkpoint) => checkpoint,
                None => continue,
            };

            match checkpoint_in_flight.try_acquire() {
                Some(permit) => {
                    next_checkpoint = checkpoint_num + self.config.checkpoint_distance;
                    self.start_checkpoint(
                        checkpoint_num,
                        tries,
                        permit,
                        Arc::clone(&cancelled),
                        checkpoint_results.clone(),
                    );
                }
                None => {
                    log::info!(
                        "Compactor delayed checkpoint {} because the previous checkpoint is still being written",
                        checkpoint_num
                    );
                    Event::DelayCheckpoint(DelayCheckpointEvent {
                        timestamp: SystemTime::now(),
                        checkpoint: checkpoint_num,
                    })
                    .publish(&self.event_publisher);
                    next_checkpoint = active_segment.unwrap_or(0);
                }
            }
        }

        cancelled.store(true, Ordering::Release);

        // Record the writes that are already queued. Their writers may have given up waiting.
        let mut drained = 0;
        while let Ok(update) = self.trie_updates.try_recv() {
            let result = self.wal.record_update(&update.update).map(|_| ());
            let _ = update.result.try_send(result);
            drained += 1;
        }
        if drained > 0 {
            log::debug!("Compactor recorded {} queued updates while stopping", drained);
        }

        // An in-flight checkpoint is not waited for.
        let observers = self.observers.lock().unwrap().clone();
        for observer in observers {
            observer.on_complete();
        }
    }

    /// Record `update` in the WAL, send the result to the ledger, and push the resulting trie into the
    /// trie queue.
    ///
    /// Returns the new active segment number and, if the update finalized a segment and a checkpoint is
    /// due, the checkpoint number with the tries to checkpoint. The tries do not include the trie of
    /// `update`, since its record is in the new segment.
    fn process_trie_update(
        &mut self,
        update: WALTrieUpdate,
        active_segment: Option<u64>,
        next_checkpoint: u64,
    ) -> (Option<u64>, Option<(u64, Vec<Trie>)>) {
        let WALTrieUpdate {
            update,
            result,
            trie,
        } = update;

        let recorded = match self.wal.record_update(&update) {
            Ok(recorded) => {
                let _ = result.send(Ok(()));
                Some(recorded)
            }
            Err(err) => {
                let _ = result.send(Err(err));
                None
            }
        };

        let outcome = match (active_segment, recorded) {
            (None, Some((segment, _))) => (Some(segment), None),
            (active_segment, None) => (active_segment, None),
            (Some(active), Some((segment, skipped))) if skipped || segment <= active => {
                (Some(active), None)
            }
            (Some(finalized), Some((segment, _))) => {
                if segment != finalized + 1 {
                    log::error!(
                        "Compactor got unexpected new segment number {}, expected {}",
                        segment,
                        finalized + 1
                    );
                }
                Event::FinalizeSegment(FinalizeSegmentEvent {
                    timestamp: SystemTime::now(),
                    segment: finalized,
                })
                .publish(&self.event_publisher);

                if next_checkpoint > finalized {
                    (Some(segment), None)
                } else {
                    (Some(segment), Some((finalized, self.trie_queue.tries())))
                }
            }
        };

        // The trie is only pushed after its update is recorded, so the queue never holds a trie whose
        // record may be lost.
        match trie.recv() {
            Ok(trie) => self.trie_queue.push(trie),
            Err(_) => log::error!(
                "Compactor did not get the trie of an update on {}",
                update.root_hash
            ),
        }

        outcome
    }

    fn start_checkpoint(
        &self,
        num: u64,
        tries: Vec<Trie>,
        permit: CheckpointPermit,
        cancelled: Arc<AtomicBool>,
        results: SyncSender<CheckpointResult>,
    ) {
        let checkpoint = CheckpointTask {
            checkpointer: Arc::clone(&self.checkpointer),
            observers: Arc::clone(&self.observers),
            checkpoints_to_keep: self.config.checkpoints_to_keep,
            cancelled,
            event_publisher: self.event_publisher.clone(),
        };
        thread::spawn(move || {
            let result = checkpoint.run(num, &tries);
            drop(tries);
            let _ = results.send(CheckpointResult { num, result });
            drop(permit);
        });
    }
}

/// Get the number of the first checkpoint to write: `distance` segments after the last checkpoint, but
/// never before the active segment, since the queue holds no tries of older segments.
pub(crate) fn initial_next_checkpoint(
    last_checkpoint: Option<u64>,
    active_segment: Option<u64>,
    distance: u64,
) -> u64 {
    let next = last_checkpoint.map_or(distance.saturating_sub(1), |last| last + distance);
    active_segment.map_or(next, |active| active.max(next))
}

struct CheckpointResult {
    num: u64,
    result: Result<(), CompactorError>,
}

/// Everything a checkpoint thread needs from the compactor.
struct CheckpointTask<C: CheckpointStore> {
    checkpointer: Arc<C>,
    observers: Observers,
    checkpoints_to_keep: usize,
    cancelled: Arc<AtomicBool>,
    event_publisher: Option<Sender<Event>>,
}

impl<C: CheckpointStore> CheckpointTask<C> {
    fn run(&self, num: u64, tries: &[Trie]) -> Result<(), CompactorError> {
        log::info!("Serializing checkpoint {} with {} tries", num, tries.len());
        Event::StartCheckpoint(StartCheckpointEvent {
            timestamp: SystemTime::now(),
            checkpoint: num,
            trie_count: tries.len(),
        })
        .publish(&self.event_publisher);

        let start = Instant::now();
        self.checkpointer
            .store_checkpoint(num, tries)
            .map_err(|source| CompactorError::Checkpoint { num, source })?;
        let duration = start.elapsed();

        log::info!("Created checkpoint {} in {:?}", num, duration);
        Event::EndCheckpoint(EndCheckpointEvent {
            timestamp: SystemTime::now(),
            checkpoint: num,
            duration,
        })
        .publish(&self.event_publisher);

        if self.is_cancelled() {
            return Ok(());
        }

        self.cleanup()?;

        // Checkpoint 0 only holds the tries the ledger started with.
        if num > 0 {
            let observers = self.observers.lock().unwrap().clone();
            for observer in observers {
                // Observers may be torn down once the compactor stops.
                if self.is_cancelled() {
                    return Ok(());
                }
                observer.on_next(num);
            }
        }

        Ok(())
    }

    /// Remove every checkpoint but the newest `checkpoints_to_keep`.
    fn cleanup(&self) -> Result<(), CompactorError> {
        if self.checkpoints_to_keep == 0 {
            return Ok(());
        }
        let checkpoints = self
            .checkpointer
            .checkpoints()
            .map_err(CompactorError::ListCheckpoints)?;
        if checkpoints.len() <= self.checkpoints_to_keep {
            return Ok(());
        }
        for num in &checkpoints[..checkpoints.len() - self.checkpoints_to_keep] {
            self.checkpointer
                .remove_checkpoint(*num)
                .map_err(|source| CompactorError::RemoveCheckpoint { num: *num, source })?;
            Event::RemoveCheckpoint(RemoveCheckpointEvent {
                timestamp: SystemTime::now(),
                checkpoint: *num,
            })
            .publish(&self.event_publisher);
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Whether a checkpoint is being written. At most one [`CheckpointPermit`] exists at a time.
#[derive(Clone, Default)]
pub(crate) struct CheckpointInFlight(Arc<AtomicBool>);

impl CheckpointInFlight {
    /// Get the permit to write a checkpoint, or `None` if a checkpoint is already being written.
    pub(crate) fn try_acquire(&self) -> Option<CheckpointPermit> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CheckpointPermit(Arc::clone(&self.0)))
    }
}

/// Releases the [`CheckpointInFlight`] flag when dropped.
pub(crate) struct CheckpointPermit(Arc<AtomicBool>);

impl Drop for CheckpointPermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A handle to a running [`Compactor`]. Dropping it stops the compactor thread, after which every
/// observer's [`on_complete`](CheckpointObserver::on_complete) is called.
pub struct CompactorHandle {
    handle: Option<JoinHandle<()>>,
    shutdown: Sender<()>,
    observers: Observers,
}

impl CompactorHandle {
    pub fn subscribe(&self, observer: Arc<dyn CheckpointObserver>) {
        subscribe(&self.observers, observer)
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn CheckpointObserver>) {
        unsubscribe(&self.observers, observer)
    }
}

impl Drop for CompactorHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Compactor thread panicked");
            }
        }
    }
}

fn subscribe(observers: &Observers, observer: Arc<dyn CheckpointObserver>) {
    let mut observers = observers.lock().unwrap();
    if !observers.iter().any(|existing| same_observer(existing, &observer)) {
        observers.push(observer);
    }
}

fn unsubscribe(observers: &Observers, observer: &Arc<dyn CheckpointObserver>) {
    observers
        .lock()
        .unwrap()
        .retain(|existing| !same_observer(existing, observer));
}

fn same_observer(a: &Arc<dyn CheckpointObserver>, b: &Arc<dyn CheckpointObserver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[derive(Debug)]
pub enum CompactorError {
    /// Another compactor already took the ledger's writes.
    TrieUpdatesTaken,
    WAL(WALError),
    Checkpoint { num: u64, source: CheckpointError },
    ListCheckpoints(CheckpointError),
    RemoveCheckpoint { num: u64, source: CheckpointError },
}

impl From<WALError> for CompactorError {
    fn from(value: WALError) -> Self {
        CompactorError::WAL(value)
    }
}

impl Display for CompactorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CompactorError::TrieUpdatesTaken => {
                write!(f, "the ledger's trie updates were already taken")
            }
            CompactorError::WAL(err) => Display::fmt(err, f),
            CompactorError::Checkpoint { num, source } => {
                write!(f, "cannot create checkpoint {}: {}", num, source)
            }
            CompactorError::ListCheckpoints(source) => {
                write!(f, "cannot list checkpoints: {}", source)
            }
            CompactorError::RemoveCheckpoint { num, source } => {
                write!(f, "cannot remove checkpoint {}: {}", num, source)
            }
        }
    }
}

impl std::error::Error for CompactorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_checkpoint_is_distance_segments_in() {
        assert_eq!(initial_next_checkpoint(None, Some(0), 10), 9);
        assert_eq!(initial_next_checkpoint(Some(9), Some(10), 10), 19);
        // Never before the active segment.
        assert_eq!(initial_next_checkpoint(Some(9), Some(42), 10), 42);
        assert_eq!(initial_next_checkpoint(None, None, 1), 0);
    }

    #[test]
    fn only_one_checkpoint_permit_at_a_time() {
        let in_flight = CheckpointInFlight::default();
        let permit = in_flight.try_acquire().unwrap();
        assert!(in_flight.try_acquire().is_none());
        assert!(in_flight.clone().try_acquire().is_none());

        drop(permit);
        assert!(in_flight.try_acquire().is_some());
    }
}
