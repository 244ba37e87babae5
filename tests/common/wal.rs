/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An in-memory WAL whose segments hold a fixed number of records, and an in-memory checkpoint store
//! that records how many checkpoints were being written at once. Both can be told to fail.

use std::{
    collections::BTreeMap,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use hotstuff_ledger::{
    ledger::{forest::Forest, trie::Trie, trie_update::TrieUpdate},
    wal::{checkpoint::CheckpointError, CheckpointStore, LedgerWAL, WALError},
};

/// Update `i` (counting from 0, skipped updates excluded) is recorded in segment
/// `i / records_per_segment`.
pub(crate) struct MockWAL {
    records_per_segment: usize,
    records: Arc<Mutex<Vec<(u64, TrieUpdate)>>>,
    failing_updates: Arc<AtomicUsize>,
    checkpointer: MockCheckpointer,
}

impl MockWAL {
    pub(crate) fn new(records_per_segment: usize, checkpointer: MockCheckpointer) -> Self {
        Self {
            records_per_segment: records_per_segment.max(1),
            records: Arc::new(Mutex::new(Vec::new())),
            failing_updates: Arc::default(),
            checkpointer,
        }
    }

    /// Get a handle to the records written so far, as `(segment, update)`.
    pub(crate) fn records(&self) -> Arc<Mutex<Vec<(u64, TrieUpdate)>>> {
        Arc::clone(&self.records)
    }

    /// Get a handle to the number of upcoming non-empty updates that fail to be recorded.
    pub(crate) fn failing_updates(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.failing_updates)
    }

    fn active_segment(&self, record_count: usize) -> u64 {
        (record_count.saturating_sub(1) / self.records_per_segment) as u64
    }
}

impl LedgerWAL for MockWAL {
    type Checkpointer = MockCheckpointer;

    fn record_update(&mut self, update: &TrieUpdate) -> Result<(u64, bool), WALError> {
        let mut records = self.records.lock().unwrap();
        if update.is_empty() {
            return Ok((self.active_segment(records.len()), true));
        }
        if take_one(&self.failing_updates) {
            return Err(WALError::Io {
                context: "append to mock segment".to_string(),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            });
        }
        let segment = (records.len() / self.records_per_segment) as u64;
        records.push((segment, update.clone()));
        Ok((segment, false))
    }

    fn segments(&self) -> Result<(u64, u64), WALError> {
        Ok((0, self.active_segment(self.records.lock().unwrap().len())))
    }

    fn new_checkpointer(&self) -> Result<MockCheckpointer, WALError> {
        Ok(self.checkpointer.clone())
    }

    fn replay_on_forest(&self, forest: &mut Forest) -> Result<(), WALError> {
        if let Some(latest) = self.checkpointer.latest_checkpoint()? {
            forest.add_tries(self.checkpointer.load_checkpoint(latest)?);
        }
        for (_, update) in self.records.lock().unwrap().iter() {
            forest.update(update).map_err(|source| WALError::Replay {
                segment: 0,
                source,
            })?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct CheckpointerState {
    checkpoints: Mutex<BTreeMap<u64, Vec<Trie>>>,
    stored: Mutex<Vec<u64>>,
    failing_stores: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Keeps checkpoints in memory. Clones share the same checkpoints.
#[derive(Clone, Default)]
pub(crate) struct MockCheckpointer {
    delay: Duration,
    state: Arc<CheckpointerState>,
}

impl MockCheckpointer {
    /// Create a checkpointer that takes `delay` to store a checkpoint.
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::default(),
        }
    }

    /// Create a checkpointer whose first `count` stores fail without storing anything.
    pub(crate) fn failing_first(count: usize) -> Self {
        let checkpointer = Self::default();
        checkpointer
            .state
            .failing_stores
            .store(count, Ordering::SeqCst);
        checkpointer
    }

    /// Numbers of every checkpoint stored, in the order they were stored, including removed ones.
    pub(crate) fn stored(&self) -> Vec<u64> {
        self.state.stored.lock().unwrap().clone()
    }

    /// Highest number of checkpoints ever stored at the same time.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for MockCheckpointer {
    fn latest_checkpoint(&self) -> Result<Option<u64>, CheckpointError> {
        Ok(self.state.checkpoints.lock().unwrap().keys().next_back().copied())
    }

    fn checkpoints(&self) -> Result<Vec<u64>, CheckpointError> {
        Ok(self.state.checkpoints.lock().unwrap().keys().copied().collect())
    }

    fn store_checkpoint(&self, num: u64, tries: &[Trie]) -> Result<(), CheckpointError> {
        let in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        thread::sleep(self.delay);

        let result = if take_one(&self.state.failing_stores) {
            Err(CheckpointError::Io {
                context: format!("write mock checkpoint {}", num),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            })
        } else {
            let mut checkpoints = self.state.checkpoints.lock().unwrap();
            if checkpoints.contains_key(&num) {
                Err(CheckpointError::AlreadyExists { checkpoint: num })
            } else {
                checkpoints.insert(num, tries.to_vec());
                self.state.stored.lock().unwrap().push(num);
                Ok(())
            }
        };
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn load_checkpoint(&self, num: u64) -> Result<Vec<Trie>, CheckpointError> {
        self.state
            .checkpoints
            .lock()
            .unwrap()
            .get(&num)
            .cloned()
            .ok_or(CheckpointError::NotFound { checkpoint: num })
    }

    fn remove_checkpoint(&self, num: u64) -> Result<(), CheckpointError> {
        self.state
            .checkpoints
            .lock()
            .unwrap()
            .remove(&num)
            .map(|_| ())
            .ok_or(CheckpointError::NotFound { checkpoint: num })
    }
}

/// Decrement `counter` unless it is zero. Returns whether it was decremented.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
