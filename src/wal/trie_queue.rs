/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The tries of the most recent WAL records, which the compactor hands to the checkpointer.

use std::collections::VecDeque;

use crate::ledger::trie::Trie;

/// A fixed-capacity FIFO of the most recent tries. Pushing into a full queue drops the oldest trie.
#[derive(Clone, Debug)]
pub struct TrieQueue {
    capacity: usize,
    tries: VecDeque<Trie>,
}

impl TrieQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tries: VecDeque::with_capacity(capacity),
        }
    }

    /// Create a queue holding the last `capacity` of `tries`.
    pub fn with_values(capacity: usize, tries: impl IntoIterator<Item = Trie>) -> Self {
        let mut queue = Self::new(capacity);
        tries.into_iter().for_each(|trie| queue.push(trie));
        queue
    }

    pub fn push(&mut self, trie: Trie) {
        if self.tries.len() == self.capacity {
            self.tries.pop_front();
        }
        self.tries.push_back(trie);
    }

    /// Get a snapshot of the tries in the queue, from the oldest to the newest.
    pub fn tries(&self) -> Vec<Trie> {
        self.tries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
