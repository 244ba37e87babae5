/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Ledger`], which applies key-value writes to versions of the state and reads from them.

use std::{
    fmt::{self, Display, Formatter},
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex,
    },
};

use crate::{
    compactor::WALTrieUpdate,
    types::data_types::CryptoHash,
    wal::{LedgerWAL, WALError},
};

use super::{
    forest::{Forest, ForestError},
    trie::{Path, Trie},
    trie_update::TrieUpdate,
};

/// A versioned key-value store. Every version of the state is a [`Trie`] identified by its root hash,
/// and the most recent versions are kept in memory in a [`Forest`].
///
/// Writes go through the [compactor](crate::compactor): a write is only applied once the compactor
/// has durably recorded it in the WAL, and the resulting trie is handed back to the compactor so it
/// can be included in the next checkpoint.
pub struct Ledger {
    forest: Mutex<Forest>,
    trie_updates: Sender<WALTrieUpdate>,
    trie_update_receiver: Mutex<Option<Receiver<WALTrieUpdate>>>,
}

impl Ledger {
    /// Create a ledger holding up to `capacity` versions of the state, restored from `wal`.
    pub fn new<W: LedgerWAL>(wal: &W, capacity: usize) -> Result<Self, LedgerError> {
        let mut forest = Forest::new(capacity);
        wal.replay_on_forest(&mut forest)?;
        log::info!("Ledger restored with {} tries", forest.len());

        let (trie_updates, trie_update_receiver) = mpsc::channel();
        Ok(Self {
            forest: Mutex::new(forest),
            trie_updates,
            trie_update_receiver: Mutex::new(Some(trie_update_receiver)),
        })
    }

    /// Take the receiving end of the channel the ledger sends its writes on. Only the first call returns
    /// `Some`.
    pub fn take_trie_updates(&self) -> Option<Receiver<WALTrieUpdate>> {
        self.trie_update_receiver.lock().unwrap().take()
    }

    /// Write `entries` on top of the state with root hash `state`, and return the root hash of the new
    /// state. Writing no entries returns `state` unchanged.
    ///
    /// Blocks until the compactor has recorded the write in the WAL.
    pub fn set(
        &self,
        state: CryptoHash,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<CryptoHash, LedgerError> {
        if entries.is_empty() {
            return Ok(state);
        }
        let update = TrieUpdate::from_entries(state, entries);

        let (result_sender, result_receiver) = mpsc::sync_channel(1);
        let (trie_sender, trie_receiver) = mpsc::sync_channel(1);
        self.trie_updates
            .send(WALTrieUpdate {
                update: update.clone(),
                result: result_sender,
                trie: trie_receiver,
            })
            .map_err(|_| LedgerError::CompactorStopped)?;

        // Building the trie overlaps with the WAL write. If either fails, `trie_sender` is dropped
        // without sending, which tells the compactor there is no trie for this update.
        let new_trie = self.forest.lock().unwrap().new_trie(&update);
        let wal_result = result_receiver
            .recv()
            .map_err(|_| LedgerError::CompactorStopped)?;
        let new_trie = new_trie?;
        wal_result?;

        let root_hash = new_trie.root_hash();
        self.forest.lock().unwrap().add_trie(new_trie.clone());
        let _ = trie_sender.send(new_trie);

        Ok(root_hash)
    }

    /// Read the values of `keys` in the state with root hash `state`.
    pub fn get(
        &self,
        state: &CryptoHash,
        keys: &[Vec<u8>],
    ) -> Result<Vec<Option<Vec<u8>>>, LedgerError> {
        let paths: Vec<Path> = keys.iter().map(|key| Path::from_key(key)).collect();
        let payloads = self.forest.lock().unwrap().read(state, &paths)?;
        Ok(payloads
            .into_iter()
            .map(|payload| payload.map(|payload| payload.value().to_vec()))
            .collect())
    }

    pub fn has_state(&self, state: &CryptoHash) -> bool {
        self.forest.lock().unwrap().has_trie(state)
    }

    /// Get every state the ledger holds, from the oldest to the newest.
    pub fn tries(&self) -> Vec<Trie> {
        self.forest.lock().unwrap().get_tries()
    }

    /// Get the root hash of the most recently added state.
    pub fn latest_state(&self) -> CryptoHash {
        self.tries()
            .last()
            .map_or(Trie::empty().root_hash(), Trie::root_hash)
    }
}

#[derive(Debug)]
pub enum LedgerError {
    Forest(ForestError),
    WAL(WALError),
    /// The compactor is not running, so writes cannot be recorded.
    CompactorStopped,
}

impl From<ForestError> for LedgerError {
    fn from(value: ForestError) -> Self {
        LedgerError::Forest(value)
    }
}

impl From<WALError> for LedgerError {
    fn from(value: WALError) -> Self {
        LedgerError::WAL(value)
    }
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Forest(err) => Display::fmt(err, f),
            LedgerError::WAL(err) => write!(f, "could not record update in the WAL: {}", err),
            LedgerError::CompactorStopped => write!(f, "the compactor has stopped"),
        }
    }
}

impl std::error::Error for LedgerError {}
