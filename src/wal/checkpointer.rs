/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Management of the checkpoint directories in a WAL directory.
//!
//! Checkpoint `n` is the directory `checkpoint.000000nn` next to the WAL segments, and holds the tries
//! that result from applying every record in segments `0..=n`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::ledger::trie::Trie;

use super::{
    checkpoint::{read_checkpoint, store_checkpoint_concurrently, CheckpointError},
    segment::{parse_segment_file_name, segment_file_name},
    sync_rename::{sync_dir, temp_name},
};

const CHECKPOINT_PREFIX: &str = "checkpoint.";

/// Storage for numbered checkpoints, as used by the [compactor](crate::compactor) and by WAL replay.
pub trait CheckpointStore: Send + Sync + 'static {
    /// Get the number of the newest checkpoint, or `None` if there are no checkpoints.
    fn latest_checkpoint(&self) -> Result<Option<u64>, CheckpointError>;

    /// Get the numbers of every checkpoint, in ascending order.
    fn checkpoints(&self) -> Result<Vec<u64>, CheckpointError>;

    /// Store `tries` as checkpoint `num`. The checkpoint only becomes visible once it is completely
    /// written.
    fn store_checkpoint(&self, num: u64, tries: &[Trie]) -> Result<(), CheckpointError>;

    fn load_checkpoint(&self, num: u64) -> Result<Vec<Trie>, CheckpointError>;

    fn remove_checkpoint(&self, num: u64) -> Result<(), CheckpointError>;
}

pub fn checkpoint_dir_name(num: u64) -> String {
    format!("{}{}", CHECKPOINT_PREFIX, segment_file_name(num))
}

pub fn parse_checkpoint_dir_name(name: &str) -> Option<u64> {
    name.strip_prefix(CHECKPOINT_PREFIX)
        .and_then(parse_segment_file_name)
}

/// Stores checkpoints as directories in `dir`.
#[derive(Clone, Debug)]
pub struct Checkpointer {
    dir: PathBuf,
}

impl Checkpointer {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start writing checkpoint `num`. Fails if checkpoint `num` already exists.
    pub fn checkpoint_writer(&self, num: u64) -> Result<CheckpointWriter, CheckpointError> {
        let target = self.dir.join(checkpoint_dir_name(num));
        if target.exists() {
            return Err(CheckpointError::AlreadyExists { checkpoint: num });
        }

        let temp = self
            .dir
            .join(temp_name(&format!("writing-{}", checkpoint_dir_name(num))));
        fs::create_dir(&temp).map_err(CheckpointError::io(format!(
            "create {}",
            temp.display()
        )))?;

        Ok(CheckpointWriter {
            num,
            temp,
            target,
            committed: false,
        })
    }
}

impl CheckpointStore for Checkpointer {
    fn latest_checkpoint(&self) -> Result<Option<u64>, CheckpointError> {
        Ok(self.checkpoints()?.last().copied())
    }

    fn checkpoints(&self) -> Result<Vec<u64>, CheckpointError> {
        let list_error = CheckpointError::io(format!("list {}", self.dir.display()));
        let mut checkpoints = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(&list_error)? {
            let entry = entry.map_err(&list_error)?;
            if !entry.file_type().map_err(&list_error)?.is_dir() {
                continue;
            }
            if let Some(num) = entry
                .file_name()
                .to_str()
                .and_then(parse_checkpoint_dir_name)
            {
                checkpoints.push(num);
            }
        }
        checkpoints.sort_unstable();
        Ok(checkpoints)
    }

    fn store_checkpoint(&self, num: u64, tries: &[Trie]) -> Result<(), CheckpointError> {
        let writer = self.checkpoint_writer(num)?;
        store_checkpoint_concurrently(tries, writer.path())?;
        writer.commit()
    }

    fn load_checkpoint(&self, num: u64) -> Result<Vec<Trie>, CheckpointError> {
        let dir = self.dir.join(checkpoint_dir_name(num));
        if !dir.is_dir() {
            return Err(CheckpointError::NotFound { checkpoint: num });
        }
        read_checkpoint(&dir)
    }

    fn remove_checkpoint(&self, num: u64) -> Result<(), CheckpointError> {
        let dir = self.dir.join(checkpoint_dir_name(num));
        if !dir.is_dir() {
            return Err(CheckpointError::NotFound { checkpoint: num });
        }
        fs::remove_dir_all(&dir).map_err(CheckpointError::io(format!("remove {}", dir.display())))
    }
}

/// A checkpoint being written into a temporary directory. [`commit`](CheckpointWriter::commit) renames
/// the directory to its checkpoint name. A writer dropped without committing removes the temporary
/// directory and everything in it.
pub struct CheckpointWriter {
    num: u64,
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl CheckpointWriter {
    /// The directory to write checkpoint files into.
    pub fn path(&self) -> &Path {
        &self.temp
    }

    pub fn num(&self) -> u64 {
        self.num
    }

    pub fn commit(mut self) -> Result<(), CheckpointError> {
        let rename_error = CheckpointError::io(format!(
            "rename {} to {}",
            self.temp.display(),
            self.target.display()
        ));
        sync_dir(&self.temp).map_err(&rename_error)?;
        fs::rename(&self.temp, &self.target).map_err(&rename_error)?;
        self.committed = true;
        if let Some(parent) = self.target.parent() {
            sync_dir(parent).map_err(&rename_error)?;
        }
        Ok(())
    }
}

impl Drop for CheckpointWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.temp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::trie::{Path as TriePath, Payload};

    #[test]
    fn checkpoints_are_listed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().to_path_buf());
        assert_eq!(checkpointer.latest_checkpoint().unwrap(), None);

        let trie = Trie::empty()
            .update(
                &[TriePath::from_key(b"a")],
                &[Payload::new(b"a".to_vec(), b"1".to_vec())],
            )
            .unwrap();
        for num in [12, 3, 7] {
            checkpointer
                .store_checkpoint(num, &[trie.clone()])
                .unwrap();
        }
        // Segment files and unrelated directories are not checkpoints.
        fs::write(dir.path().join(segment_file_name(13)), b"").unwrap();
        fs::create_dir(dir.path().join("checkpoint.x")).unwrap();

        assert_eq!(checkpointer.checkpoints().unwrap(), vec![3, 7, 12]);
        assert_eq!(checkpointer.latest_checkpoint().unwrap(), Some(12));

        checkpointer.remove_checkpoint(12).unwrap();
        assert_eq!(checkpointer.latest_checkpoint().unwrap(), Some(7));
        assert!(matches!(
            checkpointer.remove_checkpoint(12),
            Err(CheckpointError::NotFound { checkpoint: 12 })
        ));

        let loaded = checkpointer.load_checkpoint(7).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].root_hash(), trie.root_hash());
    }

    #[test]
    fn uncommitted_checkpoint_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().to_path_buf());

        let writer = checkpointer.checkpoint_writer(4).unwrap();
        fs::write(writer.path().join("0"), b"partial").unwrap();
        drop(writer);

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(checkpointer.checkpoints().unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn failed_partition_leaves_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().to_path_buf());
        let trie = Trie::empty()
            .update(
                &[TriePath::from_key(b"a"), TriePath::from_key(b"b")],
                &[
                    Payload::new(b"a".to_vec(), b"1".to_vec()),
                    Payload::new(b"b".to_vec(), b"2".to_vec()),
                ],
            )
            .unwrap();

        // The same steps as `store_checkpoint`, with partition 3's file already taken.
        let writer = checkpointer.checkpoint_writer(6).unwrap();
        fs::write(writer.path().join("3"), b"taken").unwrap();
        assert!(matches!(
            store_checkpoint_concurrently(&[trie], writer.path()),
            Err(CheckpointError::Partition { index: 3, .. })
        ));
        drop(writer);

        assert!(!dir.path().join(checkpoint_dir_name(6)).exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(checkpointer.checkpoints().unwrap(), Vec::<u64>::new());
        assert!(matches!(
            checkpointer.load_checkpoint(6),
            Err(CheckpointError::NotFound { checkpoint: 6 })
        ));
    }

    #[test]
    fn existing_checkpoint_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = Checkpointer::new(dir.path().to_path_buf());
        checkpointer.store_checkpoint(1, &[Trie::empty()]).unwrap();
        assert!(matches!(
            checkpointer.store_checkpoint(1, &[Trie::empty()]),
            Err(CheckpointError::AlreadyExists { checkpoint: 1 })
        ));
    }
}
