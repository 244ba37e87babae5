/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! On-disk checkpoints of a set of tries.
//!
//! A checkpoint is a directory of 17 files: one partition file per subtrie (`"0"` to `"15"`) and one
//! file (`"17"`) with the nodes above the subtries, the trie root records, and the footer. The
//! [`serializer`] writes them, the [`reader`] reads them back, and [`encoding`] defines the bytes.

use std::{
    fmt::{self, Display, Formatter},
    io,
};

use crate::types::data_types::CryptoHash;

pub mod encoding;

pub mod reader;
pub use reader::read_checkpoint;

pub mod serializer;
pub use serializer::store_checkpoint_concurrently;

#[derive(Debug)]
pub enum CheckpointError {
    /// An I/O operation, described by `context`, failed.
    Io { context: String, source: io::Error },
    AlreadyExists { checkpoint: u64 },
    NotFound { checkpoint: u64 },
    /// A checkpoint file does not parse.
    Corrupted { file: String, reason: String },
    /// The node with `index` in `file` does not hash to the hash stored with it.
    HashMismatch { file: String, index: u64 },
    /// A trie's root node was not written by any pass.
    MissingRoot { root_hash: CryptoHash },
    /// Partition task `index` failed.
    Partition {
        index: usize,
        source: Box<CheckpointError>,
    },
    PartitionPanicked { index: usize },
    /// The footer stores the trie count as a u16.
    TooManyTries { count: usize },
}

impl CheckpointError {
    /// Get a function that wraps an [`io::Error`] with `context`.
    pub(crate) fn io(context: String) -> impl Fn(io::Error) -> CheckpointError {
        move |source| CheckpointError::Io {
            context: context.clone(),
            source,
        }
    }
}

impl Display for CheckpointError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io { context, source } => write!(f, "{}: {}", context, source),
            CheckpointError::AlreadyExists { checkpoint } => {
                write!(f, "checkpoint {} already exists", checkpoint)
            }
            CheckpointError::NotFound { checkpoint } => {
                write!(f, "checkpoint {} does not exist", checkpoint)
            }
            CheckpointError::Corrupted { file, reason } => {
                write!(f, "checkpoint file {} is corrupted: {}", file, reason)
            }
            CheckpointError::HashMismatch { file, index } => write!(
                f,
                "node {} in checkpoint file {} does not match its stored hash",
                index, file
            ),
            CheckpointError::MissingRoot { root_hash } => {
                write!(f, "root node of trie {} was not serialized", root_hash)
            }
            CheckpointError::Partition { index, source } => {
                write!(f, "partition {} failed: {}", index, source)
            }
            CheckpointError::PartitionPanicked { index } => {
                write!(f, "partition {} panicked", index)
            }
            CheckpointError::TooManyTries { count } => {
                write!(f, "cannot checkpoint {} tries, at most {}", count, u16::MAX)
            }
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckpointError::Io { source, .. } => Some(source),
            CheckpointError::Partition { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
