/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`LedgerWAL`] trait that the compactor writes through, and [`DiskWAL`], its implementation on
//! segment files.

use std::{
    fmt::{self, Display, Formatter},
    fs, io,
    path::PathBuf,
};

use borsh::{BorshDeserialize, BorshSerialize};
use typed_builder::TypedBuilder;

use crate::ledger::{
    forest::{Forest, ForestError},
    trie_update::TrieUpdate,
};

use super::{
    checkpoint::CheckpointError,
    checkpointer::{CheckpointStore, Checkpointer},
    segment::{self, encode_record, list_segments, read_segment, SegmentError, SegmentWriter},
};

/// 32 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 32 * 1024 * 1024;

/// A write-ahead log of [`TrieUpdate`]s, split into numbered segments, with checkpoints of the tries
/// the log produces.
pub trait LedgerWAL: Send + 'static {
    type Checkpointer: CheckpointStore;

    /// Durably append `update` to the log. Returns the number of the segment the update was written to
    /// and whether the update was skipped (because it changes nothing) rather than written.
    ///
    /// Segment numbers never decrease, and go up by exactly one when the log moves on to a new segment.
    fn record_update(&mut self, update: &TrieUpdate) -> Result<(u64, bool), WALError>;

    /// Get the numbers of the first and of the active segment.
    fn segments(&self) -> Result<(u64, u64), WALError>;

    fn new_checkpointer(&self) -> Result<Self::Checkpointer, WALError>;

    /// Load the newest checkpoint into `forest`, then apply every update recorded after it.
    fn replay_on_forest(&self, forest: &mut Forest) -> Result<(), WALError>;
}

/// Parameters of a [`DiskWAL`].
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [WALConfiguration]. On the builder call the following methods to construct a valid [WALConfiguration].

    Required:
    - `.dir(...)`

    Optional:
    - `.segment_size(...)`
"))]
pub struct WALConfiguration {
    #[builder(setter(
        into,
        doc = "Set the directory that holds the segments and the checkpoints. Required."
    ))]
    pub dir: PathBuf,
    #[builder(
        default = DEFAULT_SEGMENT_SIZE,
        setter(doc = "Set the size in bytes after which the WAL moves on to a new segment. Optional, defaults to 32 MiB.")
    )]
    pub segment_size: u64,
}

/// A [`LedgerWAL`] that stores segments as files in a directory.
///
/// Opening a `DiskWAL` always starts a new segment, numbered one after the highest existing segment,
/// so records written by a previous process are never appended to.
pub struct DiskWAL {
    dir: PathBuf,
    segment_size: u64,
    writer: SegmentWriter,
}

impl DiskWAL {
    pub fn open(config: WALConfiguration) -> Result<Self, WALError> {
        fs::create_dir_all(&config.dir)
            .map_err(WALError::io(format!("create {}", config.dir.display())))?;
        let segments = list_segments(&config.dir)
            .map_err(WALError::io(format!("list {}", config.dir.display())))?;
        // New records go into a new segment, so a torn tail left by a crash would otherwise end up in
        // the middle of the log. Only the last segment holding anything can be torn.
        for number in segments.iter().rev() {
            let path = config.dir.join(segment::segment_file_name(*number));
            let len = fs::metadata(&path)
                .map_err(WALError::io(format!("stat segment {}", number)))?
                .len();
            if len == 0 {
                continue;
            }
            if segment::repair_segment(&path)? {
                log::warn!("Cut a torn record off the end of segment {}", number);
            }
            break;
        }
        let number = segments.last().map_or(0, |last| last + 1);
        let writer = SegmentWriter::create(&config.dir, number).map_err(WALError::io(format!(
            "create segment {}",
            number
        )))?;

        log::debug!("Opened WAL in {}, active segment {}", config.dir.display(), number);

        Ok(Self {
            dir: config.dir,
            segment_size: config.segment_size,
            writer,
        })
    }

    fn roll_over(&mut self) -> Result<(), WALError> {
        let number = self.writer.number() + 1;
        let next = SegmentWriter::create(&self.dir, number)
            .map_err(WALError::io(format!("create segment {}", number)))?;
        let finished = std::mem::replace(&mut self.writer, next);
        let finished_number = finished.number();
        finished
            .finalize()
            .map_err(WALError::io(format!("finalize segment {}", finished_number)))
    }
}

impl LedgerWAL for DiskWAL {
    type Checkpointer = Checkpointer;

    fn record_update(&mut self, update: &TrieUpdate) -> Result<(u64, bool), WALError> {
        if update.is_empty() {
            return Ok((self.writer.number(), true));
        }

        let payload = update.try_to_vec().map_err(WALError::Encode)?;
        let record = encode_record(&payload)?;
        if self.writer.size() > 0 && self.writer.size() + record.len() as u64 > self.segment_size {
            self.roll_over()?;
        }
        self.writer
            .append(&record)
            .map_err(WALError::io(format!("append to segment {}", self.writer.number())))?;

        Ok((self.writer.number(), false))
    }

    fn segments(&self) -> Result<(u64, u64), WALError> {
        let segments = list_segments(&self.dir)
            .map_err(WALError::io(format!("list {}", self.dir.display())))?;
        let active = self.writer.number();
        Ok((segments.first().copied().unwrap_or(active), active))
    }

    fn new_checkpointer(&self) -> Result<Checkpointer, WALError> {
        Ok(Checkpointer::new(self.dir.clone()))
    }

    fn replay_on_forest(&self, forest: &mut Forest) -> Result<(), WALError> {
        let checkpointer = self.new_checkpointer()?;
        let first_segment = match checkpointer.latest_checkpoint()? {
            Some(num) => {
                let tries = checkpointer.load_checkpoint(num)?;
                log::info!("Loaded {} tries from checkpoint {}", tries.len(), num);
                forest.add_tries(tries);
                num + 1
            }
            None => 0,
        };

        let segments: Vec<u64> = list_segments(&self.dir)
            .map_err(WALError::io(format!("list {}", self.dir.display())))?
            .into_iter()
            .filter(|number| *number >= first_segment && *number != self.writer.number())
            .collect();

        let mut replayed = 0;
        for (position, number) in segments.iter().enumerate() {
            let path = self.dir.join(segment::segment_file_name(*number));
            let segment = read_segment(&path)?;

            // A torn tail is what a crash in the middle of a write leaves behind, so it is only
            // tolerated in the last segment that holds anything.
            if segment.torn_tail {
                for later in &segments[position + 1..] {
                    let later_path = self.dir.join(segment::segment_file_name(*later));
                    let len = fs::metadata(&later_path)
                        .map_err(WALError::io(format!("stat segment {}", later)))?
                        .len();
                    if len > 0 {
                        return Err(WALError::TornSegment { segment: *number });
                    }
                }
                log::warn!("Segment {} ends in a torn record, ignoring it", number);
            }

            for record in segment.records {
                let update = TrieUpdate::try_from_slice(&record).map_err(|source| {
                    WALError::Decode {
                        segment: *number,
                        source,
                    }
                })?;
                forest
                    .update(&update)
                    .map_err(|source| WALError::Replay {
                        segment: *number,
                        source,
                    })?;
                replayed += 1;
            }
        }

        log::info!(
            "Replayed {} updates from segments {:?}",
            replayed,
            segments
        );
        Ok(())
    }
}

#[derive(Debug)]
pub enum WALError {
    Io { context: String, source: io::Error },
    Segment(SegmentError),
    Checkpoint(CheckpointError),
    Encode(io::Error),
    Decode { segment: u64, source: io::Error },
    /// A replayed update does not apply to the tries replayed before it.
    Replay { segment: u64, source: ForestError },
    /// A segment that is not the last one holding records ends in a torn record. [`DiskWAL::open`] repairs
    /// the last segment, so this means the log was damaged outside of a crash during a write.
    TornSegment { segment: u64 },
}

impl WALError {
    pub(crate) fn io(context: String) -> impl Fn(io::Error) -> WALError {
        move |source| WALError::Io {
            context: context.clone(),
            source,
        }
    }
}

impl From<SegmentError> for WALError {
    fn from(value: SegmentError) -> Self {
        WALError::Segment(value)
    }
}

impl From<CheckpointError> for WALError {
    fn from(value: CheckpointError) -> Self {
        WALError::Checkpoint(value)
    }
}

impl Display for WALError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WALError::Io { context, source } => write!(f, "{}: {}", context, source),
            WALError::Segment(err) => Display::fmt(err, f),
            WALError::Checkpoint(err) => Display::fmt(err, f),
            WALError::Encode(err) => write!(f, "could not encode trie update: {}", err),
            WALError::Decode { segment, source } => write!(
                f,
                "could not decode trie update in segment {}: {}",
                segment, source
            ),
            WALError::Replay { segment, source } => write!(
                f,
                "could not replay trie update in segment {}: {}",
                segment, source
            ),
            WALError::TornSegment { segment } => write!(
                f,
                "segment {} ends in a torn record but later segments are not empty",
                segment
            ),
        }
    }
}

impl std::error::Error for WALError {}
