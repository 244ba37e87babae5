/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! WAL segment files and the framing of the records inside them.
//!
//! A segment is a file in the WAL directory named by its number as 8 zero-padded decimal digits
//! (e.g., `00000042`). A segment holds a sequence of records, each framed as:
//!
//! ```text
//! | length: u32 BE | checksum: first 4 bytes of SHA256(payload) | payload: `length` bytes |
//! ```

use std::{
    fmt::{self, Display, Formatter},
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

const LENGTH_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 4;
const HEADER_SIZE: usize = LENGTH_SIZE + CHECKSUM_SIZE;
const SEGMENT_NAME_DIGITS: usize = 8;

/// Get the file name of segment `number`.
pub fn segment_file_name(number: u64) -> String {
    format!("{:0width$}", number, width = SEGMENT_NAME_DIGITS)
}

/// Parse the number of a segment from its file name.
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    if name.len() != SEGMENT_NAME_DIGITS || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// List the numbers of the segments in `dir`, in ascending order.
pub fn list_segments(dir: &Path) -> io::Result<Vec<u64>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(number) = entry.file_name().to_str().and_then(parse_segment_file_name) {
            segments.push(number);
        }
    }
    segments.sort_unstable();
    Ok(segments)
}

/// Frame `payload` as a segment record.
pub fn encode_record(payload: &[u8]) -> Result<Vec<u8>, SegmentError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| SegmentError::RecordTooLarge { len: payload.len() })?;
    let mut record = Vec::with_capacity(HEADER_SIZE + payload.len());
    record.extend_from_slice(&len.to_be_bytes());
    record.extend_from_slice(&checksum(payload));
    record.extend_from_slice(payload);
    Ok(record)
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = Sha256::digest(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Appends records to a single segment file, syncing every record to disk before returning.
pub struct SegmentWriter {
    number: u64,
    path: PathBuf,
    file: File,
    size: u64,
}

impl SegmentWriter {
    /// Create segment `number` in `dir`. Fails if the segment already exists.
    pub fn create(dir: &Path, number: u64) -> io::Result<Self> {
        let path = dir.join(segment_file_name(number));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self {
            number,
            path,
            file,
            size: 0,
        })
    }

    /// Append an already framed `record` and sync it to disk.
    pub fn append(&mut self, record: &[u8]) -> io::Result<()> {
        self.file.write_all(record)?;
        self.file.sync_data()?;
        self.size += record.len() as u64;
        Ok(())
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes written to this segment so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Sync the segment's metadata. Called when the writer moves on to the next segment.
    pub fn finalize(self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// Records read from a segment.
#[derive(Debug, Default)]
pub struct SegmentRecords {
    pub records: Vec<Vec<u8>>,

    /// Whether the segment ends in an incomplete record, as left by a crash in the middle of a write.
    pub torn_tail: bool,

    /// Length of the segment up to the end of its last complete record.
    pub valid_len: u64,
}

/// Read every record in the segment at `path`.
///
/// A final record that is cut short, or whose checksum does not match and which ends exactly at the
/// end of the file, is reported as a torn tail rather than an error. Any other corruption is an error.
pub fn read_segment(path: &Path) -> Result<SegmentRecords, SegmentError> {
    let bytes = fs::read(path).map_err(|source| SegmentError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut result = SegmentRecords::default();
    let mut offset = 0;
    while offset < bytes.len() {
        if bytes.len() - offset < HEADER_SIZE {
            result.torn_tail = true;
            break;
        }
        let mut len_bytes = [0u8; LENGTH_SIZE];
        len_bytes.copy_from_slice(&bytes[offset..offset + LENGTH_SIZE]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        let payload_start = offset + HEADER_SIZE;
        let payload_end = match payload_start.checked_add(len) {
            Some(end) if end <= bytes.len() => end,
            _ => {
                result.torn_tail = true;
                break;
            }
        };

        let payload = &bytes[payload_start..payload_end];
        if bytes[offset + LENGTH_SIZE..payload_start] != checksum(payload) {
            if payload_end == bytes.len() {
                result.torn_tail = true;
                break;
            }
            return Err(SegmentError::ChecksumMismatch {
                path: path.to_path_buf(),
                offset: offset as u64,
            });
        }
        result.records.push(payload.to_vec());
        offset = payload_end;
    }

    result.valid_len = offset as u64;
    Ok(result)
}

/// Cut a torn tail off the segment at `path`, so that later segments can be written after it. Returns
/// whether the segment was torn.
pub fn repair_segment(path: &Path) -> Result<bool, SegmentError> {
    let segment = read_segment(path)?;
    if !segment.torn_tail {
        return Ok(false);
    }
    let io_error = |source| SegmentError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = OpenOptions::new().write(true).open(path).map_err(io_error)?;
    file.set_len(segment.valid_len).map_err(io_error)?;
    file.sync_all().map_err(io_error)?;
    Ok(true)
}

#[derive(Debug)]
pub enum SegmentError {
    Io { path: PathBuf, source: io::Error },
    ChecksumMismatch { path: PathBuf, offset: u64 },
    RecordTooLarge { len: usize },
}

impl Display for SegmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::Io { path, source } => {
                write!(f, "could not access segment {}: {}", path.display(), source)
            }
            SegmentError::ChecksumMismatch { path, offset } => write!(
                f,
                "record at offset {} of segment {} is corrupted",
                offset,
                path.display()
            ),
            SegmentError::RecordTooLarge { len } => {
                write!(f, "record of {} bytes does not fit in a segment record", len)
            }
        }
    }
}

impl std::error::Error for SegmentError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_names_round_trip() {
        assert_eq!(segment_file_name(42), "00000042");
        assert_eq!(parse_segment_file_name("00000042"), Some(42));
        assert_eq!(parse_segment_file_name("checkpoint.00000042"), None);
        assert_eq!(parse_segment_file_name("0000042"), None);
    }

    #[test]
    fn torn_tail_is_tolerated_but_corruption_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::create(dir.path(), 0).unwrap();
        writer.append(&encode_record(b"first").unwrap()).unwrap();
        writer.append(&encode_record(b"second").unwrap()).unwrap();
        let path = writer.path().to_path_buf();
        writer.finalize().unwrap();

        let read = read_segment(&path).unwrap();
        assert_eq!(read.records, vec![b"first".to_vec(), b"second".to_vec()]);
        assert!(!read.torn_tail);

        // Cut the last record short.
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        let read = read_segment(&path).unwrap();
        assert_eq!(read.records, vec![b"first".to_vec()]);
        assert!(read.torn_tail);

        // Corrupt the first record's payload.
        let mut corrupted = bytes.clone();
        corrupted[HEADER_SIZE] ^= 0xff;
        fs::write(&path, &corrupted).unwrap();
        assert!(matches!(
            read_segment(&path),
            Err(SegmentError::ChecksumMismatch { offset: 0, .. })
        ));
    }

    #[test]
    fn repair_cuts_the_torn_tail_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::create(dir.path(), 0).unwrap();
        writer.append(&encode_record(b"first").unwrap()).unwrap();
        let intact_len = writer.size();
        writer.append(&encode_record(b"second").unwrap()).unwrap();
        let path = writer.path().to_path_buf();
        writer.finalize().unwrap();

        assert!(!repair_segment(&path).unwrap());

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(repair_segment(&path).unwrap());
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        let read = read_segment(&path).unwrap();
        assert_eq!(read.records, vec![b"first".to_vec()]);
        assert!(!read.torn_tail);
        assert_eq!(read.valid_len, intact_len);
    }
}
