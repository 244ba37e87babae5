/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A file writer that only makes the file visible under its final name once it is complete and synced.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use rand::{distributions::Alphanumeric, Rng};

const WRITE_BUFFER_SIZE: usize = 32 * 1024;

/// Writes to a temporary file in the target's directory. [`finish`](SyncRenameFile::finish) flushes
/// and syncs the temporary file, then renames it to the target name. A `SyncRenameFile` dropped
/// without being finished removes its temporary file, so a failed write never leaves a file with the
/// target name behind.
pub struct SyncRenameFile {
    writer: Option<BufWriter<File>>,
    temp_path: PathBuf,
    target_path: PathBuf,
}

impl SyncRenameFile {
    /// Start writing the file `dir/file_name`. Fails if that file already exists.
    pub fn create(dir: &Path, file_name: &str) -> io::Result<Self> {
        let target_path = dir.join(file_name);
        if target_path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target_path.display()),
            ));
        }

        let temp_path = dir.join(temp_name(&format!("writing-{}", file_name)));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        Ok(Self {
            writer: Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)),
            temp_path,
            target_path,
        })
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Flush and sync the file, then move it to its target name.
    pub fn finish(mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|err| err.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&self.temp_path, &self.target_path)
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file already finished"))
    }
}

impl Write for SyncRenameFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl Drop for SyncRenameFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Get `prefix` followed by a dash and a random suffix.
pub(crate) fn temp_name(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("{}-{}", prefix, suffix)
}

/// Sync the directory entry list of `dir`, making renames into it durable.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    // Directories cannot be opened as files on every platform.
    match File::open(dir) {
        Ok(dir) => dir.sync_all().or(Ok(())),
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_appears_only_when_finished() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = SyncRenameFile::create(dir.path(), "17").unwrap();
        file.write_all(b"contents").unwrap();
        assert!(!dir.path().join("17").exists());

        file.finish().unwrap();
        assert_eq!(fs::read(dir.path().join("17")).unwrap(), b"contents");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        assert!(SyncRenameFile::create(dir.path(), "17").is_err());
    }

    #[test]
    fn unfinished_file_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = SyncRenameFile::create(dir.path(), "3").unwrap();
        file.write_all(b"partial").unwrap();
        drop(file);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
