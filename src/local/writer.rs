//! Crash-safe local file materialization
//!
//! Bytes are streamed into `<name><suffix>` next to the destination and only
//! moved onto the real name once the whole stream has been written, so a
//! partially downloaded object never shows up under its final name.
//!
//! Finalization:
//! - destination absent: rename staging -> destination
//! - destination present and removable: remove, then rename
//! - destination present but not removable: copy staging over it in place,
//!   then remove the staging file
//!
//! Every completed write emits one [`LocalFileEvent`] to the registered
//! listeners.

use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{normalize_temp_suffix, SyncConfig, DEFAULT_TEMP_SUFFIX};
use crate::error::{MirrorError, Result};
use crate::local::events::{FileEventListener, ListenerSet, LocalFileEvent};
use crate::local::paths::ensure_directory;
use crate::remote::ContentStream;

/// Size of each read from the source stream
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Filesystem primitives used to finalize a staged file
pub trait FsOps: Send + Sync {
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
}

/// [`FsOps`] backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl FsOps for StdFs {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)
    }
}

/// How the staged file reached (or failed to reach) its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// Destination did not exist; staging file renamed
    Renamed,
    /// Destination removed, then staging file renamed
    Replaced,
    /// Destination could not be removed; contents copied over it
    Copied,
    /// Rename failed; the staging file is left as the authoritative copy
    RenameFailed,
}

impl Finalization {
    pub fn succeeded(self) -> bool {
        !matches!(self, Finalization::RenameFailed)
    }
}

/// Result of one write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// The authoritative file (destination, or staging if finalization failed)
    pub file: PathBuf,
    pub bytes_written: u64,
    pub finalization: Finalization,
}

/// Writes streams to local files via a staging file
pub struct LocalFileWriter {
    temp_suffix: String,
    create_directories: bool,
    chunk_size: usize,
    listeners: ListenerSet,
    fs: Arc<dyn FsOps>,
}

impl Default for LocalFileWriter {
    fn default() -> Self {
        Self {
            temp_suffix: DEFAULT_TEMP_SUFFIX.to_string(),
            create_directories: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            listeners: ListenerSet::new(),
            fs: Arc::new(StdFs),
        }
    }
}

impl LocalFileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer configured from the staging and directory options
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new()
            .with_temp_suffix(&config.temp_file_suffix)
            .with_create_directories(config.creates_directories())
    }

    /// Staging suffix; blank keeps the current one, a missing dot is added
    pub fn with_temp_suffix(mut self, suffix: &str) -> Self {
        if !suffix.trim().is_empty() {
            self.temp_suffix = normalize_temp_suffix(suffix);
        }
        self
    }

    pub fn with_create_directories(mut self, create: bool) -> Self {
        self.create_directories = create;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_fs(mut self, fs: Arc<dyn FsOps>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_listener(mut self, listener: impl FileEventListener + 'static) -> Self {
        self.add_listener(Arc::new(listener));
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn FileEventListener>) {
        self.listeners.push(listener);
    }

    /// Replace all listeners. The list must not be empty.
    pub fn set_listeners(&mut self, listeners: Vec<Arc<dyn FileEventListener>>) -> Result<()> {
        if listeners.is_empty() {
            return Err(MirrorError::InvalidInput(
                "Listeners must be non empty".to_string(),
            ));
        }
        self.listeners.replace(listeners);
        Ok(())
    }

    pub fn set_create_directories(&mut self, create: bool) {
        self.create_directories = create;
    }

    pub fn temp_suffix(&self) -> &str {
        &self.temp_suffix
    }

    pub fn creates_directories(&self) -> bool {
        self.create_directories
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Staging path for a destination file name
    pub fn staging_path(&self, directory: &Path, file_name: &str) -> PathBuf {
        directory.join(format!("{}{}", file_name, self.temp_suffix))
    }

    /// Materialize `stream` as `directory/file_name`.
    ///
    /// Fails before any I/O if the preconditions do not hold. On staging or
    /// directory failures the destination is untouched; the staging file may
    /// remain behind and is truncated by the next write of the same name.
    pub fn write(
        &self,
        directory: &Path,
        file_name: &str,
        stream: &mut ContentStream,
    ) -> Result<WriteOutcome> {
        self.check_preconditions(directory, file_name)?;

        if !directory.exists() {
            ensure_directory(directory)?;
        }

        let staging = self.staging_path(directory, file_name);
        let destination = directory.join(file_name);

        let bytes_written = {
            let mut reader = stream.reader();
            self.stage(&staging, &mut reader).map_err(|e| {
                tracing::error!(staging = %staging.display(), "Failed writing staging file: {}", e);
                MirrorError::Io(e)
            })?
        };

        let finalization = self.finalize(&staging, &destination)?;
        let file = if finalization.succeeded() {
            destination
        } else {
            staging
        };

        if !self.listeners.is_empty() {
            self.listeners.notify(&LocalFileEvent::created(&file));
        }

        Ok(WriteOutcome {
            file,
            bytes_written,
            finalization,
        })
    }

    fn check_preconditions(&self, directory: &Path, file_name: &str) -> Result<()> {
        if file_name.trim().is_empty() {
            return Err(MirrorError::InvalidInput(
                "Provide a non empty file name".to_string(),
            ));
        }
        if file_name.contains('/') || file_name.contains('\\') {
            return Err(MirrorError::InvalidInput(format!(
                "File name '{}' must not contain path separators",
                file_name
            )));
        }
        if directory.exists() && !directory.is_dir() {
            return Err(MirrorError::InvalidInput(format!(
                "'{}' is not a directory",
                directory.display()
            )));
        }
        if !directory.exists() && !self.create_directories {
            return Err(MirrorError::InvalidInput(format!(
                "Directory '{}' does not exist and directory creation is disabled",
                directory.display()
            )));
        }
        Ok(())
    }

    /// Copy the stream into the staging file in fixed-size chunks
    fn stage(&self, staging: &Path, reader: &mut dyn Read) -> io::Result<u64> {
        let file = File::create(staging)?;
        let mut out = BufWriter::new(file);
        let mut chunk = vec![0u8; self.chunk_size];
        let mut total = 0u64;

        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            out.write_all(&chunk[..read])?;
            total += read as u64;
        }

        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(total)
    }

    fn finalize(&self, staging: &Path, destination: &Path) -> Result<Finalization> {
        if !destination.exists() {
            return Ok(self.rename(staging, destination, Finalization::Renamed));
        }

        match self.fs.remove_file(destination) {
            Ok(()) => {
                tracing::debug!(file = %destination.display(), "Deleted existing file");
                Ok(self.rename(staging, destination, Finalization::Replaced))
            }
            Err(e) => {
                tracing::warn!(
                    file = %destination.display(),
                    "Deletion not successful ({}), falling back to overwriting the contents",
                    e
                );
                self.fs.copy(staging, destination)?;
                if let Err(e) = self.fs.remove_file(staging) {
                    tracing::warn!(
                        staging = %staging.display(),
                        "Deletion of staging file unsuccessful: {}",
                        e
                    );
                }
                Ok(Finalization::Copied)
            }
        }
    }

    fn rename(&self, from: &Path, to: &Path, on_success: Finalization) -> Finalization {
        match self.fs.rename(from, to) {
            Ok(()) => {
                tracing::debug!(from = %from.display(), to = %to.display(), "Renamed staging file");
                on_success
            }
            Err(e) => {
                tracing::warn!(
                    from = %from.display(),
                    to = %to.display(),
                    "Renaming staging file unsuccessful: {}",
                    e
                );
                Finalization::RenameFailed
            }
        }
    }
}

impl std::fmt::Debug for LocalFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileWriter")
            .field("temp_suffix", &self.temp_suffix)
            .field("create_directories", &self.create_directories)
            .field("chunk_size", &self.chunk_size)
            .field("listeners", &self.listeners)
            .finish()
    }
}
