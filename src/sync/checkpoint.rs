//! Cursor checkpoints
//!
//! Lets a polling driver resume a multi-call sync sequence after a restart.
//! Checkpoints are small JSON documents written through the same staged
//! writer as mirrored objects.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::InboundSynchronizer;
use crate::error::{MirrorError, Result};
use crate::local::LocalFileWriter;
use crate::remote::{ContentStream, RemoteStore};

/// Persisted pagination state of one mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub bucket: String,
    #[serde(default)]
    pub remote_folder: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    /// Snapshot the synchronizer's current cursor
    pub fn capture<S: RemoteStore>(
        sync: &InboundSynchronizer<S>,
        bucket: &str,
        remote_folder: Option<&str>,
    ) -> Self {
        Self {
            bucket: bucket.to_string(),
            remote_folder: remote_folder.map(String::from),
            cursor: sync.cursor(),
            updated_at: Utc::now(),
        }
    }

    /// Whether this checkpoint belongs to the given mirror
    pub fn matches(&self, bucket: &str, remote_folder: Option<&str>) -> bool {
        self.bucket == bucket && self.remote_folder.as_deref() == remote_folder
    }

    /// Restore the cursor into `sync`
    pub fn apply<S: RemoteStore>(&self, sync: &InboundSynchronizer<S>) -> Result<()> {
        sync.restore_cursor(self.cursor.clone())
    }

    /// Load a checkpoint; a missing file yields `None`
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Save via staging file and rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                MirrorError::InvalidInput(format!("Invalid checkpoint path '{}'", path.display()))
            })?;

        let json = serde_json::to_vec_pretty(self)?;
        let outcome = LocalFileWriter::new()
            .with_create_directories(true)
            .write(directory, file_name, &mut ContentStream::from_bytes(json))?;

        if !outcome.finalization.succeeded() {
            return Err(MirrorError::Io(std::io::Error::new(
                ErrorKind::Other,
                format!("Unable to move checkpoint into place at '{}'", path.display()),
            )));
        }
        Ok(())
    }
}
