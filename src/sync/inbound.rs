//! Inbound bucket-to-directory synchronizer

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::detect::{self, ChangeDecision, Signature};
use crate::error::{MirrorError, Result};
use crate::filter::NameFilter;
use crate::local::paths;
use crate::local::{FileEventListener, LocalFileWriter};
use crate::remote::{RemoteObjectContent, RemoteObjectSummary, RemoteStore};

/// Counters for one synchronize call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub bucket: String,
    pub remote_folder: Option<String>,
    /// Cursor the run started from
    pub resumed_from: Option<String>,
    pub pages: usize,
    pub listed: usize,
    pub directory_markers: usize,
    pub filtered: usize,
    pub unchanged: usize,
    pub not_regular_files: usize,
    pub downloaded: usize,
    pub failed: usize,
    /// Files written during the run, in listing order
    pub written: Vec<PathBuf>,
    /// True when the listing reported no further pages
    pub exhausted: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    fn start(bucket: &str, remote_folder: Option<&str>, resumed_from: Option<String>) -> Self {
        Self {
            bucket: bucket.to_string(),
            remote_folder: remote_folder.map(String::from),
            resumed_from,
            pages: 0,
            listed: 0,
            directory_markers: 0,
            filtered: 0,
            unchanged: 0,
            not_regular_files: 0,
            downloaded: 0,
            failed: 0,
            written: Vec::new(),
            exhausted: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Result of a synchronize call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another call held the run guard; nothing was done
    AlreadyRunning,
    Completed(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::AlreadyRunning => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, SyncOutcome::AlreadyRunning)
    }
}

/// Mirrors a bucket prefix into a local directory, a bounded number of
/// listing pages per call.
///
/// One instance serves one logical mirror. Calls may come from any thread;
/// overlapping calls return [`SyncOutcome::AlreadyRunning`] immediately.
pub struct InboundSynchronizer<S> {
    store: S,
    writer: LocalFileWriter,
    config: SyncConfig,
    /// Run guard; the filter's folder scope is only touched while held
    guard: Mutex<NameFilter>,
    /// Written only while the guard is held
    cursor: RwLock<Option<String>>,
}

impl<S: RemoteStore> InboundSynchronizer<S> {
    /// Validate `config` and build the filter and writer it selects
    pub fn new(store: S, config: SyncConfig) -> Result<Self> {
        let filter = NameFilter::from_config(&config)?;
        let writer = LocalFileWriter::from_config(&config);
        Ok(Self {
            store,
            writer,
            config,
            guard: Mutex::new(filter),
            cursor: RwLock::new(None),
        })
    }

    /// Replace the writer. Subfolder acceptance still forces directory creation.
    pub fn with_writer(mut self, mut writer: LocalFileWriter) -> Self {
        if self.config.accept_subfolders {
            writer.set_create_directories(true);
        }
        self.writer = writer;
        self
    }

    pub fn with_listener(mut self, listener: impl FileEventListener + 'static) -> Self {
        self.writer.add_listener(Arc::new(listener));
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn writer(&self) -> &LocalFileWriter {
        &self.writer
    }

    /// Current pagination cursor; `None` means the next call starts fresh
    pub fn cursor(&self) -> Option<String> {
        self.cursor.read().clone()
    }

    /// Resume from a previously saved cursor. Refused while a run is active.
    pub fn restore_cursor(&self, cursor: Option<String>) -> Result<()> {
        let _guard = self.guard.try_lock().ok_or_else(|| {
            MirrorError::InvalidInput("Cannot restore cursor while a sync is running".to_string())
        })?;
        *self.cursor.write() = cursor;
        Ok(())
    }

    /// Synchronize up to `max_batches_per_run` pages of `bucket/remote_folder`
    /// into `local_root`.
    ///
    /// Only listing failures are returned as errors. Per-object failures are
    /// logged and counted in the report.
    pub fn synchronize(
        &self,
        local_root: &Path,
        bucket: &str,
        remote_folder: Option<&str>,
    ) -> Result<SyncOutcome> {
        let Some(mut filter) = self.guard.try_lock() else {
            tracing::info!(bucket, "Sync already in progress");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let remote_folder = remote_folder.filter(|folder| *folder != "/");
        filter.set_folder_scope(remote_folder);

        let resumed_from = self.cursor();
        match &resumed_from {
            None => tracing::info!(bucket, folder = ?remote_folder, "Starting a fresh sync"),
            Some(marker) => tracing::info!(
                bucket,
                folder = ?remote_folder,
                marker = %marker,
                "Continuing a sync"
            ),
        }

        let mut report = SyncReport::start(bucket, remote_folder, resumed_from);
        let mut batches = 0;

        loop {
            let cursor = self.cursor();
            let page = self
                .store
                .list_objects(bucket, remote_folder, cursor.as_deref(), self.config.page_size)
                .map_err(|e| {
                    tracing::error!(bucket, "Listing failed: {}", e);
                    match e {
                        MirrorError::Listing(_) => e,
                        other => MirrorError::Listing(other.to_string()),
                    }
                })?;

            let Some(page) = page else {
                // Nothing past the cursor: the next call starts over
                *self.cursor.write() = None;
                report.exhausted = true;
                break;
            };

            report.pages += 1;
            *self.cursor.write() = page.next_cursor.clone();

            for summary in &page.items {
                self.process(local_root, bucket, &filter, summary, &mut report);
            }

            batches += 1;
            if page.items.is_empty() || page.next_cursor.is_none() {
                report.exhausted = page.next_cursor.is_none();
                break;
            }
            if batches >= self.config.max_batches_per_run {
                break;
            }
        }

        report.completed_at = Some(Utc::now());
        tracing::info!(
            bucket,
            pages = report.pages,
            downloaded = report.downloaded,
            unchanged = report.unchanged,
            failed = report.failed,
            "Sync completed"
        );
        Ok(SyncOutcome::Completed(report))
    }

    fn process(
        &self,
        local_root: &Path,
        bucket: &str,
        filter: &NameFilter,
        summary: &RemoteObjectSummary,
        report: &mut SyncReport,
    ) {
        report.listed += 1;
        let key = summary.key.as_str();

        if summary.is_directory_marker() {
            report.directory_markers += 1;
            return;
        }
        if !filter.accept(key) {
            report.filtered += 1;
            return;
        }

        let resolved = match paths::resolve_and_create(local_root, key) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(key, "Unable to place object locally: {}", e);
                report.failed += 1;
                return;
            }
        };
        let local = resolved.file_path();

        // Composite signatures can only be verified against the object's metadata
        let mut content = None;
        if !Signature::parse(&summary.signature).is_md5() && local.is_file() {
            match self.fetch(bucket, key) {
                Some(fetched) => content = Some(fetched),
                None => {
                    report.failed += 1;
                    return;
                }
            }
        }

        let empty = HashMap::new();
        let metadata = content.as_ref().map_or(&empty, |c| &c.user_metadata);
        let decision = detect::assess(&summary.signature, metadata, &local);

        if !decision.needs_download() {
            match decision {
                ChangeDecision::NotRegularFile => report.not_regular_files += 1,
                _ => report.unchanged += 1,
            }
            tracing::debug!(key, ?decision, "Skipping object");
            if let Some(content) = content {
                self.release(content);
            }
            return;
        }

        let mut content = match content {
            Some(content) => content,
            None => match self.fetch(bucket, key) {
                Some(fetched) => fetched,
                None => {
                    report.failed += 1;
                    return;
                }
            },
        };

        tracing::debug!(key, ?decision, "Downloading object");
        match self
            .writer
            .write(&resolved.directory, &resolved.file_name, &mut content.body)
        {
            Ok(outcome) => {
                report.downloaded += 1;
                report.written.push(outcome.file);
            }
            Err(e) => {
                tracing::error!(
                    key,
                    file = %local.display(),
                    "Caught exception while writing to file: {}",
                    e
                );
                report.failed += 1;
            }
        }

        self.release(content);
    }

    /// Fetch by full key; failures are logged and yield `None`
    fn fetch(&self, bucket: &str, key: &str) -> Option<RemoteObjectContent> {
        match self.store.get_object(bucket, None, key) {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::error!(bucket, key, "Unable to fetch object: {}", e);
                None
            }
        }
    }

    fn release(&self, content: RemoteObjectContent) {
        let key = content.key.clone();
        if let Err(e) = self.store.release(content) {
            tracing::warn!(key = %key, "Unable to close connection: {}", e);
        }
    }
}

impl<S> std::fmt::Debug for InboundSynchronizer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundSynchronizer")
            .field("config", &self.config)
            .field("writer", &self.writer)
            .field("cursor", &*self.cursor.read())
            .finish()
    }
}
