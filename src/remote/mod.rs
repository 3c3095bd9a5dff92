//! Remote object-store abstraction
//!
//! The synchronizer only needs paginated listing and single-object reads.
//! Backends implement [`RemoteStore`]; the S3 backend lives behind the
//! `cloud` feature and [`MemoryStore`] is always available.

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

mod memory;
#[cfg(feature = "cloud")]
pub mod s3;

pub use memory::MemoryStore;
#[cfg(feature = "cloud")]
pub use s3::S3RemoteStore;

/// One entry of a remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectSummary {
    /// Full object key, `/`-separated
    pub key: String,
    /// ETag-like equality tag
    pub signature: String,
    /// Object size in bytes, when the store reports it
    pub size: Option<u64>,
}

impl RemoteObjectSummary {
    pub fn new(key: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            signature: signature.into(),
            size: None,
        }
    }

    /// Keys ending in the separator are folder placeholders, not files
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// A page of listing results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Entries in listing order
    pub items: Vec<RemoteObjectSummary>,
    /// Continuation token; `None` once the listing is exhausted
    pub next_cursor: Option<String>,
}

/// Body of a fetched object.
///
/// Single-use and forward-only. The variant records whether the source is
/// already buffered so the writer does not stack a second buffer on top.
pub enum ContentStream {
    /// Fully in-memory bytes
    Memory(Cursor<Vec<u8>>),
    /// A reader that already buffers
    Buffered(Box<dyn BufRead + Send>),
    /// An unbuffered reader, e.g. a raw network body
    Raw(Box<dyn Read + Send>),
}

impl ContentStream {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ContentStream::Memory(Cursor::new(bytes.into()))
    }

    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        ContentStream::Raw(Box::new(reader))
    }

    pub fn from_buf_reader(reader: impl BufRead + Send + 'static) -> Self {
        ContentStream::Buffered(Box::new(reader))
    }

    /// Whether reads are served without an extra buffering layer
    pub fn is_buffered(&self) -> bool {
        !matches!(self, ContentStream::Raw(_))
    }

    /// Reader over the remaining bytes, buffered if the source is not
    pub fn reader(&mut self) -> Box<dyn Read + Send + '_> {
        match self {
            ContentStream::Memory(cursor) => Box::new(cursor),
            ContentStream::Buffered(reader) => Box::new(reader),
            ContentStream::Raw(reader) => Box::new(BufReader::new(reader)),
        }
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentStream::Memory(cursor) => f
                .debug_tuple("Memory")
                .field(&cursor.get_ref().len())
                .finish(),
            ContentStream::Buffered(_) => f.write_str("Buffered(..)"),
            ContentStream::Raw(_) => f.write_str("Raw(..)"),
        }
    }
}

/// A fetched object: key, body and user metadata
#[derive(Debug)]
pub struct RemoteObjectContent {
    pub key: String,
    pub body: ContentStream,
    /// User metadata as returned by the store; lookups are exact-key
    pub user_metadata: HashMap<String, String>,
}

impl RemoteObjectContent {
    pub fn new(key: impl Into<String>, body: ContentStream) -> Self {
        Self {
            key: key.into(),
            body,
            user_metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_metadata.insert(name.into(), value.into());
        self
    }
}

/// Remote store operations consumed by the synchronizer
pub trait RemoteStore: Send + Sync {
    /// Fetch one listing page under `folder` (bucket root when `None`),
    /// resuming after `cursor`. `Ok(None)` means there is nothing to list.
    fn list_objects(
        &self,
        bucket: &str,
        folder: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Option<ObjectPage>>;

    /// Fetch one object. `key` is relative to `folder` (bucket root when `None`).
    fn get_object(
        &self,
        bucket: &str,
        folder: Option<&str>,
        key: &str,
    ) -> Result<RemoteObjectContent>;

    /// Release the content's underlying resources.
    ///
    /// Called exactly once per fetched object, on every path.
    fn release(&self, content: RemoteObjectContent) -> Result<()> {
        drop(content);
        Ok(())
    }
}

impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn list_objects(
        &self,
        bucket: &str,
        folder: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Option<ObjectPage>> {
        (**self).list_objects(bucket, folder, cursor, page_size)
    }

    fn get_object(
        &self,
        bucket: &str,
        folder: Option<&str>,
        key: &str,
    ) -> Result<RemoteObjectContent> {
        (**self).get_object(bucket, folder, key)
    }

    fn release(&self, content: RemoteObjectContent) -> Result<()> {
        (**self).release(content)
    }
}

/// Listing prefix for a folder scope: `folder/`, or everything at the root
pub(crate) fn folder_prefix(folder: Option<&str>) -> String {
    match folder.map(|f| f.trim_matches('/')) {
        Some(f) if !f.is_empty() => format!("{}/", f),
        _ => String::new(),
    }
}
