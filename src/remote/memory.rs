//! In-memory remote store
//!
//! Mirrors the listing semantics of an S3 bucket (lexicographic key order,
//! marker-style continuation) without any network. Useful for embedding
//! tests and dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use md5::{Digest, Md5};
use parking_lot::RwLock;

use super::{
    folder_prefix, ContentStream, ObjectPage, RemoteObjectContent, RemoteObjectSummary,
    RemoteStore,
};
use crate::detect::CONTENT_MD5_HEADER;
use crate::error::{MirrorError, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    signature: String,
    metadata: HashMap<String, String>,
}

/// Thread-safe in-memory bucket collection
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    failing_keys: RwLock<HashSet<String>>,
    fail_listing: RwLock<Option<String>>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    released: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as a single-part upload (signature = hex MD5)
    pub fn put_object(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let signature = hex::encode(Md5::digest(&data));
        self.insert(bucket, key, data, signature, HashMap::new());
    }

    /// Store an object as a multipart upload.
    ///
    /// The signature takes the composite `<hex>-<parts>` form. With
    /// `with_digest` the Base64 content MD5 is attached as user metadata.
    pub fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Vec<u8>>,
        parts: usize,
        with_digest: bool,
    ) {
        let data = data.into();
        let digest = Md5::digest(&data);
        let composite = hex::encode(Md5::digest(digest));
        let signature = format!("{}-{}", composite, parts.max(1));
        let mut metadata = HashMap::new();
        if with_digest {
            metadata.insert(CONTENT_MD5_HEADER.to_string(), BASE64.encode(digest));
        }
        self.insert(bucket, key, data, signature, metadata);
    }

    /// Store an object with an explicit signature and metadata
    pub fn put_raw(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Vec<u8>>,
        signature: &str,
        metadata: HashMap<String, String>,
    ) {
        self.insert(bucket, key, data.into(), signature.to_string(), metadata);
    }

    fn insert(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        signature: String,
        metadata: HashMap<String, String>,
    ) {
        self.buckets.write().entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data,
                signature,
                metadata,
            },
        );
    }

    /// Remove an object; returns whether it existed
    pub fn delete_object(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .write()
            .get_mut(bucket)
            .map_or(false, |objects| objects.remove(key).is_some())
    }

    /// Make `get_object` fail for this key
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.write().insert(key.to_string());
    }

    /// Make `list_objects` fail with this message (`None` to recover)
    pub fn fail_listing(&self, message: Option<&str>) {
        *self.fail_listing.write() = message.map(String::from);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of contents handed back through [`RemoteStore::release`]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl RemoteStore for MemoryStore {
    fn list_objects(
        &self,
        bucket: &str,
        folder: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Option<ObjectPage>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_listing.read().as_ref() {
            return Err(MirrorError::Listing(message.clone()));
        }

        let buckets = self.buckets.read();
        let Some(objects) = buckets.get(bucket) else {
            return Ok(None);
        };

        let prefix = folder_prefix(folder);
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| cursor.map_or(true, |c| key.as_str() > c));

        let items: Vec<RemoteObjectSummary> = matching
            .by_ref()
            .take(page_size.max(1))
            .map(|(key, obj)| RemoteObjectSummary {
                key: key.clone(),
                signature: obj.signature.clone(),
                size: Some(obj.data.len() as u64),
            })
            .collect();

        let next_cursor = if matching.next().is_some() {
            items.last().map(|s| s.key.clone())
        } else {
            None
        };

        Ok(Some(ObjectPage { items, next_cursor }))
    }

    fn get_object(
        &self,
        bucket: &str,
        folder: Option<&str>,
        key: &str,
    ) -> Result<RemoteObjectContent> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let full_key = format!("{}{}", folder_prefix(folder), key);
        if self.failing_keys.read().contains(&full_key) {
            return Err(MirrorError::CloudStorage(format!(
                "injected failure for {}",
                full_key
            )));
        }

        let buckets = self.buckets.read();
        let obj = buckets
            .get(bucket)
            .and_then(|objects| objects.get(&full_key))
            .ok_or_else(|| {
                MirrorError::CloudStorage(format!("No such key: {}/{}", bucket, full_key))
            })?;

        Ok(RemoteObjectContent {
            key: full_key,
            body: ContentStream::from_bytes(obj.data.clone()),
            user_metadata: obj.metadata.clone(),
        })
    }

    fn release(&self, content: RemoteObjectContent) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        drop(content);
        Ok(())
    }
}
