//! S3-compatible remote store (S3, R2, MinIO)
//!
//! The SDK is async; this adapter drives it with `Handle::block_on`, so its
//! methods must be called from a blocking context such as
//! `tokio::task::spawn_blocking`, never from inside an async task. Object
//! bodies are streamed chunk by chunk the same way, so reading them carries
//! the same restriction.

use std::io::{self, Read};

use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tokio::runtime::Handle;

use super::{
    folder_prefix, ContentStream, ObjectPage, RemoteObjectContent, RemoteObjectSummary,
    RemoteStore,
};
use crate::error::{MirrorError, Result};

/// [`RemoteStore`] over the AWS S3 SDK
pub struct S3RemoteStore {
    client: S3Client,
    handle: Handle,
}

impl S3RemoteStore {
    pub fn new(client: S3Client, handle: Handle) -> Self {
        Self { client, handle }
    }

    /// Build from the ambient AWS configuration (env, profile, IMDS).
    ///
    /// A custom endpoint switches to path-style addressing, which R2 and
    /// MinIO expect.
    pub async fn from_env(endpoint_url: Option<&str>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| MirrorError::Config(format!("No tokio runtime available: {}", e)))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if endpoint_url.is_some() {
            builder = builder.force_path_style(true);
        }

        Ok(Self::new(S3Client::from_conf(builder.build()), handle))
    }
}

impl RemoteStore for S3RemoteStore {
    fn list_objects(
        &self,
        bucket: &str,
        folder: Option<&str>,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Option<ObjectPage>> {
        let max_keys = i32::try_from(page_size).unwrap_or(i32::MAX);
        let prefix = folder_prefix(folder);

        let mut request = self.client.list_objects_v2().bucket(bucket).max_keys(max_keys);
        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }
        if let Some(token) = cursor {
            request = request.continuation_token(token);
        }

        let output = self
            .handle
            .block_on(request.send())
            .map_err(|e| MirrorError::Listing(DisplayErrorContext(&e).to_string()))?;

        let items: Vec<RemoteObjectSummary> = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(RemoteObjectSummary {
                    key: object.key()?.to_string(),
                    signature: object.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                    size: object.size().map(|size| size.max(0) as u64),
                })
            })
            .collect();

        let next_cursor = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(String::from)
        } else {
            None
        };

        tracing::debug!(
            bucket,
            count = items.len(),
            truncated = next_cursor.is_some(),
            "Listed objects"
        );
        Ok(Some(ObjectPage { items, next_cursor }))
    }

    fn get_object(
        &self,
        bucket: &str,
        folder: Option<&str>,
        key: &str,
    ) -> Result<RemoteObjectContent> {
        let full_key = format!("{}{}", folder_prefix(folder), key);

        let output = self
            .handle
            .block_on(self.client.get_object().bucket(bucket).key(&full_key).send())
            .map_err(|e| MirrorError::CloudStorage(DisplayErrorContext(&e).to_string()))?;

        let user_metadata = output.metadata().cloned().unwrap_or_default();
        tracing::debug!(
            bucket,
            key = %full_key,
            bytes = ?output.content_length(),
            "Opened object stream"
        );

        Ok(RemoteObjectContent {
            key: full_key,
            body: ContentStream::from_reader(BodyReader::new(output.body, self.handle.clone())),
            user_metadata,
        })
    }
}

/// Blocking reader over an object body, pulling one network chunk at a time.
///
/// Dropping it drops the body and with it the connection.
struct BodyReader {
    body: ByteStream,
    handle: Handle,
    chunk: Vec<u8>,
    offset: usize,
}

impl BodyReader {
    fn new(body: ByteStream, handle: Handle) -> Self {
        Self {
            body,
            handle,
            chunk: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.chunk.len() {
            match self.handle.block_on(self.body.try_next()) {
                Ok(Some(bytes)) => {
                    self.chunk.clear();
                    self.chunk.extend_from_slice(&bytes);
                    self.offset = 0;
                }
                Ok(None) => return Ok(0),
                Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.offset);
        buf[..n].copy_from_slice(&self.chunk[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}
