//! Change detection between a remote object and its local copy
//!
//! A single-part upload carries its MD5 as a 32-character hex signature and
//! can be compared directly against the local file. Multipart uploads carry
//! a composite signature (`<hex>-<parts>`) that is not a content digest; for
//! those the `Content-MD5` user metadata is used when present, otherwise the
//! object is downloaded unconditionally.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use md5::{Digest, Md5};

use crate::error::{MirrorError, Result};

/// User metadata key carrying the Base64 content MD5
pub const CONTENT_MD5_HEADER: &str = "Content-MD5";

/// Length of a hex-encoded MD5 digest
pub const MD5_HEX_LENGTH: usize = 32;

const HASH_BUFFER_SIZE: usize = 8192;

/// Classified remote signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    /// Hex MD5 of the content, normalized to lowercase
    Md5Hex(String),
    /// Anything else, typically a multipart ETag
    Composite(String),
}

impl Signature {
    /// Classify an ETag-like signature. Surrounding quotes are ignored.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim_matches('"');
        if trimmed.len() == MD5_HEX_LENGTH && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            Signature::Md5Hex(trimmed.to_ascii_lowercase())
        } else {
            Signature::Composite(trimmed.to_string())
        }
    }

    pub fn is_md5(&self) -> bool {
        matches!(self, Signature::Md5Hex(_))
    }
}

/// Outcome of comparing a remote object against the local file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    /// No local file
    Missing,
    /// Local path exists but is not a regular file; never overwritten
    NotRegularFile,
    /// Digests agree
    Unchanged,
    /// Digests differ
    Modified,
    /// Composite signature without a usable content digest
    Unverifiable,
    /// Local file could not be hashed
    LocalUnreadable,
}

impl ChangeDecision {
    pub fn needs_download(self) -> bool {
        match self {
            ChangeDecision::Missing
            | ChangeDecision::Modified
            | ChangeDecision::Unverifiable
            | ChangeDecision::LocalUnreadable => true,
            ChangeDecision::NotRegularFile | ChangeDecision::Unchanged => false,
        }
    }
}

/// Hex MD5 of a local file, read in fixed-size chunks
pub fn local_md5_hex(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; HASH_BUFFER_SIZE];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Look up the content digest in user metadata.
///
/// Exact key first, then the lowercase form S3 returns user metadata in.
pub fn content_md5_metadata(metadata: &HashMap<String, String>) -> Option<&str> {
    metadata
        .get(CONTENT_MD5_HEADER)
        .or_else(|| metadata.get(&CONTENT_MD5_HEADER.to_ascii_lowercase()))
        .map(String::as_str)
}

/// Convert a Base64 `Content-MD5` value to lowercase hex
pub fn base64_md5_to_hex(value: &str) -> Result<String> {
    let bytes = BASE64.decode(value.trim()).map_err(|e| {
        MirrorError::Encoding(format!("Invalid Base64 Content-MD5 '{}': {}", value, e))
    })?;
    Ok(hex::encode(bytes))
}

/// Decide whether `local` must be (re)downloaded
pub fn assess(signature: &str, metadata: &HashMap<String, String>, local: &Path) -> ChangeDecision {
    let meta = match std::fs::metadata(local) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return ChangeDecision::Missing,
        Err(e) => {
            tracing::warn!(file = %local.display(), "Unable to stat local file: {}", e);
            return ChangeDecision::LocalUnreadable;
        }
    };

    if !meta.is_file() {
        tracing::warn!(
            file = %local.display(),
            "The file is not a regular file, probably a directory"
        );
        return ChangeDecision::NotRegularFile;
    }

    let remote_hex = match Signature::parse(signature) {
        Signature::Md5Hex(hex) => hex,
        Signature::Composite(_) => match content_md5_metadata(metadata) {
            Some(b64) => match base64_md5_to_hex(b64) {
                Ok(hex) => hex,
                Err(e) => {
                    tracing::warn!(file = %local.display(), "{}", e);
                    return ChangeDecision::Unverifiable;
                }
            },
            None => return ChangeDecision::Unverifiable,
        },
    };

    match local_md5_hex(local) {
        Ok(local_hex) if local_hex == remote_hex => ChangeDecision::Unchanged,
        Ok(_) => ChangeDecision::Modified,
        Err(e) => {
            tracing::error!(
                file = %local.display(),
                "Exception encountered while generating the MD5 hash: {}",
                e
            );
            ChangeDecision::LocalUnreadable
        }
    }
}

/// Boolean form of [`assess`]
pub fn needs_download(signature: &str, metadata: &HashMap<String, String>, local: &Path) -> bool {
    assess(signature, metadata, local).needs_download()
}
