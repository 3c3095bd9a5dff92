//! Mapping remote keys onto the local directory tree

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, Result};

/// Local placement of a remote key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Intermediate folder names, outermost first
    pub folders: Vec<String>,
    /// Directory that receives the file
    pub directory: PathBuf,
    /// Leaf file name
    pub file_name: String,
}

impl ResolvedPath {
    /// Final destination path
    pub fn file_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

/// Split a key into its folder segments and leaf name.
///
/// Empty segments are dropped. `.` and `..` are rejected so a key can never
/// point outside the local root.
pub fn split_key(key: &str) -> Result<(Vec<&str>, &str)> {
    let mut segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(bad) = segments.iter().find(|s| **s == "." || **s == "..") {
        return Err(MirrorError::InvalidInput(format!(
            "Key '{}' contains a relative path segment '{}'",
            key, bad
        )));
    }
    if key.ends_with('/') {
        return Err(MirrorError::InvalidInput(format!(
            "Key '{}' is a directory marker",
            key
        )));
    }
    let file_name = segments
        .pop()
        .ok_or_else(|| MirrorError::InvalidInput(format!("Key '{}' has no file name", key)))?;
    Ok((segments, file_name))
}

/// Resolve where `key` lives under `root` without touching the filesystem
pub fn resolve(root: &Path, key: &str) -> Result<ResolvedPath> {
    let (folders, file_name) = split_key(key)?;
    let directory = folders
        .iter()
        .fold(root.to_path_buf(), |dir, folder| dir.join(folder));
    Ok(ResolvedPath {
        folders: folders.into_iter().map(String::from).collect(),
        directory,
        file_name: file_name.to_string(),
    })
}

/// Resolve `key` and create its directory chain if absent
pub fn resolve_and_create(root: &Path, key: &str) -> Result<ResolvedPath> {
    let resolved = resolve(root, key)?;
    if !resolved.folders.is_empty() {
        ensure_directory(&resolved.directory)?;
    }
    Ok(resolved)
}

/// Create `dir` recursively. Returns true if it did not exist before.
pub fn ensure_directory(dir: &Path) -> Result<bool> {
    if dir.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(dir).map_err(|e| {
        MirrorError::Io(std::io::Error::new(
            e.kind(),
            format!("Unable to create the directory '{}': {}", dir.display(), e),
        ))
    })?;
    tracing::info!(directory = %dir.display(), "Created new folder");
    Ok(true)
}
