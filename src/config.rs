//! Synchronizer configuration
//!
//! Every field has a default so a partial document deserializes cleanly.
//! Call [`SyncConfig::validate`] before handing the config to a synchronizer;
//! [`crate::sync::InboundSynchronizer::new`] does this for you.

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};

/// Default number of objects requested per listing page
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Default number of pages processed per synchronize call
pub const DEFAULT_MAX_BATCHES: usize = 2;

/// Default suffix of staging files
pub const DEFAULT_TEMP_SUFFIX: &str = ".writing";

/// Configuration for an inbound synchronizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Objects per listing page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Pages processed per synchronize call
    #[serde(default = "default_max_batches")]
    pub max_batches_per_run: usize,
    /// Suffix appended to staging files (dot-prefixed automatically)
    #[serde(default = "default_temp_suffix")]
    pub temp_file_suffix: String,
    /// Create missing target directories when writing
    #[serde(default)]
    pub create_directories_if_missing: bool,
    /// Accept keys nested below the folder scope
    #[serde(default)]
    pub accept_subfolders: bool,
    /// Wildcard matched against the file name (`*`, `?`)
    #[serde(default)]
    pub file_name_wildcard: Option<String>,
    /// Regex matched against the whole file name
    #[serde(default)]
    pub file_name_regex: Option<String>,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_batches() -> usize {
    DEFAULT_MAX_BATCHES
}

fn default_temp_suffix() -> String {
    DEFAULT_TEMP_SUFFIX.to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_batches_per_run: DEFAULT_MAX_BATCHES,
            temp_file_suffix: default_temp_suffix(),
            create_directories_if_missing: false,
            accept_subfolders: false,
            file_name_wildcard: None,
            file_name_regex: None,
        }
    }
}

impl SyncConfig {
    /// Reject inconsistent settings before any I/O happens
    pub fn validate(&self) -> Result<()> {
        if has_text(&self.file_name_wildcard) && has_text(&self.file_name_regex) {
            return Err(MirrorError::Config(
                "Only one of the file name wildcard or file name regex can be specified"
                    .to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(MirrorError::Config(
                "page_size must be greater than zero".to_string(),
            ));
        }
        if self.max_batches_per_run == 0 {
            return Err(MirrorError::Config(
                "max_batches_per_run must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Staging suffix with the leading dot guaranteed.
    ///
    /// A blank suffix falls back to [`DEFAULT_TEMP_SUFFIX`].
    pub fn normalized_temp_suffix(&self) -> String {
        normalize_temp_suffix(&self.temp_file_suffix)
    }

    /// Whether the writer should create missing directories.
    ///
    /// Accepting subfolders implies directory creation.
    pub fn creates_directories(&self) -> bool {
        self.create_directories_if_missing || self.accept_subfolders
    }
}

/// Apply the dot-prefix rule to a staging suffix
pub fn normalize_temp_suffix(suffix: &str) -> String {
    let suffix = suffix.trim();
    if suffix.is_empty() {
        DEFAULT_TEMP_SUFFIX.to_string()
    } else if suffix.starts_with('.') {
        suffix.to_string()
    } else {
        format!(".{}", suffix)
    }
}

pub(crate) fn has_text(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}
