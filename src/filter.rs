//! File name filtering for remote keys
//!
//! A filter is picked once from [`SyncConfig`]: wildcard, regex or accept-all.
//! Only the folder scope changes afterwards, once per synchronize call.

use regex::Regex;

use crate::config::{has_text, SyncConfig};
use crate::error::{MirrorError, Result};

/// How the leaf file name is matched
#[derive(Debug, Clone)]
pub enum NamePattern {
    /// Accept every file name
    All,
    /// `*` / `?` wildcard, compiled to an anchored regex
    Wildcard { source: String, regex: Regex },
    /// User-supplied regex, matched against the whole name
    Regex(Regex),
}

impl NamePattern {
    pub fn wildcard(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&wildcard_to_regex(pattern))
            .map_err(|e| MirrorError::Config(format!("Invalid wildcard '{}': {}", pattern, e)))?;
        Ok(NamePattern::Wildcard {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| MirrorError::Config(format!("Invalid regex '{}': {}", pattern, e)))?;
        Ok(NamePattern::Regex(regex))
    }

    fn matches(&self, file_name: &str) -> bool {
        match self {
            NamePattern::All => true,
            NamePattern::Wildcard { regex, .. } | NamePattern::Regex(regex) => {
                regex.is_match(file_name)
            }
        }
    }
}

/// Translate a file wildcard into an anchored regex
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

/// Name filter with a call-scoped folder
#[derive(Debug, Clone)]
pub struct NameFilter {
    pattern: NamePattern,
    folder: Option<String>,
    accept_subfolders: bool,
}

impl NameFilter {
    pub fn new(pattern: NamePattern) -> Self {
        Self {
            pattern,
            folder: None,
            accept_subfolders: false,
        }
    }

    /// Accept-all filter
    pub fn accept_all() -> Self {
        Self::new(NamePattern::All)
    }

    /// Build the filter variant selected by the configuration
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let pattern = if has_text(&config.file_name_wildcard) {
            NamePattern::wildcard(config.file_name_wildcard.as_deref().unwrap_or_default())?
        } else if has_text(&config.file_name_regex) {
            NamePattern::regex(config.file_name_regex.as_deref().unwrap_or_default())?
        } else {
            NamePattern::All
        };
        let mut filter = Self::new(pattern);
        filter.set_accept_subfolders(config.accept_subfolders);
        Ok(filter)
    }

    pub fn pattern(&self) -> &NamePattern {
        &self.pattern
    }

    pub fn folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    pub fn accepts_subfolders(&self) -> bool {
        self.accept_subfolders
    }

    /// Scope the filter to a remote folder; `None` or `/` means the bucket root
    pub fn set_folder_scope(&mut self, folder: Option<&str>) {
        self.folder = folder
            .map(|f| f.trim_matches('/'))
            .filter(|f| !f.is_empty())
            .map(String::from);
    }

    pub fn set_accept_subfolders(&mut self, accept: bool) {
        self.accept_subfolders = accept;
    }

    /// Decide whether a full remote key should be synchronized
    pub fn accept(&self, key: &str) -> bool {
        let relative = match &self.folder {
            Some(folder) => match key
                .strip_prefix(folder.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) => rest,
                None => return false,
            },
            None => key,
        };

        if relative.is_empty() || relative.ends_with('/') {
            return false;
        }

        let file_name = match relative.rsplit_once('/') {
            Some(_) if !self.accept_subfolders => return false,
            Some((_, leaf)) => leaf,
            None => relative,
        };

        self.pattern.matches(file_name)
    }
}

impl Default for NameFilter {
    fn default() -> Self {
        Self::accept_all()
    }
}
