// src/core/cache.rs

//! On-disk store for compiled option sets.

use anyhow::{Context, Result};
use log::debug;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use crate::models::Platform;

/// Identifies one cache artifact: one per `(platform, company, environment)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Target platform.
    pub platform: Platform,
    /// Company code.
    pub company: String,
    /// Profile name.
    pub environment: String,
}

impl CacheKey {
    /// Deterministic, filesystem-safe file name for this key.
    pub fn file_name(&self) -> String {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' {
                        c.to_ascii_lowercase()
                    } else {
                        '_'
                    }
                })
                .collect()
        };
        format!(
            "options_{}_{}_{}.cache",
            sanitize(self.platform.as_str()),
            sanitize(&self.company),
            sanitize(&self.environment)
        )
    }
}

/// A serialized option list together with the moment it was written.
#[derive(Debug, Clone)]
pub struct CachedOptions {
    /// The record text as stored.
    pub text: String,
    /// When the artifact was written.
    pub written: SystemTime,
}

impl CachedOptions {
    /// A cache is fresh when it is younger than `max_age` and no source was
    /// modified after it was written.
    pub fn is_fresh(&self, max_age: Duration, sources: &[PathBuf]) -> bool {
        let age = SystemTime::now()
            .duration_since(self.written)
            .unwrap_or_default();
        if age > max_age {
            debug!("Option cache is {}s old, older than {}s.", age.as_secs(), max_age.as_secs());
            return false;
        }
        match newest_modification(sources) {
            Some(modified) if modified > self.written => {
                debug!("An option source changed after the cache was written.");
                false
            }
            _ => true,
        }
    }
}

/// External store for serialized option sets.
/// Reads never mutate; writes always replace the whole artifact.
pub trait OptionStore {
    /// Returns the cached artifact, or `None` when there is none.
    fn load(&self, key: &CacheKey) -> Result<Option<CachedOptions>>;
    /// Replaces the artifact for `key`.
    fn store(&self, key: &CacheKey, text: &str) -> Result<()>;
}

/// Cache artifacts kept as plain files in one directory.
#[derive(Debug, Clone)]
pub struct FileOptionStore {
    dir: PathBuf,
}

impl FileOptionStore {
    /// A store rooted at `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File holding the records for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl OptionStore for FileOptionStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CachedOptions>> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!("No option cache at '{}'", path.display());
            return Ok(None);
        }
        let written = fs::metadata(&path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to read metadata for file '{}'", path.display()))?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read content of file '{}'", path.display()))?;
        Ok(Some(CachedOptions { text, written }))
    }

    fn store(&self, key: &CacheKey, text: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Could not create cache directory '{}'", self.dir.display())
        })?;
        let path = self.path_for(key);
        // Written beside the target and renamed over it, so readers never see a partial file.
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        temp.write_all(text.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .with_context(|| format!("Failed to write option cache '{}'", path.display()))?;
        debug!("Option cache written to '{}'", path.display());
        Ok(())
    }
}

/// The most recent modification time among the existing `paths`.
pub fn newest_modification(paths: &[PathBuf]) -> Option<SystemTime> {
    paths
        .iter()
        .filter_map(|p| modified_time(p))
        .max()
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// In-memory store for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryOptionStore {
    pub(crate) entries: std::cell::RefCell<std::collections::HashMap<CacheKey, CachedOptions>>,
    pub(crate) writes: std::cell::Cell<usize>,
}

#[cfg(test)]
impl OptionStore for MemoryOptionStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CachedOptions>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn store(&self, key: &CacheKey, text: &str) -> Result<()> {
        self.writes.set(self.writes.get() + 1);
        self.entries.borrow_mut().insert(
            key.clone(),
            CachedOptions {
                text: text.to_string(),
                written: SystemTime::now(),
            },
        );
        Ok(())
    }
}
