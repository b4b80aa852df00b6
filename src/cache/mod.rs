//! On-disk composite cache
//!
//! Maps (source file identity, render variant) to a PNG file plus a record in
//! `metadata.json`. The cache is strictly an optimization: every public
//! operation absorbs its own failures, and rendering stays correct with the
//! cache disabled or its directory deleted at any time.
//!
//! ## Layout
//! ```text
//! <dir>/<sha256(path|size|mtime)><variant>.png
//! <dir>/metadata.json
//! ```
//!
//! Eviction keeps the total size of image files under `max_bytes`, deleting
//! the least recently accessed entries first.

pub mod identity;
pub mod metadata;

use crate::config::CacheConfig;
use identity::{unix_seconds, SourceIdentity};
use image::{ImageFormat, RgbaImage};
use metadata::{CacheIndex, CacheRecord};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Default size budget (1 GiB)
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 1024 * 1024 * 1024;

const METADATA_FILE: &str = "metadata.json";
const ENTRY_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Internal cache failures; never escape the public API
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub max_bytes: u64,
}

/// An image file found in the cache directory
#[derive(Debug, Clone)]
struct EntryFile {
    key: String,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    max_bytes: u64,
    index: Mutex<CacheIndex>,
}

impl FileCache {
    /// Open (creating if needed) a cache rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("Failed to create cache dir {:?}: {}", dir, e);
        } else {
            tracing::debug!("Cache dir ready: {:?}", dir);
        }

        let index = CacheIndex::load(&dir.join(METADATA_FILE));
        tracing::info!(
            "Composite cache at {:?}: {} indexed entries, budget {} MB",
            dir,
            index.len(),
            max_bytes / 1024 / 1024
        );

        Self {
            dir,
            max_bytes,
            index: Mutex::new(index),
        }
    }

    /// Build the shared cache instance, or `None` when caching is disabled
    pub fn from_config(config: &CacheConfig) -> Option<Arc<Self>> {
        if !config.enabled {
            tracing::info!("Composite cache disabled");
            return None;
        }
        Some(Arc::new(Self::new(config.resolved_dir(), config.max_bytes)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Deterministic cache file path for `source` under `variant`
    pub fn get_cache_path(&self, source: &Path, variant: &str) -> Result<PathBuf, CacheError> {
        let identity = SourceIdentity::of(source)?;
        Ok(self.entry_path(&identity.cache_key(variant)))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.png", key))
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Cached bitmap for `source`, if present and not older than the source.
    ///
    /// Stale entries are deleted as a side effect. Decode failures are logged
    /// and reported as a miss.
    pub fn get_cached_image(&self, source: &Path, variant: &str) -> Option<RgbaImage> {
        let identity = match SourceIdentity::of(source) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!("Cannot stat {:?} for cache lookup: {}", source, e);
                return None;
            }
        };
        let key = identity.cache_key(variant);
        let cache_path = self.entry_path(&key);

        if !cache_path.exists() {
            self.purge_superseded(&identity, variant, &key);
            return None;
        }

        let cache_mtime = match std::fs::metadata(&cache_path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Failed to stat cache file {:?}: {}", cache_path, e);
                return None;
            }
        };

        if cache_mtime < identity.modified {
            tracing::debug!("Cache entry {:?} predates its source, removing", cache_path);
            self.remove_entry(&key, &cache_path);
            self.persist_index();
            return None;
        }

        match image::open(&cache_path) {
            Ok(img) => {
                let now = unix_seconds(SystemTime::now());
                let touched = self.index.lock().touch(&key, now);
                if touched {
                    self.persist_index();
                }
                Some(img.to_rgba8())
            }
            Err(e) => {
                tracing::warn!("Failed to load cached image {:?}: {}", cache_path, e);
                None
            }
        }
    }

    /// Store `image` for `source`, then run eviction. Best effort.
    pub fn save_image_to_cache(&self, image: &RgbaImage, source: &Path, variant: &str) {
        match self.try_save(image, source, variant) {
            Ok(path) => tracing::debug!("Cached composite at {:?}", path),
            Err(e) => {
                tracing::error!("Failed to save image to cache: {}", e);
                return;
            }
        }
        self.evict();
    }

    fn try_save(&self, image: &RgbaImage, source: &Path, variant: &str) -> Result<PathBuf, CacheError> {
        let identity = SourceIdentity::of(source)?;
        let key = identity.cache_key(variant);
        let cache_path = self.entry_path(&key);

        std::fs::create_dir_all(&self.dir)?;

        // Write then rename so readers never see a half-written file
        let tmp_path = self.dir.join(format!("{}.png.tmp", key));
        image.save_with_format(&tmp_path, ImageFormat::Png)?;
        if let Err(e) = std::fs::rename(&tmp_path, &cache_path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        let size = std::fs::metadata(&cache_path)?.len();
        let now = unix_seconds(SystemTime::now());

        let mut index = self.index.lock();
        for stale in index.superseded_keys(&identity.path_string(), variant, &key) {
            let stale_path = self.entry_path(&stale);
            if let Err(e) = std::fs::remove_file(&stale_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove stale cache {:?}: {}", stale_path, e);
                }
            }
            index.remove(&stale);
        }
        index.insert(
            key,
            CacheRecord {
                source_path: identity.path_string(),
                cache_path: cache_path.to_string_lossy().to_string(),
                size,
                created_at: now,
                last_accessed: now,
            },
        );
        index.save(&self.metadata_path())?;

        Ok(cache_path)
    }

    /// Delete least recently accessed entries until the total size fits the
    /// budget. Returns the number of files removed.
    pub fn evict(&self) -> usize {
        let entries = match self.scan_entries() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Error during cache cleanup: {}", e);
                return 0;
            }
        };

        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        if total <= self.max_bytes {
            return 0;
        }

        let mut index = self.index.lock();

        let mut candidates: Vec<(f64, EntryFile)> = entries
            .into_iter()
            .map(|entry| {
                let accessed = index
                    .get(&entry.key)
                    .map(|r| r.last_accessed)
                    .unwrap_or_else(|| unix_seconds(entry.modified));
                (accessed, entry)
            })
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut removed = 0;
        for (_, entry) in candidates {
            if total <= self.max_bytes {
                break;
            }
            match std::fs::remove_file(&entry.path) {
                Ok(()) => {
                    total = total.saturating_sub(entry.size);
                    index.remove(&entry.key);
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to clean up cache file {:?}: {}", entry.path, e);
                }
            }
        }

        if let Err(e) = index.save(&self.metadata_path()) {
            tracing::error!("Failed to save cache metadata: {}", e);
        }

        tracing::info!(
            "Cache eviction removed {} file(s), {} MB remain",
            removed,
            total / 1024 / 1024
        );
        removed
    }

    /// Remove every entry and reset the index
    pub fn clear(&self) {
        let entries = self.scan_entries().unwrap_or_else(|e| {
            tracing::warn!("Failed to list cache dir {:?}: {}", self.dir, e);
            Vec::new()
        });

        let mut index = self.index.lock();
        for entry in &entries {
            if let Err(e) = std::fs::remove_file(&entry.path) {
                tracing::warn!("Failed to remove cache file {:?}: {}", entry.path, e);
            }
        }
        index.clear();
        if let Err(e) = index.save(&self.metadata_path()) {
            tracing::error!("Failed to save cache metadata: {}", e);
        }
        tracing::debug!("Cleared {} cached composites", entries.len());
    }

    /// Current occupancy; index records without a file are pruned
    pub fn stats(&self) -> CacheStats {
        let entries = self.scan_entries().unwrap_or_default();
        let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        self.index.lock().retain_keys(&keys);

        CacheStats {
            entries: entries.len(),
            total_bytes: entries.iter().map(|e| e.size).sum(),
            max_bytes: self.max_bytes,
        }
    }

    fn scan_entries(&self) -> Result<Vec<EntryFile>, CacheError> {
        let mut entries = Vec::new();
        if !self.dir.exists() {
            return Ok(entries);
        }

        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| ENTRY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false);
            if !is_image {
                continue;
            }

            let meta = dirent.metadata()?;
            if !meta.is_file() {
                continue;
            }

            let key = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            entries.push(EntryFile {
                key,
                path,
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(entries)
    }

    /// Delete entries recorded for the same source and variant under an older
    /// identity (the source changed since they were written)
    fn purge_superseded(&self, identity: &SourceIdentity, variant: &str, current: &str) {
        let stale = self
            .index
            .lock()
            .superseded_keys(&identity.path_string(), variant, current);
        if stale.is_empty() {
            return;
        }

        for key in &stale {
            tracing::debug!("Removing superseded cache entry {}", key);
            self.remove_entry(key, &self.entry_path(key));
        }
        self.persist_index();
    }

    fn remove_entry(&self, key: &str, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove stale cache {:?}: {}", path, e);
            }
        }
        self.index.lock().remove(key);
    }

    fn persist_index(&self) {
        if let Err(e) = self.index.lock().save(&self.metadata_path()) {
            tracing::error!("Failed to save cache metadata: {}", e);
        }
    }
}
