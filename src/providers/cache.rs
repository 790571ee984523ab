//! Two level cache for provider responses
//!
//! [`DiskCache`] is the persistent, append-only store laid out as
//! `{root}/{lod}/{quadkey}.{ext}`. Files only ever appear complete: bytes go
//! to a uniquely named temporary file in the target directory which is then
//! renamed over the final path, so concurrent writers of the same key cannot
//! corrupt it (last writer wins). [`MemoryCache`] is a small LRU front.

use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::core::quadkey::QuadKey;
use crate::Result;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File name used for the single level-0 tile, whose digit string is empty.
const ROOT_TILE_NAME: &str = "root";

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache path of `quad_key` for files with extension `extension`.
    pub fn path_for(&self, quad_key: &QuadKey, extension: &str) -> PathBuf {
        let digits = quad_key.to_quadkey_string();
        let stem = if digits.is_empty() {
            ROOT_TILE_NAME
        } else {
            digits.as_str()
        };
        self.root
            .join(quad_key.level_of_detail().to_string())
            .join(format!("{}.{}", stem, extension))
    }

    /// Cached bytes at `path`, `None` when nothing has been stored yet.
    pub fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores `bytes` at `path`; the path is readable only once complete.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or(self.root.as_path());
        std::fs::create_dir_all(dir)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = dir.join(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = std::fs::write(&temp, bytes) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&temp, path) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// In-memory LRU cache of provider responses keyed by file path.
#[derive(Debug)]
pub struct MemoryCache {
    cache: Arc<Mutex<LruCache<PathBuf, Arc<Vec<u8>>>>>,
}

impl MemoryCache {
    /// Create a new cache holding up to `capacity` entries; 0 disables it.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Vec<u8>>> {
        self.cache.lock().ok()?.get(path).cloned()
    }

    pub fn put(&self, path: PathBuf, data: Arc<Vec<u8>>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(path, data);
        }
    }

    pub fn entry_count(&self) -> usize {
        self.cache.lock().ok().map(|cache| cache.len()).unwrap_or(0)
    }
}

impl Clone for MemoryCache {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}
