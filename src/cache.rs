//! Memoised Blob Loads
//!
//! Root-input and scalar-output blobs are immutable after first write and may
//! be read by every function in a run. Loads are memoised by
//! `(resolved path, mtime, size)` so a touched file invalidates itself, and
//! the cache stays bounded by evicting arbitrary entries past a cap.

use crate::storage::StorageResult;
use crate::value::Value;
use crate::serialize;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const MAX_ENTRIES: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BlobKey {
    path: PathBuf,
    mtime: SystemTime,
    size: u64,
}

/// A bounded, concurrency-safe cache of decoded blobs.
#[derive(Default)]
pub struct BlobCache {
    entries: DashMap<BlobKey, Value>,
}

impl BlobCache {
    pub fn new() -> Self {
        BlobCache {
            entries: DashMap::new(),
        }
    }

    /// Load a blob through the cache.
    ///
    /// The key includes file metadata, so rewriting or touching the blob
    /// naturally misses and re-reads.
    pub fn load(&self, path: &Path) -> StorageResult<Value> {
        let key = Self::key_for(path)?;
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.clone());
        }
        let value = serialize::load_blob(path)?;
        if self.entries.len() >= MAX_ENTRIES {
            // Evict one arbitrary entry to stay bounded.
            if let Some(stale) = self.entries.iter().next().map(|e| e.key().clone()) {
                self.entries.remove(&stale);
            }
        }
        self.entries.insert(key, value.clone());
        Ok(value)
    }

    fn key_for(path: &Path) -> StorageResult<BlobKey> {
        let resolved = path.canonicalize()?;
        let meta = resolved.metadata()?;
        Ok(BlobKey {
            mtime: meta.modified()?,
            size: meta.len(),
            path: resolved,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
