// src/sync/store.rs

//! Object storage backends
//!
//! [`ObjectStore`] is the only seam between the sync engine and a bucket.
//! The in-memory store backs tests and verification runs; the directory
//! store mirrors buckets as sub-directories of a local path.

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, hash_file, HashAlgorithm};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

/// What the store knows about an object without fetching it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Entity tag, possibly quoted; a `-` marks a multipart upload
    pub etag: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Minimal bucket operations the sync engine needs
pub trait ObjectStore: Send + Sync {
    /// `None` when the object does not exist
    fn get_object_metadata(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>>;

    fn put_object(&self, bucket: &str, key: &str, data: &[u8], content_type: Option<&str>) -> Result<()>;

    /// Deleting a missing object is not an error
    fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Every key starting with `prefix`, sorted
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// A stored object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Buckets held in memory
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets.read().get(bucket).and_then(|b| b.get(key)).cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert an object with an explicit modification time
    pub fn insert(&self, bucket: &str, key: &str, data: &[u8], last_modified: DateTime<Utc>) {
        self.buckets.write().entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                content_type: None,
                last_modified,
            },
        );
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_object_metadata(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>> {
        Ok(self.get(bucket, key).map(|obj| ObjectMetadata {
            etag: format!("\"{}\"", hash_bytes(HashAlgorithm::Md5, &obj.data)),
            size: obj.data.len() as u64,
            last_modified: Some(obj.last_modified),
        }))
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8], content_type: Option<&str>) -> Result<()> {
        self.buckets.write().entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.map(str::to_string),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        if let Some(b) = self.buckets.write().get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

/// Buckets mirrored as directories: `<root>/<bucket>/<key>`
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == ".." {
            return Err(Error::ConfigError(format!("invalid bucket name: {:?}", bucket)));
        }
        let key = super::key::normalize_key("", Path::new(key));
        if key.is_empty() {
            return Err(Error::TransferFailed {
                key,
                reason: "empty object key".to_string(),
            });
        }
        Ok(self.root.join(bucket).join(key))
    }
}

impl ObjectStore for DirectoryObjectStore {
    fn get_object_metadata(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>> {
        let path = self.object_path(bucket, key)?;
        let meta = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let etag = hash_file(HashAlgorithm::Md5, &path)?;
        Ok(Some(ObjectMetadata {
            etag: format!("\"{}\"", etag),
            size: meta.len(),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        }))
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8], _content_type: Option<&str>) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        let failed = |e: std::io::Error| Error::TransferFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(failed)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(failed)?;
        tmp.write_all(data).map_err(failed)?;
        tmp.persist(&path).map_err(|e| failed(e.error))?;
        debug!("Stored {}", path.display());
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::TransferFailed {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket_dir = self.root.join(bucket);
        if !bucket_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&bucket_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&bucket_dir) else {
                continue;
            };
            let key = super::key::normalize_key("", rel);
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
