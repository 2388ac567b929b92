// src/sync/mod.rs

//! Publishing a channel tree to object storage
//!
//! A sync runs in two phases separated by a barrier:
//!
//! 1. **Upload**: the tree is walked in sorted order, local and remote
//!    facts are gathered on a bounded worker pool, and the coordinator
//!    decides per key. Every key seen locally joins the undelete set before
//!    its decision is made. Uploads then run on the same pool.
//! 2. **Delete** (optional): once every upload has finished, the remote
//!    keys under the prefix are listed once and everything outside the
//!    undelete set is removed.
//!
//! All actions go through one channel drained by a single writer, so the
//! report is assembled in one place. Cancellation is honoured between
//! phases; transfers already running are allowed to finish.

pub mod compare;
pub mod key;
#[cfg(feature = "s3")]
pub mod s3;
pub mod store;

pub use compare::{CompareMethod, LocalFile};
pub use key::normalize_key;
pub use store::{DirectoryObjectStore, MemoryObjectStore, ObjectMetadata, ObjectStore};

use crate::error::{Error, Result};
use crate::hash::{hash_file, HashAlgorithm};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Default number of concurrent transfers
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Parameters of one sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub bucket: String,
    /// Key prefix every local path is placed under
    pub prefix: String,
    pub dryrun: bool,
    /// Remove remote keys under the prefix that have no local file
    pub delete: bool,
    pub compare_method: CompareMethod,
    /// Reference time for the `modified` policy
    pub since: Option<DateTime<Utc>>,
    pub concurrency: usize,
}

impl SyncOptions {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            dryrun: false,
            delete: false,
            compare_method: CompareMethod::default(),
            since: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// One thing a sync did, or would do in a dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncAction {
    Upload { key: String, size: u64 },
    Skip { key: String },
    Delete { key: String },
    Failed { key: String, error: String },
}

impl SyncAction {
    pub fn key(&self) -> &str {
        match self {
            Self::Upload { key, .. }
            | Self::Skip { key }
            | Self::Delete { key }
            | Self::Failed { key, .. } => key,
        }
    }
}

/// Outcome of a sync run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub dryrun: bool,
    /// Set when the run stopped at a phase boundary
    pub cancelled: bool,
    pub actions: Vec<SyncAction>,
}

impl SyncReport {
    fn keys(&self, pick: impl Fn(&SyncAction) -> bool) -> Vec<&str> {
        let mut keys: Vec<&str> = self.actions.iter().filter(|a| pick(a)).map(|a| a.key()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn uploaded(&self) -> Vec<&str> {
        self.keys(|a| matches!(a, SyncAction::Upload { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.keys(|a| matches!(a, SyncAction::Skip { .. }))
    }

    pub fn deleted(&self) -> Vec<&str> {
        self.keys(|a| matches!(a, SyncAction::Delete { .. }))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.keys(|a| matches!(a, SyncAction::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed().is_empty()
    }
}

/// Local and remote facts about one key, gathered on a worker
struct Inspection {
    path: PathBuf,
    key: String,
    facts: Result<(LocalFile, Option<ObjectMetadata>)>,
}

/// Mirrors a local tree into a bucket
pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    cancel: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run at the next phase boundary
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Upload `source_dir` to `options.bucket` under `options.prefix`
    pub fn sync(&self, source_dir: &Path, options: &SyncOptions) -> Result<SyncReport> {
        if !source_dir.is_dir() {
            return Err(Error::NotFound(format!("source directory {}", source_dir.display())));
        }
        if options.concurrency == 0 {
            return Err(Error::ConfigError("sync concurrency must be at least 1".to_string()));
        }
        if self.cancelled() {
            return Err(Error::Cancelled("sync not started".to_string()));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.concurrency)
            .thread_name(|i| format!("stagehand-sync-{}", i))
            .build()
            .map_err(|e| Error::ConfigError(format!("cannot start sync workers: {}", e)))?;

        info!(
            "Syncing {} to {}/{} ({} compare{})",
            source_dir.display(),
            options.bucket,
            options.prefix,
            options.compare_method,
            if options.dryrun { ", dry run" } else { "" }
        );

        let (tx, rx) = flume::unbounded::<SyncAction>();
        let writer = thread::spawn(move || {
            let mut actions = Vec::new();
            for action in rx.iter() {
                debug!("{:?}", action);
                actions.push(action);
            }
            actions
        });

        let undelete: DashSet<String> = DashSet::new();
        let mut report = SyncReport {
            dryrun: options.dryrun,
            ..Default::default()
        };

        let (files, unreadable) = self.walk(source_dir, options, &tx);
        let inspections: Vec<Inspection> = pool.install(|| {
            files
                .into_par_iter()
                .map(|(path, key)| {
                    let facts = self.inspect(&path, &key, options);
                    Inspection { path, key, facts }
                })
                .collect()
        });

        let mut uploads = Vec::new();
        for item in inspections {
            undelete.insert(item.key.clone());
            match item.facts {
                Ok((local, remote)) => {
                    if options
                        .compare_method
                        .needs_upload(&local, remote.as_ref(), options.since)
                    {
                        uploads.push((item.path, item.key, local.size));
                    } else {
                        let _ = tx.send(SyncAction::Skip { key: item.key });
                    }
                }
                Err(e) => {
                    warn!("Cannot compare {}: {}", item.path.display(), e);
                    let _ = tx.send(SyncAction::Failed {
                        key: item.key,
                        error: e.to_string(),
                    });
                }
            }
        }

        if self.cancelled() {
            report.cancelled = true;
        } else {
            pool.install(|| {
                uploads.par_iter().for_each(|(path, key, size)| {
                    let _ = tx.send(self.upload(path, key, *size, options));
                });
            });
        }

        // Every upload has finished here; the undelete set is complete
        if options.delete && !report.cancelled {
            if self.cancelled() {
                report.cancelled = true;
            } else {
                self.delete_phase(&pool, options, &undelete, &unreadable, &tx);
            }
        }

        drop(tx);
        report.actions = writer
            .join()
            .map_err(|_| Error::IoError("sync action writer panicked".to_string()))?;

        info!(
            "Sync finished: {} uploaded, {} skipped, {} deleted, {} failed",
            report.uploaded().len(),
            report.skipped().len(),
            report.deleted().len(),
            report.failed().len()
        );
        Ok(report)
    }

    /// Files under `source_dir` in sorted order with their keys, plus the
    /// keys of entries that could not be read
    fn walk(
        &self,
        source_dir: &Path,
        options: &SyncOptions,
        tx: &flume::Sender<SyncAction>,
    ) -> (Vec<(PathBuf, String)>, Vec<String>) {
        let mut files = Vec::new();
        let mut unreadable = Vec::new();
        for entry in WalkDir::new(source_dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let key = e
                        .path()
                        .and_then(|p| p.strip_prefix(source_dir).ok())
                        .map(|rel| normalize_key(&options.prefix, rel))
                        .unwrap_or_else(|| normalize_key(&options.prefix, Path::new("")));
                    warn!("Cannot read {}: {}", key, e);
                    unreadable.push(key.clone());
                    let _ = tx.send(SyncAction::Failed {
                        key,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(source_dir) else {
                continue;
            };
            let key = normalize_key(&options.prefix, rel);
            files.push((entry.into_path(), key));
        }
        (files, unreadable)
    }

    fn inspect(&self, path: &Path, key: &str, options: &SyncOptions) -> Result<(LocalFile, Option<ObjectMetadata>)> {
        let meta = fs::metadata(path)?;
        let md5 = match options.compare_method {
            CompareMethod::Checksum => Some(hash_file(HashAlgorithm::Md5, path)?),
            _ => None,
        };
        let local = LocalFile {
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            md5,
        };
        let remote = self.store.get_object_metadata(&options.bucket, key)?;
        Ok((local, remote))
    }

    fn upload(&self, path: &Path, key: &str, size: u64, options: &SyncOptions) -> SyncAction {
        if options.dryrun {
            return SyncAction::Upload {
                key: key.to_string(),
                size,
            };
        }

        let result = fs::read(path).map_err(Error::from).and_then(|data| {
            self.store
                .put_object(&options.bucket, key, &data, content_type(path))
                .map(|()| data.len() as u64)
        });
        match result {
            Ok(size) => {
                debug!("Uploaded {}", key);
                SyncAction::Upload {
                    key: key.to_string(),
                    size,
                }
            }
            Err(e) => {
                warn!("Upload of {} failed: {}", key, e);
                SyncAction::Failed {
                    key: key.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn delete_phase(
        &self,
        pool: &rayon::ThreadPool,
        options: &SyncOptions,
        undelete: &DashSet<String>,
        unreadable: &[String],
        tx: &flume::Sender<SyncAction>,
    ) {
        let prefix = key::list_prefix(&options.prefix);
        let remote = match self.store.list_objects(&options.bucket, &prefix) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cannot list {}/{}: {}", options.bucket, prefix, e);
                let _ = tx.send(SyncAction::Failed {
                    key: prefix,
                    error: e.to_string(),
                });
                return;
            }
        };

        let stale = stale_keys(remote, undelete, unreadable);
        info!("{} remote objects have no local file", stale.len());

        pool.install(|| {
            stale.par_iter().for_each(|key| {
                let action = if options.dryrun {
                    SyncAction::Delete { key: key.clone() }
                } else {
                    match self.store.delete_object(&options.bucket, key) {
                        Ok(()) => SyncAction::Delete { key: key.clone() },
                        Err(e) => SyncAction::Failed {
                            key: key.clone(),
                            error: e.to_string(),
                        },
                    }
                };
                let _ = tx.send(action);
            });
        });
    }
}

/// Remote keys to delete: outside the undelete set and not below any
/// local entry that could not be read
fn stale_keys(remote: Vec<String>, undelete: &DashSet<String>, unreadable: &[String]) -> Vec<String> {
    remote
        .into_iter()
        .filter(|k| !undelete.contains(k))
        .filter(|k| {
            let shielded = unreadable.iter().any(|u| {
                u.is_empty() || k == u || k.strip_prefix(u.as_str()).is_some_and(|rest| rest.starts_with('/'))
            });
            if shielded {
                warn!("Keeping {}: its local directory could not be read", k);
            }
            !shielded
        })
        .collect()
}

/// Content type for a published file, by extension
pub fn content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "html" | "htm" => "text/html",
        "txt" | "md5" | "sha1" | "sha256" | "sha512" => "text/plain",
        "xml" => "application/xml",
        "json" => "application/json",
        "gz" | "tgz" => "application/gzip",
        "bz2" => "application/x-bzip2",
        "xz" => "application/x-xz",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "rpm" => "application/x-rpm",
        "deb" => "application/vnd.debian.binary-package",
        "asc" | "sig" => "application/pgp-signature",
        "pkg" => "application/octet-stream",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("rpm/el/7")).unwrap();
        fs::write(dir.path().join("index.html"), "<html/>").unwrap();
        fs::write(dir.path().join("rpm/el/7/foo.rpm"), "rpm").unwrap();
        dir
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type(Path::new("a/index.html")), Some("text/html"));
        assert_eq!(content_type(Path::new("repodata/primary.xml.gz")), Some("application/gzip"));
        assert_eq!(content_type(Path::new("Release")), None);
    }

    #[test]
    fn test_upload_then_skip() {
        let dir = tree();
        let store = Arc::new(MemoryObjectStore::new());
        let engine = SyncEngine::new(store.clone());
        let mut options = SyncOptions::new("downloads");
        options.prefix = "repo".to_string();

        let report = engine.sync(dir.path(), &options).unwrap();
        assert_eq!(report.uploaded(), vec!["repo/index.html", "repo/rpm/el/7/foo.rpm"]);
        assert_eq!(
            store.get("downloads", "repo/index.html").unwrap().content_type.as_deref(),
            Some("text/html")
        );

        let again = engine.sync(dir.path(), &options).unwrap();
        assert!(again.uploaded().is_empty());
        assert_eq!(again.skipped().len(), 2);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let dir = tree();
        let engine = SyncEngine::new(Arc::new(MemoryObjectStore::new()));
        let mut options = SyncOptions::new("b");
        options.concurrency = 0;
        assert!(matches!(engine.sync(dir.path(), &options), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_cancel_before_start() {
        let dir = tree();
        let store = Arc::new(MemoryObjectStore::new());
        let engine = SyncEngine::new(store.clone());
        engine.cancel_flag().store(true, Ordering::SeqCst);

        let err = engine.sync(dir.path(), &SyncOptions::new("b")).unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(store.keys("b").is_empty());
    }

    #[test]
    fn test_delete_keeps_local_keys_and_other_prefixes() {
        let dir = tree();
        let store = Arc::new(MemoryObjectStore::new());
        let now = Utc::now();
        store.insert("b", "repo/stale.txt", b"old", now);
        store.insert("b", "other/keep.txt", b"keep", now);

        let engine = SyncEngine::new(store.clone());
        let mut options = SyncOptions::new("b");
        options.prefix = "repo".to_string();
        options.delete = true;

        let report = engine.sync(dir.path(), &options).unwrap();
        assert_eq!(report.deleted(), vec!["repo/stale.txt"]);
        assert_eq!(
            store.keys("b"),
            vec!["other/keep.txt", "repo/index.html", "repo/rpm/el/7/foo.rpm"]
        );
    }

    #[test]
    fn test_unreadable_entries_shield_remote_keys() {
        let undelete = DashSet::new();
        undelete.insert("repo/a.txt".to_string());
        let remote = vec![
            "repo/a.txt".to_string(),
            "repo/sub/b.txt".to_string(),
            "repo/sub2/c.txt".to_string(),
            "repo/stale.txt".to_string(),
        ];

        let stale = stale_keys(remote.clone(), &undelete, &["repo/sub".to_string()]);
        assert_eq!(stale, vec!["repo/sub2/c.txt", "repo/stale.txt"]);

        // An unreadable root keeps everything
        assert!(stale_keys(remote.clone(), &undelete, &[String::new()]).is_empty());
        assert_eq!(stale_keys(remote, &undelete, &[]).len(), 3);
    }
}
