// src/delink/mod.rs

//! Hard-linking identical files inside a repository tree
//!
//! Channels share most of their artifacts after promotion. Files with the
//! same device, size and permission bits are hashed once per inode, byte
//! compared, and every path of a duplicate inode is replaced by a hard link
//! to the canonical file. The replacement is a link under a temporary name
//! followed by a rename, so a path never disappears.

use crate::error::{Error, Result};
use crate::hash::{files_identical, hash_file, Hash, HashAlgorithm};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files that may be merged: same device, same size, same permission bits
type CandidateKey = (u64, u64, u32);

/// Paths of one inode, sorted
type Inodes = BTreeMap<u64, Vec<PathBuf>>;

/// Identity of one regular file found by the walk
#[derive(Debug, Clone)]
struct FileRecord {
    dev: u64,
    ino: u64,
    size: u64,
    mode: u32,
    path: PathBuf,
}

/// Group files that may be merged, then by inode; empty files are dropped
fn group_candidates(records: impl IntoIterator<Item = FileRecord>) -> BTreeMap<CandidateKey, Inodes> {
    let mut candidates: BTreeMap<CandidateKey, Inodes> = BTreeMap::new();
    for record in records {
        if record.size == 0 {
            continue;
        }
        candidates
            .entry((record.dev, record.size, record.mode & 0o7777))
            .or_default()
            .entry(record.ino)
            .or_default()
            .push(record.path);
    }
    for inodes in candidates.values_mut() {
        for paths in inodes.values_mut() {
            paths.sort();
        }
    }
    candidates
}

/// Replaces duplicate files with hard links
#[derive(Debug, Clone, Default)]
pub struct DuplicateLinker {
    algorithm: HashAlgorithm,
}

impl DuplicateLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Link every duplicate under `root`; returns the number of paths replaced
    pub fn delink(&self, root: &Path) -> Result<usize> {
        if !root.is_dir() {
            return Err(Error::NotFound(format!("directory {}", root.display())));
        }

        let candidates = Self::collect(root)?;
        let mut replaced = 0;
        for (key, inodes) in candidates {
            if inodes.len() < 2 {
                continue;
            }
            debug!("{} inodes of {} bytes on device {}", inodes.len(), key.1, key.0);
            replaced += self.merge(inodes)?;
        }

        info!("Replaced {} duplicate files under {}", replaced, root.display());
        Ok(replaced)
    }

    fn collect(root: &Path) -> Result<BTreeMap<CandidateKey, Inodes>> {
        let mut records = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = entry.metadata().map_err(|e| Error::IoError(e.to_string()))?;
            records.push(FileRecord {
                dev: meta.dev(),
                ino: meta.ino(),
                size: meta.len(),
                mode: meta.mode(),
                path: entry.into_path(),
            });
        }
        Ok(group_candidates(records))
    }

    /// Merge the inodes of one candidate group
    fn merge(&self, inodes: Inodes) -> Result<usize> {
        let digests: Vec<(u64, Result<Hash>)> = inodes
            .par_iter()
            .map(|(ino, paths)| (*ino, hash_file(self.algorithm, &paths[0]).map_err(Error::from)))
            .collect();

        let mut by_digest: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for (ino, digest) in digests {
            match digest {
                Ok(digest) => by_digest.entry(digest.value).or_default().push(ino),
                Err(e) => warn!("Cannot hash {}: {}", inodes[&ino][0].display(), e),
            }
        }

        let mut replaced = 0;
        for group in by_digest.into_values().filter(|g| g.len() > 1) {
            let Some(canonical) = group.iter().map(|ino| &inodes[ino][0]).min().cloned() else {
                continue;
            };
            for ino in group {
                let paths = &inodes[&ino];
                if paths.contains(&canonical) {
                    continue;
                }
                if !files_identical(&canonical, &paths[0])? {
                    warn!(
                        "{} and {} share a digest but differ",
                        canonical.display(),
                        paths[0].display()
                    );
                    continue;
                }
                for path in paths {
                    relink(&canonical, path)?;
                    debug!("Linked {} to {}", path.display(), canonical.display());
                    replaced += 1;
                }
            }
        }
        Ok(replaced)
    }
}

/// Point `path` at `canonical` through a temporary link and a rename
fn relink(canonical: &Path, path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::IoError(format!("no file name in {}", path.display())))?;
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(name);
    tmp_name.push(".delink");
    let tmp = path.with_file_name(tmp_name);

    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }
    fs::hard_link(canonical, &tmp)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
