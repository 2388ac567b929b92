// src/repository/mod.rs

//! Per-format repository management inside release channels
//!
//! Every format lives under `<root>/<channel>/` in its own subtree and is
//! handled by one [`RepositoryManager`]:
//! - `deb/` for Debian archives ([`deb::DebManager`])
//! - `rpm/<os>/<ver>/<arch>/` for yum repositories ([`rpm::RpmManager`])
//! - `rpm/sles/<ver>/` for zypper repositories ([`zypper::ZypperManager`])
//! - `installers/<kind>/` for tarballs and installers ([`tarball::TarballManager`])
//!
//! Managers rescan the channel on every listing. Copies are staged in the
//! destination directory and renamed into place only after every file of
//! the package is written. Metadata is rebuilt separately, once per batch.

pub mod deb;
pub mod rebuild;
pub mod rpm;
pub mod signing;
mod staging;
pub mod tarball;
pub mod zypper;

pub use rebuild::{CommandRebuilder, DigestRebuilder, MetadataRebuilder};
pub use signing::{GpgAgentCheck, SigningCheck, SkipSigningCheck};

use crate::error::{Error, Result};
use crate::package::{newer_first, Channel, Package, PackageFormat};
use crate::version::VersionKey;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Filters applied to a channel listing
#[derive(Debug, Clone, Default)]
pub struct PackageQuery {
    pub name: Option<String>,
    /// Versions without a revision match every revision
    pub version: Option<VersionKey>,
    pub os: Option<String>,
    /// Keep only the newest package per (name, os, arch)
    pub newest_only: bool,
}

impl PackageQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    pub fn with_version(mut self, version: VersionKey) -> Self {
        self.version = Some(version);
        self
    }

    pub fn newest(mut self) -> Self {
        self.newest_only = true;
        self
    }

    /// Whether a single package passes the name, version and os filters
    pub fn accepts(&self, pkg: &Package) -> bool {
        self.name.as_deref().is_none_or(|n| pkg.name == n)
            && self.os.as_deref().is_none_or(|o| pkg.os == o)
            && self.version.as_ref().is_none_or(|v| pkg.version.matches(v))
    }

    /// Filter a scanned catalog and apply `newest_only`
    pub fn apply(&self, packages: Vec<Package>) -> Vec<Package> {
        let filtered: Vec<Package> = packages.into_iter().filter(|p| self.accepts(p)).collect();
        if !self.newest_only {
            return filtered;
        }

        let mut groups: BTreeMap<(String, String, String), Package> = BTreeMap::new();
        for pkg in filtered {
            let key = (pkg.name.clone(), pkg.os.clone(), pkg.arch.clone());
            match groups.get(&key) {
                Some(current) if newer_first(current, &pkg).is_le() => {}
                _ => {
                    groups.insert(key, pkg);
                }
            }
        }
        groups.into_values().collect()
    }
}

/// Capability every repository format provides
pub trait RepositoryManager: Send + Sync {
    fn format(&self) -> PackageFormat;

    /// Directory holding this format's repositories inside a channel
    fn channel_root(&self, channel: Channel) -> PathBuf;

    /// Scan the channel's catalogs and return matching packages
    fn list_packages(&self, channel: Channel, query: &PackageQuery) -> Result<Vec<Package>>;

    /// Copy a package and its companion files into another channel
    ///
    /// The artifact lands at the same path relative to the channel root.
    /// Returns the record of the copy in the destination channel.
    fn copy_package(&self, package: &Package, from: Channel, to: Channel) -> Result<Package>;

    /// Regenerate catalogs touched since the last rebuild, or all of them
    /// when `force` is set
    fn rebuild_metadata(&self, channel: Channel, force: bool) -> Result<()>;

    /// Whether this format's catalogs are signed
    fn requires_signing(&self) -> bool {
        false
    }
}

/// Location and OS selection shared by every manager
#[derive(Debug, Clone)]
pub struct RepoLayout {
    pub root: PathBuf,
    /// Subtree of a channel this format lives in, e.g. `deb` or `rpm/sles`
    pub subdir: PathBuf,
    /// When non-empty, only these OS names are handled
    pub os_names: Vec<String>,
    /// Evaluated after `os_names`
    pub exclude_os_names: Vec<String>,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>, subdir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            subdir: subdir.into(),
            os_names: Vec::new(),
            exclude_os_names: Vec::new(),
        }
    }

    pub fn with_os_filter(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.os_names = include;
        self.exclude_os_names = exclude;
        self
    }

    pub fn channel_root(&self, channel: Channel) -> PathBuf {
        self.root.join(channel.as_ref()).join(&self.subdir)
    }

    /// Channel root for reading; the channel itself must exist
    pub fn existing_channel_root(&self, channel: Channel) -> Result<PathBuf> {
        let channel_dir = self.root.join(channel.as_ref());
        if !channel_dir.is_dir() {
            return Err(Error::ChannelNotFound(channel_dir));
        }
        Ok(self.channel_root(channel))
    }

    pub fn selects_os(&self, os: &str) -> bool {
        (self.os_names.is_empty() || self.os_names.iter().any(|o| o == os))
            && !self.exclude_os_names.iter().any(|o| o == os)
    }

    /// Map a path inside `from` to the same relative path inside `to`
    pub fn rebase(&self, path: &Path, from: Channel, to: Channel) -> Result<PathBuf> {
        let from_root = self.channel_root(from);
        let rel = path.strip_prefix(&from_root).map_err(|_| Error::CopyFailed {
            package: path.display().to_string(),
            reason: format!("not inside channel {}", from_root.display()),
        })?;
        Ok(self.channel_root(to).join(rel))
    }
}

/// Repository directories changed since their last rebuild
#[derive(Debug, Default)]
pub struct DirtyDirs {
    dirs: Mutex<BTreeSet<(Channel, PathBuf)>>,
}

impl DirtyDirs {
    pub fn mark(&self, channel: Channel, dir: impl Into<PathBuf>) {
        self.dirs.lock().insert((channel, dir.into()));
    }

    pub fn is_dirty(&self, channel: Channel) -> bool {
        self.dirs.lock().iter().any(|(c, _)| *c == channel)
    }

    /// Remove and return the dirty directories of one channel
    fn take(&self, channel: Channel) -> BTreeSet<PathBuf> {
        let mut dirs = self.dirs.lock();
        let (taken, kept): (BTreeSet<_>, BTreeSet<_>) =
            dirs.iter().cloned().partition(|(c, _)| *c == channel);
        *dirs = kept;
        taken.into_iter().map(|(_, d)| d).collect()
    }

    /// Run `rebuild` for every directory needing it
    ///
    /// With `force`, `all` supplies every repository directory of the
    /// channel. Every directory is attempted; failed ones stay dirty and the
    /// first failure is returned.
    pub fn rebuild_with<A, F>(&self, channel: Channel, force: bool, all: A, mut rebuild: F) -> Result<()>
    where
        A: FnOnce() -> Result<Vec<PathBuf>>,
        F: FnMut(&Path) -> Result<()>,
    {
        let mut dirs = self.take(channel);
        if force {
            dirs.extend(all()?);
        }
        if dirs.is_empty() {
            debug!("No {} repositories need a metadata rebuild", channel);
            return Ok(());
        }

        let mut first_error = None;
        for dir in dirs {
            info!("Rebuilding metadata in {}", dir.display());
            if let Err(e) = rebuild(&dir) {
                error!("Metadata rebuild failed in {}: {}", dir.display(), e);
                self.mark(channel, dir);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Sub-directories of `dir`, sorted by name; a missing directory has none
pub(crate) fn subdirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Resolve a catalog reference, failing when the artifact is absent
pub(crate) fn require_artifact(catalog: &Path, artifact: PathBuf) -> Result<PathBuf> {
    if artifact.is_file() {
        Ok(artifact)
    } else {
        Err(Error::ArtifactMissing {
            catalog: catalog.to_path_buf(),
            artifact,
        })
    }
}
