// src/repository/tarball.rs

//! Tarball and installer trees
//!
//! Each installer kind owns a directory under `<root>/<channel>/installers/`
//! and a file name pattern with named groups. `name` or `basename` names the
//! package, `version` and optional `release` give its version, and `arch`
//! defaults to `src`. The kind's name serves as the package's os.
//!
//! Copying the newest installer of a name also publishes a `latest` alias,
//! rendered from the kind's template with `version` set to `latest`.

use super::rebuild::{DigestRebuilder, MetadataRebuilder};
use super::staging;
use super::{DirtyDirs, PackageQuery, RepoLayout, RepositoryManager};
use crate::error::{Error, Result};
use crate::package::{Channel, Package, PackageFormat};
use crate::version::VersionKey;
use regex::{Captures, Regex};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Version string of `latest` aliases, never listed as a package
const LATEST: &str = "latest";

/// One kind of installer and how its file names are read
#[derive(Debug, Clone)]
pub struct InstallerKind {
    pub name: String,
    pub subdir: String,
    pattern: Regex,
    alias_template: String,
}

impl InstallerKind {
    /// `pattern` is matched against the whole file name from its start
    pub fn new(
        name: impl Into<String>,
        subdir: impl Into<String>,
        pattern: &str,
        alias_template: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            subdir: subdir.into(),
            pattern: Regex::new(&format!("^(?:{})", pattern))?,
            alias_template: alias_template.into(),
        })
    }

    pub fn defaults() -> Vec<Self> {
        const KINDS: &[(&str, &str, &str, &str)] = &[
            (
                "linux",
                "linux",
                r"(?P<name>(?P<basename>[a-z_]*)-(?P<version>([0-9.]|beta|rc)+)-(?P<arch>[a-z0-9_-]+))(?P<buildno>-Build-(?P<release>[0-9]+))\.tar\.gz$",
                "{basename}-{version}-{arch}{buildno}.tar.gz",
            ),
            (
                "mac",
                "mac",
                r"(?P<name>(?P<basename>[a-zA-Z_]*)-(?P<version>([0-9.]|beta|rc)+))(?P<buildno>-build(?P<release>[0-9]+))?(?P<extension>\.pkg|\.tar\.gz)$",
                "{basename}-{version}{buildno}{extension}",
            ),
            (
                "rpm-installer",
                "repo/rpm",
                r"(?P<name>(?P<basename>[a-z-]*[a-z])-(?P<version>[0-9.]*[0-9]))(?P<buildno>-(?P<release>[0-9]+))(?P<extension>.*\.noarch\.rpm)$",
                "{basename}-{version}{buildno}{extension}",
            ),
            (
                "deb-installer",
                "repo/deb",
                r"(?P<name>(?P<basename>[a-z-]*[a-z])_(?P<version>[0-9.]+))(?P<buildno>-(?P<release>[0-9]+))?_all\.deb$",
                "{basename}_{version}{buildno}_all.deb",
            ),
            (
                "src",
                "src",
                r"(?P<name>[a-z_]*)-(?P<version>([0-9.]|beta|rc)*)\.tar\.gz$",
                "{name}-{version}.tar.gz",
            ),
            (
                "cygwin",
                "windows",
                r"(?P<name>(?P<basename>[a-z_]*)-(?P<version>([0-9.]|beta|rc)*)-(?P<arch>[a-z0-9]*-pc-cygwin))(?P<buildno>-Build-(?P<release>[0-9]+))\.zip$",
                "{basename}-{version}-{arch}{buildno}.zip",
            ),
            (
                "mingw",
                "windows",
                r"(?P<name>(?P<basename>[a-z_]*)-(?P<version>([0-9.]|beta|rc)*)-(?P<arch>[a-z0-9]*-w64-mingw32))(?P<buildno>-Build-(?P<release>[0-9]+))\.zip$",
                "{basename}-{version}-{arch}{buildno}.zip",
            ),
        ];

        KINDS
            .iter()
            .filter_map(|(name, subdir, pattern, template)| {
                match InstallerKind::new(*name, *subdir, pattern, *template) {
                    Ok(kind) => Some(kind),
                    Err(e) => {
                        warn!("Dropping installer kind {}: {}", name, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Read a package out of a file name; `None` when it does not match or
    /// names a `latest` alias
    pub fn parse_file_name(&self, file_name: &str) -> Option<(String, String, String)> {
        let caps = self.pattern.captures(file_name)?;
        let group = |n: &str| caps.name(n).map(|m| m.as_str());

        let version = group("version").unwrap_or_default();
        if version == LATEST {
            return None;
        }
        let name = group("basename").or(group("name"))?.to_string();
        let version = match group("release").filter(|r| !r.is_empty()) {
            Some(release) => format!("{}-{}", version, release),
            None => version.to_string(),
        };
        let arch = group("arch").unwrap_or("src").to_string();
        Some((name, version, arch))
    }

    /// File name of the `latest` alias for an installer file
    pub fn alias_name(&self, file_name: &str) -> Option<String> {
        let caps = self.pattern.captures(file_name)?;
        Some(self.render_alias(&caps))
    }

    fn render_alias(&self, caps: &Captures<'_>) -> String {
        let mut rendered = self.alias_template.clone();
        for group in self.pattern.capture_names().flatten() {
            let value = match group {
                "version" => LATEST,
                "release" | "buildno" => "",
                other => caps.name(other).map(|m| m.as_str()).unwrap_or_default(),
            };
            rendered = rendered.replace(&format!("{{{}}}", group), value);
        }
        rendered
    }
}

/// Manager for `installers/` trees
pub struct TarballManager {
    layout: RepoLayout,
    kinds: Vec<InstallerKind>,
    rebuilder: Arc<dyn MetadataRebuilder>,
    dirty: DirtyDirs,
}

impl TarballManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: RepoLayout::new(root, "installers"),
            kinds: InstallerKind::defaults(),
            rebuilder: Arc::new(DigestRebuilder),
            dirty: DirtyDirs::default(),
        }
    }

    pub fn with_kinds(mut self, kinds: Vec<InstallerKind>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_rebuilder(mut self, rebuilder: Arc<dyn MetadataRebuilder>) -> Self {
        self.rebuilder = rebuilder;
        self
    }

    pub fn with_os_filter(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.layout = self.layout.with_os_filter(include, exclude);
        self
    }

    fn kind(&self, name: &str) -> Result<&InstallerKind> {
        self.kinds
            .iter()
            .find(|k| k.name == name)
            .ok_or_else(|| Error::NotFound(format!("installer kind {}", name)))
    }

    fn kind_dir(&self, channel: Channel, kind: &InstallerKind) -> PathBuf {
        self.layout.channel_root(channel).join(&kind.subdir)
    }

    fn scan_kind(&self, channel: Channel, kind: &InstallerKind) -> Result<Vec<Package>> {
        let dir = self.kind_dir(channel, kind);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();

        let mut packages = Vec::new();
        for file in files {
            let Some((name, version, arch)) = kind.parse_file_name(&file) else {
                continue;
            };
            packages.push(Package {
                name,
                version: VersionKey::parse(&version)?,
                arch,
                os: kind.name.clone(),
                format: PackageFormat::Tarball,
                channel,
                path: dir.join(&file),
                source: None,
            });
        }
        Ok(packages)
    }

    /// Publish the `latest` alias when `copied` is the newest of its name
    fn publish_latest(&self, kind: &InstallerKind, copied: &Package, to: Channel) -> Result<()> {
        let newer_exists = self
            .scan_kind(to, kind)?
            .iter()
            .any(|p| p.name == copied.name && p.version > copied.version);
        if newer_exists {
            debug!("{} {} is not the newest, no latest alias", copied.name, copied.version);
            return Ok(());
        }

        let Some(alias) = copied
            .path
            .file_name()
            .and_then(|f| kind.alias_name(&f.to_string_lossy()))
        else {
            return Ok(());
        };
        let alias_path = copied.path.with_file_name(&alias);
        staging::copy_all(&copied.name, &[(copied.path.clone(), alias_path)])?;
        info!("Updated {} to {} {}", alias, copied.name, copied.version);
        Ok(())
    }
}

impl RepositoryManager for TarballManager {
    fn format(&self) -> PackageFormat {
        PackageFormat::Tarball
    }

    fn channel_root(&self, channel: Channel) -> PathBuf {
        self.layout.channel_root(channel)
    }

    fn list_packages(&self, channel: Channel, query: &PackageQuery) -> Result<Vec<Package>> {
        self.layout.existing_channel_root(channel)?;

        let mut packages = Vec::new();
        for kind in &self.kinds {
            if !self.layout.selects_os(&kind.name)
                || query.os.as_deref().is_some_and(|o| o != kind.name)
            {
                continue;
            }
            packages.extend(self.scan_kind(channel, kind)?);
        }
        debug!("Found {} installers in {}", packages.len(), channel);
        Ok(query.apply(packages))
    }

    fn copy_package(&self, package: &Package, from: Channel, to: Channel) -> Result<Package> {
        let kind = self.kind(&package.os)?;
        let dest = self.layout.rebase(&package.path, from, to)?;
        let plan = staging::copy_plan(&package.path, &dest, &[]);
        let written = staging::copy_all(&package.name, &plan)?;
        debug!("Copied {} ({} files) to {}", package.name, written, to);

        let copied = Package {
            channel: to,
            path: dest,
            ..package.clone()
        };
        self.publish_latest(kind, &copied, to)?;

        if let Some(dir) = copied.path.parent() {
            self.dirty.mark(to, dir);
        }
        Ok(copied)
    }

    fn rebuild_metadata(&self, channel: Channel, force: bool) -> Result<()> {
        let all = || {
            Ok(self
                .kinds
                .iter()
                .filter(|k| self.layout.selects_os(&k.name))
                .map(|k| self.kind_dir(channel, k))
                .collect())
        };
        self.dirty
            .rebuild_with(channel, force, all, |dir: &Path| self.rebuilder.rebuild(dir, force))
    }
}
