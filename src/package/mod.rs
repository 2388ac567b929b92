// src/package/mod.rs

//! Package records, release channels and family grouping
//!
//! A [`Package`] is one artifact in one channel. Records are never mutated:
//! copying a package into another channel produces a new record. Packages
//! built from the same source at the same version form a family, and
//! promotion always moves whole families.

use crate::version::VersionKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Release channel, ordered by stability
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Unstable,
    Testing,
    Stable,
}

/// Repository format a package belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    #[strum(to_string = "debian", serialize = "deb")]
    Debian,
    #[strum(to_string = "rpm", serialize = "yum")]
    Rpm,
    Zypper,
    #[strum(to_string = "tarball", serialize = "installer")]
    Tarball,
}

/// Sub-package suffixes stripped to find a family name when the catalog
/// does not say which source a binary came from
const SUBPACKAGE_SUFFIXES: &[&str] = &[
    "-debuginfo",
    "-devel",
    "-static",
    "-progs",
    "-doc",
    "-dev",
    "-dbg",
];

/// One artifact in one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub name: String,
    pub version: VersionKey,
    pub arch: String,
    /// Codename or OS version: `wheezy`, `el/7`, `sles/11`, or installer kind
    pub os: String,
    pub format: PackageFormat,
    pub channel: Channel,
    /// Absolute path of the artifact inside its channel
    pub path: PathBuf,
    /// Source package name when the catalog records one
    pub source: Option<String>,
}

impl Package {
    /// Name shared by every sub-package built from the same source
    pub fn family_name(&self) -> &str {
        if let Some(source) = self.source.as_deref().filter(|s| !s.is_empty()) {
            return source;
        }
        for suffix in SUBPACKAGE_SUFFIXES {
            if let Some(stem) = self.name.strip_suffix(suffix)
                && !stem.is_empty()
            {
                return stem;
            }
        }
        &self.name
    }

    /// Identity within a channel
    pub fn identity(&self) -> (&str, &VersionKey, &str, &str, PackageFormat) {
        (&self.name, &self.version, &self.os, &self.arch, self.format)
    }

    /// File name of the artifact
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }
}

/// Key of a family: family name plus version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyKey {
    pub name: String,
    pub version: VersionKey,
}

/// Group packages into families keyed by (family name, version)
pub fn group_by_family<I>(packages: I) -> BTreeMap<FamilyKey, Vec<Package>>
where
    I: IntoIterator<Item = Package>,
{
    let mut families: BTreeMap<FamilyKey, Vec<Package>> = BTreeMap::new();
    for pkg in packages {
        let key = FamilyKey {
            name: pkg.family_name().to_string(),
            version: pkg.version.clone(),
        };
        families.entry(key).or_default().push(pkg);
    }
    families
}

/// Order two candidates for "newest": higher version, then later
/// modification time, then lexically smaller path.
pub fn newer_first(a: &Package, b: &Package) -> std::cmp::Ordering {
    b.version
        .cmp(&a.version)
        .then_with(|| b.modified().cmp(&a.modified()))
        .then_with(|| a.path.cmp(&b.path))
}

/// Pick the newest package, optionally restricted to one name
pub fn newest<'a>(packages: &'a [Package], name: Option<&str>) -> Option<&'a Package> {
    packages
        .iter()
        .filter(|p| name.is_none_or(|n| p.name == n))
        .min_by(|a, b| newer_first(a, b))
}
