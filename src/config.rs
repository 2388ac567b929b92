// src/config.rs
//! Configuration file parsing
//!
//! Supports TOML configuration files with the following sections:
//! - top level: `root` of the channel trees and the ordered `releases`
//! - [deb], [rpm], [zypper], [tarball]: per-format switches, OS selection
//!   and metadata commands
//! - [sync]: object store publishing defaults
//! - [advisories]: ledger updated by promotions
//!
//! Every field has a default, so an empty file (or none at all) describes
//! a tree under `/var/www/html/repo` with all four formats enabled.

use crate::advisories::AdvisoryFormat;
use crate::error::{Error, Result};
use crate::package::Channel;
use crate::repository::deb::{DebManager, DistributionTemplate};
use crate::repository::rpm::RpmManager;
use crate::repository::tarball::{InstallerKind, TarballManager};
use crate::repository::zypper::{ProductInfo, ZypperManager};
use crate::repository::{CommandRebuilder, MetadataRebuilder, RepositoryManager};
use crate::sync::{CompareMethod, DEFAULT_CONCURRENCY};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// TOML configuration file structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding one sub-directory per release channel
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Channels in promotion order
    #[serde(default = "default_releases")]
    pub releases: Vec<Channel>,

    #[serde(default = "FormatSection::deb")]
    pub deb: FormatSection,

    #[serde(default = "FormatSection::rpm")]
    pub rpm: FormatSection,

    #[serde(default = "FormatSection::zypper")]
    pub zypper: FormatSection,

    #[serde(default = "FormatSection::tarball")]
    pub tarball: FormatSection,

    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub advisories: AdvisoriesSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            releases: default_releases(),
            deb: FormatSection::deb(),
            rpm: FormatSection::rpm(),
            zypper: FormatSection::zypper(),
            tarball: FormatSection::tarball(),
            sync: SyncSection::default(),
            advisories: AdvisoriesSection::default(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("/var/www/html/repo")
}

fn default_releases() -> Vec<Channel> {
    vec![Channel::Unstable, Channel::Testing, Channel::Stable]
}

fn default_true() -> bool {
    true
}

/// Settings shared by every repository format
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Only these OS names are handled when non-empty
    #[serde(default)]
    pub os_names: Vec<String>,

    #[serde(default)]
    pub exclude_os_names: Vec<String>,

    /// Metadata generator argv; `{path}` is the repository directory.
    /// Installer trees write digest sidecars when this is empty.
    #[serde(default)]
    pub rebuild: Vec<String>,

    /// Signing argv run after zypper `content` is rewritten
    #[serde(default)]
    pub sign: Vec<String>,

    /// Debian `conf/distributions` label, zypper product name
    #[serde(default)]
    pub label: Option<String>,

    /// Installer kinds; empty means the built-in list
    #[serde(default)]
    pub kinds: Vec<InstallerKindSection>,
}

impl FormatSection {
    fn with_commands(rebuild: &[&str], sign: &[&str]) -> Self {
        Self {
            enabled: true,
            os_names: Vec::new(),
            exclude_os_names: Vec::new(),
            rebuild: rebuild.iter().map(|s| s.to_string()).collect(),
            sign: sign.iter().map(|s| s.to_string()).collect(),
            label: None,
            kinds: Vec::new(),
        }
    }

    fn deb() -> Self {
        Self::with_commands(&["reprepro", "--silent", "-b", "{path}", "export"], &[])
    }

    fn rpm() -> Self {
        Self::with_commands(&["createrepo", "-d", "{path}"], &[])
    }

    fn zypper() -> Self {
        Self::with_commands(
            &["create_package_descr", "-d", "RPMS", "-o", "setup/descr"],
            &["gpg", "--batch", "--yes", "--use-agent", "-ab", "content"],
        )
    }

    fn tarball() -> Self {
        Self::with_commands(&[], &[])
    }

    fn rebuilder(&self) -> Arc<dyn MetadataRebuilder> {
        Arc::new(CommandRebuilder::new(self.rebuild.clone()))
    }
}

/// One `[[tarball.kinds]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallerKindSection {
    pub name: String,
    pub subdir: String,
    /// Regex with `version` and `name` or `basename` groups
    pub pattern: String,
    /// File name of the `latest` alias, with `{group}` placeholders
    pub alias: String,
}

/// Object store publishing defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub compare_method: CompareMethod,

    /// Bucket used when none is given on the command line
    #[serde(default)]
    pub bucket: Option<String>,

    /// Local mirror directory standing in for an object store
    #[serde(default)]
    pub mirror: Option<PathBuf>,

    /// S3 region and optional custom endpoint
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            compare_method: CompareMethod::default(),
            bucket: None,
            mirror: None,
            region: default_region(),
            endpoint: None,
        }
    }
}

/// Advisories ledger written after promotions
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdvisoriesSection {
    /// Ledger file; no ledger is kept when unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub format: AdvisoryFormat,

    #[serde(default = "default_toolkit_version")]
    pub toolkit_version: String,
}

impl Default for AdvisoriesSection {
    fn default() -> Self {
        Self {
            path: None,
            format: AdvisoryFormat::default(),
            toolkit_version: default_toolkit_version(),
        }
    }
}

fn default_toolkit_version() -> String {
    "6.0".to_string()
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            Error::ConfigError(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/stagehand/config.toml`, or its platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("stagehand").join("config.toml"))
    }

    /// Load the default file when it exists, defaults otherwise
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => {
                debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.releases.is_empty() {
            return Err(Error::ConfigError("releases must not be empty".to_string()));
        }
        if self.releases.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::ConfigError(
                "releases must be listed from least to most stable without repeats".to_string(),
            ));
        }
        if self.sync.concurrency == 0 {
            return Err(Error::ConfigError("sync.concurrency must be at least 1".to_string()));
        }
        for kind in &self.tarball.kinds {
            regex::Regex::new(&kind.pattern).map_err(|e| {
                Error::ConfigError(format!("tarball kind {}: invalid pattern: {}", kind.name, e))
            })?;
        }
        Ok(())
    }

    /// Whether a channel is one of the configured releases
    pub fn has_release(&self, channel: Channel) -> bool {
        self.releases.contains(&channel)
    }

    /// Build a manager for every enabled format
    pub fn managers(&self) -> Result<Vec<Box<dyn RepositoryManager>>> {
        let mut managers: Vec<Box<dyn RepositoryManager>> = Vec::new();

        if self.deb.enabled {
            let mut distribution = DistributionTemplate::default();
            if let Some(label) = &self.deb.label {
                distribution.label = label.clone();
            }
            managers.push(Box::new(
                DebManager::new(&self.root, self.deb.rebuilder())
                    .with_os_filter(self.deb.os_names.clone(), self.deb.exclude_os_names.clone())
                    .with_distribution(distribution),
            ));
        }

        if self.rpm.enabled {
            managers.push(Box::new(
                RpmManager::new(&self.root, self.rpm.rebuilder())
                    .with_os_filter(self.rpm.os_names.clone(), self.rpm.exclude_os_names.clone()),
            ));
        }

        if self.zypper.enabled {
            let mut product = ProductInfo::default();
            if let Some(label) = &self.zypper.label {
                product.product = label.clone();
                product.vendor = label.clone();
            }
            let signer = Arc::new(CommandRebuilder::new(self.zypper.sign.clone()));
            managers.push(Box::new(
                ZypperManager::new(&self.root, self.zypper.rebuilder(), signer)
                    .with_os_filter(
                        self.zypper.os_names.clone(),
                        self.zypper.exclude_os_names.clone(),
                    )
                    .with_product(product),
            ));
        }

        if self.tarball.enabled {
            let mut manager = TarballManager::new(&self.root).with_os_filter(
                self.tarball.os_names.clone(),
                self.tarball.exclude_os_names.clone(),
            );
            if !self.tarball.rebuild.is_empty() {
                manager = manager.with_rebuilder(self.tarball.rebuilder());
            }
            if !self.tarball.kinds.is_empty() {
                let kinds = self
                    .tarball
                    .kinds
                    .iter()
                    .map(|k| InstallerKind::new(&k.name, &k.subdir, &k.pattern, &k.alias))
                    .collect::<Result<Vec<_>>>()?;
                manager = manager.with_kinds(kinds);
            }
            managers.push(Box::new(manager));
        }

        Ok(managers)
    }
}
