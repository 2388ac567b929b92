// src/repository/zypper.rs

//! Zypper (susetags) repositories
//!
//! Layout under `<root>/<channel>/rpm/sles/<release>/`:
//! - `RPMS/<arch>/*.rpm`
//! - `setup/descr/packages[.gz]` with `=Pkg:`, `=Src:` and `=Loc:` records
//! - `media.1/media`, `content` and its detached signature `content.asc`
//!
//! After the package descriptions are regenerated, `content` is rewritten
//! with a SHA-1 line for every description file and signed again.

use super::rebuild::MetadataRebuilder;
use super::staging;
use super::{require_artifact, subdirs, DirtyDirs, PackageQuery, RepoLayout, RepositoryManager};
use crate::error::{Error, Result};
use crate::hash::{hash_file, HashAlgorithm};
use crate::package::{Channel, Package, PackageFormat};
use crate::version::VersionKey;
use flate2::read::GzDecoder;
use std::fmt::Write as _;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Directories every zypper repository carries
const REPO_DIRS: &[&str] = &["media.1", "RPMS/noarch", "RPMS/src", "RPMS/x86_64"];

/// One package record of a susetags `packages` file
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SusetagsEntry {
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub source: Option<String>,
    pub location: String,
    /// Directory below `RPMS/` when it differs from the arch
    pub location_dir: Option<String>,
}

/// Parse a susetags `packages` description
pub fn parse_susetags(text: &str) -> Result<Vec<SusetagsEntry>> {
    let mut entries = Vec::new();
    let mut current: Option<SusetagsEntry> = None;

    for (lineno, line) in text.lines().enumerate() {
        let Some((tag, value)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = value.split_whitespace().collect();
        match tag {
            "=Pkg" => {
                let [name, version, release, arch] = fields[..] else {
                    return Err(Error::ParseError(format!(
                        "line {}: malformed =Pkg record",
                        lineno + 1
                    )));
                };
                if let Some(done) = current.take() {
                    entries.push(done);
                }
                current = Some(SusetagsEntry {
                    name: name.to_string(),
                    version: version.to_string(),
                    release: release.to_string(),
                    arch: arch.to_string(),
                    ..Default::default()
                });
            }
            "=Src" => {
                if let (Some(entry), Some(name)) = (current.as_mut(), fields.first()) {
                    entry.source = Some(name.to_string());
                }
            }
            "=Loc" => {
                if let Some(entry) = current.as_mut() {
                    let Some(location) = fields.get(1) else {
                        return Err(Error::ParseError(format!(
                            "line {}: malformed =Loc record",
                            lineno + 1
                        )));
                    };
                    entry.location = location.to_string();
                    entry.location_dir = fields.get(2).map(|d| d.to_string());
                }
            }
            _ => {}
        }
    }
    if let Some(done) = current {
        entries.push(done);
    }
    Ok(entries)
}

/// Header fields of the `content` file
#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub product: String,
    pub version: String,
    pub vendor: String,
}

impl Default for ProductInfo {
    fn default() -> Self {
        Self {
            product: "Stagehand".to_string(),
            version: "1".to_string(),
            vendor: "Stagehand".to_string(),
        }
    }
}

/// Manager for zypper repositories under `rpm/sles/`
pub struct ZypperManager {
    layout: RepoLayout,
    product: ProductInfo,
    rebuilder: Arc<dyn MetadataRebuilder>,
    signer: Arc<dyn MetadataRebuilder>,
    dirty: DirtyDirs,
}

impl ZypperManager {
    pub fn new(
        root: impl Into<PathBuf>,
        rebuilder: Arc<dyn MetadataRebuilder>,
        signer: Arc<dyn MetadataRebuilder>,
    ) -> Self {
        Self {
            layout: RepoLayout::new(root, "rpm/sles"),
            product: ProductInfo::default(),
            rebuilder,
            signer,
            dirty: DirtyDirs::default(),
        }
    }

    pub fn with_os_filter(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.layout = self.layout.with_os_filter(include, exclude);
        self
    }

    pub fn with_product(mut self, product: ProductInfo) -> Self {
        self.product = product;
        self
    }

    /// `sles/<release>` names present in a channel
    pub fn os_names(&self, channel: Channel) -> Result<Vec<String>> {
        let root = self.layout.existing_channel_root(channel)?;
        Ok(subdirs(&root)?
            .into_iter()
            .map(|release| format!("sles/{}", release))
            .filter(|os| self.layout.selects_os(os))
            .collect())
    }

    fn repo_dir(&self, channel: Channel, os: &str) -> PathBuf {
        let release = os.strip_prefix("sles/").unwrap_or(os);
        self.layout.channel_root(channel).join(release)
    }

    fn read_descr(descr_dir: &Path) -> Result<Option<(PathBuf, String)>> {
        let plain = descr_dir.join("packages");
        if plain.is_file() {
            return Ok(Some((plain.clone(), fs::read_to_string(&plain)?)));
        }
        let gz = descr_dir.join("packages.gz");
        if gz.is_file() {
            let mut text = String::new();
            GzDecoder::new(fs::File::open(&gz)?)
                .read_to_string(&mut text)
                .map_err(|e| Error::ParseError(format!("{}: {}", gz.display(), e)))?;
            return Ok(Some((gz, text)));
        }
        Ok(None)
    }

    fn scan_repo(&self, channel: Channel, os: &str) -> Result<Vec<Package>> {
        let repo = self.repo_dir(channel, os);
        let Some((catalog, text)) = Self::read_descr(&repo.join("setup/descr"))? else {
            debug!("No package descriptions in {}", repo.display());
            return Ok(Vec::new());
        };

        let mut packages = Vec::new();
        for entry in parse_susetags(&text)? {
            let dir = entry.location_dir.as_deref().unwrap_or(&entry.arch);
            let path = require_artifact(&catalog, repo.join("RPMS").join(dir).join(&entry.location))?;
            let version = if entry.release.is_empty() {
                entry.version.clone()
            } else {
                format!("{}-{}", entry.version, entry.release)
            };
            let source = if entry.arch == "src" {
                Some(entry.name.clone())
            } else {
                entry.source.clone()
            };
            packages.push(Package {
                name: entry.name,
                version: VersionKey::parse(&version)?,
                arch: entry.arch,
                os: os.to_string(),
                format: PackageFormat::Zypper,
                channel,
                path,
                source,
            });
        }
        Ok(packages)
    }

    fn prepare(&self, repo: &Path) -> Result<()> {
        for dir in REPO_DIRS {
            fs::create_dir_all(repo.join(dir))?;
        }
        let media = repo.join("media.1").join("media");
        if !media.exists() {
            let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
            fs::write(&media, format!("{}\n{}\n1\n", self.product.vendor, stamp))?;
        }
        Ok(())
    }

    /// Rewrite `content` with SHA-1 sums of the descriptions and the key
    fn write_content(&self, repo: &Path) -> Result<()> {
        let mut content = format!(
            "PRODUCT {product}\nVERSION {version}\nLABEL {product}\nVENDOR {vendor}\n\
             ARCH.x86_64 x86_64 noarch\nDEFAULTBASE x86_64\nDESCRDIR setup/descr\nDATADIR RPMS\n",
            product = self.product.product,
            version = self.product.version,
            vendor = self.product.vendor,
        );

        let descr = repo.join("setup").join("descr");
        let mut names: Vec<String> = Vec::new();
        if descr.is_dir() {
            for entry in fs::read_dir(&descr)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        for name in names {
            let sum = hash_file(HashAlgorithm::Sha1, &descr.join(&name))?;
            let _ = writeln!(content, "META SHA1 {}  {}", sum, name);
        }

        let key = repo.join("content.key");
        if key.is_file() {
            let sum = hash_file(HashAlgorithm::Sha1, &key)?;
            let _ = writeln!(content, "KEY SHA1 {}  content.key", sum);
        }

        let mut tmp = NamedTempFile::new_in(repo)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(repo.join("content")).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn rebuild_repo(&self, repo: &Path, force: bool) -> Result<()> {
        self.prepare(repo)?;
        self.rebuilder.rebuild(repo, force)?;
        self.write_content(repo)?;

        let signature = repo.join("content.asc");
        if signature.exists() {
            fs::remove_file(&signature)?;
        }
        self.signer.rebuild(repo, force)?;
        info!("Regenerated zypper metadata in {}", repo.display());
        Ok(())
    }
}

impl RepositoryManager for ZypperManager {
    fn format(&self) -> PackageFormat {
        PackageFormat::Zypper
    }

    fn channel_root(&self, channel: Channel) -> PathBuf {
        self.layout.channel_root(channel)
    }

    fn list_packages(&self, channel: Channel, query: &PackageQuery) -> Result<Vec<Package>> {
        let mut packages = Vec::new();
        for os in self.os_names(channel)? {
            if query.os.as_deref().is_some_and(|o| o != os) {
                continue;
            }
            packages.extend(self.scan_repo(channel, &os)?);
        }
        debug!("Found {} zypper packages in {}", packages.len(), channel);
        Ok(query.apply(packages))
    }

    fn copy_package(&self, package: &Package, from: Channel, to: Channel) -> Result<Package> {
        let dest = self.layout.rebase(&package.path, from, to)?;
        let plan = staging::copy_plan(&package.path, &dest, &[]);
        let written = staging::copy_all(&package.name, &plan)?;
        debug!("Copied {} ({} files) to {}", package.name, written, to);

        self.dirty.mark(to, self.repo_dir(to, &package.os));
        Ok(Package {
            channel: to,
            path: dest,
            ..package.clone()
        })
    }

    fn rebuild_metadata(&self, channel: Channel, force: bool) -> Result<()> {
        let all = || {
            Ok(self
                .os_names(channel)?
                .iter()
                .map(|os| self.repo_dir(channel, os))
                .collect())
        };
        self.dirty
            .rebuild_with(channel, force, all, |dir| self.rebuild_repo(dir, force))
    }

    fn requires_signing(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::rebuild::CommandRebuilder;
    use tempfile::TempDir;

    const PACKAGES: &str = "\
=Ver: 2.0
##----------------------------------------
=Pkg: globus-common 16.0 1.sles11 x86_64
=Grp: System/Libraries
=Src: globus-common 16.0 1.sles11 src
=Loc: 1 globus-common-16.0-1.sles11.x86_64.rpm
+Req:
libc.so.6
-Req:
##----------------------------------------
=Pkg: globus-common-doc 16.0 1.sles11 noarch
=Src: globus-common 16.0 1.sles11 src
=Loc: 1 globus-common-doc-16.0-1.sles11.noarch.rpm
##----------------------------------------
=Pkg: globus-common 16.0 1.sles11 src
=Loc: 1 globus-common-16.0-1.sles11.src.rpm
";

    fn tree(root: &Path) -> PathBuf {
        let repo = root.join("unstable/rpm/sles/11");
        fs::create_dir_all(repo.join("setup/descr")).unwrap();
        fs::write(repo.join("setup/descr/packages"), PACKAGES).unwrap();
        for (arch, file) in [
            ("x86_64", "globus-common-16.0-1.sles11.x86_64.rpm"),
            ("noarch", "globus-common-doc-16.0-1.sles11.noarch.rpm"),
            ("src", "globus-common-16.0-1.sles11.src.rpm"),
        ] {
            fs::create_dir_all(repo.join("RPMS").join(arch)).unwrap();
            fs::write(repo.join("RPMS").join(arch).join(file), file).unwrap();
        }
        fs::create_dir_all(root.join("stable")).unwrap();
        repo
    }

    fn manager(root: &Path) -> ZypperManager {
        ZypperManager::new(
            root,
            Arc::new(CommandRebuilder::new(["true"])),
            Arc::new(CommandRebuilder::new(["true"])),
        )
    }

    #[test]
    fn test_parse_susetags() {
        let entries = parse_susetags(PACKAGES).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "globus-common");
        assert_eq!(entries[0].source.as_deref(), Some("globus-common"));
        assert_eq!(entries[1].arch, "noarch");
        assert_eq!(entries[2].location, "globus-common-16.0-1.sles11.src.rpm");

        assert!(parse_susetags("=Pkg: broken 1.0\n").is_err());
    }

    #[test]
    fn test_list_packages() {
        let dir = TempDir::new().unwrap();
        tree(dir.path());
        let mgr = manager(dir.path());

        let pkgs = mgr.list_packages(Channel::Unstable, &PackageQuery::all()).unwrap();
        assert_eq!(pkgs.len(), 3);
        assert!(pkgs.iter().all(|p| p.os == "sles/11"));
        assert!(pkgs.iter().all(|p| p.family_name() == "globus-common"));
        assert!(mgr.requires_signing());
    }

    #[test]
    fn test_copy_and_rebuild_writes_content() {
        let dir = TempDir::new().unwrap();
        tree(dir.path());
        let mgr = manager(dir.path());

        let pkg = mgr
            .list_packages(
                Channel::Unstable,
                &PackageQuery::named("globus-common-doc"),
            )
            .unwrap()
            .remove(0);
        let copied = mgr.copy_package(&pkg, Channel::Unstable, Channel::Stable).unwrap();
        let repo = dir.path().join("stable/rpm/sles/11");
        assert_eq!(
            copied.path,
            repo.join("RPMS/noarch/globus-common-doc-16.0-1.sles11.noarch.rpm")
        );

        // The stub generator writes nothing; give content something to sum
        fs::create_dir_all(repo.join("setup/descr")).unwrap();
        fs::write(repo.join("setup/descr/packages"), "=Ver: 2.0\n").unwrap();
        mgr.rebuild_metadata(Channel::Stable, false).unwrap();

        let content = fs::read_to_string(repo.join("content")).unwrap();
        assert!(content.starts_with("PRODUCT Stagehand\n"));
        assert!(content.contains("META SHA1 "));
        assert!(content.contains("  packages\n"));
        assert!(repo.join("media.1/media").is_file());
        assert!(repo.join("RPMS/x86_64").is_dir());
    }
}
