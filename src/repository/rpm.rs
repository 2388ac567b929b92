// src/repository/rpm.rs

//! Yum repositories
//!
//! Layout under `<root>/<channel>/rpm/`: one repository per
//! `<distro>/<release>/<arch>` directory, e.g. `el/7/x86_64` or
//! `fedora/25/SRPMS`. Each repository is indexed by `repodata/repomd.xml`,
//! which points at the `primary` catalog. The `sles` tree belongs to the
//! zypper manager and is skipped here.
//!
//! Architecture-independent packages (`noarch`, and the 32-bit x86 builds
//! shipped alongside 64-bit repositories) are published into every binary
//! architecture of their OS release.

use super::rebuild::MetadataRebuilder;
use super::staging;
use super::{require_artifact, subdirs, DirtyDirs, PackageQuery, RepoLayout, RepositoryManager};
use crate::error::{Error, Result};
use crate::package::{Channel, Package, PackageFormat};
use crate::version::VersionKey;
use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::ffi::OsStr;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Directory name of source RPM repositories
const SOURCE_ARCH_DIR: &str = "SRPMS";

/// File suffixes published into every binary architecture
const SHARED_ARCH_SUFFIXES: &[&str] = &[".noarch.rpm", ".i686.rpm", ".i386.rpm"];

/// One `<package>` entry of a primary catalog
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PrimaryEntry {
    pub name: String,
    pub arch: String,
    pub epoch: String,
    pub ver: String,
    pub rel: String,
    pub href: String,
    pub sourcerpm: String,
}

impl PrimaryEntry {
    /// `[epoch:]ver[-rel]`, omitting a zero epoch
    pub fn version_string(&self) -> String {
        let mut s = String::new();
        if !self.epoch.is_empty() && self.epoch.trim_start_matches('0') != "" {
            s.push_str(&self.epoch);
            s.push(':');
        }
        s.push_str(&self.ver);
        if !self.rel.is_empty() {
            s.push('-');
            s.push_str(&self.rel);
        }
        s
    }
}

/// Name of the source package from a file name like `foo-1.0-1.el7.src.rpm`
pub fn srpm_name(sourcerpm: &str) -> Option<String> {
    let stem = sourcerpm
        .strip_suffix(".src.rpm")
        .or_else(|| sourcerpm.strip_suffix(".nosrc.rpm"))?;
    let mut parts = stem.rsplitn(3, '-');
    let (_rel, _ver, name) = (parts.next()?, parts.next()?, parts.next()?);
    (!name.is_empty()).then(|| name.to_string())
}

fn xml_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::ParseError(format!("{}: {}", path.display(), e))
}

fn attribute(element: &BytesStart<'_>, key: &str, path: &Path) -> Result<Option<String>> {
    match element
        .try_get_attribute(key)
        .map_err(|e| xml_error(path, e))?
    {
        Some(attr) => Ok(Some(
            attr.unescape_value()
                .map_err(|e| xml_error(path, e))?
                .into_owned(),
        )),
        None => Ok(None),
    }
}

/// Location of the primary catalog named by `repomd.xml`
pub fn primary_href(repomd: &str, path: &Path) -> Result<Option<String>> {
    let mut reader = Reader::from_str(repomd);
    reader.trim_text(true);
    let mut in_primary = false;

    loop {
        match reader.read_event().map_err(|e| xml_error(path, e))? {
            Event::Start(e) if e.local_name().as_ref() == b"data" => {
                in_primary = attribute(&e, "type", path)?.as_deref() == Some("primary");
            }
            Event::Start(e) | Event::Empty(e)
                if in_primary && e.local_name().as_ref() == b"location" =>
            {
                return attribute(&e, "href", path);
            }
            Event::End(e) if e.local_name().as_ref() == b"data" => in_primary = false,
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

#[derive(Clone, Copy)]
enum TextField {
    Name,
    Arch,
    SourceRpm,
}

/// Parse the `<package>` entries of a primary catalog
pub fn parse_primary(xml: &str, path: &Path) -> Result<Vec<PrimaryEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<PrimaryEntry> = None;
    let mut field: Option<TextField> = None;

    loop {
        match reader.read_event().map_err(|e| xml_error(path, e))? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"package" => current = Some(PrimaryEntry::default()),
                b"name" => field = Some(TextField::Name),
                b"arch" => field = Some(TextField::Arch),
                b"sourcerpm" => field = Some(TextField::SourceRpm),
                b"version" | b"location" => {
                    if let Some(entry) = current.as_mut() {
                        read_attributes(&e, entry, path)?;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    read_attributes(&e, entry, path)?;
                }
            }
            Event::Text(t) => {
                if let (Some(f), Some(entry)) = (field, current.as_mut()) {
                    let text = t.unescape().map_err(|e| xml_error(path, e))?.into_owned();
                    match f {
                        TextField::Name => entry.name = text,
                        TextField::Arch => entry.arch = text,
                        TextField::SourceRpm => entry.sourcerpm = text,
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"package" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                b"name" | b"arch" | b"sourcerpm" => field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(entries)
}

fn read_attributes(e: &BytesStart<'_>, entry: &mut PrimaryEntry, path: &Path) -> Result<()> {
    match e.local_name().as_ref() {
        b"version" => {
            entry.epoch = attribute(e, "epoch", path)?.unwrap_or_default();
            entry.ver = attribute(e, "ver", path)?.unwrap_or_default();
            entry.rel = attribute(e, "rel", path)?.unwrap_or_default();
        }
        b"location" => entry.href = attribute(e, "href", path)?.unwrap_or_default(),
        _ => {}
    }
    Ok(())
}

/// Read a catalog, decompressing `.gz`
fn read_catalog(path: &Path) -> Result<String> {
    let file = fs::File::open(path)?;
    let mut text = String::new();
    match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => {
            GzDecoder::new(file)
                .read_to_string(&mut text)
                .map_err(|e| xml_error(path, e))?;
        }
        Some("xml") => {
            let mut file = file;
            file.read_to_string(&mut text)?;
        }
        Some(other) => {
            return Err(Error::ParseError(format!(
                "{}: unsupported catalog compression '{}'",
                path.display(),
                other
            )));
        }
        None => return Err(xml_error(path, "catalog has no extension")),
    }
    Ok(text)
}

/// Manager for yum repositories under `rpm/`
pub struct RpmManager {
    layout: RepoLayout,
    rebuilder: Arc<dyn MetadataRebuilder>,
    dirty: DirtyDirs,
}

impl RpmManager {
    pub fn new(root: impl Into<PathBuf>, rebuilder: Arc<dyn MetadataRebuilder>) -> Self {
        Self {
            layout: RepoLayout::new(root, "rpm"),
            rebuilder,
            dirty: DirtyDirs::default(),
        }
    }

    pub fn with_os_filter(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.layout = self.layout.with_os_filter(include, exclude);
        self
    }

    /// `<distro>/<release>` names present in a channel, after the OS filter
    pub fn os_names(&self, channel: Channel) -> Result<Vec<String>> {
        let root = self.layout.existing_channel_root(channel)?;
        let mut names = Vec::new();
        for distro in subdirs(&root)? {
            if distro == "sles" {
                continue;
            }
            for release in subdirs(&root.join(&distro))? {
                let os = format!("{}/{}", distro, release);
                if self.layout.selects_os(&os) {
                    names.push(os);
                }
            }
        }
        Ok(names)
    }

    /// Repository directories of one OS release: `(arch label, dir)`
    fn repos(&self, channel: Channel, os: &str) -> Result<Vec<(String, PathBuf)>> {
        let os_dir = self.layout.channel_root(channel).join(os);
        Ok(subdirs(&os_dir)?
            .into_iter()
            .map(|dir| {
                let label = if dir == SOURCE_ARCH_DIR {
                    "src".to_string()
                } else {
                    dir.clone()
                };
                (label, os_dir.join(dir))
            })
            .collect())
    }

    fn scan_repo(
        &self,
        repo_dir: &Path,
        arch: &str,
        os: &str,
        channel: Channel,
    ) -> Result<Vec<Package>> {
        let repomd_path = repo_dir.join("repodata").join("repomd.xml");
        if !repomd_path.is_file() {
            debug!("No repodata in {}, treating as empty", repo_dir.display());
            return Ok(Vec::new());
        }

        let repomd = fs::read_to_string(&repomd_path)?;
        let Some(href) = primary_href(&repomd, &repomd_path)? else {
            return Err(xml_error(&repomd_path, "no primary catalog listed"));
        };
        let primary_path = require_artifact(&repomd_path, repo_dir.join(href))?;
        let entries = parse_primary(&read_catalog(&primary_path)?, &primary_path)?;

        let mut packages = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = require_artifact(&primary_path, repo_dir.join(&entry.href))?;
            let source = if entry.arch == "src" || entry.arch == "nosrc" {
                Some(entry.name.clone())
            } else {
                srpm_name(&entry.sourcerpm)
            };
            packages.push(Package {
                name: entry.name.clone(),
                version: VersionKey::parse(&entry.version_string())?,
                arch: arch.to_string(),
                os: os.to_string(),
                format: PackageFormat::Rpm,
                channel,
                path,
                source,
            });
        }
        Ok(packages)
    }

    fn is_shared_arch(path: &Path) -> bool {
        path.file_name()
            .map(|n| n.to_string_lossy())
            .is_some_and(|n| SHARED_ARCH_SUFFIXES.iter().any(|s| n.ends_with(s)))
    }
}

impl RepositoryManager for RpmManager {
    fn format(&self) -> PackageFormat {
        PackageFormat::Rpm
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
            for (arch, dir) in self.repos(channel, &os)? {
                packages.extend(self.scan_repo(&dir, &arch, &os, channel)?);
            }
        }
        debug!("Found {} rpm packages in {}", packages.len(), channel);
        Ok(query.apply(packages))
    }

    fn copy_package(&self, package: &Package, from: Channel, to: Channel) -> Result<Package> {
        let dest = self.layout.rebase(&package.path, from, to)?;

        // Path below the arch directory, e.g. "Packages/f/foo.noarch.rpm"
        let os_dir = self.layout.channel_root(from).join(&package.os);
        let rel = package
            .path
            .strip_prefix(&os_dir)
            .map_err(|_| Error::CopyFailed {
                package: package.name.clone(),
                reason: format!("{} is not inside {}", package.path.display(), os_dir.display()),
            })?;
        let mut components = rel.components();
        let arch_dir = components.next().map(|c| c.as_os_str().to_os_string());
        let in_repo: PathBuf = components.collect();

        let dest_os_dir = self.layout.channel_root(to).join(&package.os);
        let mut repo_dirs = vec![dest_os_dir.join(arch_dir.clone().unwrap_or_default())];
        let mut extras = Vec::new();

        if Self::is_shared_arch(&package.path) {
            let mut siblings = subdirs(&os_dir)?;
            siblings.extend(subdirs(&dest_os_dir)?);
            siblings.sort();
            siblings.dedup();
            for sibling in siblings {
                if sibling == SOURCE_ARCH_DIR
                    || sibling == "src"
                    || arch_dir.as_deref() == Some(OsStr::new(&sibling))
                {
                    continue;
                }
                let repo = dest_os_dir.join(&sibling);
                for (src, target) in staging::copy_plan(&package.path, &repo.join(&in_repo), &[]) {
                    extras.push((src, target));
                }
                repo_dirs.push(repo);
            }
        }

        let plan = staging::copy_plan(&package.path, &dest, &extras);
        let written = staging::copy_all(&package.name, &plan)?;
        debug!("Copied {} ({} files) to {}", package.name, written, to);

        for repo in repo_dirs {
            self.dirty.mark(to, repo);
        }

        Ok(Package {
            channel: to,
            path: dest,
            ..package.clone()
        })
    }

    fn rebuild_metadata(&self, channel: Channel, force: bool) -> Result<()> {
        let all = || {
            let mut dirs = Vec::new();
            for os in self.os_names(channel)? {
                dirs.extend(self.repos(channel, &os)?.into_iter().map(|(_, d)| d));
            }
            Ok(dirs)
        };
        self.dirty
            .rebuild_with(channel, force, all, |dir| self.rebuilder.rebuild(dir, force))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::rebuild::CommandRebuilder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    const REPOMD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <revision>1</revision>
  <data type="filelists">
    <location href="repodata/filelists.xml.gz"/>
  </data>
  <data type="primary">
    <checksum type="sha256">abc</checksum>
    <location href="repodata/primary.xml.gz"/>
  </data>
</repomd>
"#;

    fn primary(entries: &[(&str, &str, &str, &str, &str)]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="1">
"#,
        );
        for (name, arch, ver, rel, src) in entries {
            xml.push_str(&format!(
                r#"<package type="rpm">
  <name>{name}</name>
  <arch>{arch}</arch>
  <version epoch="0" ver="{ver}" rel="{rel}"/>
  <location href="{name}-{ver}-{rel}.{arch}.rpm"/>
  <format>
    <rpm:license>ASL 2.0</rpm:license>
    <rpm:sourcerpm>{src}</rpm:sourcerpm>
    <rpm:provides><rpm:entry name="{name}" flags="EQ" ver="{ver}"/></rpm:provides>
  </format>
</package>
"#
            ));
        }
        xml.push_str("</metadata>\n");
        xml
    }

    fn repo(dir: &Path, entries: &[(&str, &str, &str, &str, &str)]) {
        fs::create_dir_all(dir.join("repodata")).unwrap();
        fs::write(dir.join("repodata/repomd.xml"), REPOMD).unwrap();
        let mut gz = GzEncoder::new(
            fs::File::create(dir.join("repodata/primary.xml.gz")).unwrap(),
            Compression::default(),
        );
        gz.write_all(primary(entries).as_bytes()).unwrap();
        gz.finish().unwrap();
        for (name, arch, ver, rel, _) in entries {
            fs::write(dir.join(format!("{name}-{ver}-{rel}.{arch}.rpm")), name.as_bytes()).unwrap();
        }
    }

    fn tree(root: &Path) {
        let el7 = root.join("unstable/rpm/el/7");
        repo(
            &el7.join("x86_64"),
            &[
                ("globus-common", "x86_64", "16.0", "1.el7", "globus-common-16.0-1.el7.src.rpm"),
                ("globus-common-doc", "noarch", "16.0", "1.el7", "globus-common-16.0-1.el7.src.rpm"),
            ],
        );
        repo(&el7.join("SRPMS"), &[("globus-common", "src", "16.0", "1.el7", "")]);
        fs::create_dir_all(el7.join("i386")).unwrap();
        fs::create_dir_all(root.join("unstable/rpm/sles/11")).unwrap();
        fs::create_dir_all(root.join("stable")).unwrap();
    }

    fn manager(root: &Path) -> RpmManager {
        RpmManager::new(root, Arc::new(CommandRebuilder::new(["true"])))
    }

    #[test]
    fn test_srpm_name() {
        assert_eq!(
            srpm_name("globus-gram-job-manager-15.0-1.el7.src.rpm").as_deref(),
            Some("globus-gram-job-manager")
        );
        assert_eq!(srpm_name("foo.rpm"), None);
        assert_eq!(srpm_name("1.0-1.src.rpm"), None);
    }

    #[test]
    fn test_version_string() {
        let mut entry = PrimaryEntry {
            epoch: "0".into(),
            ver: "1.0".into(),
            rel: "2.el7".into(),
            ..Default::default()
        };
        assert_eq!(entry.version_string(), "1.0-2.el7");
        entry.epoch = "3".into();
        assert_eq!(entry.version_string(), "3:1.0-2.el7");
    }

    #[test]
    fn test_primary_parsing() {
        let path = Path::new("primary.xml");
        assert_eq!(
            primary_href(REPOMD, path).unwrap().as_deref(),
            Some("repodata/primary.xml.gz")
        );

        let entries = parse_primary(
            &primary(&[("foo", "x86_64", "1.0", "1", "foo-1.0-1.src.rpm")]),
            path,
        )
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "foo");
        assert_eq!(entries[0].href, "foo-1.0-1.x86_64.rpm");
        assert_eq!(entries[0].sourcerpm, "foo-1.0-1.src.rpm");
    }

    #[test]
    fn test_list_skips_sles_and_labels_sources() {
        let dir = TempDir::new().unwrap();
        tree(dir.path());
        let mgr = manager(dir.path());

        assert_eq!(mgr.os_names(Channel::Unstable).unwrap(), vec!["el/7"]);
        let pkgs = mgr.list_packages(Channel::Unstable, &PackageQuery::all()).unwrap();
        assert_eq!(pkgs.len(), 3);

        let src = pkgs.iter().find(|p| p.arch == "src").unwrap();
        assert_eq!(src.source.as_deref(), Some("globus-common"));
        let doc = pkgs.iter().find(|p| p.name == "globus-common-doc").unwrap();
        assert_eq!(doc.arch, "x86_64");
        assert_eq!(doc.family_name(), "globus-common");
    }

    #[test]
    fn test_noarch_fans_out() {
        let dir = TempDir::new().unwrap();
        tree(dir.path());
        let mgr = manager(dir.path());

        let doc = mgr
            .list_packages(Channel::Unstable, &PackageQuery::named("globus-common-doc"))
            .unwrap()
            .remove(0);
        let copied = mgr.copy_package(&doc, Channel::Unstable, Channel::Stable).unwrap();

        let el7 = dir.path().join("stable/rpm/el/7");
        assert_eq!(copied.path, el7.join("x86_64/globus-common-doc-16.0-1.el7.noarch.rpm"));
        assert!(el7.join("i386/globus-common-doc-16.0-1.el7.noarch.rpm").is_file());
        assert!(!el7.join("SRPMS").exists());
    }

    #[test]
    fn test_missing_rpm_is_reported() {
        let dir = TempDir::new().unwrap();
        tree(dir.path());
        fs::remove_file(
            dir.path()
                .join("unstable/rpm/el/7/x86_64/globus-common-16.0-1.el7.x86_64.rpm"),
        )
        .unwrap();
        assert!(matches!(
            manager(dir.path()).list_packages(Channel::Unstable, &PackageQuery::all()),
            Err(Error::ArtifactMissing { .. })
        ));
    }
}
