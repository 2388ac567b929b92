// src/repository/deb.rs

//! Debian archives
//!
//! Layout under `<root>/<channel>/deb/`:
//! - `dists/<codename>/<component>/binary-<arch>/Packages[.gz]`
//! - `dists/<codename>/<component>/source/Sources[.gz]`
//! - `pool/...` holding the artifacts the indices point at
//! - `conf/distributions` describing every codename to the archive tool
//!
//! Binary packages are `.deb` files; source packages are `.dsc` files that
//! carry the rest of the source package (tarballs, diffs) in their `Files`
//! field, and every listed file is copied along with the `.dsc`.

use super::rebuild::MetadataRebuilder;
use super::staging;
use super::{require_artifact, subdirs, DirtyDirs, PackageQuery, RepoLayout, RepositoryManager};
use crate::error::{Error, Result};
use crate::package::{Channel, Package, PackageFormat};
use crate::version::VersionKey;
use flate2::read::GzDecoder;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One deb822 paragraph; continuation lines are joined with `\n`
pub type Stanza = BTreeMap<String, String>;

/// Parse deb822 text (`Packages`, `Sources`, `.dsc`, `conf/distributions`)
pub fn parse_stanzas(text: &str) -> Vec<Stanza> {
    let mut stanzas = Vec::new();
    let mut current = Stanza::new();
    let mut last_key: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                stanzas.push(std::mem::take(&mut current));
            }
            last_key = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(value) = last_key.as_ref().and_then(|k| current.get_mut(k)) {
                value.push('\n');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            current.insert(key.clone(), value.trim().to_string());
            last_key = Some(key);
        }
    }
    if !current.is_empty() {
        stanzas.push(current);
    }
    stanzas
}

/// Drop the clearsign wrapper around a signed `.dsc`
fn strip_pgp_armor(text: &str) -> String {
    if !text.starts_with("-----BEGIN PGP SIGNED MESSAGE-----") {
        return text.to_string();
    }
    text.lines()
        .skip_while(|l| !l.trim().is_empty())
        .skip(1)
        .take_while(|l| !l.starts_with("-----BEGIN PGP SIGNATURE-----"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// File names from a `Files` or `Checksums-*` field
fn listed_files(field: &str) -> Vec<String> {
    field
        .lines()
        .filter_map(|l| l.split_whitespace().nth(2))
        .map(str::to_string)
        .collect()
}

/// Fields of one `conf/distributions` entry
#[derive(Debug, Clone)]
pub struct DistributionTemplate {
    pub label: String,
    pub architectures: Vec<String>,
    pub components: Vec<String>,
}

impl Default for DistributionTemplate {
    fn default() -> Self {
        Self {
            label: "Stagehand".to_string(),
            architectures: vec!["amd64".into(), "i386".into(), "source".into()],
            components: vec!["contrib".into()],
        }
    }
}

impl DistributionTemplate {
    fn render(&self, codename: &str) -> String {
        format!(
            "\nLabel: {label}\nCodename: {codename}\nArchitectures: {arches}\n\
             Components: {components}\nDebIndices: Packages Release . .gz\n\
             DscIndices: Sources Release .gz\nSignWith: yes\n\
             Description: {label} packages\n",
            label = self.label,
            codename = codename,
            arches = self.architectures.join(" "),
            components = self.components.join(" "),
        )
    }
}

/// Manager for `deb/` archives
pub struct DebManager {
    layout: RepoLayout,
    distribution: DistributionTemplate,
    rebuilder: Arc<dyn MetadataRebuilder>,
    dirty: DirtyDirs,
}

impl DebManager {
    pub fn new(root: impl Into<PathBuf>, rebuilder: Arc<dyn MetadataRebuilder>) -> Self {
        Self {
            layout: RepoLayout::new(root, "deb"),
            distribution: DistributionTemplate::default(),
            rebuilder,
            dirty: DirtyDirs::default(),
        }
    }

    pub fn with_os_filter(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.layout = self.layout.with_os_filter(include, exclude);
        self
    }

    pub fn with_distribution(mut self, distribution: DistributionTemplate) -> Self {
        self.distribution = distribution;
        self
    }

    /// Codenames present under `dists/`, after the OS filter
    pub fn codenames(&self, channel: Channel) -> Result<Vec<String>> {
        let dists = self.layout.existing_channel_root(channel)?.join("dists");
        Ok(subdirs(&dists)?
            .into_iter()
            .filter(|c| self.layout.selects_os(c))
            .collect())
    }

    fn read_index(dir: &Path, base: &str) -> Result<Option<(PathBuf, String)>> {
        let plain = dir.join(base);
        if plain.is_file() {
            return Ok(Some((plain.clone(), fs::read_to_string(&plain)?)));
        }
        let gz = dir.join(format!("{}.gz", base));
        if gz.is_file() {
            let mut text = String::new();
            GzDecoder::new(fs::File::open(&gz)?)
                .read_to_string(&mut text)
                .map_err(|e| Error::ParseError(format!("{}: {}", gz.display(), e)))?;
            return Ok(Some((gz, text)));
        }
        Ok(None)
    }

    fn binary_package(
        &self,
        root: &Path,
        index: &Path,
        stanza: &Stanza,
        codename: &str,
        channel: Channel,
    ) -> Result<Option<Package>> {
        let (Some(name), Some(version), Some(filename)) = (
            stanza.get("Package"),
            stanza.get("Version"),
            stanza.get("Filename"),
        ) else {
            warn!("Skipping incomplete stanza in {}", index.display());
            return Ok(None);
        };

        let path = require_artifact(index, root.join(filename))?;
        // "Source: foo (1.2-1)" when the source version differs
        let source = stanza
            .get("Source")
            .and_then(|s| s.split_whitespace().next())
            .map(str::to_string);

        Ok(Some(Package {
            name: name.clone(),
            version: VersionKey::parse(version)?,
            arch: stanza
                .get("Architecture")
                .cloned()
                .unwrap_or_else(|| "all".to_string()),
            os: codename.to_string(),
            format: PackageFormat::Debian,
            channel,
            path,
            source,
        }))
    }

    fn source_package(
        &self,
        root: &Path,
        index: &Path,
        stanza: &Stanza,
        codename: &str,
        channel: Channel,
    ) -> Result<Option<Package>> {
        let (Some(name), Some(version), Some(directory), Some(files)) = (
            stanza.get("Package"),
            stanza.get("Version"),
            stanza.get("Directory"),
            stanza.get("Files"),
        ) else {
            warn!("Skipping incomplete source stanza in {}", index.display());
            return Ok(None);
        };

        let Some(dsc) = listed_files(files).into_iter().find(|f| f.ends_with(".dsc")) else {
            warn!("Source {} in {} lists no .dsc", name, index.display());
            return Ok(None);
        };

        let path = require_artifact(index, root.join(directory).join(dsc))?;
        Ok(Some(Package {
            name: name.clone(),
            version: VersionKey::parse(version)?,
            arch: "source".to_string(),
            os: codename.to_string(),
            format: PackageFormat::Debian,
            channel,
            path,
            source: Some(name.clone()),
        }))
    }

    /// The other files of a source package, read from its `.dsc`
    fn source_files(dsc: &Path) -> Result<Vec<PathBuf>> {
        let text = fs::read_to_string(dsc)?;
        let stanzas = parse_stanzas(&strip_pgp_armor(&text));
        let Some(files) = stanzas.first().and_then(|s| s.get("Files")) else {
            return Ok(Vec::new());
        };
        listed_files(files)
            .into_iter()
            .map(|f| require_artifact(dsc, dsc.with_file_name(f)))
            .collect()
    }

    /// Make sure `conf/distributions` describes `codename`
    fn ensure_distribution(&self, channel: Channel, codename: &str) -> Result<()> {
        let conf_dir = self.layout.channel_root(channel).join("conf");
        let conf = conf_dir.join("distributions");
        let existing = if conf.is_file() {
            fs::read_to_string(&conf)?
        } else {
            String::new()
        };

        let known = parse_stanzas(&existing)
            .iter()
            .any(|s| s.get("Codename").is_some_and(|c| c == codename));
        if known {
            return Ok(());
        }

        fs::create_dir_all(&conf_dir)?;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&conf)?;
        file.write_all(self.distribution.render(codename).as_bytes())?;
        info!("Added {} to {}", codename, conf.display());
        Ok(())
    }
}

impl RepositoryManager for DebManager {
    fn format(&self) -> PackageFormat {
        PackageFormat::Debian
    }

    fn channel_root(&self, channel: Channel) -> PathBuf {
        self.layout.channel_root(channel)
    }

    fn list_packages(&self, channel: Channel, query: &PackageQuery) -> Result<Vec<Package>> {
        let root = self.layout.existing_channel_root(channel)?;
        let mut packages = Vec::new();
        let mut seen = HashSet::new();

        for codename in self.codenames(channel)? {
            if query.os.as_deref().is_some_and(|o| o != codename) {
                continue;
            }
            let dist = root.join("dists").join(&codename);
            for component in subdirs(&dist)? {
                for index_dir in subdirs(&dist.join(&component))? {
                    let dir = dist.join(&component).join(&index_dir);
                    let (base, is_source) = if index_dir == "source" {
                        ("Sources", true)
                    } else if index_dir.starts_with("binary-") {
                        ("Packages", false)
                    } else {
                        continue;
                    };

                    let Some((index, text)) = Self::read_index(&dir, base)? else {
                        continue;
                    };
                    for stanza in parse_stanzas(&text) {
                        let pkg = if is_source {
                            self.source_package(&root, &index, &stanza, &codename, channel)?
                        } else {
                            self.binary_package(&root, &index, &stanza, &codename, channel)?
                        };
                        // arch "all" packages appear in every binary index
                        if let Some(pkg) = pkg
                            && seen.insert((codename.clone(), pkg.path.clone()))
                        {
                            packages.push(pkg);
                        }
                    }
                }
            }
        }

        debug!("Found {} debian packages in {}", packages.len(), channel);
        Ok(query.apply(packages))
    }

    fn copy_package(&self, package: &Package, from: Channel, to: Channel) -> Result<Package> {
        let dest = self.layout.rebase(&package.path, from, to)?;

        let mut extras = Vec::new();
        if package.arch == "source" {
            for file in Self::source_files(&package.path)? {
                if file == package.path {
                    continue;
                }
                let target = self.layout.rebase(&file, from, to)?;
                extras.push((file, target));
            }
        }

        let plan = staging::copy_plan(&package.path, &dest, &extras);
        let written = staging::copy_all(&package.name, &plan)?;
        debug!("Copied {} ({} files) to {}", package.name, written, to);

        self.ensure_distribution(to, &package.os)?;
        self.dirty.mark(to, self.layout.channel_root(to));

        Ok(Package {
            channel: to,
            path: dest,
            ..package.clone()
        })
    }

    fn rebuild_metadata(&self, channel: Channel, force: bool) -> Result<()> {
        let root = self.layout.channel_root(channel);
        let all = || Ok(if root.is_dir() { vec![root.clone()] } else { Vec::new() });
        self.dirty
            .rebuild_with(channel, force, all, |dir| self.rebuilder.rebuild(dir, force))
    }

    fn requires_signing(&self) -> bool {
        true
    }
}
