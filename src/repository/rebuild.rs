// src/repository/rebuild.rs

//! Metadata regeneration for repository directories
//!
//! Catalog generators (`createrepo`, `reprepro`, `create_package_descr`) are
//! external programs driven through [`CommandRebuilder`]. Installer trees
//! only need digest sidecars, which [`DigestRebuilder`] writes in-process.

use crate::error::{Error, Result};
use crate::hash::{hash_file, HashAlgorithm};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Regenerates the catalog of one repository directory
pub trait MetadataRebuilder: Send + Sync {
    fn rebuild(&self, repo_dir: &Path, force: bool) -> Result<()>;
}

/// Runs an external generator; `{path}` in any argument is replaced with
/// the repository directory
#[derive(Debug, Clone)]
pub struct CommandRebuilder {
    argv: Vec<String>,
}

impl CommandRebuilder {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    fn expand(&self, repo_dir: &Path) -> Vec<String> {
        let path = repo_dir.to_string_lossy();
        self.argv.iter().map(|a| a.replace("{path}", &path)).collect()
    }
}

impl MetadataRebuilder for CommandRebuilder {
    fn rebuild(&self, repo_dir: &Path, _force: bool) -> Result<()> {
        let args = self.expand(repo_dir);
        let Some((program, rest)) = args.split_first() else {
            debug!("No metadata command configured for {}", repo_dir.display());
            return Ok(());
        };

        let failed = |reason: String| Error::MetadataRebuildFailed {
            path: repo_dir.to_path_buf(),
            reason,
        };

        let binary =
            which::which(program).map_err(|e| failed(format!("{} not found: {}", program, e)))?;
        debug!("Running {} {}", binary.display(), rest.join(" "));

        let output = Command::new(&binary)
            .args(rest)
            .current_dir(repo_dir)
            .output()
            .map_err(|e| failed(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Writes `.md5`, `.sha1` and `.sha512` sidecars for every file in a
/// directory. Each sidecar holds `"<hex>  <basename>\n"`. Existing sidecars
/// are kept unless `force`.
#[derive(Debug, Clone, Default)]
pub struct DigestRebuilder;

impl DigestRebuilder {
    fn is_sidecar(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| super::staging::COMPANION_EXTENSIONS.contains(&e))
    }

    /// Write the sidecars of one file
    pub fn digest_file(path: &Path, force: bool) -> Result<usize> {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(0);
        };
        let dir = path.parent().unwrap_or(Path::new("."));

        let mut written = 0;
        for algorithm in HashAlgorithm::SIDECARS {
            let sidecar = dir.join(format!("{}.{}", name, algorithm.name()));
            if sidecar.exists() && !force {
                continue;
            }
            let digest = hash_file(algorithm, path)?;

            let mut tmp = NamedTempFile::new_in(dir)?;
            writeln!(tmp, "{}  {}", digest, name)?;
            tmp.persist(&sidecar).map_err(|e| Error::Io(e.error))?;
            written += 1;
        }
        Ok(written)
    }
}

impl MetadataRebuilder for DigestRebuilder {
    fn rebuild(&self, repo_dir: &Path, force: bool) -> Result<()> {
        if !repo_dir.is_dir() {
            fs::create_dir_all(repo_dir)?;
            return Ok(());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(repo_dir)? {
            let path = entry?.path();
            if path.is_file() && !Self::is_sidecar(&path) {
                files.push(path);
            }
        }
        files.sort();

        let mut written = 0;
        for path in files {
            match Self::digest_file(&path, force) {
                Ok(n) => written += n,
                Err(e) => {
                    warn!("Could not digest {}: {}", path.display(), e);
                    return Err(Error::MetadataRebuildFailed {
                        path: repo_dir.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        debug!("Wrote {} digest sidecars in {}", written, repo_dir.display());
        Ok(())
    }
}
