// src/repository/staging.rs

//! Staged multi-file copies into a channel
//!
//! All files of one package are written under temporary names in their
//! destination directories first. Only when every file is staged are they
//! renamed into place, so a failed copy never leaves a half-published
//! package behind.

use crate::error::{Error, Result};
use crate::hash::files_identical;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Detached signatures and digests that travel with an artifact
pub(crate) const COMPANION_EXTENSIONS: &[&str] = &["asc", "sig", "md5", "sha1", "sha256", "sha512"];

/// Existing companion files of an artifact, e.g. `foo.tar.gz.sha512`
pub(crate) fn companions(artifact: &Path) -> Vec<PathBuf> {
    let Some(name) = artifact.file_name() else {
        return Vec::new();
    };
    COMPANION_EXTENSIONS
        .iter()
        .map(|ext| {
            let mut companion = name.to_os_string();
            companion.push(".");
            companion.push(ext);
            artifact.with_file_name(companion)
        })
        .filter(|p| p.is_file())
        .collect()
}

/// Source and destination of every file of a package: the artifact plus
/// its companions, plus any format-specific extras
pub(crate) fn copy_plan(src: &Path, dest: &Path, extras: &[(PathBuf, PathBuf)]) -> Vec<(PathBuf, PathBuf)> {
    let mut plan = vec![(src.to_path_buf(), dest.to_path_buf())];
    for companion in companions(src) {
        if let Some(name) = companion.file_name() {
            plan.push((companion.clone(), dest.with_file_name(name)));
        }
    }
    plan.extend(extras.iter().cloned());
    plan
}

fn stage(src: &Path, dest: &Path) -> io::Result<NamedTempFile> {
    let dir = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    let mut input = fs::File::open(src)?;
    io::copy(&mut input, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    fs::set_permissions(staged.path(), fs::metadata(src)?.permissions())?;
    Ok(staged)
}

/// Copy every `(src, dest)` pair, skipping destinations that already hold
/// identical bytes. Returns the number of files written.
pub(crate) fn copy_all(package: &str, plan: &[(PathBuf, PathBuf)]) -> Result<usize> {
    let fail = |path: &Path, e: io::Error| Error::CopyFailed {
        package: package.to_string(),
        reason: format!("{}: {}", path.display(), e),
    };

    let mut staged = Vec::new();
    for (src, dest) in plan {
        if dest.is_file() && files_identical(src, dest).map_err(|e| fail(dest, e))? {
            debug!("{} already present, not copying", dest.display());
            continue;
        }
        let tmp = stage(src, dest).map_err(|e| fail(dest, e))?;
        staged.push((tmp, dest));
    }

    let written = staged.len();
    for (tmp, dest) in staged {
        tmp.persist(dest).map_err(|e| fail(dest, e.error))?;
        debug!("Published {}", dest.display());
    }
    Ok(written)
}
