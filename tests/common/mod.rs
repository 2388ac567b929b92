// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use stagehand::repository::MetadataRebuilder;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const REPOMD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>1</revision>
  <data type="primary">
    <location href="repodata/primary.xml.gz"/>
  </data>
</repomd>
"#;

/// One rpm catalog entry: (name, arch, version, release)
pub type RpmEntry<'a> = (&'a str, &'a str, &'a str, &'a str);

/// Create an empty channel tree with all three channel directories.
///
/// Returns the TempDir - keep it alive to prevent cleanup.
pub fn channel_tree() -> TempDir {
    let temp_dir = tempfile::tempdir().unwrap();
    for channel in ["unstable", "testing", "stable"] {
        fs::create_dir_all(temp_dir.path().join(channel)).unwrap();
    }
    temp_dir
}

/// Write a file, creating its parent directories
pub fn write_file(path: &Path, data: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// Place a source tarball under `<channel>/installers/src/`
pub fn source_tarball(root: &Path, channel: &str, file: &str, data: &str) -> PathBuf {
    let path = root.join(channel).join("installers/src").join(file);
    write_file(&path, data.as_bytes());
    path
}

/// Write a yum repository: repomd.xml, a gzip primary catalog and the
/// rpm files it references
pub fn rpm_repo(dir: &Path, entries: &[RpmEntry<'_>]) {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
"#,
    );
    for (name, arch, ver, rel) in entries {
        xml.push_str(&format!(
            r#"<package type="rpm">
  <name>{name}</name>
  <arch>{arch}</arch>
  <version epoch="0" ver="{ver}" rel="{rel}"/>
  <location href="{name}-{ver}-{rel}.{arch}.rpm"/>
  <format>
    <rpm:sourcerpm>{name}-{ver}-{rel}.src.rpm</rpm:sourcerpm>
  </format>
</package>
"#
        ));
    }
    xml.push_str("</metadata>\n");

    fs::create_dir_all(dir.join("repodata")).unwrap();
    fs::write(dir.join("repodata/repomd.xml"), REPOMD).unwrap();
    let mut gz = GzEncoder::new(
        fs::File::create(dir.join("repodata/primary.xml.gz")).unwrap(),
        Compression::default(),
    );
    gz.write_all(xml.as_bytes()).unwrap();
    gz.finish().unwrap();

    for (name, arch, ver, rel) in entries {
        let file = dir.join(format!("{name}-{ver}-{rel}.{arch}.rpm"));
        fs::write(file, format!("{name} {ver}-{rel}").as_bytes()).unwrap();
    }
}

/// Rebuilder that records the directories it was asked to rebuild
#[derive(Default)]
pub struct RecordingRebuilder {
    dirs: Mutex<Vec<PathBuf>>,
}

impl RecordingRebuilder {
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().clone()
    }
}

impl MetadataRebuilder for RecordingRebuilder {
    fn rebuild(&self, repo_dir: &Path, _force: bool) -> stagehand::Result<()> {
        self.dirs.lock().push(repo_dir.to_path_buf());
        Ok(())
    }
}

/// Relative paths of every regular file below `root`, sorted
pub fn files_under(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    files.sort();
    files
}
