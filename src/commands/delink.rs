// src/commands/delink.rs
//! Duplicate file linking

use anyhow::Result;
use stagehand::{Config, DuplicateLinker, HashAlgorithm};
use std::path::PathBuf;

/// Hard-link identical files under `path` (default: the repository root)
pub fn cmd_delink(config: &Config, path: Option<PathBuf>, fast: bool) -> Result<()> {
    let root = path.unwrap_or_else(|| config.root.clone());
    let algorithm = if fast {
        HashAlgorithm::Xxh128
    } else {
        HashAlgorithm::Sha256
    };

    let replaced = DuplicateLinker::new().with_algorithm(algorithm).delink(&root)?;
    println!("Linked {} duplicate files under {}", replaced, root.display());
    Ok(())
}
