// src/commands/sync.rs
//! Object store publishing

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use stagehand::sync::{DirectoryObjectStore, SyncAction};
use stagehand::{CompareMethod, Config, ObjectStore, SyncEngine, SyncOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Options of `stagehand sync`
pub struct SyncArgs {
    pub source: Option<PathBuf>,
    pub bucket: Option<String>,
    pub prefix: String,
    pub mirror: Option<PathBuf>,
    pub delete: bool,
    pub compare: Option<String>,
    pub since: Option<String>,
    pub concurrency: Option<usize>,
    pub dry_run: bool,
    pub json: bool,
}

fn open_store(config: &Config, mirror: Option<PathBuf>) -> Result<Arc<dyn ObjectStore>> {
    match mirror.or_else(|| config.sync.mirror.clone()) {
        Some(mirror) => Ok(Arc::new(DirectoryObjectStore::new(mirror))),
        None => open_remote(config),
    }
}

#[cfg(feature = "s3")]
fn open_remote(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    let store = stagehand::sync::s3::S3ObjectStore::new(
        &config.sync.region,
        config.sync.endpoint.as_deref(),
    )?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "s3"))]
fn open_remote(_config: &Config) -> Result<Arc<dyn ObjectStore>> {
    anyhow::bail!("No object store: pass --mirror, set sync.mirror, or build with the s3 feature")
}

/// Publish a tree and print the actions taken
pub fn cmd_sync(config: &Config, args: SyncArgs) -> Result<()> {
    let source = args.source.unwrap_or_else(|| config.root.clone());
    let bucket = args
        .bucket
        .or_else(|| config.sync.bucket.clone())
        .context("No bucket: pass --bucket or set sync.bucket")?;

    let compare_method = match &args.compare {
        Some(name) => CompareMethod::from_str(name)
            .with_context(|| format!("Unknown compare method: {}", name))?,
        None => config.sync.compare_method,
    };
    let since = match &args.since {
        Some(text) => Some(
            DateTime::parse_from_rfc3339(text)
                .with_context(|| format!("Invalid --since time: {}", text))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let options = SyncOptions {
        bucket,
        prefix: args.prefix,
        dryrun: args.dry_run,
        delete: args.delete,
        compare_method,
        since,
        concurrency: args.concurrency.unwrap_or(config.sync.concurrency),
    };

    let engine = SyncEngine::new(open_store(config, args.mirror)?);
    let report = engine.sync(&source, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let prefix = if report.dryrun { "(dry run) " } else { "" };
        for action in &report.actions {
            match action {
                SyncAction::Upload { key, size } => println!("{}upload: {} ({} bytes)", prefix, key, size),
                SyncAction::Delete { key } => println!("{}delete: {}", prefix, key),
                SyncAction::Failed { key, error } => println!("failed: {}: {}", key, error),
                SyncAction::Skip { .. } => {}
            }
        }
        println!(
            "{} uploaded, {} unchanged, {} deleted, {} failed",
            report.uploaded().len(),
            report.skipped().len(),
            report.deleted().len(),
            report.failed().len()
        );
    }

    if report.cancelled {
        anyhow::bail!("Sync cancelled");
    }
    if !report.is_success() {
        anyhow::bail!("Sync finished with {} failures", report.failed().len());
    }
    Ok(())
}
