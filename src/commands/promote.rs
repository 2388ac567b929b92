// src/commands/promote.rs
//! Channel promotion

use super::parse_channel;
use anyhow::{Context, Result};
use stagehand::repository::{GpgAgentCheck, SigningCheck, SkipSigningCheck};
use stagehand::{
    AdvisoryFormat, AdvisoryLedger, Config, PromotionEngine, PromotionReport, PromotionRequest,
    VersionKey,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Options of `stagehand promote`
pub struct PromoteArgs {
    pub name: Option<String>,
    pub from: String,
    pub to: String,
    pub os: Option<String>,
    pub version: Option<String>,
    pub exclude: Vec<String>,
    pub dry_run: bool,
    pub force: bool,
    pub no_sign_check: bool,
    pub advisories: Option<PathBuf>,
    pub advisories_format: Option<String>,
    pub json: bool,
}

/// Promote families and print what moved
pub fn cmd_promote(config: &Config, args: PromoteArgs) -> Result<()> {
    let from = parse_channel(config, &args.from)?;
    let to = parse_channel(config, &args.to)?;

    let mut request = PromotionRequest::new(from, to)
        .dryrun(args.dry_run)
        .force(args.force);
    if let Some(name) = args.name {
        request = request.with_name(name);
    }
    if let Some(os) = args.os {
        request = request.with_os(os);
    }
    if let Some(version) = &args.version {
        let version = VersionKey::parse(version)
            .with_context(|| format!("Invalid version: {}", version))?;
        request = request.with_version(version);
    }
    for pattern in &args.exclude {
        request = request
            .with_exclude(pattern)
            .with_context(|| format!("Invalid exclude pattern: {}", pattern))?;
    }

    let signing: Box<dyn SigningCheck> = if args.no_sign_check {
        Box::new(SkipSigningCheck)
    } else {
        Box::new(GpgAgentCheck)
    };
    let engine = PromotionEngine::new(config.managers()?, signing);
    let report = engine.promote(&request)?;
    let added = if report.dryrun {
        None
    } else {
        record_advisories(
            config,
            args.advisories.as_deref(),
            args.advisories_format.as_deref(),
            &report,
        )?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let verb = if report.dryrun { "Would promote" } else { "Promoted" };
        let promoted = report.promoted();
        if promoted.is_empty() {
            println!("Nothing to promote from {} to {}", from, to);
        } else {
            println!("{} {} packages from {} to {}:", verb, promoted.len(), from, to);
            for pkg in promoted {
                println!("  [{}] {} {} ({}, {})", pkg.format, pkg.name, pkg.version, pkg.os, pkg.arch);
            }
        }
        for failure in &report.failures {
            println!("  FAILED {} {}: {}", failure.package.name, failure.package.version, failure.error);
        }
        for failure in &report.format_failures {
            println!("  SKIPPED {}: {}", failure.format, failure.error);
        }
        for failure in &report.rebuild_failures {
            println!("  METADATA {}: {}", failure.format, failure.error);
        }
        for pkg in report.pending() {
            println!("  PENDING {} {} (copied, catalog not rebuilt)", pkg.name, pkg.version);
        }
        if let Some(added) = added.filter(|a| !a.is_empty()) {
            println!("New advisories:");
            print!("{}", added);
        }
    }

    if !report.is_success() {
        anyhow::bail!(
            "Promotion from {} to {} finished with {} failures",
            from,
            to,
            report.failures.len() + report.format_failures.len() + report.rebuild_failures.len()
        );
    }
    Ok(())
}

/// Extend the advisories ledger with what this run published. Returns the
/// new ledger lines, or `None` when no ledger is configured.
fn record_advisories(
    config: &Config,
    path: Option<&Path>,
    format_name: Option<&str>,
    report: &PromotionReport,
) -> Result<Option<String>> {
    let Some(path) = path.or(config.advisories.path.as_deref()) else {
        return Ok(None);
    };
    let format = match format_name {
        Some(name) => AdvisoryFormat::from_str(name)
            .with_context(|| format!("Unknown advisories format: {}", name))?,
        None => config.advisories.format,
    };

    let mut ledger = AdvisoryLedger::load(path, format)
        .with_context(|| format!("Failed to read advisories from {}", path.display()))?;
    let count = ledger.add_promoted(report.promoted(), &config.advisories.toolkit_version);
    if count > 0 {
        ledger
            .save(path, format)
            .with_context(|| format!("Failed to write advisories to {}", path.display()))?;
        info!("Added {} advisories to {}", count, path.display());
    }
    Ok(Some(ledger.new_to_text()))
}
