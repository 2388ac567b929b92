// src/commands/list.rs
//! Channel listing

use super::parse_channel;
use anyhow::Result;
use stagehand::{Config, Package, PackageQuery};
use tracing::{info, warn};

/// List the packages of a channel across every enabled format
pub fn cmd_list(
    config: &Config,
    channel: &str,
    name: Option<String>,
    os: Option<String>,
    newest: bool,
    json: bool,
) -> Result<()> {
    let channel = parse_channel(config, channel)?;
    info!("Listing {} under {}", channel, config.root.display());

    let query = PackageQuery {
        name,
        version: None,
        os,
        newest_only: newest,
    };

    let mut packages: Vec<Package> = Vec::new();
    for manager in config.managers()? {
        match manager.list_packages(channel, &query) {
            Ok(found) => packages.extend(found),
            Err(e) => warn!("Cannot list {} packages: {}", manager.format(), e),
        }
    }
    packages.sort_by(|a, b| {
        (a.format, &a.os, &a.name, &a.version, &a.arch).cmp(&(b.format, &b.os, &b.name, &b.version, &b.arch))
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&packages)?);
        return Ok(());
    }

    if packages.is_empty() {
        println!("No packages in {}", channel);
        return Ok(());
    }
    for pkg in &packages {
        println!(
            "  {:<8} {:<12} {:<40} {:<24} {}",
            pkg.format.to_string(),
            pkg.os,
            pkg.name,
            pkg.version.to_string(),
            pkg.arch
        );
    }
    println!("{} packages", packages.len());
    Ok(())
}
