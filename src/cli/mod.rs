// src/cli/mod.rs
//! CLI definitions for stagehand
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `list` - Show the packages of a channel
//! - `promote` - Move the newest package families to a more stable channel
//! - `sync` - Publish a channel tree to an object store
//! - `delink` - Hard-link identical files under the repository root

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version)]
#[command(about = "Release channel promotion and publishing for package repositories", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/stagehand/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository root, overriding the configuration
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Log per-file decisions
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List packages in a channel
    List {
        /// Channel to list (unstable, testing, stable)
        #[arg(default_value = "unstable")]
        channel: String,

        /// Only packages with this name
        #[arg(short, long)]
        name: Option<String>,

        /// Only this OS, codename or installer kind
        #[arg(long)]
        os: Option<String>,

        /// Only the newest version of each package
        #[arg(long)]
        newest: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Promote package families from one channel to the next
    Promote {
        /// Family or package name (default: everything eligible)
        name: Option<String>,

        /// Source channel
        #[arg(long, default_value = "unstable")]
        from: String,

        /// Destination channel
        #[arg(long, default_value = "testing")]
        to: String,

        /// Only this OS, codename or installer kind
        #[arg(long)]
        os: Option<String>,

        /// Only this version
        #[arg(long)]
        version: Option<String>,

        /// Regex of package names to leave behind (repeatable)
        #[arg(short = 'x', long)]
        exclude: Vec<String>,

        /// Show what would be promoted without copying
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Re-publish families already at the same version
        #[arg(short, long)]
        force: bool,

        /// Skip the gpg-agent check
        #[arg(long)]
        no_sign_check: bool,

        /// Advisories ledger to extend with the promoted source packages
        #[arg(long)]
        advisories: Option<PathBuf>,

        /// Ledger format: txt, json
        #[arg(long)]
        advisories_format: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Publish a directory tree to an object store
    Sync {
        /// Directory to publish (default: the repository root)
        source: Option<PathBuf>,

        /// Destination bucket
        #[arg(short, long)]
        bucket: Option<String>,

        /// Key prefix
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Local directory standing in for the object store
        #[arg(long)]
        mirror: Option<PathBuf>,

        /// Remove remote objects that have no local file
        #[arg(long)]
        delete: bool,

        /// Comparison policy: checksum, size, modified, nocheck
        #[arg(long)]
        compare: Option<String>,

        /// With `--compare modified`: upload files changed after this RFC 3339 time
        #[arg(long)]
        since: Option<String>,

        /// Concurrent transfers
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Report actions without changing the store
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replace identical files with hard links
    Delink {
        /// Directory to scan (default: the repository root)
        path: Option<PathBuf>,

        /// Use the fast non-cryptographic hash
        #[arg(long)]
        fast: bool,
    },
}
