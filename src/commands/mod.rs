// src/commands/mod.rs
//! Command handlers for the stagehand CLI

mod delink;
mod list;
mod promote;
mod sync;

pub use delink::cmd_delink;
pub use list::cmd_list;
pub use promote::{cmd_promote, PromoteArgs};
pub use sync::{cmd_sync, SyncArgs};

use anyhow::{Context, Result};
use stagehand::{Channel, Config};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Load the configuration named on the command line, or the default one,
/// and apply the `--root` override
pub fn load_config(path: Option<&Path>, root: Option<PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(root) = root {
        config.root = root;
    }
    Ok(config)
}

/// Parse a channel name that must be one of the configured releases
pub(crate) fn parse_channel(config: &Config, name: &str) -> Result<Channel> {
    let channel =
        Channel::from_str(name).with_context(|| format!("Unknown channel: {}", name))?;
    if !config.has_release(channel) {
        anyhow::bail!("Channel {} is not one of the configured releases", channel);
    }
    Ok(channel)
}
