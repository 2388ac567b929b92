// src/repository/signing.rs

//! Signing credential checks
//!
//! Debian and zypper catalogs are signed while metadata is rebuilt. A
//! promotion into those formats must confirm a usable signing agent before
//! the first package is copied, otherwise the destination would end up with
//! new packages behind an unsigned or stale catalog.

use crate::error::{Error, Result};
use std::env;
use std::process::{Command, Stdio};
use tracing::debug;

/// Confirms signing credentials are available
pub trait SigningCheck: Send + Sync {
    fn check(&self) -> Result<()>;
}

/// Accepts a running gpg-agent
///
/// `GPG_AGENT_INFO` in the environment is enough; otherwise
/// `gpg-connect-agent --no-autostart /bye` must succeed.
#[derive(Debug, Clone, Default)]
pub struct GpgAgentCheck;

impl SigningCheck for GpgAgentCheck {
    fn check(&self) -> Result<()> {
        if env::var_os("GPG_AGENT_INFO").is_some() {
            debug!("GPG_AGENT_INFO set, assuming a usable agent");
            return Ok(());
        }

        let agent = which::which("gpg-connect-agent").map_err(|_| {
            Error::ConfigError(
                "gpg-connect-agent not found; cannot sign repository metadata".to_string(),
            )
        })?;

        let status = Command::new(agent)
            .args(["--no-autostart", "/bye"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| Error::ConfigError(format!("Failed to query gpg-agent: {}", e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::ConfigError(
                "No running gpg-agent; start one with the repository signing key loaded"
                    .to_string(),
            ))
        }
    }
}

/// Skips the check, for unsigned test trees and `--no-sign-check`
#[derive(Debug, Clone, Default)]
pub struct SkipSigningCheck;

impl SigningCheck for SkipSigningCheck {
    fn check(&self) -> Result<()> {
        Ok(())
    }
}
