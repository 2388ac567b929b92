// src/error.rs
//! Error types shared by every stagehand component

use crate::package::Channel;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while cataloguing, promoting, synchronizing or delinking
#[derive(Error, Debug)]
pub enum Error {
    /// Bad configuration or missing credentials; fatal before any mutation
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Promotion requested between channels that are not strictly ordered
    #[error("Invalid promotion from {from} to {to}: packages only move forward")]
    InvalidPromotion { from: Channel, to: Channel },

    /// Channel directory absent under the repository root
    #[error("Channel not found: {}", .0.display())]
    ChannelNotFound(PathBuf),

    /// Catalog references an artifact that is not on disk
    #[error("Catalog {} references missing artifact {}", .catalog.display(), .artifact.display())]
    ArtifactMissing { catalog: PathBuf, artifact: PathBuf },

    /// Copying a package into the destination channel failed
    #[error("Failed to copy {package}: {reason}")]
    CopyFailed { package: String, reason: String },

    /// Metadata generator exited unsuccessfully or could not be started
    #[error("Metadata rebuild failed for {}: {reason}", .path.display())]
    MetadataRebuildFailed { path: PathBuf, reason: String },

    /// Object store transfer failed for one key
    #[error("Transfer failed for {key}: {reason}")]
    TransferFailed { key: String, reason: String },

    /// Version string or catalog content could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Run stopped at a phase boundary
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Raw I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid regular expression in a filter or installer pattern
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Configuration-level errors abort a run; everything else is recorded
    /// against the affected package, file or format.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_) | Self::InvalidPromotion { .. } | Self::Cancelled(_)
        )
    }
}

/// Result type alias using the stagehand Error type
pub type Result<T> = std::result::Result<T, Error>;
