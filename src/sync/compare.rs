// src/sync/compare.rs

//! Upload decisions
//!
//! A local file is uploaded unless the chosen policy says the remote copy
//! is already current. A missing remote object is always uploaded.

use super::store::ObjectMetadata;
use crate::hash::Hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// How a local file is compared against its remote object
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CompareMethod {
    /// Local MD5 against the remote ETag
    #[default]
    Checksum,
    Size,
    /// Local mtime against `since`, or the remote modification time
    Modified,
    /// Always upload
    NoCheck,
}

/// Local facts about one file
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Only computed for the checksum policy
    pub md5: Option<Hash>,
}

impl CompareMethod {
    /// Whether the local file must be uploaded
    pub fn needs_upload(
        &self,
        local: &LocalFile,
        remote: Option<&ObjectMetadata>,
        since: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(remote) = remote else {
            return true;
        };
        match self {
            Self::Checksum => match &local.md5 {
                Some(md5) => !etag_matches(&remote.etag, md5.as_str()),
                None => true,
            },
            Self::Size => local.size != remote.size,
            Self::Modified => {
                let Some(modified) = local.modified else {
                    return true;
                };
                match since.or(remote.last_modified) {
                    Some(reference) => modified > reference,
                    None => true,
                }
            }
            Self::NoCheck => true,
        }
    }
}

/// Compare an ETag to a hex MD5; multipart ETags never match
pub fn etag_matches(etag: &str, md5_hex: &str) -> bool {
    let etag = etag.trim().trim_matches('"');
    !etag.contains('-') && etag.eq_ignore_ascii_case(md5_hex)
}
