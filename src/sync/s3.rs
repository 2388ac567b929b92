// src/sync/s3.rs

//! S3-compatible object storage via `rust-s3`
//!
//! The sync engine is synchronous; each call blocks on a private tokio
//! runtime. Credentials come from the usual AWS environment variables or
//! profile.

use super::store::{ObjectMetadata, ObjectStore};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use tokio::runtime::Runtime;
use tracing::debug;

/// Object store backed by an S3 endpoint
pub struct S3ObjectStore {
    region: Region,
    credentials: Credentials,
    path_style: bool,
    runtime: Runtime,
}

impl S3ObjectStore {
    /// Connect to AWS (`endpoint` = `None`) or a compatible service
    pub fn new(region: &str, endpoint: Option<&str>) -> Result<Self> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.to_string(),
                endpoint: endpoint.to_string(),
            },
            None => region
                .parse()
                .map_err(|e| Error::ConfigError(format!("invalid S3 region {}: {}", region, e)))?,
        };
        let credentials = Credentials::default()
            .map_err(|e| Error::ConfigError(format!("no S3 credentials: {}", e)))?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::ConfigError(format!("cannot start S3 runtime: {}", e)))?;

        Ok(Self {
            path_style: endpoint.is_some(),
            region,
            credentials,
            runtime,
        })
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| Error::ConfigError(format!("invalid bucket {}: {}", name, e)))?;
        Ok(if self.path_style { bucket.with_path_style() } else { bucket })
    }
}

fn transfer_failed(key: &str, e: impl std::fmt::Display) -> Error {
    Error::TransferFailed {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn check_status(key: &str, code: u16) -> Result<()> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(transfer_failed(key, format!("HTTP {}", code)))
    }
}

impl ObjectStore for S3ObjectStore {
    fn get_object_metadata(&self, bucket: &str, key: &str) -> Result<Option<ObjectMetadata>> {
        let bucket = self.bucket(bucket)?;
        match self.runtime.block_on(bucket.head_object(key)) {
            Ok((_, 404)) | Err(S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Ok((head, code)) => {
                check_status(key, code)?;
                Ok(Some(ObjectMetadata {
                    etag: head.e_tag.unwrap_or_default(),
                    size: head.content_length.unwrap_or_default().max(0) as u64,
                    last_modified: head
                        .last_modified
                        .and_then(|t| DateTime::parse_from_rfc2822(&t).ok())
                        .map(|t| t.with_timezone(&Utc)),
                }))
            }
            Err(e) => Err(transfer_failed(key, e)),
        }
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8], content_type: Option<&str>) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        let upload = async {
            match content_type {
                Some(content_type) => bucket.put_object_with_content_type(key, data, content_type).await,
                None => bucket.put_object(key, data).await,
            }
        };
        let response = self.runtime.block_on(upload).map_err(|e| transfer_failed(key, e))?;
        check_status(key, response.status_code())?;
        debug!("PUT s3://{}/{}", bucket.name(), key);
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let bucket = self.bucket(bucket)?;
        match self.runtime.block_on(bucket.delete_object(key)) {
            Ok(response) if response.status_code() == 404 => Ok(()),
            Ok(response) => check_status(key, response.status_code()),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(()),
            Err(e) => Err(transfer_failed(key, e)),
        }
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket = self.bucket(bucket)?;
        let pages = self
            .runtime
            .block_on(bucket.list(prefix.to_string(), None))
            .map_err(|e| transfer_failed(prefix, e))?;

        let mut keys: Vec<String> = pages
            .into_iter()
            .flat_map(|page| page.contents.into_iter().map(|obj| obj.key))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
