// src/lib.rs

//! Stagehand
//!
//! Moves packages through release channels (`unstable` → `testing` →
//! `stable`) and publishes channel trees to object storage.
//!
//! # Architecture
//!
//! - Channel trees on disk are the only state; catalogs are rescanned on
//!   every operation
//! - One [`RepositoryManager`] per format: Debian, yum, zypper and installer
//!   tarballs
//! - Promotion moves whole package families, newest version only, and
//!   rebuilds each touched catalog once
//! - Sync mirrors a tree into a bucket in an upload phase and an optional
//!   delete phase
//! - Delinking collapses identical files across channels into hard links

pub mod advisories;
pub mod config;
pub mod delink;
mod error;
pub mod hash;
pub mod package;
pub mod promotion;
pub mod repository;
pub mod sync;
pub mod version;

pub use advisories::{Advisory, AdvisoryFormat, AdvisoryLedger};
pub use config::Config;
pub use delink::DuplicateLinker;
pub use error::{Error, Result};
pub use hash::{Hash, HashAlgorithm, Hasher};
pub use package::{group_by_family, newest, Channel, FamilyKey, Package, PackageFormat};
pub use promotion::{PromotionEngine, PromotionReport, PromotionRequest, PromotionState};
pub use repository::{PackageQuery, RepositoryManager};
pub use sync::{CompareMethod, ObjectStore, SyncEngine, SyncOptions, SyncReport};
pub use version::VersionKey;
