// src/promotion/mod.rs

//! Package promotion between release channels
//!
//! Promotion moves the newest version of each package family from a less
//! stable channel into a more stable one, never backwards and never to an
//! older version than the destination already carries. Each format is
//! handled by its own [`RepositoryManager`]; catalogs are rebuilt once per
//! format after all of its copies.

use crate::error::{Error, Result};
use crate::package::{Channel, Package, PackageFormat};
use crate::repository::{PackageQuery, RepositoryManager, SigningCheck};
use crate::version::VersionKey;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use strum_macros::Display;
use tracing::{debug, error, info, warn};

/// What to promote
#[derive(Debug, Clone)]
pub struct PromotionRequest {
    /// Family or package name; every family with a matching member moves
    pub name: Option<String>,
    pub from: Channel,
    pub to: Channel,
    pub dryrun: bool,
    pub os: Option<String>,
    pub version: Option<VersionKey>,
    /// Package names matching any of these are left behind
    pub exclude: Vec<Regex>,
    /// Re-copy families whose version equals the destination's
    pub force: bool,
}

impl PromotionRequest {
    pub fn new(from: Channel, to: Channel) -> Self {
        Self {
            name: None,
            from,
            to,
            dryrun: false,
            os: None,
            version: None,
            exclude: Vec::new(),
            force: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    pub fn with_version(mut self, version: VersionKey) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_exclude(mut self, pattern: &str) -> Result<Self> {
        self.exclude.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn dryrun(mut self, dryrun: bool) -> Self {
        self.dryrun = dryrun;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn excludes(&self, pkg: &Package) -> bool {
        self.exclude.iter().any(|re| re.is_match(&pkg.name))
    }

    fn selects_family(&self, members: &[Package]) -> bool {
        let Some(name) = self.name.as_deref() else {
            return true;
        };
        let name = package_name(name);
        members.iter().any(|p| p.name == name || p.family_name() == name)
    }
}

/// Package name as published: underscores become dashes
pub fn package_name(name: &str) -> String {
    name.trim().replace('_', "-")
}

/// Progress of one package through a promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PromotionState {
    Eligible,
    Copying,
    Copied,
    MetadataPending,
    MetadataRebuilt,
    CopyFailed,
}

/// One eligible package and where it ended up
#[derive(Debug, Clone, Serialize)]
pub struct PromotionItem {
    pub package: Package,
    /// Record in the destination channel once copied
    pub destination: Option<Package>,
    pub state: PromotionState,
}

impl PromotionItem {
    fn advance(&mut self, next: PromotionState) {
        debug!("{} {}: {} -> {}", self.package.name, self.package.version, self.state, next);
        self.state = next;
    }
}

/// A package that could not be copied
#[derive(Debug, Clone, Serialize)]
pub struct PromotionFailure {
    pub package: Package,
    pub error: String,
}

/// A format that was skipped or whose catalogs could not be rebuilt
#[derive(Debug, Clone, Serialize)]
pub struct FormatFailure {
    pub format: PackageFormat,
    pub error: String,
}

/// Outcome of a promotion run
#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub from: Channel,
    pub to: Channel,
    pub dryrun: bool,
    pub items: Vec<PromotionItem>,
    pub failures: Vec<PromotionFailure>,
    pub format_failures: Vec<FormatFailure>,
    pub rebuild_failures: Vec<FormatFailure>,
}

impl PromotionReport {
    fn new(request: &PromotionRequest) -> Self {
        Self {
            from: request.from,
            to: request.to,
            dryrun: request.dryrun,
            items: Vec::new(),
            failures: Vec::new(),
            format_failures: Vec::new(),
            rebuild_failures: Vec::new(),
        }
    }

    /// Packages now published in the destination; for a dry run, the
    /// packages that would be
    pub fn promoted(&self) -> Vec<&Package> {
        self.items
            .iter()
            .filter_map(|item| match item.state {
                PromotionState::Eligible if self.dryrun => Some(&item.package),
                PromotionState::MetadataRebuilt => item.destination.as_ref(),
                _ => None,
            })
            .collect()
    }

    /// Copied packages whose catalog rebuild failed
    pub fn pending(&self) -> Vec<&Package> {
        self.items
            .iter()
            .filter(|item| item.state == PromotionState::MetadataPending)
            .filter_map(|item| item.destination.as_ref())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.format_failures.is_empty() && self.rebuild_failures.is_empty()
    }
}

/// Promotes families across channels for a set of formats
pub struct PromotionEngine {
    managers: Vec<Box<dyn RepositoryManager>>,
    signing: Box<dyn SigningCheck>,
}

impl PromotionEngine {
    pub fn new(managers: Vec<Box<dyn RepositoryManager>>, signing: Box<dyn SigningCheck>) -> Self {
        Self { managers, signing }
    }

    pub fn managers(&self) -> &[Box<dyn RepositoryManager>] {
        &self.managers
    }

    /// Run a promotion
    ///
    /// Fails outright only for an invalid channel pair or missing signing
    /// credentials; every other problem lands in the report.
    pub fn promote(&self, request: &PromotionRequest) -> Result<PromotionReport> {
        if request.from >= request.to {
            return Err(Error::InvalidPromotion {
                from: request.from,
                to: request.to,
            });
        }

        if !request.dryrun && self.managers.iter().any(|m| m.requires_signing()) {
            self.signing.check()?;
        }

        info!(
            "Promoting from {} to {}{}",
            request.from,
            request.to,
            if request.dryrun { " (dry run)" } else { "" }
        );

        let mut report = PromotionReport::new(request);
        for manager in &self.managers {
            let format = manager.format();
            let mut items = match self.eligible(manager.as_ref(), request) {
                Ok(items) => items,
                Err(e) => {
                    warn!("Skipping {} packages: {}", format, e);
                    report.format_failures.push(FormatFailure {
                        format,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            info!("{} {} packages eligible", items.len(), format);

            if !request.dryrun {
                self.copy_and_rebuild(manager.as_ref(), request, &mut items, &mut report);
            }
            report.items.extend(items);
        }

        info!(
            "Promoted {} packages from {} to {} ({} failed)",
            report.promoted().len(),
            request.from,
            request.to,
            report.failures.len()
        );
        Ok(report)
    }

    /// Packages of the newest family versions that the destination lacks
    fn eligible(
        &self,
        manager: &dyn RepositoryManager,
        request: &PromotionRequest,
    ) -> Result<Vec<PromotionItem>> {
        let mut dest_query = PackageQuery::all();
        dest_query.os = request.os.clone();
        let mut query = dest_query.clone();
        query.version = request.version.clone();

        let candidates = manager.list_packages(request.from, &query)?;
        // The version filter only narrows the candidates; the destination
        // is compared against everything it holds
        let published = manager.list_packages(request.to, &dest_query)?;

        let mut destination: BTreeMap<(String, String), VersionKey> = BTreeMap::new();
        for pkg in &published {
            let key = (pkg.family_name().to_string(), pkg.os.clone());
            let entry = destination.entry(key).or_insert_with(VersionKey::minimum);
            if pkg.version > *entry {
                *entry = pkg.version.clone();
            }
        }

        let mut families: BTreeMap<(String, String), Vec<Package>> = BTreeMap::new();
        for pkg in candidates {
            let key = (pkg.family_name().to_string(), pkg.os.clone());
            families.entry(key).or_default().push(pkg);
        }

        let mut items = Vec::new();
        for (key, members) in families {
            if !request.selects_family(&members) {
                continue;
            }
            let Some(newest) = members.iter().map(|p| &p.version).max().cloned() else {
                continue;
            };

            if let Some(current) = destination.get(&key) {
                let newer = newest > *current || (request.force && newest == *current);
                if !newer {
                    debug!("{} {} already at {} in {}", key.0, key.1, current, request.to);
                    continue;
                }
            }

            for pkg in members {
                if pkg.version != newest {
                    continue;
                }
                if request.excludes(&pkg) {
                    debug!("Excluding {}", pkg.name);
                    continue;
                }
                items.push(PromotionItem {
                    package: pkg,
                    destination: None,
                    state: PromotionState::Eligible,
                });
            }
        }
        Ok(items)
    }

    fn copy_and_rebuild(
        &self,
        manager: &dyn RepositoryManager,
        request: &PromotionRequest,
        items: &mut [PromotionItem],
        report: &mut PromotionReport,
    ) {
        let mut copied = 0;
        for item in items.iter_mut() {
            item.advance(PromotionState::Copying);
            match manager.copy_package(&item.package, request.from, request.to) {
                Ok(dest) => {
                    info!("Promoted {} {} ({})", dest.name, dest.version, dest.os);
                    item.destination = Some(dest);
                    item.advance(PromotionState::Copied);
                    copied += 1;
                }
                Err(e) => {
                    error!("Failed to promote {}: {}", item.package.name, e);
                    item.advance(PromotionState::CopyFailed);
                    report.failures.push(PromotionFailure {
                        package: item.package.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        if copied == 0 {
            return;
        }

        for item in items.iter_mut().filter(|i| i.state == PromotionState::Copied) {
            item.advance(PromotionState::MetadataPending);
        }
        match manager.rebuild_metadata(request.to, true) {
            Ok(()) => {
                for item in items
                    .iter_mut()
                    .filter(|i| i.state == PromotionState::MetadataPending)
                {
                    item.advance(PromotionState::MetadataRebuilt);
                }
            }
            Err(e) => {
                error!("Failed to rebuild {} metadata in {}: {}", manager.format(), request.to, e);
                report.rebuild_failures.push(FormatFailure {
                    format: manager.format(),
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SkipSigningCheck;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeState {
        packages: Mutex<Vec<Package>>,
        rebuilds: AtomicUsize,
        fail_copy: Mutex<Option<String>>,
        fail_rebuild: AtomicBool,
    }

    struct FakeManager {
        state: Arc<FakeState>,
        signed: bool,
    }

    impl RepositoryManager for FakeManager {
        fn format(&self) -> PackageFormat {
            PackageFormat::Rpm
        }

        fn channel_root(&self, channel: Channel) -> PathBuf {
            PathBuf::from("/repo").join(channel.as_ref())
        }

        fn list_packages(&self, channel: Channel, query: &PackageQuery) -> Result<Vec<Package>> {
            let pkgs = self
                .state
                .packages
                .lock()
                .iter()
                .filter(|p| p.channel == channel)
                .cloned()
                .collect();
            Ok(query.apply(pkgs))
        }

        fn copy_package(&self, package: &Package, _from: Channel, to: Channel) -> Result<Package> {
            if self.state.fail_copy.lock().as_deref() == Some(package.name.as_str()) {
                return Err(Error::CopyFailed {
                    package: package.name.clone(),
                    reason: "disk full".into(),
                });
            }
            let copied = Package {
                channel: to,
                ..package.clone()
            };
            self.state.packages.lock().push(copied.clone());
            Ok(copied)
        }

        fn rebuild_metadata(&self, _channel: Channel, _force: bool) -> Result<()> {
            self.state.rebuilds.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_rebuild.load(Ordering::SeqCst) {
                return Err(Error::MetadataRebuildFailed {
                    path: PathBuf::from("/repo"),
                    reason: "createrepo exited with 1".into(),
                });
            }
            Ok(())
        }

        fn requires_signing(&self) -> bool {
            self.signed
        }
    }

    struct DenySigning;

    impl SigningCheck for DenySigning {
        fn check(&self) -> Result<()> {
            Err(Error::ConfigError("no agent".into()))
        }
    }

    fn pkg(name: &str, version: &str, channel: Channel) -> Package {
        Package {
            name: name.to_string(),
            version: VersionKey::parse(version).unwrap(),
            arch: "x86_64".to_string(),
            os: "el/7".to_string(),
            format: PackageFormat::Rpm,
            channel,
            path: PathBuf::from(format!("/repo/{}/{}-{}.rpm", channel, name, version)),
            source: Some("globus-common".to_string()),
        }
    }

    fn fake_engine(packages: Vec<Package>) -> (PromotionEngine, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        *state.packages.lock() = packages;
        let manager = FakeManager {
            state: state.clone(),
            signed: false,
        };
        (
            PromotionEngine::new(vec![Box::new(manager)], Box::new(SkipSigningCheck)),
            state,
        )
    }

    #[test]
    fn test_backwards_promotion_rejected() {
        let (engine, state) = fake_engine(vec![pkg("globus-common", "16.0-1", Channel::Stable)]);
        let err = engine
            .promote(&PromotionRequest::new(Channel::Stable, Channel::Testing))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPromotion { .. }));
        assert!(engine
            .promote(&PromotionRequest::new(Channel::Stable, Channel::Stable))
            .is_err());
        assert_eq!(state.packages.lock().len(), 1);
    }

    #[test]
    fn test_newest_family_promoted() {
        let (engine, state) = fake_engine(vec![
            pkg("globus-common", "16.0-1", Channel::Unstable),
            pkg("globus-common", "16.1-1", Channel::Unstable),
            pkg("globus-common-devel", "16.1-1", Channel::Unstable),
            pkg("globus-common", "16.0-1", Channel::Stable),
        ]);

        let report = engine
            .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
            .unwrap();
        assert!(report.is_success());
        let promoted: Vec<String> = report.promoted().iter().map(|p| p.name.clone()).collect();
        assert_eq!(promoted, vec!["globus-common", "globus-common-devel"]);
        assert!(report.promoted().iter().all(|p| p.version.as_str() == "16.1-1"));
        assert_eq!(state.rebuilds.load(Ordering::SeqCst), 1);

        // Nothing left to do the second time
        let again = engine
            .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
            .unwrap();
        assert!(again.items.is_empty());
        assert_eq!(state.rebuilds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_never_regress_and_force() {
        let (engine, _) = fake_engine(vec![
            pkg("globus-common", "16.0-1", Channel::Unstable),
            pkg("globus-common", "16.1-1", Channel::Stable),
        ]);
        let report = engine
            .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
            .unwrap();
        assert!(report.items.is_empty());

        let (engine, _) = fake_engine(vec![
            pkg("globus-common", "16.1-1", Channel::Unstable),
            pkg("globus-common", "16.1-1", Channel::Stable),
        ]);
        let request = PromotionRequest::new(Channel::Unstable, Channel::Stable);
        assert!(engine.promote(&request).unwrap().items.is_empty());
        let forced = engine.promote(&request.force(true)).unwrap();
        assert_eq!(forced.promoted().len(), 1);
    }

    #[test]
    fn test_version_filter_does_not_hide_destination() {
        let (engine, state) = fake_engine(vec![
            pkg("globus-common", "16.0-1", Channel::Unstable),
            pkg("globus-common", "17.0-1", Channel::Stable),
        ]);
        let request = PromotionRequest::new(Channel::Unstable, Channel::Stable)
            .with_name("globus-common")
            .with_version(VersionKey::parse("16.0").unwrap());

        let report = engine.promote(&request).unwrap();
        assert!(report.items.is_empty());
        let stable: Vec<String> = state
            .packages
            .lock()
            .iter()
            .filter(|p| p.channel == Channel::Stable)
            .map(|p| p.version.to_string())
            .collect();
        assert_eq!(stable, vec!["17.0-1"]);
    }

    #[test]
    fn test_name_filter_normalizes_underscores() {
        assert_eq!(package_name("globus_common"), "globus-common");
        assert_eq!(package_name(" myproxy "), "myproxy");

        let (engine, _) = fake_engine(vec![pkg("globus-common", "16.1-1", Channel::Unstable)]);
        let report = engine
            .promote(
                &PromotionRequest::new(Channel::Unstable, Channel::Stable)
                    .with_name("globus_common")
                    .dryrun(true),
            )
            .unwrap();
        assert_eq!(report.promoted().len(), 1);
    }

    #[test]
    fn test_dryrun_copies_nothing() {
        let (engine, state) = fake_engine(vec![pkg("globus-common", "16.1-1", Channel::Unstable)]);
        let report = engine
            .promote(&PromotionRequest::new(Channel::Unstable, Channel::Testing).dryrun(true))
            .unwrap();
        assert_eq!(report.promoted().len(), 1);
        assert_eq!(report.items[0].state, PromotionState::Eligible);
        assert_eq!(state.packages.lock().len(), 1);
        assert_eq!(state.rebuilds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_filters_and_excludes() {
        let mut other = pkg("myproxy", "6.1-1", Channel::Unstable);
        other.source = None;
        let (engine, _) = fake_engine(vec![
            pkg("globus-common", "16.1-1", Channel::Unstable),
            pkg("globus-common-doc", "16.1-1", Channel::Unstable),
            other,
        ]);

        let request = PromotionRequest::new(Channel::Unstable, Channel::Stable)
            .with_name("globus-common")
            .with_exclude("-doc$")
            .unwrap()
            .dryrun(true);
        let report = engine.promote(&request).unwrap();
        let names: Vec<&str> = report.promoted().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["globus-common"]);
    }

    #[test]
    fn test_copy_failure_isolated() {
        let (engine, state) = fake_engine(vec![
            pkg("globus-common", "16.1-1", Channel::Unstable),
            pkg("globus-common-devel", "16.1-1", Channel::Unstable),
        ]);
        *state.fail_copy.lock() = Some("globus-common-devel".to_string());

        let report = engine
            .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
            .unwrap();
        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.promoted().len(), 1);
        assert_eq!(report.items[1].state, PromotionState::CopyFailed);
        assert_eq!(state.rebuilds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rebuild_failure_leaves_pending() {
        let (engine, state) = fake_engine(vec![pkg("globus-common", "16.1-1", Channel::Unstable)]);
        state.fail_rebuild.store(true, Ordering::SeqCst);

        let report = engine
            .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
            .unwrap();
        assert_eq!(report.rebuild_failures.len(), 1);
        assert!(report.promoted().is_empty());
        assert_eq!(report.pending().len(), 1);
    }

    #[test]
    fn test_signing_checked_before_copy() {
        let state = Arc::new(FakeState::default());
        *state.packages.lock() = vec![pkg("globus-common", "16.1-1", Channel::Unstable)];
        let engine = PromotionEngine::new(
            vec![Box::new(FakeManager {
                state: state.clone(),
                signed: true,
            })],
            Box::new(DenySigning),
        );

        let err = engine
            .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert_eq!(state.packages.lock().len(), 1);

        // Dry runs never need the key
        assert!(engine
            .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable).dryrun(true))
            .is_ok());
    }
}
