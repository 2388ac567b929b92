// tests/promotion.rs

//! Integration tests for channel promotion over real repository trees.

mod common;

use common::{RecordingRebuilder, channel_tree, files_under, rpm_repo, source_tarball};
use stagehand::repository::SkipSigningCheck;
use stagehand::repository::rpm::RpmManager;
use stagehand::repository::tarball::TarballManager;
use stagehand::{
    AdvisoryFormat, AdvisoryLedger, Channel, Error, PackageFormat, PromotionEngine,
    PromotionRequest, PromotionState, RepositoryManager,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn tarball_engine(root: &Path) -> PromotionEngine {
    PromotionEngine::new(
        vec![Box::new(TarballManager::new(root))],
        Box::new(SkipSigningCheck),
    )
}

#[test]
fn test_promote_newer_tarball() {
    let temp = channel_tree();
    let root = temp.path();
    source_tarball(root, "unstable", "pkg-1.2.0.tar.gz", "1.2.0");
    source_tarball(root, "stable", "pkg-1.1.0.tar.gz", "1.1.0");

    let engine = tarball_engine(root);
    let report = engine
        .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
        .unwrap();

    assert!(report.is_success());
    let promoted = report.promoted();
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0].name, "pkg");
    assert_eq!(promoted[0].version.to_string(), "1.2.0");
    assert_eq!(report.items[0].state, PromotionState::MetadataRebuilt);

    let src = root.join("stable/installers/src");
    assert_eq!(fs::read_to_string(src.join("pkg-1.2.0.tar.gz")).unwrap(), "1.2.0");
    assert_eq!(fs::read_to_string(src.join("pkg-1.1.0.tar.gz")).unwrap(), "1.1.0");
    assert_eq!(fs::read_to_string(src.join("pkg-latest.tar.gz")).unwrap(), "1.2.0");

    let sidecar = fs::read_to_string(src.join("pkg-1.2.0.tar.gz.sha512")).unwrap();
    assert!(sidecar.trim_end().ends_with("  pkg-1.2.0.tar.gz"));
    assert!(src.join("pkg-1.2.0.tar.gz.md5").exists());

    // The source channel is untouched
    assert_eq!(
        files_under(&root.join("unstable")),
        vec!["installers/src/pkg-1.2.0.tar.gz"]
    );
}

#[test]
fn test_promote_copies_only_newest_then_nothing() {
    let temp = channel_tree();
    let root = temp.path();
    source_tarball(root, "unstable", "pkg-1.2.0.tar.gz", "1.2.0");
    source_tarball(root, "unstable", "pkg-1.1.0.tar.gz", "1.1.0");
    source_tarball(root, "testing", "pkg-1.1.0.tar.gz", "1.1.0");

    let engine = tarball_engine(root);
    let request = PromotionRequest::new(Channel::Unstable, Channel::Testing);
    let first = engine.promote(&request).unwrap();

    assert!(first.is_success());
    let versions: Vec<String> = first.promoted().iter().map(|p| p.version.to_string()).collect();
    assert_eq!(versions, vec!["1.2.0"]);
    let src = root.join("testing/installers/src");
    assert_eq!(fs::read_to_string(src.join("pkg-1.2.0.tar.gz")).unwrap(), "1.2.0");
    assert_eq!(fs::read_to_string(src.join("pkg-1.1.0.tar.gz")).unwrap(), "1.1.0");
    let after_first = files_under(&root.join("testing"));

    let second = engine.promote(&request).unwrap();
    assert!(second.items.is_empty());
    assert!(second.promoted().is_empty());
    assert_eq!(files_under(&root.join("testing")), after_first);
}

#[test]
fn test_promoted_sources_extend_advisories() {
    let temp = channel_tree();
    let root = temp.path();
    source_tarball(root, "unstable", "globus_common-16.0.tar.gz", "16.0");
    let ledger_path = root.join("advisories.txt");
    fs::write(&ledger_path, "2014-03-01;globus_common-15.0;6.0;bug;Older release\n").unwrap();

    let engine = tarball_engine(root);
    let report = engine
        .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
        .unwrap();

    let mut ledger = AdvisoryLedger::load(&ledger_path, AdvisoryFormat::Txt).unwrap();
    assert_eq!(ledger.add_promoted(report.promoted(), "6.0"), 1);
    ledger.save(&ledger_path, AdvisoryFormat::Txt).unwrap();

    let reloaded = AdvisoryLedger::load(&ledger_path, AdvisoryFormat::Txt).unwrap();
    assert_eq!(reloaded.advisories().len(), 2);
    assert_eq!(reloaded.advisories()[0].description, "Older release");
    assert_eq!(reloaded.advisories()[1].packages, vec!["globus_common-16.0"]);
}

#[test]
fn test_promote_is_idempotent() {
    let temp = channel_tree();
    let root = temp.path();
    source_tarball(root, "unstable", "pkg-1.2.0.tar.gz", "1.2.0");

    let engine = tarball_engine(root);
    let request = PromotionRequest::new(Channel::Unstable, Channel::Testing);
    let first = engine.promote(&request).unwrap();
    assert_eq!(first.promoted().len(), 1);
    let after_first = files_under(&root.join("testing"));

    let second = engine.promote(&request).unwrap();
    assert!(second.items.is_empty());
    assert!(second.is_success());
    assert_eq!(files_under(&root.join("testing")), after_first);
}

#[test]
fn test_promote_never_regresses() {
    let temp = channel_tree();
    let root = temp.path();
    source_tarball(root, "testing", "pkg-1.0.0.tar.gz", "1.0.0");
    source_tarball(root, "stable", "pkg-1.1.0.tar.gz", "1.1.0");

    let engine = tarball_engine(root);
    let report = engine
        .promote(&PromotionRequest::new(Channel::Testing, Channel::Stable))
        .unwrap();

    assert!(report.items.is_empty());
    assert_eq!(
        files_under(&root.join("stable")),
        vec!["installers/src/pkg-1.1.0.tar.gz"]
    );
}

#[test]
fn test_force_repromotes_equal_version() {
    let temp = channel_tree();
    let root = temp.path();
    source_tarball(root, "testing", "pkg-1.1.0.tar.gz", "rebuilt");
    source_tarball(root, "stable", "pkg-1.1.0.tar.gz", "original");

    let engine = tarball_engine(root);
    let plain = engine
        .promote(&PromotionRequest::new(Channel::Testing, Channel::Stable).dryrun(true))
        .unwrap();
    assert!(plain.items.is_empty());

    let forced = engine
        .promote(&PromotionRequest::new(Channel::Testing, Channel::Stable).force(true))
        .unwrap();
    assert_eq!(forced.promoted().len(), 1);
    assert_eq!(
        fs::read_to_string(root.join("stable/installers/src/pkg-1.1.0.tar.gz")).unwrap(),
        "rebuilt"
    );
}

#[test]
fn test_dry_run_changes_nothing() {
    let temp = channel_tree();
    let root = temp.path();
    source_tarball(root, "unstable", "pkg-1.2.0.tar.gz", "1.2.0");
    source_tarball(root, "unstable", "other-2.0.tar.gz", "2.0");

    let engine = tarball_engine(root);
    let report = engine
        .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable).dryrun(true))
        .unwrap();

    assert!(report.dryrun);
    assert_eq!(report.items.len(), 2);
    assert!(report.items.iter().all(|i| i.state == PromotionState::Eligible));
    // A dry run reports what would move
    assert_eq!(report.promoted().len(), 2);
    assert!(files_under(&root.join("stable")).is_empty());

    // A real run promotes exactly what the dry run reported
    let real = engine
        .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
        .unwrap();
    let mut planned: Vec<_> = report.items.iter().map(|i| i.package.name.clone()).collect();
    let mut done: Vec<_> = real.promoted().iter().map(|p| p.name.clone()).collect();
    planned.sort();
    done.sort();
    assert_eq!(planned, done);
}

#[test]
fn test_name_filter_and_exclude() {
    let temp = channel_tree();
    let root = temp.path();
    source_tarball(root, "unstable", "pkg-1.2.0.tar.gz", "1.2.0");
    source_tarball(root, "unstable", "other-2.0.tar.gz", "2.0");

    let engine = tarball_engine(root);
    let named = engine
        .promote(
            &PromotionRequest::new(Channel::Unstable, Channel::Testing)
                .with_name("pkg")
                .dryrun(true),
        )
        .unwrap();
    assert_eq!(named.items.len(), 1);
    assert_eq!(named.items[0].package.name, "pkg");

    let excluded = engine
        .promote(
            &PromotionRequest::new(Channel::Unstable, Channel::Testing)
                .with_exclude("^other")
                .unwrap()
                .dryrun(true),
        )
        .unwrap();
    assert_eq!(excluded.items.len(), 1);
    assert_eq!(excluded.items[0].package.name, "pkg");
}

#[test]
fn test_invalid_direction() {
    let temp = channel_tree();
    let engine = tarball_engine(temp.path());

    let err = engine
        .promote(&PromotionRequest::new(Channel::Stable, Channel::Unstable))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPromotion { .. }));

    let err = engine
        .promote(&PromotionRequest::new(Channel::Testing, Channel::Testing))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPromotion { .. }));
}

#[test]
fn test_rpm_promotion_rebuilds_destination_repos() {
    let temp = channel_tree();
    let root = temp.path();
    let unstable = root.join("unstable/rpm/el/7");
    let stable = root.join("stable/rpm/el/7");
    rpm_repo(
        &unstable.join("x86_64"),
        &[("pkg", "x86_64", "1.2.0", "1"), ("pkg-doc", "noarch", "1.2.0", "1")],
    );
    rpm_repo(
        &stable.join("x86_64"),
        &[("pkg", "x86_64", "1.1.0", "1"), ("pkg-doc", "noarch", "1.1.0", "1")],
    );
    fs::create_dir_all(stable.join("i386")).unwrap();

    let rebuilder = Arc::new(RecordingRebuilder::default());
    let engine = PromotionEngine::new(
        vec![Box::new(RpmManager::new(root, rebuilder.clone()))],
        Box::new(SkipSigningCheck),
    );
    let report = engine
        .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.promoted().len(), 2);
    assert!(
        report
            .items
            .iter()
            .all(|i| i.state == PromotionState::MetadataRebuilt)
    );

    assert!(stable.join("x86_64/pkg-1.2.0-1.x86_64.rpm").is_file());
    assert!(stable.join("x86_64/pkg-doc-1.2.0-1.noarch.rpm").is_file());
    // noarch packages fan out to the other architectures
    assert!(stable.join("i386/pkg-doc-1.2.0-1.noarch.rpm").is_file());
    assert!(!stable.join("i386/pkg-1.2.0-1.x86_64.rpm").exists());

    let dirs = rebuilder.dirs();
    assert!(dirs.contains(&stable.join("x86_64")));
    assert!(dirs.contains(&stable.join("i386")));
    assert!(dirs.iter().all(|d| d.starts_with(root.join("stable"))));
    let mut unique = dirs.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), dirs.len());
}

#[test]
fn test_broken_format_does_not_block_others() {
    let temp = channel_tree();
    let root = temp.path();
    let repo = root.join("unstable/rpm/el/7/x86_64");
    rpm_repo(&repo, &[("pkg", "x86_64", "1.2.0", "1")]);
    fs::remove_file(repo.join("pkg-1.2.0-1.x86_64.rpm")).unwrap();
    fs::create_dir_all(root.join("stable/rpm")).unwrap();
    source_tarball(root, "unstable", "pkg-1.2.0.tar.gz", "1.2.0");

    let managers: Vec<Box<dyn RepositoryManager>> = vec![
        Box::new(RpmManager::new(root, Arc::new(RecordingRebuilder::default()))),
        Box::new(TarballManager::new(root)),
    ];
    let engine = PromotionEngine::new(managers, Box::new(SkipSigningCheck));
    let report = engine
        .promote(&PromotionRequest::new(Channel::Unstable, Channel::Stable))
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.format_failures.len(), 1);
    assert_eq!(report.format_failures[0].format, PackageFormat::Rpm);

    let promoted = report.promoted();
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0].format, PackageFormat::Tarball);
    assert!(root.join("stable/installers/src/pkg-1.2.0.tar.gz").is_file());
}
