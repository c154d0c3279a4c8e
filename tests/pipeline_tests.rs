//! End-to-end runs with an in-process converter standing in for `readpst`.

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use predicates::prelude::*;

use pstingest::convert::Converter;
use pstingest::ingest::{Coordinator, IngestOptions, PartitionMode};
use pstingest::pipeline::{self, RunOptions};
use pstingest::store::{self, RecordFilter, RecordStore};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Writes fixture mailboxes named after the container stem; `broken` fails.
struct FixtureConverter;

impl Converter for FixtureConverter {
    fn convert(&self, source: &Path, destination: &Path) -> bool {
        let stem = source.file_stem().unwrap().to_string_lossy().into_owned();
        let copy = |name: &str, to: &str| {
            let target = destination.join(to);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::copy(fixture(name), target).unwrap();
        };
        match stem.as_str() {
            "alice" => copy("simple.mbox", "Inbox.mbox"),
            "bob" => {
                copy("attachments.mbox", "Inbox.mbox");
                copy("not_mbox.txt", "Junk/mbox");
            }
            _ => return false,
        }
        true
    }
}

fn source_tree() -> assert_fs::TempDir {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("in/alice.pst").write_binary(b"pst").unwrap();
    temp.child("in/nested/bob.PST").write_binary(b"pst").unwrap();
    temp.child("in/broken.ost").write_binary(b"pst").unwrap();
    temp.child("in/readme.txt").write_str("not a container").unwrap();
    temp
}

fn options(temp: &assert_fs::TempDir, mode: PartitionMode, output: &str) -> RunOptions {
    RunOptions {
        source_dir: temp.path().join("in"),
        mbox_dir: temp.path().join("mbox"),
        output: temp.path().join(output),
        workers: 2,
        keep_mbox: false,
        mode,
        ingest: IngestOptions::default(),
    }
}

#[test]
fn test_per_container_run() {
    let temp = source_tree();
    let report = pipeline::run(
        &options(&temp, PartitionMode::PerContainer, "out"),
        &FixtureConverter,
        &|_| {},
    )
    .unwrap();

    assert_eq!(report.conversion.succeeded(), 2);
    assert_eq!(report.conversion.failed(), 1);
    assert_eq!(report.ingest.partitions.len(), 2, "failed conversions are not ingested");

    let alice = temp.child("out/alice.sqlite3");
    let bob = temp.child("out/bob.sqlite3");
    alice.assert(predicate::path::is_file());
    bob.assert(predicate::path::is_file());
    temp.child("out/broken.sqlite3").assert(predicate::path::missing());
    assert_eq!(store::count(alice.path()), 4);
    assert_eq!(store::count(bob.path()), 5);

    temp.child("out/attachments/report.pdf")
        .assert(predicate::path::is_file());
    temp.child("out/attachments/passwd").assert("root:x:0:0");
    temp.child("mbox").assert(predicate::path::missing());
}

#[test]
fn test_bad_mailbox_fails_alone() {
    let temp = source_tree();
    let report = pipeline::run(
        &options(&temp, PartitionMode::PerContainer, "out"),
        &FixtureConverter,
        &|_| {},
    )
    .unwrap();

    let bob = report
        .ingest
        .partitions
        .iter()
        .find(|p| p.label.as_deref() == Some("bob.PST"))
        .unwrap();
    assert_eq!(bob.mailboxes_ok(), 1);
    assert_eq!(bob.mailboxes_failed(), 1);
    assert_eq!(bob.records_stored(), 5);
    assert_eq!(report.ingest.mailboxes_failed(), 1);
}

#[test]
fn test_shared_mode_matches_per_container_total() {
    let per = source_tree();
    let per_report = pipeline::run(
        &options(&per, PartitionMode::PerContainer, "out"),
        &FixtureConverter,
        &|_| {},
    )
    .unwrap();

    let shared = source_tree();
    shared.child("out").create_dir_all().unwrap();
    let shared_report = pipeline::run(
        &options(&shared, PartitionMode::Shared, "out"),
        &FixtureConverter,
        &|_| {},
    )
    .unwrap();

    let db = shared.child("out/emaildb.sqlite3");
    db.assert(predicate::path::is_file());
    let per_total = store::count(per.path().join("out/alice.sqlite3"))
        + store::count(per.path().join("out/bob.sqlite3"));
    assert_eq!(store::count(db.path()), per_total);
    assert_eq!(
        shared_report.ingest.records_stored(),
        per_report.ingest.records_stored()
    );

    let store = RecordStore::open(db.path()).unwrap();
    let stats = store.stats().unwrap();
    assert_eq!(stats.source_containers, vec!["alice.pst", "bob.PST"]);
    let alice = store
        .query(&RecordFilter::default().source_container("alice.pst"), 100, 0)
        .unwrap();
    assert_eq!(alice.len(), 4);
}

#[test]
fn test_keep_mbox_retains_intermediate_tree() {
    let temp = source_tree();
    let mut opts = options(&temp, PartitionMode::PerContainer, "out");
    opts.keep_mbox = true;
    pipeline::run(&opts, &FixtureConverter, &|_| {}).unwrap();

    temp.child("mbox/alice/Inbox.mbox")
        .assert(predicate::path::is_file());
    temp.child("mbox/broken").assert(predicate::path::is_dir());
}

#[test]
fn test_missing_source_dir_fails_run() {
    let temp = assert_fs::TempDir::new().unwrap();
    let result = pipeline::run(
        &options(&temp, PartitionMode::PerContainer, "out"),
        &FixtureConverter,
        &|_| {},
    );
    assert!(result.is_err());
}

#[test]
fn test_shared_ingest_labels_from_parent_dir() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("tree/carol/Inbox.mbox")
        .write_file(&fixture("simple.mbox"))
        .unwrap();
    temp.child("tree/loose.mbox")
        .write_file(&fixture("simple.mbox"))
        .unwrap();

    let db = temp.path().join("merged.sqlite3");
    let report = Coordinator::new(IngestOptions::default()).ingest_shared(
        &db,
        &temp.path().join("tree"),
        None,
    );
    assert_eq!(report.records_stored(), 8);

    let store = RecordStore::open(&db).unwrap();
    let carol = store
        .query(&RecordFilter::default().source_container("carol.pst"), 100, 0)
        .unwrap();
    let unlabelled = store
        .query(&RecordFilter::default().source_container(""), 100, 0)
        .unwrap();
    assert_eq!(carol.len(), 4);
    assert_eq!(unlabelled.len(), 4);
    temp.child("attachments").assert(predicate::path::is_dir());
}

#[test]
fn test_unopenable_store_skips_partition() {
    let temp = source_tree();
    // A directory where the store file should be makes the open fail.
    temp.child("out/alice.sqlite3").create_dir_all().unwrap();
    let report = pipeline::run(
        &options(&temp, PartitionMode::PerContainer, "out"),
        &FixtureConverter,
        &|_| {},
    )
    .unwrap();

    assert_eq!(report.ingest.partitions_failed(), 1);
    assert_eq!(store::count(temp.path().join("out/bob.sqlite3")), 5);
}

#[test]
fn test_tree_ingest_keeps_root_mailboxes() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("tree/carol/Inbox.mbox")
        .write_file(&fixture("simple.mbox"))
        .unwrap();
    temp.child("tree/loose.mbox")
        .write_file(&fixture("simple.mbox"))
        .unwrap();
    let coordinator = Coordinator::new(IngestOptions::default());

    let per = coordinator
        .ingest_tree(&temp.path().join("tree"), &temp.path().join("per"))
        .unwrap();
    let shared = coordinator.ingest_shared(
        &temp.path().join("shared.sqlite3"),
        &temp.path().join("tree"),
        None,
    );

    assert_eq!(per.partitions.len(), 2);
    assert_eq!(per.records_stored(), 8);
    assert_eq!(per.records_stored(), shared.records_stored());
    assert_eq!(store::count(temp.path().join("per/carol.sqlite3")), 4);

    let root_store = temp.child("per/tree.sqlite3");
    root_store.assert(predicate::path::is_file());
    let store = RecordStore::open(root_store.path()).unwrap();
    let loose = store
        .query(&RecordFilter::default().source_container(""), 100, 0)
        .unwrap();
    assert_eq!(loose.len(), 4);
}

#[test]
fn test_tree_root_store_avoids_container_names() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("tree/tree/Inbox.mbox")
        .write_file(&fixture("simple.mbox"))
        .unwrap();
    temp.child("tree/loose.mbox")
        .write_file(&fixture("simple.mbox"))
        .unwrap();

    let report = Coordinator::new(IngestOptions::default())
        .ingest_tree(&temp.path().join("tree"), &temp.path().join("out"))
        .unwrap();

    assert_eq!(report.records_stored(), 8);
    assert_eq!(store::count(temp.path().join("out/tree.sqlite3")), 4);
    assert_eq!(store::count(temp.path().join("out/tree_2.sqlite3")), 4);
}

#[test]
fn test_output_inside_intermediate_dir_survives_cleanup() {
    let temp = source_tree();
    let report = pipeline::run(
        &options(&temp, PartitionMode::PerContainer, "mbox/out"),
        &FixtureConverter,
        &|_| {},
    )
    .unwrap();

    assert_eq!(report.ingest.records_stored(), 9);
    assert_eq!(store::count(temp.path().join("mbox/out/alice.sqlite3")), 4);
    assert_eq!(store::count(temp.path().join("mbox/out/bob.sqlite3")), 5);
}
