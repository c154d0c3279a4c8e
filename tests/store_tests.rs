//! Integration tests for the SQLite record store.

use std::time::Duration;

use pstingest::error::StoreError;
use pstingest::model::record::EmailRecord;
use pstingest::store::{self, BatchGranularity, RecordFilter, RecordStore, StoreOptions};

fn record(subject: &str, sender: &str, attachment: Option<(&str, &str)>) -> EmailRecord {
    let (filename, content_type) = attachment.unwrap_or(("", ""));
    EmailRecord {
        subject: subject.to_string(),
        sender_name: String::new(),
        sender_email: sender.to_string(),
        recipient_name: String::new(),
        recipient_email: "b@x.com".to_string(),
        attachment_filename: filename.to_string(),
        attachment_type: content_type.to_string(),
        email_date: "2023-01-01".to_string(),
        source_container: "t.pst".to_string(),
    }
}

/// Valid by field presence, but rejected by the attachment pairing constraint.
fn constraint_violation() -> EmailRecord {
    let mut bad = record("bad", "bad@x.com", None);
    bad.attachment_filename = "orphan.bin".to_string();
    bad
}

fn temp_store() -> (tempfile::TempDir, RecordStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(dir.path().join("emails.sqlite3")).unwrap();
    (dir, store)
}

#[test]
fn test_round_trip_by_sender() {
    let (dir, store) = temp_store();
    let original = record("S", "a@x.com", Some(("f.txt", "text/plain")));
    assert!(store.insert_one(&original));

    let rows = store
        .query(&RecordFilter::default().sender("a@x.com"), 10, 0)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record, original);
    assert_eq!(store::count(dir.path().join("emails.sqlite3")), 1);
}

#[test]
fn test_batch_insert_counts() {
    let (dir, store) = temp_store();
    let records: Vec<_> = (0..23)
        .map(|i| record(&format!("msg {i}"), &format!("u{i}@x.com"), None))
        .collect();

    assert_eq!(store.insert_batch(&records, 5), (23, 0));
    assert_eq!(store::count(dir.path().join("emails.sqlite3")), 23);
}

#[test]
fn test_failing_chunk_is_rolled_back_whole() {
    let (_dir, store) = temp_store();
    let records = vec![
        record("one", "one@x.com", None),
        record("two", "two@x.com", None),
        constraint_violation(),
        record("three", "three@x.com", None),
    ];

    assert_eq!(store.insert_batch(&records, 2), (2, 2));
    assert_eq!(store.row_count().unwrap(), 2);
    let three = store
        .query(&RecordFilter::default().sender("three@"), 10, 0)
        .unwrap();
    assert!(three.is_empty(), "rows sharing a chunk with the bad one are gone");
}

#[test]
fn test_record_granularity_isolates_bad_row() {
    let (_dir, store) = temp_store();
    let records = vec![
        record("one", "one@x.com", None),
        constraint_violation(),
        record("three", "three@x.com", None),
    ];

    let result = store.insert_batch_with(&records, 10, BatchGranularity::Record);
    assert_eq!(result, (2, 1));
    assert_eq!(store.row_count().unwrap(), 2);
}

#[test]
fn test_query_filters_and_order() {
    let (_dir, store) = temp_store();
    let mut early = record("early", "ann@corp.com", None);
    early.email_date = "2023-01-01".into();
    let mut late = record("late", "ann@corp.com", Some(("a.pdf", "application/pdf")));
    late.email_date = "2023-06-01".into();
    let mut other = record("other", "bob@home.org", None);
    other.email_date = "2023-03-01".into();
    other.source_container = "bob.pst".into();
    store.insert_batch(&[early, late, other], 10);

    let all = store.query(&RecordFilter::default(), 10, 0).unwrap();
    let subjects: Vec<_> = all.iter().map(|r| r.record.subject.as_str()).collect();
    assert_eq!(subjects, ["late", "other", "early"]);

    let corp = store
        .query(&RecordFilter::default().sender("corp"), 10, 0)
        .unwrap();
    assert_eq!(corp.len(), 2);

    let bounded = store
        .query(
            &RecordFilter::default()
                .date_range(Some("2023-01-01".into()), Some("2023-03-01".into())),
            10,
            0,
        )
        .unwrap();
    assert_eq!(bounded.len(), 2);

    let with_att = store
        .query(&RecordFilter::default().has_attachment(true), 10, 0)
        .unwrap();
    assert_eq!(with_att.len(), 1);
    assert_eq!(with_att[0].record.subject, "late");

    let by_source = store
        .query(&RecordFilter::default().source_container("bob.pst"), 10, 0)
        .unwrap();
    assert_eq!(by_source.len(), 1);

    let page = store.query(&RecordFilter::default(), 1, 1).unwrap();
    assert_eq!(page[0].record.subject, "other");
}

#[test]
fn test_stats_empty_store() {
    let (_dir, store) = temp_store();
    let stats = store.stats().unwrap();
    assert_eq!(stats.total_records, 0);
    assert_eq!(stats.with_attachments, 0);
    assert_eq!(stats.distinct_senders, 0);
    assert_eq!(stats.distinct_recipients, 0);
    assert!(stats.source_containers.is_empty());
    assert!(stats.attachment_types.is_empty());
}

#[test]
fn test_stats_attachment_breakdown() {
    let (_dir, store) = temp_store();
    let records = vec![
        record("a", "a@x.com", Some(("a.pdf", "application/pdf"))),
        record("b", "b@x.com", Some(("b.pdf", "application/pdf"))),
        record("c", "a@x.com", None),
    ];
    assert_eq!(store.insert_batch(&records, 10), (3, 0));

    let stats = store.stats().unwrap();
    assert_eq!(stats.total_records, 3);
    assert_eq!(stats.with_attachments, 2);
    assert_eq!(stats.distinct_senders, 2);
    assert_eq!(stats.distinct_recipients, 1);
    assert_eq!(stats.source_containers, vec!["t.pst".to_string()]);
    assert_eq!(stats.attachment_types.len(), 1);
    assert_eq!(stats.attachment_types[0].content_type, "application/pdf");
    assert_eq!(stats.attachment_types[0].count, 2);
}

#[test]
fn test_reopen_migrates_legacy_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.sqlite3");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE emails (id INTEGER PRIMARY KEY, subject TEXT, sender_name TEXT, \
             sender_email TEXT, recipient_name TEXT, recipient_email TEXT, \
             attachment_filename TEXT, attachment_type TEXT, email_date TEXT);
             INSERT INTO emails (subject, sender_name, sender_email, recipient_name, \
             recipient_email, attachment_filename, attachment_type, email_date) \
             VALUES ('old', NULL, 'a@x.com', NULL, 'b@x.com', NULL, NULL, NULL);",
        )
        .unwrap();
    }

    let store = RecordStore::open(&path).unwrap();
    assert!(store.insert_one(&record("new", "c@x.com", None)));
    let rows = store.query(&RecordFilter::default(), 10, 0).unwrap();
    assert_eq!(rows.len(), 2);
    let old = rows.iter().find(|r| r.record.subject == "old").unwrap();
    assert_eq!(old.record.source_container, "");
    assert_eq!(old.record.attachment_filename, "");
}

#[test]
fn test_count_of_unreadable_store_is_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.sqlite3");
    std::fs::write(&path, b"definitely not sqlite").unwrap();
    assert_eq!(store::count(&path), 0);
}

#[test]
fn test_lock_contention_reports_busy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("emails.sqlite3");
    let options = StoreOptions {
        busy_timeout: Duration::from_millis(50),
        ..StoreOptions::default()
    };
    let store = RecordStore::open_with(&path, options).unwrap();

    let blocker = rusqlite::Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    assert!(!store.insert_one(&record("held", "a@x.com", None)));
    {
        let mut tx = store.begin_mailbox().unwrap();
        let err = tx.insert(&record("held", "a@x.com", None)).unwrap_err();
        assert!(matches!(err, StoreError::Busy), "got {err:?}");
    }
    let (ok, failed) = store.insert_batch(&[record("held", "a@x.com", None)], 10);
    assert_eq!((ok, failed), (0, 1));

    blocker.execute_batch("ROLLBACK;").unwrap();
    assert!(store.insert_one(&record("free", "a@x.com", None)));
    assert_eq!(store.row_count().unwrap(), 1);
}
