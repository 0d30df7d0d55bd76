use mdr_core::db::{open_db, open_db_with_config};
use mdr_core::{
    EngineConfig, EntityCache, EntityKind, FindOptions, SaveRequest, SnapshotContent, Version,
    VersionedEntityService, VersioningError, VersioningResult,
};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

fn footnote(text: &str) -> SnapshotContent {
    SnapshotContent::new(EntityKind::StudySoaFootnote).with_field("text", text)
}

fn seed(path: &Path) -> String {
    let conn = open_db(path).unwrap();
    let service = VersionedEntityService::try_new(&conn).unwrap();
    service.create_library("Sponsor", true).unwrap();
    service
        .save(None, SaveRequest::create("Sponsor", footnote("seed"), "alice"))
        .unwrap()
        .root
        .uid
}

#[test]
fn concurrent_edits_on_one_root_get_distinct_versions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mdr.db");
    let uid = seed(&path);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|author| {
            let path = path.clone();
            let uid = uid.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let service = VersionedEntityService::try_new(&conn).unwrap();
                barrier.wait();
                service
                    .save(Some(&uid), SaveRequest::edit(footnote(author), author))
                    .unwrap()
                    .edge
                    .unwrap()
                    .version
            })
        })
        .collect();

    let mut versions: Vec<Version> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    versions.sort();
    assert_eq!(versions, vec![Version::new(0, 2), Version::new(0, 3)]);

    let conn = open_db(&path).unwrap();
    let service = VersionedEntityService::try_new(&conn).unwrap();
    service.verify(&uid).unwrap();
    assert_eq!(service.history(&uid).unwrap().len(), 3);
    let open_edges: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM version_edges WHERE root_uid = ?1 AND end_date IS NULL;",
            [&uid],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(open_edges, 1);
}

#[test]
fn writer_blocked_past_busy_timeout_gets_retryable_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mdr.db");
    let uid = seed(&path);

    let holder = open_db(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let config = EngineConfig::from_json(r#"{"busy_timeout_ms": 50}"#).unwrap();
    let conn = open_db_with_config(&path, &config).unwrap();
    let service = VersionedEntityService::try_new(&conn).unwrap();

    let err = service
        .save(Some(&uid), SaveRequest::edit(footnote("blocked"), "bob"))
        .unwrap_err();
    assert!(matches!(err, VersioningError::Concurrency(_)));
    assert!(err.is_retryable());

    holder.execute_batch("ROLLBACK;").unwrap();
    let retried = service
        .save(Some(&uid), SaveRequest::edit(footnote("blocked"), "bob"))
        .unwrap();
    assert_eq!(retried.edge.unwrap().version, Version::new(0, 2));
}

#[test]
fn with_lock_commits_several_saves_together() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mdr.db");
    let first = seed(&path);

    let conn = open_db(&path).unwrap();
    let service = VersionedEntityService::try_new(&conn).unwrap();
    let second = service
        .save(None, SaveRequest::create("Sponsor", footnote("other"), "alice"))
        .unwrap()
        .root
        .uid;
    // Warm the cache so commit-time invalidation is observable.
    service.find_by_uid(&second, &FindOptions::latest()).unwrap();

    let created = service
        .with_lock(&first, |scope| {
            scope.save(Some(&first), SaveRequest::edit(footnote("first, edited"), "alice"))?;
            scope.save(Some(&second), SaveRequest::approve("alice"))?;
            let inside = scope.find_by_uid(&second, &FindOptions::latest())?;
            assert_eq!(inside.edge.version, Version::new(1, 0));
            scope.save(None, SaveRequest::create("Sponsor", footnote("third"), "alice"))
        })
        .unwrap();

    assert_eq!(created.root.uid, "StudySoAFootnote_000003");
    let first_now = service.find_by_uid(&first, &FindOptions::latest()).unwrap();
    assert_eq!(first_now.edge.version, Version::new(0, 2));
    let second_now = service.find_by_uid(&second, &FindOptions::latest()).unwrap();
    assert_eq!(second_now.edge.version, Version::new(1, 0));
}

#[test]
fn with_lock_rolls_back_everything_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mdr.db");
    let first = seed(&path);

    let conn = open_db(&path).unwrap();
    let service = VersionedEntityService::try_new(&conn).unwrap();
    let second = service
        .save(None, SaveRequest::create("Sponsor", footnote("other"), "alice"))
        .unwrap()
        .root
        .uid;

    let result: VersioningResult<()> = service.with_lock(&first, |scope| {
        scope.save(Some(&first), SaveRequest::edit(footnote("lost"), "alice"))?;
        scope.save(Some(&second), SaveRequest::approve("alice"))?;
        Err(VersioningError::BusinessRule("abort".to_string()))
    });
    assert!(matches!(result, Err(VersioningError::BusinessRule(_))));
    assert!(conn.is_autocommit());

    for uid in [&first, &second] {
        let latest = service.find_by_uid(uid, &FindOptions::latest()).unwrap();
        assert_eq!(latest.edge.version, Version::new(0, 1));
        assert_eq!(service.history(uid).unwrap().len(), 1);
    }
}

#[test]
fn reader_sees_saves_made_through_another_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mdr.db");
    let uid = seed(&path);

    let reader_conn = open_db(&path).unwrap();
    let reader = VersionedEntityService::try_new(&reader_conn).unwrap();
    let writer_conn = open_db(&path).unwrap();
    let writer = VersionedEntityService::try_new(&writer_conn).unwrap();

    let before = reader.find_by_uid(&uid, &FindOptions::latest()).unwrap();
    assert_eq!(before.edge.version, Version::new(0, 1));
    assert_eq!(reader.history(&uid).unwrap().len(), 1);

    writer
        .save(Some(&uid), SaveRequest::edit(footnote("changed"), "bob"))
        .unwrap();

    let after = reader.find_by_uid(&uid, &FindOptions::latest()).unwrap();
    assert_eq!(after.edge.version, Version::new(0, 2));
    assert_eq!(reader.get_all_versions(&uid).unwrap().len(), 2);
    assert_eq!(reader.history(&uid).unwrap().len(), 2);
}

#[test]
fn fill_stamped_before_a_commit_is_not_served() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mdr.db");
    let uid = seed(&path);

    let cache = EntityCache::default();
    let reader_conn = open_db(&path).unwrap();
    let reader = VersionedEntityService::try_new(&reader_conn)
        .unwrap()
        .with_cache(cache.clone());
    let writer_conn = open_db(&path).unwrap();
    let writer = VersionedEntityService::try_new(&writer_conn)
        .unwrap()
        .with_cache(cache.clone());

    let stale: Vec<_> = reader
        .get_all_versions(&uid)
        .unwrap()
        .into_iter()
        .map(|resolved| resolved.edge)
        .collect();
    writer
        .save(Some(&uid), SaveRequest::edit(footnote("changed"), "bob"))
        .unwrap();

    // A reader that loaded before the commit stores its result afterwards.
    cache.store_ledger(&uid, 0, Arc::new(stale));

    let latest = reader.find_by_uid(&uid, &FindOptions::latest()).unwrap();
    assert_eq!(latest.edge.version, Version::new(0, 2));
}

#[test]
fn plain_save_inside_with_lock_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mdr.db");
    let first = seed(&path);

    let conn = open_db(&path).unwrap();
    let service = VersionedEntityService::try_new(&conn).unwrap();
    let second = service
        .save(None, SaveRequest::create("Sponsor", footnote("other"), "alice"))
        .unwrap()
        .root
        .uid;

    let result = service.with_lock(&first, |_scope| {
        service.save(Some(&second), SaveRequest::approve("alice"))
    });
    match result {
        Err(VersioningError::BusinessRule(reason)) => assert!(reason.contains("LockedScope")),
        other => panic!("expected BusinessRule, got {other:?}"),
    }
    assert!(conn.is_autocommit());

    let latest = service.find_by_uid(&second, &FindOptions::latest()).unwrap();
    assert_eq!(latest.edge.version, Version::new(0, 1));
}
