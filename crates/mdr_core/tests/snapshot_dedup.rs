use mdr_core::db::open_db_in_memory;
use mdr_core::repo::snapshot_repo::SqliteSnapshotRepository;
use mdr_core::{
    EntityKind, FieldwiseEquality, FindOptions, ManualClock, SaveRequest, SnapshotContent,
    StrategyRegistry, VersionedEntityService, VersioningError,
};
use rusqlite::Connection;
use std::sync::Arc;

fn setup() -> (Connection, Arc<ManualClock>) {
    (open_db_in_memory().unwrap(), Arc::new(ManualClock::new(1_000)))
}

fn service<'c>(conn: &'c Connection, clock: &Arc<ManualClock>) -> VersionedEntityService<'c> {
    let service = VersionedEntityService::try_new(conn)
        .unwrap()
        .with_clock(clock.clone());
    service.create_library("Sponsor", true).unwrap();
    service
}

fn group(name: &str) -> SnapshotContent {
    SnapshotContent::new(EntityKind::ActivityGroup).with_field("name", name)
}

fn activity(name: &str, group_uid: &str) -> SnapshotContent {
    SnapshotContent::new(EntityKind::Activity)
        .with_field("name", name)
        .with_field("is_data_collected", true)
        .with_reference("activity_groupings", group_uid)
}

fn create(service: &VersionedEntityService<'_>, content: SnapshotContent) -> String {
    service
        .save(None, SaveRequest::create("Sponsor", content, "alice"))
        .unwrap()
        .root
        .uid
}

fn snapshot_count(conn: &Connection) -> i64 {
    SqliteSnapshotRepository::new(conn).count().unwrap()
}

#[test]
fn identical_content_is_stored_once() {
    let (conn, clock) = setup();
    let service = service(&conn, &clock);

    let first = service
        .save(None, SaveRequest::create("Sponsor", group("Vital signs"), "alice"))
        .unwrap();
    let second = service
        .save(None, SaveRequest::create("Sponsor", group("Vital signs"), "bob"))
        .unwrap();

    assert_ne!(first.root.uid, second.root.uid);
    assert_eq!(
        first.edge.unwrap().snapshot_id,
        second.edge.unwrap().snapshot_id
    );
    assert_eq!(snapshot_count(&conn), 1);
}

#[test]
fn reverting_content_points_back_at_the_earlier_snapshot() {
    let (conn, clock) = setup();
    let service = service(&conn, &clock);
    let created = service
        .save(None, SaveRequest::create("Sponsor", group("Vital signs"), "alice"))
        .unwrap();
    let uid = created.root.uid;
    let original = created.edge.unwrap().snapshot_id;

    clock.set(2_000);
    let renamed = service
        .save(Some(&uid), SaveRequest::edit(group("Vitals"), "alice"))
        .unwrap();
    assert!(renamed.changed);
    assert_ne!(renamed.edge.unwrap().snapshot_id, original);

    clock.set(3_000);
    let reverted = service
        .save(Some(&uid), SaveRequest::edit(group("Vital signs"), "alice"))
        .unwrap();
    assert!(reverted.changed);
    assert_eq!(reverted.edge.unwrap().snapshot_id, original);
    assert_eq!(snapshot_count(&conn), 2);
}

#[test]
fn ignored_attributes_do_not_mint_snapshots() {
    let (conn, clock) = setup();
    let strategies = StrategyRegistry::default().register(
        EntityKind::ActivityGroup,
        Arc::new(FieldwiseEquality::new().ignoring("comment")),
    );
    let service = service(&conn, &clock).with_strategies(strategies);
    let uid = create(&service, group("Vital signs"));

    clock.set(2_000);
    let outcome = service
        .save(
            Some(&uid),
            SaveRequest::edit(group("Vital signs").with_field("comment", "typo"), "alice"),
        )
        .unwrap();

    assert!(!outcome.changed);
    assert_eq!(snapshot_count(&conn), 1);
    let latest = service.find_by_uid(&uid, &FindOptions::latest()).unwrap();
    assert_eq!(latest.content, group("Vital signs"));
}

#[test]
fn draft_with_stale_reference_pin_is_rewritten_once() {
    let (conn, clock) = setup();
    let service = service(&conn, &clock);
    let group_uid = create(&service, group("Vital signs"));
    let activity_uid = create(&service, activity("Heart rate", &group_uid));

    clock.set(2_000);
    service
        .save(Some(&group_uid), SaveRequest::edit(group("Vitals"), "alice"))
        .unwrap();

    clock.set(3_000);
    let refreshed = service
        .save(
            Some(&activity_uid),
            SaveRequest::edit(activity("Heart rate", &group_uid), "alice"),
        )
        .unwrap();
    assert!(refreshed.changed);

    clock.set(4_000);
    let settled = service
        .save(
            Some(&activity_uid),
            SaveRequest::edit(activity("Heart rate", &group_uid), "alice"),
        )
        .unwrap();
    assert!(!settled.changed);
    assert_eq!(
        settled.edge.unwrap().snapshot_id,
        refreshed.edge.unwrap().snapshot_id
    );

    let pinned: Option<String> = conn
        .query_row(
            "SELECT target_snapshot_id FROM snapshot_refs
             WHERE snapshot_id = (
                SELECT snapshot_id FROM version_edges
                WHERE root_uid = ?1 AND end_date IS NULL
             );",
            [&activity_uid],
            |row| row.get(0),
        )
        .unwrap();
    let group_now = service
        .find_by_uid(&group_uid, &FindOptions::latest())
        .unwrap();
    assert_eq!(pinned, Some(group_now.edge.snapshot_id));
}

#[test]
fn new_version_on_final_ignores_stale_pins() {
    let (conn, clock) = setup();
    let service = service(&conn, &clock);
    let group_uid = create(&service, group("Vital signs"));
    let activity_uid = create(&service, activity("Heart rate", &group_uid));

    clock.set(2_000);
    let released = service
        .save(Some(&activity_uid), SaveRequest::approve("alice"))
        .unwrap()
        .edge
        .unwrap();
    clock.set(3_000);
    service
        .save(Some(&group_uid), SaveRequest::edit(group("Vitals"), "alice"))
        .unwrap();

    clock.set(4_000);
    let opened = service
        .save(
            Some(&activity_uid),
            SaveRequest::new_version("alice").with_content(activity("Heart rate", &group_uid)),
        )
        .unwrap();
    assert!(!opened.changed);
    assert_eq!(opened.edge.unwrap().snapshot_id, released.snapshot_id);
}

#[test]
fn dangling_reference_rolls_back_the_whole_save() {
    let (conn, clock) = setup();
    let service = service(&conn, &clock);

    let err = service
        .save(
            None,
            SaveRequest::create("Sponsor", activity("Heart rate", "ActivityGroup_000099"), "alice"),
        )
        .unwrap_err();
    assert!(matches!(err, VersioningError::BusinessRule(_)));
    assert_eq!(snapshot_count(&conn), 0);
    assert!(service.list_roots(EntityKind::Activity).unwrap().is_empty());

    let group_uid = create(&service, group("Vital signs"));
    let activity_uid = create(&service, activity("Heart rate", &group_uid));
    assert_eq!(activity_uid, "Activity_000001");
}

#[test]
fn references_to_deleted_roots_are_rejected() {
    let (conn, clock) = setup();
    let service = service(&conn, &clock);
    let group_uid = create(&service, group("Vital signs"));
    let activity_uid = create(&service, activity("Heart rate", &group_uid));

    clock.set(2_000);
    service
        .save(Some(&group_uid), SaveRequest::delete("alice"))
        .unwrap();

    clock.set(3_000);
    let err = service
        .save(
            Some(&activity_uid),
            SaveRequest::edit(activity("Pulse", &group_uid), "alice"),
        )
        .unwrap_err();
    assert!(matches!(err, VersioningError::BusinessRule(_)));
}

#[test]
fn shared_snapshot_survives_deletion_of_one_owner() {
    let (conn, clock) = setup();
    let service = service(&conn, &clock);
    let first = create(&service, group("Vital signs"));
    let second = create(&service, group("Vital signs"));

    clock.set(2_000);
    service.save(Some(&first), SaveRequest::delete("alice")).unwrap();
    assert_eq!(snapshot_count(&conn), 1);
    let survivor = service.find_by_uid(&second, &FindOptions::latest()).unwrap();
    assert_eq!(survivor.content, group("Vital signs"));

    clock.set(3_000);
    service.save(Some(&second), SaveRequest::delete("alice")).unwrap();
    assert_eq!(snapshot_count(&conn), 0);
}

#[test]
fn content_of_another_kind_is_invalid() {
    let (conn, clock) = setup();
    let service = service(&conn, &clock);
    let uid = create(&service, group("Vital signs"));

    clock.set(2_000);
    let err = service
        .save(
            Some(&uid),
            SaveRequest::edit(
                SnapshotContent::new(EntityKind::ActivitySubGroup).with_field("name", "x"),
                "alice",
            ),
        )
        .unwrap_err();
    assert!(matches!(err, VersioningError::InvalidData(_)));
}

#[test]
fn non_finite_floats_are_rejected_before_anything_is_written() {
    let (conn, clock) = setup();
    let service = service(&conn, &clock);
    let visit = |window: f64| {
        SnapshotContent::new(EntityKind::StudyVisit)
            .with_field("name", "Screening")
            .with_field("window", window)
    };

    let err = service
        .save(None, SaveRequest::create("Sponsor", visit(f64::NAN), "alice"))
        .unwrap_err();
    assert!(matches!(err, VersioningError::InvalidData(_)));
    assert!(service.list_roots(EntityKind::StudyVisit).unwrap().is_empty());
    assert_eq!(snapshot_count(&conn), 0);

    let uid = create(&service, visit(7.5));
    clock.advance(1);
    let err = service
        .save(Some(&uid), SaveRequest::edit(visit(f64::INFINITY), "alice"))
        .unwrap_err();
    assert!(matches!(err, VersioningError::InvalidData(_)));

    let latest = service.find_by_uid(&uid, &FindOptions::latest()).unwrap();
    assert_eq!(latest.edge.version.to_string(), "0.1");
    assert_eq!(service.history(&uid).unwrap().len(), 1);
    assert_eq!(snapshot_count(&conn), 1);
}
