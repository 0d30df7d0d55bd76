use mdr_core::db::open_db_in_memory;
use mdr_core::model::snapshot::{content_address, ReferencePins};
use mdr_core::{
    EntityKind, FindOptions, ManualClock, SaveRequest, SnapshotContent, Version,
    VersionedEntityService, VersioningError,
};
use proptest::prelude::*;
use std::sync::Arc;

fn visit(label: u8) -> SnapshotContent {
    SnapshotContent::new(EntityKind::StudyVisit)
        .with_field("name", format!("Visit {label}"))
        .with_field("window_days", i64::from(label))
}

fn request(action: u8, label: u8) -> SaveRequest {
    match action {
        0 => SaveRequest::edit(visit(label), "prop"),
        1 => SaveRequest::approve("prop"),
        2 => SaveRequest::new_version("prop"),
        3 => SaveRequest::new_version("prop").with_content(visit(label)),
        4 => SaveRequest::inactivate("prop"),
        _ => SaveRequest::reactivate("prop"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn random_lifecycles_keep_the_ledger_consistent(
        steps in prop::collection::vec((0u8..6, 0u8..3, 0i64..40), 1..30)
    ) {
        let conn = open_db_in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let service = VersionedEntityService::try_new(&conn)
            .unwrap()
            .with_clock(clock.clone());
        service.create_library("Sponsor", true).unwrap();
        let uid = service
            .save(None, SaveRequest::create("Sponsor", visit(0), "prop"))
            .unwrap()
            .root
            .uid;

        let mut previous = Version::INITIAL_DRAFT;
        let mut applied = 1;
        for (action, label, delta) in steps {
            clock.advance(delta);
            match service.save(Some(&uid), request(action, label)) {
                Ok(outcome) => {
                    let version = outcome.edge.unwrap().version;
                    prop_assert!(version >= previous, "{version} after {previous}");
                    previous = version;
                    applied += 1;
                }
                Err(VersioningError::InvalidTransition { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }

        prop_assert!(service.verify(&uid).is_ok());
        prop_assert_eq!(service.history(&uid).unwrap().len(), applied);

        let versions = service.get_all_versions(&uid).unwrap();
        prop_assert_eq!(versions.len(), applied);
        for expected in &versions {
            let resolved = service
                .find_by_uid(&uid, &FindOptions::at_date(expected.edge.start_date))
                .unwrap();
            prop_assert_eq!(resolved.edge.edge_id, expected.edge.edge_id);
        }
    }

    #[test]
    fn content_address_ignores_insertion_order(
        fields in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
    ) {
        let forward = fields
            .iter()
            .fold(SnapshotContent::new(EntityKind::CtTerm), |content, (name, value)| {
                content.with_field(name.clone(), *value)
            });
        let backward = fields
            .iter()
            .rev()
            .fold(SnapshotContent::new(EntityKind::CtTerm), |content, (name, value)| {
                content.with_field(name.clone(), *value)
            });

        let pins = ReferencePins::new();
        prop_assert_eq!(
            content_address(&forward, &pins).unwrap(),
            content_address(&backward, &pins).unwrap()
        );
    }
}
