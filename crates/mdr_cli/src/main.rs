//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `mdr_core` linkage.
//! - Walk one entity through create, approve and new version on an in-memory
//!   database so the whole save path runs outside the test harness.
//! - Keep output deterministic for quick local sanity checks.

use mdr_core::db::open_db_in_memory;
use mdr_core::{
    EntityKind, FindOptions, ManualClock, SaveRequest, SnapshotContent, VersionedEntityService,
    VersioningResult,
};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    println!("mdr_core ping={}", mdr_core::ping());
    println!("mdr_core version={}", mdr_core::core_version());

    match run_lifecycle_probe() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mdr_core probe=failed error={err}");
            ExitCode::FAILURE
        }
    }
}

fn run_lifecycle_probe() -> VersioningResult<()> {
    let conn = open_db_in_memory()?;
    let clock = Arc::new(ManualClock::new(0));
    let service = VersionedEntityService::try_new(&conn)?.with_clock(clock.clone());
    service.create_library("Sponsor", true)?;

    let content = SnapshotContent::new(EntityKind::CtTerm)
        .with_field("name", "Aspirin")
        .with_field("definition", "Analgesic");
    let created = service.save(None, SaveRequest::create("Sponsor", content, "cli"))?;
    let uid = created.root.uid;

    clock.advance(1);
    service.save(Some(&uid), SaveRequest::approve("cli"))?;
    clock.advance(1);
    service.save(Some(&uid), SaveRequest::new_version("cli"))?;

    for resolved in service.get_all_versions(&uid)? {
        println!(
            "mdr_core probe uid={} version={} status={} open={}",
            uid,
            resolved.edge.version,
            resolved.edge.status,
            resolved.edge.is_open()
        );
    }
    let released = service.find_by_uid(&uid, &FindOptions::at_date(1))?;
    println!(
        "mdr_core probe at=1 version={} display_version={}",
        released.edge.version, released.display_version
    );
    Ok(())
}
