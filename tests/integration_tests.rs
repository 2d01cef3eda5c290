//! Integration tests for the complete linkage pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Source catalogs → identity seeding → match records
//! - Convergence passes (assignment, formation, consistency, merge)
//! - Journal + snapshot recovery across restarts
//! - Administrative workflows (split, removal, forbidden-edge revocation)
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::tempdir;

use linkage_core::{
    EngineConfig, LinkageEngine, LinkageError, LinkageState, Predicate, ProgressEvent,
};
use linkage_store::{
    HypostasisId, JournalSink, MemoryCatalog, MemorySink, RecordId, SourceCatalog, SourceKey,
    SourceRecord,
};

fn row(last: &str, first: &str, middle: &str, birth: Option<NaiveDate>) -> SourceRecord {
    SourceRecord {
        last_name: Some(last.to_string()),
        first_name: Some(first.to_string()),
        middle_name: Some(middle.to_string()),
        birth_date: birth,
        valid_to: None,
    }
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 1).unwrap()
}

/// One person appearing in all three source systems, one appearing in two,
/// and one lone appearance.
fn mixed_catalog() -> MemoryCatalog {
    let mut catalog = MemoryCatalog::new();
    let ivanov = date(1990, 1, 1);
    catalog.add_student(101, row("Ivanov", "Ivan", "Petrovich", ivanov));
    catalog.add_employee(7, row("Ivanov", "Ivan", "Petrovich", ivanov));
    catalog.add_postgraduate(3, row("Ivanov", "Ivan", "Petrovich", ivanov));

    let orlova = date(1987, 3, 14);
    catalog.add_student(102, row("Orlova", "Anna", "Sergeevna", orlova));
    catalog.add_employee(8, row("Orlova", "Anna", "Sergeevna", orlova));

    catalog.add_student(103, row("Volkov", "Pyotr", "Ilyich", date(1975, 11, 2)));
    catalog
}

fn memory_engine(config: EngineConfig) -> LinkageEngine {
    LinkageEngine::new(LinkageState::new(), config, Box::new(MemorySink::new()))
}

// ============================================================================
// Catalog → Seed → Convergence
// ============================================================================

#[test]
fn test_full_pipeline_collapses_appearances_onto_persons() {
    let catalog = mixed_catalog();
    let mut engine = memory_engine(EngineConfig {
        merge_on_pass: true,
        ..EngineConfig::default()
    });

    let sync = engine.sync(&catalog).unwrap();
    assert_eq!(sync.seed.hypostases_created, 6);
    assert_eq!(sync.seed.persons_created, 6);
    assert_eq!(sync.records_created, 6);

    let report = engine.run_pass(today()).unwrap();
    assert_eq!(report.formation.groups_created, 2);
    assert_eq!(report.groups_merged, 2);
    // Three Ivanov persons collapse into one, two Orlov(a)s into one.
    assert_eq!(report.persons_deleted, 3);
    assert!(report.errors.is_empty());

    let state = engine.state();
    assert_eq!(state.store.person_count(), 3);
    // Each hypostasis of a merged cluster points at its canonical person.
    for g in state.groups.ids() {
        let canonical = state.groups.group(g).unwrap().person.unwrap();
        for member in state.groups.member_records(g) {
            let record = state.records.record(member).unwrap();
            assert_eq!(record.person, Some(canonical));
            let hypostasis = state.store.hypostasis(record.hypostasis).unwrap();
            assert_eq!(hypostasis.person, Some(canonical));
        }
    }
    // Volkov stays unresolved with his own person.
    assert_eq!(state.records.unresolved().len(), 1);
}

#[test]
fn test_typo_cluster_stays_inconsistent_and_unmerged() {
    let mut catalog = MemoryCatalog::new();
    let birth = date(1987, 3, 14);
    catalog.add_student(1, row("Orlova", "Anna", "", birth));
    catalog.add_employee(2, row("Orlov", "Anna", "", birth));

    let mut engine = memory_engine(EngineConfig {
        merge_on_pass: true,
        ..EngineConfig::default()
    });
    engine.sync(&catalog).unwrap();
    let report = engine.run_pass(today()).unwrap();

    // The fuzzy pair clusters but strict consistency fails, so no merge runs.
    assert_eq!(report.formation.groups_created, 1);
    assert_eq!(report.formation.consistency_changes, 1);
    assert_eq!(report.groups_merged, 0);

    let state = engine.state();
    let g = state.groups.ids()[0];
    assert!(state.groups.group(g).unwrap().inconsistent);
    assert!(state.groups.group(g).unwrap().person.is_none());
    assert_eq!(state.store.person_count(), 2);
}

#[test]
fn test_later_appearance_is_assigned_and_merge_keeps_identity() {
    let mut catalog = MemoryCatalog::new();
    let birth = date(1990, 1, 1);
    catalog.add_student(101, row("Ivanov", "Ivan", "Petrovich", birth));
    catalog.add_employee(7, row("Ivanov", "Ivan", "Petrovich", birth));

    let mut engine = memory_engine(EngineConfig {
        merge_on_pass: true,
        ..EngineConfig::default()
    });
    engine.sync(&catalog).unwrap();
    engine.run_pass(today()).unwrap();
    let canonical = {
        let state = engine.state();
        let g = state.groups.ids()[0];
        state.groups.group(g).unwrap().person.unwrap()
    };

    // The same person surfaces in a third system.
    catalog.add_postgraduate(3, row("Ivanov", "Ivan", "Petrovich", birth));
    engine.sync(&catalog).unwrap();
    let report = engine.run_pass(today()).unwrap();

    assert_eq!(report.assignment.records_attached, 1);
    assert_eq!(report.formation.groups_created, 0);
    assert_eq!(report.groups_merged, 1);

    let state = engine.state();
    let g = state.groups.ids()[0];
    // Re-merging an extended group must not flip its canonical person.
    assert_eq!(state.groups.group(g).unwrap().person, Some(canonical));
    assert_eq!(state.groups.member_count(g), 3);
    assert_eq!(state.store.person_count(), 1);
}

#[test]
fn test_progress_events_report_each_phase() {
    let catalog = mixed_catalog();
    let mut engine = memory_engine(EngineConfig {
        merge_on_pass: true,
        ..EngineConfig::default()
    });
    engine.sync(&catalog).unwrap();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    engine.on_event(Box::new(move |event| {
        if let ProgressEvent::PhaseStarted { phase, .. } = event {
            log.lock().unwrap().push(phase.to_string());
        }
    }));
    engine.run_pass(today()).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["assignment", "formation", "consistency", "merge"]
    );
}

// ============================================================================
// Journal + Snapshot Recovery
// ============================================================================

#[test]
fn test_state_survives_restart_via_wal_and_snapshot() {
    let dir = tempdir().unwrap();
    let catalog = mixed_catalog();

    // First process: seed, converge, merge, checkpoint.
    let (persons, groups) = {
        let journal = Arc::new(JournalSink::open(dir.path()).unwrap());
        let mut engine = LinkageEngine::new(
            LinkageState::new(),
            EngineConfig {
                merge_on_pass: true,
                ..EngineConfig::default()
            },
            Box::new(Arc::clone(&journal)),
        );
        engine.sync(&catalog).unwrap();
        engine.run_pass(today()).unwrap();
        journal.checkpoint(engine.state()).unwrap();
        let state = engine.into_state();
        (state.store.person_count(), state.groups.ids())
    };

    // Second process: recover from the snapshot, take in one new hypostasis,
    // crash before checkpointing (the intake lives only in the WAL).
    {
        let journal = Arc::new(JournalSink::open(dir.path()).unwrap());
        let state = LinkageState::recover(&journal).unwrap();
        assert_eq!(state.store.person_count(), persons);
        assert_eq!(state.groups.ids(), groups);

        let mut catalog = mixed_catalog();
        catalog.add_student(104, row("Ivanov", "Ivan", "Petrovich", date(1990, 1, 1)));
        let mut engine = LinkageEngine::new(
            state,
            EngineConfig::default(),
            Box::new(Arc::clone(&journal)),
        );
        let sync = engine.sync(&catalog).unwrap();
        assert_eq!(sync.seed.hypostases_created, 1);
        assert_eq!(sync.records_created, 1);

        let hypostasis = engine
            .state()
            .store
            .find_source(&SourceKey::Student(104))
            .unwrap();
        let report = engine.intake(hypostasis, &catalog).unwrap();
        assert!(report.group.is_some());
    }

    // Third process: snapshot plus WAL tail. The intaken record must be back
    // in its group, resolvable by source key.
    let journal = JournalSink::open(dir.path()).unwrap();
    let recovered = LinkageState::recover(&journal).unwrap();
    let hypostasis = recovered
        .store
        .find_source(&SourceKey::Student(104))
        .unwrap();
    let record = recovered.records.by_hypostasis(hypostasis).unwrap();
    assert!(recovered.records.record(record).unwrap().group.is_some());
}

#[test]
fn test_snapshot_file_is_plain_json() {
    let dir = tempdir().unwrap();
    let journal = Arc::new(JournalSink::open(dir.path()).unwrap());
    let mut engine = LinkageEngine::new(
        LinkageState::new(),
        EngineConfig::default(),
        Box::new(Arc::clone(&journal)),
    );
    engine.sync(&mixed_catalog()).unwrap();
    engine.run_pass(today()).unwrap();
    journal.checkpoint(engine.state()).unwrap();

    let text = std::fs::read_to_string(journal.snapshot_path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(value.get("store").is_some());
    assert!(value.get("records").is_some());
    assert!(value.get("groups").is_some());
}

// ============================================================================
// Administrative Workflows
// ============================================================================

#[test]
fn test_split_then_allow_lets_the_pair_recluster() {
    let mut catalog = MemoryCatalog::new();
    let birth = date(1990, 1, 1);
    catalog.add_student(1, row("Ivanov", "Ivan", "", birth));
    catalog.add_employee(2, row("Ivanov", "Ivan", "", birth));

    let mut engine = memory_engine(EngineConfig::default());
    engine.sync(&catalog).unwrap();
    engine.run_pass(today()).unwrap();
    let g = engine.state().groups.ids()[0];

    let report = engine.split(g).unwrap();
    assert_eq!(report.members_freed, 2);
    assert_eq!(report.forbidden_edges_added, 1);
    assert!(engine.state().groups.is_empty());

    // The forbidden edge holds across passes.
    let report = engine.run_pass(today()).unwrap();
    assert_eq!(report.formation.groups_created, 0);

    engine.allow_pair(RecordId::new(0), RecordId::new(1)).unwrap();
    let report = engine.run_pass(today()).unwrap();
    assert_eq!(report.formation.groups_created, 1);
}

#[test]
fn test_merged_group_cannot_be_split_or_shed_merged_members() {
    let catalog = mixed_catalog();
    let mut engine = memory_engine(EngineConfig {
        merge_on_pass: true,
        ..EngineConfig::default()
    });
    engine.sync(&catalog).unwrap();
    engine.run_pass(today()).unwrap();

    let state = engine.state();
    let ivanov_group = state
        .groups
        .iter()
        .find(|g| state.groups.member_count(g.id) == 3)
        .unwrap()
        .id;

    let err = engine.split(ivanov_group).unwrap_err();
    assert!(matches!(err, LinkageError::IllegalSplit { .. }));

    let member = engine.state().groups.member_records(ivanov_group)[0];
    let err = engine.remove(member).unwrap_err();
    assert!(matches!(err, LinkageError::MergedRecordRemoval { .. }));
}

#[test]
fn test_removed_record_is_barred_from_its_old_group() {
    let mut catalog = MemoryCatalog::new();
    let birth = date(1990, 1, 1);
    catalog.add_student(1, row("Ivanov", "Ivan", "", birth));
    catalog.add_employee(2, row("Ivanov", "Ivan", "", birth));
    catalog.add_postgraduate(3, row("Ivanov", "Ivan", "", birth));

    let mut engine = memory_engine(EngineConfig::default());
    engine.sync(&catalog).unwrap();
    engine.run_pass(today()).unwrap();
    let g = engine.state().groups.ids()[0];
    let victim = engine.state().groups.member_records(g)[2];

    let report = engine.remove(victim).unwrap();
    assert_eq!(report.group, g);
    assert_eq!(report.destination, None);
    assert_eq!(engine.state().groups.member_count(g), 2);

    // Passes keep honoring the record-to-group edge.
    let report = engine.run_pass(today()).unwrap();
    assert_eq!(report.assignment.records_attached, 0);
    assert!(engine.state().records.record(victim).unwrap().group.is_none());

    // Revoking it lets the next pass pull the record back in.
    engine.allow_group(victim, g).unwrap();
    let report = engine.run_pass(today()).unwrap();
    assert_eq!(report.assignment.records_attached, 1);
    assert_eq!(engine.state().groups.member_count(g), 3);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_drives_the_engine() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("linkage.json");
    std::fs::write(
        &path,
        r#"{
            "formation_predicates": ["equal_full_name", "not_forbidden"],
            "assignment_predicates": ["equal_full_name", "equal_date", "not_forbidden"]
        }"#,
    )?;
    let config = EngineConfig::from_file(&path)?;
    assert_eq!(
        config.formation_predicates,
        vec![Predicate::EqualFullName, Predicate::NotForbidden]
    );

    // Under exact-name formation the Orlova/Orlov typo pair stays apart.
    let mut catalog = MemoryCatalog::new();
    let birth = date(1987, 3, 14);
    catalog.add_student(1, row("Orlova", "Anna", "", birth));
    catalog.add_employee(2, row("Orlov", "Anna", "", birth));

    let mut engine = memory_engine(config);
    engine.sync(&catalog).unwrap();
    let report = engine.run_pass(today()).unwrap();
    assert_eq!(report.formation.groups_created, 0);

    // The default fuzzy configuration clusters them.
    let mut engine = memory_engine(EngineConfig::default());
    engine.sync(&catalog).unwrap();
    let report = engine.run_pass(today()).unwrap();
    assert_eq!(report.formation.groups_created, 1);
    Ok(())
}

#[test]
fn test_catalog_round_trips_through_json() {
    let catalog = mixed_catalog();
    let text = serde_json::to_string(&catalog).unwrap();
    let back: MemoryCatalog = serde_json::from_str(&text).unwrap();

    let key = SourceKey::Student(101);
    assert_eq!(back.lookup(&key).unwrap(), catalog.lookup(&key).unwrap());
    let key = SourceKey::employee("7");
    assert_eq!(back.lookup(&key).unwrap(), catalog.lookup(&key).unwrap());
}

#[test]
fn test_intake_of_unknown_hypostasis_fails_cleanly() {
    let mut engine = memory_engine(EngineConfig::default());
    let err = engine
        .intake(HypostasisId::new(42), &MemoryCatalog::new())
        .unwrap_err();
    assert!(matches!(
        err,
        LinkageError::Store(linkage_store::StoreError::UnknownHypostasis { .. })
    ));
}
