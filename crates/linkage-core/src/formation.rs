//! Group formation.
//!
//! Discovers brand-new clusters among unresolved records. Records are
//! bucketed by birth date (records without one all share the "today" bucket,
//! so they only ever cluster with each other), every unordered pair inside a
//! bucket is examined in ascending record-id order, and matching pairs grow
//! single-linkage clusters: the first endpoint to acquire a group claims it
//! for everything it later matches. Buckets are the flush boundary; a run
//! cancelled mid-bucket unwinds that bucket and persists nothing for it.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use linkage_store::{
    BatchOrigin, GroupId, PersistenceSink, RecordId, UpdateBatch, UpdateItem,
};

use crate::config::EngineConfig;
use crate::consistency;
use crate::error::LinkageError;
use crate::group::{attach_record, GroupTable};
use crate::predicate::{check_all, Predicate};
use crate::record::MatchTable;
use crate::CancelFlag;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationReport {
    pub buckets: usize,
    pub pairs_examined: u64,
    pub groups_created: usize,
    pub records_attached: usize,
    pub consistency_changes: usize,
    pub cancelled: bool,
}

/// Run formation over every unresolved record.
///
/// `today` keys the bucket shared by records without a birth date; callers
/// pass the current date so replays and tests stay deterministic.
pub fn form_groups(
    records: &mut MatchTable,
    groups: &mut GroupTable,
    config: &EngineConfig,
    today: NaiveDate,
    cancel: &CancelFlag,
    sink: &mut dyn PersistenceSink,
) -> Result<FormationReport, LinkageError> {
    let ctx = config.match_context();
    let mut report = FormationReport::default();

    let mut buckets: BTreeMap<NaiveDate, Vec<RecordId>> = BTreeMap::new();
    for id in records.unresolved() {
        let date = records
            .record(id)
            .and_then(|r| r.birth_date)
            .unwrap_or(today);
        buckets.entry(date).or_default().push(id);
    }

    for (bucket_date, bucket) in &buckets {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        if bucket.len() < 2 {
            continue;
        }

        let mut created: Vec<GroupId> = Vec::new();
        let mut attached: Vec<RecordId> = Vec::new();
        let mut unwound = false;

        'pairs: for (i, &a) in bucket.iter().enumerate() {
            if cancel.is_cancelled() {
                unwound = true;
                break 'pairs;
            }
            for &b in &bucket[i + 1..] {
                report.pairs_examined += 1;
                if !check_all(&config.formation_predicates, records, a, b, &ctx) {
                    continue;
                }
                let group_a = records.record(a).and_then(|r| r.group);
                let group_b = records.record(b).and_then(|r| r.group);
                match (group_a, group_b) {
                    (None, None) => {
                        let g = groups.insert(None);
                        created.push(g);
                        attach_record(records, groups, a, g)?;
                        attach_record(records, groups, b, g)?;
                        attached.push(a);
                        attached.push(b);
                    }
                    (Some(g), None) => {
                        if joinable(records, groups, b, g) {
                            attach_record(records, groups, b, g)?;
                            attached.push(b);
                        }
                    }
                    (None, Some(g)) => {
                        if joinable(records, groups, a, g) {
                            attach_record(records, groups, a, g)?;
                            attached.push(a);
                        }
                    }
                    // Both endpoints already claimed a group this pass;
                    // first-claim wins and groups are never merged here.
                    (Some(_), Some(_)) => {}
                }
            }
        }

        if unwound {
            for &record in &attached {
                records.set_group(record, None)?;
            }
            for &g in &created {
                groups.delete(g)?;
            }
            report.cancelled = true;
            break;
        }

        for &g in &created {
            let birth_date = groups
                .member_records(g)
                .iter()
                .find_map(|&m| records.record(m).and_then(|r| r.birth_date));
            groups.set_birth_date(g, birth_date)?;
        }

        if !created.is_empty() {
            debug!(
                bucket = %bucket_date,
                records = bucket.len(),
                groups = created.len(),
                "formed groups in bucket"
            );
        }

        report.buckets += 1;
        report.groups_created += created.len();
        report.records_attached += attached.len();

        if !attached.is_empty() {
            let mut batch = UpdateBatch::new(BatchOrigin::Formation);
            for &g in &created {
                let group = groups.group(g).ok_or(LinkageError::UnknownGroup { group: g })?;
                batch.push(UpdateItem::GroupUpsert {
                    group: g,
                    birth_date: group.birth_date,
                    inconsistent: group.inconsistent,
                    person: group.person,
                });
            }
            for &record in &attached {
                let row = records
                    .record(record)
                    .ok_or(LinkageError::UnknownRecord { record })?;
                batch.push(UpdateItem::RecordUpdate {
                    record,
                    person: row.person,
                    group: row.group,
                });
            }
            sink.apply(&batch).map_err(LinkageError::Store)?;

            let mut flags = UpdateBatch::new(BatchOrigin::Consistency);
            let outcomes = consistency::refresh_groups(records, groups, &created, &ctx, &mut flags)?;
            if !outcomes.is_empty() {
                sink.apply(&flags).map_err(LinkageError::Store)?;
            }
            report.consistency_changes += outcomes.len();
        }
    }

    info!(
        buckets = report.buckets,
        groups = report.groups_created,
        attached = report.records_attached,
        cancelled = report.cancelled,
        "formation finished"
    );
    Ok(report)
}

/// Seed one record into a brand-new group against the unresolved pool.
///
/// Used by intake and split re-seek, where there is no date-homogeneous
/// bucket: the pool spans all dates, so the formation predicates are extended
/// with a date-equality check. At most one group is created; every pool
/// record matching the seed joins it. Batch items for the new group and its
/// members are pushed onto `batch`; the caller owns flushing and consistency.
pub fn form_group_for(
    seed: RecordId,
    records: &mut MatchTable,
    groups: &mut GroupTable,
    config: &EngineConfig,
    batch: &mut UpdateBatch,
) -> Result<Option<GroupId>, LinkageError> {
    let existing = records
        .record(seed)
        .ok_or(LinkageError::UnknownRecord { record: seed })?
        .group;
    if existing.is_some() {
        return Ok(existing);
    }

    let ctx = config.match_context();
    let mut predicates = Vec::with_capacity(config.formation_predicates.len() + 1);
    predicates.push(Predicate::EqualDate);
    predicates.extend(config.formation_predicates.iter().copied());

    let mut group: Option<GroupId> = None;
    let mut attached: Vec<RecordId> = Vec::new();
    for other in records.unresolved() {
        if other == seed {
            continue;
        }
        if !check_all(&predicates, records, seed, other, &ctx) {
            continue;
        }
        let g = match group {
            Some(g) => {
                if !joinable(records, groups, other, g) {
                    continue;
                }
                g
            }
            None => {
                let g = groups.insert(None);
                attach_record(records, groups, seed, g)?;
                attached.push(seed);
                group = Some(g);
                g
            }
        };
        attach_record(records, groups, other, g)?;
        attached.push(other);
    }

    if let Some(g) = group {
        let birth_date = groups
            .member_records(g)
            .iter()
            .find_map(|&m| records.record(m).and_then(|r| r.birth_date));
        groups.set_birth_date(g, birth_date)?;

        let row = groups.group(g).ok_or(LinkageError::UnknownGroup { group: g })?;
        batch.push(UpdateItem::GroupUpsert {
            group: g,
            birth_date: row.birth_date,
            inconsistent: row.inconsistent,
            person: row.person,
        });
        for &record in &attached {
            let row = records
                .record(record)
                .ok_or(LinkageError::UnknownRecord { record })?;
            batch.push(UpdateItem::RecordUpdate {
                record,
                person: row.person,
                group: row.group,
            });
        }
    }
    Ok(group)
}

/// Whether a record may join a group without landing next to a forbidden
/// record. Pair predicates only see two records at a time; this is the
/// cluster-level check that keeps mutually-forbidden records apart even when
/// they never get compared directly.
fn joinable(records: &MatchTable, groups: &GroupTable, record: RecordId, group: GroupId) -> bool {
    if records.is_group_forbidden(record, group) {
        return false;
    }
    match (groups.members(group), records.forbidden_records(record)) {
        (Some(members), Some(forbidden)) => members.is_disjoint(forbidden),
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkage_store::{HypostasisId, MemorySink, SourceRecord};

    fn add_record(
        table: &mut MatchTable,
        last: &str,
        first: &str,
        middle: &str,
        birth: Option<NaiveDate>,
    ) -> RecordId {
        let snapshot = SourceRecord {
            last_name: Some(last.to_string()),
            first_name: Some(first.to_string()),
            middle_name: Some(middle.to_string()),
            birth_date: birth,
            valid_to: None,
        };
        let hypostasis = HypostasisId::new(table.len() as u32);
        table.insert(hypostasis, None, &snapshot).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn run(
        records: &mut MatchTable,
        groups: &mut GroupTable,
        sink: &mut MemorySink,
    ) -> FormationReport {
        form_groups(
            records,
            groups,
            &EngineConfig::default(),
            today(),
            &CancelFlag::new(),
            sink,
        )
        .unwrap()
    }

    #[test]
    fn test_identical_pair_forms_a_consistent_group() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();
        let a = add_record(&mut records, "Ivanov", "Ivan", "Petrovich", date(2000, 1, 1));
        let b = add_record(&mut records, "Ivanov", "Ivan", "Petrovich", date(2000, 1, 1));

        let report = run(&mut records, &mut groups, &mut sink);
        assert_eq!(report.groups_created, 1);
        assert_eq!(report.records_attached, 2);

        let g = records.record(a).unwrap().group.unwrap();
        assert_eq!(records.record(b).unwrap().group, Some(g));
        let group = groups.group(g).unwrap();
        assert_eq!(group.birth_date, date(2000, 1, 1));
        assert!(!group.inconsistent);
    }

    #[test]
    fn test_two_edit_patronymic_does_not_match() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();
        add_record(&mut records, "Ivanov", "Ivan", "Petrovich", date(2000, 1, 1));
        add_record(&mut records, "Ivanov", "Ivan", "Pavlovich", date(2000, 1, 1));

        let report = run(&mut records, &mut groups, &mut sink);
        assert_eq!(report.groups_created, 0);
        assert!(groups.is_empty());
    }

    #[test]
    fn test_dated_records_never_meet_undated_ones() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();
        let a = add_record(&mut records, "Ivanov", "Ivan", "Petrovich", date(2000, 1, 1));
        let b = add_record(&mut records, "Ivanov", "Ivan", "Petrovich", None);
        let c = add_record(&mut records, "Ivanov", "Ivan", "Petrovich", None);

        let report = run(&mut records, &mut groups, &mut sink);
        assert_eq!(report.groups_created, 1);
        assert!(records.record(a).unwrap().group.is_none());
        let g = records.record(b).unwrap().group.unwrap();
        assert_eq!(records.record(c).unwrap().group, Some(g));
        // The null-date bucket leaves its group without a representative date.
        assert_eq!(groups.group(g).unwrap().birth_date, None);
    }

    #[test]
    fn test_single_linkage_is_transitive() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();
        // a-b and b-c are one keystroke apart; a-c is two.
        let a = add_record(&mut records, "Smirnov", "Ivan", "Petrovich", date(1999, 5, 5));
        let b = add_record(&mut records, "Smirnov", "Ivan", "Petrovich", date(1999, 5, 5));
        let c = add_record(&mut records, "Smirnnov", "Ivan", "Petrovich", date(1999, 5, 5));

        let report = run(&mut records, &mut groups, &mut sink);
        assert_eq!(report.groups_created, 1);
        let g = records.record(a).unwrap().group.unwrap();
        assert_eq!(records.record(b).unwrap().group, Some(g));
        assert_eq!(records.record(c).unwrap().group, Some(g));
        assert_eq!(groups.member_count(g), 3);
    }

    #[test]
    fn test_formation_is_idempotent() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();
        add_record(&mut records, "Ivanov", "Ivan", "", date(2000, 1, 1));
        add_record(&mut records, "Ivanov", "Ivan", "", date(2000, 1, 1));

        let first = run(&mut records, &mut groups, &mut sink);
        assert_eq!(first.groups_created, 1);
        let memberships: Vec<_> = records.iter().map(|r| r.group).collect();

        let second = run(&mut records, &mut groups, &mut sink);
        assert_eq!(second.groups_created, 0);
        assert_eq!(second.records_attached, 0);
        let after: Vec<_> = records.iter().map(|r| r.group).collect();
        assert_eq!(after, memberships);
    }

    #[test]
    fn test_forbidden_pair_never_meets_even_transitively() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();
        let a = add_record(&mut records, "Orlov", "Igor", "", date(1991, 3, 3));
        let b = add_record(&mut records, "Orlov", "Igor", "", date(1991, 3, 3));
        // c matches both a and b directly.
        let c = add_record(&mut records, "Orlov", "Igor", "", date(1991, 3, 3));
        records.forbid_pair(a, b).unwrap();

        run(&mut records, &mut groups, &mut sink);
        let group_a = records.record(a).unwrap().group;
        let group_b = records.record(b).unwrap().group;
        assert!(group_a.is_some());
        // a claimed c first; b may not follow c into a's group.
        assert_eq!(records.record(c).unwrap().group, group_a);
        assert_ne!(group_a, group_b);
    }

    #[test]
    fn test_cancel_before_start_touches_nothing() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();
        add_record(&mut records, "Ivanov", "Ivan", "", date(2000, 1, 1));
        add_record(&mut records, "Ivanov", "Ivan", "", date(2000, 1, 1));

        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = form_groups(
            &mut records,
            &mut groups,
            &EngineConfig::default(),
            today(),
            &cancel,
            &mut sink,
        )
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.groups_created, 0);
        assert!(groups.is_empty());
        assert!(sink.batches.is_empty());
        assert!(records.iter().all(|r| r.group.is_none()));
    }

    #[test]
    fn test_flush_writes_groups_then_records() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();
        add_record(&mut records, "Ivanov", "Ivan", "", date(2000, 1, 1));
        add_record(&mut records, "Ivanov", "Ivan", "", date(2000, 1, 1));

        run(&mut records, &mut groups, &mut sink);
        let formation: Vec<_> = sink
            .batches
            .iter()
            .filter(|b| b.origin == BatchOrigin::Formation)
            .collect();
        assert_eq!(formation.len(), 1);
        assert!(matches!(formation[0].items[0], UpdateItem::GroupUpsert { .. }));
        assert_eq!(
            formation[0]
                .items
                .iter()
                .filter(|i| matches!(i, UpdateItem::RecordUpdate { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_form_group_for_requires_matching_dates() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let seed = add_record(&mut records, "Belov", "Oleg", "", date(1990, 1, 1));
        let same = add_record(&mut records, "Belov", "Oleg", "", date(1990, 1, 1));
        let other_date = add_record(&mut records, "Belov", "Oleg", "", date(1985, 2, 2));
        let undated = add_record(&mut records, "Belov", "Oleg", "", None);

        let mut batch = UpdateBatch::new(BatchOrigin::Split);
        let g = form_group_for(seed, &mut records, &mut groups, &EngineConfig::default(), &mut batch)
            .unwrap()
            .unwrap();

        assert_eq!(records.record(same).unwrap().group, Some(g));
        assert!(records.record(other_date).unwrap().group.is_none());
        // Date equality is lenient, so the undated record joins too.
        assert_eq!(records.record(undated).unwrap().group, Some(g));
        assert_eq!(groups.group(g).unwrap().birth_date, date(1990, 1, 1));
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_form_group_for_with_no_match_creates_nothing() {
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let seed = add_record(&mut records, "Belov", "Oleg", "", None);
        add_record(&mut records, "Volkov", "Pyotr", "", None);

        let mut batch = UpdateBatch::new(BatchOrigin::Split);
        let g = form_group_for(seed, &mut records, &mut groups, &EngineConfig::default(), &mut batch)
            .unwrap();
        assert!(g.is_none());
        assert!(groups.is_empty());
        assert!(batch.is_empty());
    }
}
