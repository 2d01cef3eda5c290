//! Merge engine.
//!
//! Collapses a consistent multi-member group onto one canonical person. This
//! is the only code allowed to delete a person, and it may only delete one
//! whose reference count hit zero after the rewrites. Flush order is strict:
//! record and hypostasis rewrites first, person deletions in their own batch
//! last, so a failure partway never leaves a hypostasis pointing at a person
//! that is gone.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::info;

use linkage_store::{
    BatchOrigin, GroupId, HypostasisId, IdentityStore, PersistenceSink, PersonId, RecordId,
    UpdateBatch, UpdateItem,
};

use crate::consistency;
use crate::error::LinkageError;
use crate::group::{detach_record, GroupTable};
use crate::predicate::MatchContext;
use crate::record::MatchTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub group: GroupId,
    pub target: PersonId,
    pub records_rewritten: usize,
    pub hypostases_rewritten: usize,
    pub persons_deleted: usize,
    pub groups_collapsed: usize,
}

/// Check merge preconditions and resolve the target person.
///
/// The target is the first member's person, unless the group already carries
/// a canonical person, in which case the member holding it becomes the
/// anchor (re-merging an extended group must not flip its identity).
fn merge_target(
    records: &MatchTable,
    groups: &GroupTable,
    group_id: GroupId,
) -> Result<(Vec<RecordId>, RecordId, PersonId), LinkageError> {
    let group = groups
        .group(group_id)
        .ok_or(LinkageError::UnknownGroup { group: group_id })?;
    if group.inconsistent {
        return Err(LinkageError::GroupInconsistent { group: group_id });
    }
    let members = groups.member_records(group_id);
    if members.len() < 2 {
        return Err(LinkageError::GroupTooSmall {
            group: group_id,
            members: members.len() as u64,
        });
    }

    let (anchor, target) = match group.person {
        Some(canonical) => {
            let anchor = members
                .iter()
                .copied()
                .find(|&m| {
                    records
                        .record(m)
                        .is_some_and(|r| r.person == Some(canonical))
                })
                .ok_or(LinkageError::CanonicalPersonMissing { group: group_id })?;
            (anchor, canonical)
        }
        None => {
            let anchor = members[0];
            let target = records
                .record(anchor)
                .and_then(|r| r.person)
                .ok_or(LinkageError::RecordWithoutPerson { record: anchor })?;
            (anchor, target)
        }
    };
    Ok((members, anchor, target))
}

/// Merge one consistent group onto its target person.
pub fn merge_group(
    store: &mut IdentityStore,
    records: &mut MatchTable,
    groups: &mut GroupTable,
    group_id: GroupId,
    sink: &mut dyn PersistenceSink,
) -> Result<MergeReport, LinkageError> {
    let (members, anchor, target) = merge_target(records, groups, group_id)?;

    let mut batch = UpdateBatch::new(BatchOrigin::Merge);
    let mut candidates: Vec<PersonId> = Vec::new();
    let mut rewritten = 0usize;

    for &member in &members {
        if member == anchor {
            continue;
        }
        let (old_person, hypostasis) = {
            let row = records
                .record(member)
                .ok_or(LinkageError::UnknownRecord { record: member })?;
            (row.person, row.hypostasis)
        };
        if old_person == Some(target) {
            continue;
        }
        if let Some(old) = old_person {
            candidates.push(old);
        }
        store.assign_person(hypostasis, Some(target))?;
        records.set_person(member, Some(target))?;
        rewritten += 1;
        batch.push(UpdateItem::RecordUpdate {
            record: member,
            person: Some(target),
            group: Some(group_id),
        });
        batch.push(UpdateItem::HypostasisUpdate {
            hypostasis,
            person: Some(target),
        });
    }

    groups.set_person(group_id, Some(target))?;
    let group = groups
        .group(group_id)
        .ok_or(LinkageError::UnknownGroup { group: group_id })?;
    batch.push(UpdateItem::GroupUpsert {
        group: group_id,
        birth_date: group.birth_date,
        inconsistent: group.inconsistent,
        person: group.person,
    });
    sink.apply(&batch).map_err(LinkageError::Store)?;

    let persons_deleted = delete_orphans(store, candidates, sink)?;

    info!(
        group = %group_id,
        target = %target,
        rewritten,
        deleted = persons_deleted,
        "group merged"
    );
    Ok(MergeReport {
        group: group_id,
        target,
        records_rewritten: rewritten,
        hypostases_rewritten: rewritten,
        persons_deleted,
        groups_collapsed: 0,
    })
}

/// Person-pivot merge: rewrite every record and hypostasis in the system
/// that references one of the group's non-target persons.
///
/// Records absorbed from other groups move into this group; a donor group
/// left with fewer than two members is deleted and its remainder freed back
/// to the unresolved pool. Administrative operation.
pub fn merge_group_by_persons(
    store: &mut IdentityStore,
    records: &mut MatchTable,
    groups: &mut GroupTable,
    group_id: GroupId,
    ctx: &MatchContext,
    sink: &mut dyn PersistenceSink,
) -> Result<MergeReport, LinkageError> {
    let (members, _, target) = merge_target(records, groups, group_id)?;

    let mut pivots = RoaringBitmap::new();
    for &member in &members {
        if let Some(person) = records.record(member).and_then(|r| r.person) {
            if person != target {
                pivots.insert(person.raw());
            }
        }
    }

    let absorbed: Vec<(RecordId, HypostasisId, Option<GroupId>)> = records
        .iter()
        .filter(|r| r.person.map_or(false, |p| pivots.contains(p.raw())))
        .map(|r| (r.id, r.hypostasis, r.group))
        .collect();

    let mut batch = UpdateBatch::new(BatchOrigin::Merge);
    let mut donor_groups: Vec<GroupId> = Vec::new();
    let mut hypostases_rewritten = 0usize;

    for &(record, hypostasis, old_group) in &absorbed {
        if old_group != Some(group_id) {
            if let Some(og) = old_group {
                groups.detach(og, record)?;
                donor_groups.push(og);
            }
            groups.attach(group_id, record)?;
            records.set_group(record, Some(group_id))?;
        }
        store.assign_person(hypostasis, Some(target))?;
        records.set_person(record, Some(target))?;
        hypostases_rewritten += 1;
        batch.push(UpdateItem::RecordUpdate {
            record,
            person: Some(target),
            group: Some(group_id),
        });
        batch.push(UpdateItem::HypostasisUpdate {
            hypostasis,
            person: Some(target),
        });
    }

    // Hypostases with no match record yet can still reference a pivot person.
    let strays: Vec<HypostasisId> = store
        .hypostases()
        .filter(|(_, h)| h.person.map_or(false, |p| pivots.contains(p.raw())))
        .map(|(id, _)| id)
        .collect();
    for hypostasis in strays {
        store.assign_person(hypostasis, Some(target))?;
        hypostases_rewritten += 1;
        batch.push(UpdateItem::HypostasisUpdate {
            hypostasis,
            person: Some(target),
        });
    }

    donor_groups.sort_unstable();
    donor_groups.dedup();
    let mut groups_collapsed = 0usize;
    for donor in donor_groups {
        if groups.group(donor).is_none() || groups.member_count(donor) >= 2 {
            continue;
        }
        for record in groups.member_records(donor) {
            detach_record(records, groups, record)?;
            let row = records
                .record(record)
                .ok_or(LinkageError::UnknownRecord { record })?;
            batch.push(UpdateItem::RecordUpdate {
                record,
                person: row.person,
                group: None,
            });
        }
        groups.delete(donor)?;
        groups_collapsed += 1;
        batch.push(UpdateItem::GroupDelete { group: donor });
    }

    groups.set_person(group_id, Some(target))?;
    let group = groups
        .group(group_id)
        .ok_or(LinkageError::UnknownGroup { group: group_id })?;
    batch.push(UpdateItem::GroupUpsert {
        group: group_id,
        birth_date: group.birth_date,
        inconsistent: group.inconsistent,
        person: group.person,
    });
    sink.apply(&batch).map_err(LinkageError::Store)?;

    // Absorbed members usually differ from the originals, so the flag has to
    // be recomputed before anyone trusts it.
    let mut flags = UpdateBatch::new(BatchOrigin::Consistency);
    let outcomes = consistency::refresh_groups(records, groups, &[group_id], ctx, &mut flags)?;
    if !outcomes.is_empty() {
        sink.apply(&flags).map_err(LinkageError::Store)?;
    }

    let candidates: Vec<PersonId> = pivots.iter().map(PersonId::new).collect();
    let persons_deleted = delete_orphans(store, candidates, sink)?;

    info!(
        group = %group_id,
        target = %target,
        absorbed = absorbed.len(),
        collapsed = groups_collapsed,
        deleted = persons_deleted,
        "group merged by persons"
    );
    Ok(MergeReport {
        group: group_id,
        target,
        records_rewritten: absorbed.len(),
        hypostases_rewritten,
        persons_deleted,
        groups_collapsed,
    })
}

/// Delete the candidates whose reference count reached zero, in their own
/// batch after every rewrite batch is down.
fn delete_orphans(
    store: &mut IdentityStore,
    mut candidates: Vec<PersonId>,
    sink: &mut dyn PersistenceSink,
) -> Result<usize, LinkageError> {
    candidates.sort_unstable();
    candidates.dedup();

    let mut batch = UpdateBatch::new(BatchOrigin::Merge);
    let mut deleted = 0usize;
    for person in candidates {
        if store.person(person).is_none() || store.person_ref_count(person) > 0 {
            continue;
        }
        store.remove_person(person)?;
        deleted += 1;
        batch.push(UpdateItem::PersonDelete { person });
    }
    if !batch.is_empty() {
        sink.apply(&batch).map_err(LinkageError::Store)?;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use linkage_store::{MemorySink, Person, SourceKey, SourceRecord};

    use crate::group::attach_record;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn add_linked(
        store: &mut IdentityStore,
        records: &mut MatchTable,
        last: &str,
        birth: Option<NaiveDate>,
    ) -> (PersonId, HypostasisId, RecordId) {
        let person = store.insert_person(Person {
            last_name: last.to_string(),
            first_name: "Ivan".to_string(),
            middle_name: String::new(),
            birth_date: birth,
        });
        let key = SourceKey::Student(store.hypostasis_count() as u32);
        let hypostasis = store.insert_hypostasis(key).unwrap();
        store.assign_person(hypostasis, Some(person)).unwrap();

        let snapshot = SourceRecord {
            last_name: Some(last.to_string()),
            first_name: Some("Ivan".to_string()),
            middle_name: Some(String::new()),
            birth_date: birth,
            valid_to: None,
        };
        let record = records.insert(hypostasis, Some(person), &snapshot).unwrap();
        (person, hypostasis, record)
    }

    fn group_of(
        records: &mut MatchTable,
        groups: &mut GroupTable,
        members: &[RecordId],
    ) -> GroupId {
        let g = groups.insert(None);
        for &m in members {
            attach_record(records, groups, m, g).unwrap();
        }
        g
    }

    #[test]
    fn test_merge_rewrites_everyone_and_deletes_orphans() {
        let mut store = IdentityStore::new();
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();

        let (p0, h0, r0) = add_linked(&mut store, &mut records, "Ivanov", date(1990, 1, 1));
        let (p1, h1, r1) = add_linked(&mut store, &mut records, "Ivanov", date(1990, 1, 1));
        let g = group_of(&mut records, &mut groups, &[r0, r1]);

        let report = merge_group(&mut store, &mut records, &mut groups, g, &mut sink).unwrap();
        assert_eq!(report.target, p0);
        assert_eq!(report.records_rewritten, 1);
        assert_eq!(report.persons_deleted, 1);

        assert_eq!(store.hypostasis(h0).unwrap().person, Some(p0));
        assert_eq!(store.hypostasis(h1).unwrap().person, Some(p0));
        assert_eq!(records.record(r1).unwrap().person, Some(p0));
        assert_eq!(groups.group(g).unwrap().person, Some(p0));
        assert!(store.person(p1).is_none());
        assert_eq!(store.person_ref_count(p0), 2);
    }

    #[test]
    fn test_person_with_an_outside_hypostasis_survives() {
        let mut store = IdentityStore::new();
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();

        let (_, _, r0) = add_linked(&mut store, &mut records, "Ivanov", None);
        let (p1, _, r1) = add_linked(&mut store, &mut records, "Ivanov", None);
        // A second appearance of p1 outside the merging group.
        let outside = store.insert_hypostasis(SourceKey::Postgraduate(99)).unwrap();
        store.assign_person(outside, Some(p1)).unwrap();

        let g = group_of(&mut records, &mut groups, &[r0, r1]);
        let report = merge_group(&mut store, &mut records, &mut groups, g, &mut sink).unwrap();

        assert_eq!(report.persons_deleted, 0);
        assert!(store.person(p1).is_some());
        assert_eq!(store.person_ref_count(p1), 1);
        assert_eq!(store.hypostasis(outside).unwrap().person, Some(p1));
        assert_eq!(records.record(r1).unwrap().person, Some(report.target));
    }

    #[test]
    fn test_deletions_flush_after_rewrites() {
        let mut store = IdentityStore::new();
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();

        let (_, _, r0) = add_linked(&mut store, &mut records, "Ivanov", None);
        let (_, _, r1) = add_linked(&mut store, &mut records, "Ivanov", None);
        let g = group_of(&mut records, &mut groups, &[r0, r1]);
        merge_group(&mut store, &mut records, &mut groups, g, &mut sink).unwrap();

        assert_eq!(sink.batches.len(), 2);
        assert!(sink.batches[0]
            .items
            .iter()
            .all(|i| !matches!(i, UpdateItem::PersonDelete { .. })));
        assert!(sink.batches[1]
            .items
            .iter()
            .all(|i| matches!(i, UpdateItem::PersonDelete { .. })));
    }

    #[test]
    fn test_inconsistent_group_refuses_to_merge() {
        let mut store = IdentityStore::new();
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();

        let (_, _, r0) = add_linked(&mut store, &mut records, "Ivanov", None);
        let (_, _, r1) = add_linked(&mut store, &mut records, "Ivanova", None);
        let g = group_of(&mut records, &mut groups, &[r0, r1]);
        groups.set_inconsistent(g, true).unwrap();

        let err = merge_group(&mut store, &mut records, &mut groups, g, &mut sink).unwrap_err();
        assert!(matches!(err, LinkageError::GroupInconsistent { .. }));
    }

    #[test]
    fn test_undersized_group_refuses_to_merge() {
        let mut store = IdentityStore::new();
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();

        let (_, _, r0) = add_linked(&mut store, &mut records, "Ivanov", None);
        let g = group_of(&mut records, &mut groups, &[r0]);

        let err = merge_group(&mut store, &mut records, &mut groups, g, &mut sink).unwrap_err();
        assert!(matches!(err, LinkageError::GroupTooSmall { members: 1, .. }));
    }

    #[test]
    fn test_remerge_is_idempotent_and_keeps_the_canonical_person() {
        let mut store = IdentityStore::new();
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();

        let (p0, _, r0) = add_linked(&mut store, &mut records, "Ivanov", None);
        let (_, _, r1) = add_linked(&mut store, &mut records, "Ivanov", None);
        let g = group_of(&mut records, &mut groups, &[r0, r1]);
        merge_group(&mut store, &mut records, &mut groups, g, &mut sink).unwrap();

        // A new member joins the merged group and gets merged in turn.
        let (p2, h2, r2) = add_linked(&mut store, &mut records, "Ivanov", None);
        attach_record(&mut records, &mut groups, r2, g).unwrap();
        let report = merge_group(&mut store, &mut records, &mut groups, g, &mut sink).unwrap();

        assert_eq!(report.target, p0);
        assert_eq!(report.records_rewritten, 1);
        assert_eq!(store.hypostasis(h2).unwrap().person, Some(p0));
        assert!(store.person(p2).is_none());

        let again = merge_group(&mut store, &mut records, &mut groups, g, &mut sink).unwrap();
        assert_eq!(again.records_rewritten, 0);
        assert_eq!(again.persons_deleted, 0);
    }

    #[test]
    fn test_merge_by_persons_absorbs_and_collapses_donors() {
        let mut store = IdentityStore::new();
        let mut records = MatchTable::new();
        let mut groups = GroupTable::new();
        let mut sink = MemorySink::new();

        let (p0, _, r0) = add_linked(&mut store, &mut records, "Ivanov", None);
        let (p1, _, r1) = add_linked(&mut store, &mut records, "Ivanov", None);
        let g = group_of(&mut records, &mut groups, &[r0, r1]);

        // p1 appears again in a two-record donor group elsewhere.
        let (_, h2, r2) = add_linked(&mut store, &mut records, "Ivanoff", None);
        store.assign_person(h2, Some(p1)).unwrap();
        records.set_person(r2, Some(p1)).unwrap();
        let (_, _, r3) = add_linked(&mut store, &mut records, "Ivanoff", None);
        let donor = group_of(&mut records, &mut groups, &[r2, r3]);

        let report = merge_group_by_persons(
            &mut store,
            &mut records,
            &mut groups,
            g,
            &MatchContext::default(),
            &mut sink,
        )
        .unwrap();

        assert_eq!(report.target, p0);
        // r1 and r2 referenced p1; both were rewritten and pulled in.
        assert_eq!(report.records_rewritten, 2);
        assert_eq!(report.groups_collapsed, 1);
        assert_eq!(report.persons_deleted, 1);

        assert_eq!(records.record(r2).unwrap().group, Some(g));
        assert_eq!(records.record(r2).unwrap().person, Some(p0));
        assert!(groups.group(donor).is_none());
        // The donor's remainder went back to the unresolved pool.
        assert_eq!(records.record(r3).unwrap().group, None);
        // Absorbing "Ivanoff" into an "Ivanov" group flips consistency.
        assert!(groups.group(g).unwrap().inconsistent);
    }
}
