//! Split and single-record removal.
//!
//! Splitting reverses a group that should never have formed: every member
//! pair gets a permanent forbidden edge, the group is deleted, and each freed
//! record hunts for a new home (existing groups first, then the unresolved
//! pool). Removal frees one record the same way but leaves the group alive,
//! with a forbidden-group edge so the record cannot drift back in.

use serde::{Deserialize, Serialize};
use tracing::info;

use linkage_store::{BatchOrigin, GroupId, PersistenceSink, RecordId, UpdateBatch, UpdateItem};

use crate::assignment::seek_group_for;
use crate::config::EngineConfig;
use crate::consistency;
use crate::error::{EntityError, LinkageError};
use crate::formation::form_group_for;
use crate::group::{attach_record, detach_record, GroupTable};
use crate::record::MatchTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitReport {
    pub group: GroupId,
    pub members_freed: usize,
    pub forbidden_edges_added: usize,
    /// Freed records attached to surviving groups.
    pub reassigned: usize,
    /// Freed records that seeded fresh groups.
    pub regrouped: usize,
    pub consistency_changes: usize,
    pub errors: Vec<EntityError>,
}

impl SplitReport {
    fn new(group: GroupId) -> Self {
        Self {
            group,
            members_freed: 0,
            forbidden_edges_added: 0,
            reassigned: 0,
            regrouped: 0,
            consistency_changes: 0,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalReport {
    pub record: RecordId,
    /// The group the record was removed from.
    pub group: GroupId,
    /// Where the record landed afterwards, if anywhere.
    pub destination: Option<GroupId>,
    pub errors: Vec<EntityError>,
}

/// Tear a group apart.
pub fn split_group(
    records: &mut MatchTable,
    groups: &mut GroupTable,
    group_id: GroupId,
    config: &EngineConfig,
    sink: &mut dyn PersistenceSink,
) -> Result<SplitReport, LinkageError> {
    let group = groups
        .group(group_id)
        .ok_or(LinkageError::UnknownGroup { group: group_id })?;
    if group.person.is_some() {
        return Err(LinkageError::IllegalSplit { group: group_id });
    }

    let members = groups.member_records(group_id);
    let mut report = SplitReport::new(group_id);
    report.members_freed = members.len();

    let mut batch = UpdateBatch::new(BatchOrigin::Split);
    for (i, &a) in members.iter().enumerate() {
        for &b in &members[i + 1..] {
            if records.forbid_pair(a, b)? {
                report.forbidden_edges_added += 1;
                batch.push(UpdateItem::ForbidRecords { a, b });
            }
        }
    }
    for &member in &members {
        detach_record(records, groups, member)?;
        let row = records
            .record(member)
            .ok_or(LinkageError::UnknownRecord { record: member })?;
        batch.push(UpdateItem::RecordUpdate {
            record: member,
            person: row.person,
            group: None,
        });
    }
    groups.delete(group_id)?;
    batch.push(UpdateItem::GroupDelete { group: group_id });
    sink.apply(&batch).map_err(LinkageError::Store)?;

    let (reassigned, regrouped, changes) =
        reseek(&members, records, groups, config, sink, &mut report.errors)?;
    report.reassigned = reassigned;
    report.regrouped = regrouped;
    report.consistency_changes = changes;

    info!(
        group = %group_id,
        freed = report.members_freed,
        edges = report.forbidden_edges_added,
        reassigned = report.reassigned,
        regrouped = report.regrouped,
        "group split"
    );
    Ok(report)
}

/// Remove a single record from its group.
///
/// Refused when the group would drop below two members (split it instead)
/// and when the record was already merged onto the group's canonical person.
pub fn remove_from_group(
    records: &mut MatchTable,
    groups: &mut GroupTable,
    record: RecordId,
    config: &EngineConfig,
    sink: &mut dyn PersistenceSink,
) -> Result<RemovalReport, LinkageError> {
    let row = records
        .record(record)
        .ok_or(LinkageError::UnknownRecord { record })?;
    let group_id = row.group.ok_or(LinkageError::RecordNotGrouped { record })?;
    let group = groups
        .group(group_id)
        .ok_or(LinkageError::UnknownGroup { group: group_id })?;

    if group.person.is_some() && row.person == group.person {
        return Err(LinkageError::MergedRecordRemoval {
            record,
            group: group_id,
        });
    }
    let members = groups.member_count(group_id);
    if members == 2 {
        return Err(LinkageError::SplitRequired { group: group_id });
    }
    if members < 2 {
        return Err(LinkageError::GroupTooSmall {
            group: group_id,
            members,
        });
    }

    let mut batch = UpdateBatch::new(BatchOrigin::Split);
    if records.forbid_group(record, group_id)? {
        batch.push(UpdateItem::ForbidGroup {
            record,
            group: group_id,
        });
    }
    detach_record(records, groups, record)?;
    let row = records
        .record(record)
        .ok_or(LinkageError::UnknownRecord { record })?;
    batch.push(UpdateItem::RecordUpdate {
        record,
        person: row.person,
        group: None,
    });
    sink.apply(&batch).map_err(LinkageError::Store)?;

    // The shrunk group may have lost exactly the member that made it
    // inconsistent.
    let mut flags = UpdateBatch::new(BatchOrigin::Consistency);
    let outcomes = consistency::refresh_groups(
        records,
        groups,
        &[group_id],
        &config.match_context(),
        &mut flags,
    )?;
    if !outcomes.is_empty() {
        sink.apply(&flags).map_err(LinkageError::Store)?;
    }

    let mut errors = Vec::new();
    reseek(&[record], records, groups, config, sink, &mut errors)?;
    let destination = records
        .record(record)
        .ok_or(LinkageError::UnknownRecord { record })?
        .group;

    info!(
        record = %record,
        group = %group_id,
        destination = ?destination,
        "record removed from group"
    );
    Ok(RemovalReport {
        record,
        group: group_id,
        destination,
        errors,
    })
}

/// Find new homes for freed records: existing groups first, then fresh
/// formation against the unresolved pool. One batch of final pointers, then
/// one consistency batch for every group that gained members.
fn reseek(
    freed: &[RecordId],
    records: &mut MatchTable,
    groups: &mut GroupTable,
    config: &EngineConfig,
    sink: &mut dyn PersistenceSink,
    errors: &mut Vec<EntityError>,
) -> Result<(usize, usize, usize), LinkageError> {
    let mut batch = UpdateBatch::new(BatchOrigin::Split);
    let mut touched: Vec<GroupId> = Vec::new();
    let mut reassigned = 0usize;
    let mut regrouped = 0usize;

    for &record in freed {
        if records
            .record(record)
            .ok_or(LinkageError::UnknownRecord { record })?
            .group
            .is_some()
        {
            // Pulled into a group formed for an earlier freed record.
            continue;
        }
        if let Some(group) = seek_group_for(record, records, groups, config, errors)? {
            attach_record(records, groups, record, group)?;
            let row = records
                .record(record)
                .ok_or(LinkageError::UnknownRecord { record })?;
            batch.push(UpdateItem::RecordUpdate {
                record,
                person: row.person,
                group: Some(group),
            });
            touched.push(group);
            reassigned += 1;
        } else if let Some(group) = form_group_for(record, records, groups, config, &mut batch)? {
            touched.push(group);
            regrouped += 1;
        }
    }

    if !batch.is_empty() {
        sink.apply(&batch).map_err(LinkageError::Store)?;
    }

    touched.sort_unstable();
    touched.dedup();
    let mut flags = UpdateBatch::new(BatchOrigin::Consistency);
    let outcomes = consistency::refresh_groups(
        records,
        groups,
        &touched,
        &config.match_context(),
        &mut flags,
    )?;
    if !outcomes.is_empty() {
        sink.apply(&flags).map_err(LinkageError::Store)?;
    }
    Ok((reassigned, regrouped, outcomes.len()))
}
