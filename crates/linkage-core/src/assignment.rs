//! Group assignment.
//!
//! Attaches unresolved records to groups that already exist; never creates
//! one. A consistent group is represented by its first member alone (all
//! members are strictly equal, so one comparison decides). An inconsistent
//! group gets a full member scan, where [`ForbiddenScanPolicy`] decides what
//! a forbidden member does to the scan. The whole phase flushes once, at the
//! end of the record loop.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use linkage_store::{BatchOrigin, GroupId, PersistenceSink, RecordId, UpdateBatch, UpdateItem};

use crate::config::{EngineConfig, ForbiddenScanPolicy};
use crate::consistency;
use crate::error::{EntityError, LinkageError};
use crate::group::{attach_record, detach_record, GroupTable};
use crate::predicate::check_all;
use crate::record::MatchTable;
use crate::CancelFlag;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentReport {
    pub records_scanned: usize,
    pub records_attached: usize,
    pub groups_touched: usize,
    pub consistency_changes: usize,
    pub errors: Vec<EntityError>,
    pub cancelled: bool,
}

/// Find the existing group an unresolved record belongs to, if any.
///
/// Candidates are scanned in ascending group-id order. A record that already
/// has a group is reported as belonging to it; re-seeking is a no-op.
/// Corrupt candidates (fewer than two members) are pushed onto `errors` and
/// skipped; the scan keeps going.
pub fn seek_group_for(
    record: RecordId,
    records: &MatchTable,
    groups: &GroupTable,
    config: &EngineConfig,
    errors: &mut Vec<EntityError>,
) -> Result<Option<GroupId>, LinkageError> {
    let row = records
        .record(record)
        .ok_or(LinkageError::UnknownRecord { record })?;
    if row.group.is_some() {
        return Ok(row.group);
    }
    let ctx = config.match_context();

    for group in groups.iter() {
        if let (Some(own), Some(candidate)) = (row.birth_date, group.birth_date) {
            if own != candidate {
                continue;
            }
        }
        if records.is_group_forbidden(record, group.id) {
            continue;
        }

        let members = groups.member_records(group.id);
        if members.len() < 2 {
            let error = EntityError::GroupSize {
                group: group.id,
                members: members.len() as u64,
            };
            if !errors.contains(&error) {
                warn!(group = %group.id, members = members.len(), "undersized group skipped");
                errors.push(error);
            }
            continue;
        }

        if !group.inconsistent {
            // Members are interchangeable, so one comparison decides; the
            // forbidden check has to cover the whole membership because the
            // representative may not be the forbidden one.
            let disjoint = records.forbidden_records(record).map_or(true, |forbidden| {
                groups
                    .members(group.id)
                    .is_some_and(|m| m.is_disjoint(forbidden))
            });
            if !disjoint {
                continue;
            }
            if check_all(&config.assignment_predicates, records, record, members[0], &ctx) {
                return Ok(Some(group.id));
            }
        } else {
            for &member in &members {
                if records.is_pair_forbidden(record, member) {
                    match config.forbidden_scan_policy {
                        ForbiddenScanPolicy::SkipMember => continue,
                        ForbiddenScanPolicy::RejectGroup => break,
                    }
                }
                if check_all(&config.assignment_predicates, records, record, member, &ctx) {
                    return Ok(Some(group.id));
                }
            }
        }
    }
    Ok(None)
}

/// Run assignment over every unresolved record.
pub fn assign_records(
    records: &mut MatchTable,
    groups: &mut GroupTable,
    config: &EngineConfig,
    cancel: &CancelFlag,
    sink: &mut dyn PersistenceSink,
) -> Result<AssignmentReport, LinkageError> {
    let mut report = AssignmentReport::default();
    let mut attached: Vec<(RecordId, GroupId)> = Vec::new();

    for record in records.unresolved() {
        if cancel.is_cancelled() {
            for &(r, _) in &attached {
                detach_record(records, groups, r)?;
            }
            report.cancelled = true;
            report.records_attached = 0;
            info!("assignment cancelled, pass unwound");
            return Ok(report);
        }
        report.records_scanned += 1;
        if let Some(group) =
            seek_group_for(record, records, groups, config, &mut report.errors)?
        {
            attach_record(records, groups, record, group)?;
            attached.push((record, group));
        }
    }
    report.records_attached = attached.len();

    let mut touched: Vec<GroupId> = attached.iter().map(|&(_, g)| g).collect();
    touched.sort_unstable();
    touched.dedup();
    report.groups_touched = touched.len();

    if !attached.is_empty() {
        let mut batch = UpdateBatch::new(BatchOrigin::Assignment);
        for &(record, _) in &attached {
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
        report.consistency_changes = outcomes.len();
    }

    info!(
        scanned = report.records_scanned,
        attached = report.records_attached,
        groups = report.groups_touched,
        "assignment finished"
    );
    Ok(report)
}
