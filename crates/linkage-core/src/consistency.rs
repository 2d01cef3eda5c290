//! Consistency evaluator.
//!
//! A group is consistent when every member is strictly equal to its first
//! member on all four matchable fields. The flag gates merging: only a
//! consistent group may collapse onto one person. Evaluation is read-only
//! over the match table, so sweeping many groups fans out over rayon.

use rayon::prelude::*;
use tracing::debug;

use linkage_store::{GroupId, UpdateBatch, UpdateItem};

use crate::error::LinkageError;
use crate::group::GroupTable;
use crate::predicate::{MatchContext, Predicate};
use crate::record::MatchTable;

/// A group whose `inconsistent` flag changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyOutcome {
    pub group: GroupId,
    pub inconsistent: bool,
}

/// Evaluate a set of groups. Returns only the groups whose flag flipped, in
/// ascending group-id order. Deleted ids are skipped; groups with fewer than
/// two members are trivially consistent.
pub fn evaluate_groups(
    records: &MatchTable,
    groups: &GroupTable,
    targets: &[GroupId],
    ctx: &MatchContext,
) -> Vec<ConsistencyOutcome> {
    let mut targets = targets.to_vec();
    targets.sort_unstable();
    targets.dedup();

    let outcomes: Vec<ConsistencyOutcome> = targets
        .par_iter()
        .filter_map(|&id| {
            let group = groups.group(id)?;
            let members = groups.member_records(id);
            let inconsistent = match members.split_first() {
                Some((&first, rest)) if !rest.is_empty() => !rest.iter().all(|&member| {
                    Predicate::CompletelyEqualForConsistency.evaluate(records, first, member, ctx)
                }),
                _ => false,
            };
            (inconsistent != group.inconsistent).then_some(ConsistencyOutcome {
                group: id,
                inconsistent,
            })
        })
        .collect();

    if !outcomes.is_empty() {
        debug!(
            evaluated = targets.len(),
            changed = outcomes.len(),
            "consistency flags changed"
        );
    }
    outcomes
}

/// Evaluate every live group.
pub fn evaluate_all(
    records: &MatchTable,
    groups: &GroupTable,
    ctx: &MatchContext,
) -> Vec<ConsistencyOutcome> {
    evaluate_groups(records, groups, &groups.ids(), ctx)
}

/// Write changed flags into the group table and queue the rows for
/// persistence.
pub fn apply_outcomes(
    groups: &mut GroupTable,
    outcomes: &[ConsistencyOutcome],
    batch: &mut UpdateBatch,
) -> Result<(), LinkageError> {
    for outcome in outcomes {
        groups.set_inconsistent(outcome.group, outcome.inconsistent)?;
        let group = groups
            .group(outcome.group)
            .ok_or(LinkageError::UnknownGroup {
                group: outcome.group,
            })?;
        batch.push(UpdateItem::GroupUpsert {
            group: group.id,
            birth_date: group.birth_date,
            inconsistent: group.inconsistent,
            person: group.person,
        });
    }
    Ok(())
}

/// Evaluate, apply and queue in one step. Returns the changed groups.
pub fn refresh_groups(
    records: &MatchTable,
    groups: &mut GroupTable,
    targets: &[GroupId],
    ctx: &MatchContext,
    batch: &mut UpdateBatch,
) -> Result<Vec<ConsistencyOutcome>, LinkageError> {
    let outcomes = evaluate_groups(records, groups, targets, ctx);
    apply_outcomes(groups, &outcomes, batch)?;
    Ok(outcomes)
}
