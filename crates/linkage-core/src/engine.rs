//! The orchestrator.
//!
//! [`LinkageEngine`] owns the full in-memory linkage state and drives the
//! phases in their canonical order: assignment first (cheap, reuses existing
//! clusters), formation on the remainder, a full consistency sweep, then —
//! when enabled — a merge of every consistent multi-member group. It also
//! carries the administrative surface (merge, split, removal, forbidden-edge
//! revocation) and the single-record intake path, so every state change goes
//! through one place and one persistence sink.
//!
//! Observability follows the event-handler pattern: callers register
//! [`ProgressHandler`]s and receive a [`ProgressEvent`] per phase transition
//! and per notable outcome, independent of the `tracing` instrumentation
//! inside the phase modules.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use linkage_store::{
    BatchOrigin, GroupId, HypostasisId, IdentityStore, JournalSink, PersistenceSink, Person,
    PersonId, RecordId, SeedReport, SourceCatalog, UpdateBatch, UpdateItem,
};

use crate::assignment::{assign_records, seek_group_for, AssignmentReport};
use crate::config::EngineConfig;
use crate::consistency;
use crate::error::{EntityError, LinkageError};
use crate::formation::{form_group_for, form_groups, FormationReport};
use crate::group::{attach_record, Group, GroupTable};
use crate::merge::{merge_group, merge_group_by_persons, MergeReport};
use crate::record::{MatchRecord, MatchTable};
use crate::split::{remove_from_group, split_group, RemovalReport, SplitReport};
use crate::CancelFlag;

// ============================================================================
// Linkage State
// ============================================================================

/// Everything a linkage run mutates: the identity store plus the clustering
/// tables. One serializable unit, snapshotted whole and rebuilt from the
/// journal after a crash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkageState {
    pub store: IdentityStore,
    pub records: MatchTable,
    pub groups: GroupTable,
}

impl LinkageState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from a journal directory: last snapshot first, then
    /// every batch the journal still holds, oldest first.
    pub fn recover(journal: &JournalSink) -> Result<Self, LinkageError> {
        let mut state: Self = journal
            .load_snapshot()
            .map_err(|e| LinkageError::Store(e.into()))?
            .unwrap_or_default();
        state.store.rebuild_index();

        let mut replayed = 0usize;
        journal
            .replay(|batch| {
                state.apply_batch(&batch).map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
                })?;
                replayed += 1;
                Ok(())
            })
            .map_err(|e| LinkageError::Store(e.into()))?;

        info!(
            batches = replayed,
            persons = state.store.person_count(),
            records = state.records.len(),
            groups = state.groups.len(),
            "linkage state recovered"
        );
        Ok(state)
    }

    /// Re-apply one journaled batch. Items arrive in the order the phases
    /// flushed them, so rewrites always precede the deletions they enable.
    pub fn apply_batch(&mut self, batch: &UpdateBatch) -> Result<(), LinkageError> {
        for item in &batch.items {
            self.apply_item(item)?;
        }
        Ok(())
    }

    fn apply_item(&mut self, item: &UpdateItem) -> Result<(), LinkageError> {
        match item {
            UpdateItem::PersonUpsert {
                person,
                last_name,
                first_name,
                middle_name,
                birth_date,
            } => {
                self.store.restore_person(
                    *person,
                    Person {
                        last_name: last_name.clone(),
                        first_name: first_name.clone(),
                        middle_name: middle_name.clone(),
                        birth_date: *birth_date,
                    },
                );
            }
            UpdateItem::PersonDelete { person } => {
                self.store.remove_person(*person)?;
            }
            UpdateItem::HypostasisUpsert {
                hypostasis,
                source,
                person,
            } => {
                self.store
                    .restore_hypostasis(*hypostasis, source.clone(), *person)?;
            }
            UpdateItem::HypostasisUpdate { hypostasis, person } => {
                self.store.assign_person(*hypostasis, *person)?;
            }
            UpdateItem::RecordUpsert {
                record,
                hypostasis,
                last_name,
                first_name,
                middle_name,
                birth_date,
                person,
                group,
            } => {
                let previous = self.records.record(*record).and_then(|r| r.group);
                self.records.restore_record(MatchRecord {
                    id: *record,
                    hypostasis: *hypostasis,
                    person: *person,
                    group: *group,
                    last_name: last_name.clone(),
                    first_name: first_name.clone(),
                    middle_name: middle_name.clone(),
                    birth_date: *birth_date,
                })?;
                self.replay_membership(*record, previous, *group)?;
            }
            UpdateItem::RecordUpdate {
                record,
                person,
                group,
            } => {
                let previous = self
                    .records
                    .record(*record)
                    .ok_or(LinkageError::UnknownRecord { record: *record })?
                    .group;
                self.records.set_person(*record, *person)?;
                self.records.set_group(*record, *group)?;
                self.replay_membership(*record, previous, *group)?;
            }
            UpdateItem::GroupUpsert {
                group,
                birth_date,
                inconsistent,
                person,
            } => {
                self.groups.restore_group(Group {
                    id: *group,
                    birth_date: *birth_date,
                    inconsistent: *inconsistent,
                    person: *person,
                });
            }
            UpdateItem::GroupDelete { group } => {
                self.groups.erase_group(*group);
            }
            UpdateItem::ForbidRecords { a, b } => {
                self.records.forbid_pair(*a, *b)?;
            }
            UpdateItem::AllowRecords { a, b } => {
                self.records.allow_pair(*a, *b)?;
            }
            UpdateItem::ForbidGroup { record, group } => {
                self.records.forbid_group(*record, *group)?;
            }
            UpdateItem::AllowGroup { record, group } => {
                self.records.allow_group(*record, *group)?;
            }
        }
        Ok(())
    }

    /// Keep the group membership bitmaps in step with a replayed group
    /// pointer change.
    fn replay_membership(
        &mut self,
        record: RecordId,
        previous: Option<GroupId>,
        next: Option<GroupId>,
    ) -> Result<(), LinkageError> {
        if previous == next {
            return Ok(());
        }
        if let Some(old) = previous {
            // The old group may already be erased by an earlier item.
            if self.groups.group(old).is_some() {
                self.groups.detach(old, record)?;
            }
        }
        if let Some(new) = next {
            self.groups.attach(new, record)?;
        }
        Ok(())
    }
}

// ============================================================================
// Progress Events
// ============================================================================

/// Phase of a convergence pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Assignment,
    Formation,
    Consistency,
    Merge,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Assignment => f.write_str("assignment"),
            Phase::Formation => f.write_str("formation"),
            Phase::Consistency => f.write_str("consistency"),
            Phase::Merge => f.write_str("merge"),
        }
    }
}

/// Events emitted while the engine works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    PhaseStarted {
        run: Uuid,
        phase: Phase,
    },
    RecordsAssigned {
        run: Uuid,
        scanned: usize,
        attached: usize,
    },
    GroupsFormed {
        run: Uuid,
        created: usize,
        attached: usize,
    },
    ConsistencyEvaluated {
        run: Uuid,
        changed: usize,
    },
    GroupMerged {
        run: Uuid,
        group: GroupId,
        person: PersonId,
        persons_deleted: usize,
    },
    EntityFailed {
        run: Uuid,
        error: EntityError,
    },
    RunFinished {
        run: Uuid,
        cancelled: bool,
    },
}

/// Callback for progress events.
pub type ProgressHandler = Box<dyn Fn(ProgressEvent) + Send + Sync>;

// ============================================================================
// Reports
// ============================================================================

/// End-of-run aggregate: phase counters plus every per-entity error the run
/// survived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run: Uuid,
    pub assignment: AssignmentReport,
    pub formation: FormationReport,
    pub consistency_changes: usize,
    pub groups_merged: usize,
    pub persons_deleted: usize,
    pub errors: Vec<EntityError>,
    pub cancelled: bool,
}

/// Outcome of the single-record intake path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeReport {
    pub hypostasis: HypostasisId,
    pub record: RecordId,
    pub person_created: bool,
    pub record_created: bool,
    /// Where the record ended up, if anywhere.
    pub group: Option<GroupId>,
}

/// Outcome of a catalog sync: store seeding plus match-record maintenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub seed: SeedReport,
    pub records_created: usize,
    pub snapshots_refreshed: usize,
    pub errors: Vec<EntityError>,
}

// ============================================================================
// Engine
// ============================================================================

/// Single-writer orchestrator over one [`LinkageState`].
///
/// All mutation funnels through `&mut self`, so two engines must never share
/// a state directory; the CLI enforces that with a lock file.
pub struct LinkageEngine {
    state: LinkageState,
    config: EngineConfig,
    sink: Box<dyn PersistenceSink>,
    handlers: Vec<ProgressHandler>,
    cancel: CancelFlag,
}

impl LinkageEngine {
    pub fn new(state: LinkageState, config: EngineConfig, sink: Box<dyn PersistenceSink>) -> Self {
        Self {
            state,
            config,
            sink,
            handlers: Vec::new(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn state(&self) -> &LinkageState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut LinkageState {
        &mut self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_state(self) -> LinkageState {
        self.state
    }

    /// Register a progress handler.
    pub fn on_event(&mut self, handler: ProgressHandler) {
        self.handlers.push(handler);
    }

    fn emit(&self, event: ProgressEvent) {
        for handler in &self.handlers {
            handler(event.clone());
        }
    }

    /// Shared cancellation handle; cancelling it stops the current pass at
    /// the next bucket/record boundary.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    // ========================================================================
    // Convergence Pass
    // ========================================================================

    /// One canonical convergence pass: assignment, formation, consistency,
    /// then merge when `merge_on_pass` is set.
    ///
    /// `today` keys the bucket for records without a birth date; injecting it
    /// keeps replays and tests deterministic.
    pub fn run_pass(&mut self, today: NaiveDate) -> Result<RunReport, LinkageError> {
        self.config.validate()?;
        let run = Uuid::new_v4();
        let mut report = RunReport {
            run,
            ..RunReport::default()
        };
        info!(%run, "convergence pass started");

        self.emit(ProgressEvent::PhaseStarted {
            run,
            phase: Phase::Assignment,
        });
        report.assignment = assign_records(
            &mut self.state.records,
            &mut self.state.groups,
            &self.config,
            &self.cancel,
            self.sink.as_mut(),
        )?;
        self.emit(ProgressEvent::RecordsAssigned {
            run,
            scanned: report.assignment.records_scanned,
            attached: report.assignment.records_attached,
        });
        for error in &report.assignment.errors {
            self.emit(ProgressEvent::EntityFailed {
                run,
                error: error.clone(),
            });
        }
        report.errors.extend(report.assignment.errors.clone());
        if report.assignment.cancelled {
            return Ok(self.finish_cancelled(report));
        }

        self.emit(ProgressEvent::PhaseStarted {
            run,
            phase: Phase::Formation,
        });
        report.formation = form_groups(
            &mut self.state.records,
            &mut self.state.groups,
            &self.config,
            today,
            &self.cancel,
            self.sink.as_mut(),
        )?;
        self.emit(ProgressEvent::GroupsFormed {
            run,
            created: report.formation.groups_created,
            attached: report.formation.records_attached,
        });
        if report.formation.cancelled {
            return Ok(self.finish_cancelled(report));
        }

        self.emit(ProgressEvent::PhaseStarted {
            run,
            phase: Phase::Consistency,
        });
        let targets = self.state.groups.ids();
        let mut flags = UpdateBatch::new(BatchOrigin::Consistency);
        let outcomes = consistency::refresh_groups(
            &self.state.records,
            &mut self.state.groups,
            &targets,
            &self.config.match_context(),
            &mut flags,
        )?;
        if !outcomes.is_empty() {
            self.sink.apply(&flags).map_err(LinkageError::Store)?;
        }
        report.consistency_changes = outcomes.len();
        self.emit(ProgressEvent::ConsistencyEvaluated {
            run,
            changed: outcomes.len(),
        });

        if self.config.merge_on_pass {
            self.emit(ProgressEvent::PhaseStarted {
                run,
                phase: Phase::Merge,
            });
            let (merged, errors) = self.merge_sweep(run)?;
            report.groups_merged = merged.len();
            report.persons_deleted = merged.iter().map(|m| m.persons_deleted).sum();
            report.errors.extend(errors);
        }

        self.emit(ProgressEvent::RunFinished {
            run,
            cancelled: false,
        });
        info!(
            %run,
            assigned = report.assignment.records_attached,
            formed = report.formation.groups_created,
            merged = report.groups_merged,
            errors = report.errors.len(),
            "convergence pass finished"
        );
        Ok(report)
    }

    fn finish_cancelled(&self, mut report: RunReport) -> RunReport {
        report.cancelled = true;
        warn!(run = %report.run, "convergence pass cancelled");
        self.emit(ProgressEvent::RunFinished {
            run: report.run,
            cancelled: true,
        });
        report
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Merge one group onto its canonical person.
    pub fn merge(&mut self, group: GroupId) -> Result<MergeReport, LinkageError> {
        merge_group(
            &mut self.state.store,
            &mut self.state.records,
            &mut self.state.groups,
            group,
            self.sink.as_mut(),
        )
    }

    /// Person-pivot merge (administrative; absorbs records from other
    /// groups).
    pub fn merge_by_persons(&mut self, group: GroupId) -> Result<MergeReport, LinkageError> {
        merge_group_by_persons(
            &mut self.state.store,
            &mut self.state.records,
            &mut self.state.groups,
            group,
            &self.config.match_context(),
            self.sink.as_mut(),
        )
    }

    /// Merge every consistent multi-member group with work left to do.
    /// Per-group failures are reported, not fatal.
    pub fn merge_all(&mut self) -> Result<(Vec<MergeReport>, Vec<EntityError>), LinkageError> {
        self.merge_sweep(Uuid::new_v4())
    }

    fn merge_sweep(
        &mut self,
        run: Uuid,
    ) -> Result<(Vec<MergeReport>, Vec<EntityError>), LinkageError> {
        let candidates: Vec<GroupId> = self
            .state
            .groups
            .iter()
            .filter(|g| !g.inconsistent)
            .filter(|g| self.state.groups.member_count(g.id) >= 2)
            .filter(|g| self.merge_pending(g))
            .map(|g| g.id)
            .collect();

        let mut merged = Vec::new();
        let mut errors = Vec::new();
        for group in candidates {
            match self.merge(group) {
                Ok(report) => {
                    self.emit(ProgressEvent::GroupMerged {
                        run,
                        group,
                        person: report.target,
                        persons_deleted: report.persons_deleted,
                    });
                    merged.push(report);
                }
                Err(err) => {
                    warn!(%group, error = %err, "group skipped during merge sweep");
                    let error = EntityError::MergeSkipped {
                        group,
                        message: err.to_string(),
                    };
                    self.emit(ProgressEvent::EntityFailed {
                        run,
                        error: error.clone(),
                    });
                    errors.push(error);
                }
            }
        }
        Ok((merged, errors))
    }

    /// Whether a merge of this group would change anything.
    fn merge_pending(&self, group: &Group) -> bool {
        match group.person {
            None => true,
            Some(canonical) => self
                .state
                .groups
                .member_records(group.id)
                .iter()
                .any(|&m| {
                    self.state
                        .records
                        .record(m)
                        .is_some_and(|r| r.person != Some(canonical))
                }),
        }
    }

    // ========================================================================
    // Split & Removal
    // ========================================================================

    /// Tear a group apart, forbidding every member pair from re-clustering.
    pub fn split(&mut self, group: GroupId) -> Result<SplitReport, LinkageError> {
        split_group(
            &mut self.state.records,
            &mut self.state.groups,
            group,
            &self.config,
            self.sink.as_mut(),
        )
    }

    /// Remove one record from its group.
    pub fn remove(&mut self, record: RecordId) -> Result<RemovalReport, LinkageError> {
        remove_from_group(
            &mut self.state.records,
            &mut self.state.groups,
            record,
            &self.config,
            self.sink.as_mut(),
        )
    }

    /// Revoke a record-pair forbidden relation. Both directions must exist.
    pub fn allow_pair(&mut self, a: RecordId, b: RecordId) -> Result<(), LinkageError> {
        self.state.records.allow_pair(a, b)?;
        let mut batch = UpdateBatch::new(BatchOrigin::Admin);
        batch.push(UpdateItem::AllowRecords { a, b });
        self.sink.apply(&batch).map_err(LinkageError::Store)
    }

    /// Revoke a record-to-group forbidden relation.
    pub fn allow_group(&mut self, record: RecordId, group: GroupId) -> Result<(), LinkageError> {
        self.state.records.allow_group(record, group)?;
        let mut batch = UpdateBatch::new(BatchOrigin::Admin);
        batch.push(UpdateItem::AllowGroup { record, group });
        self.sink.apply(&batch).map_err(LinkageError::Store)
    }

    // ========================================================================
    // Intake & Sync
    // ========================================================================

    /// Single-record path for a hypostasis that just appeared or changed:
    /// resolve its source row, backfill its person and match record, refresh
    /// the snapshot, then seek a group (existing groups first, else a fresh
    /// one against the unresolved pool).
    pub fn intake(
        &mut self,
        hypostasis: HypostasisId,
        catalog: &dyn SourceCatalog,
    ) -> Result<IntakeReport, LinkageError> {
        let source = self
            .state
            .store
            .hypostasis(hypostasis)
            .ok_or(LinkageError::Store(
                linkage_store::StoreError::UnknownHypostasis { hypostasis },
            ))?
            .source
            .clone();
        let row = catalog.lookup(&source)?;

        let mut batch = UpdateBatch::new(BatchOrigin::Intake);
        let mut person_created = false;
        if self
            .state
            .store
            .hypostasis(hypostasis)
            .is_some_and(|h| h.person.is_none())
        {
            let person = Person::from_source(&row);
            let person_id = self.state.store.insert_person(person.clone());
            self.state.store.assign_person(hypostasis, Some(person_id))?;
            batch.push(UpdateItem::PersonUpsert {
                person: person_id,
                last_name: person.last_name,
                first_name: person.first_name,
                middle_name: person.middle_name,
                birth_date: person.birth_date,
            });
            batch.push(UpdateItem::HypostasisUpdate {
                hypostasis,
                person: Some(person_id),
            });
            person_created = true;
        }
        let person = self
            .state
            .store
            .hypostasis(hypostasis)
            .and_then(|h| h.person);

        let (record, record_created) = match self.state.records.by_hypostasis(hypostasis) {
            Some(record) => {
                self.state.records.refresh_snapshot(record, &row)?;
                self.state.records.set_person(record, person)?;
                (record, false)
            }
            None => (self.state.records.insert(hypostasis, person, &row)?, true),
        };
        {
            let row = self
                .state
                .records
                .record(record)
                .ok_or(LinkageError::UnknownRecord { record })?;
            batch.push(UpdateItem::RecordUpsert {
                record,
                hypostasis,
                last_name: row.last_name.clone(),
                first_name: row.first_name.clone(),
                middle_name: row.middle_name.clone(),
                birth_date: row.birth_date,
                person: row.person,
                group: row.group,
            });
        }

        let mut errors = Vec::new();
        let group = match self
            .state
            .records
            .record(record)
            .and_then(|r| r.group)
        {
            Some(group) => {
                self.sink.apply(&batch).map_err(LinkageError::Store)?;
                Some(group)
            }
            None => {
                let found = seek_group_for(
                    record,
                    &self.state.records,
                    &self.state.groups,
                    &self.config,
                    &mut errors,
                )?;
                let group = match found {
                    Some(group) => {
                        attach_record(&mut self.state.records, &mut self.state.groups, record, group)?;
                        batch.push(UpdateItem::RecordUpdate {
                            record,
                            person,
                            group: Some(group),
                        });
                        Some(group)
                    }
                    None => form_group_for(
                        record,
                        &mut self.state.records,
                        &mut self.state.groups,
                        &self.config,
                        &mut batch,
                    )?,
                };
                self.sink.apply(&batch).map_err(LinkageError::Store)?;
                group
            }
        };

        if let Some(group) = group {
            let mut flags = UpdateBatch::new(BatchOrigin::Consistency);
            let outcomes = consistency::refresh_groups(
                &self.state.records,
                &mut self.state.groups,
                &[group],
                &self.config.match_context(),
                &mut flags,
            )?;
            if !outcomes.is_empty() {
                self.sink.apply(&flags).map_err(LinkageError::Store)?;
            }
        }
        for error in &errors {
            warn!(%hypostasis, error = %error, "intake scan skipped an entity");
        }

        info!(
            %hypostasis,
            %record,
            person_created,
            record_created,
            group = ?group,
            "hypostasis taken in"
        );
        Ok(IntakeReport {
            hypostasis,
            record,
            person_created,
            record_created,
            group,
        })
    }

    /// Bring the whole state in line with the catalogs: seed missing
    /// hypostases and persons, create match records for hypostases lacking
    /// one, refresh snapshots that drifted. Clustering is left to the next
    /// pass; groups whose members changed get their consistency re-evaluated.
    pub fn sync(&mut self, catalog: &dyn SourceCatalog) -> Result<SyncReport, LinkageError> {
        let mut report = SyncReport {
            seed: linkage_store::seed_identities(
                &mut self.state.store,
                catalog,
                self.sink.as_mut(),
            )?,
            ..SyncReport::default()
        };

        let rows: Vec<(HypostasisId, _, Option<PersonId>)> = self
            .state
            .store
            .hypostases()
            .map(|(id, h)| (id, h.source.clone(), h.person))
            .collect();

        let mut batch = UpdateBatch::new(BatchOrigin::Intake);
        let mut touched: Vec<GroupId> = Vec::new();
        for (hypostasis, source, person) in rows {
            let row = match catalog.lookup(&source) {
                Ok(row) => row,
                Err(err) => {
                    report.errors.push(EntityError::SourceIntegrity {
                        system: source.to_string(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            let record = match self.state.records.by_hypostasis(hypostasis) {
                Some(record) => {
                    let drifted = self.state.records.record(record).is_some_and(|r| {
                        r.last_name != row.last_name
                            || r.first_name != row.first_name
                            || r.middle_name != row.middle_name
                            || r.birth_date != row.birth_date
                    });
                    if !drifted {
                        continue;
                    }
                    self.state.records.refresh_snapshot(record, &row)?;
                    report.snapshots_refreshed += 1;
                    if let Some(group) = self.state.records.record(record).and_then(|r| r.group) {
                        touched.push(group);
                    }
                    record
                }
                None => {
                    let record = self.state.records.insert(hypostasis, person, &row)?;
                    report.records_created += 1;
                    record
                }
            };
            let row = self
                .state
                .records
                .record(record)
                .ok_or(LinkageError::UnknownRecord { record })?;
            batch.push(UpdateItem::RecordUpsert {
                record,
                hypostasis,
                last_name: row.last_name.clone(),
                first_name: row.first_name.clone(),
                middle_name: row.middle_name.clone(),
                birth_date: row.birth_date,
                person: row.person,
                group: row.group,
            });
        }

        if !batch.is_empty() {
            self.sink.apply(&batch).map_err(LinkageError::Store)?;
        }
        if !touched.is_empty() {
            let mut flags = UpdateBatch::new(BatchOrigin::Consistency);
            let outcomes = consistency::refresh_groups(
                &self.state.records,
                &mut self.state.groups,
                &touched,
                &self.config.match_context(),
                &mut flags,
            )?;
            if !outcomes.is_empty() {
                self.sink.apply(&flags).map_err(LinkageError::Store)?;
            }
        }

        info!(
            hypostases = report.seed.hypostases_created,
            persons = report.seed.persons_created,
            records = report.records_created,
            refreshed = report.snapshots_refreshed,
            errors = report.errors.len(),
            "catalog sync finished"
        );
        Ok(report)
    }
}
