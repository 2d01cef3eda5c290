//! Batched durable updates.
//!
//! Clustering phases never write through to disk mid-loop. They accumulate
//! [`UpdateItem`]s into an [`UpdateBatch`] and hand the batch to a
//! [`PersistenceSink`] at a phase boundary. Items name domain objects by id
//! plus the fields that changed, so a sink can be a journal, a database
//! adapter, or a test capture without knowing anything about the engines.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hypostasis::SourceKey;
use crate::ids::{GroupId, HypostasisId, PersonId, RecordId};
use crate::StoreError;

/// Unique identifier of one flushed batch.
pub type BatchId = Uuid;

/// Which phase produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOrigin {
    Seed,
    Intake,
    Assignment,
    Formation,
    Consistency,
    Merge,
    Split,
    Admin,
}

/// One durable state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateItem {
    PersonUpsert {
        person: PersonId,
        last_name: String,
        first_name: String,
        middle_name: String,
        birth_date: Option<NaiveDate>,
    },
    PersonDelete {
        person: PersonId,
    },
    HypostasisUpsert {
        hypostasis: HypostasisId,
        source: SourceKey,
        person: Option<PersonId>,
    },
    /// A hypostasis was repointed at a different person.
    HypostasisUpdate {
        hypostasis: HypostasisId,
        person: Option<PersonId>,
    },
    /// Full match-record row, written on intake and snapshot refresh.
    RecordUpsert {
        record: RecordId,
        hypostasis: HypostasisId,
        last_name: Option<String>,
        first_name: Option<String>,
        middle_name: Option<String>,
        birth_date: Option<NaiveDate>,
        person: Option<PersonId>,
        group: Option<GroupId>,
    },
    /// Clustering pointers of an existing record changed.
    RecordUpdate {
        record: RecordId,
        person: Option<PersonId>,
        group: Option<GroupId>,
    },
    GroupUpsert {
        group: GroupId,
        birth_date: Option<NaiveDate>,
        inconsistent: bool,
        person: Option<PersonId>,
    },
    GroupDelete {
        group: GroupId,
    },
    ForbidRecords {
        a: RecordId,
        b: RecordId,
    },
    AllowRecords {
        a: RecordId,
        b: RecordId,
    },
    ForbidGroup {
        record: RecordId,
        group: GroupId,
    },
    AllowGroup {
        record: RecordId,
        group: GroupId,
    },
}

/// A set of updates flushed together at one phase boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub id: BatchId,
    pub origin: BatchOrigin,
    pub created_at: DateTime<Utc>,
    pub items: Vec<UpdateItem>,
}

impl UpdateBatch {
    pub fn new(origin: BatchOrigin) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            created_at: Utc::now(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: UpdateItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Durability boundary for update batches.
///
/// `apply` must be atomic per batch from the caller's point of view: either
/// the whole batch is accepted or an error comes back and the caller treats
/// the batch as not persisted.
pub trait PersistenceSink: Send {
    fn apply(&mut self, batch: &UpdateBatch) -> Result<(), StoreError>;
}

/// Sink that keeps every batch in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<UpdateBatch>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All items across all batches, in flush order.
    pub fn items(&self) -> impl Iterator<Item = &UpdateItem> {
        self.batches.iter().flat_map(|b| b.items.iter())
    }
}

impl PersistenceSink for MemorySink {
    fn apply(&mut self, batch: &UpdateBatch) -> Result<(), StoreError> {
        self.batches.push(batch.clone());
        Ok(())
    }
}
