//! Identity store for the linkage workspace.
//!
//! This crate owns the leaf data of record linkage and its durability
//! boundary:
//!
//! 1. **Persons** — deduplicated people, slot arena with O(1) orphan checks
//! 2. **Hypostases** — one appearance of a person per source system, with
//!    normalized source keys
//! 3. **Source catalogs** — read-only lookup into the student, employee and
//!    postgraduate systems
//! 4. **Update batches** — the journaled unit of durable change; sinks
//!    receive whole batches at phase boundaries
//!
//! The clustering engines live in `linkage-core` and drive this crate through
//! [`IdentityStore`] and [`PersistenceSink`].

pub mod batch;
pub mod catalog;
pub mod hypostasis;
pub mod ids;
pub mod journal;
pub mod person;
pub mod seed;
pub mod store;

pub use batch::{BatchId, BatchOrigin, MemorySink, PersistenceSink, UpdateBatch, UpdateItem};
pub use catalog::{CatalogError, MemoryCatalog, SourceCatalog, SourceRecord};
pub use hypostasis::{Hypostasis, SourceKey, EMPLOYEE_KEY_WIDTH};
pub use ids::{GroupId, HypostasisId, PersonId, RecordId};
pub use journal::JournalSink;
pub use person::Person;
pub use seed::{seed_identities, SeedReport};
pub use store::IdentityStore;

/// Errors raised by the identity store and its sinks.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A raw hypostasis row does not carry exactly one source identifier.
    #[error("hypostasis integrity violated: {message}")]
    HypostasisIntegrity { message: String },

    #[error("source key {key} already has a hypostasis")]
    DuplicateSourceKey { key: SourceKey },

    #[error("unknown person {person}")]
    UnknownPerson { person: PersonId },

    #[error("unknown hypostasis {hypostasis}")]
    UnknownHypostasis { hypostasis: HypostasisId },

    #[error("person {person} is still referenced by {refs} hypostases")]
    PersonStillReferenced { person: PersonId, refs: u32 },

    #[error("persistence I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
