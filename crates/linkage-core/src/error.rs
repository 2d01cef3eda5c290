//! Error taxonomy of the clustering engines.
//!
//! Two tiers, mirrored from how the batch runner treats failures:
//!
//! - [`LinkageError`] aborts the operation that raised it. Configuration
//!   mistakes, unknown ids and violated preconditions land here.
//! - [`EntityError`] condemns one entity but lets the run continue. The
//!   engines collect these into their reports instead of returning them.

use linkage_store::{CatalogError, GroupId, HypostasisId, RecordId, StoreError};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum LinkageError {
    #[error("unknown predicate `{name}`")]
    UnknownPredicate { name: String },

    #[error("unknown record {record}")]
    UnknownRecord { record: RecordId },

    #[error("unknown group {group}")]
    UnknownGroup { group: GroupId },

    #[error("hypostasis {hypostasis} already has a match record")]
    DuplicateRecord { hypostasis: HypostasisId },

    #[error("group {group} with {members} records is below the two-record minimum")]
    GroupTooSmall { group: GroupId, members: u64 },

    #[error("group {group} was merged and can no longer be split")]
    IllegalSplit { group: GroupId },

    #[error("group {group} is inconsistent and cannot be merged")]
    GroupInconsistent { group: GroupId },

    #[error("group {group} names a canonical person no member carries")]
    CanonicalPersonMissing { group: GroupId },

    #[error("record {record} has no person to merge onto")]
    RecordWithoutPerson { record: RecordId },

    #[error("record {record} is not attached to any group")]
    RecordNotGrouped { record: RecordId },

    #[error("group {group} has only two records; split it instead of removing one")]
    SplitRequired { group: GroupId },

    #[error("record {record} was merged into group {group} and cannot be removed")]
    MergedRecordRemoval { record: RecordId, group: GroupId },

    #[error("record {record} cannot be forbidden against itself")]
    SelfForbidden { record: RecordId },

    #[error("records {a} and {b} have no forbidden relation to revoke")]
    ForbiddenEdgeMissing { a: RecordId, b: RecordId },

    #[error("record {record} has no forbidden relation to group {group} to revoke")]
    ForbiddenGroupEdgeMissing { record: RecordId, group: GroupId },

    #[error("invalid engine config: {message}")]
    Config { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// A per-entity failure that a batch run reports and survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum EntityError {
    /// Candidate group with fewer than two members found during a scan.
    #[error("group {group} with {members} records is below the two-record minimum")]
    GroupSize { group: GroupId, members: u64 },

    /// A source row could not back a hypostasis or match record. The field
    /// cannot be called `source`: thiserror reserves that name for the error
    /// chain.
    #[error("source {system}: {message}")]
    SourceIntegrity { system: String, message: String },

    /// One group was skipped during the merge phase.
    #[error("group {group} not merged: {message}")]
    MergeSkipped { group: GroupId, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_entity() {
        let err = LinkageError::GroupTooSmall {
            group: GroupId::new(7),
            members: 1,
        };
        assert_eq!(
            err.to_string(),
            "group 7 with 1 records is below the two-record minimum"
        );

        let err = EntityError::GroupSize {
            group: GroupId::new(7),
            members: 0,
        };
        assert!(err.to_string().contains("group 7"));
    }

    #[test]
    fn test_source_integrity_names_the_system() {
        let err = EntityError::SourceIntegrity {
            system: "student 101".to_string(),
            message: "no source row".to_string(),
        };
        assert_eq!(err.to_string(), "source student 101: no source row");
        // A per-entity failure carries no cause chain.
        assert!(std::error::Error::source(&err).is_none());
    }
}
