//! Core engines of the linkage workspace.
//!
//! Everything that decides which records denote the same person lives here:
//!
//! - **Match records** (`record`) — denormalized snapshots with clustering
//!   state and forbidden-relation adjacency sets
//! - **Predicates** (`predicate`, `fuzzy`) — the closed comparison library
//!   and the two string metrics behind its fuzzy variants
//! - **Groups** (`group`) — cluster arena with roaring membership bitmaps
//! - **Engines** (`formation`, `assignment`, `consistency`, `merge`,
//!   `split`) — the clustering phases, each flushing batches at its own
//!   phase boundary
//! - **Orchestrator** (`engine`) — convergence passes, intake, recovery and
//!   administrative operations over one [`LinkageState`]
//!
//! The identity store and the durability boundary live in `linkage-store`;
//! this crate drives them through `IdentityStore` and `PersistenceSink`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod assignment;
pub mod config;
pub mod consistency;
pub mod engine;
pub mod error;
pub mod formation;
pub mod fuzzy;
pub mod group;
pub mod merge;
pub mod predicate;
pub mod record;
pub mod split;

pub use assignment::{assign_records, seek_group_for, AssignmentReport};
pub use config::{EngineConfig, ForbiddenScanPolicy};
pub use consistency::{evaluate_all, evaluate_groups, ConsistencyOutcome};
pub use engine::{
    IntakeReport, LinkageEngine, LinkageState, Phase, ProgressEvent, ProgressHandler, RunReport,
    SyncReport,
};
pub use error::{EntityError, LinkageError};
pub use formation::{form_group_for, form_groups, FormationReport};
pub use group::{Group, GroupTable};
pub use merge::{merge_group, merge_group_by_persons, MergeReport};
pub use predicate::{check_all, MatchContext, Predicate, DEFAULT_TOLERANCE};
pub use record::{MatchRecord, MatchTable, NameField};
pub use split::{remove_from_group, split_group, RemovalReport, SplitReport};

/// Cooperative cancellation handle.
///
/// Cloned freely; all clones observe one flag. Formation checks it at bucket
/// boundaries, assignment at record boundaries. A phase that sees the flag
/// unwinds its in-memory work and flushes nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
