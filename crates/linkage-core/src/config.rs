//! Engine configuration.
//!
//! Everything tunable about a linkage run in one serializable struct. Loading
//! from a file is the boundary where predicate names are parsed; an unknown
//! name fails the load, so a misconfigured run never starts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LinkageError;
use crate::predicate::{MatchContext, Predicate, DEFAULT_TOLERANCE};

/// How the inconsistent-group member scan treats a member that is forbidden
/// for the candidate record. Observed systems disagree on this, so it is an
/// explicit choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForbiddenScanPolicy {
    /// A forbidden member fails only its own comparison; the scan moves on to
    /// the next member.
    #[default]
    SkipMember,
    /// Any forbidden member disqualifies the whole group immediately.
    RejectGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Jaro-Winkler score a fuzzy name comparison must beat.
    pub tolerance: f64,
    /// Predicates a record pair must pass to seed or join a forming group.
    pub formation_predicates: Vec<Predicate>,
    /// Predicates a record must pass against an existing group's member.
    pub assignment_predicates: Vec<Predicate>,
    /// Forbidden-member handling in the inconsistent-group scan.
    pub forbidden_scan_policy: ForbiddenScanPolicy,
    /// Merge every consistent multi-member group at the end of each pass.
    /// Off by default; merging is usually a separate administrative step.
    pub merge_on_pass: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            formation_predicates: vec![
                Predicate::SatisfiesNewGroupCondition,
                Predicate::NotForbidden,
            ],
            assignment_predicates: vec![
                Predicate::SatisfiesExistingGroupCondition,
                Predicate::NotForbidden,
            ],
            forbidden_scan_policy: ForbiddenScanPolicy::default(),
            merge_on_pass: false,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, LinkageError> {
        let text = std::fs::read_to_string(path).map_err(|err| LinkageError::Config {
            message: format!("cannot read {}: {err}", path.display()),
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|err| LinkageError::Config {
            message: format!("cannot parse {}: {err}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkageError> {
        if !(0.0..=1.0).contains(&self.tolerance) {
            return Err(LinkageError::Config {
                message: format!("tolerance {} is outside 0.0..=1.0", self.tolerance),
            });
        }
        if self.formation_predicates.is_empty() || self.assignment_predicates.is_empty() {
            return Err(LinkageError::Config {
                message: "predicate lists must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn match_context(&self) -> MatchContext {
        MatchContext {
            tolerance: self.tolerance,
        }
    }
}
