//! The closed predicate library.
//!
//! Every way two match records can be compared is one variant of
//! [`Predicate`]; engines are configured with predicate lists and evaluate
//! them as a short-circuiting conjunction via [`check_all`]. Keeping the set
//! closed means a configuration typo fails at parse time
//! ([`LinkageError::UnknownPredicate`]) instead of dispatching to nothing at
//! runtime.
//!
//! Two comparison modes recur through the library:
//!
//! - **lenient**: an empty value (null or empty string) matches anything.
//!   Used everywhere records are being pulled together.
//! - **strict**: values must be equal, empty only matches empty. Used by the
//!   consistency check, where a missing middle name is a real difference.

use chrono::NaiveDate;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use linkage_store::RecordId;

use crate::error::LinkageError;
use crate::fuzzy::{jaro_winkler, levenshtein_with_max};
use crate::record::{MatchRecord, MatchTable, NameField};

/// Jaro-Winkler score two names must beat to count as fuzzily equal.
pub const DEFAULT_TOLERANCE: f64 = 0.86;

/// Shared evaluation knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchContext {
    pub tolerance: f64,
}

impl Default for MatchContext {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

// ============================================================================
// Predicates
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// All three name fields leniently equal.
    EqualFullName,
    /// First and middle name leniently equal.
    EqualFirstAndMiddle,
    /// Last and middle name leniently equal.
    EqualLastAndMiddle,
    /// Birth dates equal, null matching anything.
    EqualDate,
    /// One name field within a keystroke (or above the Jaro-Winkler
    /// tolerance), the other two leniently equal.
    CloseByFuzzyMetric(NameField),
    /// Fuzzily close on at least one of the three name fields.
    SatisfiesNewGroupCondition,
    /// [`Predicate::EqualDate`] and [`Predicate::SatisfiesNewGroupCondition`].
    SatisfiesExistingGroupCondition,
    /// No record-to-record forbidden relation between the pair.
    NotForbidden,
    /// All name and date fields strictly equal. Drives the consistency flag.
    CompletelyEqualForConsistency,
    /// All name and date fields leniently equal.
    CompletelyEqualForSearch,
}

impl Predicate {
    /// Evaluate against a pair of records. Unknown ids never match.
    pub fn evaluate(
        self,
        records: &MatchTable,
        a: RecordId,
        b: RecordId,
        ctx: &MatchContext,
    ) -> bool {
        if self == Predicate::NotForbidden {
            return !records.is_pair_forbidden(a, b);
        }
        let Some(left) = records.record(a) else {
            return false;
        };
        let Some(right) = records.record(b) else {
            return false;
        };
        match self {
            Predicate::EqualFullName => NameField::ALL
                .iter()
                .all(|&f| lenient_eq(left.name(f), right.name(f))),
            Predicate::EqualFirstAndMiddle => {
                lenient_eq(left.name(NameField::FirstName), right.name(NameField::FirstName))
                    && lenient_eq(
                        left.name(NameField::MiddleName),
                        right.name(NameField::MiddleName),
                    )
            }
            Predicate::EqualLastAndMiddle => {
                lenient_eq(left.name(NameField::LastName), right.name(NameField::LastName))
                    && lenient_eq(
                        left.name(NameField::MiddleName),
                        right.name(NameField::MiddleName),
                    )
            }
            Predicate::EqualDate => lenient_date_eq(left.birth_date, right.birth_date),
            Predicate::CloseByFuzzyMetric(field) => close_by_fuzzy(left, right, field, ctx),
            Predicate::SatisfiesNewGroupCondition => satisfies_new_group(left, right, ctx),
            Predicate::SatisfiesExistingGroupCondition => {
                lenient_date_eq(left.birth_date, right.birth_date)
                    && satisfies_new_group(left, right, ctx)
            }
            Predicate::CompletelyEqualForConsistency => {
                left.birth_date == right.birth_date
                    && NameField::ALL
                        .iter()
                        .all(|&f| strict_eq(left.name(f), right.name(f)))
            }
            Predicate::CompletelyEqualForSearch => {
                lenient_date_eq(left.birth_date, right.birth_date)
                    && NameField::ALL
                        .iter()
                        .all(|&f| lenient_eq(left.name(f), right.name(f)))
            }
            Predicate::NotForbidden => unreachable!("handled above"),
        }
    }
}

/// Short-circuiting conjunction over a predicate list.
pub fn check_all(
    predicates: &[Predicate],
    records: &MatchTable,
    a: RecordId,
    b: RecordId,
    ctx: &MatchContext,
) -> bool {
    predicates.iter().all(|p| p.evaluate(records, a, b, ctx))
}

// ============================================================================
// Field Comparisons
// ============================================================================

fn lenient_eq(a: Option<&str>, b: Option<&str>) -> bool {
    let a = a.unwrap_or("");
    let b = b.unwrap_or("");
    a.is_empty() || b.is_empty() || a == b
}

fn strict_eq(a: Option<&str>, b: Option<&str>) -> bool {
    a.unwrap_or("") == b.unwrap_or("")
}

fn lenient_date_eq(a: Option<NaiveDate>, b: Option<NaiveDate>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

fn close_by_fuzzy(
    left: &MatchRecord,
    right: &MatchRecord,
    field: NameField,
    ctx: &MatchContext,
) -> bool {
    let others_equal = NameField::ALL
        .iter()
        .filter(|&&f| f != field)
        .all(|&f| lenient_eq(left.name(f), right.name(f)));
    if !others_equal {
        return false;
    }
    let a = left.name(field).unwrap_or("");
    let b = right.name(field).unwrap_or("");
    if a.is_empty() && b.is_empty() {
        return true;
    }
    levenshtein_with_max(a, b, 1) == 1 || jaro_winkler(a, b) > ctx.tolerance
}

fn satisfies_new_group(left: &MatchRecord, right: &MatchRecord, ctx: &MatchContext) -> bool {
    [NameField::FirstName, NameField::LastName, NameField::MiddleName]
        .iter()
        .any(|&f| close_by_fuzzy(left, right, f, ctx))
}

// ============================================================================
// Names
// ============================================================================

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::EqualFullName => f.write_str("equal_full_name"),
            Predicate::EqualFirstAndMiddle => f.write_str("equal_first_and_middle"),
            Predicate::EqualLastAndMiddle => f.write_str("equal_last_and_middle"),
            Predicate::EqualDate => f.write_str("equal_date"),
            Predicate::CloseByFuzzyMetric(field) => {
                write!(f, "close_by_fuzzy_metric({field})")
            }
            Predicate::SatisfiesNewGroupCondition => f.write_str("satisfies_new_group_condition"),
            Predicate::SatisfiesExistingGroupCondition => {
                f.write_str("satisfies_existing_group_condition")
            }
            Predicate::NotForbidden => f.write_str("not_forbidden"),
            Predicate::CompletelyEqualForConsistency => {
                f.write_str("completely_equal_for_consistency")
            }
            Predicate::CompletelyEqualForSearch => f.write_str("completely_equal_for_search"),
        }
    }
}

impl std::str::FromStr for Predicate {
    type Err = LinkageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || LinkageError::UnknownPredicate {
            name: s.to_string(),
        };
        if let Some(rest) = s.strip_prefix("close_by_fuzzy_metric(") {
            let field = rest.strip_suffix(')').ok_or_else(unknown)?;
            let field = match field {
                "last_name" => NameField::LastName,
                "first_name" => NameField::FirstName,
                "middle_name" => NameField::MiddleName,
                _ => return Err(unknown()),
            };
            return Ok(Predicate::CloseByFuzzyMetric(field));
        }
        match s {
            "equal_full_name" => Ok(Predicate::EqualFullName),
            "equal_first_and_middle" => Ok(Predicate::EqualFirstAndMiddle),
            "equal_last_and_middle" => Ok(Predicate::EqualLastAndMiddle),
            "equal_date" => Ok(Predicate::EqualDate),
            "satisfies_new_group_condition" => Ok(Predicate::SatisfiesNewGroupCondition),
            "satisfies_existing_group_condition" => Ok(Predicate::SatisfiesExistingGroupCondition),
            "not_forbidden" => Ok(Predicate::NotForbidden),
            "completely_equal_for_consistency" => Ok(Predicate::CompletelyEqualForConsistency),
            "completely_equal_for_search" => Ok(Predicate::CompletelyEqualForSearch),
            _ => Err(unknown()),
        }
    }
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(|e: LinkageError| D::Error::custom(e))
    }
}
