//! Hypostases: one appearance of a person in one source system.
//!
//! A hypostasis is the pivot between the raw source tables and the canonical
//! person table. It carries exactly one source key (student, employee, or
//! postgraduate) and an optional pointer to the person it has been resolved
//! to. Source keys are normalized here so the rest of the workspace never
//! sees two spellings of the same row.

use serde::{Deserialize, Serialize};

use crate::ids::PersonId;
use crate::StoreError;

/// Width employee keys are zero-padded to.
pub const EMPLOYEE_KEY_WIDTH: usize = 5;

// ============================================================================
// Source Keys
// ============================================================================

/// Identity of one row in one source system.
///
/// Student and postgraduate systems use numeric primary keys. The employee
/// system historically used zero-padded decimal strings, so employee keys are
/// kept as strings and normalized through [`SourceKey::employee`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKey {
    Student(u32),
    Employee(String),
    Postgraduate(u32),
}

impl SourceKey {
    /// Normalize a raw employee key: decimal keys are re-padded with zeros to
    /// [`EMPLOYEE_KEY_WIDTH`], anything non-decimal is kept verbatim.
    pub fn employee(raw: &str) -> Self {
        match raw.trim().parse::<u64>() {
            Ok(n) => SourceKey::Employee(format!("{n:0width$}", width = EMPLOYEE_KEY_WIDTH)),
            Err(_) => SourceKey::Employee(raw.to_string()),
        }
    }

    /// Build a key from the three nullable source-id columns of a raw
    /// hypostasis row. Exactly one must be present.
    pub fn from_columns(
        student: Option<u32>,
        employee: Option<&str>,
        postgraduate: Option<u32>,
    ) -> Result<Self, StoreError> {
        let mut found = Vec::with_capacity(1);
        if let Some(id) = student {
            found.push(SourceKey::Student(id));
        }
        if let Some(id) = employee {
            found.push(SourceKey::employee(id));
        }
        if let Some(id) = postgraduate {
            found.push(SourceKey::Postgraduate(id));
        }
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(StoreError::HypostasisIntegrity {
                message: "row carries no source identifier".to_string(),
            }),
            n => Err(StoreError::HypostasisIntegrity {
                message: format!("row carries {n} source identifiers, expected exactly one"),
            }),
        }
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKey::Student(id) => write!(f, "student:{id}"),
            SourceKey::Employee(id) => write!(f, "employee:{id}"),
            SourceKey::Postgraduate(id) => write!(f, "postgraduate:{id}"),
        }
    }
}

// ============================================================================
// Hypostasis
// ============================================================================

/// One source-system appearance, optionally resolved to a person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypostasis {
    pub source: SourceKey,
    pub person: Option<PersonId>,
}

impl Hypostasis {
    pub fn new(source: SourceKey) -> Self {
        Self {
            source,
            person: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_employee_key_is_zero_padded() {
        assert_eq!(
            SourceKey::employee("12"),
            SourceKey::Employee("00012".to_string())
        );
        // Leading zeros collapse before padding, so "012" and "12" are one key.
        assert_eq!(SourceKey::employee("012"), SourceKey::employee("12"));
        assert_eq!(
            SourceKey::employee("123456"),
            SourceKey::Employee("123456".to_string())
        );
        assert_eq!(
            SourceKey::employee("badge-7"),
            SourceKey::Employee("badge-7".to_string())
        );
    }

    #[test]
    fn test_from_columns_requires_exactly_one_id() {
        let key = SourceKey::from_columns(Some(3), None, None).unwrap();
        assert_eq!(key, SourceKey::Student(3));

        assert!(matches!(
            SourceKey::from_columns(None, None, None),
            Err(StoreError::HypostasisIntegrity { .. })
        ));
        assert!(matches!(
            SourceKey::from_columns(Some(3), Some("12"), None),
            Err(StoreError::HypostasisIntegrity { .. })
        ));
    }

    #[test]
    fn test_display_names_the_source_system() {
        assert_eq!(SourceKey::Student(9).to_string(), "student:9");
        assert_eq!(SourceKey::employee("9").to_string(), "employee:00009");
    }
}
