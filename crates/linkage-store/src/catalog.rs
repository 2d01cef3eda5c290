//! Read-only access to the source systems.
//!
//! The linkage engine never mutates source tables; it only needs to look a
//! hypostasis key up and get the current name/date row back. That contract is
//! the [`SourceCatalog`] trait. [`MemoryCatalog`] is the in-process
//! implementation used by the CLI (loaded from a JSON export) and by tests.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::hypostasis::SourceKey;

/// One row of a source table, as the linkage engine sees it.
///
/// Source systems keep history: several rows can share a primary key, each
/// bounded by `valid_to`. The row currently in force is the one with a null
/// `valid_to`, falling back to the greatest `valid_to` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub valid_to: Option<NaiveDate>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("no source row for {key}")]
    NotFound { key: SourceKey },
}

/// Lookup interface over the three source systems.
pub trait SourceCatalog {
    /// Resolve a source key to its currently valid row.
    fn lookup(&self, key: &SourceKey) -> Result<SourceRecord, CatalogError>;

    /// Every key the catalog knows, normalized, in a stable order.
    fn keys(&self) -> Vec<SourceKey>;
}

// ============================================================================
// In-Memory Catalog
// ============================================================================

/// Source tables held in memory, keyed by primary key.
///
/// Employee rows are keyed by their numeric pk here; the zero-padded string
/// form only exists on hypostases. `BTreeMap` keeps [`SourceCatalog::keys`]
/// deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryCatalog {
    #[serde(default)]
    pub students: BTreeMap<u32, Vec<SourceRecord>>,
    #[serde(default)]
    pub employees: BTreeMap<u32, Vec<SourceRecord>>,
    #[serde(default)]
    pub postgraduates: BTreeMap<u32, Vec<SourceRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_student(&mut self, id: u32, row: SourceRecord) {
        self.students.entry(id).or_default().push(row);
    }

    pub fn add_employee(&mut self, id: u32, row: SourceRecord) {
        self.employees.entry(id).or_default().push(row);
    }

    pub fn add_postgraduate(&mut self, id: u32, row: SourceRecord) {
        self.postgraduates.entry(id).or_default().push(row);
    }

    pub fn len(&self) -> usize {
        self.students.len() + self.employees.len() + self.postgraduates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pick the row currently in force among the versions of one key.
    fn actual(rows: &[SourceRecord]) -> Option<&SourceRecord> {
        if let Some(open) = rows.iter().find(|r| r.valid_to.is_none()) {
            return Some(open);
        }
        rows.iter().max_by_key(|r| r.valid_to)
    }
}

impl SourceCatalog for MemoryCatalog {
    fn lookup(&self, key: &SourceKey) -> Result<SourceRecord, CatalogError> {
        let not_found = || CatalogError::NotFound { key: key.clone() };
        let rows = match key {
            SourceKey::Student(id) => self.students.get(id),
            SourceKey::Postgraduate(id) => self.postgraduates.get(id),
            SourceKey::Employee(raw) => {
                // Padded keys parse back to the numeric pk; non-decimal keys
                // cannot exist in the source tables.
                let id: u32 = raw.parse().map_err(|_| not_found())?;
                self.employees.get(&id)
            }
        };
        let rows = rows.ok_or_else(not_found)?;
        Self::actual(rows).cloned().ok_or_else(not_found)
    }

    fn keys(&self) -> Vec<SourceKey> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.students.keys().map(|&id| SourceKey::Student(id)));
        out.extend(
            self.employees
                .keys()
                .map(|&id| SourceKey::employee(&id.to_string())),
        );
        out.extend(
            self.postgraduates
                .keys()
                .map(|&id| SourceKey::Postgraduate(id)),
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(last: &str, valid_to: Option<NaiveDate>) -> SourceRecord {
        SourceRecord {
            last_name: Some(last.to_string()),
            first_name: Some("Ivan".to_string()),
            middle_name: None,
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1),
            valid_to,
        }
    }

    #[test]
    fn test_lookup_prefers_open_ended_row() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_student(1, row("Old", NaiveDate::from_ymd_opt(2015, 6, 1)));
        catalog.add_student(1, row("Current", None));

        let got = catalog.lookup(&SourceKey::Student(1)).unwrap();
        assert_eq!(got.last_name.as_deref(), Some("Current"));
    }

    #[test]
    fn test_lookup_falls_back_to_latest_closed_row() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_student(1, row("Older", NaiveDate::from_ymd_opt(2014, 1, 1)));
        catalog.add_student(1, row("Newer", NaiveDate::from_ymd_opt(2019, 1, 1)));

        let got = catalog.lookup(&SourceKey::Student(1)).unwrap();
        assert_eq!(got.last_name.as_deref(), Some("Newer"));
    }

    #[test]
    fn test_lookup_resolves_padded_employee_keys() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_employee(12, row("Petrov", None));

        let got = catalog.lookup(&SourceKey::employee("12")).unwrap();
        assert_eq!(got.last_name.as_deref(), Some("Petrov"));

        let err = catalog.lookup(&SourceKey::Student(12)).unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }

    #[test]
    fn test_keys_are_normalized_and_stable() {
        let mut catalog = MemoryCatalog::new();
        catalog.add_employee(7, row("A", None));
        catalog.add_student(2, row("B", None));
        catalog.add_student(1, row("C", None));

        assert_eq!(
            catalog.keys(),
            vec![
                SourceKey::Student(1),
                SourceKey::Student(2),
                SourceKey::Employee("00007".to_string()),
            ]
        );
    }
}
