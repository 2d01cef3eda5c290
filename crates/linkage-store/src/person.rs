//! Canonical person rows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::SourceRecord;

/// A deduplicated person.
///
/// Name fields are never null here: source rows may carry nulls, but a person
/// is stored with empty strings instead so downstream display and comparison
/// code has one representation to deal with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub last_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub birth_date: Option<NaiveDate>,
}

impl Person {
    /// Build a person from a source row, normalizing null names to empty
    /// strings.
    pub fn from_source(row: &SourceRecord) -> Self {
        Self {
            last_name: row.last_name.clone().unwrap_or_default(),
            first_name: row.first_name.clone().unwrap_or_default(),
            middle_name: row.middle_name.clone().unwrap_or_default(),
            birth_date: row.birth_date,
        }
    }

    /// "Last First Middle" with empty components skipped.
    pub fn full_name(&self) -> String {
        let mut out = String::new();
        for part in [&self.last_name, &self.first_name, &self.middle_name] {
            if part.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(part);
        }
        out
    }
}
