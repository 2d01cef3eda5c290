//! Match records and their table.
//!
//! A match record is the flat snapshot the clustering engines actually
//! compare: the name/date columns of one hypostasis, plus the person and
//! group pointers that clustering maintains. Forbidden relations (record to
//! record and record to group) live here as Roaring bitmaps keyed by record
//! id, so membership checks during candidate scans are set operations.

use ahash::AHashMap;
use chrono::NaiveDate;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use linkage_store::{GroupId, HypostasisId, PersonId, RecordId, SourceRecord};

use crate::error::LinkageError;

/// Name columns of a match record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameField {
    LastName,
    FirstName,
    MiddleName,
}

impl NameField {
    pub const ALL: [NameField; 3] = [
        NameField::LastName,
        NameField::FirstName,
        NameField::MiddleName,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NameField::LastName => "last_name",
            NameField::FirstName => "first_name",
            NameField::MiddleName => "middle_name",
        }
    }
}

impl std::fmt::Display for NameField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat snapshot of one hypostasis, as the engines compare it.
///
/// Name columns stay nullable here: a null and an empty string both mean
/// "unknown" and the lenient predicates treat them alike, but the snapshot
/// preserves what the source said.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: RecordId,
    pub hypostasis: HypostasisId,
    pub person: Option<PersonId>,
    pub group: Option<GroupId>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

impl MatchRecord {
    pub fn name(&self, field: NameField) -> Option<&str> {
        match field {
            NameField::LastName => self.last_name.as_deref(),
            NameField::FirstName => self.first_name.as_deref(),
            NameField::MiddleName => self.middle_name.as_deref(),
        }
    }
}

// ============================================================================
// Match Table
// ============================================================================

/// Arena of match records plus the forbidden-relation indexes.
///
/// Records are never deleted: a record lives exactly as long as its
/// hypostasis, and hypostases are permanent. Ids are dense indexes into the
/// arena.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchTable {
    records: Vec<MatchRecord>,
    /// One match record per hypostasis.
    by_hypostasis: AHashMap<HypostasisId, RecordId>,
    /// Symmetric record-to-record forbidden relations.
    forbidden_records: AHashMap<RecordId, RoaringBitmap>,
    /// One-directional record-to-group forbidden relations.
    forbidden_groups: AHashMap<RecordId, RoaringBitmap>,
}

impl MatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert the match record for a hypostasis. Each hypostasis gets one.
    pub fn insert(
        &mut self,
        hypostasis: HypostasisId,
        person: Option<PersonId>,
        snapshot: &SourceRecord,
    ) -> Result<RecordId, LinkageError> {
        if self.by_hypostasis.contains_key(&hypostasis) {
            return Err(LinkageError::DuplicateRecord { hypostasis });
        }
        let id = RecordId::new(self.records.len() as u32);
        self.records.push(MatchRecord {
            id,
            hypostasis,
            person,
            group: None,
            last_name: snapshot.last_name.clone(),
            first_name: snapshot.first_name.clone(),
            middle_name: snapshot.middle_name.clone(),
            birth_date: snapshot.birth_date,
        });
        self.by_hypostasis.insert(hypostasis, id);
        Ok(id)
    }

    pub fn record(&self, id: RecordId) -> Option<&MatchRecord> {
        self.records.get(id.raw() as usize)
    }

    pub fn by_hypostasis(&self, hypostasis: HypostasisId) -> Option<RecordId> {
        self.by_hypostasis.get(&hypostasis).copied()
    }

    /// All records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &MatchRecord> {
        self.records.iter()
    }

    /// Records not attached to any group, in id order.
    pub fn unresolved(&self) -> Vec<RecordId> {
        self.records
            .iter()
            .filter(|r| r.group.is_none())
            .map(|r| r.id)
            .collect()
    }

    /// Overwrite the name/date snapshot of a record in place.
    pub fn refresh_snapshot(
        &mut self,
        id: RecordId,
        snapshot: &SourceRecord,
    ) -> Result<(), LinkageError> {
        let record = self.record_mut(id)?;
        record.last_name = snapshot.last_name.clone();
        record.first_name = snapshot.first_name.clone();
        record.middle_name = snapshot.middle_name.clone();
        record.birth_date = snapshot.birth_date;
        Ok(())
    }

    pub fn set_group(&mut self, id: RecordId, group: Option<GroupId>) -> Result<(), LinkageError> {
        self.record_mut(id)?.group = group;
        Ok(())
    }

    pub fn set_person(
        &mut self,
        id: RecordId,
        person: Option<PersonId>,
    ) -> Result<(), LinkageError> {
        self.record_mut(id)?.person = person;
        Ok(())
    }

    fn record_mut(&mut self, id: RecordId) -> Result<&mut MatchRecord, LinkageError> {
        self.records
            .get_mut(id.raw() as usize)
            .ok_or(LinkageError::UnknownRecord { record: id })
    }

    fn check_known(&self, id: RecordId) -> Result<(), LinkageError> {
        if self.record(id).is_none() {
            return Err(LinkageError::UnknownRecord { record: id });
        }
        Ok(())
    }

    // ========================================================================
    // Forbidden Relations
    // ========================================================================

    /// Forbid two records from ever sharing a group. Returns whether the
    /// relation is new.
    pub fn forbid_pair(&mut self, a: RecordId, b: RecordId) -> Result<bool, LinkageError> {
        if a == b {
            return Err(LinkageError::SelfForbidden { record: a });
        }
        self.check_known(a)?;
        self.check_known(b)?;
        let fresh = self
            .forbidden_records
            .entry(a)
            .or_insert_with(RoaringBitmap::new)
            .insert(b.raw());
        self.forbidden_records
            .entry(b)
            .or_insert_with(RoaringBitmap::new)
            .insert(a.raw());
        Ok(fresh)
    }

    /// Revoke a record-to-record forbidden relation. Both directions must
    /// exist; revoking an absent relation is an error.
    pub fn allow_pair(&mut self, a: RecordId, b: RecordId) -> Result<(), LinkageError> {
        self.check_known(a)?;
        self.check_known(b)?;
        let missing = LinkageError::ForbiddenEdgeMissing { a, b };
        let forward = self
            .forbidden_records
            .get(&a)
            .is_some_and(|set| set.contains(b.raw()));
        let backward = self
            .forbidden_records
            .get(&b)
            .is_some_and(|set| set.contains(a.raw()));
        if !forward || !backward {
            return Err(missing);
        }
        if let Some(set) = self.forbidden_records.get_mut(&a) {
            set.remove(b.raw());
        }
        if let Some(set) = self.forbidden_records.get_mut(&b) {
            set.remove(a.raw());
        }
        Ok(())
    }

    pub fn is_pair_forbidden(&self, a: RecordId, b: RecordId) -> bool {
        self.forbidden_records
            .get(&a)
            .is_some_and(|set| set.contains(b.raw()))
    }

    pub fn forbidden_records(&self, id: RecordId) -> Option<&RoaringBitmap> {
        self.forbidden_records.get(&id)
    }

    /// Forbid a record from joining a group. Returns whether the relation is
    /// new.
    pub fn forbid_group(&mut self, id: RecordId, group: GroupId) -> Result<bool, LinkageError> {
        self.check_known(id)?;
        Ok(self
            .forbidden_groups
            .entry(id)
            .or_insert_with(RoaringBitmap::new)
            .insert(group.raw()))
    }

    /// Revoke a record-to-group forbidden relation. The relation must exist.
    pub fn allow_group(&mut self, id: RecordId, group: GroupId) -> Result<(), LinkageError> {
        self.check_known(id)?;
        let removed = self
            .forbidden_groups
            .get_mut(&id)
            .is_some_and(|set| set.remove(group.raw()));
        if !removed {
            return Err(LinkageError::ForbiddenGroupEdgeMissing { record: id, group });
        }
        Ok(())
    }

    pub fn is_group_forbidden(&self, id: RecordId, group: GroupId) -> bool {
        self.forbidden_groups
            .get(&id)
            .is_some_and(|set| set.contains(group.raw()))
    }

    pub fn forbidden_groups(&self, id: RecordId) -> Option<&RoaringBitmap> {
        self.forbidden_groups.get(&id)
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Write a full record row at its id during journal replay. Ids must
    /// arrive in allocation order; a gap means the journal is corrupt.
    pub fn restore_record(&mut self, record: MatchRecord) -> Result<(), LinkageError> {
        let id = record.id;
        let hypostasis = record.hypostasis;
        let slot = id.raw() as usize;
        match slot.cmp(&self.records.len()) {
            std::cmp::Ordering::Less => {
                let old = std::mem::replace(&mut self.records[slot], record);
                if old.hypostasis != hypostasis {
                    self.by_hypostasis.remove(&old.hypostasis);
                }
            }
            std::cmp::Ordering::Equal => self.records.push(record),
            std::cmp::Ordering::Greater => {
                return Err(LinkageError::UnknownRecord { record: id });
            }
        }
        self.by_hypostasis.insert(hypostasis, id);
        Ok(())
    }
}
