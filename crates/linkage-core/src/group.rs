//! Group arena and membership index.
//!
//! Groups live in a slot arena like persons do; a deleted group (split)
//! vacates its slot so `GroupId`s are never reused. Membership is a roaring
//! bitmap of record ids per slot, which keeps the "first member" and "is this
//! record in the group" questions cheap and gives a deterministic ascending
//! iteration order.

use chrono::NaiveDate;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use linkage_store::{GroupId, PersonId, RecordId};

use crate::error::LinkageError;

/// One cluster of match records believed to denote the same person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    /// Representative birth date: the first non-null member date at creation.
    pub birth_date: Option<NaiveDate>,
    /// Derived by the consistency evaluator.
    pub inconsistent: bool,
    /// Canonical person, set only by the merge engine. A group with a person
    /// can no longer be split.
    pub person: Option<PersonId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupTable {
    /// Group slots; `None` marks a split (deleted) group.
    groups: Vec<Option<Group>>,
    /// Record-id membership per slot, parallel to `groups`.
    members: Vec<RoaringBitmap>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.groups.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, birth_date: Option<NaiveDate>) -> GroupId {
        let id = GroupId::new(self.groups.len() as u32);
        self.groups.push(Some(Group {
            id,
            birth_date,
            inconsistent: false,
            person: None,
        }));
        self.members.push(RoaringBitmap::new());
        id
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.raw() as usize)?.as_ref()
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut Group, LinkageError> {
        self.groups
            .get_mut(id.raw() as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(LinkageError::UnknownGroup { group: id })
    }

    /// Delete a group, vacating its slot and clearing its membership. Callers
    /// detach member records first; the bitmap is dropped regardless.
    pub fn delete(&mut self, id: GroupId) -> Result<Group, LinkageError> {
        let slot = id.raw() as usize;
        let group = self
            .groups
            .get_mut(slot)
            .and_then(|s| s.take())
            .ok_or(LinkageError::UnknownGroup { group: id })?;
        self.members[slot].clear();
        Ok(group)
    }

    // ========================================================================
    // Membership
    // ========================================================================

    pub fn attach(&mut self, id: GroupId, record: RecordId) -> Result<(), LinkageError> {
        self.group_mut(id)?;
        self.members[id.raw() as usize].insert(record.raw());
        Ok(())
    }

    pub fn detach(&mut self, id: GroupId, record: RecordId) -> Result<(), LinkageError> {
        self.group_mut(id)?;
        self.members[id.raw() as usize].remove(record.raw());
        Ok(())
    }

    pub fn members(&self, id: GroupId) -> Option<&RoaringBitmap> {
        if self.group(id).is_none() {
            return None;
        }
        self.members.get(id.raw() as usize)
    }

    pub fn member_count(&self, id: GroupId) -> u64 {
        self.members(id).map_or(0, |m| m.len())
    }

    /// Lowest record id in the group. Formation attaches in ascending id
    /// order, so this is the member every consistent-group comparison runs
    /// against.
    pub fn first_member(&self, id: GroupId) -> Option<RecordId> {
        self.members(id)?.min().map(RecordId::new)
    }

    /// Members in ascending record-id order.
    pub fn member_records(&self, id: GroupId) -> Vec<RecordId> {
        self.members(id)
            .map(|m| m.iter().map(RecordId::new).collect())
            .unwrap_or_default()
    }

    // ========================================================================
    // Field Updates
    // ========================================================================

    pub fn set_birth_date(
        &mut self,
        id: GroupId,
        birth_date: Option<NaiveDate>,
    ) -> Result<(), LinkageError> {
        self.group_mut(id)?.birth_date = birth_date;
        Ok(())
    }

    pub fn set_inconsistent(&mut self, id: GroupId, inconsistent: bool) -> Result<(), LinkageError> {
        self.group_mut(id)?.inconsistent = inconsistent;
        Ok(())
    }

    pub fn set_person(&mut self, id: GroupId, person: Option<PersonId>) -> Result<(), LinkageError> {
        self.group_mut(id)?.person = person;
        Ok(())
    }

    /// Live groups in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter_map(|slot| slot.as_ref())
    }

    /// Live group ids in id order.
    pub fn ids(&self) -> Vec<GroupId> {
        self.iter().map(|g| g.id).collect()
    }

    // ========================================================================
    // Journal Replay
    // ========================================================================

    /// Put a group row back at its fixed slot during journal replay. Slots
    /// between the current end and the id stay vacant (their groups were
    /// split). Membership is not touched here; it is rebuilt from replayed
    /// record updates.
    pub fn restore_group(&mut self, group: Group) {
        let slot = group.id.raw() as usize;
        while self.groups.len() <= slot {
            self.groups.push(None);
            self.members.push(RoaringBitmap::new());
        }
        self.groups[slot] = Some(group);
    }

    /// Drop a group during journal replay without the live-group checks.
    pub fn erase_group(&mut self, id: GroupId) {
        let slot = id.raw() as usize;
        if let Some(s) = self.groups.get_mut(slot) {
            *s = None;
            self.members[slot].clear();
        }
    }
}

/// Attach a record to a group, keeping the group bitmap and the record's
/// group pointer in step.
pub fn attach_record(
    records: &mut crate::record::MatchTable,
    groups: &mut GroupTable,
    record: RecordId,
    group: GroupId,
) -> Result<(), LinkageError> {
    groups.attach(group, record)?;
    records.set_group(record, Some(group))?;
    Ok(())
}

/// Detach a record from whatever group it is in. Returns the group it left.
pub fn detach_record(
    records: &mut crate::record::MatchTable,
    groups: &mut GroupTable,
    record: RecordId,
) -> Result<Option<GroupId>, LinkageError> {
    let current = records
        .record(record)
        .ok_or(LinkageError::UnknownRecord { record })?
        .group;
    if let Some(group) = current {
        groups.detach(group, record)?;
    }
    records.set_group(record, None)?;
    Ok(current)
}
