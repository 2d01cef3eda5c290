//! Columnar identity store.
//!
//! Persons and hypostases live in slot arenas indexed by their raw ids.
//! Person slots can be vacated (merges delete orphaned persons); hypostasis
//! slots never are, so a `HypostasisId` stays valid for the lifetime of the
//! store. Per-person reference counts are maintained on every link change,
//! which makes the "is this person still referenced by any hypostasis"
//! question O(1) instead of a scan.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::catalog::SourceCatalog;
use crate::hypostasis::{Hypostasis, SourceKey};
use crate::ids::{HypostasisId, PersonId};
use crate::person::Person;
use crate::StoreError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityStore {
    /// Person slots; `None` marks a deleted person.
    persons: Vec<Option<Person>>,
    /// How many hypostases point at each person slot.
    person_refs: Vec<u32>,
    /// Hypostasis arena, never shrunk.
    hypostases: Vec<Hypostasis>,
    /// Source key -> hypostasis. Derived from `hypostases`; rebuilt after
    /// deserializing a snapshot.
    #[serde(skip)]
    source_index: AHashMap<SourceKey, HypostasisId>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-deleted) persons.
    pub fn person_count(&self) -> usize {
        self.persons.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn hypostasis_count(&self) -> usize {
        self.hypostases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypostases.is_empty() && self.persons.is_empty()
    }

    /// Rebuild the source-key index from the hypostasis arena. Must be called
    /// after deserializing a snapshot, before any lookups.
    pub fn rebuild_index(&mut self) {
        self.source_index.clear();
        for (raw, hypostasis) in self.hypostases.iter().enumerate() {
            self.source_index
                .insert(hypostasis.source.clone(), HypostasisId::new(raw as u32));
        }
    }

    // ========================================================================
    // Persons
    // ========================================================================

    pub fn insert_person(&mut self, person: Person) -> PersonId {
        let id = PersonId::new(self.persons.len() as u32);
        self.persons.push(Some(person));
        self.person_refs.push(0);
        id
    }

    pub fn person(&self, id: PersonId) -> Option<&Person> {
        self.persons.get(id.raw() as usize)?.as_ref()
    }

    pub fn person_mut(&mut self, id: PersonId) -> Option<&mut Person> {
        self.persons.get_mut(id.raw() as usize)?.as_mut()
    }

    /// How many hypostases currently reference this person. Deleted and
    /// unknown persons report zero.
    pub fn person_ref_count(&self, id: PersonId) -> u32 {
        self.person_refs.get(id.raw() as usize).copied().unwrap_or(0)
    }

    /// Delete a person. Refuses while any hypostasis still points at it.
    pub fn remove_person(&mut self, id: PersonId) -> Result<Person, StoreError> {
        let refs = self.person_ref_count(id);
        if refs > 0 {
            return Err(StoreError::PersonStillReferenced { person: id, refs });
        }
        let slot = self
            .persons
            .get_mut(id.raw() as usize)
            .ok_or(StoreError::UnknownPerson { person: id })?;
        slot.take().ok_or(StoreError::UnknownPerson { person: id })
    }

    /// Live persons in id order.
    pub fn persons(&self) -> impl Iterator<Item = (PersonId, &Person)> {
        self.persons.iter().enumerate().filter_map(|(raw, slot)| {
            slot.as_ref()
                .map(|person| (PersonId::new(raw as u32), person))
        })
    }

    // ========================================================================
    // Hypostases
    // ========================================================================

    /// Insert a hypostasis for a source row. Each source key may appear once.
    pub fn insert_hypostasis(&mut self, source: SourceKey) -> Result<HypostasisId, StoreError> {
        if self.source_index.contains_key(&source) {
            return Err(StoreError::DuplicateSourceKey { key: source });
        }
        let id = HypostasisId::new(self.hypostases.len() as u32);
        self.source_index.insert(source.clone(), id);
        self.hypostases.push(Hypostasis::new(source));
        Ok(id)
    }

    pub fn hypostasis(&self, id: HypostasisId) -> Option<&Hypostasis> {
        self.hypostases.get(id.raw() as usize)
    }

    pub fn find_source(&self, key: &SourceKey) -> Option<HypostasisId> {
        self.source_index.get(key).copied()
    }

    /// All hypostases in id order.
    pub fn hypostases(&self) -> impl Iterator<Item = (HypostasisId, &Hypostasis)> {
        self.hypostases
            .iter()
            .enumerate()
            .map(|(raw, h)| (HypostasisId::new(raw as u32), h))
    }

    /// Repoint a hypostasis at a person (or at nothing), keeping reference
    /// counts in step.
    pub fn assign_person(
        &mut self,
        id: HypostasisId,
        person: Option<PersonId>,
    ) -> Result<(), StoreError> {
        if let Some(pid) = person {
            if self.person(pid).is_none() {
                return Err(StoreError::UnknownPerson { person: pid });
            }
        }
        let slot = self
            .hypostases
            .get_mut(id.raw() as usize)
            .ok_or(StoreError::UnknownHypostasis { hypostasis: id })?;
        let previous = slot.person;
        if previous == person {
            return Ok(());
        }
        slot.person = person;
        if let Some(old) = previous {
            let refs = &mut self.person_refs[old.raw() as usize];
            *refs = refs.saturating_sub(1);
        }
        if let Some(new) = person {
            self.person_refs[new.raw() as usize] += 1;
        }
        Ok(())
    }

    /// The hypostasis whose source row is currently in force for a person.
    ///
    /// Among the hypostases referencing the person, a row with no `valid_to`
    /// wins outright; otherwise the latest `valid_to` does. Ties keep the
    /// lowest hypostasis id. Rows the catalog no longer resolves are skipped,
    /// so a person whose every source row vanished reports `None`.
    pub fn actual_hypostasis(
        &self,
        person: PersonId,
        catalog: &dyn SourceCatalog,
    ) -> Option<HypostasisId> {
        let mut best: Option<(HypostasisId, Option<chrono::NaiveDate>)> = None;
        for (id, hypostasis) in self.hypostases() {
            if hypostasis.person != Some(person) {
                continue;
            }
            let Ok(row) = catalog.lookup(&hypostasis.source) else {
                continue;
            };
            if row.valid_to.is_none() {
                return Some(id);
            }
            match best {
                Some((_, until)) if row.valid_to <= until => {}
                _ => best = Some((id, row.valid_to)),
            }
        }
        best.map(|(id, _)| id)
    }

    // ========================================================================
    // Journal Replay
    // ========================================================================

    /// Put a person back at a fixed slot during journal replay. Slots between
    /// the current end and `id` are left vacant; their deletions will have
    /// been journaled too and simply never get restored.
    pub fn restore_person(&mut self, id: PersonId, person: Person) {
        let slot = id.raw() as usize;
        while self.persons.len() <= slot {
            self.persons.push(None);
            self.person_refs.push(0);
        }
        self.persons[slot] = Some(person);
    }

    /// Put a hypostasis back at a fixed slot during journal replay.
    /// Hypostases are journaled in creation order, so a slot past the end of
    /// the arena means the journal is out of order.
    pub fn restore_hypostasis(
        &mut self,
        id: HypostasisId,
        source: SourceKey,
        person: Option<PersonId>,
    ) -> Result<(), StoreError> {
        let slot = id.raw() as usize;
        match slot.cmp(&self.hypostases.len()) {
            std::cmp::Ordering::Less => {
                let old = std::mem::replace(
                    &mut self.hypostases[slot],
                    Hypostasis {
                        source: source.clone(),
                        person: None,
                    },
                );
                if old.source != source {
                    self.source_index.remove(&old.source);
                }
                if let Some(p) = old.person {
                    if let Some(refs) = self.person_refs.get_mut(p.raw() as usize) {
                        *refs = refs.saturating_sub(1);
                    }
                }
            }
            std::cmp::Ordering::Equal => {
                self.hypostases.push(Hypostasis::new(source.clone()));
            }
            std::cmp::Ordering::Greater => {
                return Err(StoreError::UnknownHypostasis { hypostasis: id });
            }
        }
        self.source_index.insert(source, id);
        if let Some(p) = person {
            self.hypostases[slot].person = Some(p);
            if let Some(refs) = self.person_refs.get_mut(p.raw() as usize) {
                *refs += 1;
            }
        }
        Ok(())
    }
}
