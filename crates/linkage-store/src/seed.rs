//! Bootstrap of the identity store from the source catalogs.
//!
//! Two passes, both idempotent: first a hypostasis is created for every
//! catalog key the store does not know yet, then a person is created for
//! every hypostasis still lacking one. Re-running against the same catalog is
//! a no-op.

use serde::{Deserialize, Serialize};

use crate::batch::{BatchOrigin, PersistenceSink, UpdateBatch, UpdateItem};
use crate::catalog::SourceCatalog;
use crate::person::Person;
use crate::store::IdentityStore;
use crate::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub hypostases_created: usize,
    pub persons_created: usize,
    /// Hypostases whose source row has vanished from the catalog.
    pub rows_missing: usize,
}

/// Bring the store in line with the catalog.
pub fn seed_identities(
    store: &mut IdentityStore,
    catalog: &dyn SourceCatalog,
    sink: &mut dyn PersistenceSink,
) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    let mut batch = UpdateBatch::new(BatchOrigin::Seed);

    for key in catalog.keys() {
        if store.find_source(&key).is_some() {
            continue;
        }
        let id = store.insert_hypostasis(key.clone())?;
        batch.push(UpdateItem::HypostasisUpsert {
            hypostasis: id,
            source: key,
            person: None,
        });
        report.hypostases_created += 1;
    }

    let unresolved: Vec<_> = store
        .hypostases()
        .filter(|(_, h)| h.person.is_none())
        .map(|(id, h)| (id, h.source.clone()))
        .collect();

    for (id, source) in unresolved {
        let row = match catalog.lookup(&source) {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!(
                    hypostasis = %id,
                    source = %source,
                    error = %err,
                    "skipping hypostasis while seeding persons"
                );
                report.rows_missing += 1;
                continue;
            }
        };
        let person = Person::from_source(&row);
        let person_id = store.insert_person(person.clone());
        store.assign_person(id, Some(person_id))?;
        batch.push(UpdateItem::PersonUpsert {
            person: person_id,
            last_name: person.last_name,
            first_name: person.first_name,
            middle_name: person.middle_name,
            birth_date: person.birth_date,
        });
        batch.push(UpdateItem::HypostasisUpdate {
            hypostasis: id,
            person: Some(person_id),
        });
        report.persons_created += 1;
    }

    if !batch.is_empty() {
        sink.apply(&batch)?;
    }

    tracing::info!(
        hypostases = report.hypostases_created,
        persons = report.persons_created,
        missing = report.rows_missing,
        "seeded identity store"
    );

    Ok(report)
}
