//! Compact identifiers shared across the linkage workspace.
//!
//! Every domain object is addressed by a `u32` newtype (4 bytes instead of a
//! wide key), which keeps the columnar tables and Roaring bitmap indexes
//! cheap. The persistence boundary (`UpdateBatch`, journal frames, snapshots)
//! speaks these ids as well, so they live here rather than next to the tables
//! that allocate them.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a canonical [`Person`](crate::Person).
    PersonId
);

id_type!(
    /// Identifier of a [`Hypostasis`](crate::Hypostasis), one appearance of a
    /// person in a source system.
    HypostasisId
);

id_type!(
    /// Identifier of a match record (the flat snapshot the clustering engine
    /// compares).
    RecordId
);

id_type!(
    /// Identifier of a group of match records believed to be the same person.
    GroupId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip() {
        let id = PersonId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_ids_order_by_raw_value() {
        let mut ids = vec![RecordId::new(7), RecordId::new(1), RecordId::new(3)];
        ids.sort();
        assert_eq!(ids, vec![RecordId::new(1), RecordId::new(3), RecordId::new(7)]);
    }
}
