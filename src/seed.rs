//! Bundled default collections, used only when durable storage is empty.

use crate::entity::{Attributes, Entity, IdStrategy, assign_ids};
use crate::store::{Library, LibraryRecords};
use std::collections::HashSet;

const FACILITIES_JSON: &str = include_str!("./data/seed_facilities.json");
const REPORTS_JSON: &str = include_str!("./data/seed_reports.json");

pub fn facilities() -> Vec<Entity> {
    let records: Vec<Attributes> = match serde_json::from_str(FACILITIES_JSON) {
        Ok(records) => records,
        Err(e) => {
            log::error!("bundled facility data is invalid: {}", e);
            Vec::new()
        }
    };
    assign_ids(records, IdStrategy::Sequential, &mut HashSet::new()).0
}

/// Seed reports carry no ids of their own; they get `seed-<n>` so that the
/// seed is the same every time it is built.
pub fn reports() -> Library {
    let mut records: LibraryRecords = match serde_json::from_str(REPORTS_JSON) {
        Ok(records) => records,
        Err(e) => {
            log::error!("bundled report data is invalid: {}", e);
            LibraryRecords::default()
        }
    };

    let mut counter = 0;
    let mut stamp = |record: &mut Attributes| {
        if !record.contains_key("id") {
            counter += 1;
            record.insert("id".to_string(), format!("seed-{}", counter).into());
        }
    };
    records.general.iter_mut().for_each(&mut stamp);
    for bucket in records.grouped.values_mut() {
        bucket.iter_mut().for_each(&mut stamp);
    }

    Library::from_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    #[test]
    fn bundled_facilities_have_unique_ids() {
        let facilities = facilities();
        assert_eq!(facilities.len(), 20);
        let ids: HashSet<_> = facilities.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids.len(), facilities.len());
        assert_eq!(facilities[0].id, EntityId::from(1));
    }

    #[test]
    fn bundled_reports_are_deterministic() {
        let a = reports();
        let b = reports();
        assert_eq!(a, b);
        assert_eq!(a.general.len(), 3);
        assert!(a.grouped.contains_key("1"));
        assert_eq!(a.general[0].id, EntityId::from("seed-1"));
    }

    #[test]
    fn grouped_seed_reports_know_their_facility() {
        let library = reports();
        for (key, bucket) in &library.grouped {
            for doc in bucket {
                assert_eq!(doc.group_key().as_deref(), Some(key.as_str()));
            }
        }
    }
}
