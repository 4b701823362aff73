use crate::entity::Entity;
use crate::error::{DashboardError, DashboardResult};
use crate::object_storage::ObjectStorage;
use crate::persistence::{KeyValueStore, PersistenceBridge};
use crate::store::{DocumentLibrary, FACILITIES_KEY, FacilitySet, FacilityStore, Library};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Every durable collection at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub exported_at: String,
    pub facilities: Vec<Entity>,
    pub library: Library,
}

impl Snapshot {
    /// Read both collections from durable storage.
    pub fn export<K: KeyValueStore>(bridge: &PersistenceBridge<K>) -> DashboardResult<Self> {
        let facilities = bridge.load_all::<FacilitySet>()?.0;
        let library = bridge.load_all::<Library>()?;
        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            facilities,
            library,
        })
    }

    /// Gzip-compressed JSON.
    pub fn encode(&self) -> DashboardResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        Ok(encoder.finish()?)
    }

    /// Inverse of [`Snapshot::encode`]. Snapshots of another version are refused.
    pub fn decode(bytes: &[u8]) -> DashboardResult<Self> {
        let mut json = String::new();
        GzDecoder::new(bytes).read_to_string(&mut json)?;
        Self::checked(serde_json::from_str(&json)?)
    }

    /// Write the snapshot to a gzip file, replacing any existing one.
    pub fn write_to(&self, path: impl AsRef<Path>) -> DashboardResult<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
        serde_json::to_writer(&mut writer, self)?;

        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?.sync_all()?;
        Ok(())
    }

    pub fn read_from(path: impl AsRef<Path>) -> DashboardResult<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(GzDecoder::new(file));
        Self::checked(serde_json::from_reader(reader)?)
    }

    fn checked(snapshot: Snapshot) -> DashboardResult<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DashboardError::Validation(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Replace both durable collections with this snapshot.
    ///
    /// Either both collections are replaced or neither is: when the library
    /// cannot be written, the previous facility value is put back.
    ///
    /// # Arguments
    ///
    /// * `bridge` - Storage the collections are written to.
    ///
    /// # Returns
    ///
    /// The first write error, after the rollback has been attempted.
    pub fn restore<K: KeyValueStore>(&self, bridge: &PersistenceBridge<K>) -> DashboardResult<()> {
        let previous = bridge.kv().get(FACILITIES_KEY)?;
        bridge.save_all(&FacilitySet(self.facilities.clone()))?;

        if let Err(e) = bridge.save_all(&self.library) {
            let rollback = match &previous {
                Some(raw) => bridge.kv().set(FACILITIES_KEY, raw),
                None => bridge.kv().remove(FACILITIES_KEY),
            };
            if let Err(rollback) = rollback {
                log::error!("restore left facilities replaced, rollback failed: {}", rollback);
            }
            return Err(e);
        }

        log::info!(
            "restored {} facilities and {} documents from snapshot of {}",
            self.facilities.len(),
            self.library.len(),
            self.exported_at
        );
        Ok(())
    }

    /// Restore through the stores' storage and reload both of them.
    pub fn restore_into<K: KeyValueStore, S: ObjectStorage>(
        &self,
        facilities: &mut FacilityStore<K>,
        documents: &mut DocumentLibrary<K, S>,
    ) -> DashboardResult<()> {
        self.restore(facilities.bridge())?;
        facilities.reload();
        documents.reload();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    #[test]
    fn snapshot_survives_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json.gz");

        let bridge = PersistenceBridge::new(MemoryStore::new());
        let snapshot = Snapshot::export(&bridge).unwrap();
        snapshot.write_to(&path).unwrap();

        let read = Snapshot::read_from(&path).unwrap();
        assert_eq!(read, snapshot);
        assert_eq!(read.facilities.len(), 20);
    }

    #[test]
    fn written_files_are_complete_gzip_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json.gz");

        let snapshot = Snapshot::export(&PersistenceBridge::new(MemoryStore::new())).unwrap();
        snapshot.write_to(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(Snapshot::decode(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn unknown_versions_are_refused() {
        let bridge = PersistenceBridge::new(MemoryStore::new());
        let mut snapshot = Snapshot::export(&bridge).unwrap();
        snapshot.version = 99;
        let bytes = snapshot.encode().unwrap();
        assert!(matches!(
            Snapshot::decode(&bytes),
            Err(DashboardError::Validation(_))
        ));
    }

    #[test]
    fn restore_replaces_stored_collections() {
        let source = PersistenceBridge::new(MemoryStore::new());
        let mut snapshot = Snapshot::export(&source).unwrap();
        snapshot.facilities.truncate(2);

        let target = PersistenceBridge::new(MemoryStore::new());
        snapshot.restore(&target).unwrap();
        let restored = target.load_all::<FacilitySet>().unwrap();
        assert_eq!(restored.0, snapshot.facilities);
    }

    /// Memory store that refuses writes to one key.
    #[derive(Clone, Default)]
    struct RefusesKey {
        inner: MemoryStore,
        refused: &'static str,
    }

    impl KeyValueStore for RefusesKey {
        fn get(&self, key: &str) -> DashboardResult<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> DashboardResult<()> {
            if key == self.refused {
                return Err(DashboardError::Persistence("disk full".to_string()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> DashboardResult<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn failed_restore_leaves_facilities_as_they_were() {
        let mut snapshot = Snapshot::export(&PersistenceBridge::new(MemoryStore::new())).unwrap();
        snapshot.facilities.truncate(2);

        let kv = RefusesKey {
            refused: crate::store::REPORTS_KEY,
            ..RefusesKey::default()
        };
        let target = PersistenceBridge::new(kv.clone());
        let before = target.load_all::<FacilitySet>().unwrap();
        assert_eq!(before.0.len(), 20);

        assert!(snapshot.restore(&target).is_err());
        assert_eq!(target.load_all::<FacilitySet>().unwrap(), before);
    }

    #[test]
    fn failed_restore_into_empty_storage_leaves_it_empty() {
        let snapshot = Snapshot::export(&PersistenceBridge::new(MemoryStore::new())).unwrap();
        let kv = RefusesKey {
            refused: crate::store::REPORTS_KEY,
            ..RefusesKey::default()
        };

        assert!(snapshot.restore(&PersistenceBridge::new(kv.clone())).is_err());
        assert_eq!(kv.get(FACILITIES_KEY).unwrap(), None);
    }
}
