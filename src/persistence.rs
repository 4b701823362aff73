use crate::entity::now_millis;
use crate::error::{DashboardError, DashboardResult};
use crate::object_storage::{Blob, ObjectStorage, ephemeral_reference, object_path};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Audit log of every uploaded document.
pub const UPLOAD_LOG_KEY: &str = "uploaded_documents";

/// Durable string key-value storage, one JSON document per key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> DashboardResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> DashboardResult<()>;
    fn remove(&self, key: &str) -> DashboardResult<()>;
}

impl<K: KeyValueStore + ?Sized> KeyValueStore for Arc<K> {
    fn get(&self, key: &str) -> DashboardResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> DashboardResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> DashboardResult<()> {
        (**self).remove(key)
    }
}

/// Key-value store keeping `<dir>/<key>.json` files.
///
/// Values are written to a temporary file and renamed into place, so a failed
/// write leaves the previous value readable.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open the store, creating its directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> DashboardResult<Self> {
        let dir = dir.into();
        if !dir.exists() {
            create_dir_all(&dir)?;
        }
        Ok(FileStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> DashboardResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(DashboardError::Persistence(format!("invalid key: {}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> DashboardResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DashboardError::Persistence(format!(
                "failed to read {}: {}",
                key, e
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> DashboardResult<()> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", key));

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            DashboardError::Persistence(format!("failed to write {}: {}", key, e))
        })
    }

    fn remove(&self, key: &str) -> DashboardResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DashboardError::Persistence(format!(
                "failed to remove {}: {}",
                key, e
            ))),
        }
    }
}

/// In-memory key-value store. Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> DashboardResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> DashboardResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> DashboardResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// A whole entity collection as it is mirrored to durable storage.
pub trait PersistedCollection: Serialize + Sized {
    /// Storage key of the collection.
    const KEY: &'static str;

    /// Shape read back from storage, before ids are checked.
    type Stored: DeserializeOwned;

    /// Build the collection from its stored shape.
    ///
    /// # Returns
    ///
    /// The collection, and `true` when records had to be repaired on the way
    /// (ids assigned or replaced, unusable records dropped), meaning the
    /// stored value no longer matches it.
    fn from_stored(stored: Self::Stored) -> (Self, bool);

    /// Bundled default used when storage holds nothing.
    fn seed() -> Self;

    /// Whether a stored value should be treated like a missing one.
    fn is_vacant(&self) -> bool {
        false
    }
}

/// Where a document's binary payload ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlobReference {
    /// Stored in object storage: `url` is public, `path` is the storage key.
    Remote { url: String, path: String },
    /// Storage was unavailable; the reference dies with the session.
    Ephemeral(String),
}

impl BlobReference {
    /// Link to put in the document record.
    pub fn url(&self) -> &str {
        match self {
            BlobReference::Remote { url, .. } => url,
            BlobReference::Ephemeral(reference) => reference,
        }
    }

    /// Path to delete the payload by; ephemeral payloads have none.
    pub fn storage_path(&self) -> Option<&str> {
        match self {
            BlobReference::Remote { path, .. } => Some(path),
            BlobReference::Ephemeral(_) => None,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, BlobReference::Ephemeral(_))
    }
}

/// One line of the upload audit log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub title: String,
    pub file_name: String,
    pub reference: String,
    pub ephemeral: bool,
    pub uploaded_at: String,
}

/// Mirrors entity collections to durable storage.
///
/// Durable storage is the source of truth across reloads: collections are
/// always read and written whole, never merged field by field.
#[derive(Clone, Debug)]
pub struct PersistenceBridge<K> {
    kv: K,
}

impl<K: KeyValueStore> PersistenceBridge<K> {
    pub fn new(kv: K) -> Self {
        PersistenceBridge { kv }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    /// Read a collection, falling back to its seed when storage is empty.
    ///
    /// The seed is written back immediately so later loads agree with this
    /// one. A stored value that cannot be parsed is reported as an error and
    /// left untouched.
    pub fn load_all<C: PersistedCollection>(&self) -> DashboardResult<C> {
        if let Some(collection) = self.load_stored::<C>()? {
            return Ok(collection);
        }

        log::info!("no stored {}, using bundled seed data", C::KEY);
        let seed = C::seed();
        if let Err(e) = self.save_all(&seed) {
            log::warn!("seed for {} could not be persisted: {}", C::KEY, e);
        }
        Ok(seed)
    }

    /// Read a collection without seeding; `None` when storage has nothing usable.
    pub fn load_stored<C: PersistedCollection>(&self) -> DashboardResult<Option<C>> {
        let Some(raw) = self.kv.get(C::KEY)? else {
            return Ok(None);
        };

        let stored: C::Stored = serde_json::from_str(&raw).map_err(|e| {
            log::error!("stored {} is unreadable: {}", C::KEY, e);
            DashboardError::Persistence(format!("stored {} is unreadable: {}", C::KEY, e))
        })?;

        let (collection, repaired) = C::from_stored(stored);
        if collection.is_vacant() {
            return Ok(None);
        }

        // Repaired ids are written back so the next load hands out the same ones.
        if repaired {
            log::info!("writing back repaired {}", C::KEY);
            if let Err(e) = self.save_all(&collection) {
                log::warn!("repaired {} could not be persisted: {}", C::KEY, e);
            }
        }
        Ok(Some(collection))
    }

    /// Serialize and write a whole collection. On failure the previous
    /// durable value stays in place.
    pub fn save_all<C: PersistedCollection>(&self, collection: &C) -> DashboardResult<()> {
        let json = serde_json::to_string(collection)?;
        self.kv.set(C::KEY, &json).map_err(|e| {
            log::error!("failed to save {}: {}", C::KEY, e);
            e
        })
    }

    /// Typed read of a single key.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> DashboardResult<Option<T>> {
        match self.kv.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Typed write of a single key.
    pub fn store<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> DashboardResult<()> {
        let json = serde_json::to_string(value)?;
        self.kv.set(key, &json)
    }

    pub fn remove(&self, key: &str) -> DashboardResult<()> {
        self.kv.remove(key)
    }

    /// Upload a document payload.
    ///
    /// When no storage is configured, or the upload fails, the payload gets an
    /// ephemeral reference instead; the caller's add operation goes on either
    /// way. Every upload is appended to the audit log.
    pub async fn upload_blob<S: ObjectStorage>(
        &self,
        storage: Option<&S>,
        blob: &Blob,
        title: &str,
    ) -> BlobReference {
        let reference = match storage {
            Some(storage) => {
                let path = object_path(&blob.file_name, now_millis());
                match storage.upload(&path, &blob.bytes).await {
                    Ok(url) => BlobReference::Remote { url, path },
                    Err(e) => {
                        log::warn!(
                            "upload of {} failed, keeping a local reference: {}",
                            blob.file_name,
                            e
                        );
                        BlobReference::Ephemeral(ephemeral_reference())
                    }
                }
            }
            None => {
                log::warn!("object storage unavailable, keeping a local reference");
                BlobReference::Ephemeral(ephemeral_reference())
            }
        };

        let record = UploadRecord {
            title: title.to_string(),
            file_name: blob.file_name.clone(),
            reference: reference.url().to_string(),
            ephemeral: reference.is_ephemeral(),
            uploaded_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.append_upload(record) {
            log::warn!("upload log not updated: {}", e);
        }

        reference
    }

    pub fn upload_log(&self) -> DashboardResult<Vec<UploadRecord>> {
        Ok(self.load(UPLOAD_LOG_KEY)?.unwrap_or_default())
    }

    fn append_upload(&self, record: UploadRecord) -> DashboardResult<()> {
        let mut log = self.upload_log()?;
        log.push(record);
        self.store(UPLOAD_LOG_KEY, &log)
    }
}
