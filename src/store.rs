use crate::derive::{self, FacilityView};
use crate::entity::{Attributes, Entity, EntityId, GROUP_KEY_FIELD, IdStrategy, assign_ids};
use crate::error::{CollectionKind, DashboardError, DashboardResult};
use crate::i18n::LocalizationResolver;
use crate::object_storage::{Blob, ObjectStorage};
use crate::persistence::{KeyValueStore, PersistedCollection, PersistenceBridge};
use crate::remote::{self, ReadApi};
use crate::seed;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Storage key of the facility collection.
pub const FACILITIES_KEY: &str = "lithium_refineries_data";
/// Storage key of the document library.
pub const REPORTS_KEY: &str = "reports_data";

pub const DEFAULT_AUTHOR: &str = "Auteur non spécifié";
pub const DEFAULT_TITLE: &str = "Sans titre";
pub const DEFAULT_THUMBNAIL: &str = "/images/file-icon.png";
pub const PDF_THUMBNAIL: &str = "/images/pdf-icon.png";

/// Field holding a document's path in object storage.
pub const STORAGE_PATH_FIELD: &str = "storagePath";

/// The facility collection as it is persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FacilitySet(pub Vec<Entity>);

impl PersistedCollection for FacilitySet {
    const KEY: &'static str = FACILITIES_KEY;
    type Stored = Vec<Value>;

    fn from_stored(stored: Vec<Value>) -> (Self, bool) {
        let total = stored.len();
        let records: Vec<Attributes> = stored
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(record) => Some(record),
                other => {
                    log::warn!("skipping stored facility that is not a record: {}", other);
                    None
                }
            })
            .collect();
        let skipped = total - records.len();

        let (facilities, fresh_ids) =
            assign_ids(records, IdStrategy::Sequential, &mut HashSet::new());
        (FacilitySet(facilities), skipped + fresh_ids > 0)
    }

    fn seed() -> Self {
        FacilitySet(seed::facilities())
    }

    fn is_vacant(&self) -> bool {
        self.0.is_empty()
    }
}

/// Documents split into general ones and per-facility buckets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub general: Vec<Entity>,
    pub grouped: BTreeMap<String, Vec<Entity>>,
}

/// Library as read back from storage, before ids are checked.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LibraryRecords {
    #[serde(default)]
    pub general: Vec<Attributes>,
    #[serde(default)]
    pub grouped: BTreeMap<String, Vec<Attributes>>,
}

impl Library {
    /// Build a library with unique ids across every bucket. Documents in a
    /// facility bucket get that facility as their group key if they lack one.
    pub fn from_records(records: LibraryRecords) -> Self {
        Library::rebuild(records).0
    }

    /// Same as [`Library::from_records`], also reporting whether any id or
    /// group key had to be filled in.
    fn rebuild(records: LibraryRecords) -> (Self, bool) {
        let mut taken = HashSet::new();
        let (general, mut filled) = assign_ids(records.general, IdStrategy::Timestamp, &mut taken);

        let grouped = records
            .grouped
            .into_iter()
            .map(|(key, bucket)| {
                let (mut documents, fresh_ids) =
                    assign_ids(bucket, IdStrategy::Timestamp, &mut taken);
                filled += fresh_ids;
                for doc in documents.iter_mut().filter(|doc| doc.group_key().is_none()) {
                    doc.set(GROUP_KEY_FIELD, EntityId::new(key.clone()).to_value());
                    filled += 1;
                }
                (key, documents)
            })
            .collect();

        (Library { general, grouped }, filled > 0)
    }

    pub fn len(&self) -> usize {
        self.general.len() + self.grouped.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every document, general ones first.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.general.iter().chain(self.grouped.values().flatten())
    }

    pub fn ids(&self) -> HashSet<EntityId> {
        self.iter().map(|doc| doc.id.clone()).collect()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.iter().find(|doc| &doc.id == id)
    }

    fn bucket_mut(&mut self, key: Option<&str>) -> &mut Vec<Entity> {
        match key {
            Some(key) => self.grouped.entry(key.to_string()).or_default(),
            None => &mut self.general,
        }
    }

    /// Take a document out of whichever bucket holds it.
    fn take(&mut self, id: &EntityId) -> Option<(Option<String>, usize, Entity)> {
        if let Some(pos) = self.general.iter().position(|doc| &doc.id == id) {
            return Some((None, pos, self.general.remove(pos)));
        }
        for (key, bucket) in self.grouped.iter_mut() {
            if let Some(pos) = bucket.iter().position(|doc| &doc.id == id) {
                return Some((Some(key.clone()), pos, bucket.remove(pos)));
            }
        }
        None
    }
}

impl PersistedCollection for Library {
    const KEY: &'static str = REPORTS_KEY;
    type Stored = LibraryRecords;

    fn from_stored(stored: LibraryRecords) -> (Self, bool) {
        Library::rebuild(stored)
    }

    fn seed() -> Self {
        seed::reports()
    }
}

/// Result of pulling the facility list from the REST API.
#[derive(Clone, Debug, PartialEq)]
pub enum RefreshOutcome {
    /// Remote data replaced the local collection.
    Replaced(usize),
    /// The API had no facilities; local data was kept.
    KeptLocal,
    /// The API could not be read; local data was kept.
    Failed(String),
}

/// In-memory facility collection, written through to durable storage.
pub struct FacilityStore<K> {
    bridge: PersistenceBridge<K>,
    facilities: Vec<Entity>,
    last_error: Option<String>,
}

impl<K: KeyValueStore> FacilityStore<K> {
    /// Create the store and hydrate it from durable storage.
    pub fn open(bridge: PersistenceBridge<K>) -> Self {
        let mut store = FacilityStore {
            bridge,
            facilities: Vec::new(),
            last_error: None,
        };
        store.reload();
        store
    }

    /// Replace the in-memory collection with the durable one.
    ///
    /// If storage cannot be read the current collection stays, or the seed is
    /// used when there is none yet, and the failure is kept in `last_error`.
    pub fn reload(&mut self) {
        match self.bridge.load_all::<FacilitySet>() {
            Ok(set) => {
                log::info!("loaded {} facilities", set.0.len());
                self.facilities = set.0;
                self.last_error = None;
            }
            Err(e) => {
                log::error!("could not load facilities: {}", e);
                if self.facilities.is_empty() {
                    self.facilities = seed::facilities();
                }
                self.last_error = Some(e.to_string());
            }
        }
    }

    pub fn bridge(&self) -> &PersistenceBridge<K> {
        &self.bridge
    }

    /// Every facility, in stored order.
    pub fn list(&self) -> Vec<Entity> {
        self.facilities.clone()
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }

    pub fn get_by_id(&self, id: &EntityId) -> Option<&Entity> {
        self.facilities.iter().find(|e| &e.id == id)
    }

    /// Facilities that can be placed on the map.
    pub fn map_entries(&self) -> Vec<&Entity> {
        self.facilities
            .iter()
            .filter(|e| derive::valid_coordinates(e))
            .collect()
    }

    /// Display view of every facility, labels resolved in `language`.
    pub fn views(&self, resolver: &LocalizationResolver, language: &str) -> Vec<FacilityView> {
        self.facilities
            .iter()
            .map(|e| derive::present(e, resolver, language))
            .collect()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Append a facility and persist the collection.
    ///
    /// # Arguments
    ///
    /// * `record` - Raw fields. An `id` is kept if it is free, otherwise the
    ///   next sequential id is used.
    ///
    /// # Returns
    ///
    /// The stored entity, or a validation error for a taken id or
    /// contradictory status flags. Nothing changes when the write fails.
    pub fn add(&mut self, record: Attributes) -> DashboardResult<Entity> {
        derive::check_flags(&record)?;

        let taken: HashSet<EntityId> = self.facilities.iter().map(|e| e.id.clone()).collect();
        let id = match record.get("id").and_then(EntityId::from_value) {
            Some(id) if taken.contains(&id) => {
                return Err(DashboardError::Validation(format!(
                    "facility id {} is already in use",
                    id
                )));
            }
            Some(id) => id,
            None => IdStrategy::Sequential.next_id(&taken),
        };

        let entity = Entity::new(id, record);
        let mut next = self.facilities.clone();
        next.push(entity.clone());
        self.commit(next)?;

        log::info!("added facility {}", entity.id);
        Ok(entity)
    }

    /// Replace a facility's record entirely. The id never changes.
    ///
    /// # Arguments
    ///
    /// * `id` - Facility to replace.
    /// * `record` - New fields. Any `id` field in it is ignored.
    ///
    /// # Returns
    ///
    /// The updated entity, or `NotFound` when `id` is unknown.
    pub fn update(&mut self, id: &EntityId, record: Attributes) -> DashboardResult<Entity> {
        let pos = self
            .facilities
            .iter()
            .position(|e| &e.id == id)
            .ok_or_else(|| DashboardError::not_found(CollectionKind::Facilities, id))?;
        derive::check_flags(&record)?;

        let entity = Entity::new(id.clone(), record);
        let mut next = self.facilities.clone();
        next[pos] = entity.clone();
        self.commit(next)?;

        Ok(entity)
    }

    /// Delete a facility. Its documents keep their group key.
    pub fn remove(&mut self, id: &EntityId) -> DashboardResult<()> {
        if self.get_by_id(id).is_none() {
            return Err(DashboardError::not_found(CollectionKind::Facilities, id));
        }

        let next = self
            .facilities
            .iter()
            .filter(|e| &e.id != id)
            .cloned()
            .collect();
        self.commit(next)?;

        log::info!("removed facility {}", id);
        Ok(())
    }

    /// Pull the facility list from the REST API.
    ///
    /// An empty answer never overwrites local data. A non-empty one replaces
    /// the collection and is persisted.
    pub async fn refresh_from<A: ReadApi>(&mut self, api: &A) -> RefreshOutcome {
        let records = match api.facilities().await {
            Ok(records) => records,
            Err(e) => {
                log::warn!("facility refresh failed, keeping local data: {}", e);
                self.last_error = Some(e.to_string());
                return RefreshOutcome::Failed(e.to_string());
            }
        };

        let converted = remote::facilities_from_backend(&records);
        if converted.is_empty() {
            log::info!("backend has no facilities, keeping local data");
            return RefreshOutcome::KeptLocal;
        }

        let (next, _) = assign_ids(converted, IdStrategy::Sequential, &mut HashSet::new());
        let count = next.len();
        match self.commit(next) {
            Ok(()) => RefreshOutcome::Replaced(count),
            Err(e) => RefreshOutcome::Failed(e.to_string()),
        }
    }

    fn commit(&mut self, next: Vec<Entity>) -> DashboardResult<()> {
        let set = FacilitySet(next);
        match self.bridge.save_all(&set) {
            Ok(()) => {
                self.facilities = set.0;
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

/// How a bucket of documents is presented.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BucketKind {
    General,
    Facility(EntityId),
    /// Group key naming a facility that does not exist.
    UnknownGroup(String),
}

/// One bucket of [`DocumentLibrary::buckets`], borrowed from the library.
#[derive(Clone, Debug)]
pub struct DocumentBucket<'a> {
    pub kind: BucketKind,
    pub documents: &'a [Entity],
}

/// The document/report library.
///
/// Mutations build a new [`Library`], persist it, then swap it in; snapshots
/// handed out earlier never observe a half-applied change.
pub struct DocumentLibrary<K, S> {
    bridge: PersistenceBridge<K>,
    storage: Option<S>,
    library: Arc<Library>,
    last_error: Option<String>,
}

impl<K: KeyValueStore, S: ObjectStorage> DocumentLibrary<K, S> {
    /// Create the library and hydrate it from durable storage. Without
    /// `storage`, uploaded payloads get session-local references.
    pub fn open(bridge: PersistenceBridge<K>, storage: Option<S>) -> Self {
        let mut library = DocumentLibrary {
            bridge,
            storage,
            library: Arc::new(Library::default()),
            last_error: None,
        };
        library.reload();
        library
    }

    /// Replace the in-memory library with the durable one, keeping the
    /// current library when storage cannot be read.
    pub fn reload(&mut self) {
        match self.bridge.load_all::<Library>() {
            Ok(library) => {
                log::info!("loaded {} documents", library.len());
                self.library = Arc::new(library);
                self.last_error = None;
            }
            Err(e) => {
                log::error!("could not load documents: {}", e);
                if self.library.is_empty() {
                    self.library = Arc::new(seed::reports());
                }
                self.last_error = Some(e.to_string());
            }
        }
    }

    pub fn bridge(&self) -> &PersistenceBridge<K> {
        &self.bridge
    }

    /// The library as it is now. Later mutations do not show through.
    pub fn snapshot(&self) -> Arc<Library> {
        Arc::clone(&self.library)
    }

    pub fn list(&self) -> Vec<Entity> {
        self.library.iter().cloned().collect()
    }

    pub fn general(&self) -> &[Entity] {
        &self.library.general
    }

    /// Documents of one facility, empty for an unknown key.
    pub fn group(&self, key: &str) -> &[Entity] {
        self.library
            .grouped
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get_by_id(&self, id: &EntityId) -> Option<&Entity> {
        self.library.get(id)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Buckets in display order: general, then one per group key. Keys that
    /// match none of `facilities` are kept and marked as unknown.
    pub fn buckets(&self, facilities: &[Entity]) -> Vec<DocumentBucket<'_>> {
        let known: HashSet<&str> = facilities.iter().map(|f| f.id.as_str()).collect();

        let mut buckets = vec![DocumentBucket {
            kind: BucketKind::General,
            documents: &self.library.general,
        }];
        for (key, documents) in &self.library.grouped {
            let kind = if known.contains(key.as_str()) {
                BucketKind::Facility(EntityId::new(key.clone()))
            } else {
                BucketKind::UnknownGroup(key.clone())
            };
            buckets.push(DocumentBucket { kind, documents });
        }
        buckets
    }

    /// Add a document, uploading `blob` first when one is given.
    ///
    /// The document goes to the front of its bucket: the facility named by
    /// its group key, or the general bucket when it has none.
    pub async fn add(
        &mut self,
        mut record: Attributes,
        blob: Option<Blob>,
    ) -> DashboardResult<Entity> {
        // Only an upload made here may set a storage path.
        record.remove(STORAGE_PATH_FIELD);

        let taken = self.library.ids();
        let id = match record.get("id").and_then(EntityId::from_value) {
            Some(id) if taken.contains(&id) => {
                return Err(DashboardError::Validation(format!(
                    "document id {} is already in use",
                    id
                )));
            }
            Some(id) => id,
            None => IdStrategy::Timestamp.next_id(&taken),
        };

        let mut document = Entity::new(id, normalize_document(record, blob.as_ref()));

        if let Some(blob) = &blob {
            let title = document.text("title").unwrap_or(DEFAULT_TITLE).to_string();
            let reference = self
                .bridge
                .upload_blob(self.storage.as_ref(), blob, &title)
                .await;

            document.set("url", reference.url());
            document.set(
                STORAGE_PATH_FIELD,
                reference.storage_path().map_or(Value::Null, Value::from),
            );
            let thumbnail = if blob.is_image() {
                reference.url()
            } else if blob.is_pdf() {
                PDF_THUMBNAIL
            } else {
                DEFAULT_THUMBNAIL
            };
            document.set("thumbnail", thumbnail);
        }

        let group = document.group_key();
        let mut next = Library::clone(&self.library);
        next.bucket_mut(group.as_deref()).insert(0, document.clone());
        self.commit(next)?;

        log::info!(
            "added document {} to {}",
            document.id,
            group.as_deref().unwrap_or("general reports")
        );
        Ok(document)
    }

    /// Replace a document's record entirely. A changed group key moves it to
    /// the front of its new bucket.
    pub fn update(&mut self, id: &EntityId, record: Attributes) -> DashboardResult<Entity> {
        let mut next = Library::clone(&self.library);
        let (old_group, pos, _) = next
            .take(id)
            .ok_or_else(|| DashboardError::not_found(CollectionKind::Documents, id))?;

        let document = Entity::new(id.clone(), record);
        let group = document.group_key();
        let bucket = next.bucket_mut(group.as_deref());
        if group == old_group {
            bucket.insert(pos, document.clone());
        } else {
            bucket.insert(0, document.clone());
        }
        self.commit(next)?;

        Ok(document)
    }

    /// Delete a document, then its stored payload if it has one. Payload
    /// deletion failures are logged and otherwise ignored.
    pub async fn remove(&mut self, id: &EntityId) -> DashboardResult<()> {
        let mut next = Library::clone(&self.library);
        let (_, _, removed) = next
            .take(id)
            .ok_or_else(|| DashboardError::not_found(CollectionKind::Documents, id))?;
        self.commit(next)?;

        if let (Some(storage), Some(path)) = (&self.storage, removed.text(STORAGE_PATH_FIELD)) {
            if let Err(e) = storage.remove(path).await {
                log::warn!("stored file {} not deleted: {}", path, e);
            }
        }

        log::info!("removed document {}", id);
        Ok(())
    }

    /// Empty every bucket, keeping the facility buckets themselves.
    pub fn clear(&mut self) -> DashboardResult<()> {
        let grouped = self
            .library
            .grouped
            .keys()
            .map(|key| (key.clone(), Vec::new()))
            .collect();
        self.commit(Library {
            general: Vec::new(),
            grouped,
        })
    }

    fn commit(&mut self, next: Library) -> DashboardResult<()> {
        match self.bridge.save_all(&next) {
            Ok(()) => {
                self.library = Arc::new(next);
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

/// Fill in document defaults and infer the format.
fn normalize_document(mut record: Attributes, blob: Option<&Blob>) -> Attributes {
    let now = chrono::Utc::now().to_rfc3339();
    let text = |record: &Attributes, field: &str| {
        record
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };

    let is_pdf = |s: Option<String>| s.is_some_and(|s| s.to_lowercase().ends_with(".pdf"));
    let pdf = is_pdf(text(&record, "url"))
        || is_pdf(text(&record, STORAGE_PATH_FIELD))
        || blob.is_some_and(Blob::is_pdf);
    let format = if pdf {
        "pdf".to_string()
    } else {
        text(&record, "format").unwrap_or_else(|| "external_link".to_string())
    };

    let defaults = [
        ("title", DEFAULT_TITLE.to_string()),
        ("author", DEFAULT_AUTHOR.to_string()),
        ("type", "report".to_string()),
        ("description", String::new()),
        ("url", String::new()),
        ("date", now.clone()),
        ("createdAt", now.clone()),
    ];
    for (field, value) in defaults {
        if text(&record, field).is_none() {
            record.insert(field.to_string(), Value::from(value));
        }
    }
    record.insert("format".to_string(), Value::from(format));
    record.insert("updatedAt".to_string(), Value::from(now));
    record
        .entry(GROUP_KEY_FIELD.to_string())
        .or_insert(Value::Null);

    record
}
