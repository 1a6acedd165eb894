//! Persisted per-type metadata index with a read-through cache.
//!
//! Each plan has one index file per entity type, holding an [`IndexEntry`]
//! for every entity so listings never open entity files they do not return.
//! An absent file is an empty index; a corrupt one is a storage error and is
//! only repaired by an explicit [`IndexManager::save_index`] from entity files.

use crate::atomic::{atomic_write, read_bytes};
use crate::cache::{CacheStats, EntityCache};
use crate::config::CacheConfig;
use crate::error::{IndexOperation, Result, StoreError};
use crate::types::{EntityType, IndexEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Index file schema version for migration support.
pub const INDEX_SCHEMA_VERSION: u32 = 1;

/// Counters stored alongside the entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_entries: usize,
    #[serde(default)]
    pub last_rebuild: Option<DateTime<Utc>>,
}

/// `indexes/<type>-index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    pub version: u32,
    pub index_type: EntityType,
    pub last_updated: DateTime<Utc>,
    pub entries: Vec<IndexEntry>,
    pub stats: IndexStats,
}

impl IndexFile {
    /// Reads an index file, checking its schema version before its shape.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some(bytes) = read_bytes(path)? else {
            return Ok(None);
        };

        let raw: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::storage(path, format!("corrupted index: {e}")))?;
        if let Some(found) = raw.get("version").and_then(|v| v.as_u64()) {
            if found > u64::from(INDEX_SCHEMA_VERSION) {
                return Err(StoreError::Migration {
                    path: path.to_path_buf(),
                    from_version: u32::try_from(found).unwrap_or(u32::MAX),
                    to_version: INDEX_SCHEMA_VERSION,
                });
            }
        }

        serde_json::from_value(raw)
            .map(Some)
            .map_err(|e| StoreError::storage(path, format!("corrupted index: {e}")))
    }
}

#[derive(Debug, Clone, Default)]
struct IndexState {
    loaded: bool,
    entries: BTreeMap<String, IndexEntry>,
    last_rebuild: Option<DateTime<Utc>>,
}

/// In-memory index of one entity type in one plan, mirrored to disk.
///
/// Reads take only the state lock. Mutations hold the writer lock, apply the
/// change to a copy, persist it and only then swap it in, so files are
/// written in call order, two writes never interleave and a failed write
/// leaves memory as it was.
#[derive(Debug)]
pub struct IndexManager {
    path: PathBuf,
    entity_type: EntityType,
    state: Mutex<IndexState>,
    writer: Mutex<()>,
    cache: Mutex<EntityCache<IndexEntry>>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl IndexManager {
    /// Creates a manager for the index file at `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>, entity_type: EntityType, cache: CacheConfig) -> Self {
        Self {
            path: path.into(),
            entity_type,
            state: Mutex::new(IndexState::default()),
            writer: Mutex::new(()),
            cache: Mutex::new(EntityCache::new(cache)),
        }
    }

    /// Path of the index file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entity type this index covers.
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Loads the index file into memory. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// - `Storage` if the file exists but does not parse.
    /// - `Migration` if it was written by a newer schema.
    pub fn initialize(&self) -> Result<()> {
        let mut state = relock(&self.state);
        if state.loaded {
            return Ok(());
        }
        self.load_into(&mut state)
    }

    /// Discards memory and cache and reads the file again.
    pub fn reload(&self) -> Result<()> {
        let _writer = relock(&self.writer);
        let mut state = relock(&self.state);
        relock(&self.cache).clear();
        *state = IndexState::default();
        self.load_into(&mut state)
    }

    fn load_into(&self, state: &mut IndexState) -> Result<()> {
        match IndexFile::load(&self.path)? {
            Some(file) => {
                state.entries = file
                    .entries
                    .into_iter()
                    .map(|entry| (entry.id.clone(), entry))
                    .collect();
                state.last_rebuild = file.stats.last_rebuild;
                debug!(index = %self.path.display(), entries = state.entries.len(), "index loaded");
            }
            None => {
                state.entries.clear();
                debug!(index = %self.path.display(), "no index file, starting empty");
            }
        }
        state.loaded = true;
        Ok(())
    }

    fn loaded_state(&self) -> Result<MutexGuard<'_, IndexState>> {
        let mut state = relock(&self.state);
        if !state.loaded {
            self.load_into(&mut state)?;
        }
        Ok(state)
    }

    /// Applies `mutate` to a copy of the state under the writer lock and
    /// commits the copy once the file is persisted.
    fn mutate<T>(&self, mutate: impl FnOnce(&mut IndexState) -> Result<T>) -> Result<T> {
        let _writer = relock(&self.writer);
        let mut draft = self.loaded_state()?.clone();
        let out = mutate(&mut draft)?;
        let file = self.to_file(&draft);
        atomic_write(&self.path, &file)?;
        *relock(&self.state) = draft;
        debug!(index = %self.path.display(), entries = file.entries.len(), "index persisted");
        Ok(out)
    }

    fn to_file(&self, state: &IndexState) -> IndexFile {
        IndexFile {
            version: INDEX_SCHEMA_VERSION,
            index_type: self.entity_type,
            last_updated: Utc::now(),
            entries: state.entries.values().cloned().collect(),
            stats: IndexStats {
                total_entries: state.entries.len(),
                last_rebuild: state.last_rebuild,
            },
        }
    }

    fn index_error(&self, operation: IndexOperation, message: String) -> StoreError {
        StoreError::Index {
            operation,
            index_type: self.entity_type.to_string(),
            message,
        }
    }

    /// Adds a new entry.
    pub fn add(&self, entry: IndexEntry) -> Result<()> {
        let id = entry.id.clone();
        self.mutate(|state| {
            if state.entries.contains_key(&entry.id) {
                return Err(self.index_error(
                    IndexOperation::Create,
                    format!("entry '{}' already exists", entry.id),
                ));
            }
            state.entries.insert(entry.id.clone(), entry);
            Ok(())
        })?;
        relock(&self.cache).invalidate(&id);
        Ok(())
    }

    /// Replaces an existing entry.
    pub fn update(&self, entry: IndexEntry) -> Result<()> {
        let id = entry.id.clone();
        self.mutate(|state| match state.entries.get_mut(&entry.id) {
            Some(slot) => {
                *slot = entry;
                Ok(())
            }
            None => Err(self.index_error(
                IndexOperation::Update,
                format!("entry '{}' does not exist", entry.id),
            )),
        })?;
        relock(&self.cache).invalidate(&id);
        Ok(())
    }

    /// Removes an entry and returns it.
    pub fn delete(&self, id: &str) -> Result<IndexEntry> {
        let removed = self.mutate(|state| {
            state
                .entries
                .remove(id)
                .ok_or_else(|| self.index_error(IndexOperation::Delete, format!("entry '{id}' does not exist")))
        })?;
        relock(&self.cache).invalidate(id);
        Ok(removed)
    }

    /// Looks up one entry, through the cache.
    pub fn get(&self, id: &str) -> Result<Option<IndexEntry>> {
        let state = self.loaded_state()?;
        let current = state.entries.get(id);
        let mut cache = relock(&self.cache);

        if let Some(hit) = cache.get(id, current.map(|e| e.version)) {
            return Ok(Some(hit));
        }
        let Some(entry) = current.cloned() else {
            return Ok(None);
        };
        cache.insert(id, entry.clone(), entry.version);
        Ok(Some(entry))
    }

    /// All entries matching `predicate`, ordered by id.
    pub fn find<P>(&self, predicate: P) -> Result<Vec<IndexEntry>>
    where
        P: Fn(&IndexEntry) -> bool,
    {
        let state = self.loaded_state()?;
        Ok(state
            .entries
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect())
    }

    /// First entry (by id) matching `predicate`.
    pub fn find_one<P>(&self, predicate: P) -> Result<Option<IndexEntry>>
    where
        P: Fn(&IndexEntry) -> bool,
    {
        let state = self.loaded_state()?;
        Ok(state.entries.values().find(|e| predicate(e)).cloned())
    }

    pub fn has(&self, id: &str) -> Result<bool> {
        Ok(self.loaded_state()?.entries.contains_key(id))
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.loaded_state()?.entries.len())
    }

    /// Every entry, ordered by id.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        self.find(|_| true)
    }

    /// Replaces the whole index with `entries` and persists it.
    ///
    /// Does not read the existing file, so it also repairs a corrupt index.
    pub fn save_index(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let _writer = relock(&self.writer);
        let draft = IndexState {
            loaded: true,
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
            last_rebuild: Some(Utc::now()),
        };
        let file = self.to_file(&draft);
        atomic_write(&self.path, &file).map_err(|e| {
            self.index_error(IndexOperation::Rebuild, e.to_string())
        })?;
        *relock(&self.state) = draft;
        relock(&self.cache).clear();
        info!(index = %self.path.display(), entries = file.entries.len(), "index saved");
        Ok(())
    }

    /// Rewrites the file from the in-memory entries.
    pub fn rebuild(&self) -> Result<()> {
        self.mutate(|state| {
            state.last_rebuild = Some(Utc::now());
            Ok(())
        })
        .map_err(|e| match e {
            StoreError::Storage { message, .. } => {
                self.index_error(IndexOperation::Rebuild, message)
            }
            other => other,
        })
    }

    /// Removes every entry and persists the empty index.
    pub fn clear(&self) -> Result<()> {
        self.mutate(|state| {
            state.entries.clear();
            Ok(())
        })?;
        relock(&self.cache).clear();
        Ok(())
    }

    /// Cache hit/miss counters.
    pub fn cache_stats(&self) -> CacheStats {
        relock(&self.cache).stats()
    }
}
