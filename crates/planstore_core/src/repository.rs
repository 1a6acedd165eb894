//! Entity CRUD for one plan and one entity type.
//!
//! Every write follows the same sequence: take the entity's lock key, read
//! the current file, check the caller's expected version, snapshot the prior
//! state into history, write the new file atomically, then update the index.
//! Plan statistics are adjusted after the entity lock is released.

use crate::atomic::{atomic_write, read_json, remove_if_exists};
use crate::batch::FileJournal;
use crate::error::{ConflictKind, QueryErrorKind, Result, StoreError};
use crate::history::VersionHistoryService;
use crate::index::IndexManager;
use crate::layout::{validate_id, ProjectLayout};
use crate::links::LinkRepository;
use crate::lock::{LockHandle, LockManager, LockMode};
use crate::plans::PlanRepository;
use crate::types::{
    compare_values, Entity, EntityMetadata, EntityPatch, EntityType, IndexEntry, ListQuery,
    NewEntity, Page, SortOrder, RESERVED_FIELDS,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default page size for [`EntityRepository::list`].
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Largest accepted page size.
pub const MAX_PAGE_SIZE: usize = 1000;

/// What every repository needs to touch disk: where, under which locks, and
/// optionally which batch journal to record prior file contents in.
#[derive(Debug, Clone)]
pub(crate) struct StorageScope {
    pub(crate) layout: ProjectLayout,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) lock_timeout: Duration,
    pub(crate) journal: Option<Arc<FileJournal>>,
}

impl StorageScope {
    pub(crate) fn new(layout: ProjectLayout, locks: Arc<LockManager>, lock_timeout: Duration) -> Self {
        Self {
            layout,
            locks,
            lock_timeout,
            journal: None,
        }
    }

    pub(crate) fn with_journal(mut self, journal: Arc<FileJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub(crate) fn lock(&self, key: &str) -> Result<LockHandle<'_>> {
        self.locks.acquire(key, self.lock_timeout)
    }

    /// Shared hold on the plan's write key. `None` when this thread already
    /// holds it, as a batch does while it runs repository calls.
    pub(crate) fn plan_write(&self, plan_id: &str) -> Result<Option<LockHandle<'_>>> {
        self.plan_lock(plan_id, LockMode::Shared)
    }

    /// Exclusive hold on the plan's write key, see [`StorageScope::plan_write`].
    pub(crate) fn plan_exclusive(&self, plan_id: &str) -> Result<Option<LockHandle<'_>>> {
        self.plan_lock(plan_id, LockMode::Exclusive)
    }

    fn plan_lock(&self, plan_id: &str, mode: LockMode) -> Result<Option<LockHandle<'_>>> {
        let key = self.layout.plan_key(plan_id);
        if self.locks.held_by_current_thread(&key) {
            return Ok(None);
        }
        let handle = match mode {
            LockMode::Shared => self.locks.acquire_shared(&key, self.lock_timeout)?,
            LockMode::Exclusive => self.locks.acquire(&key, self.lock_timeout)?,
        };
        Ok(Some(handle))
    }

    /// Records `path`'s current content in the batch journal, if any.
    pub(crate) fn record(&self, path: &Path) -> Result<()> {
        match &self.journal {
            Some(journal) => journal.record(path),
            None => Ok(()),
        }
    }

    pub(crate) fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        self.record(path)?;
        atomic_write(path, value)
    }

    pub(crate) fn remove_file(&self, path: &Path) -> Result<bool> {
        self.record(path)?;
        remove_if_exists(path)
    }
}

/// CRUD over one entity type within one plan.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    plan_id: String,
    entity_type: EntityType,
    scope: StorageScope,
    index: Arc<IndexManager>,
    plans: PlanRepository,
    links: LinkRepository,
    history: VersionHistoryService,
}

impl EntityRepository {
    pub(crate) fn new(
        plan_id: &str,
        entity_type: EntityType,
        scope: StorageScope,
        index: Arc<IndexManager>,
        plans: PlanRepository,
        links: LinkRepository,
        history: VersionHistoryService,
    ) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            entity_type,
            scope,
            index,
            plans,
            links,
            history,
        }
    }

    /// Routes every file this repository writes through `journal`.
    pub(crate) fn with_journal(self, journal: Arc<FileJournal>) -> Self {
        Self {
            scope: self.scope.with_journal(Arc::clone(&journal)),
            plans: self.plans.with_journal(Arc::clone(&journal)),
            links: self.links.with_journal(Arc::clone(&journal)),
            history: self.history.with_journal(journal),
            ..self
        }
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// The index backing this repository.
    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    fn entity_path(&self, id: &str) -> std::path::PathBuf {
        self.scope.layout.entity_path(&self.plan_id, self.entity_type, id)
    }

    fn entity_key(&self, id: &str) -> String {
        self.scope.layout.entity_key(&self.plan_id, self.entity_type, id)
    }

    fn read(&self, id: &str) -> Result<Option<Entity>> {
        read_json(&self.entity_path(id))
    }

    /// Creates an entity at version 1.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the plan does not exist.
    /// - `Validation` for an empty title, unsafe id or engine-owned field.
    /// - `Conflict{Duplicate}` if the id is taken.
    pub fn create(&self, input: NewEntity) -> Result<Entity> {
        if !self.plans.exists(&self.plan_id) {
            return Err(StoreError::not_found("plan", &self.plan_id));
        }
        if input.title.trim().is_empty() {
            return Err(StoreError::validation("title", "must not be empty"));
        }
        check_reserved(&input.fields)?;
        let id = match input.id {
            Some(id) => {
                validate_id("id", &id)?;
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let _plan = self.scope.plan_write(&self.plan_id)?;
        let entity = {
            let _lock = self.scope.lock(&self.entity_key(&id))?;
            let path = self.entity_path(&id);
            if path.exists() || self.index.has(&id)? {
                return Err(StoreError::conflict(
                    ConflictKind::Duplicate,
                    format!("{} '{id}' already exists", self.entity_type),
                ));
            }

            let mut fields = input.fields;
            fields
                .entry("status")
                .or_insert_with(|| Value::from(self.entity_type.default_status()));
            let now = Utc::now();
            let entity = Entity {
                id,
                entity_type: self.entity_type,
                title: input.title,
                description: input.description.unwrap_or_default(),
                version: 1,
                metadata: EntityMetadata {
                    created_by: input.created_by,
                    tags: input.tags,
                    annotations: Vec::new(),
                },
                created_at: now,
                updated_at: now,
                fields,
            };

            self.scope.write_json(&path, &entity)?;
            self.scope.record(self.index.path())?;
            if let Err(e) = self.index.add(IndexEntry::from_entity(&entity)) {
                // keep file and index in step
                if let Err(cleanup) = remove_if_exists(&path) {
                    warn!(path = %path.display(), error = %cleanup, "failed to remove unindexed entity");
                }
                return Err(e);
            }
            entity
        };

        let entity_type = self.entity_type;
        self.plans
            .adjust_statistics(&self.plan_id, |s| *s.count_mut(entity_type) += 1)?;
        debug!(plan = %self.plan_id, entity_type = %entity_type, id = %entity.id, "entity created");
        Ok(entity)
    }

    /// Applies `patch` and bumps the version by one.
    ///
    /// With `expected_version`, the update is rejected unless the stored
    /// version still equals it; without, it applies to whatever is current.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the entity does not exist.
    /// - `Conflict{VersionMismatch}` on a stale `expected_version`; nothing is written.
    ///
    /// When a later step fails, the entity and history files are put back.
    pub fn update(&self, id: &str, patch: EntityPatch, expected_version: Option<u64>) -> Result<Entity> {
        validate_id("id", id)?;
        check_reserved(&patch.fields)?;

        let _plan = self.scope.plan_write(&self.plan_id)?;
        let _lock = self.scope.lock(&self.entity_key(id))?;
        let current = self
            .read(id)?
            .ok_or_else(|| StoreError::not_found(self.entity_type.as_str(), id))?;

        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(StoreError::version_mismatch(
                    &format!("{} '{id}'", self.entity_type),
                    expected,
                    current.version,
                ));
            }
        }

        let updated = apply_patch(current.clone(), &patch)?;
        let undo = self.entity_files_journal(id)?;
        if let Err(e) = self.write_update(&current, &updated, &patch) {
            self.undo(&undo, id);
            return Err(e);
        }
        debug!(plan = %self.plan_id, entity_type = %self.entity_type, id, version = updated.version, "entity updated");
        Ok(updated)
    }

    /// Deletes an entity, its index entry and every link touching it.
    ///
    /// With `purge_history`, the entity's history file goes too.
    pub fn delete(&self, id: &str, purge_history: bool) -> Result<Entity> {
        validate_id("id", id)?;
        let _plan = self.scope.plan_write(&self.plan_id)?;
        let entity = {
            let _lock = self.scope.lock(&self.entity_key(id))?;
            let entity = self
                .read(id)?
                .ok_or_else(|| StoreError::not_found(self.entity_type.as_str(), id))?;

            let undo = self.entity_files_journal(id)?;
            if let Err(e) = self.remove_files(id, purge_history) {
                self.undo(&undo, id);
                return Err(e);
            }
            entity
        };

        let removed_links = self.links.remove_for_entity(id)?;
        let entity_type = self.entity_type;
        self.plans.adjust_statistics(&self.plan_id, |s| {
            let count = s.count_mut(entity_type);
            *count = count.saturating_sub(1);
            s.links = s.links.saturating_sub(removed_links as u64);
        })?;
        debug!(plan = %self.plan_id, entity_type = %entity_type, id, removed_links, "entity deleted");
        Ok(entity)
    }

    /// Records the entity and history files of `id` so a half-applied
    /// write can be put back. The index is left out: it only changes as the
    /// last step, and a failed index write leaves it untouched.
    fn entity_files_journal(&self, id: &str) -> Result<FileJournal> {
        let journal = FileJournal::new();
        journal.record(&self.entity_path(id))?;
        journal.record(
            &self
                .scope
                .layout
                .history_path(&self.plan_id, self.entity_type, id),
        )?;
        Ok(journal)
    }

    fn undo(&self, journal: &FileJournal, id: &str) {
        match journal.restore() {
            Ok(_) => debug!(plan = %self.plan_id, id, "partial write undone"),
            Err(e) => warn!(plan = %self.plan_id, id, error = %e, "failed to undo partial write"),
        }
    }

    fn write_update(&self, current: &Entity, updated: &Entity, patch: &EntityPatch) -> Result<()> {
        let id = current.id.as_str();
        self.history.save_version(
            &self.plan_id,
            id,
            self.entity_type,
            &current.to_value()?,
            current.version,
            patch.author.as_deref(),
            patch.change_note.as_deref(),
        )?;

        self.scope.write_json(&self.entity_path(id), updated)?;
        self.scope.record(self.index.path())?;
        let entry = IndexEntry::from_entity(updated);
        if self.index.has(id)? {
            self.index.update(entry)
        } else {
            warn!(plan = %self.plan_id, id, "entity missing from index, re-adding");
            self.index.add(entry)
        }
    }

    fn remove_files(&self, id: &str, purge_history: bool) -> Result<()> {
        self.scope.remove_file(&self.entity_path(id))?;
        if purge_history {
            self.history
                .delete_history(&self.plan_id, id, self.entity_type)?;
        }
        if self.index.has(id)? {
            self.scope.record(self.index.path())?;
            self.index.delete(id)?;
        }
        Ok(())
    }

    /// Loads an entity, `None` if absent.
    pub fn find_by_id(&self, id: &str) -> Result<Option<Entity>> {
        validate_id("id", id)?;
        self.read(id)
    }

    /// Loads an entity.
    pub fn get(&self, id: &str) -> Result<Entity> {
        self.find_by_id(id)?
            .ok_or_else(|| StoreError::not_found(self.entity_type.as_str(), id))
    }

    fn load_indexed(&self, entry: &IndexEntry) -> Result<Entity> {
        let path = self.entity_path(&entry.id);
        self.read(&entry.id)?.ok_or_else(|| {
            StoreError::storage(path, "indexed entity file is missing; rebuild the index")
        })
    }

    /// Every entity matching `predicate`, ordered by id.
    pub fn find<P>(&self, predicate: P) -> Result<Vec<Entity>>
    where
        P: Fn(&Entity) -> bool,
    {
        let mut found = Vec::new();
        for entry in self.index.entries()? {
            let entity = self.load_indexed(&entry)?;
            if predicate(&entity) {
                found.push(entity);
            }
        }
        Ok(found)
    }

    /// Filtered, sorted page of entities, selected from the index.
    ///
    /// # Errors
    ///
    /// - `Query{Pagination}` if `limit` is outside 1..=1000.
    /// - `Query{Filter}` for a filter on a field that is not indexed.
    /// - `Query{Sort}` for an unknown sort field.
    pub fn list(&self, query: &ListQuery) -> Result<Page<Entity>> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(StoreError::Query {
                kind: QueryErrorKind::Pagination,
                message: format!("limit must be between 1 and {MAX_PAGE_SIZE}, got {limit}"),
            });
        }

        let indexed = self.entity_type.indexed_fields();
        if let Some(field) = query.filters.keys().find(|f| !indexed.contains(&f.as_str())) {
            return Err(StoreError::Query {
                kind: QueryErrorKind::Filter,
                message: format!("'{field}' is not an indexed field of {}", self.entity_type),
            });
        }
        let sort_field = query.sort_by.as_deref().unwrap_or("createdAt");
        if !indexed.contains(&sort_field) && sort_field != "createdAt" && sort_field != "updatedAt" {
            return Err(StoreError::Query {
                kind: QueryErrorKind::Sort,
                message: format!("cannot sort {} by '{sort_field}'", self.entity_type),
            });
        }

        let mut matches = self.index.find(|entry| {
            query
                .filters
                .iter()
                .all(|(field, wanted)| entry.fields.get(field) == Some(wanted))
        })?;
        matches.sort_by(|a, b| {
            compare_values(
                a.sort_value(sort_field).as_ref(),
                b.sort_value(sort_field).as_ref(),
                query.sort_order,
            )
            .then_with(|| match query.sort_order {
                SortOrder::Asc => a.id.cmp(&b.id),
                SortOrder::Desc => b.id.cmp(&a.id),
            })
        });

        let total = matches.len();
        let items = matches
            .iter()
            .skip(query.offset)
            .take(limit)
            .map(|entry| self.load_indexed(entry))
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            has_more: query.offset.saturating_add(items.len()) < total,
            items,
            total,
            offset: query.offset,
            limit,
        })
    }
}

fn check_reserved(fields: &Map<String, Value>) -> Result<()> {
    match fields.keys().find(|k| RESERVED_FIELDS.contains(&k.as_str())) {
        Some(key) => Err(StoreError::validation(key.as_str(), "is managed by the store")),
        None => Ok(()),
    }
}

fn apply_patch(mut entity: Entity, patch: &EntityPatch) -> Result<Entity> {
    if let Some(title) = &patch.title {
        if title.trim().is_empty() {
            return Err(StoreError::validation("title", "must not be empty"));
        }
        entity.title = title.clone();
    }
    if let Some(description) = &patch.description {
        entity.description = description.clone();
    }
    if let Some(tags) = &patch.tags {
        entity.metadata.tags = tags.clone();
    }
    for (key, value) in &patch.fields {
        if value.is_null() {
            entity.fields.remove(key);
        } else {
            entity.fields.insert(key.clone(), value.clone());
        }
    }
    entity.version += 1;
    entity.updated_at = Utc::now();
    Ok(entity)
}
