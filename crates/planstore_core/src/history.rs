//! Version snapshots, retention and diffs.
//!
//! A snapshot holds an entity's state *before* an accepted update, so the
//! snapshot tagged N is exactly what the entity looked like at version N.
//! The live version is never in history; [`VersionHistoryService::diff`]
//! synthesizes it from the caller-supplied current state.

use crate::atomic::read_json;
use crate::batch::FileJournal;
use crate::error::{Result, StoreError};
use crate::layout::validate_id;
use crate::plans::PlanRepository;
use crate::repository::StorageScope;
use crate::types::{
    EntityType, FieldChange, HistoryQuery, VersionDiff, VersionHistory, VersionSnapshot,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Fields that change on every write and are left out of diffs.
const DIFF_IGNORED: &[&str] = &["updatedAt", "version", "createdAt"];

/// Snapshotting, retrieval and diffing of entity versions.
#[derive(Debug, Clone)]
pub struct VersionHistoryService {
    scope: StorageScope,
    plans: PlanRepository,
}

impl VersionHistoryService {
    pub(crate) fn new(scope: StorageScope, plans: PlanRepository) -> Self {
        Self { scope, plans }
    }

    pub(crate) fn with_journal(self, journal: Arc<FileJournal>) -> Self {
        Self {
            scope: self.scope.with_journal(Arc::clone(&journal)),
            plans: self.plans.with_journal(journal),
        }
    }

    fn load(&self, plan_id: &str, entity_id: &str, entity_type: EntityType) -> Result<Option<VersionHistory>> {
        validate_id("planId", plan_id)?;
        validate_id("entityId", entity_id)?;
        read_json(&self.scope.layout.history_path(plan_id, entity_type, entity_id))
    }

    /// Appends a snapshot of `data` at `version`.
    ///
    /// Does nothing and returns `false` when the plan has history disabled.
    /// Oldest snapshots beyond the plan's `maxHistoryDepth` are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn save_version(
        &self,
        plan_id: &str,
        entity_id: &str,
        entity_type: EntityType,
        data: &Value,
        version: u64,
        author: Option<&str>,
        change_note: Option<&str>,
    ) -> Result<bool> {
        let manifest = self.plans.get(plan_id)?;
        if !manifest.enable_history {
            return Ok(false);
        }

        let layout = &self.scope.layout;
        let _lock = self
            .scope
            .lock(&layout.history_key(plan_id, entity_type, entity_id))?;
        let mut history = self
            .load(plan_id, entity_id, entity_type)?
            .unwrap_or_else(|| VersionHistory::empty(entity_id, entity_type));

        history.versions.push(VersionSnapshot {
            version,
            data: data.clone(),
            timestamp: Utc::now(),
            author: author.map(str::to_string),
            change_note: change_note.map(str::to_string),
        });
        history.current_version = version;

        let depth = manifest.max_history_depth as usize;
        if depth > 0 && history.versions.len() > depth {
            let excess = history.versions.len() - depth;
            history.versions.drain(..excess);
            debug!(entity = entity_id, dropped = excess, "history rotated");
        }
        history.total = history.versions.len();

        self.scope.write_json(
            &layout.history_path(plan_id, entity_type, entity_id),
            &history,
        )?;
        Ok(true)
    }

    /// Snapshots newest first, paginated.
    ///
    /// Reads whatever was captured, even if history is now disabled. `total`
    /// counts every stored snapshot, not just the page.
    pub fn get_history(
        &self,
        plan_id: &str,
        entity_id: &str,
        entity_type: EntityType,
        query: HistoryQuery,
    ) -> Result<VersionHistory> {
        let Some(mut history) = self.load(plan_id, entity_id, entity_type)? else {
            return Ok(VersionHistory::empty(entity_id, entity_type));
        };

        history.total = history.versions.len();
        history.versions.reverse();
        let limit = query.limit.unwrap_or(usize::MAX);
        history.versions = history
            .versions
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .collect();
        Ok(history)
    }

    /// Field-level diff between two versions.
    ///
    /// `current` is the live `(data, version)` of the entity; a requested
    /// version equal to it is taken from there instead of history.
    ///
    /// # Errors
    ///
    /// `NotFound` if either version is neither in history nor current.
    pub fn diff(
        &self,
        plan_id: &str,
        entity_id: &str,
        entity_type: EntityType,
        version1: u64,
        version2: u64,
        current: Option<(&Value, u64)>,
    ) -> Result<VersionDiff> {
        let history = self
            .load(plan_id, entity_id, entity_type)?
            .unwrap_or_else(|| VersionHistory::empty(entity_id, entity_type));

        let from = locate(&history, current, version1)?;
        let to = locate(&history, current, version2)?;

        Ok(VersionDiff {
            entity_id: entity_id.to_string(),
            entity_type,
            version1,
            version2,
            changes: field_changes(from, to),
        })
    }

    /// Removes an entity's history file. A missing file is not an error.
    pub fn delete_history(&self, plan_id: &str, entity_id: &str, entity_type: EntityType) -> Result<bool> {
        validate_id("planId", plan_id)?;
        validate_id("entityId", entity_id)?;
        let layout = &self.scope.layout;
        let _plan = self.scope.plan_write(plan_id)?;
        let _lock = self
            .scope
            .lock(&layout.history_key(plan_id, entity_type, entity_id))?;
        self.scope
            .remove_file(&layout.history_path(plan_id, entity_type, entity_id))
    }
}

fn locate<'a>(
    history: &'a VersionHistory,
    current: Option<(&'a Value, u64)>,
    wanted: u64,
) -> Result<&'a Value> {
    if let Some(snapshot) = history.versions.iter().find(|s| s.version == wanted) {
        return Ok(&snapshot.data);
    }
    match current {
        Some((data, version)) if version == wanted => Ok(data),
        _ => Err(StoreError::not_found(
            "version",
            format!("{}@{wanted}", history.entity_id),
        )),
    }
}

fn field_changes(from: &Value, to: &Value) -> BTreeMap<String, FieldChange> {
    let empty = Map::new();
    let from = from.as_object().unwrap_or(&empty);
    let to = to.as_object().unwrap_or(&empty);

    let keys: BTreeSet<&String> = from.keys().chain(to.keys()).collect();
    keys.into_iter()
        .filter(|k| !DIFF_IGNORED.contains(&k.as_str()))
        .filter_map(|k| {
            let before = from.get(k).cloned().unwrap_or(Value::Null);
            let after = to.get(k).cloned().unwrap_or(Value::Null);
            (before != after).then(|| {
                (
                    k.clone(),
                    FieldChange {
                        from: before,
                        to: after,
                        changed: true,
                    },
                )
            })
        })
        .collect()
}
