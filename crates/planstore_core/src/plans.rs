//! Plan manifests.

use crate::atomic::read_json;
use crate::batch::FileJournal;
use crate::config::HistoryConfig;
use crate::error::{ConflictKind, Result, StoreError};
use crate::layout::validate_id;
use crate::repository::StorageScope;
use crate::types::{NewPlan, PlanManifest, PlanPatch, PlanStatistics, PlanStatus};
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::info;

/// CRUD over the plans of one project.
#[derive(Debug, Clone)]
pub struct PlanRepository {
    scope: StorageScope,
    history_defaults: HistoryConfig,
}

impl PlanRepository {
    pub(crate) fn new(scope: StorageScope, history_defaults: HistoryConfig) -> Self {
        Self {
            scope,
            history_defaults,
        }
    }

    pub(crate) fn with_journal(mut self, journal: Arc<FileJournal>) -> Self {
        self.scope = self.scope.with_journal(journal);
        self
    }

    /// Creates a plan.
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty name or unsafe id.
    /// - `Conflict{Duplicate}` if the id is taken.
    pub fn create(&self, input: NewPlan) -> Result<PlanManifest> {
        if input.name.trim().is_empty() {
            return Err(StoreError::validation("name", "must not be empty"));
        }
        let id = match input.id {
            Some(id) => {
                validate_id("id", &id)?;
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let layout = &self.scope.layout;
        let _lock = self.scope.lock(&layout.manifest_key(&id))?;
        let path = layout.manifest_path(&id);
        if path.exists() {
            return Err(StoreError::conflict(
                ConflictKind::Duplicate,
                format!("plan '{id}' already exists"),
            ));
        }

        let now = Utc::now();
        let manifest = PlanManifest {
            id,
            name: input.name,
            description: input.description.unwrap_or_default(),
            status: PlanStatus::Active,
            statistics: PlanStatistics::default(),
            enable_history: input
                .enable_history
                .unwrap_or(self.history_defaults.enabled_by_default),
            max_history_depth: input
                .max_history_depth
                .unwrap_or(self.history_defaults.max_depth_default),
            version: 1,
            lock_version: 1,
            created_at: now,
            updated_at: now,
        };
        self.scope.write_json(&path, &manifest)?;
        info!(plan = %manifest.id, "plan created");
        Ok(manifest)
    }

    /// Loads a manifest.
    pub fn get(&self, plan_id: &str) -> Result<PlanManifest> {
        validate_id("planId", plan_id)?;
        read_json(&self.scope.layout.manifest_path(plan_id))?
            .ok_or_else(|| StoreError::not_found("plan", plan_id))
    }

    /// Returns true if the plan has a manifest.
    pub fn exists(&self, plan_id: &str) -> bool {
        validate_id("planId", plan_id).is_ok() && self.scope.layout.manifest_path(plan_id).exists()
    }

    /// Applies `patch`, bumping `version` and `lockVersion`.
    ///
    /// # Errors
    ///
    /// `Conflict{VersionMismatch}` when `expected_lock_version` is stale.
    pub fn update(&self, plan_id: &str, patch: PlanPatch) -> Result<PlanManifest> {
        validate_id("planId", plan_id)?;
        let _plan = self.scope.plan_write(plan_id)?;
        let _lock = self.scope.lock(&self.scope.layout.manifest_key(plan_id))?;
        let mut manifest = self.get(plan_id)?;

        if let Some(expected) = patch.expected_lock_version {
            if expected != manifest.lock_version {
                return Err(StoreError::version_mismatch(
                    &format!("plan '{plan_id}'"),
                    expected,
                    manifest.lock_version,
                ));
            }
        }
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(StoreError::validation("name", "must not be empty"));
            }
            manifest.name = name;
        }
        if let Some(description) = patch.description {
            manifest.description = description;
        }
        if let Some(status) = patch.status {
            manifest.status = status;
        }
        if let Some(enabled) = patch.enable_history {
            manifest.enable_history = enabled;
        }
        if let Some(depth) = patch.max_history_depth {
            manifest.max_history_depth = depth;
        }
        manifest.version += 1;
        manifest.lock_version += 1;
        manifest.updated_at = Utc::now();

        self.scope
            .write_json(&self.scope.layout.manifest_path(plan_id), &manifest)?;
        Ok(manifest)
    }

    /// Removes the plan directory and everything in it.
    ///
    /// Waits for in-flight writes and batches on the plan to finish.
    pub fn delete(&self, plan_id: &str) -> Result<PlanManifest> {
        validate_id("planId", plan_id)?;
        let _plan = self.scope.plan_exclusive(plan_id)?;
        let _lock = self.scope.lock(&self.scope.layout.manifest_key(plan_id))?;
        let manifest = self.get(plan_id)?;
        let dir = self.scope.layout.plan_dir(plan_id);
        fs::remove_dir_all(&dir).map_err(|e| StoreError::storage(&dir, e.to_string()))?;
        info!(plan = plan_id, "plan deleted");
        Ok(manifest)
    }

    /// All plans, oldest first.
    pub fn list(&self) -> Result<Vec<PlanManifest>> {
        let dir = self.scope.layout.plans_dir();
        let read_dir = match fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::storage(&dir, e.to_string())),
        };

        let mut plans = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|e| StoreError::storage(&dir, e.to_string()))?;
            if !dir_entry.path().is_dir() {
                continue;
            }
            let manifest_path = dir_entry.path().join("manifest.json");
            if let Some(manifest) = read_json::<PlanManifest>(&manifest_path)? {
                plans.push(manifest);
            }
        }
        plans.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(plans)
    }

    /// Mutates the statistics under the manifest lock.
    ///
    /// Only `updatedAt` moves; `version` and `lockVersion` are left alone.
    pub(crate) fn adjust_statistics<F>(&self, plan_id: &str, adjust: F) -> Result<PlanStatistics>
    where
        F: FnOnce(&mut PlanStatistics),
    {
        let _lock = self.scope.lock(&self.scope.layout.manifest_key(plan_id))?;
        let mut manifest = self.get(plan_id)?;
        adjust(&mut manifest.statistics);
        manifest.updated_at = Utc::now();
        self.scope
            .write_json(&self.scope.layout.manifest_path(plan_id), &manifest)?;
        Ok(manifest.statistics)
    }
}
