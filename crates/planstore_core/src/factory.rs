//! Wiring of repositories to shared locks, indexes and the active project.

use crate::config::StoreConfig;
use crate::context::{ExecutionContext, ProjectId};
use crate::error::{ConflictKind, Result, StoreError};
use crate::history::VersionHistoryService;
use crate::index::IndexManager;
use crate::layout::{validate_id, ProjectLayout};
use crate::links::LinkRepository;
use crate::lock::LockManager;
use crate::plans::PlanRepository;
use crate::repository::{EntityRepository, StorageScope};
use crate::types::EntityType;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

type IndexKey = (Option<ProjectId>, String, EntityType);

#[derive(Debug, Default)]
struct Lifecycle {
    initialized: bool,
    closed: bool,
}

/// Builds repositories bound to the project active on the calling thread.
///
/// The project is the innermost [`ExecutionContext`] scope, else
/// `storage.default_project` from the configuration, else none (plans live
/// directly under the root). One [`LockManager`] is shared by everything the
/// factory hands out, and one [`IndexManager`] exists per project, plan and
/// entity type.
#[derive(Debug)]
pub struct RepositoryFactory {
    root: PathBuf,
    config: StoreConfig,
    locks: Arc<LockManager>,
    context: Arc<ExecutionContext>,
    indexes: Mutex<HashMap<IndexKey, Arc<IndexManager>>>,
    lifecycle: Mutex<Lifecycle>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RepositoryFactory {
    /// Creates a factory over `root`. Nothing is touched on disk yet.
    pub fn new(root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let default_project = config
            .storage
            .default_project
            .as_deref()
            .map(ProjectId::parse)
            .transpose()?;
        Ok(Self {
            root: root.into(),
            config,
            locks: Arc::new(LockManager::new()),
            context: Arc::new(ExecutionContext::new(default_project)),
            indexes: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Creates the storage root. Safe to call repeatedly.
    pub fn initialize(&self) -> Result<()> {
        let mut lifecycle = relock(&self.lifecycle);
        if lifecycle.closed {
            return Err(closed_error());
        }
        if lifecycle.initialized {
            return Ok(());
        }
        fs::create_dir_all(&self.root).map_err(|e| StoreError::storage(&self.root, e.to_string()))?;
        lifecycle.initialized = true;
        info!(root = %self.root.display(), "storage initialized");
        Ok(())
    }

    /// Releases locks and cached indexes. Safe to call repeatedly.
    ///
    /// Later calls that need a repository fail.
    pub fn close(&self) {
        let mut lifecycle = relock(&self.lifecycle);
        if lifecycle.closed {
            return;
        }
        self.locks.dispose();
        relock(&self.indexes).clear();
        lifecycle.closed = true;
        info!(root = %self.root.display(), "storage closed");
    }

    pub fn is_closed(&self) -> bool {
        relock(&self.lifecycle).closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn lock_timeout(&self) -> Duration {
        self.config.locks.timeout()
    }

    /// Project the calling thread is routed to.
    pub fn current_project(&self) -> Option<ProjectId> {
        self.context.current_project_id()
    }

    /// Layout of the current project.
    pub fn layout(&self) -> Result<ProjectLayout> {
        self.ensure_open()?;
        Ok(ProjectLayout::new(&self.root, self.current_project()))
    }

    fn scope(&self) -> Result<StorageScope> {
        Ok(StorageScope::new(
            self.layout()?,
            Arc::clone(&self.locks),
            self.lock_timeout(),
        ))
    }

    pub fn plans(&self) -> Result<PlanRepository> {
        Ok(PlanRepository::new(self.scope()?, self.config.history.clone()))
    }

    pub fn history(&self) -> Result<VersionHistoryService> {
        Ok(VersionHistoryService::new(self.scope()?, self.plans()?))
    }

    pub fn links(&self, plan_id: &str) -> Result<LinkRepository> {
        validate_id("planId", plan_id)?;
        Ok(LinkRepository::new(plan_id, self.scope()?, self.plans()?))
    }

    /// Index manager for a plan's entity type, loaded from disk.
    ///
    /// # Errors
    ///
    /// `Storage` or `Migration` if the index file cannot be used.
    pub fn index(&self, plan_id: &str, entity_type: EntityType) -> Result<Arc<IndexManager>> {
        let index = self.index_unloaded(plan_id, entity_type)?;
        index.initialize()?;
        Ok(index)
    }

    /// Index manager without reading its file, for repair.
    pub(crate) fn index_unloaded(&self, plan_id: &str, entity_type: EntityType) -> Result<Arc<IndexManager>> {
        validate_id("planId", plan_id)?;
        let layout = self.layout()?;
        let key = (layout.project().cloned(), plan_id.to_string(), entity_type);

        let mut indexes = relock(&self.indexes);
        let index = indexes.entry(key).or_insert_with(|| {
            debug!(plan = plan_id, entity_type = %entity_type, "index manager created");
            Arc::new(IndexManager::new(
                layout.index_path(plan_id, entity_type),
                entity_type,
                self.config.cache.clone(),
            ))
        });
        Ok(Arc::clone(index))
    }

    /// Repository for one entity type of one plan.
    pub fn entities(&self, plan_id: &str, entity_type: EntityType) -> Result<EntityRepository> {
        let index = self.index(plan_id, entity_type)?;
        Ok(EntityRepository::new(
            plan_id,
            entity_type,
            self.scope()?,
            index,
            self.plans()?,
            self.links(plan_id)?,
            self.history()?,
        ))
    }

    /// Drops cached index managers of a plan in the current project.
    pub fn evict_plan(&self, plan_id: &str) {
        let project = self.current_project();
        relock(&self.indexes).retain(|(p, plan, _), _| !(p == &project && plan == plan_id));
    }
}

fn closed_error() -> StoreError {
    StoreError::conflict(ConflictKind::State, "repository factory has been closed")
}
