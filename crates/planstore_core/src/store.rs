//! Store handle providing the main planstore API.

use crate::batch::{BatchExecutor, BatchOperation, BatchResult};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::factory::RepositoryFactory;
use crate::types::{
    Entity, EntityPatch, EntityType, HistoryQuery, Link, ListQuery, NewEntity, NewLink, NewPlan,
    Page, PlanManifest, PlanPatch, VersionDiff, VersionHistory,
};
use crate::verify::{self, RebuildReport, VerifyReport};
use std::path::{Path, PathBuf};

/// Planstore handle.
///
/// Every call is routed to the project active on the calling thread; see
/// [`PlanStore::run_with_context`].
#[derive(Debug)]
pub struct PlanStore {
    factory: RepositoryFactory,
}

impl PlanStore {
    /// Opens the store at `root`, reading `planstore.toml` if present.
    ///
    /// The root directory is created if needed.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use planstore_core::PlanStore;
    ///
    /// let store = PlanStore::open("./data").unwrap();
    /// ```
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let config = StoreConfig::load(root)?;
        Self::with_config(root, config)
    }

    /// Opens the store at `root` with an explicit configuration.
    pub fn with_config(root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        let factory = RepositoryFactory::new(root, config)?;
        factory.initialize()?;
        Ok(Self { factory })
    }

    pub fn root(&self) -> &Path {
        self.factory.root()
    }

    pub fn config(&self) -> &StoreConfig {
        self.factory.config()
    }

    /// The factory behind this store, for direct repository access.
    pub fn factory(&self) -> &RepositoryFactory {
        &self.factory
    }

    /// Releases locks and cached indexes. Later calls fail.
    pub fn close(&self) {
        self.factory.close();
    }

    /// Runs `f` with every store call on this thread routed to `project_id`.
    ///
    /// Scopes nest; the previous project is restored when `f` returns.
    pub fn run_with_context<T, F>(&self, project_id: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.factory.context().run_with_context(project_id, f)
    }

    // Plans

    pub fn create_plan(&self, input: NewPlan) -> Result<PlanManifest> {
        self.factory.plans()?.create(input)
    }

    pub fn get_plan(&self, plan_id: &str) -> Result<PlanManifest> {
        self.factory.plans()?.get(plan_id)
    }

    pub fn update_plan(&self, plan_id: &str, patch: PlanPatch) -> Result<PlanManifest> {
        self.factory.plans()?.update(plan_id, patch)
    }

    /// Deletes a plan with everything in it.
    pub fn delete_plan(&self, plan_id: &str) -> Result<PlanManifest> {
        let removed = self.factory.plans()?.delete(plan_id)?;
        self.factory.evict_plan(plan_id);
        Ok(removed)
    }

    pub fn list_plans(&self) -> Result<Vec<PlanManifest>> {
        self.factory.plans()?.list()
    }

    // Entities

    pub fn create_entity(&self, plan_id: &str, entity_type: EntityType, input: NewEntity) -> Result<Entity> {
        self.factory.entities(plan_id, entity_type)?.create(input)
    }

    pub fn get_entity(&self, plan_id: &str, entity_type: EntityType, id: &str) -> Result<Entity> {
        self.factory.entities(plan_id, entity_type)?.get(id)
    }

    /// Applies `patch`, failing with a version conflict if the entity is no
    /// longer at `expected_version`.
    pub fn update_entity(
        &self,
        plan_id: &str,
        entity_type: EntityType,
        id: &str,
        patch: EntityPatch,
        expected_version: Option<u64>,
    ) -> Result<Entity> {
        self.factory
            .entities(plan_id, entity_type)?
            .update(id, patch, expected_version)
    }

    /// Deletes an entity, its history and links touching it.
    pub fn delete_entity(&self, plan_id: &str, entity_type: EntityType, id: &str) -> Result<Entity> {
        self.factory.entities(plan_id, entity_type)?.delete(id, true)
    }

    pub fn list_entities(&self, plan_id: &str, entity_type: EntityType, query: &ListQuery) -> Result<Page<Entity>> {
        self.factory.entities(plan_id, entity_type)?.list(query)
    }

    pub fn find_entities<P>(&self, plan_id: &str, entity_type: EntityType, predicate: P) -> Result<Vec<Entity>>
    where
        P: Fn(&Entity) -> bool,
    {
        self.factory.entities(plan_id, entity_type)?.find(predicate)
    }

    // Links

    pub fn create_link(&self, plan_id: &str, input: NewLink) -> Result<Link> {
        self.factory.links(plan_id)?.create(input)
    }

    pub fn delete_link(&self, plan_id: &str, link_id: &str) -> Result<Link> {
        self.factory.links(plan_id)?.delete(link_id)
    }

    pub fn list_links(&self, plan_id: &str) -> Result<Vec<Link>> {
        self.factory.links(plan_id)?.list()
    }

    // History

    pub fn get_history(
        &self,
        plan_id: &str,
        entity_type: EntityType,
        id: &str,
        query: HistoryQuery,
    ) -> Result<VersionHistory> {
        self.factory
            .history()?
            .get_history(plan_id, id, entity_type, query)
    }

    /// Field-level diff between two versions of an entity.
    ///
    /// Either version may be the live one.
    pub fn diff(
        &self,
        plan_id: &str,
        entity_type: EntityType,
        id: &str,
        version1: u64,
        version2: u64,
    ) -> Result<VersionDiff> {
        let live = self.factory.entities(plan_id, entity_type)?.find_by_id(id)?;
        let current = live
            .as_ref()
            .map(|e| e.to_value().map(|v| (v, e.version)))
            .transpose()?;
        self.factory.history()?.diff(
            plan_id,
            id,
            entity_type,
            version1,
            version2,
            current.as_ref().map(|(v, n)| (v, *n)),
        )
    }

    pub fn delete_history(&self, plan_id: &str, entity_type: EntityType, id: &str) -> Result<bool> {
        self.factory.history()?.delete_history(plan_id, id, entity_type)
    }

    // Batches and maintenance

    /// Applies `operations` to a plan all-or-nothing.
    pub fn execute_batch(&self, plan_id: &str, operations: Vec<BatchOperation>) -> Result<BatchResult> {
        BatchExecutor::new(&self.factory).execute(plan_id, operations)
    }

    /// Regenerates a plan's indexes from its entity files.
    pub fn rebuild_indexes(&self, plan_id: &str) -> Result<RebuildReport> {
        verify::rebuild_indexes(&self.factory, plan_id)
    }

    /// Checks one plan, or every plan of the current project.
    pub fn verify(&self, plan_id: Option<&str>) -> Result<VerifyReport> {
        verify::verify(&self.factory.layout()?, plan_id)
    }
}
