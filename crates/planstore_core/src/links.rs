//! Links between entities, stored in one `links.json` per plan.

use crate::atomic::read_json;
use crate::batch::FileJournal;
use crate::error::{ConflictKind, Result, StoreError};
use crate::layout::validate_id;
use crate::plans::PlanRepository;
use crate::repository::StorageScope;
use crate::types::{EntityType, Link, LinksFile, NewLink};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Link CRUD for one plan.
#[derive(Debug, Clone)]
pub struct LinkRepository {
    plan_id: String,
    scope: StorageScope,
    plans: PlanRepository,
}

impl LinkRepository {
    pub(crate) fn new(plan_id: &str, scope: StorageScope, plans: PlanRepository) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            scope,
            plans,
        }
    }

    pub(crate) fn with_journal(self, journal: Arc<FileJournal>) -> Self {
        Self {
            scope: self.scope.with_journal(Arc::clone(&journal)),
            plans: self.plans.with_journal(journal),
            ..self
        }
    }

    fn load(&self) -> Result<LinksFile> {
        Ok(read_json(&self.scope.layout.links_path(&self.plan_id))?.unwrap_or_default())
    }

    fn store(&self, file: &LinksFile) -> Result<()> {
        self.scope
            .write_json(&self.scope.layout.links_path(&self.plan_id), file)
    }

    /// Type of the entity with `id`, if any type has it.
    pub fn entity_type_of(&self, id: &str) -> Option<EntityType> {
        EntityType::ALL.into_iter().find(|t| {
            self.scope
                .layout
                .entity_path(&self.plan_id, *t, id)
                .exists()
        })
    }

    /// Creates a link between two existing entities.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the plan or either endpoint does not exist.
    /// - `Conflict{Duplicate}` if the same (source, target, relation) exists.
    pub fn create(&self, input: NewLink) -> Result<Link> {
        if !self.plans.exists(&self.plan_id) {
            return Err(StoreError::not_found("plan", &self.plan_id));
        }
        validate_id("sourceId", &input.source_id)?;
        validate_id("targetId", &input.target_id)?;
        if input.relation_type.trim().is_empty() {
            return Err(StoreError::validation("relationType", "must not be empty"));
        }
        for endpoint in [&input.source_id, &input.target_id] {
            if self.entity_type_of(endpoint).is_none() {
                return Err(StoreError::not_found("entity", endpoint.as_str()));
            }
        }

        let _plan = self.scope.plan_write(&self.plan_id)?;
        let link = {
            let _lock = self
                .scope
                .lock(&self.scope.layout.links_key(&self.plan_id))?;
            let mut file = self.load()?;
            let duplicate = file.links.iter().any(|l| {
                l.source_id == input.source_id
                    && l.target_id == input.target_id
                    && l.relation_type == input.relation_type
            });
            if duplicate {
                return Err(StoreError::conflict(
                    ConflictKind::Duplicate,
                    format!(
                        "link {} -[{}]-> {} already exists",
                        input.source_id, input.relation_type, input.target_id
                    ),
                ));
            }

            let link = Link {
                id: uuid::Uuid::new_v4().to_string(),
                source_id: input.source_id,
                target_id: input.target_id,
                relation_type: input.relation_type,
                metadata: input.metadata,
                created_at: Utc::now(),
            };
            file.links.push(link.clone());
            self.store(&file)?;
            link
        };

        self.plans.adjust_statistics(&self.plan_id, |s| s.links += 1)?;
        debug!(plan = %self.plan_id, link = %link.id, "link created");
        Ok(link)
    }

    /// Deletes one link by id.
    pub fn delete(&self, link_id: &str) -> Result<Link> {
        let _plan = self.scope.plan_write(&self.plan_id)?;
        let removed = {
            let _lock = self
                .scope
                .lock(&self.scope.layout.links_key(&self.plan_id))?;
            let mut file = self.load()?;
            let position = file
                .links
                .iter()
                .position(|l| l.id == link_id)
                .ok_or_else(|| StoreError::not_found("link", link_id))?;
            let removed = file.links.remove(position);
            self.store(&file)?;
            removed
        };

        self.plans
            .adjust_statistics(&self.plan_id, |s| s.links = s.links.saturating_sub(1))?;
        Ok(removed)
    }

    /// Every link of the plan, oldest first.
    pub fn list(&self) -> Result<Vec<Link>> {
        Ok(self.load()?.links)
    }

    /// Links whose source or target is `entity_id`.
    pub fn find_by_entity(&self, entity_id: &str) -> Result<Vec<Link>> {
        Ok(self
            .load()?
            .links
            .into_iter()
            .filter(|l| l.source_id == entity_id || l.target_id == entity_id)
            .collect())
    }

    /// Removes links touching `entity_id` and returns how many went.
    ///
    /// Statistics are left to the caller.
    pub(crate) fn remove_for_entity(&self, entity_id: &str) -> Result<usize> {
        let _lock = self
            .scope
            .lock(&self.scope.layout.links_key(&self.plan_id))?;
        let mut file = self.load()?;
        let before = file.links.len();
        file.links
            .retain(|l| l.source_id != entity_id && l.target_id != entity_id);
        let removed = before - file.links.len();
        if removed > 0 {
            self.store(&file)?;
        }
        Ok(removed)
    }
}
