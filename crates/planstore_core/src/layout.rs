//! On-disk layout and lock keys for one project subtree.
//!
//! ```text
//! <root>/[<project>/]plans/<plan>/manifest.json
//! <root>/[<project>/]plans/<plan>/<types>/<id>.json
//! <root>/[<project>/]plans/<plan>/links.json
//! <root>/[<project>/]plans/<plan>/indexes/<type>-index.json
//! <root>/[<project>/]plans/<plan>/history/<types>/<id>.json
//! ```

use crate::context::ProjectId;
use crate::error::{Result, StoreError};
use crate::types::EntityType;
use std::path::{Path, PathBuf};

/// Rejects ids that are not safe as a single path component.
pub fn validate_id(field: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::validation(
            field,
            format!("'{id}' must be 1-128 characters of letters, digits, '-' or '_'"),
        ))
    }
}

/// Paths and lock keys under one storage root, optionally inside a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
    project: Option<ProjectId>,
}

impl ProjectLayout {
    /// Layout for `project` under `root`; `None` stores plans directly under the root.
    pub fn new(root: impl Into<PathBuf>, project: Option<ProjectId>) -> Self {
        Self {
            root: root.into(),
            project,
        }
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The project this layout is bound to.
    pub fn project(&self) -> Option<&ProjectId> {
        self.project.as_ref()
    }

    /// Directory holding every plan of the project.
    pub fn plans_dir(&self) -> PathBuf {
        match &self.project {
            Some(project) => self.root.join(project.as_str()).join("plans"),
            None => self.root.join("plans"),
        }
    }

    pub fn plan_dir(&self, plan_id: &str) -> PathBuf {
        self.plans_dir().join(plan_id)
    }

    pub fn manifest_path(&self, plan_id: &str) -> PathBuf {
        self.plan_dir(plan_id).join("manifest.json")
    }

    pub fn entity_dir(&self, plan_id: &str, entity_type: EntityType) -> PathBuf {
        self.plan_dir(plan_id).join(entity_type.dir_name())
    }

    pub fn entity_path(&self, plan_id: &str, entity_type: EntityType, id: &str) -> PathBuf {
        self.entity_dir(plan_id, entity_type).join(format!("{id}.json"))
    }

    pub fn links_path(&self, plan_id: &str) -> PathBuf {
        self.plan_dir(plan_id).join("links.json")
    }

    pub fn index_path(&self, plan_id: &str, entity_type: EntityType) -> PathBuf {
        self.plan_dir(plan_id)
            .join("indexes")
            .join(format!("{}-index.json", entity_type.as_str()))
    }

    pub fn history_dir(&self, plan_id: &str, entity_type: EntityType) -> PathBuf {
        self.plan_dir(plan_id).join("history").join(entity_type.dir_name())
    }

    pub fn history_path(&self, plan_id: &str, entity_type: EntityType, id: &str) -> PathBuf {
        self.history_dir(plan_id, entity_type).join(format!("{id}.json"))
    }

    fn key_prefix(&self) -> String {
        match &self.project {
            Some(project) => format!("{project}/plan/"),
            None => "plan/".to_string(),
        }
    }

    /// Lock key for one entity.
    pub fn entity_key(&self, plan_id: &str, entity_type: EntityType, id: &str) -> String {
        format!("{}{plan_id}/{entity_type}/{id}", self.key_prefix())
    }

    /// Lock key for one entity's history file.
    pub fn history_key(&self, plan_id: &str, entity_type: EntityType, id: &str) -> String {
        format!("{}{plan_id}/history/{entity_type}/{id}", self.key_prefix())
    }

    /// Lock key for the plan manifest.
    pub fn manifest_key(&self, plan_id: &str) -> String {
        format!("{}{plan_id}/manifest", self.key_prefix())
    }

    /// Lock key for `links.json`.
    pub fn links_key(&self, plan_id: &str) -> String {
        format!("{}{plan_id}/links", self.key_prefix())
    }

    /// Outer write key of a plan. Single writes hold it shared; batches,
    /// index rebuilds and plan deletion hold it exclusively.
    pub fn plan_key(&self, plan_id: &str) -> String {
        format!("{}{plan_id}/writes", self.key_prefix())
    }
}
