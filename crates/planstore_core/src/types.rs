//! Core data types for planstore.
//!
//! Every on-disk document is one of these structs serialized as camelCase JSON.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of domain entity stored inside a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A need the plan must satisfy.
    Requirement,
    /// A proposed way of meeting requirements.
    Solution,
    /// A recorded decision.
    Decision,
    /// A stage of execution.
    Phase,
    /// A produced document or file.
    Artifact,
}

impl EntityType {
    /// Every entity type, in directory listing order.
    pub const ALL: [EntityType; 5] = [
        EntityType::Requirement,
        EntityType::Solution,
        EntityType::Decision,
        EntityType::Phase,
        EntityType::Artifact,
    ];

    /// Singular name, used in index file names and the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirement => "requirement",
            Self::Solution => "solution",
            Self::Decision => "decision",
            Self::Phase => "phase",
            Self::Artifact => "artifact",
        }
    }

    /// Plural name, used for entity and history directories.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Requirement => "requirements",
            Self::Solution => "solutions",
            Self::Decision => "decisions",
            Self::Phase => "phases",
            Self::Artifact => "artifacts",
        }
    }

    /// Status assigned when a new entity carries none.
    pub fn default_status(&self) -> &'static str {
        match self {
            Self::Requirement | Self::Artifact => "draft",
            Self::Solution => "proposed",
            Self::Decision => "active",
            Self::Phase => "planned",
        }
    }

    /// Fields copied into index entries; the only fields `list` can filter on.
    pub fn indexed_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Requirement => &["title", "status", "priority", "category"],
            Self::Solution => &["title", "status", "addressing"],
            Self::Decision => &["title", "status"],
            Self::Phase => &["title", "status", "order", "parentId"],
            Self::Artifact => &["title", "status", "artifactType"],
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = StoreError;

    /// Accepts the singular or the plural name.
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.dir_name() == s)
            .ok_or_else(|| StoreError::validation("entityType", format!("unknown entity type '{s}'")))
    }
}

/// Lifecycle state of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Work in progress.
    #[default]
    Active,
    /// All work done.
    Completed,
    /// Kept for reference only.
    Archived,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(StoreError::validation("status", format!("unknown plan status '{other}'"))),
        }
    }
}

/// Entity and link counts kept in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanStatistics {
    /// Number of requirements.
    pub requirements: u64,
    /// Number of solutions.
    pub solutions: u64,
    /// Number of decisions.
    pub decisions: u64,
    /// Number of phases.
    pub phases: u64,
    /// Number of artifacts.
    pub artifacts: u64,
    /// Number of links.
    pub links: u64,
}

impl PlanStatistics {
    /// Mutable counter for one entity type.
    pub fn count_mut(&mut self, entity_type: EntityType) -> &mut u64 {
        match entity_type {
            EntityType::Requirement => &mut self.requirements,
            EntityType::Solution => &mut self.solutions,
            EntityType::Decision => &mut self.decisions,
            EntityType::Phase => &mut self.phases,
            EntityType::Artifact => &mut self.artifacts,
        }
    }

    /// Counter for one entity type.
    pub fn count(&self, entity_type: EntityType) -> u64 {
        match entity_type {
            EntityType::Requirement => self.requirements,
            EntityType::Solution => self.solutions,
            EntityType::Decision => self.decisions,
            EntityType::Phase => self.phases,
            EntityType::Artifact => self.artifacts,
        }
    }
}

/// `manifest.json`: a plan's own record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: PlanStatus,
    #[serde(default)]
    pub statistics: PlanStatistics,
    pub enable_history: bool,
    /// Snapshots kept per entity; 0 keeps everything.
    pub max_history_depth: u32,
    pub version: u64,
    /// Optimistic-concurrency token for plan updates.
    pub lock_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlan {
    /// Explicit id; a uuid is minted when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Falls back to `history.enabled_by_default`.
    #[serde(default)]
    pub enable_history: Option<bool>,
    /// Falls back to `history.max_depth_default`.
    #[serde(default)]
    pub max_history_depth: Option<u32>,
}

/// Changes to a plan. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<PlanStatus>,
    #[serde(default)]
    pub enable_history: Option<bool>,
    #[serde(default)]
    pub max_history_depth: Option<u32>,
    /// Rejects the update if the manifest's `lockVersion` moved on.
    #[serde(default)]
    pub expected_lock_version: Option<u64>,
}

/// A note attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bookkeeping shared by every entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityMetadata {
    pub created_by: Option<String>,
    pub tags: Vec<String>,
    pub annotations: Vec<Annotation>,
}

/// A requirement, solution, decision, phase or artifact.
///
/// Type-specific fields (status, priority, parentId...) live in `fields` and
/// are flattened into the top level of the JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub version: u64,
    #[serde(default)]
    pub metadata: EntityMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// The entity's `status` field, if it is a string.
    pub fn status(&self) -> Option<&str> {
        self.fields.get("status").and_then(Value::as_str)
    }

    /// Value of a top-level field by its JSON name.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "title" => Some(Value::String(self.title.clone())),
            "description" => Some(Value::String(self.description.clone())),
            "version" => Some(Value::from(self.version)),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Full JSON document, as stored on disk.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| StoreError::Storage {
            path: None,
            message: format!("failed to serialize entity: {e}"),
        })
    }
}

/// Top-level keys owned by the engine; input may not set them as fields.
pub const RESERVED_FIELDS: &[&str] = &[
    "id",
    "type",
    "title",
    "description",
    "version",
    "metadata",
    "createdAt",
    "updatedAt",
];

/// Input for creating an entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntity {
    /// Explicit id; a uuid is minted when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Type-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl NewEntity {
    /// Entity with a title and no other input.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Builder-style setter for a type-specific field.
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

/// Changes to an entity.
///
/// `None` leaves a field as is. In `fields`, a `null` value removes the key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Recorded on the history snapshot.
    #[serde(default)]
    pub author: Option<String>,
    /// Recorded on the history snapshot.
    #[serde(default)]
    pub change_note: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityPatch {
    /// Builder-style setter for a type-specific field.
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

/// A typed relation between two entities of one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLink {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// `links.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinksFile {
    pub links: Vec<Link>,
}

/// Lightweight pointer to an entity, kept in the per-type index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub version: u64,
    /// The type's indexed fields, as found on the entity.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Entity file path relative to the plan directory.
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexEntry {
    /// Builds the index entry mirroring `entity`.
    pub fn from_entity(entity: &Entity) -> Self {
        let fields = entity
            .entity_type
            .indexed_fields()
            .iter()
            .filter_map(|name| entity.field(name).map(|v| (name.to_string(), v)))
            .collect();
        Self {
            id: entity.id.clone(),
            entity_type: entity.entity_type,
            version: entity.version,
            fields,
            path: format!("{}/{}.json", entity.entity_type.dir_name(), entity.id),
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }

    /// Value used for filtering and sorting.
    pub fn sort_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::String(self.id.clone())),
            "version" => Some(Value::from(self.version)),
            "createdAt" => Some(Value::String(self.created_at.to_rfc3339())),
            "updatedAt" => Some(Value::String(self.updated_at.to_rfc3339())),
            other => self.fields.get(other).cloned(),
        }
    }
}

/// Captured state of an entity at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSnapshot {
    pub version: u64,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_note: Option<String>,
}

/// History file of one entity. On disk `versions` is oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHistory {
    pub entity_id: String,
    pub entity_type: EntityType,
    /// Version of the newest snapshot, 0 when there is none.
    pub current_version: u64,
    pub total: usize,
    pub versions: Vec<VersionSnapshot>,
}

impl VersionHistory {
    /// History with no snapshots.
    pub fn empty(entity_id: &str, entity_type: EntityType) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            entity_type,
            current_version: 0,
            total: 0,
            versions: Vec::new(),
        }
    }
}

/// One field's change between two versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
    pub changed: bool,
}

/// Field-level difference between two versions of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDiff {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub version1: u64,
    pub version2: u64,
    pub changes: BTreeMap<String, FieldChange>,
}

/// Pagination over history snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Sort direction for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filter, sort and pagination for entity listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    /// Page size, 1..=1000; defaults to 100.
    pub limit: Option<usize>,
    pub offset: usize,
    /// Equality filters on indexed fields.
    pub filters: BTreeMap<String, Value>,
    /// An indexed field, `createdAt` or `updatedAt`.
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// Orders JSON scalars in `order`: numbers numerically, strings lexically.
/// Missing values sort last in either direction.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>, order: SortOrder) -> Ordering {
    let present = match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => return Ordering::Equal,
        (None | Some(Value::Null), _) => return Ordering::Greater,
        (_, None | Some(Value::Null)) => return Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    };
    match order {
        SortOrder::Asc => present,
        SortOrder::Desc => present.reverse(),
    }
}
