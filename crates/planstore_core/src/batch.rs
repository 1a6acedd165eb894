//! Multi-operation batches with temp-id resolution and rollback.
//!
//! Operations run strictly in order on the calling thread. Before any file is
//! first written or removed, its prior bytes (or its absence) go into a
//! [`FileJournal`]. When an operation fails, the journal is replayed in
//! reverse and the plan's indexes are reloaded, leaving the plan exactly as it
//! was before the batch started. The batch holds the plan's write key
//! exclusively, so no other write lands between the journal and a rollback.

use crate::atomic::{atomic_write_bytes_with, read_bytes, remove_if_exists};
use crate::error::{BulkFailure, Result, StoreError, TransactionPhase};
use crate::factory::RepositoryFactory;
use crate::types::{Entity, EntityPatch, EntityType, Link, NewEntity, NewLink};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct JournalRecord {
    path: PathBuf,
    prior: Option<Vec<u8>>,
    /// Directories that did not exist yet, deepest first.
    created_dirs: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct JournalState {
    seen: HashSet<PathBuf>,
    records: Vec<JournalRecord>,
}

/// Prior contents of every file a batch touched.
#[derive(Debug, Default)]
pub struct FileJournal {
    state: Mutex<JournalState>,
}

impl FileJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remembers `path`'s current content. Only the first call per path counts.
    pub fn record(&self, path: &Path) -> Result<()> {
        let mut state = self.state();
        if state.seen.contains(path) {
            return Ok(());
        }

        let prior = read_bytes(path)?;
        let created_dirs = if prior.is_none() {
            path.ancestors()
                .skip(1)
                .take_while(|dir| !dir.exists())
                .map(Path::to_path_buf)
                .collect()
        } else {
            Vec::new()
        };

        state.seen.insert(path.to_path_buf());
        state.records.push(JournalRecord {
            path: path.to_path_buf(),
            prior,
            created_dirs,
        });
        Ok(())
    }

    /// Number of distinct files recorded.
    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths recorded, in first-touch order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state().records.iter().map(|r| r.path.clone()).collect()
    }

    /// Puts every recorded file back, newest record first.
    ///
    /// Keeps going after a failure and returns the first error.
    pub fn restore(&self) -> Result<usize> {
        let state = self.state();
        let mut first_error = None;

        for record in state.records.iter().rev() {
            let outcome = match &record.prior {
                Some(bytes) => atomic_write_bytes_with(&record.path, bytes, |_, _| Ok(())),
                None => remove_if_exists(&record.path).map(|_| {
                    for dir in &record.created_dirs {
                        // non-empty directories were there for other reasons
                        if fs::remove_dir(dir).is_err() {
                            break;
                        }
                    }
                }),
            };
            if let Err(e) = outcome {
                warn!(path = %record.path.display(), error = %e, "failed to restore file");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(state.records.len()),
        }
    }
}

/// One step of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BatchOperation {
    /// Creates an entity; `temp_id` (`$name`) lets later steps refer to it.
    #[serde(rename_all = "camelCase")]
    Create {
        entity_type: EntityType,
        #[serde(default)]
        temp_id: Option<String>,
        data: Value,
    },
    /// Updates an entity, optionally checking its version.
    #[serde(rename_all = "camelCase")]
    Update {
        entity_type: EntityType,
        id: String,
        data: Value,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    /// Links two entities.
    #[serde(rename_all = "camelCase")]
    CreateLink {
        source_id: String,
        target_id: String,
        relation_type: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    /// Deletes an entity with its history and links.
    #[serde(rename_all = "camelCase")]
    Delete { entity_type: EntityType, id: String },
}

impl BatchOperation {
    fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::CreateLink { .. } => "createLink",
            Self::Delete { .. } => "delete",
        }
    }

    /// Replaces every string equal to a known temp id with its real id.
    fn resolve(&mut self, temp_ids: &BTreeMap<String, String>) {
        if temp_ids.is_empty() {
            return;
        }
        match self {
            Self::Create { data, .. } => resolve_value(data, temp_ids),
            Self::Update { id, data, .. } => {
                resolve_str(id, temp_ids);
                resolve_value(data, temp_ids);
            }
            Self::CreateLink {
                source_id,
                target_id,
                metadata,
                ..
            } => {
                resolve_str(source_id, temp_ids);
                resolve_str(target_id, temp_ids);
                metadata
                    .values_mut()
                    .for_each(|v| resolve_value(v, temp_ids));
            }
            Self::Delete { id, .. } => resolve_str(id, temp_ids),
        }
    }
}

fn resolve_str(s: &mut String, temp_ids: &BTreeMap<String, String>) {
    if let Some(real) = temp_ids.get(s.as_str()) {
        *s = real.clone();
    }
}

fn resolve_value(value: &mut Value, temp_ids: &BTreeMap<String, String>) {
    match value {
        Value::String(s) => resolve_str(s, temp_ids),
        Value::Array(items) => items.iter_mut().for_each(|v| resolve_value(v, temp_ids)),
        Value::Object(map) => map.values_mut().for_each(|v| resolve_value(v, temp_ids)),
        _ => {}
    }
}

/// Outcome of one applied operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub index: usize,
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,
    /// Id of the entity or link the operation produced or touched.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Outcome of a fully applied batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub results: Vec<OperationResult>,
    /// Temp id to minted id.
    pub temp_ids: BTreeMap<String, String>,
}

impl BatchResult {
    /// Real id minted for `temp_id`.
    pub fn resolved(&self, temp_id: &str) -> Option<&str> {
        self.temp_ids.get(temp_id).map(String::as_str)
    }
}

/// Runs batches against the plans reachable through a factory.
#[derive(Debug)]
pub struct BatchExecutor<'a> {
    factory: &'a RepositoryFactory,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(factory: &'a RepositoryFactory) -> Self {
        Self { factory }
    }

    /// Applies `operations` to `plan_id` all-or-nothing.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the plan does not exist.
    /// - `Validation` for malformed or repeated temp ids; nothing is applied.
    /// - `BulkOperation` when a step fails and every earlier step was undone.
    /// - `Transaction{Rollback}` when undoing failed; the plan may be inconsistent.
    pub fn execute(&self, plan_id: &str, operations: Vec<BatchOperation>) -> Result<BatchResult> {
        let plans = self.factory.plans()?;
        if !plans.exists(plan_id) {
            return Err(StoreError::not_found("plan", plan_id));
        }
        validate_temp_ids(&operations)?;

        let layout = self.factory.layout()?;
        // keeps single writes out until the batch commits or rolls back
        let _batch = self
            .factory
            .lock_manager()
            .acquire(&layout.plan_key(plan_id), self.factory.lock_timeout())?;

        let journal = Arc::new(FileJournal::new());
        let mut result = BatchResult::default();
        let total = operations.len();

        for (index, mut op) in operations.into_iter().enumerate() {
            op.resolve(&result.temp_ids);
            let name = op.name();
            match self.apply(plan_id, op, &journal, &mut result.temp_ids) {
                Ok(mut applied) => {
                    applied.index = index;
                    applied.op = name;
                    result.results.push(applied);
                }
                Err(e) => {
                    warn!(plan = plan_id, index, op = name, error = %e, "batch step failed, rolling back");
                    let failure = BulkFailure {
                        index,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    };
                    return Err(self.roll_back(plan_id, &journal, index, failure));
                }
            }
        }

        info!(plan = plan_id, operations = total, files = journal.len(), "batch applied");
        Ok(result)
    }

    fn apply(
        &self,
        plan_id: &str,
        op: BatchOperation,
        journal: &Arc<FileJournal>,
        temp_ids: &mut BTreeMap<String, String>,
    ) -> Result<OperationResult> {
        let journal = Arc::clone(journal);
        match op {
            BatchOperation::Create {
                entity_type,
                temp_id,
                data,
            } => {
                let input: NewEntity = from_data(data)?;
                let entity = self
                    .factory
                    .entities(plan_id, entity_type)?
                    .with_journal(journal)
                    .create(input)?;
                if let Some(temp_id) = temp_id {
                    debug!(temp_id = %temp_id, id = %entity.id, "temp id resolved");
                    temp_ids.insert(temp_id, entity.id.clone());
                }
                Ok(entity_result(&entity))
            }
            BatchOperation::Update {
                entity_type,
                id,
                data,
                expected_version,
            } => {
                let patch: EntityPatch = from_data(data)?;
                let entity = self
                    .factory
                    .entities(plan_id, entity_type)?
                    .with_journal(journal)
                    .update(&id, patch, expected_version)?;
                Ok(entity_result(&entity))
            }
            BatchOperation::CreateLink {
                source_id,
                target_id,
                relation_type,
                metadata,
            } => {
                let link: Link = self
                    .factory
                    .links(plan_id)?
                    .with_journal(journal)
                    .create(NewLink {
                        source_id,
                        target_id,
                        relation_type,
                        metadata,
                    })?;
                Ok(OperationResult {
                    index: 0,
                    op: "",
                    entity_type: None,
                    id: link.id,
                    version: None,
                })
            }
            BatchOperation::Delete { entity_type, id } => {
                let entity = self
                    .factory
                    .entities(plan_id, entity_type)?
                    .with_journal(journal)
                    .delete(&id, true)?;
                Ok(OperationResult {
                    version: None,
                    ..entity_result(&entity)
                })
            }
        }
    }

    fn roll_back(
        &self,
        plan_id: &str,
        journal: &FileJournal,
        succeeded: usize,
        failure: BulkFailure,
    ) -> StoreError {
        if let Err(e) = journal.restore() {
            return StoreError::Transaction {
                phase: TransactionPhase::Rollback,
                message: format!("restoring files after step {} failed: {e}", failure.index),
            };
        }
        for entity_type in EntityType::ALL {
            let reloaded = self
                .factory
                .index(plan_id, entity_type)
                .and_then(|index| index.reload());
            if let Err(e) = reloaded {
                return StoreError::Transaction {
                    phase: TransactionPhase::Rollback,
                    message: format!("reloading {entity_type} index after rollback failed: {e}"),
                };
            }
        }
        info!(plan = plan_id, files = journal.len(), "batch rolled back");

        StoreError::BulkOperation {
            succeeded,
            failed: 1,
            failures: vec![failure],
            rolled_back: true,
        }
    }
}

fn entity_result(entity: &Entity) -> OperationResult {
    OperationResult {
        index: 0,
        op: "",
        entity_type: Some(entity.entity_type),
        id: entity.id.clone(),
        version: Some(entity.version),
    }
}

fn from_data<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| StoreError::validation("data", e.to_string()))
}

fn validate_temp_ids(operations: &[BatchOperation]) -> Result<()> {
    let mut seen = HashSet::new();
    for op in operations {
        if let BatchOperation::Create {
            temp_id: Some(temp_id),
            ..
        } = op
        {
            if temp_id.len() < 2 || !temp_id.starts_with('$') {
                return Err(StoreError::validation(
                    "tempId",
                    format!("'{temp_id}' must look like '$name'"),
                ));
            }
            if !seen.insert(temp_id.as_str()) {
                return Err(StoreError::validation(
                    "tempId",
                    format!("'{temp_id}' is used by more than one create"),
                ));
            }
        }
    }
    Ok(())
}
