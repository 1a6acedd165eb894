//! Planstore Core Library
//!
//! A file-backed storage engine for planning documents, providing:
//! - Plans holding requirements, solutions, decisions, phases and artifacts
//! - Optimistic versioning with per-entity version history and diffs
//! - Per-key write locks, atomic file writes and all-or-nothing batches
//! - JSON indexes for filtered, sorted listings
//! - Per-thread project routing for multi-tenant roots
//!
//! # Quick Start
//!
//! ```
//! use planstore_core::{EntityType, NewEntity, NewPlan, PlanStore};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let store = PlanStore::open(tmp.path()).unwrap();
//!
//! let plan = store
//!     .create_plan(NewPlan { name: "Launch".into(), ..NewPlan::default() })
//!     .unwrap();
//! let req = store
//!     .create_entity(&plan.id, EntityType::Requirement, NewEntity::titled("Sign-in"))
//!     .unwrap();
//! assert_eq!(req.version, 1);
//! assert_eq!(store.get_plan(&plan.id).unwrap().statistics.requirements, 1);
//! ```
//!
//! # Features
//!
//! ## Version History
//!
//! Every accepted update snapshots the prior state, so any two versions can
//! be compared:
//!
//! ```
//! use planstore_core::{EntityPatch, EntityType, NewEntity, NewPlan, PlanStore};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let store = PlanStore::open(tmp.path()).unwrap();
//! let plan = store
//!     .create_plan(NewPlan { name: "Launch".into(), ..NewPlan::default() })
//!     .unwrap();
//! let req = store
//!     .create_entity(&plan.id, EntityType::Requirement, NewEntity::titled("Draft"))
//!     .unwrap();
//!
//! let patch = EntityPatch { title: Some("Final".into()), ..EntityPatch::default() };
//! store
//!     .update_entity(&plan.id, EntityType::Requirement, &req.id, patch, Some(1))
//!     .unwrap();
//!
//! let diff = store.diff(&plan.id, EntityType::Requirement, &req.id, 1, 2).unwrap();
//! assert_eq!(diff.changes["title"].to, "Final");
//! ```
//!
//! ## Batches
//!
//! Operations in a batch apply together or not at all. Later steps can refer
//! to entities created earlier through `$`-prefixed temp ids:
//!
//! ```
//! use planstore_core::{BatchOperation, EntityType, NewPlan, PlanStore};
//! use serde_json::json;
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let store = PlanStore::open(tmp.path()).unwrap();
//! let plan = store
//!     .create_plan(NewPlan { name: "Launch".into(), ..NewPlan::default() })
//!     .unwrap();
//!
//! let result = store
//!     .execute_batch(
//!         &plan.id,
//!         vec![
//!             BatchOperation::Create {
//!                 entity_type: EntityType::Requirement,
//!                 temp_id: Some("$req".into()),
//!                 data: json!({"title": "Sign-in"}),
//!             },
//!             BatchOperation::Create {
//!                 entity_type: EntityType::Solution,
//!                 temp_id: Some("$sol".into()),
//!                 data: json!({"title": "OAuth"}),
//!             },
//!             BatchOperation::CreateLink {
//!                 source_id: "$sol".into(),
//!                 target_id: "$req".into(),
//!                 relation_type: "implements".into(),
//!                 metadata: Default::default(),
//!             },
//!         ],
//!     )
//!     .unwrap();
//! assert_eq!(result.results.len(), 3);
//! assert_eq!(store.list_links(&plan.id).unwrap().len(), 1);
//! ```

mod atomic;
mod batch;
mod cache;
mod config;
mod context;
mod error;
mod factory;
mod history;
mod index;
mod layout;
mod links;
mod lock;
mod plans;
mod repository;
mod store;
mod types;
mod verify;

pub use atomic::{atomic_write, atomic_write_bytes_with, is_temp_file, read_json, TEMP_PREFIX};
pub use batch::{BatchExecutor, BatchOperation, BatchResult, FileJournal, OperationResult};
pub use cache::{CacheStats, EntityCache};
pub use config::{
    CacheConfig, CacheInvalidation, HistoryConfig, LockConfig, StorageConfig, StoreConfig,
    CONFIG_FILE,
};
pub use context::{ContextSnapshot, ExecutionContext, ProjectId, ScopeGuard};
pub use error::{
    BulkFailure, ConflictKind, IndexOperation, LockErrorKind, QueryErrorKind, Result, StoreError,
    TransactionPhase,
};
pub use factory::RepositoryFactory;
pub use history::VersionHistoryService;
pub use index::{IndexFile, IndexManager, IndexStats, INDEX_SCHEMA_VERSION};
pub use layout::{validate_id, ProjectLayout};
pub use links::LinkRepository;
pub use lock::{LockHandle, LockInfo, LockManager, LockMode};
pub use plans::PlanRepository;
pub use repository::{EntityRepository, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use store::PlanStore;
pub use types::*;
pub use verify::{rebuild_indexes, verify, RebuildReport, VerifyReport, VersionMismatch};
