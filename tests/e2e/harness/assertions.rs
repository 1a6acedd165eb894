use anyhow::Result;
use planstore_core::{EntityType, PlanStore};
use serde_json::Value;
use std::collections::HashMap;

/// Alias to entity id, as tracked by the runner
pub type Aliases = HashMap<String, String>;

/// Declarative assertions on store state
pub enum Assertion {
    // Plans
    PlanExists(String),
    PlanMissing(String),
    StatisticsCount {
        plan: String,
        entity_type: EntityType,
        count: u64,
    },

    // Entities
    EntityVersion {
        plan: String,
        entity_type: EntityType,
        alias: String,
        version: u64,
    },
    EntityField {
        plan: String,
        entity_type: EntityType,
        alias: String,
        field: String,
        value: Value,
    },
    EntityMissing {
        plan: String,
        entity_type: EntityType,
        alias: String,
    },
    EntityCount {
        plan: String,
        entity_type: EntityType,
        count: usize,
    },

    // Links
    LinkCount {
        plan: String,
        count: usize,
    },

    // History
    HistoryVersions {
        plan: String,
        entity_type: EntityType,
        alias: String,
        versions: Vec<u64>,
    },
    DiffChanges {
        plan: String,
        entity_type: EntityType,
        alias: String,
        from: u64,
        to: u64,
        fields: Vec<String>,
    },

    // Integrity
    VerifyClean,
    VerifyHasIssues,
    NoTempFiles,
    FileExists(String),
    FileMissing(String),

    // Custom
    Custom(Box<dyn Fn(&PlanStore, &Aliases) -> Result<()> + Send + Sync>),
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlanExists(p) => write!(f, "PlanExists({:?})", p),
            Self::PlanMissing(p) => write!(f, "PlanMissing({:?})", p),
            Self::StatisticsCount {
                plan,
                entity_type,
                count,
            } => write!(f, "StatisticsCount {{ {plan}/{entity_type}: {count} }}"),
            Self::EntityVersion {
                plan,
                entity_type,
                alias,
                version,
            } => write!(f, "EntityVersion {{ {plan}/{entity_type}/{alias}: {version} }}"),
            Self::EntityField {
                plan,
                entity_type,
                alias,
                field,
                value,
            } => write!(f, "EntityField {{ {plan}/{entity_type}/{alias}.{field} = {value} }}"),
            Self::EntityMissing {
                plan,
                entity_type,
                alias,
            } => write!(f, "EntityMissing {{ {plan}/{entity_type}/{alias} }}"),
            Self::EntityCount {
                plan,
                entity_type,
                count,
            } => write!(f, "EntityCount {{ {plan}/{entity_type}: {count} }}"),
            Self::LinkCount { plan, count } => write!(f, "LinkCount {{ {plan}: {count} }}"),
            Self::HistoryVersions {
                plan,
                entity_type,
                alias,
                versions,
            } => write!(f, "HistoryVersions {{ {plan}/{entity_type}/{alias}: {versions:?} }}"),
            Self::DiffChanges {
                alias, from, to, fields, ..
            } => write!(f, "DiffChanges {{ {alias} v{from}..v{to}: {fields:?} }}"),
            Self::VerifyClean => write!(f, "VerifyClean"),
            Self::VerifyHasIssues => write!(f, "VerifyHasIssues"),
            Self::NoTempFiles => write!(f, "NoTempFiles"),
            Self::FileExists(p) => write!(f, "FileExists({:?})", p),
            Self::FileMissing(p) => write!(f, "FileMissing({:?})", p),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}
