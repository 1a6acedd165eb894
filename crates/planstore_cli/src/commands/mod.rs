//! CLI commands.

pub mod diff;
pub mod entity;
pub mod history;
pub mod init;
pub mod plan;
pub mod rebuild;
pub mod verify;

use anyhow::{Context, Result};
use planstore_core::EntityType;
use serde_json::Value;

/// Parses an entity type argument (singular or plural).
pub fn entity_type(arg: &str) -> Result<EntityType> {
    arg.parse::<EntityType>()
        .with_context(|| format!("Unknown entity type '{arg}'"))
}

/// Splits `key=value`, reading the value as JSON when it parses and as a
/// plain string otherwise.
pub fn key_value(arg: &str) -> Result<(String, Value)> {
    let (key, raw) = arg
        .split_once('=')
        .with_context(|| format!("Expected key=value, got '{arg}'"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}
