//! Entity commands.

use super::{entity_type, key_value};
use anyhow::{Context, Result};
use console::style;
use planstore_core::{ListQuery, NewEntity, PlanStore, SortOrder};

/// Filter, sort and paging flags of `entity list`.
pub struct ListOptions {
    pub filters: Vec<String>,
    pub sort: Option<String>,
    pub desc: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Add an entity.
pub fn add(
    store: &PlanStore,
    plan_id: &str,
    type_arg: &str,
    title: String,
    description: Option<String>,
    fields: &[String],
) -> Result<()> {
    let entity_type = entity_type(type_arg)?;
    let mut input = NewEntity {
        title,
        description,
        ..NewEntity::default()
    };
    for field in fields {
        let (key, value) = key_value(field)?;
        input.fields.insert(key, value);
    }

    let entity = store
        .create_entity(plan_id, entity_type, input)
        .with_context(|| format!("Failed to add {entity_type}"))?;

    println!(
        "{} Created {} {}",
        style("✓").green(),
        entity_type,
        style(&entity.id).cyan()
    );
    Ok(())
}

/// List entities of one type.
pub fn list(
    store: &PlanStore,
    plan_id: &str,
    type_arg: &str,
    options: ListOptions,
    format: &str,
) -> Result<()> {
    let entity_type = entity_type(type_arg)?;
    let mut query = ListQuery {
        limit: options.limit,
        offset: options.offset,
        sort_by: options.sort,
        sort_order: if options.desc {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        },
        ..ListQuery::default()
    };
    for filter in &options.filters {
        let (key, value) = key_value(filter)?;
        query.filters.insert(key, value);
    }

    let page = store.list_entities(plan_id, entity_type, &query)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&page)?),
        "text" => {
            for entity in &page.items {
                println!(
                    "{}  v{}  {:<12} {}",
                    style(&entity.id).cyan(),
                    entity.version,
                    entity.status().unwrap_or("-"),
                    entity.title
                );
            }
            println!();
            println!(
                "{} of {} {}{}",
                page.items.len(),
                page.total,
                entity_type.dir_name(),
                if page.has_more { " (more available)" } else { "" }
            );
        }
        other => anyhow::bail!("Unknown format '{other}' (expected text or json)"),
    }
    Ok(())
}

/// Print one entity as JSON.
pub fn show(store: &PlanStore, plan_id: &str, type_arg: &str, id: &str) -> Result<()> {
    let entity = store.get_entity(plan_id, entity_type(type_arg)?, id)?;
    println!("{}", serde_json::to_string_pretty(&entity)?);
    Ok(())
}
