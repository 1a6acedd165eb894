//! Version history command.

use super::entity_type;
use anyhow::Result;
use console::style;
use planstore_core::{HistoryQuery, PlanStore};

/// Show snapshots of an entity, newest first.
pub fn run(
    store: &PlanStore,
    plan_id: &str,
    type_arg: &str,
    id: &str,
    limit: Option<usize>,
) -> Result<()> {
    let entity_type = entity_type(type_arg)?;
    let current = store.get_entity(plan_id, entity_type, id).ok();
    let history = store.get_history(
        plan_id,
        entity_type,
        id,
        HistoryQuery {
            limit,
            offset: 0,
        },
    )?;

    if let Some(entity) = &current {
        println!(
            "{} v{}  {}",
            style("current").green().bold(),
            entity.version,
            entity.title
        );
    }

    if history.versions.is_empty() {
        println!("No recorded versions.");
        return Ok(());
    }

    for snapshot in &history.versions {
        let title = snapshot
            .data
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or("");
        println!(
            "{}  {}  {}",
            style(format!("v{}", snapshot.version)).yellow(),
            snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
            title
        );
        if let Some(author) = &snapshot.author {
            println!("    Author: {author}");
        }
        if let Some(note) = &snapshot.change_note {
            println!("    {note}");
        }
    }

    if history.total > history.versions.len() {
        println!();
        println!("Showing {} of {} versions", history.versions.len(), history.total);
    }
    Ok(())
}
