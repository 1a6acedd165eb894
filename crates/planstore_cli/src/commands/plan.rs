//! Plan commands.

use anyhow::{Context, Result};
use console::style;
use planstore_core::{EntityType, NewPlan, PlanStore};

/// Create a plan.
pub fn create(
    store: &PlanStore,
    name: String,
    id: Option<String>,
    description: Option<String>,
    no_history: bool,
    max_history_depth: Option<u32>,
) -> Result<()> {
    let manifest = store
        .create_plan(NewPlan {
            id,
            name,
            description,
            enable_history: no_history.then_some(false),
            max_history_depth,
        })
        .context("Failed to create plan")?;

    println!("{} Created plan {}", style("✓").green(), style(&manifest.id).cyan());
    Ok(())
}

/// List plans, oldest first.
pub fn list(store: &PlanStore) -> Result<()> {
    let plans = store.list_plans()?;
    if plans.is_empty() {
        println!("No plans.");
        return Ok(());
    }

    for plan in plans {
        let entities: u64 = EntityType::ALL
            .iter()
            .map(|t| plan.statistics.count(*t))
            .sum();
        println!(
            "{}  {}  ({} entities, {} links, {})",
            style(&plan.id).cyan(),
            plan.name,
            entities,
            plan.statistics.links,
            plan.status
        );
    }
    Ok(())
}

/// Show a plan manifest.
pub fn show(store: &PlanStore, plan_id: &str) -> Result<()> {
    let plan = store.get_plan(plan_id)?;

    println!("{}", style(&plan.name).bold());
    println!("  ID:           {}", plan.id);
    if !plan.description.is_empty() {
        println!("  Description:  {}", plan.description);
    }
    println!("  Status:       {}", plan.status);
    println!("  Version:      {}", plan.version);
    println!("  Created:      {}", plan.created_at.to_rfc3339());
    println!("  Updated:      {}", plan.updated_at.to_rfc3339());
    if plan.enable_history {
        let depth = match plan.max_history_depth {
            0 => "unlimited".to_string(),
            n => n.to_string(),
        };
        println!("  History:      on (depth {depth})");
    } else {
        println!("  History:      off");
    }
    println!();
    println!("{}", style("Statistics:").bold());
    for entity_type in EntityType::ALL {
        println!(
            "  {:<14}{}",
            format!("{}:", entity_type.dir_name()),
            plan.statistics.count(entity_type)
        );
    }
    println!("  {:<14}{}", "links:", plan.statistics.links);
    Ok(())
}
