//! Version diff command.

use super::entity_type;
use anyhow::Result;
use console::style;
use planstore_core::PlanStore;

/// Print field changes between two versions.
pub fn run(
    store: &PlanStore,
    plan_id: &str,
    type_arg: &str,
    id: &str,
    from: u64,
    to: u64,
) -> Result<()> {
    let diff = store.diff(plan_id, entity_type(type_arg)?, id, from, to)?;

    println!(
        "{}",
        style(format!("{} {}: v{} → v{}", diff.entity_type, diff.entity_id, from, to)).bold()
    );
    if diff.changes.is_empty() {
        println!("  No changes.");
        return Ok(());
    }

    for (field, change) in &diff.changes {
        println!("  {}", style(field).cyan());
        println!("    {} {}", style("-").red(), change.from);
        println!("    {} {}", style("+").green(), change.to);
    }
    Ok(())
}
