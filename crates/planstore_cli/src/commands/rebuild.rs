//! Rebuild command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use planstore_core::PlanStore;
use std::time::{Duration, Instant};

/// Rebuild every index of a plan from its entity files.
pub fn run(store: &PlanStore, plan_id: &str) -> Result<()> {
    let start = Instant::now();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("Rebuilding indexes of {plan_id}..."));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = store.rebuild_indexes(plan_id);
    spinner.finish_and_clear();
    let report = result.context("Failed to rebuild indexes")?;

    for (entity_type, count) in &report.indexed {
        println!("  {:<14}{}", format!("{}:", entity_type.dir_name()), count);
    }
    for path in &report.skipped_corrupt {
        println!("  {} skipped corrupt {}", style("×").red(), path.display());
    }

    println!(
        "Indexes rebuilt successfully in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
