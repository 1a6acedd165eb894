//! Storage verification command.

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use planstore_core::PlanStore;
use std::fmt::Display;
use std::time::Duration;

fn section<T: Display>(label: &str, items: &[T], mark: console::StyledObject<&str>) {
    if items.is_empty() {
        return;
    }
    println!("  {:<22}{}", format!("{label}:"), style(items.len()).yellow());
    for item in items {
        println!("    {mark} {item}");
    }
}

/// Verify storage integrity.
pub fn run(store: &PlanStore, plan_id: Option<&str>) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message("Verifying storage...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = store.verify(plan_id);
    spinner.finish_and_clear();
    let report = result?;

    println!();
    println!("{}", style("Verification Report:").bold());
    println!("  Plans checked:        {}", style(report.plans_checked).cyan());
    println!("  Entities checked:     {}", style(report.entities_checked).cyan());

    let corrupt: Vec<_> = report.corrupt_files.iter().map(|p| p.display()).collect();
    section("Corrupt files", &corrupt, style("×").red());
    let mismatches: Vec<String> = report
        .version_mismatches
        .iter()
        .map(|m| {
            format!(
                "{}/{}/{} (index v{}, file v{})",
                m.plan_id, m.entity_type, m.id, m.index_version, m.file_version
            )
        })
        .collect();
    section("Version mismatches", &mismatches, style("⚠").yellow());
    section("Unindexed entities", &report.missing_from_index, style("⚠").yellow());
    section("Orphan index entries", &report.orphan_index_entries, style("⚠").yellow());
    let oversized: Vec<_> = report.oversized_histories.iter().map(|p| p.display()).collect();
    section("Oversized histories", &oversized, style("⚠").yellow());
    section("Dangling links", &report.dangling_links, style("⚠").yellow());
    let temps: Vec<_> = report.stray_temp_files.iter().map(|p| p.display()).collect();
    section("Stray temp files", &temps, style("⚠").yellow());

    println!();
    if !report.has_issues() {
        println!("{} {}", style("✓").green(), style(&report.summary()).green());
        return Ok(());
    }

    println!("{}", style(&report.summary()).yellow().bold());
    println!();
    println!("{}", style("Recommendations:").bold());
    if !report.version_mismatches.is_empty()
        || !report.missing_from_index.is_empty()
        || !report.orphan_index_entries.is_empty()
    {
        println!(
            "  {} Run {} to regenerate indexes from entity files",
            style("→").cyan(),
            style("planstore rebuild <plan>").cyan()
        );
    }
    if !report.corrupt_files.is_empty() {
        println!(
            "  {} Corrupt files need manual repair or removal",
            style("→").cyan()
        );
    }
    if !report.stray_temp_files.is_empty() {
        println!(
            "  {} Temp files are left by interrupted writes and can be deleted",
            style("→").cyan()
        );
    }
    if !report.dangling_links.is_empty() {
        println!(
            "  {} Dangling links point at deleted entities",
            style("→").cyan()
        );
    }

    Ok(())
}
