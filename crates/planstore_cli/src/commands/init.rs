//! Initialize a storage root.

use anyhow::{Context, Result};
use planstore_core::{PlanStore, CONFIG_FILE};

/// Writes the active configuration to `planstore.toml` unless one exists.
pub fn run(store: &PlanStore) -> Result<()> {
    let root = store.root();
    let config_path = root.join(CONFIG_FILE);

    if config_path.exists() {
        println!("Storage root already initialized at {}", root.display());
        return Ok(());
    }

    store
        .config()
        .save(root)
        .context("Failed to write configuration")?;

    println!("Initialized planstore root in {}", root.display());
    println!();
    println!("Directory structure:");
    println!("  [<project>/]plans/<plan>/manifest.json        - Plan manifest");
    println!("  [<project>/]plans/<plan>/<type>/<id>.json     - Entities");
    println!("  [<project>/]plans/<plan>/links.json           - Links");
    println!("  [<project>/]plans/<plan>/indexes/             - Rebuildable indexes");
    println!("  [<project>/]plans/<plan>/history/<type>/      - Version snapshots");
    println!();
    println!("Configuration written to {CONFIG_FILE}");

    Ok(())
}
