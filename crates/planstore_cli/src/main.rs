//! Planstore CLI - Command-line interface for planstore storage roots.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use planstore_core::PlanStore;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "planstore")]
#[command(about = "Inspect and maintain planstore storage", long_about = None)]
#[command(version)]
struct Cli {
    /// Storage root directory
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Project to route every command to
    #[arg(long, global = true)]
    project: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a storage root and write a default planstore.toml
    Init,
    /// Plan management
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Entity management
    Entity {
        #[command(subcommand)]
        command: EntityCommands,
    },
    /// Show version history of an entity
    History {
        /// Plan ID
        plan: String,
        /// Entity type (requirement, solution, decision, phase, artifact)
        entity_type: String,
        /// Entity ID
        id: String,
        /// Maximum number of versions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Compare two versions of an entity
    Diff {
        /// Plan ID
        plan: String,
        /// Entity type
        entity_type: String,
        /// Entity ID
        id: String,
        /// Older version
        from: u64,
        /// Newer version
        to: u64,
    },
    /// Rebuild a plan's indexes from entity files
    Rebuild {
        /// Plan ID
        plan: String,
    },
    /// Verify storage integrity
    Verify {
        /// Only check this plan
        plan: Option<String>,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Create a new plan
    Create {
        /// Plan name
        name: String,
        /// Explicit plan ID (generated if omitted)
        #[arg(long)]
        id: Option<String>,
        /// Plan description
        #[arg(short, long)]
        description: Option<String>,
        /// Don't record version history
        #[arg(long)]
        no_history: bool,
        /// Snapshots kept per entity (0 = unlimited)
        #[arg(long)]
        max_history_depth: Option<u32>,
    },
    /// List plans
    List,
    /// Show a plan manifest
    Show {
        /// Plan ID
        plan: String,
    },
}

#[derive(Subcommand)]
enum EntityCommands {
    /// Add an entity to a plan
    Add {
        /// Plan ID
        plan: String,
        /// Entity type
        entity_type: String,
        /// Entity title
        title: String,
        /// Entity description
        #[arg(short, long)]
        description: Option<String>,
        /// Extra field as key=value (value parsed as JSON when possible)
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },
    /// List entities of one type
    List {
        /// Plan ID
        plan: String,
        /// Entity type
        entity_type: String,
        /// Equality filter on an indexed field, as key=value
        #[arg(short, long = "filter")]
        filters: Vec<String>,
        /// Sort field
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long)]
        desc: bool,
        /// Page size
        #[arg(long)]
        limit: Option<usize>,
        /// Entries to skip
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print an entity as JSON
    Show {
        /// Plan ID
        plan: String,
        /// Entity type
        entity_type: String,
        /// Entity ID
        id: String,
    },
}

fn main() -> Result<()> {
    // Respects RUST_LOG environment variable (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store = PlanStore::open(&cli.root)
        .with_context(|| format!("Failed to open storage root {}", cli.root.display()))?;
    tracing::debug!(root = %cli.root.display(), project = ?cli.project, "store opened");

    let outcome = match cli.project.as_deref() {
        Some(project) => store
            .run_with_context(project, || dispatch(&store, cli.command))
            .context("Invalid --project")?,
        None => dispatch(&store, cli.command),
    };
    store.close();
    outcome
}

fn dispatch(store: &PlanStore, command: Commands) -> Result<()> {
    match command {
        Commands::Init => commands::init::run(store),
        Commands::Plan { command } => match command {
            PlanCommands::Create {
                name,
                id,
                description,
                no_history,
                max_history_depth,
            } => commands::plan::create(store, name, id, description, no_history, max_history_depth),
            PlanCommands::List => commands::plan::list(store),
            PlanCommands::Show { plan } => commands::plan::show(store, &plan),
        },
        Commands::Entity { command } => match command {
            EntityCommands::Add {
                plan,
                entity_type,
                title,
                description,
                fields,
            } => commands::entity::add(store, &plan, &entity_type, title, description, &fields),
            EntityCommands::List {
                plan,
                entity_type,
                filters,
                sort,
                desc,
                limit,
                offset,
                format,
            } => commands::entity::list(
                store,
                &plan,
                &entity_type,
                commands::entity::ListOptions {
                    filters,
                    sort,
                    desc,
                    limit,
                    offset,
                },
                &format,
            ),
            EntityCommands::Show {
                plan,
                entity_type,
                id,
            } => commands::entity::show(store, &plan, &entity_type, &id),
        },
        Commands::History {
            plan,
            entity_type,
            id,
            limit,
        } => commands::history::run(store, &plan, &entity_type, &id, limit),
        Commands::Diff {
            plan,
            entity_type,
            id,
            from,
            to,
        } => commands::diff::run(store, &plan, &entity_type, &id, from, to),
        Commands::Rebuild { plan } => commands::rebuild::run(store, &plan),
        Commands::Verify { plan } => commands::verify::run(store, plan.as_deref()),
    }
}
