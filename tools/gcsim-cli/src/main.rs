//! gcsim - generational heap simulator and leak analyzer CLI
//!
//! Every command prints its result as pretty JSON on stdout; logs go to stderr.

mod scenario;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use gcsim_core::{MemoryStore, SharedStore, SimulatorConfig, SqliteStore};
use gcsim_service::{AllocateRequest, CollectionKind, DereferenceRequest, GcSimulation};
use log::{debug, info};
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "gcsim")]
#[command(author, version, about = "Generational heap simulator and memory leak analyzer", long_about = None)]
struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the configured path)
    #[arg(short, long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    /// Keep all state in memory for this invocation only
    #[arg(long, global = true, conflicts_with = "database")]
    in_memory: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate objects of a fixed size
    Allocate {
        /// Number of objects
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Size of each object in KB
        #[arg(short, long)]
        size_kb: u32,

        /// Object type label
        #[arg(short = 't', long, default_value = "Object")]
        object_type: String,

        /// Allocate the objects already unreachable
        #[arg(long)]
        no_references: bool,
    },

    /// Allocate referenced objects with uniformly random sizes
    AllocateRandom {
        /// Number of objects
        #[arg(short = 'n', long, default_value = "10")]
        count: u32,

        /// Minimum size in KB
        #[arg(long, default_value = "1")]
        min_size: u32,

        /// Maximum size in KB
        #[arg(long, default_value = "100")]
        max_size: u32,

        /// Object type label
        #[arg(short = 't', long, default_value = "RandomObject")]
        object_type: String,

        /// Seed for reproducible sizes
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Mark objects unreachable
    Dereference {
        /// Object ids
        #[arg(required = true, num_args = 1..)]
        ids: Vec<u64>,
    },

    /// Mark a percentage of all objects unreachable
    DereferenceRandom {
        /// Percentage of all objects (0-100)
        percentage: u32,
    },

    /// Allocate a chain of objects that keep each other alive
    Cyclic {
        /// Number of objects in the chain
        #[arg(long, default_value = "5")]
        chain_length: u32,

        /// Size of each object in KB
        #[arg(short, long, default_value = "50")]
        size_kb: u32,
    },

    /// Show the current heap state
    Heap,

    /// List all objects
    Objects,

    /// Record a heap snapshot
    Snapshot,

    /// Show heap snapshot history
    History {
        /// Range start (RFC 3339)
        #[arg(long, requires = "to")]
        from: Option<DateTime<Utc>>,

        /// Range end (RFC 3339)
        #[arg(long, requires = "from")]
        to: Option<DateTime<Utc>>,
    },

    /// Delete every object
    Clear,

    /// Run a garbage collection cycle
    Gc {
        #[arg(value_enum)]
        kind: GcKind,
    },

    /// Show GC event history
    GcHistory,

    /// Analyze the heap history and store a leak report
    Analyze,

    /// List stored leak reports
    Reports,

    /// Show the most recent leak report
    LatestReport,

    /// Run a scripted leak demonstration followed by an analysis
    Scenario {
        /// Number of allocate / release / collect rounds
        #[arg(long, default_value = "5")]
        rounds: u32,

        /// Objects allocated per round
        #[arg(long, default_value = "20")]
        batch: u32,

        /// Size of each object in KB
        #[arg(short, long, default_value = "64")]
        size_kb: u32,

        /// Percentage of each batch released before collecting
        #[arg(long, default_value = "70")]
        release_percent: u32,

        /// Object type label
        #[arg(short = 't', long, default_value = "LeakyCache")]
        object_type: String,

        /// Pause between rounds in milliseconds
        #[arg(long, default_value = "1000")]
        pause_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GcKind {
    Minor,
    Major,
    Full,
}

impl From<GcKind> for CollectionKind {
    fn from(kind: GcKind) -> Self {
        match kind {
            GcKind::Minor => CollectionKind::Minor,
            GcKind::Major => CollectionKind::Major,
            GcKind::Full => CollectionKind::Full,
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", default_level))
        .init();
}

fn load_config(cli: &Cli) -> Result<SimulatorConfig> {
    let config = match &cli.config {
        Some(path) => SimulatorConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SimulatorConfig::default(),
    };
    let mut config = config
        .apply_env_overrides()
        .context("Invalid GCSIM_* environment override")?;
    if let Some(database) = &cli.database {
        config.database_path = database.display().to_string();
    }
    Ok(config)
}

fn open_store(cli: &Cli, config: &SimulatorConfig) -> Result<SharedStore> {
    if cli.in_memory {
        debug!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path))?;
    debug!("Using SQLite store at {}", config.database_path);
    Ok(Arc::new(store))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let store = open_store(&cli, &config)?;

    let simulation = match &cli.command {
        Commands::AllocateRandom { seed: Some(seed), .. } => {
            GcSimulation::with_seed(store, config, *seed)
        }
        _ => GcSimulation::new(store, config),
    };

    match cli.command {
        Commands::Allocate {
            count,
            size_kb,
            object_type,
            no_references,
        } => {
            let request =
                AllocateRequest::new(count, size_kb, object_type).with_references(!no_references);
            let objects = simulation
                .simulation
                .allocate(&request)
                .context("Allocation failed")?;
            print_json(&objects)
        }
        Commands::AllocateRandom {
            count,
            min_size,
            max_size,
            object_type,
            ..
        } => {
            let objects = simulation
                .simulation
                .allocate_random(count, min_size, max_size, &object_type)
                .context("Random allocation failed")?;
            print_json(&objects)
        }
        Commands::Dereference { ids } => {
            let requested = simulation
                .simulation
                .dereference(&DereferenceRequest::new(ids))
                .context("Dereference failed")?;
            print_json(&json!({ "dereferenced": requested }))
        }
        Commands::DereferenceRandom { percentage } => {
            let dereferenced = simulation
                .simulation
                .dereference_random(percentage)
                .context("Random dereference failed")?;
            print_json(&json!({ "dereferenced": dereferenced, "percentage": percentage }))
        }
        Commands::Cyclic {
            chain_length,
            size_kb,
        } => {
            let chain = simulation
                .simulation
                .allocate_cyclic(chain_length, size_kb)
                .context("Cyclic allocation failed")?;
            print_json(&chain)
        }
        Commands::Heap => print_json(&simulation.simulation.heap_state()?),
        Commands::Objects => print_json(&simulation.simulation.objects()?),
        Commands::Snapshot => print_json(&simulation.simulation.create_snapshot()?),
        Commands::History { from, to } => {
            let range = match (from, to) {
                (Some(from), Some(to)) => Some((from, to)),
                (None, None) => None,
                _ => bail!("--from and --to must be given together"),
            };
            print_json(&simulation.simulation.heap_history(range)?)
        }
        Commands::Clear => {
            let removed = simulation.simulation.clear()?;
            print_json(&json!({ "removed": removed }))
        }
        Commands::Gc { kind } => {
            let event = simulation
                .collection
                .run(kind.into())
                .context("Garbage collection failed")?;
            print_json(&event)
        }
        Commands::GcHistory => print_json(&simulation.collection.history()?),
        Commands::Analyze => {
            let report = simulation
                .analysis
                .generate_report()
                .context("Leak analysis failed")?;
            print_json(&report)
        }
        Commands::Reports => print_json(&simulation.analysis.reports()?),
        Commands::LatestReport => print_json(&simulation.analysis.latest_report()?),
        Commands::Scenario {
            rounds,
            batch,
            size_kb,
            release_percent,
            object_type,
            pause_ms,
        } => {
            if release_percent > 100 {
                bail!("--release-percent must be between 0 and 100");
            }
            let plan = scenario::ScenarioPlan {
                rounds,
                batch,
                size_kb,
                release_percent,
                object_type,
                pause: Duration::from_millis(pause_ms),
            };
            info!("Running leak scenario: {:?}", plan);
            let outcome = scenario::run(&simulation, &plan).context("Scenario failed")?;
            print_json(&outcome)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli)
}
