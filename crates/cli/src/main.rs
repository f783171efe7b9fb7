//! SynthQ CLI - evolutionary chemistry experiment driver.

mod config;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use synthq_core::RunStatus;
use synthq_scheduler::{build_plan, EvoScheduler, FileGateway};
use synthq_sequencer::{
    CommandHandle, DeviceLink, LinkError, LinkOutcome, LinkRegistry, Sequencer,
};
use synthq_store::{JsonStore, PopulationStore};

use config::ExperimentConfig;

#[derive(Parser)]
#[command(name = "synthq")]
#[command(about = "Evolutionary synthesis experiment driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the experiment until every generation is produced
    Run {
        /// Experiment configuration file
        #[arg(long)]
        config: PathBuf,
        /// Experiment data directory
        #[arg(long, default_value = ".synthq")]
        data: PathBuf,
    },
    /// Show the latest generation
    Status {
        /// Experiment data directory
        #[arg(long, default_value = ".synthq")]
        data: PathBuf,
    },
    /// List every recorded generation
    History {
        /// Experiment data directory
        #[arg(long, default_value = ".synthq")]
        data: PathBuf,
    },
    /// Check a configuration file without touching hardware
    Validate {
        /// Experiment configuration file
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, data } => run(&config, &data).await,
        Commands::Status { data } => status(&data).await,
        Commands::History { data } => history(&data).await,
        Commands::Validate { config } => validate_config(&config),
    }
}

async fn run(config_path: &Path, data: &Path) -> Result<()> {
    let config = ExperimentConfig::load(config_path)?;
    config.validate()?;

    let store = JsonStore::new(data.join("population")).await?;
    let registry = build_registry(&config);
    let sequencer = Arc::new(Sequencer::new(registry).with_config(config.sequencer_config()));
    let gateway = Arc::new(FileGateway::new(data.join("samples")));

    let mut scheduler = EvoScheduler::new(
        store,
        sequencer,
        gateway,
        config.recipe_schema(),
        config.layout.clone(),
    )
    .with_config(config.scheduler_config());

    scheduler.run().await?;
    info!("experiment finished");

    if let Some(generation) = scheduler.current() {
        match generation.best_fitness() {
            Some(best) => println!(
                "Generation {} complete, best fitness {best:.4}",
                generation.index
            ),
            None => println!("Generation {} complete, no scored individuals", generation.index),
        }
    }
    Ok(())
}

async fn status(data: &Path) -> Result<()> {
    let store = JsonStore::new(data.join("population")).await?;
    let Some(generation) = store.load_latest().await? else {
        println!("No generations recorded");
        return Ok(());
    };

    println!("Generation {} ({} members)", generation.index, generation.individuals.len());
    for status in [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Completed,
        RunStatus::Failed,
    ] {
        println!("  {status}: {}", generation.count(status));
    }
    match generation.best_fitness() {
        Some(best) => println!("  best fitness: {best:.4}"),
        None => println!("  best fitness: -"),
    }
    Ok(())
}

async fn history(data: &Path) -> Result<()> {
    let store = JsonStore::new(data.join("population")).await?;
    let generations = store.history().await?;

    println!("Generations ({})", generations.len());
    for generation in generations {
        let scored = generation.scored();
        let summary = match generation.best_fitness() {
            Some(best) => {
                let mean = scored.iter().filter_map(|i| i.fitness).sum::<f64>()
                    / scored.len() as f64;
                format!("best {best:.4}, mean {mean:.4}")
            }
            None => "unscored".to_string(),
        };
        println!(
            "  {:>4} | {} members | {} scored | {}",
            generation.index,
            generation.individuals.len(),
            scored.len(),
            summary,
        );
    }
    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    let config = ExperimentConfig::load(config_path)?;
    config.validate()?;

    // Dry-build a plan from mid-range values to exercise the layout.
    let registry = build_registry(&config);
    let values: Vec<f64> = config.schema.iter().map(|b| (b.min + b.max) / 2.0).collect();
    let recipe = config.recipe_schema().recipe_from_values(&values)?;
    let plan = build_plan(&recipe, &config.layout)?;
    synthq_sequencer::validate(&plan, &registry)?;

    println!(
        "Configuration OK: {} parameters, {} plan steps per individual",
        config.schema.len(),
        plan.len()
    );
    Ok(())
}

/// Registry with a simulated link behind every device name in the layout.
///
/// Deployments with real rigs swap in their own [`DeviceLink`]
/// implementations here.
fn build_registry(config: &ExperimentConfig) -> Arc<LinkRegistry> {
    let mut registry = LinkRegistry::new();
    let link = Arc::new(SimulatedLink::default());

    for pump in &config.layout.pumps {
        if !registry.contains(&pump.link) {
            registry.register(pump.link.clone(), link.clone());
        }
    }
    for name in [&config.layout.stirrer_link, &config.layout.wheel_link] {
        if !registry.contains(name) {
            registry.register(name.clone(), link.clone());
        }
    }
    Arc::new(registry)
}

/// Loopback link that acknowledges every command as soon as it is waited on.
///
/// Lets an experiment be exercised end to end without hardware attached.
#[derive(Default)]
struct SimulatedLink {
    counter: AtomicU64,
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn dispatch(
        &self,
        command: &str,
        params: &serde_json::Value,
    ) -> std::result::Result<CommandHandle, LinkError> {
        debug!(command, %params, "simulated dispatch");
        Ok(CommandHandle(self.counter.fetch_add(1, Ordering::Relaxed)))
    }

    async fn wait(&self, _handle: CommandHandle, _timeout: Duration) -> LinkOutcome {
        LinkOutcome::Completed
    }
}
