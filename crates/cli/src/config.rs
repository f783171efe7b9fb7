//! Experiment configuration loaded from a TOML file.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use synthq_core::{ParamBound, RecipeSchema};
use synthq_scheduler::{DeviceLayout, FitnessDirection, SchedulerConfig, Selection};
use synthq_sequencer::SequencerConfig;

fn default_step_timeout_secs() -> u64 {
    60
}

fn default_fitness_timeout_secs() -> u64 {
    3600
}

fn default_poll_interval_secs() -> u64 {
    1
}

/// Genetic operator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaConfig {
    /// Scored individuals carried into the next generation
    pub n_survivors: usize,

    /// Softmax temperature for selection and parent draws
    pub temperature: f64,

    /// Per-locus mutation probability
    pub per_locus_rate: f64,

    /// Standard deviation of the Gaussian mutation noise
    pub per_locus_sd: f64,

    /// Survivor selection strategy
    #[serde(default)]
    pub selection: Selection,
}

/// Top-level experiment description.
///
/// One file describes a whole experiment: the search space, the physical
/// rig, and the evolutionary settings. See `demos/experiment.toml` for a
/// complete example.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment RNG seed
    pub seed: u64,

    /// Individuals per generation
    pub population_size: usize,

    /// Generations to produce before stopping
    pub max_generations: u32,

    /// Whether fitness is maximized or minimized
    #[serde(default)]
    pub direction: FitnessDirection,

    /// Per-command hardware timeout, in seconds
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Per-individual fitness measurement deadline, in seconds
    #[serde(default = "default_fitness_timeout_secs")]
    pub fitness_timeout_secs: u64,

    /// Delay between fitness gateway polls, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Genetic operator settings
    pub ga: GaConfig,

    /// Search space: one bounded parameter per reagent
    pub schema: Vec<ParamBound>,

    /// Physical layout of the rig
    pub layout: DeviceLayout,
}

impl ExperimentConfig {
    /// Load and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.population_size == 0 {
            bail!("population_size must be at least 1");
        }
        if self.ga.n_survivors == 0 {
            bail!("ga.n_survivors must be at least 1");
        }
        if self.ga.temperature <= 0.0 {
            bail!("ga.temperature must be positive");
        }
        if !(0.0..=1.0).contains(&self.ga.per_locus_rate) {
            bail!("ga.per_locus_rate must lie in [0, 1]");
        }
        if self.ga.per_locus_sd < 0.0 {
            bail!("ga.per_locus_sd must not be negative");
        }
        if self.schema.is_empty() {
            bail!("schema must declare at least one parameter");
        }
        for bound in &self.schema {
            if bound.min > bound.max {
                bail!(
                    "schema parameter '{}' has min {} above max {}",
                    bound.name,
                    bound.min,
                    bound.max
                );
            }
            if self.layout.pump_link(&bound.name).is_none() {
                bail!("schema parameter '{}' has no pump in the layout", bound.name);
            }
        }
        Ok(())
    }

    /// Search space as a recipe schema.
    pub fn recipe_schema(&self) -> RecipeSchema {
        RecipeSchema::new(self.schema.clone())
    }

    /// Scheduler settings derived from this experiment.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            population_size: self.population_size,
            max_generations: self.max_generations,
            seed: self.seed,
            n_survivors: self.ga.n_survivors,
            temperature: self.ga.temperature,
            per_locus_rate: self.ga.per_locus_rate,
            per_locus_sd: self.ga.per_locus_sd,
            selection: self.ga.selection,
            direction: self.direction,
            fitness_timeout: Duration::from_secs(self.fitness_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }

    /// Sequencer settings derived from this experiment.
    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            step_timeout: Duration::from_secs(self.step_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        seed = 42
        population_size = 8
        max_generations = 5
        direction = "maximize"

        [ga]
        n_survivors = 2
        temperature = 1.0
        per_locus_rate = 0.3
        per_locus_sd = 0.1
        selection = "top_k"

        [[schema]]
        name = "silver"
        min = 0.0
        max = 10.0

        [[schema]]
        name = "gold"
        min = 0.0
        max = 5.0

        [layout]
        stirrer_link = "stirrer"
        wheel_link = "wheel"
        stir_rate = 300.0
        settle_secs = 900

        [[layout.pumps]]
        param = "silver"
        link = "pump_rig"

        [[layout.pumps]]
        param = "gold"
        link = "pump_rig"
    "#;

    fn example() -> ExperimentConfig {
        toml::from_str(EXAMPLE).unwrap()
    }

    #[test]
    fn load_reads_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");
        std::fs::write(&path, EXAMPLE).unwrap();

        let config = ExperimentConfig::load(&path).unwrap();
        assert_eq!(config.max_generations, 5);
    }

    #[test]
    fn load_rejects_missing_file() {
        assert!(ExperimentConfig::load("/nonexistent/experiment.toml").is_err());
    }

    #[test]
    fn example_config_parses_and_validates() {
        let config = example();
        config.validate().unwrap();

        assert_eq!(config.seed, 42);
        assert_eq!(config.population_size, 8);
        assert_eq!(config.ga.selection, Selection::TopK);
        assert_eq!(config.schema.len(), 2);
        assert_eq!(config.layout.pump_link("gold"), Some("pump_rig"));
    }

    #[test]
    fn timeouts_default_when_omitted() {
        let config = example();
        assert_eq!(config.step_timeout_secs, 60);
        assert_eq!(config.fitness_timeout_secs, 3600);
        assert_eq!(config.poll_interval_secs, 1);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.fitness_timeout, Duration::from_secs(3600));
        assert_eq!(scheduler.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn zero_population_is_rejected() {
        let mut config = example();
        config.population_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut config = example();
        config.schema[0].min = 20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unpumped_parameter_is_rejected() {
        let mut config = example();
        config.layout.pumps.pop();
        assert!(config.validate().is_err());
    }
}
