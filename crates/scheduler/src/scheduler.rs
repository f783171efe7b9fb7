//! The generation loop state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use synthq_core::{
    FailureDetail, Generation, Individual, IndividualId, Lineage, Recipe, RecipeSchema, RunStatus,
};
use synthq_sequencer::{RunResult, Sequencer, SequencerError, StepFailure};
use synthq_store::PopulationStore;

use crate::gateway::{FitnessGateway, FitnessHandle, FitnessPoll};
use crate::planner::{build_plan, DeviceLayout};
use crate::strategy::{self, FitnessDirection, Selection};
use crate::{Result, ScheduleError};

/// Configuration for the evolutionary scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of individuals per generation
    pub population_size: usize,
    /// Total number of generations to produce before stopping
    pub max_generations: u32,
    /// Experiment RNG seed; each generation derives its own seed from it
    pub seed: u64,
    /// How many scored individuals survive into the next generation
    pub n_survivors: usize,
    /// Softmax temperature for probabilistic selection and parent draws
    pub temperature: f64,
    /// Per-locus mutation probability
    pub per_locus_rate: f64,
    /// Standard deviation of the Gaussian mutation noise
    pub per_locus_sd: f64,
    /// Survivor selection strategy
    pub selection: Selection,
    /// Whether fitness is maximized or minimized
    pub direction: FitnessDirection,
    /// How long to wait for one individual's fitness value
    pub fitness_timeout: Duration,
    /// Delay between fitness gateway polls
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            max_generations: 10,
            seed: 0,
            n_survivors: 2,
            temperature: 1.0,
            per_locus_rate: 0.3,
            per_locus_sd: 0.1,
            selection: Selection::Softmax,
            direction: FitnessDirection::Maximize,
            fitness_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Where the scheduler currently is in the generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not yet loaded or seeded a population
    Init,
    /// Executing pending individuals' plans on the hardware
    RunningGeneration,
    /// Collecting fitness values from the gateway
    Scoring,
    /// Deriving the next generation from the scored pool
    Breeding,
    /// The configured number of generations has been produced
    Done,
}

enum WaveOutcome {
    /// Plan completed and the sample was submitted for analysis
    Submitted(FitnessHandle),
    /// The individual failed; diagnostics attached
    Failed(FailureDetail),
    /// The execution machinery itself broke
    Fatal(String),
}

/// Drives the experiment: seed or resume, run, score, breed, repeat.
///
/// Every phase boundary is saved to the store, so a crashed process resumes
/// from the last persisted state. Individuals left `Running` by a crash are
/// reset to `Pending` and re-executed from clean hardware.
pub struct EvoScheduler<S> {
    store: S,
    sequencer: Arc<Sequencer>,
    gateway: Arc<dyn FitnessGateway>,
    schema: RecipeSchema,
    layout: DeviceLayout,
    config: SchedulerConfig,
    phase: Phase,
    current: Option<Generation>,
    handles: HashMap<IndividualId, FitnessHandle>,
}

impl<S: PopulationStore> EvoScheduler<S> {
    /// Create a scheduler with the default configuration.
    pub fn new(
        store: S,
        sequencer: Arc<Sequencer>,
        gateway: Arc<dyn FitnessGateway>,
        schema: RecipeSchema,
        layout: DeviceLayout,
    ) -> Self {
        Self {
            store,
            sequencer,
            gateway,
            schema,
            layout,
            config: SchedulerConfig::default(),
            phase: Phase::Init,
            current: None,
            handles: HashMap::new(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The generation currently being worked on.
    pub fn current(&self) -> Option<&Generation> {
        self.current.as_ref()
    }

    /// The underlying population store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drive the experiment until every generation has been produced.
    pub async fn run(&mut self) -> Result<()> {
        while self.phase != Phase::Done {
            self.step().await?;
        }
        Ok(())
    }

    /// Advance the loop by one phase and return the phase entered.
    pub async fn step(&mut self) -> Result<Phase> {
        match self.phase {
            Phase::Init => self.init().await?,
            Phase::RunningGeneration => self.run_wave().await?,
            Phase::Scoring => self.score().await?,
            Phase::Breeding => self.breed().await?,
            Phase::Done => {}
        }
        Ok(self.phase)
    }

    /// Load the latest generation or seed generation zero.
    async fn init(&mut self) -> Result<()> {
        if self.config.max_generations == 0 {
            self.phase = Phase::Done;
            return Ok(());
        }

        match self.store.load_latest().await? {
            Some(mut generation) => {
                let reset = generation.reset_running();
                if reset > 0 {
                    warn!(
                        generation = generation.index,
                        reset, "requeued individuals left running by a previous process"
                    );
                    self.store.save(&generation).await?;
                }
                info!(generation = generation.index, "resuming experiment");

                self.phase = if !generation.is_settled() {
                    Phase::RunningGeneration
                } else if generation
                    .individuals
                    .iter()
                    .any(|i| i.status == RunStatus::Completed && i.fitness.is_none())
                {
                    Phase::Scoring
                } else {
                    Phase::Breeding
                };
                self.current = Some(generation);
            }
            None => {
                let mut rng = StdRng::seed_from_u64(self.config.seed);
                let mut individuals = Vec::with_capacity(self.config.population_size);
                for _ in 0..self.config.population_size {
                    let values = strategy::seed_values(&self.schema, &mut rng);
                    let recipe = self.schema.recipe_from_values(&values)?;
                    individuals.push(Individual::new(0, recipe, Lineage::seed()));
                }
                let generation = Generation::new(0, self.config.seed, individuals);
                self.store.save(&generation).await?;
                info!(population = generation.individuals.len(), "seeded generation 0");
                self.current = Some(generation);
                self.phase = Phase::RunningGeneration;
            }
        }
        Ok(())
    }

    /// Execute every pending individual's plan, all concurrently.
    async fn run_wave(&mut self) -> Result<()> {
        let generation = self.current.as_mut().ok_or_else(no_generation)?;
        let pending: Vec<IndividualId> = generation.pending().map(|i| i.id).collect();

        for &id in &pending {
            if let Some(individual) = generation.get_mut(id) {
                individual.start_run()?;
            }
        }
        self.store.save(generation).await?;
        info!(
            generation = generation.index,
            individuals = pending.len(),
            "running generation wave"
        );

        let mut tasks = JoinSet::new();
        for &id in &pending {
            let Some(individual) = generation.get(id) else { continue };
            let recipe = individual.recipe.clone();
            let layout = self.layout.clone();
            let sequencer = Arc::clone(&self.sequencer);
            let gateway = Arc::clone(&self.gateway);
            tasks.spawn(async move {
                (id, run_individual(id, recipe, layout, sequencer, gateway).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (id, outcome) = joined.map_err(|e| ScheduleError::Task(e.to_string()))?;
            let generation = self.current.as_mut().ok_or_else(no_generation)?;
            let Some(individual) = generation.get_mut(id) else { continue };
            match outcome {
                WaveOutcome::Submitted(handle) => {
                    individual.complete_run()?;
                    debug!(%id, "plan completed, sample awaiting analysis");
                    self.handles.insert(id, handle);
                }
                WaveOutcome::Failed(detail) => {
                    warn!(%id, ?detail, "individual failed");
                    individual.fail_run(detail)?;
                }
                WaveOutcome::Fatal(message) => return Err(ScheduleError::Task(message)),
            }
        }

        let generation = self.current.as_ref().ok_or_else(no_generation)?;
        self.store.save(generation).await?;
        self.phase = Phase::Scoring;
        Ok(())
    }

    /// Collect a fitness value for every completed, unscored individual.
    async fn score(&mut self) -> Result<()> {
        let ids: Vec<IndividualId> = {
            let generation = self.current.as_ref().ok_or_else(no_generation)?;
            generation
                .individuals
                .iter()
                .filter(|i| i.status == RunStatus::Completed && i.fitness.is_none())
                .map(|i| i.id)
                .collect()
        };
        info!(unscored = ids.len(), "collecting fitness values");

        for id in ids {
            // Resubmission covers restarts, where in-memory handles are lost.
            let handle = match self.handles.get(&id) {
                Some(handle) => handle.clone(),
                None => match self.gateway.submit(id).await {
                    Ok(handle) => {
                        self.handles.insert(id, handle.clone());
                        handle
                    }
                    Err(e) => {
                        self.fail_individual(
                            id,
                            FailureDetail::GatewayFailure { detail: e.to_string() },
                        )?;
                        continue;
                    }
                },
            };

            let verdict =
                tokio::time::timeout(self.config.fitness_timeout, self.await_fitness(&handle))
                    .await;
            match verdict {
                Ok(Ok(fitness)) => {
                    info!(%id, fitness, "individual scored");
                    if let Some(individual) = self.current.as_mut().and_then(|g| g.get_mut(id)) {
                        individual.set_fitness(fitness);
                    }
                }
                Ok(Err(detail)) => {
                    self.fail_individual(id, FailureDetail::GatewayFailure { detail })?;
                }
                Err(_) => {
                    self.fail_individual(
                        id,
                        FailureDetail::GatewayFailure {
                            detail: format!(
                                "no fitness within {:?}",
                                self.config.fitness_timeout
                            ),
                        },
                    )?;
                }
            }
            self.handles.remove(&id);
        }

        let generation = self.current.as_ref().ok_or_else(no_generation)?;
        self.store.save(generation).await?;
        self.phase = Phase::Breeding;
        Ok(())
    }

    async fn await_fitness(&self, handle: &FitnessHandle) -> std::result::Result<f64, String> {
        loop {
            match self.gateway.poll(handle).await {
                Ok(FitnessPoll::Ready(fitness)) => return Ok(fitness),
                Ok(FitnessPoll::Failed(detail)) => return Err(detail),
                Ok(FitnessPoll::Pending) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    fn fail_individual(&mut self, id: IndividualId, detail: FailureDetail) -> Result<()> {
        warn!(%id, ?detail, "individual failed");
        if let Some(individual) = self.current.as_mut().and_then(|g| g.get_mut(id)) {
            individual.fail_run(detail)?;
        }
        Ok(())
    }

    /// Derive the next generation from the scored pool.
    async fn breed(&mut self) -> Result<()> {
        let generation = self.current.as_ref().ok_or_else(no_generation)?;
        if generation.index + 1 >= self.config.max_generations {
            info!(generations = self.config.max_generations, "experiment complete");
            self.phase = Phase::Done;
            return Ok(());
        }

        let pool: Vec<(&Individual, f64)> = generation
            .individuals
            .iter()
            .filter(|i| i.status == RunStatus::Completed)
            .filter_map(|i| i.fitness.map(|f| (i, f)))
            .collect();
        if pool.is_empty() {
            return Err(ScheduleError::EmptyBreedingPool { generation: generation.index });
        }

        let next_index = generation.index + 1;
        // Reseeding per generation keeps breeding replayable across restarts
        // without serializing RNG state.
        let generation_seed = self.config.seed ^ u64::from(next_index);
        let mut rng = StdRng::seed_from_u64(generation_seed);

        let oriented: Vec<f64> = pool
            .iter()
            .map(|(_, fitness)| self.config.direction.orient(*fitness))
            .collect();
        let survivor_count = self.config.n_survivors.clamp(1, pool.len());
        let survivor_indices =
            self.config
                .selection
                .select(&oriented, survivor_count, self.config.temperature, &mut rng);

        let mut next_individuals = Vec::with_capacity(self.config.population_size);
        for &index in survivor_indices.iter().take(self.config.population_size) {
            let (parent, _) = pool[index];
            next_individuals.push(Individual::new(
                next_index,
                parent.recipe.clone(),
                Lineage::survivor(parent.id),
            ));
        }

        let survivor_fitnesses: Vec<f64> =
            survivor_indices.iter().map(|&index| oriented[index]).collect();
        while next_individuals.len() < self.config.population_size {
            let parents =
                strategy::softmax_draw(&survivor_fitnesses, 2, self.config.temperature, &mut rng);
            let (parent1, _) = pool[survivor_indices[parents[0]]];
            let (parent2, _) = pool[survivor_indices[parents[1]]];

            let mut values =
                strategy::crossover(&parent1.recipe.values(), &parent2.recipe.values(), &mut rng);
            strategy::mutate(
                &mut values,
                self.config.per_locus_rate,
                self.config.per_locus_sd,
                &mut rng,
            );
            self.schema.clip(&mut values);
            let recipe = self.schema.recipe_from_values(&values)?;
            next_individuals.push(Individual::new(
                next_index,
                recipe,
                Lineage::bred(vec![parent1.id, parent2.id]),
            ));
        }

        let survivors = survivor_indices.len().min(self.config.population_size);
        let next = Generation::new(next_index, generation_seed, next_individuals);
        self.store.save(&next).await?;
        info!(
            generation = next_index,
            survivors,
            bred = next.individuals.len() - survivors,
            "bred next generation"
        );
        self.handles.clear();
        self.current = Some(next);
        self.phase = Phase::RunningGeneration;
        Ok(())
    }
}

fn no_generation() -> ScheduleError {
    ScheduleError::Task("no active generation".into())
}

/// Execute one individual's plan and submit its sample for analysis.
async fn run_individual(
    id: IndividualId,
    recipe: Recipe,
    layout: DeviceLayout,
    sequencer: Arc<Sequencer>,
    gateway: Arc<dyn FitnessGateway>,
) -> WaveOutcome {
    let plan = match build_plan(&recipe, &layout) {
        Ok(plan) => plan,
        Err(e) => return WaveOutcome::Failed(FailureDetail::InvalidPlan { detail: e.to_string() }),
    };
    debug!(%id, steps = plan.len(), "executing synthesis plan");

    match sequencer.execute(&plan).await {
        Ok(RunResult::Success) => match gateway.submit(id).await {
            Ok(handle) => WaveOutcome::Submitted(handle),
            Err(e) => WaveOutcome::Failed(FailureDetail::GatewayFailure { detail: e.to_string() }),
        },
        Ok(RunResult::Failure { failing_step, reason }) => {
            let step = &plan.steps[failing_step];
            let detail = match reason {
                StepFailure::Timeout => FailureDetail::StepTimeout {
                    step: failing_step,
                    command: step.command.clone(),
                    link: step.link.clone(),
                },
                StepFailure::Hardware(detail) => FailureDetail::StepHardwareError {
                    step: failing_step,
                    command: step.command.clone(),
                    link: step.link.clone(),
                    detail,
                },
            };
            WaveOutcome::Failed(detail)
        }
        Err(SequencerError::InvalidPlan(detail)) => {
            WaveOutcome::Failed(FailureDetail::InvalidPlan { detail })
        }
        Err(SequencerError::Task(message)) => WaveOutcome::Fatal(message),
    }
}
