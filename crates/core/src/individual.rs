//! Individual model - a recipe plus its run and fitness bookkeeping.

use serde::{Deserialize, Serialize};

use crate::id::IndividualId;
use crate::recipe::Recipe;
use crate::Time;

/// Run status of an individual's synthesis attempt.
///
/// An individual transitions `Pending -> Running -> {Completed, Failed}`
/// exactly once. Failed individuals are excluded from breeding but retained
/// for provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Not yet executed
    Pending,
    /// Plan currently executing on hardware
    Running,
    /// Plan executed, sample produced
    Completed,
    /// Plan or fitness measurement failed
    Failed,
}

impl RunStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Error raised on an illegal status transition.
#[derive(Debug, thiserror::Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct StatusError {
    /// Status before the attempted transition
    pub from: RunStatus,
    /// Status the transition attempted to reach
    pub to: RunStatus,
}

/// Which operator produced an individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreedOperator {
    /// Random initialisation of generation zero
    Seed,
    /// Carried unchanged from the previous generation
    Survivor,
    /// Bred from two parents (crossover followed by mutation)
    Crossover,
}

/// Provenance of an individual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    /// Parent individuals (empty for seeds)
    pub parents: Vec<IndividualId>,

    /// Operator that produced this individual
    pub operator: BreedOperator,
}

impl Lineage {
    /// Lineage for a randomly seeded individual.
    pub fn seed() -> Self {
        Self { parents: Vec::new(), operator: BreedOperator::Seed }
    }

    /// Lineage for a survivor carried into the next generation.
    pub fn survivor(parent: IndividualId) -> Self {
        Self { parents: vec![parent], operator: BreedOperator::Survivor }
    }

    /// Lineage for a bred child.
    pub fn bred(parents: Vec<IndividualId>) -> Self {
        Self { parents, operator: BreedOperator::Crossover }
    }
}

/// Diagnostic detail recorded when an individual fails.
///
/// Kept on the individual so every failure is auditable from the population
/// record alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureDetail {
    /// A hardware command did not acknowledge within its timeout
    StepTimeout {
        /// Index of the step in the plan
        step: usize,
        /// Command name
        command: String,
        /// Device link the command targeted
        link: String,
    },
    /// The device reported a fault for a command
    StepHardwareError {
        /// Index of the step in the plan
        step: usize,
        /// Command name
        command: String,
        /// Device link the command targeted
        link: String,
        /// Device-reported detail
        detail: String,
    },
    /// The plan was rejected before any command was dispatched
    InvalidPlan {
        /// Validation detail
        detail: String,
    },
    /// The fitness gateway failed or timed out for this individual
    GatewayFailure {
        /// Gateway-reported detail
        detail: String,
    },
}

/// An individual: one recipe plus run status, fitness, and lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    /// Unique identifier
    pub id: IndividualId,

    /// Generation this individual belongs to
    pub generation: u32,

    /// The recipe to execute
    pub recipe: Recipe,

    /// Current run status
    pub status: RunStatus,

    /// Measured fitness, present only after scoring
    pub fitness: Option<f64>,

    /// Provenance
    pub lineage: Lineage,

    /// Failure diagnostics, present only for failed individuals
    pub failure: Option<FailureDetail>,

    /// Creation timestamp
    pub created_at: Time,
}

impl Individual {
    /// Create a pending individual.
    pub fn new(generation: u32, recipe: Recipe, lineage: Lineage) -> Self {
        Self {
            id: IndividualId::new(),
            generation,
            recipe,
            status: RunStatus::Pending,
            fitness: None,
            lineage,
            failure: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Mark the individual as running. Only legal from `Pending`.
    pub fn start_run(&mut self) -> Result<(), StatusError> {
        self.transition(RunStatus::Pending, RunStatus::Running)
    }

    /// Mark the individual's plan as completed. Only legal from `Running`.
    pub fn complete_run(&mut self) -> Result<(), StatusError> {
        self.transition(RunStatus::Running, RunStatus::Completed)
    }

    /// Mark the individual as failed with diagnostics.
    ///
    /// Legal from `Running` (plan failure) and from `Completed` (fitness
    /// gateway failure after a successful run).
    pub fn fail_run(&mut self, detail: FailureDetail) -> Result<(), StatusError> {
        match self.status {
            RunStatus::Running | RunStatus::Completed => {
                self.status = RunStatus::Failed;
                self.failure = Some(detail);
                Ok(())
            }
            from => Err(StatusError { from, to: RunStatus::Failed }),
        }
    }

    /// Record the measured fitness. Only meaningful for completed runs.
    pub fn set_fitness(&mut self, fitness: f64) {
        self.fitness = Some(fitness);
    }

    /// Reset a `Running` individual back to `Pending`.
    ///
    /// Used on restart recovery: an individual left running at crash time is
    /// re-queued for execution from a clean hardware state.
    pub fn reset_for_rerun(&mut self) {
        if self.status == RunStatus::Running {
            self.status = RunStatus::Pending;
        }
    }

    fn transition(&mut self, from: RunStatus, to: RunStatus) -> Result<(), StatusError> {
        if self.status != from {
            return Err(StatusError { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{Recipe, RecipeParam};

    fn individual() -> Individual {
        let recipe = Recipe::new(vec![RecipeParam { name: "silver".into(), value: 1.0 }]);
        Individual::new(0, recipe, Lineage::seed())
    }

    #[test]
    fn lifecycle_pending_running_completed() {
        let mut ind = individual();
        assert_eq!(ind.status, RunStatus::Pending);
        ind.start_run().unwrap();
        assert_eq!(ind.status, RunStatus::Running);
        ind.complete_run().unwrap();
        assert_eq!(ind.status, RunStatus::Completed);
    }

    #[test]
    fn cannot_complete_without_running() {
        let mut ind = individual();
        assert!(ind.complete_run().is_err());
    }

    #[test]
    fn cannot_start_twice() {
        let mut ind = individual();
        ind.start_run().unwrap();
        assert!(ind.start_run().is_err());
    }

    #[test]
    fn gateway_failure_after_completion() {
        let mut ind = individual();
        ind.start_run().unwrap();
        ind.complete_run().unwrap();
        ind.fail_run(FailureDetail::GatewayFailure { detail: "no spectrum".into() })
            .unwrap();
        assert_eq!(ind.status, RunStatus::Failed);
        assert!(ind.failure.is_some());
    }

    #[test]
    fn reset_for_rerun_only_affects_running() {
        let mut ind = individual();
        ind.reset_for_rerun();
        assert_eq!(ind.status, RunStatus::Pending);
        ind.start_run().unwrap();
        ind.reset_for_rerun();
        assert_eq!(ind.status, RunStatus::Pending);
    }
}
