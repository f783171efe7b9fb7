//! Generation model - a cohort of individuals evaluated together.

use serde::{Deserialize, Serialize};

use crate::id::IndividualId;
use crate::individual::{Individual, RunStatus};
use crate::Time;

/// An ordered cohort of individuals sharing a generation index.
///
/// A generation is closed once every member reaches a terminal status and
/// the next generation has been derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    /// Generation index, starting at zero
    pub index: u32,

    /// RNG seed recorded for reproducibility of this generation's breeding
    pub seed: u64,

    /// Members in creation order
    pub individuals: Vec<Individual>,

    /// Creation timestamp
    pub created_at: Time,
}

impl Generation {
    /// Create a generation from its members.
    pub fn new(index: u32, seed: u64, individuals: Vec<Individual>) -> Self {
        Self { index, seed, individuals, created_at: chrono::Utc::now() }
    }

    /// Members still awaiting execution.
    pub fn pending(&self) -> impl Iterator<Item = &Individual> {
        self.individuals.iter().filter(|i| i.status == RunStatus::Pending)
    }

    /// Whether every member has reached a terminal status.
    pub fn is_settled(&self) -> bool {
        self.individuals.iter().all(|i| i.status.is_terminal())
    }

    /// Members with a measured fitness, eligible for breeding.
    pub fn scored(&self) -> Vec<&Individual> {
        self.individuals
            .iter()
            .filter(|i| i.status == RunStatus::Completed && i.fitness.is_some())
            .collect()
    }

    /// Look up a member by id.
    pub fn get(&self, id: IndividualId) -> Option<&Individual> {
        self.individuals.iter().find(|i| i.id == id)
    }

    /// Look up a member mutably by id.
    pub fn get_mut(&mut self, id: IndividualId) -> Option<&mut Individual> {
        self.individuals.iter_mut().find(|i| i.id == id)
    }

    /// Count members with the given status.
    pub fn count(&self, status: RunStatus) -> usize {
        self.individuals.iter().filter(|i| i.status == status).count()
    }

    /// Best fitness in the generation, if any member is scored.
    pub fn best_fitness(&self) -> Option<f64> {
        self.individuals
            .iter()
            .filter_map(|i| i.fitness)
            .max_by(|a, b| a.total_cmp(b))
    }

    /// Reset any `Running` member back to `Pending`.
    ///
    /// Restart recovery: a run in flight when the process died is re-queued.
    /// Returns how many members were reset.
    pub fn reset_running(&mut self) -> usize {
        let mut reset = 0;
        for ind in &mut self.individuals {
            if ind.status == RunStatus::Running {
                ind.reset_for_rerun();
                reset += 1;
            }
        }
        reset
    }
}
