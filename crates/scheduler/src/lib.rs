//! Evolutionary scheduler - drives recipes through synthesis, scoring, and
//! breeding, one generation at a time.
//!
//! The scheduler owns the outer experiment loop: it seeds (or resumes) a
//! population, executes every pending individual's command plan through the
//! sequencer, collects fitness values from the gateway, and breeds the next
//! generation with the configured genetic operators. Every phase boundary is
//! persisted, so a process restart picks up exactly where the previous one
//! stopped.

#![warn(missing_docs)]

mod gateway;
mod planner;
mod scheduler;
mod strategy;

pub use gateway::{FileGateway, FitnessGateway, FitnessHandle, FitnessPoll, GatewayError};
pub use planner::{build_plan, DeviceLayout, LayoutError, PumpChannel};
pub use scheduler::{EvoScheduler, Phase, SchedulerConfig};
pub use strategy::{
    crossover, mutate, seed_values, softmax, softmax_draw, top_k, FitnessDirection, Selection,
};

/// Error type for scheduler operations.
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Errors that abort the experiment loop.
///
/// Per-individual failures never surface here; they are recorded on the
/// individual and the loop continues. Only whole-run problems are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Every individual in a generation lacks a fitness value
    #[error("no scored individuals to breed from in generation {generation}")]
    EmptyBreedingPool {
        /// Index of the generation whose pool is empty
        generation: u32,
    },

    /// The population store failed
    #[error("store failure: {0}")]
    Store(#[from] synthq_store::StoreError),

    /// Bred parameter values could not form a valid recipe
    #[error("recipe failure: {0}")]
    Recipe(#[from] synthq_core::RecipeError),

    /// An individual refused a status transition
    #[error("status failure: {0}")]
    Status(#[from] synthq_core::StatusError),

    /// An execution task panicked or scheduler state is inconsistent
    #[error("scheduler task failed: {0}")]
    Task(String),
}
