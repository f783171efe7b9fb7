//! Synthq core data models.
//!
//! This crate defines the shared data structures for the evolutionary
//! synthesis orchestrator: recipes, individuals, generations, and the
//! command plans executed against the robot hardware.

#![warn(missing_docs)]

// Core identities
mod id;

// Experiment parametrization
mod recipe;

// Population bookkeeping
mod individual;
mod generation;

// Hardware command plans
mod plan;

// Re-exports
pub use id::*;

pub use recipe::{ParamBound, Recipe, RecipeError, RecipeParam, RecipeSchema};

pub use individual::{
    BreedOperator, FailureDetail, Individual, Lineage, RunStatus, StatusError,
};
pub use generation::Generation;

pub use plan::{CommandStep, Plan};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
