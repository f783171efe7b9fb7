//! Command sequencer - executes a recipe's command plan against the robot.
//!
//! A plan is a DAG of named device commands. The sequencer validates the
//! graph, then dispatches steps as their dependencies complete: steps on
//! distinct device links run concurrently, steps on the same link are
//! serialized in plan order, and a link never carries more than one
//! outstanding command even when several plans execute at once.

#![warn(missing_docs)]

mod executor;
mod link;
mod validate;

pub use executor::{RunResult, Sequencer, SequencerConfig, StepFailure};
pub use link::{CommandHandle, DeviceLink, LinkError, LinkOutcome, LinkRegistry};
pub use validate::validate;

/// Error type for sequencer operations.
pub type Result<T> = std::result::Result<T, SequencerError>;

/// Errors that can occur while executing a plan.
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    /// The plan's dependency graph is malformed or cyclic
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// An execution task panicked or was cancelled
    #[error("execution task failed: {0}")]
    Task(String),
}
