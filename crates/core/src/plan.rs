//! Command plan model - the DAG of hardware commands derived from a recipe.

use serde::{Deserialize, Serialize};

/// One named device command with its parameters and precedence constraints.
///
/// Steps reference each other by index within the owning plan; the index
/// order is also the tie-break order when several steps on the same device
/// link become eligible together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStep {
    /// Command name understood by the device link (e.g. "dispense")
    pub command: String,

    /// Logical name of the device link this step targets
    pub link: String,

    /// Command parameters, passed through to the device layer
    pub params: serde_json::Value,

    /// Indices of steps that must complete before this one may start
    pub depends_on: Vec<usize>,
}

impl CommandStep {
    /// Create a step with no dependencies.
    pub fn new(command: impl Into<String>, link: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            command: command.into(),
            link: link.into(),
            params,
            depends_on: Vec::new(),
        }
    }

    /// Add precedence constraints.
    pub fn after(mut self, deps: impl IntoIterator<Item = usize>) -> Self {
        self.depends_on.extend(deps);
        self
    }
}

/// The ordered set of command steps derived from one recipe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Steps, referenced by index
    pub steps: Vec<CommandStep>,
}

impl Plan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step and return its index.
    pub fn push(&mut self, step: CommandStep) -> usize {
        self.steps.push(step);
        self.steps.len() - 1
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of every device link the plan targets, deduplicated.
    pub fn links(&self) -> Vec<&str> {
        let mut links: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !links.contains(&step.link.as_str()) {
                links.push(&step.link);
            }
        }
        links
    }
}
