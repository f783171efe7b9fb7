//! Plan validation - rejects malformed dependency graphs before dispatch.

use synthq_core::Plan;

use crate::link::LinkRegistry;
use crate::{Result, SequencerError};

/// Validate a plan against the registry.
///
/// Rejects out-of-range or self-referencing dependencies, steps targeting
/// unregistered links, and dependency cycles. Nothing is dispatched for an
/// invalid plan.
pub fn validate(plan: &Plan, registry: &LinkRegistry) -> Result<()> {
    let n = plan.len();

    for (index, step) in plan.steps.iter().enumerate() {
        if !registry.contains(&step.link) {
            return Err(SequencerError::InvalidPlan(format!(
                "step {index} targets unknown link '{}'",
                step.link
            )));
        }
        for &dep in &step.depends_on {
            if dep >= n {
                return Err(SequencerError::InvalidPlan(format!(
                    "step {index} depends on missing step {dep}"
                )));
            }
            if dep == index {
                return Err(SequencerError::InvalidPlan(format!(
                    "step {index} depends on itself"
                )));
            }
        }
    }

    // Kahn peel; anything left after the peel sits on a cycle.
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (index, step) in plan.steps.iter().enumerate() {
        for &dep in &step.depends_on {
            indegree[index] += 1;
            dependents[dep].push(index);
        }
    }

    let mut queue: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut peeled = 0usize;
    while let Some(i) = queue.pop() {
        peeled += 1;
        for &d in &dependents[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                queue.push(d);
            }
        }
    }

    if peeled < n {
        let cycle: Vec<usize> = (0..n).filter(|&i| indegree[i] > 0).collect();
        return Err(SequencerError::InvalidPlan(format!(
            "dependency cycle involving steps {cycle:?}"
        )));
    }

    Ok(())
}
