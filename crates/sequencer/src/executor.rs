//! Topological plan execution against the device links.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use synthq_core::{Plan, RunId};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::link::{DeviceLink, LinkOutcome, LinkRegistry};
use crate::validate::validate;
use crate::{Result, SequencerError};

/// Configuration for plan execution.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Bounded wait for each dispatched command's acknowledgement
    pub step_timeout: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self { step_timeout: Duration::from_secs(60) }
    }
}

/// Why a step failed.
#[derive(Debug, Clone, PartialEq)]
pub enum StepFailure {
    /// No acknowledgement within the step timeout
    Timeout,
    /// The device reported a fault
    Hardware(String),
}

/// Terminal result of executing one plan.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    /// Every step completed
    Success,
    /// At least one step failed; dependents were abandoned
    Failure {
        /// Index of the first step to fail
        failing_step: usize,
        /// Why it failed
        reason: StepFailure,
    },
}

impl RunResult {
    /// Whether the plan completed fully.
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success)
    }
}

/// Executes command plans against a registry of device links.
pub struct Sequencer {
    registry: Arc<LinkRegistry>,
    config: SequencerConfig,
}

impl Sequencer {
    /// Create a sequencer over the given links.
    pub fn new(registry: Arc<LinkRegistry>) -> Self {
        Self { registry, config: SequencerConfig::default() }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: SequencerConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute a plan to completion.
    ///
    /// A step is dispatched once all its dependencies have completed.
    /// Eligible steps on distinct links run concurrently; eligible steps on
    /// the same link go out strictly in plan order. On the first step
    /// failure no further steps are issued, but commands already in flight
    /// run to completion so no actuator is abandoned mid-motion.
    pub async fn execute(&self, plan: &Plan) -> Result<RunResult> {
        validate(plan, &self.registry)?;

        let n = plan.len();
        if n == 0 {
            return Ok(RunResult::Success);
        }

        // Concurrent executions interleave in the logs; the run id ties a
        // plan's lines together.
        let run = RunId::new();
        info!(%run, steps = n, links = ?plan.links(), "executing plan");

        // Validation guarantees every link resolves.
        let mut resolved = Vec::with_capacity(n);
        for step in &plan.steps {
            let entry = self.registry.entry(&step.link).ok_or_else(|| {
                SequencerError::InvalidPlan(format!("unknown link '{}'", step.link))
            })?;
            resolved.push(entry);
        }

        let mut remaining_deps = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (index, step) in plan.steps.iter().enumerate() {
            remaining_deps[index] = step.depends_on.len();
            for &dep in &step.depends_on {
                dependents[dep].push(index);
            }
        }

        // Per-link ready queues keyed by step index, so same-link dispatch
        // order is plan order regardless of completion interleaving.
        let mut ready: HashMap<&str, BTreeSet<usize>> = HashMap::new();
        let mut busy: HashSet<&str> = HashSet::new();
        let mut join_set: JoinSet<(usize, std::result::Result<(), StepFailure>)> =
            JoinSet::new();
        let mut first_failure: Option<(usize, StepFailure)> = None;

        for index in 0..n {
            if remaining_deps[index] == 0 {
                ready.entry(plan.steps[index].link.as_str()).or_default().insert(index);
            }
        }
        for link in plan.links() {
            pump_link(
                link,
                plan,
                &resolved,
                &mut ready,
                &mut busy,
                first_failure.is_some(),
                self.config.step_timeout,
                &mut join_set,
            );
        }

        while let Some(joined) = join_set.join_next().await {
            let (index, outcome) = joined.map_err(|e| SequencerError::Task(e.to_string()))?;
            let link = plan.steps[index].link.as_str();
            busy.remove(link);

            match outcome {
                Ok(()) => {
                    debug!(step = index, link, "step completed");
                    for &dependent in &dependents[index] {
                        remaining_deps[dependent] -= 1;
                        if remaining_deps[dependent] == 0 && first_failure.is_none() {
                            ready
                                .entry(plan.steps[dependent].link.as_str())
                                .or_default()
                                .insert(dependent);
                        }
                    }
                }
                Err(reason) => {
                    warn!(step = index, link, ?reason, "step failed, abandoning dependents");
                    if first_failure.is_none() {
                        first_failure = Some((index, reason));
                        // Stop issuing; whatever is ready but undispatched
                        // stays that way.
                        ready.clear();
                    }
                }
            }

            for link in plan.links() {
                pump_link(
                    link,
                    plan,
                    &resolved,
                    &mut ready,
                    &mut busy,
                    first_failure.is_some(),
                    self.config.step_timeout,
                    &mut join_set,
                );
            }
        }

        match first_failure {
            None => {
                info!(%run, steps = n, "plan succeeded");
                Ok(RunResult::Success)
            }
            Some((failing_step, reason)) => {
                warn!(%run, failing_step, ?reason, "plan failed");
                Ok(RunResult::Failure { failing_step, reason })
            }
        }
    }
}

/// Dispatch the lowest-index ready step on `link`, if the link is idle.
#[allow(clippy::too_many_arguments)]
fn pump_link<'p>(
    link_name: &'p str,
    plan: &'p Plan,
    resolved: &[(Arc<dyn DeviceLink>, Arc<Mutex<()>>)],
    ready: &mut HashMap<&'p str, BTreeSet<usize>>,
    busy: &mut HashSet<&'p str>,
    halted: bool,
    timeout: Duration,
    join_set: &mut JoinSet<(usize, std::result::Result<(), StepFailure>)>,
) {
    if halted || busy.contains(link_name) {
        return;
    }
    let Some(queue) = ready.get_mut(link_name) else { return };
    let Some(&index) = queue.iter().next() else { return };
    queue.remove(&index);
    busy.insert(link_name);

    let step = plan.steps[index].clone();
    let (link, gate) = (Arc::clone(&resolved[index].0), Arc::clone(&resolved[index].1));

    join_set.spawn(async move {
        // Cross-plan exclusion: the gate serializes every command this
        // link carries, whichever plan issued it.
        let _guard = gate.lock().await;
        debug!(step = index, command = %step.command, link = %step.link, "dispatching");

        let handle = match link.dispatch(&step.command, &step.params).await {
            Ok(handle) => handle,
            Err(e) => return (index, Err(StepFailure::Hardware(e.to_string()))),
        };

        match link.wait(handle, timeout).await {
            LinkOutcome::Completed => (index, Ok(())),
            LinkOutcome::TimedOut => (index, Err(StepFailure::Timeout)),
            LinkOutcome::Error(detail) => (index, Err(StepFailure::Hardware(detail))),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{CommandHandle, LinkError};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use synthq_core::CommandStep;

    /// What a fake link does with one command.
    #[derive(Clone)]
    enum Behavior {
        Ok(Duration),
        Timeout,
        Error(String),
    }

    /// Programmable device link that records dispatch order and tracks how
    /// many commands are outstanding at once.
    struct FakeLink {
        behaviors: HashMap<String, Behavior>,
        log: Arc<StdMutex<Vec<String>>>,
        next_handle: AtomicU64,
        pending: StdMutex<HashMap<u64, (String, Behavior)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeLink {
        fn new(log: Arc<StdMutex<Vec<String>>>) -> Self {
            Self {
                behaviors: HashMap::new(),
                log,
                next_handle: AtomicU64::new(0),
                pending: StdMutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn behavior(mut self, command: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(command.to_string(), behavior);
            self
        }

        fn max_outstanding(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl DeviceLink for FakeLink {
        async fn dispatch(
            &self,
            command: &str,
            _params: &serde_json::Value,
        ) -> std::result::Result<CommandHandle, LinkError> {
            let outstanding = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(outstanding, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("start {command}"));

            let behavior = self
                .behaviors
                .get(command)
                .cloned()
                .unwrap_or(Behavior::Ok(Duration::from_millis(1)));
            let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
            self.pending
                .lock()
                .unwrap()
                .insert(handle, (command.to_string(), behavior));
            Ok(CommandHandle(handle))
        }

        async fn wait(&self, handle: CommandHandle, timeout: Duration) -> LinkOutcome {
            let (command, behavior) = self
                .pending
                .lock()
                .unwrap()
                .remove(&handle.0)
                .expect("wait on unknown handle");

            let outcome = match behavior {
                Behavior::Ok(delay) => {
                    tokio::time::sleep(delay).await;
                    LinkOutcome::Completed
                }
                Behavior::Timeout => {
                    tokio::time::sleep(timeout).await;
                    LinkOutcome::TimedOut
                }
                Behavior::Error(detail) => LinkOutcome::Error(detail),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("end {command}"));
            outcome
        }
    }

    fn position(log: &[String], entry: &str) -> usize {
        log.iter().position(|e| e == entry).unwrap_or_else(|| {
            panic!("'{entry}' not found in {log:?}");
        })
    }

    fn sequencer(registry: LinkRegistry) -> Sequencer {
        Sequencer::new(Arc::new(registry)).with_config(SequencerConfig {
            step_timeout: Duration::from_millis(100),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn respects_dependency_edges() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let pumps = Arc::new(
            FakeLink::new(log.clone())
                .behavior("dispense_silver", Behavior::Ok(Duration::from_millis(20)))
                .behavior("dispense_gold", Behavior::Ok(Duration::from_millis(5))),
        );
        let wheel = Arc::new(
            FakeLink::new(log.clone())
                .behavior("stir", Behavior::Ok(Duration::from_millis(5))),
        );

        let mut registry = LinkRegistry::new();
        registry.register("pump_rig", pumps);
        registry.register("wheel", wheel);

        let mut plan = Plan::new();
        let a = plan.push(CommandStep::new("dispense_silver", "pump_rig", serde_json::json!({})));
        let b = plan.push(CommandStep::new("dispense_gold", "pump_rig", serde_json::json!({})));
        plan.push(CommandStep::new("stir", "wheel", serde_json::json!({})).after([a, b]));

        let result = sequencer(registry).execute(&plan).await.unwrap();
        assert_eq!(result, RunResult::Success);

        let log = log.lock().unwrap();
        let stir = position(&log, "start stir");
        assert!(position(&log, "end dispense_silver") < stir);
        assert!(position(&log, "end dispense_gold") < stir);
    }

    #[tokio::test]
    async fn cyclic_plan_rejected_before_any_dispatch() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut registry = LinkRegistry::new();
        registry.register("pump_rig", Arc::new(FakeLink::new(log.clone())));

        let mut plan = Plan::new();
        plan.push(CommandStep::new("a", "pump_rig", serde_json::json!({})).after([1]));
        plan.push(CommandStep::new("b", "pump_rig", serde_json::json!({})).after([0]));

        let result = sequencer(registry).execute(&plan).await;
        assert!(matches!(result, Err(SequencerError::InvalidPlan(_))));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_abandons_dependents_and_reports_failing_step() {
        // Scenario: C depends on A and B; A completes, B times out.
        let log = Arc::new(StdMutex::new(Vec::new()));
        let link_a = Arc::new(
            FakeLink::new(log.clone())
                .behavior("a", Behavior::Ok(Duration::from_millis(1))),
        );
        let link_b = Arc::new(FakeLink::new(log.clone()).behavior("b", Behavior::Timeout));

        let mut registry = LinkRegistry::new();
        registry.register("link_a", link_a);
        registry.register("link_b", link_b);

        let mut plan = Plan::new();
        let a = plan.push(CommandStep::new("a", "link_a", serde_json::json!({})));
        let b = plan.push(CommandStep::new("b", "link_b", serde_json::json!({})));
        plan.push(CommandStep::new("c", "link_a", serde_json::json!({})).after([a, b]));

        let result = sequencer(registry).execute(&plan).await.unwrap();
        assert_eq!(
            result,
            RunResult::Failure { failing_step: b, reason: StepFailure::Timeout }
        );

        let log = log.lock().unwrap();
        assert!(log.iter().any(|e| e == "end a"));
        assert!(!log.iter().any(|e| e == "start c"));
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_error_abandons_dependents() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let link = Arc::new(
            FakeLink::new(log.clone())
                .behavior("a", Behavior::Error("stall".into()))
                .behavior("b", Behavior::Ok(Duration::from_millis(1))),
        );
        let mut registry = LinkRegistry::new();
        registry.register("pump_rig", link);

        let mut plan = Plan::new();
        let a = plan.push(CommandStep::new("a", "pump_rig", serde_json::json!({})));
        plan.push(CommandStep::new("b", "pump_rig", serde_json::json!({})).after([a]));

        let result = sequencer(registry).execute(&plan).await.unwrap();
        assert_eq!(
            result,
            RunResult::Failure {
                failing_step: a,
                reason: StepFailure::Hardware("stall".into())
            }
        );
        assert!(!log.lock().unwrap().iter().any(|e| e == "start b"));
    }

    #[tokio::test(start_paused = true)]
    async fn inflight_independent_branch_finishes_after_failure() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let fast = Arc::new(FakeLink::new(log.clone()).behavior("boom", Behavior::Timeout));
        let slow = Arc::new(
            FakeLink::new(log.clone())
                .behavior("slow", Behavior::Ok(Duration::from_millis(500))),
        );

        let mut registry = LinkRegistry::new();
        registry.register("fast", fast);
        registry.register("slow", slow);

        let mut plan = Plan::new();
        plan.push(CommandStep::new("boom", "fast", serde_json::json!({})));
        plan.push(CommandStep::new("slow", "slow", serde_json::json!({})));

        let result = sequencer(registry).execute(&plan).await.unwrap();
        assert_eq!(
            result,
            RunResult::Failure { failing_step: 0, reason: StepFailure::Timeout }
        );
        // The independent command already in flight ran to completion.
        assert!(log.lock().unwrap().iter().any(|e| e == "end slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn same_link_steps_serialize_in_plan_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let link = Arc::new(
            FakeLink::new(log.clone())
                .behavior("s0", Behavior::Ok(Duration::from_millis(10)))
                .behavior("s1", Behavior::Ok(Duration::from_millis(10)))
                .behavior("s2", Behavior::Ok(Duration::from_millis(10))),
        );
        let mut registry = LinkRegistry::new();
        registry.register("pump_rig", link.clone());

        let mut plan = Plan::new();
        plan.push(CommandStep::new("s0", "pump_rig", serde_json::json!({})));
        plan.push(CommandStep::new("s1", "pump_rig", serde_json::json!({})));
        plan.push(CommandStep::new("s2", "pump_rig", serde_json::json!({})));

        let result = sequencer(registry).execute(&plan).await.unwrap();
        assert_eq!(result, RunResult::Success);
        assert_eq!(link.max_outstanding(), 1);

        let log = log.lock().unwrap();
        assert!(position(&log, "start s0") < position(&log, "start s1"));
        assert!(position(&log, "start s1") < position(&log, "start s2"));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_links_run_concurrently() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let a = Arc::new(
            FakeLink::new(log.clone())
                .behavior("a", Behavior::Ok(Duration::from_millis(50))),
        );
        let b = Arc::new(
            FakeLink::new(log.clone())
                .behavior("b", Behavior::Ok(Duration::from_millis(50))),
        );
        let mut registry = LinkRegistry::new();
        registry.register("link_a", a);
        registry.register("link_b", b);

        let mut plan = Plan::new();
        plan.push(CommandStep::new("a", "link_a", serde_json::json!({})));
        plan.push(CommandStep::new("b", "link_b", serde_json::json!({})));

        let started = tokio::time::Instant::now();
        let result = sequencer(registry).execute(&plan).await.unwrap();
        assert_eq!(result, RunResult::Success);
        // Serial execution would take 100ms of virtual time.
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn two_plans_never_overlap_on_one_link() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let link = Arc::new(
            FakeLink::new(log.clone())
                .behavior("x", Behavior::Ok(Duration::from_millis(10)))
                .behavior("y", Behavior::Ok(Duration::from_millis(10))),
        );
        let mut registry = LinkRegistry::new();
        registry.register("pump_rig", link.clone());
        let seq = sequencer(registry);

        let mut plan_one = Plan::new();
        plan_one.push(CommandStep::new("x", "pump_rig", serde_json::json!({})));
        plan_one.push(CommandStep::new("x", "pump_rig", serde_json::json!({})));

        let mut plan_two = Plan::new();
        plan_two.push(CommandStep::new("y", "pump_rig", serde_json::json!({})));
        plan_two.push(CommandStep::new("y", "pump_rig", serde_json::json!({})));

        let (one, two) = tokio::join!(seq.execute(&plan_one), seq.execute(&plan_two));
        assert_eq!(one.unwrap(), RunResult::Success);
        assert_eq!(two.unwrap(), RunResult::Success);
        assert_eq!(link.max_outstanding(), 1);
    }

    #[tokio::test]
    async fn empty_plan_succeeds() {
        let registry = LinkRegistry::new();
        let result = sequencer(registry).execute(&Plan::new()).await.unwrap();
        assert_eq!(result, RunResult::Success);
    }
}
