//! Execution orchestrator
//!
//! One loop per run owns the task map and writes the value store. It pulls
//! jobs off an unbounded FIFO queue and moves the named task one step
//! through its lattice. Remote services run on spawned workers that only
//! report back through the queue; inner services run inline.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::runtime::{
    EngineConfig, ExecutorKind, ParamResolutionError, StatusEvent, StatusSink, TemplateRenderer,
};
use crate::workflow::executors::{TARGET_KEY, VARIABLES_KEY};
use crate::workflow::graph::GraphModel;
use crate::workflow::params::{
    apply_result_mappings, coerce, remap_outputs, resolve, resolve_ambient, source_id, IoType,
    ParamType, ValueId,
};
use crate::workflow::plan::ActivePlan;
use crate::workflow::propagate::{self, block_task, is_required, upstream_service};
use crate::workflow::state::ValueStore;
use crate::workflow::task::{run_with_retry, AttemptOutcome, TaskState};
use crate::workflow::types::{Location, ParamMapping};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task is terminal and none failed or was blocked
    Completed,
    /// Every task is terminal and at least one failed or was blocked
    Failed,
    /// The timeout watcher or an operator ended the run early
    Terminated,
    /// Nothing can make progress and nothing is in flight
    Halted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub state: TaskState,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub request_id: String,
    pub status: RunStatus,
    /// Output of the end task, or `{end_key: output}` when there are several
    pub result: Value,
    pub tasks: BTreeMap<String, TaskSummary>,
    /// Failed or blocked tasks and why
    pub failures: BTreeMap<String, String>,
    /// Every value the run wrote
    pub values: BTreeMap<String, Value>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn state_of(&self, service_key: &str) -> Option<TaskState> {
        self.tasks.get(service_key).map(|t| t.state)
    }
}

#[derive(Debug)]
enum Job {
    Service(String),
    Finished { key: String, outcome: AttemptOutcome },
    Stop(String),
    Pause(String),
    Terminate,
}

/// Operator handle for a running orchestrator
#[derive(Debug, Clone)]
pub struct RunControl {
    tx: mpsc::UnboundedSender<Job>,
}

impl RunControl {
    /// Stop one task; dependents that need it become BLOCKED
    pub fn stop(&self, service_key: &str) -> bool {
        self.tx.send(Job::Stop(service_key.to_string())).is_ok()
    }

    /// Pause one task; its dependents wait until the run halts
    pub fn pause(&self, service_key: &str) -> bool {
        self.tx.send(Job::Pause(service_key.to_string())).is_ok()
    }

    /// End the run, leaving unfinished tasks where they are
    pub fn terminate(&self) -> bool {
        self.tx.send(Job::Terminate).is_ok()
    }
}

pub struct Orchestrator {
    request_id: String,
    graph: Arc<GraphModel>,
    plan: ActivePlan,
    store: Arc<dyn ValueStore>,
    sink: Arc<dyn StatusSink>,
    renderer: Arc<dyn TemplateRenderer>,
    config: EngineConfig,
    tx: mpsc::UnboundedSender<Job>,
    rx: mpsc::UnboundedReceiver<Job>,
    in_queue: HashSet<String>,
    in_flight: HashSet<String>,
}

impl Orchestrator {
    pub fn new(
        request_id: impl Into<String>,
        graph: Arc<GraphModel>,
        plan: ActivePlan,
        store: Arc<dyn ValueStore>,
        sink: Arc<dyn StatusSink>,
        renderer: Arc<dyn TemplateRenderer>,
        config: EngineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            request_id: request_id.into(),
            graph,
            plan,
            store,
            sink,
            renderer,
            config,
            tx,
            rx,
            in_queue: HashSet::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn control(&self) -> RunControl {
        RunControl {
            tx: self.tx.clone(),
        }
    }

    /// Drive the plan until every task is terminal, the run is terminated,
    /// or nothing can make progress.
    pub async fn run(mut self) -> RunReport {
        log::info!(
            "[{}] Run started with {} tasks",
            self.request_id,
            self.plan.tasks.len()
        );

        self.seed();

        let watcher = self.config.run_timeout().map(|deadline| {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                log::warn!("Run deadline of {:?} reached", deadline);
                let _ = tx.send(Job::Terminate);
            })
        });

        let status = self.drive().await;

        if let Some(handle) = watcher {
            handle.abort();
        }
        if !self.in_flight.is_empty() {
            log::warn!(
                "[{}] Discarding {} in-flight results",
                self.request_id,
                self.in_flight.len()
            );
        }

        let report = self.report(status);
        log::info!("[{}] Run finished: {:?}", self.request_id, report.status);
        report
    }

    fn seed(&mut self) {
        let starts = self.plan.start_nodes.clone();
        for start in &starts {
            for (name, value) in &self.plan.params {
                self.store.set(ValueId::input(start, name), value.clone());
            }
        }
        self.propagate();
        for start in starts {
            self.enqueue(&start);
        }
    }

    async fn drive(&mut self) -> RunStatus {
        let mut idle_streak = 0usize;

        loop {
            if self.plan.tasks.values().all(|t| t.state.is_terminal()) {
                return self.final_status();
            }
            if self.in_queue.is_empty() && self.in_flight.is_empty() {
                log::warn!("[{}] Nothing queued or in flight", self.request_id);
                return RunStatus::Halted;
            }

            let Some(job) = self.rx.recv().await else {
                return RunStatus::Terminated;
            };

            match job {
                Job::Terminate => {
                    log::warn!("[{}] Terminated", self.request_id);
                    return RunStatus::Terminated;
                }
                Job::Stop(key) => {
                    self.operator_halt(&key, TaskState::Stopped);
                    idle_streak = 0;
                }
                Job::Pause(key) => {
                    self.operator_halt(&key, TaskState::Paused);
                    idle_streak = 0;
                }
                Job::Finished { key, outcome } => {
                    self.in_flight.remove(&key);
                    self.complete(&key, outcome);
                    idle_streak = 0;
                }
                Job::Service(key) => {
                    self.in_queue.remove(&key);
                    if self.step(&key).await {
                        idle_streak = 0;
                    } else {
                        idle_streak += 1;
                    }
                }
            }

            // A full pass over the queue without progress
            if idle_streak > self.in_queue.len() {
                if self.in_flight.is_empty() {
                    log::warn!("[{}] No task can make progress", self.request_id);
                    return RunStatus::Halted;
                }
                tokio::time::sleep(self.config.poll_interval()).await;
                idle_streak = 0;
            }
        }
    }

    /// Advance one task; returns whether anything changed
    async fn step(&mut self, key: &str) -> bool {
        let Some(state) = self.plan.tasks.get(key).map(|t| t.state) else {
            log::warn!("[{}] Unknown service {} dequeued", self.request_id, key);
            return false;
        };

        let mut progressed = false;
        match state {
            TaskState::Pending => {
                self.transition(key, TaskState::Scheduled);
                self.transition(key, TaskState::Queued);
                progressed = true;
            }
            TaskState::Scheduled => {
                self.transition(key, TaskState::Queued);
                progressed = true;
            }
            TaskState::Queued => {}
            // Re-entrant dispatch and finished tasks are no-ops
            _ => return false,
        }

        if !self.is_ready(key) {
            self.enqueue(key);
            return progressed;
        }

        match self.prepare(key) {
            Ok(()) => {}
            Err(Prepare::NotReady) => {
                self.enqueue(key);
                return progressed;
            }
            Err(Prepare::Blocked(reason)) => {
                if block_task(&mut self.plan, key, reason) {
                    self.emit(key, TaskState::Blocked);
                }
                self.propagate();
                return true;
            }
            Err(Prepare::Failed(message)) => {
                self.fail(key, message);
                self.propagate();
                return true;
            }
        }

        self.transition(key, TaskState::Running);
        self.dispatch(key).await;
        true
    }

    fn is_ready(&self, key: &str) -> bool {
        self.plan.predecessors(key).iter().all(|pred| {
            self.plan
                .tasks
                .get(pred)
                .is_some_and(|t| t.state.is_satisfied())
        })
    }

    /// Resolve inputs, env and assets and record them on the task
    fn prepare(&mut self, key: &str) -> Result<(), Prepare> {
        let Some(service) = self.graph.service(key) else {
            return Err(Prepare::Failed(format!("{} is not in the graph", key)));
        };

        let mut inputs = Map::new();
        if self.plan.is_start(key) {
            for (name, value) in &self.plan.params {
                if service.spec.inputs.is_empty() || service.input(name).is_some() {
                    inputs.insert(name.clone(), value.clone());
                }
            }
        }

        let mappings = self.usable_mappings(key);
        match resolve(key, &mappings, self.store.as_ref()) {
            Ok(resolved) => inputs.extend(resolved),
            Err(ParamResolutionError::NotPreparedPrevJob { address }) => {
                return Err(self.not_prepared(key, &address));
            }
            Err(e) => return Err(Prepare::Failed(e.to_string())),
        }

        for param in &service.spec.inputs {
            if inputs.contains_key(&param.key) {
                continue;
            }
            if let Some(default) = &param.default {
                let value = coerce(default, &ParamType::Any, &param.param_type)
                    .unwrap_or_else(|_| default.clone());
                inputs.insert(param.key.clone(), value);
            }
        }

        let mut variables = self.plan.params.clone();
        variables.extend(inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        let store = self.store.as_ref();
        let renderer = self.renderer.as_ref();
        let env = resolve_ambient(IoType::Env, &service.env, store, renderer, &variables)
            .map_err(|e| Prepare::Failed(e.to_string()))?;
        let assets = resolve_ambient(IoType::Asset, &service.assets, store, renderer, &variables)
            .map_err(|e| Prepare::Failed(e.to_string()))?;

        for (name, value) in &inputs {
            self.store.set(ValueId::input(key, name), value.clone());
        }
        for (name, value) in &env {
            self.store.set(ValueId::env(key, name), value.clone());
        }
        for (name, value) in &assets {
            self.store.set(ValueId::asset(key, name), value.clone());
        }

        if let Some(task) = self.plan.tasks.get_mut(key) {
            task.input_params = inputs;
            task.env_params = env;
            task.asset_params = assets;
        }
        Ok(())
    }

    // Optional references to upstreams that ended without the value are dropped
    fn usable_mappings(&self, key: &str) -> Vec<ParamMapping> {
        self.plan
            .inbound_mappings(key)
            .into_iter()
            .filter(|(_, mapping)| {
                if is_required(&self.graph, key, mapping) {
                    return true;
                }
                let Some(upstream) = upstream_service(mapping) else {
                    return true;
                };
                let upstream_done = self
                    .plan
                    .tasks
                    .get(&upstream)
                    .map_or(true, |t| t.state.is_terminal());
                let present = matches!(source_id(mapping), Ok(Some(id)) if self.store.contains(&id));
                present || !upstream_done
            })
            .map(|(_, mapping)| mapping.clone())
            .collect()
    }

    fn not_prepared(&self, key: &str, address: &str) -> Prepare {
        let upstream = ValueId::parse(address).map(|id| id.service_key).ok();
        let upstream_state = upstream
            .as_deref()
            .and_then(|u| self.plan.tasks.get(u))
            .map(|t| t.state);

        let outcome = match upstream_state {
            Some(state) if !state.is_terminal() => Prepare::NotReady,
            Some(state) => Prepare::Blocked(format!(
                "required value {} missing after upstream ended {}",
                address, state
            )),
            None => Prepare::Blocked(format!(
                "required value {} comes from outside this run",
                address
            )),
        };
        outcome.log(key)
    }

    async fn dispatch(&mut self, key: &str) {
        let Some(task) = self.plan.tasks.get(key) else {
            return;
        };
        let executor = task.executor.clone();
        let call = task.call();
        let policy = task.policy;
        let location = task.location;

        match location {
            Location::Inner => {
                let outcome = run_with_retry(executor, call, policy).await;
                self.complete(key, outcome);
            }
            Location::Remote => {
                self.in_flight.insert(key.to_string());
                let tx = self.tx.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    let outcome = run_with_retry(executor, call, policy).await;
                    // The loop may already be gone after a terminate
                    let _ = tx.send(Job::Finished { key, outcome });
                });
            }
        }
    }

    /// Record an attempt outcome, write outputs, enqueue dependents
    fn complete(&mut self, key: &str, outcome: AttemptOutcome) {
        let Some(task) = self.plan.tasks.get_mut(key) else {
            return;
        };
        if task.state != TaskState::Running {
            log::warn!(
                "[{}] Discarding late result for {} ({})",
                self.request_id,
                key,
                task.state
            );
            return;
        }
        task.retry_count = outcome.retry_count;

        let raw = match outcome.result {
            Ok(raw) => raw,
            Err(e) => {
                self.fail(key, e.to_string());
                self.after_terminal(key);
                return;
            }
        };

        let raw = if task.executor_kind == ExecutorKind::Conditional {
            let selected = raw
                .get(TARGET_KEY)
                .and_then(Value::as_str)
                .map(str::to_string);
            task.selected_target = selected.clone();
            if let Some(target) = selected {
                if !self.plan.successors(key).contains(&target) {
                    log::warn!("{} selected {} which is not downstream", key, target);
                }
            }
            raw.get(VARIABLES_KEY).cloned().unwrap_or(Value::Null)
        } else {
            raw
        };

        let Some(service) = self.graph.service(key) else {
            return;
        };
        let mut outputs = remap_outputs(&raw, &service.spec.outputs);
        apply_result_mappings(&mut outputs, &service.result_info, &raw, self.store.as_ref());

        for (name, value) in &outputs {
            self.store.set(ValueId::output(key, name), value.clone());
        }
        if let Some(task) = self.plan.tasks.get_mut(key) {
            task.result = Some(Value::Object(outputs));
        }
        self.transition(key, TaskState::Completed);
        self.after_terminal(key);
    }

    fn after_terminal(&mut self, key: &str) {
        self.propagate();
        let successors = self.plan.successors(key).to_vec();
        for next in successors {
            if self.plan.tasks.get(&next).is_some_and(|t| t.state.is_waiting()) {
                self.enqueue(&next);
            }
        }
    }

    fn operator_halt(&mut self, key: &str, to: TaskState) {
        let Some(task) = self.plan.tasks.get_mut(key) else {
            log::warn!("[{}] Cannot {} unknown service {}", self.request_id, to, key);
            return;
        };
        if task.state.is_terminal() {
            log::warn!("[{}] {} is already {}", self.request_id, key, task.state);
            return;
        }
        // A late worker result for this task is discarded
        self.in_flight.remove(key);
        self.transition(key, to);
        self.after_terminal(key);
    }

    fn fail(&mut self, key: &str, message: String) {
        log::error!("[{}] {} failed: {}", self.request_id, key, message);
        if let Some(task) = self.plan.tasks.get_mut(key) {
            task.error = Some(message);
        }
        self.transition(key, TaskState::Failed);
    }

    fn propagate(&mut self) {
        let changes = propagate::propagate(&mut self.plan, &self.graph, self.store.as_ref());
        for change in changes {
            self.emit(&change.service_key, change.state);
        }
    }

    fn transition(&mut self, key: &str, to: TaskState) {
        let Some(task) = self.plan.tasks.get_mut(key) else {
            return;
        };
        match task.transition(to) {
            Ok(()) => self.emit(key, to),
            Err(e) => log::warn!("[{}] {}", self.request_id, e),
        }
    }

    fn emit(&self, key: &str, state: TaskState) {
        self.sink
            .emit(StatusEvent::now(&self.request_id, key, state));
    }

    fn enqueue(&mut self, key: &str) {
        if self.in_queue.insert(key.to_string()) {
            log::debug!("[{}] enqueue {}", self.request_id, key);
            let _ = self.tx.send(Job::Service(key.to_string()));
        }
    }

    fn final_status(&self) -> RunStatus {
        let failed = self
            .plan
            .tasks
            .values()
            .any(|t| matches!(t.state, TaskState::Failed | TaskState::Blocked));
        if failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        }
    }

    // Why a task was left behind when the run ended early
    fn unfinished_reason(&self, key: &str, state: TaskState) -> Option<String> {
        match state {
            TaskState::Paused => Some("paused".to_string()),
            TaskState::Running => Some("still running when the run ended".to_string()),
            state if state.is_waiting() => {
                let waiting_on: Vec<String> = self
                    .plan
                    .predecessors(key)
                    .iter()
                    .filter_map(|pred| {
                        let pred_state = self.plan.tasks.get(pred)?.state;
                        (!pred_state.is_satisfied()).then(|| format!("{} ({})", pred, pred_state))
                    })
                    .collect();
                if !waiting_on.is_empty() {
                    Some(format!("waiting on {}", waiting_on.join(", ")))
                } else if self.plan.predecessors(key).is_empty() && !self.plan.is_start(key) {
                    Some("not reachable from any start node".to_string())
                } else {
                    Some(format!("inputs not resolved ({})", state))
                }
            }
            _ => None,
        }
    }

    fn report(&self, status: RunStatus) -> RunReport {
        let tasks = self
            .plan
            .tasks
            .iter()
            .map(|(key, t)| {
                (
                    key.clone(),
                    TaskSummary {
                        state: t.state,
                        retry_count: t.retry_count,
                        error: t.error.clone(),
                    },
                )
            })
            .collect();

        let mut failures: BTreeMap<String, String> = self
            .plan
            .tasks
            .iter()
            .filter(|(_, t)| matches!(t.state, TaskState::Failed | TaskState::Blocked))
            .map(|(key, t)| (key.clone(), t.error.clone().unwrap_or_else(|| t.state.to_string())))
            .collect();
        if matches!(status, RunStatus::Halted | RunStatus::Terminated) {
            for (key, task) in &self.plan.tasks {
                if let Some(reason) = self.unfinished_reason(key, task.state) {
                    failures.insert(key.clone(), reason);
                }
            }
        }

        let end_result = |key: &String| {
            self.plan
                .tasks
                .get(key)
                .and_then(|t| t.result.clone())
                .unwrap_or(Value::Null)
        };
        let result = match self.plan.end_nodes.as_slice() {
            [only] => end_result(only),
            ends => Value::Object(ends.iter().map(|k| (k.clone(), end_result(k))).collect()),
        };

        RunReport {
            request_id: self.request_id.clone(),
            status,
            result,
            tasks,
            failures,
            values: self.store.snapshot(),
        }
    }
}

/// Why a ready task couldn't be prepared
enum Prepare {
    NotReady,
    Blocked(String),
    Failed(String),
}

impl Prepare {
    fn log(self, key: &str) -> Self {
        if let Prepare::Blocked(reason) = &self {
            log::debug!("{} cannot resolve inputs: {}", key, reason);
        }
        self
    }
}
