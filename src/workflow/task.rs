//! Tasks and their state lattice
//!
//! A `Task` is one service occurrence inside one run. Its state only moves
//! forward:
//!
//! ```text
//! PENDING -> SCHEDULED -> QUEUED -> RUNNING -> COMPLETED | FAILED
//! ```
//!
//! with `PAUSED` and `STOPPED` reachable from any non-terminal state by
//! operator action, and `SKIPPED` / `BLOCKED` reachable from the waiting
//! states by propagation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::runtime::config::seconds;
use crate::runtime::{ExecutionCall, Executor, ExecutorKind, FlowError, Result, WorkflowError};
use crate::workflow::types::{Location, RetrySpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Scheduled,
    Queued,
    Running,
    Completed,
    Failed,
    Paused,
    Stopped,
    Skipped,
    Blocked,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed
                | TaskState::Failed
                | TaskState::Paused
                | TaskState::Stopped
                | TaskState::Skipped
                | TaskState::Blocked
        )
    }

    /// Whether a dependent may run after this predecessor
    pub fn is_satisfied(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Skipped)
    }

    /// Not yet dispatched
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            TaskState::Pending | TaskState::Scheduled | TaskState::Queued
        )
    }

    /// Whether `self -> to` is a legal forward move
    pub fn can_transition(self, to: TaskState) -> bool {
        use TaskState::*;
        match (self, to) {
            (Pending, Scheduled) | (Scheduled, Queued) | (Queued, Running) => true,
            (Running, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            (from, Paused | Stopped) => !from.is_terminal(),
            (from, Skipped | Blocked) => from.is_waiting(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "PENDING",
            TaskState::Scheduled => "SCHEDULED",
            TaskState::Queued => "QUEUED",
            TaskState::Running => "RUNNING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Paused => "PAUSED",
            TaskState::Stopped => "STOPPED",
            TaskState::Skipped => "SKIPPED",
            TaskState::Blocked => "BLOCKED",
        };
        f.write_str(name)
    }
}

/// How the per-attempt timeout grows across retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Constant,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout_secs: f64,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Overlay a service's own retry settings on `self`
    pub fn with_overrides(self, spec: Option<&RetrySpec>) -> Self {
        let Some(spec) = spec else {
            return self;
        };
        Self {
            max_retries: spec.max_retries.unwrap_or(self.max_retries),
            timeout_secs: spec.timeout_secs.unwrap_or(self.timeout_secs),
            backoff: spec.backoff.unwrap_or(self.backoff),
        }
    }

    /// Reject timeouts that are not a positive, representable duration
    pub fn validate(&self, service_key: &str) -> Result<()> {
        seconds(&format!("{} retry timeout_secs", service_key), self.timeout_secs).map(|_| ())
    }

    /// Timeout for the attempt made after `retry_count` failures.
    ///
    /// Exponential backoff uses `timeout ^ retry_count` once at least one
    /// attempt has failed.
    pub fn attempt_timeout(&self, retry_count: u32) -> Duration {
        let secs = match self.backoff {
            Backoff::Exponential if retry_count > 0 => {
                self.timeout_secs.powi(retry_count.min(i32::MAX as u32) as i32)
            }
            _ => self.timeout_secs,
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// One service occurrence in a run
#[derive(Clone)]
pub struct Task {
    pub task_id: String,
    pub service_key: String,
    pub executor_kind: ExecutorKind,
    pub executor: Arc<dyn Executor>,
    pub location: Location,
    pub state: TaskState,
    pub retry_count: u32,
    pub policy: RetryPolicy,
    pub env_params: Map<String, Value>,
    pub asset_params: Map<String, Value>,
    pub input_params: Map<String, Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Target chosen by a conditional service
    pub selected_target: Option<String>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("task_id", &self.task_id)
            .field("service_key", &self.service_key)
            .field("executor_kind", &self.executor_kind)
            .field("state", &self.state)
            .field("retry_count", &self.retry_count)
            .field("error", &self.error)
            .finish()
    }
}

impl Task {
    pub fn new(
        service_key: impl Into<String>,
        executor: Arc<dyn Executor>,
        location: Location,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            service_key: service_key.into(),
            executor_kind: executor.kind(),
            executor,
            location,
            state: TaskState::Pending,
            retry_count: 0,
            policy,
            env_params: Map::new(),
            asset_params: Map::new(),
            input_params: Map::new(),
            result: None,
            error: None,
            selected_target: None,
        }
    }

    /// Move to `to`, rejecting anything that isn't a forward step
    pub fn transition(&mut self, to: TaskState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(WorkflowError::InvalidTransition {
                service: self.service_key.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            }
            .into());
        }
        log::debug!("{}: {} -> {}", self.service_key, self.state, to);
        self.state = to;
        Ok(())
    }

    /// Snapshot of the call a worker will make
    pub fn call(&self) -> ExecutionCall {
        ExecutionCall {
            service_key: self.service_key.clone(),
            input_params: self.input_params.clone(),
            env_params: self.env_params.clone(),
            asset_params: self.asset_params.clone(),
        }
    }
}

/// What a worker hands back to the orchestrator loop
#[derive(Debug)]
pub struct AttemptOutcome {
    pub result: Result<Value>,
    /// Failed attempts before the final one
    pub retry_count: u32,
}

/// Run `executor` until it succeeds, fails with a non-retryable error, or
/// runs out of retries.
///
/// `retry_count` grows by one on every failed attempt and the task fails
/// once it exceeds `max_retries`, so `max_retries = n` allows `n + 1`
/// attempts in total.
pub async fn run_with_retry(
    executor: Arc<dyn Executor>,
    call: ExecutionCall,
    policy: RetryPolicy,
) -> AttemptOutcome {
    let mut retry_count = 0;

    loop {
        let timeout = policy.attempt_timeout(retry_count);
        let err = match tokio::time::timeout(timeout, executor.execute(&call)).await {
            Ok(Ok(value)) => {
                return AttemptOutcome {
                    result: Ok(value),
                    retry_count,
                }
            }
            Ok(Err(e)) => e,
            Err(_) => FlowError::Timeout {
                service: call.service_key.clone(),
                after: timeout,
            },
        };

        if !err.is_retryable() {
            return AttemptOutcome {
                result: Err(err),
                retry_count,
            };
        }

        retry_count += 1;
        if retry_count > policy.max_retries {
            log::error!(
                "{} exhausted {} attempts: {}",
                call.service_key,
                retry_count,
                err
            );
            return AttemptOutcome {
                result: Err(WorkflowError::ExceedRetry {
                    service: call.service_key.clone(),
                    attempts: retry_count,
                    last_error: err.to_string(),
                }
                .into()),
                retry_count,
            };
        }

        log::warn!(
            "{} attempt {} failed, retrying: {}",
            call.service_key,
            retry_count,
            err
        );
    }
}
