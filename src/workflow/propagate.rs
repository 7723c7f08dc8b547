//! Skip and block propagation
//!
//! Both passes only touch waiting tasks (PENDING, SCHEDULED, QUEUED) and
//! run to a fixpoint, so re-running them after any transition is harmless.
//!
//! - BLOCKED: a predecessor failed, stopped or is blocked itself, or a
//!   required indirect input references an upstream that ended without
//!   producing it.
//! - SKIPPED: every predecessor is done, none of them feeds this task, and
//!   at least one was skipped or was a conditional that chose another
//!   target.

use crate::runtime::ExecutorKind;
use crate::workflow::graph::GraphModel;
use crate::workflow::params::source_id;
use crate::workflow::plan::ActivePlan;
use crate::workflow::state::ValueStore;
use crate::workflow::task::TaskState;
use crate::workflow::types::{ParamMapping, ReferType};

/// A state change made by propagation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagated {
    pub service_key: String,
    pub state: TaskState,
}

/// Run both passes until nothing changes
pub fn propagate(plan: &mut ActivePlan, graph: &GraphModel, store: &dyn ValueStore) -> Vec<Propagated> {
    let mut changes = Vec::new();
    loop {
        let blocked = block_pass(plan, graph, store);
        let skipped = skip_pass(plan);
        if blocked.is_empty() && skipped.is_empty() {
            break;
        }
        changes.extend(blocked);
        changes.extend(skipped);
    }
    changes
}

/// Whether a missing value for `mapping` must stop `target` from running
pub fn is_required(graph: &GraphModel, target: &str, mapping: &ParamMapping) -> bool {
    mapping.key_required
        || graph
            .service(target)
            .and_then(|s| s.input(&mapping.target_key))
            .is_some_and(|p| p.required)
}

/// Upstream service whose output an indirect mapping reads
pub fn upstream_service(mapping: &ParamMapping) -> Option<String> {
    if mapping.refer_type != ReferType::Indirect {
        return None;
    }
    source_id(mapping).ok().flatten().map(|id| id.service_key)
}

/// Mark one waiting task BLOCKED, recording why
pub fn block_task(plan: &mut ActivePlan, key: &str, reason: String) -> bool {
    let Some(task) = plan.tasks.get_mut(key) else {
        return false;
    };
    if !task.state.is_waiting() || task.transition(TaskState::Blocked).is_err() {
        return false;
    }
    log::warn!("{} blocked: {}", key, reason);
    task.error = Some(reason);
    true
}

/// One sweep of block propagation over every waiting task
pub fn block_pass(plan: &mut ActivePlan, graph: &GraphModel, store: &dyn ValueStore) -> Vec<Propagated> {
    let mut changes = Vec::new();
    loop {
        let mut round = Vec::new();
        for (key, task) in &plan.tasks {
            if !task.state.is_waiting() {
                continue;
            }
            if let Some(reason) = block_reason(plan, graph, store, key) {
                round.push((key.clone(), reason));
            }
        }
        if round.is_empty() {
            break;
        }
        for (key, reason) in round {
            if block_task(plan, &key, reason) {
                changes.push(Propagated {
                    service_key: key,
                    state: TaskState::Blocked,
                });
            }
        }
    }
    changes
}

fn block_reason(plan: &ActivePlan, graph: &GraphModel, store: &dyn ValueStore, key: &str) -> Option<String> {
    for pred in plan.predecessors(key) {
        let state = plan.tasks.get(pred).map(|t| t.state)?;
        if matches!(
            state,
            TaskState::Failed | TaskState::Stopped | TaskState::Blocked
        ) {
            return Some(format!("upstream {} is {}", pred, state));
        }
    }

    for (_, mapping) in plan.inbound_mappings(key) {
        if !is_required(graph, key, mapping) {
            continue;
        }
        let Some(upstream) = upstream_service(mapping) else {
            continue;
        };
        let Some(state) = plan.tasks.get(&upstream).map(|t| t.state) else {
            continue;
        };
        if !matches!(
            state,
            TaskState::Stopped | TaskState::Skipped | TaskState::Blocked | TaskState::Failed
        ) {
            continue;
        }
        if let Ok(Some(id)) = source_id(mapping) {
            if !store.contains(&id) {
                return Some(format!(
                    "required '{}' from {} will never arrive ({} is {})",
                    mapping.target_key, id, upstream, state
                ));
            }
        }
    }
    None
}

/// One sweep of skip propagation over every waiting task
pub fn skip_pass(plan: &mut ActivePlan) -> Vec<Propagated> {
    let mut changes = Vec::new();
    loop {
        let round: Vec<String> = plan
            .tasks
            .iter()
            .filter(|(key, task)| task.state.is_waiting() && should_skip(plan, key))
            .map(|(key, _)| key.clone())
            .collect();
        if round.is_empty() {
            break;
        }
        for key in round {
            if let Some(task) = plan.tasks.get_mut(&key) {
                if task.transition(TaskState::Skipped).is_ok() {
                    log::warn!("{} skipped", key);
                    changes.push(Propagated {
                        service_key: key,
                        state: TaskState::Skipped,
                    });
                }
            }
        }
    }
    changes
}

fn should_skip(plan: &ActivePlan, key: &str) -> bool {
    let preds = plan.predecessors(key);
    if preds.is_empty() {
        return false;
    }

    let mut fed = false;
    let mut skip_source = false;
    for pred in preds {
        let Some(task) = plan.tasks.get(pred) else {
            return false;
        };
        match task.state {
            TaskState::Completed if task.executor_kind == ExecutorKind::Conditional => {
                if task.selected_target.as_deref() == Some(key) {
                    fed = true;
                } else {
                    skip_source = true;
                }
            }
            TaskState::Completed => fed = true,
            TaskState::Skipped => skip_source = true,
            TaskState::Blocked => {}
            _ => return false,
        }
    }
    !fed && skip_source
}
