// SPDX-License-Identifier: MIT

//! Active plan builder
//!
//! Narrows the graph model to the part a request asks for, rewires request
//! parameters into the edge mappings, validates start-node inputs and
//! creates one `Task` per active service.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::runtime::{Result, WorkflowError};
use crate::workflow::executors::ExecutorFactory;
use crate::workflow::graph::{invert, roots, Adjacency, EdgeParamMap, GraphModel};
use crate::workflow::params::{IoType, ValueId};
use crate::workflow::task::{RetryPolicy, Task};
use crate::workflow::types::{CallMethod, ParamMapping, ReferType};

/// What a caller asks the engine to run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub request_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub params: Map<String, Value>,
}

impl RunRequest {
    pub fn new(params: Map<String, Value>) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn from_service(mut self, key: impl Into<String>) -> Self {
        self.from = Some(key.into());
        self
    }

    pub fn to_service(mut self, key: impl Into<String>) -> Self {
        self.to = Some(key.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// The subgraph and task set for one request
#[derive(Debug, Clone)]
pub struct ActivePlan {
    pub forward: Adjacency,
    pub backward: Adjacency,
    pub start_nodes: Vec<String>,
    pub end_nodes: Vec<String>,
    pub edges_param_map: EdgeParamMap,
    pub tasks: BTreeMap<String, Task>,
    pub params: Map<String, Value>,
}

impl ActivePlan {
    pub fn contains(&self, key: &str) -> bool {
        self.forward.contains_key(key)
    }

    pub fn is_start(&self, key: &str) -> bool {
        self.start_nodes.iter().any(|s| s == key)
    }

    /// Roots of the plan that the run never seeds
    pub fn unseeded(&self) -> Vec<String> {
        roots(&self.forward)
            .into_iter()
            .filter(|k| !self.is_start(k))
            .collect()
    }

    pub fn successors(&self, key: &str) -> &[String] {
        self.forward.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, key: &str) -> &[String] {
        self.backward.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Inbound `(source, mapping)` pairs for `target`, in predecessor order.
    ///
    /// Start nodes also receive mappings on edges from services outside the
    /// plan, except indirect references (those sources never run).
    pub fn inbound_mappings(&self, target: &str) -> Vec<(&str, &ParamMapping)> {
        let mut inbound = Vec::new();
        for pred in self.predecessors(target) {
            if let Some(mappings) = self.edge_mappings(pred, target) {
                inbound.extend(mappings.iter().map(|m| (pred.as_str(), m)));
            }
        }

        if self.is_start(target) {
            for (source, targets) in &self.edges_param_map {
                if self.contains(source) {
                    continue;
                }
                if let Some(mappings) = targets.get(target) {
                    inbound.extend(
                        mappings
                            .iter()
                            .filter(|m| !m.is_refer() || m.refer_type == ReferType::Direct)
                            .map(|m| (source.as_str(), m)),
                    );
                }
            }
        }
        inbound
    }

    fn edge_mappings(&self, source: &str, target: &str) -> Option<&Vec<ParamMapping>> {
        self.edges_param_map.get(source)?.get(target)
    }
}

/// Derives active plans from a graph model
pub struct ScopePlanner<'a> {
    graph: &'a GraphModel,
}

impl<'a> ScopePlanner<'a> {
    pub fn new(graph: &'a GraphModel) -> Self {
        Self { graph }
    }

    /// Forward adjacency of the requested range
    pub fn scope(&self, from: Option<&str>, to: Option<&str>) -> Result<Adjacency> {
        for key in from.iter().chain(to.iter()) {
            if !self.graph.contains(key) {
                return Err(WorkflowError::UnknownService(key.to_string()).into());
            }
        }

        let keep: BTreeSet<String> = match (from, to) {
            (None, None) => return Ok(self.graph.forward.clone()),
            (Some(from), None) => reachable(&self.graph.forward, from),
            (None, Some(to)) => reachable(&self.graph.backward, to),
            (Some(from), Some(to)) if from == to => BTreeSet::from([from.to_string()]),
            (Some(from), Some(to)) => {
                let ahead = reachable(&self.graph.forward, from);
                let behind = reachable(&self.graph.backward, to);
                ahead.intersection(&behind).cloned().collect()
            }
        };

        Ok(keep
            .iter()
            .map(|key| {
                let successors = self
                    .graph
                    .successors(key)
                    .iter()
                    .filter(|s| keep.contains(*s))
                    .cloned()
                    .collect();
                (key.clone(), successors)
            })
            .collect())
    }

    /// Build the plan for `request`, resolving one executor per service
    pub async fn build(
        &self,
        request: &RunRequest,
        factory: &ExecutorFactory<'_>,
        default_policy: RetryPolicy,
    ) -> Result<ActivePlan> {
        let forward = self.scope(request.from.as_deref(), request.to.as_deref())?;
        let backward = invert(&forward);

        let entries: Vec<String> = self
            .graph
            .entry_nodes
            .iter()
            .filter(|k| forward.contains_key(*k))
            .cloned()
            .collect();
        let start_nodes = if request.from.is_none() && !entries.is_empty() {
            entries
        } else {
            roots(&forward)
        };
        if start_nodes.is_empty() {
            return Err(WorkflowError::UndefinedWorkflow.into());
        }
        let end_nodes = roots(&backward);

        self.validate_inputs(&start_nodes, &request.params)?;
        let edges_param_map = self.rewrite_mappings(&start_nodes, &request.params);

        let mut tasks = BTreeMap::new();
        for key in forward.keys() {
            let Some(service) = self.graph.service(key) else {
                return Err(WorkflowError::UnknownService(key.clone()).into());
            };
            let executor = factory.build(service).await?;
            let policy = default_policy.with_overrides(service.spec.retry.as_ref());
            policy.validate(key)?;
            tasks.insert(
                key.clone(),
                Task::new(key.clone(), executor, service.location, policy),
            );
        }

        log::info!(
            "Plan built: {} tasks, start {:?}, end {:?}",
            tasks.len(),
            start_nodes,
            end_nodes
        );

        let plan = ActivePlan {
            forward,
            backward,
            start_nodes,
            end_nodes,
            edges_param_map,
            tasks,
            params: request.params.clone(),
        };
        let unseeded = plan.unseeded();
        if !unseeded.is_empty() {
            log::warn!(
                "{:?} have no predecessors but are not start nodes; they will never run",
                unseeded
            );
        }
        Ok(plan)
    }

    fn validate_inputs(&self, start_nodes: &[String], params: &Map<String, Value>) -> Result<()> {
        for key in start_nodes {
            let Some(service) = self.graph.service(key) else {
                continue;
            };
            if let Some(missing) = service.required_inputs().find(|p| !params.contains_key(&p.key)) {
                return Err(WorkflowError::InvalidInput {
                    service: key.clone(),
                    missing: missing.key.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    // Mappings named after a request parameter read it from a start node's inputs
    fn rewrite_mappings(&self, start_nodes: &[String], params: &Map<String, Value>) -> EdgeParamMap {
        let mut map = self.graph.forward_edge_graph.clone();
        let Some(first_start) = start_nodes.first() else {
            return map;
        };

        for targets in map.values_mut() {
            for (target, mappings) in targets.iter_mut() {
                let start = if start_nodes.contains(target) {
                    target
                } else {
                    first_start
                };
                for mapping in mappings.iter_mut() {
                    if params.contains_key(&mapping.target_key) {
                        let id = ValueId::new(IoType::Input, start, &mapping.target_key);
                        mapping.call_method = CallMethod::Refer;
                        mapping.refer_type = ReferType::Direct;
                        mapping.source = Value::String(id.to_string());
                    }
                }
            }
        }
        map
    }
}

fn reachable(graph: &Adjacency, from: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::from([from.to_string()]);
    let mut queue = VecDeque::from([from.to_string()]);
    while let Some(key) = queue.pop_front() {
        for next in graph.get(&key).into_iter().flatten() {
            if seen.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
    }
    seen
}
