//! Graph derivation from a workflow definition

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::runtime::{Result, WorkflowError};
use crate::workflow::condition::TargetHandler;
use crate::workflow::types::{
    ConnectionSpec, EdgeSpec, InputParam, Location, NodeType, ParamMapping, ResultMapping, Role,
    ServiceSpec, WorkflowDefinition, ENTRY,
};

/// `service_key -> [service_key]`, successors in edge declaration order
pub type Adjacency = BTreeMap<String, Vec<String>>;

/// `source -> target -> ordered mappings`
pub type EdgeParamMap = BTreeMap<String, BTreeMap<String, Vec<ParamMapping>>>;

/// A service with its node-level attributes folded in
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedService {
    pub key: String,
    pub node_id: String,
    pub service_name: String,
    pub node_type: NodeType,
    pub role: Role,
    pub location: Location,
    pub connection: ConnectionSpec,
    pub env: BTreeMap<String, Value>,
    pub assets: BTreeMap<String, Value>,
    pub spec: ServiceSpec,
    /// Service-level handler, or one supplied by an inbound edge
    pub target_handler: Option<TargetHandler>,
    /// Service-level remap rules followed by inbound edge rules
    pub result_info: Vec<ResultMapping>,
}

impl ResolvedService {
    pub fn is_conditional(&self) -> bool {
        self.role == Role::Condition || self.target_handler.is_some()
    }

    pub fn input(&self, key: &str) -> Option<&InputParam> {
        self.spec.inputs.iter().find(|p| p.key == key)
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = &InputParam> {
        self.spec.inputs.iter().filter(|p| p.required)
    }
}

/// Derived, immutable view of a workflow definition
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphModel {
    pub services: BTreeMap<String, ResolvedService>,
    /// Edges between pool services (no `ENTRY` edges)
    pub edges: Vec<EdgeSpec>,
    pub forward_edge_graph: EdgeParamMap,
    pub forward: Adjacency,
    pub backward: Adjacency,
    pub start_nodes: Vec<String>,
    pub end_nodes: Vec<String>,
    /// Start nodes declared explicitly through `ENTRY` edges
    pub entry_nodes: Vec<String>,
}

impl GraphModel {
    /// Build the graph model.
    ///
    /// Fails with `GraphInvalid` when an edge names a service that isn't in
    /// the pool.
    pub fn build(def: &WorkflowDefinition) -> Result<Self> {
        let mut services = service_pool(def);

        let mut edges = Vec::new();
        let mut entry_nodes = BTreeSet::new();
        for edge in &def.edges {
            if !services.contains_key(&edge.target) {
                return Err(dangling(edge, &edge.target));
            }
            if edge.source == ENTRY {
                entry_nodes.insert(edge.target.clone());
                continue;
            }
            if !services.contains_key(&edge.source) {
                return Err(dangling(edge, &edge.source));
            }
            edges.push(edge.clone());
        }

        // Edge-level handlers and result rules belong to the target service
        for edge in &def.edges {
            if let Some(service) = services.get_mut(&edge.target) {
                if service.target_handler.is_none() {
                    service.target_handler = edge.target_handler.clone();
                }
                service.result_info.extend(edge.result_info.iter().cloned());
            }
        }

        let mut forward: Adjacency = services.keys().map(|k| (k.clone(), Vec::new())).collect();
        let mut forward_edge_graph = EdgeParamMap::new();
        for edge in &edges {
            if let Some(successors) = forward.get_mut(&edge.source) {
                if !successors.contains(&edge.target) {
                    successors.push(edge.target.clone());
                }
            }
            forward_edge_graph
                .entry(edge.source.clone())
                .or_default()
                .entry(edge.target.clone())
                .or_default()
                .extend(edge.data_mapper.iter().cloned());
        }

        let backward = invert(&forward);
        let start_nodes = roots(&forward);
        let end_nodes = roots(&backward);

        log::debug!(
            "Graph built: {} services, {} edges, start {:?}, end {:?}",
            services.len(),
            edges.len(),
            start_nodes,
            end_nodes
        );

        Ok(Self {
            services,
            edges,
            forward_edge_graph,
            forward,
            backward,
            start_nodes,
            end_nodes,
            entry_nodes: entry_nodes.into_iter().collect(),
        })
    }

    pub fn service(&self, key: &str) -> Option<&ResolvedService> {
        self.services.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }

    pub fn successors(&self, key: &str) -> &[String] {
        self.forward.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, key: &str) -> &[String] {
        self.backward.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mappings carried by the edge `source -> target`
    pub fn mappings(&self, source: &str, target: &str) -> &[ParamMapping] {
        self.forward_edge_graph
            .get(source)
            .and_then(|targets| targets.get(target))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn service_pool(def: &WorkflowDefinition) -> BTreeMap<String, ResolvedService> {
    let mut pool = BTreeMap::new();
    for (node_id, node) in &def.nodes {
        for (service_name, spec) in &node.services {
            let key = format!("{}.{}", node_id, service_name);

            let mut env = node.env.clone();
            env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));
            let mut assets = node.assets.clone();
            assets.extend(spec.assets.iter().map(|(k, v)| (k.clone(), v.clone())));

            let service = ResolvedService {
                key: key.clone(),
                node_id: node_id.clone(),
                service_name: service_name.clone(),
                node_type: node.node_type,
                role: spec.role.or(node.role).unwrap_or_default(),
                location: spec.location.or(node.location).unwrap_or_default(),
                connection: node.connection.clone(),
                env,
                assets,
                spec: spec.clone(),
                target_handler: spec.target_handler.clone(),
                result_info: spec.result_info.clone(),
            };
            pool.insert(key, service);
        }
    }
    pool
}

fn dangling(edge: &EdgeSpec, missing: &str) -> crate::runtime::FlowError {
    WorkflowError::GraphInvalid {
        source_key: edge.source.clone(),
        target_key: edge.target.clone(),
        missing: missing.to_string(),
    }
    .into()
}

/// Reverse every edge; every key of `graph` stays a key of the result
pub fn invert(graph: &Adjacency) -> Adjacency {
    let mut inverse: Adjacency = graph.keys().map(|k| (k.clone(), Vec::new())).collect();
    for (source, targets) in graph {
        for target in targets {
            let preds = inverse.entry(target.clone()).or_default();
            if !preds.contains(source) {
                preds.push(source.clone());
            }
        }
    }
    inverse
}

/// Keys that never appear as a value, sorted
pub fn roots(graph: &Adjacency) -> Vec<String> {
    let reached: BTreeSet<&String> = graph.values().flatten().collect();
    graph
        .keys()
        .filter(|k| !reached.contains(k))
        .cloned()
        .collect()
}
