// SPDX-License-Identifier: MIT

//! Schema types for workflow definitions
//!
//! A workflow is a set of nodes, each hosting one or more services, plus a
//! flat list of edges between services. Services are addressed externally
//! as `"{node_id}.{service_name}"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::condition::TargetHandler;
use super::params::ParamType;
use super::task::Backoff;

/// Pseudo-source naming an explicit start service
pub const ENTRY: &str = "ENTRY";

/// Immutable workflow snapshot
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// node_id -> node
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

/// Kind of node hosting a set of services
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    #[default]
    RestApi,
    Engine,
    Module,
}

/// Where a service runs relative to the orchestrator loop
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    /// Executed inline by the orchestrator loop
    Inner,
    /// Executed on a spawned worker
    #[default]
    Remote,
}

/// Role a service plays in the graph
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Start,
    End,
    Generation,
    Condition,
    Aggregation,
    #[default]
    Normal,
}

/// A node and the services it hosts
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct NodeSpec {
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    /// Role inherited by services that don't declare one
    pub role: Option<Role>,
    /// Location inherited by services that don't declare one
    pub location: Option<Location>,
    /// Connection templates for remote-call services
    #[serde(default)]
    pub connection: ConnectionSpec,
    /// Node-level env values inherited by every service
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    /// Node-level asset values inherited by every service
    #[serde(default)]
    pub assets: BTreeMap<String, Value>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
}

/// Connection templates (rendered with the service's env/asset params)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct ConnectionSpec {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// One unit of work hosted by a node
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct ServiceSpec {
    #[serde(default)]
    pub inputs: Vec<InputParam>,
    #[serde(default)]
    pub outputs: Vec<OutputParam>,
    pub role: Option<Role>,
    pub location: Option<Location>,
    pub target_handler: Option<TargetHandler>,
    /// Custom result remap applied after output-schema remapping
    #[serde(default)]
    pub result_info: Vec<ResultMapping>,
    /// HTTP method for remote calls (default POST)
    pub method: Option<String>,
    /// Path appended to the node's base URL
    pub path: Option<String>,
    /// Registry reference for module/engine services
    pub module: Option<ModuleRef>,
    pub retry: Option<RetrySpec>,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    #[serde(default)]
    pub assets: BTreeMap<String, Value>,
}

/// Declared input parameter
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InputParam {
    pub key: String,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    pub default: Option<Value>,
}

/// Declared output parameter
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OutputParam {
    pub key: String,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
}

/// Directed data-and-control link between two services
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EdgeSpec {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub data_mapper: Vec<ParamMapping>,
    /// Branch configuration when the target is a conditional service
    pub target_handler: Option<TargetHandler>,
    /// Result remap applied to the target's outputs
    #[serde(default)]
    pub result_info: Vec<ResultMapping>,
}

/// Literal vs. reference mapping
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallMethod {
    Refer,
    #[default]
    Value,
}

/// How a `refer` source is addressed
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReferType {
    /// `source` is a full value id (`I.node.svc.key`)
    Direct,
    /// `source` is an upstream output (`node.svc.key`, read at `O.` prefix)
    #[default]
    Indirect,
}

/// How one target input is produced
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ParamMapping {
    pub target_key: String,
    #[serde(default)]
    pub target_type: ParamType,
    #[serde(default)]
    pub call_method: CallMethod,
    /// Literal value, or an address string for `refer`
    #[serde(default)]
    pub source: Value,
    #[serde(default)]
    pub source_type: ParamType,
    #[serde(default)]
    pub key_required: bool,
    #[serde(default)]
    pub refer_type: ReferType,
}

impl ParamMapping {
    /// Literal mapping
    pub fn value(target_key: &str, source: Value, target_type: ParamType) -> Self {
        Self {
            target_key: target_key.to_string(),
            target_type,
            call_method: CallMethod::Value,
            source,
            source_type: ParamType::Any,
            key_required: false,
            refer_type: ReferType::Indirect,
        }
    }

    /// Reference to an upstream output `service_key.output_key`
    pub fn refer(target_key: &str, source: &str, target_type: ParamType) -> Self {
        Self {
            target_key: target_key.to_string(),
            target_type,
            call_method: CallMethod::Refer,
            source: Value::String(source.to_string()),
            source_type: ParamType::Any,
            key_required: false,
            refer_type: ReferType::Indirect,
        }
    }

    pub fn required(mut self) -> Self {
        self.key_required = true;
        self
    }

    pub fn is_refer(&self) -> bool {
        self.call_method == CallMethod::Refer
    }

    /// Address string of a `refer` mapping
    pub fn source_address(&self) -> Option<&str> {
        if self.is_refer() {
            self.source.as_str()
        } else {
            None
        }
    }
}

/// One entry of a custom result remap
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResultMapping {
    pub key: String,
    #[serde(default)]
    pub call_method: CallMethod,
    /// Literal value, or an address/path for `refer`
    #[serde(default)]
    pub source: Value,
}

/// Registry reference for in-process services
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ModuleRef {
    pub module_path: String,
    pub class_name: Option<String>,
    pub function_name: String,
}

impl ModuleRef {
    /// Registry identifier: `path:Class.func`, or `path.func` without a class
    pub fn id(&self) -> String {
        match &self.class_name {
            Some(class) if !class.is_empty() => {
                format!("{}:{}.{}", self.module_path, class, self.function_name)
            }
            _ => format!("{}.{}", self.module_path, self.function_name),
        }
    }
}

/// Per-service retry overrides
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct RetrySpec {
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<f64>,
    pub backoff: Option<Backoff>,
}
