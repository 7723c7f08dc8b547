//! svcgraph - a DAG workflow execution engine for service graphs

pub mod runtime;
pub mod workflow;

pub use runtime::{EngineConfig, FlowError, Result};
pub use workflow::{RunReport, RunRequest, WorkflowEngine};
