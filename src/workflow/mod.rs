// SPDX-License-Identifier: MIT

//! Workflow model and execution core
//!
//! This module provides:
//! - Definition types and a YAML/JSON loader
//! - `GraphModel` - the service pool and derived adjacency
//! - `ScopePlanner` / `ActivePlan` - per-run scoping and task creation
//! - `Orchestrator` - the loop that drives tasks to completion
//! - `WorkflowEngine` - the high-level entry point

pub mod condition;
pub mod engine;
pub mod executors;
pub mod graph;
pub mod loader;
pub mod orchestrator;
pub mod params;
pub mod plan;
pub mod propagate;
pub mod registry;
pub mod state;
pub mod task;
pub mod types;

pub use engine::WorkflowEngine;
pub use graph::GraphModel;
pub use loader::{FileWorkflowSource, WorkflowLoader, WorkflowSource};
pub use orchestrator::{Orchestrator, RunControl, RunReport, RunStatus, TaskSummary};
pub use plan::{ActivePlan, RunRequest, ScopePlanner};
pub use registry::ModuleRegistry;
pub use task::{Backoff, RetryPolicy, Task, TaskState};
pub use types::WorkflowDefinition;
