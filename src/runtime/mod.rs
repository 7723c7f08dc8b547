// SPDX-License-Identifier: MIT

//! Runtime primitives shared by the execution core
//!
//! - `Executor` / `Module` - capabilities a task dispatches through
//! - `FlowError` - typed error hierarchy
//! - `StatusSink` / `TemplateRenderer` - external collaborator boundaries
//! - `EngineConfig` - engine settings

pub mod config;
pub mod error;
pub mod executor;
pub mod module;
pub mod telemetry;
pub mod template;

pub use config::EngineConfig;
pub use error::{FlowError, ParamResolutionError, Result, WorkflowError};
pub use executor::{ExecutionCall, Executor, ExecutorKind};
pub use module::Module;
pub use telemetry::{ChannelSink, LogSink, NullSink, StatusEvent, StatusSink};
pub use template::{is_template, BraceRenderer, TemplateRenderer};
