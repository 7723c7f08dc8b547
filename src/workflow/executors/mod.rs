// SPDX-License-Identifier: MIT

//! Concrete executors and the factory that selects one per service

mod conditional;
mod factory;
mod module;
mod passthrough;
mod remote;

pub use conditional::{ConditionalExecutor, TARGET_KEY, VARIABLES_KEY};
pub use factory::ExecutorFactory;
pub use module::ModuleExecutor;
pub use passthrough::{EndExecutor, StartExecutor};
pub use remote::RemoteCallExecutor;
