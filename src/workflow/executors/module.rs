use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::runtime::{ExecutionCall, Executor, ExecutorKind, FlowError, Module, Result};

/// Dispatches to a registered in-process module
pub struct ModuleExecutor {
    module: Arc<dyn Module>,
}

impl ModuleExecutor {
    pub fn new(module: Arc<dyn Module>) -> Self {
        Self { module }
    }
}

#[async_trait]
impl Executor for ModuleExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Module
    }

    async fn execute(&self, call: &ExecutionCall) -> Result<Value> {
        log::debug!("{} invoking module {}", call.service_key, self.module.id());
        self.module
            .invoke(call.input_params.clone())
            .await
            .map_err(|e| FlowError::executor(&call.service_key, e.to_string()))
    }
}
