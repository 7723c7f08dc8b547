//! Start and end executors: both return their inputs unchanged

use async_trait::async_trait;
use serde_json::Value;

use crate::runtime::{ExecutionCall, Executor, ExecutorKind, Result};

/// Returns the validated request parameters
#[derive(Debug, Default)]
pub struct StartExecutor;

#[async_trait]
impl Executor for StartExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Start
    }

    async fn execute(&self, call: &ExecutionCall) -> Result<Value> {
        Ok(Value::Object(call.input_params.clone()))
    }
}

/// Returns the final inputs as the run's result
#[derive(Debug, Default)]
pub struct EndExecutor;

#[async_trait]
impl Executor for EndExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::End
    }

    async fn execute(&self, call: &ExecutionCall) -> Result<Value> {
        Ok(Value::Object(call.input_params.clone()))
    }
}
