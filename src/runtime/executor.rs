use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::error::Result;

/// The way a task's work is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// HTTP call to a remote service
    RemoteCall,
    /// In-process module from the registry
    Module,
    /// Branch selection over a variable context
    Conditional,
    /// Pass-through of validated request parameters
    Start,
    /// Pass-through of final inputs
    End,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorKind::RemoteCall => "remote_call",
            ExecutorKind::Module => "module",
            ExecutorKind::Conditional => "conditional",
            ExecutorKind::Start => "start",
            ExecutorKind::End => "end",
        };
        f.write_str(name)
    }
}

/// Everything an executor needs for one attempt.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCall {
    pub service_key: String,
    pub input_params: Map<String, Value>,
    pub env_params: Map<String, Value>,
    pub asset_params: Map<String, Value>,
}

impl ExecutionCall {
    pub fn new(service_key: impl Into<String>, input_params: Map<String, Value>) -> Self {
        Self {
            service_key: service_key.into(),
            input_params,
            ..Default::default()
        }
    }
}

/// Trait for the units of work a task dispatches to.
///
/// Executors are shared between the orchestrator loop and worker tasks, so
/// they must be `Send + Sync` and must not keep per-run mutable state.
/// Returning `Err` counts as a failed attempt; the task's retry policy
/// decides whether another attempt follows.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Which executor family this is
    fn kind(&self) -> ExecutorKind;

    /// Run one attempt and return the raw result
    async fn execute(&self, call: &ExecutionCall) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        fn kind(&self) -> ExecutorKind {
            ExecutorKind::Module
        }

        async fn execute(&self, call: &ExecutionCall) -> Result<Value> {
            Ok(Value::Object(call.input_params.clone()))
        }
    }

    #[tokio::test]
    async fn test_executor_trait_object() {
        let executor: Box<dyn Executor> = Box::new(EchoExecutor);
        let mut params = Map::new();
        params.insert("q".to_string(), json!("hi"));

        let result = executor
            .execute(&ExecutionCall::new("n.echo", params))
            .await
            .unwrap();

        assert_eq!(executor.kind(), ExecutorKind::Module);
        assert_eq!(result, json!({"q": "hi"}));
    }

    #[test]
    fn test_executor_kind_display() {
        assert_eq!(ExecutorKind::RemoteCall.to_string(), "remote_call");
        assert_eq!(ExecutorKind::Conditional.to_string(), "conditional");
    }
}
