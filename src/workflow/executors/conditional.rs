use async_trait::async_trait;
use serde_json::{json, Value};

use crate::runtime::{ExecutionCall, Executor, ExecutorKind, Result, WorkflowError};
use crate::workflow::condition::{self, TargetHandler};
use crate::workflow::state::VariableContext;

/// Key holding the chosen target in a conditional result
pub const TARGET_KEY: &str = "target";
/// Key holding the variable context after actions ran
pub const VARIABLES_KEY: &str = "variables";

/// Evaluates a service's branches over its resolved inputs.
///
/// The result is `{"target": <key or null>, "variables": {...}}`.
pub struct ConditionalExecutor {
    handler: TargetHandler,
}

impl ConditionalExecutor {
    pub fn new(handler: TargetHandler) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl Executor for ConditionalExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Conditional
    }

    async fn execute(&self, call: &ExecutionCall) -> Result<Value> {
        let mut ctx = VariableContext::from_map(call.input_params.clone());
        let decision = condition::evaluate(&self.handler, &mut ctx)?;

        if !decision.is_satisfied() {
            log::info!(
                "{}",
                WorkflowError::NoSatisfiedBranch {
                    service: call.service_key.clone()
                }
            );
        }

        Ok(json!({
            TARGET_KEY: decision.target,
            VARIABLES_KEY: ctx.into_map(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> TargetHandler {
        serde_yaml::from_str(
            r#"
            type: conditional
            branches:
              - type: if
                rules: [{ variable: x, operator: ">", value: 5 }]
                actions: [{ type: set_variable, variable: size, value: big }]
                target: big.run
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_selects_target_and_returns_variables() {
        let exec = ConditionalExecutor::new(handler());
        let inputs = json!({"x": 10}).as_object().cloned().unwrap();
        let out = exec.execute(&ExecutionCall::new("gate.check", inputs)).await.unwrap();
        assert_eq!(
            out,
            json!({"target": "big.run", "variables": {"x": 10, "size": "big"}})
        );
    }

    #[tokio::test]
    async fn test_no_branch_yields_null_target() {
        let exec = ConditionalExecutor::new(handler());
        let inputs = json!({"x": 1}).as_object().cloned().unwrap();
        let out = exec.execute(&ExecutionCall::new("gate.check", inputs)).await.unwrap();
        assert_eq!(out[TARGET_KEY], Value::Null);
    }
}
