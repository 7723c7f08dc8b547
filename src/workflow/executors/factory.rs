//! Executor factory - picks the executor for each service

use reqwest::Client;
use std::sync::Arc;

use super::conditional::ConditionalExecutor;
use super::module::ModuleExecutor;
use super::passthrough::{EndExecutor, StartExecutor};
use super::remote::RemoteCallExecutor;
use crate::runtime::{Executor, FlowError, Result, TemplateRenderer, WorkflowError};
use crate::workflow::graph::ResolvedService;
use crate::workflow::registry::ModuleRegistry;
use crate::workflow::types::{NodeType, Role};

/// Builds executors from resolved services.
///
/// Role wins over node type: `start` and `end` services pass values
/// through, conditional services evaluate branches, everything else goes
/// by node type.
pub struct ExecutorFactory<'a> {
    registry: &'a ModuleRegistry,
    renderer: Arc<dyn TemplateRenderer>,
    client: Client,
}

impl<'a> ExecutorFactory<'a> {
    pub fn new(registry: &'a ModuleRegistry, renderer: Arc<dyn TemplateRenderer>, client: Client) -> Self {
        Self {
            registry,
            renderer,
            client,
        }
    }

    pub async fn build(&self, service: &ResolvedService) -> Result<Arc<dyn Executor>> {
        match service.role {
            Role::Start => return Ok(Arc::new(StartExecutor)),
            Role::End => return Ok(Arc::new(EndExecutor)),
            _ => {}
        }

        if service.is_conditional() {
            let handler = service.target_handler.clone().ok_or_else(|| {
                WorkflowError::ConditionalType(format!(
                    "{} has role condition but no target_handler",
                    service.key
                ))
            })?;
            return Ok(Arc::new(ConditionalExecutor::new(handler)));
        }

        match service.node_type {
            NodeType::RestApi => {
                let executor = RemoteCallExecutor::new(
                    service.spec.method.as_deref(),
                    &service.connection.base_url,
                    service.spec.path.as_deref(),
                    service.connection.headers.clone(),
                    self.renderer.clone(),
                )?
                .with_client(self.client.clone());
                Ok(Arc::new(executor))
            }
            NodeType::Module | NodeType::Engine => {
                let id = service
                    .spec
                    .module
                    .as_ref()
                    .map(|m| m.id())
                    .unwrap_or_else(|| service.key.clone());
                let module = self
                    .registry
                    .get(&id)
                    .await
                    .ok_or_else(|| FlowError::module_not_found(&id))?;
                log::debug!("{} resolved to module {}", service.key, id);
                Ok(Arc::new(ModuleExecutor::new(module)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{BraceRenderer, ExecutorKind, Module};
    use crate::workflow::graph::GraphModel;
    use crate::workflow::types::WorkflowDefinition;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::error::Error;

    struct Splitter;

    #[async_trait]
    impl Module for Splitter {
        fn id(&self) -> &str {
            "text.tools:Splitter.split"
        }

        async fn invoke(&self, _params: Map<String, Value>) -> std::result::Result<Value, Box<dyn Error + Send + Sync>> {
            Ok(json!([]))
        }
    }

    fn graph() -> GraphModel {
        let def: WorkflowDefinition = serde_yaml::from_str(
            r#"
            nodes:
              entry: { services: { begin: { role: start } } }
              api:
                connection: { base_url: "http://localhost:9000" }
                services:
                  fetch: { method: GET, path: /items }
              text:
                type: module
                services:
                  split:
                    module: { module_path: text.tools, class_name: Splitter, function_name: split }
                  missing:
                    module: { module_path: text.tools, function_name: nope }
              gate:
                services:
                  check:
                    role: condition
                    target_handler: { type: conditional, branches: [{ type: else, target: api.fetch }] }
                  broken: { role: condition }
              exit: { services: { finish: { role: end } } }
            "#,
        )
        .unwrap();
        GraphModel::build(&def).unwrap()
    }

    async fn kind_of(key: &str) -> Result<ExecutorKind> {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(Splitter)).await;
        let factory = ExecutorFactory::new(&registry, Arc::new(BraceRenderer::new()), Client::new());
        let graph = graph();
        let executor = factory.build(graph.service(key).unwrap()).await?;
        Ok(executor.kind())
    }

    #[tokio::test]
    async fn test_selection_by_role_and_type() {
        assert_eq!(kind_of("entry.begin").await.unwrap(), ExecutorKind::Start);
        assert_eq!(kind_of("exit.finish").await.unwrap(), ExecutorKind::End);
        assert_eq!(kind_of("gate.check").await.unwrap(), ExecutorKind::Conditional);
        assert_eq!(kind_of("api.fetch").await.unwrap(), ExecutorKind::RemoteCall);
        assert_eq!(kind_of("text.split").await.unwrap(), ExecutorKind::Module);
    }

    #[tokio::test]
    async fn test_unregistered_module() {
        let err = kind_of("text.missing").await.unwrap_err();
        assert!(matches!(err, FlowError::ModuleNotFound { ref name } if name == "text.tools.nope"));
    }

    #[tokio::test]
    async fn test_condition_without_handler() {
        let err = kind_of("gate.broken").await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::Workflow(WorkflowError::ConditionalType(_))
        ));
    }
}
