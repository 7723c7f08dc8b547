// SPDX-License-Identifier: MIT

//! Workflow engine - the entry point that ties the pieces together
//!
//! Holds the current graph model, the module registry and engine settings,
//! and turns each `RunRequest` into an active plan driven by its own
//! orchestrator. Finished reports are kept by request id.

use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::runtime::{BraceRenderer, EngineConfig, LogSink, Result, StatusSink, TemplateRenderer};
use crate::workflow::executors::ExecutorFactory;
use crate::workflow::graph::GraphModel;
use crate::workflow::loader::WorkflowSource;
use crate::workflow::orchestrator::{Orchestrator, RunControl, RunReport};
use crate::workflow::plan::{ActivePlan, RunRequest, ScopePlanner};
use crate::workflow::registry::ModuleRegistry;
use crate::workflow::state::MemoryStore;
use crate::workflow::types::WorkflowDefinition;

pub struct WorkflowEngine {
    graph: RwLock<Arc<GraphModel>>,
    registry: ModuleRegistry,
    config: EngineConfig,
    renderer: Arc<dyn TemplateRenderer>,
    sink: Arc<dyn StatusSink>,
    client: Client,
    reports: Arc<RwLock<HashMap<String, RunReport>>>,
}

impl WorkflowEngine {
    pub fn new(def: &WorkflowDefinition, registry: ModuleRegistry, config: EngineConfig) -> Result<Self> {
        let graph = GraphModel::build(def)?;
        let client = Client::builder().timeout(config.http_timeout()).build()?;
        log::info!(
            "Engine ready: {} services, {} start, {} end",
            graph.services.len(),
            graph.start_nodes.len(),
            graph.end_nodes.len()
        );

        Ok(Self {
            graph: RwLock::new(Arc::new(graph)),
            registry,
            config,
            renderer: Arc::new(BraceRenderer::new()),
            sink: Arc::new(LogSink),
            client,
            reports: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Build an engine from whatever `source` currently holds
    pub fn from_source(source: &dyn WorkflowSource, registry: ModuleRegistry, config: EngineConfig) -> Result<Self> {
        Self::new(&source.load()?, registry, config)
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current graph model; runs already in progress keep the one they began with
    pub async fn graph(&self) -> Arc<GraphModel> {
        self.graph.read().await.clone()
    }

    /// Swap in a new definition. The old graph stays untouched on error.
    pub async fn reload(&self, def: &WorkflowDefinition) -> Result<()> {
        let graph = GraphModel::build(def)?;
        log::info!(
            "Reloaded workflow '{}' with {} services",
            def.name,
            graph.services.len()
        );
        *self.graph.write().await = Arc::new(graph);
        self.reports.write().await.clear();
        Ok(())
    }

    pub async fn reload_from(&self, source: &dyn WorkflowSource) -> Result<()> {
        self.reload(&source.load()?).await
    }

    /// Derive the active plan for `request` without running it
    pub async fn plan(&self, request: &RunRequest) -> Result<ActivePlan> {
        let graph = self.graph().await;
        self.plan_on(&graph, request).await
    }

    /// Run `request` to the end and return its report
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let orchestrator = self.orchestrator(request).await?;
        let report = orchestrator.run().await;
        self.record(report.clone()).await;
        Ok(report)
    }

    /// Start `request` in the background.
    ///
    /// The handle yields the report once the run ends; the report is also
    /// recorded for `status`.
    pub async fn start(&self, request: RunRequest) -> Result<(RunControl, JoinHandle<RunReport>)> {
        let orchestrator = self.orchestrator(request).await?;
        let control = orchestrator.control();
        let reports = self.reports.clone();

        let handle = tokio::spawn(async move {
            let report = orchestrator.run().await;
            reports
                .write()
                .await
                .insert(report.request_id.clone(), report.clone());
            report
        });
        Ok((control, handle))
    }

    /// Report of a finished run, if it is still cached
    pub async fn status(&self, request_id: &str) -> Option<RunReport> {
        self.reports.read().await.get(request_id).cloned()
    }

    async fn record(&self, report: RunReport) {
        self.reports
            .write()
            .await
            .insert(report.request_id.clone(), report);
    }

    async fn plan_on(&self, graph: &GraphModel, request: &RunRequest) -> Result<ActivePlan> {
        let factory = ExecutorFactory::new(&self.registry, self.renderer.clone(), self.client.clone());
        ScopePlanner::new(graph)
            .build(request, &factory, self.config.default_retry_policy())
            .await
    }

    async fn orchestrator(&self, request: RunRequest) -> Result<Orchestrator> {
        let graph = self.graph().await;
        let plan = self.plan_on(&graph, &request).await?;
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        log::debug!(
            "[{}] Planned {} tasks from {:?}",
            request_id,
            plan.tasks.len(),
            plan.start_nodes
        );

        Ok(Orchestrator::new(
            request_id,
            graph,
            plan,
            Arc::new(MemoryStore::new()),
            self.sink.clone(),
            self.renderer.clone(),
            self.config.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FlowError, Module, NullSink, WorkflowError};
    use crate::workflow::loader::WorkflowLoader;
    use crate::workflow::orchestrator::RunStatus;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::error::Error;

    struct Double;

    #[async_trait]
    impl Module for Double {
        fn id(&self) -> &str {
            "math.double"
        }

        async fn invoke(&self, params: Map<String, Value>) -> std::result::Result<Value, Box<dyn Error + Send + Sync>> {
            let n = params
                .get("n")
                .or_else(|| params.get("m"))
                .and_then(Value::as_i64)
                .ok_or("n must be an integer")?;
            Ok(json!({ "n": n * 2 }))
        }
    }

    const ONE: &str = r#"
        name: one
        nodes:
          math:
            type: module
            services:
              double:
                inputs: [{ key: n, type: int, required: true }]
                outputs: [{ key: n, type: int }]
    "#;

    const TWO: &str = r#"
        name: two
        nodes:
          math:
            type: module
            services:
              double:
                inputs: [{ key: n, type: int, required: true }]
                outputs: [{ key: n, type: int }]
              again:
                module: { module_path: math, function_name: double }
                outputs: [{ key: n, type: int }]
        edges:
          - source: math.double
            target: math.again
            data_mapper:
              - { target_key: m, call_method: refer, source: math.double.n }
    "#;

    async fn engine(yaml: &str) -> WorkflowEngine {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(Double)).await;
        let def = WorkflowLoader::parse_yaml(yaml).unwrap();
        WorkflowEngine::new(&def, registry, EngineConfig::default())
            .unwrap()
            .with_sink(Arc::new(NullSink))
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_run_and_status() {
        let engine = engine(ONE).await;
        let request = RunRequest::new(params(json!({"n": 21}))).with_request_id("r-1");

        let report = engine.run(request).await.unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.result, json!({"n": 42}));

        let cached = engine.status("r-1").await.unwrap();
        assert_eq!(cached.result, json!({"n": 42}));
        assert!(engine.status("r-2").await.is_none());
    }

    #[tokio::test]
    async fn test_generated_request_id() {
        let engine = engine(ONE).await;
        let report = engine.run(RunRequest::new(params(json!({"n": 1})))).await.unwrap();
        assert!(Uuid::parse_str(&report.request_id).is_ok());
    }

    #[tokio::test]
    async fn test_reload_swaps_graph() {
        let engine = engine(ONE).await;
        engine
            .run(RunRequest::new(params(json!({"n": 1}))).with_request_id("before"))
            .await
            .unwrap();

        engine.reload(&WorkflowLoader::parse_yaml(TWO).unwrap()).await.unwrap();
        assert_eq!(engine.graph().await.services.len(), 2);
        assert!(engine.status("before").await.is_none());

        let report = engine.run(RunRequest::new(params(json!({"n": 3})))).await.unwrap();
        assert_eq!(report.result, json!({"n": 12}));
    }

    #[tokio::test]
    async fn test_bad_reload_keeps_old_graph() {
        let engine = engine(ONE).await;
        let broken = WorkflowLoader::parse_yaml(
            r#"
            nodes: { a: { services: { run: {} } } }
            edges: [{ source: a.run, target: ghost.run }]
            "#,
        )
        .unwrap();

        assert!(engine.reload(&broken).await.is_err());
        assert_eq!(engine.graph().await.services.len(), 1);
    }

    #[tokio::test]
    async fn test_plan_errors() {
        let engine = engine(ONE).await;

        let missing = engine.plan(&RunRequest::default()).await.unwrap_err();
        assert!(matches!(
            missing,
            FlowError::Workflow(WorkflowError::InvalidInput { ref missing, .. }) if missing == "n"
        ));

        let unknown = engine
            .plan(&RunRequest::new(params(json!({"n": 1}))).from_service("nope.run"))
            .await
            .unwrap_err();
        assert!(matches!(
            unknown,
            FlowError::Workflow(WorkflowError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn test_start_records_report() {
        let engine = engine(ONE).await;
        let (_control, handle) = engine
            .start(RunRequest::new(params(json!({"n": 2}))).with_request_id("bg"))
            .await
            .unwrap();

        let report = handle.await.unwrap();
        assert!(report.is_success());
        assert_eq!(engine.status("bg").await.unwrap().result, json!({"n": 4}));
    }
}
