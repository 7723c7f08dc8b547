use async_trait::async_trait;
use serde_json::{Map, Value};
use std::error::Error;

/// Capability implemented by every in-process module service.
///
/// Modules are registered by identifier in a `ModuleRegistry` and resolved
/// when a plan is built, so a missing module fails the plan instead of the run.
#[async_trait]
pub trait Module: Send + Sync {
    /// Returns the registry identifier (e.g. `text.tools:Splitter.split`)
    fn id(&self) -> &str;

    /// Invoke the module with resolved input parameters
    async fn invoke(&self, params: Map<String, Value>) -> Result<Value, Box<dyn Error + Send + Sync>>;
}
