//! Workflow loader - YAML/JSON file loading and parsing

use std::fs;
use std::path::{Path, PathBuf};

use crate::runtime::{FlowError, Result};
use crate::workflow::types::WorkflowDefinition;

/// Anything that can produce a workflow definition on demand
pub trait WorkflowSource: Send + Sync {
    fn load(&self) -> Result<WorkflowDefinition>;
}

/// Loads workflow definitions from YAML or JSON files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a definition, picking the format from the file extension.
    ///
    /// `.json` is parsed as JSON; `.yaml`, `.yml` and anything else as YAML.
    pub fn load_workflow<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowDefinition> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let def = if is_json {
            Self::parse_json(&content)?
        } else {
            Self::parse_yaml(&content)?
        };
        log::info!(
            "Loaded workflow '{}' from {} ({} nodes, {} edges)",
            def.name,
            path.display(),
            def.nodes.len(),
            def.edges.len()
        );
        Ok(def)
    }

    /// Parse a workflow definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<WorkflowDefinition> {
        let def: WorkflowDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }

    pub fn parse_json(content: &str) -> Result<WorkflowDefinition> {
        let def: WorkflowDefinition = serde_json::from_str(content)?;
        Ok(def)
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-reads a definition file on every `load`
#[derive(Debug, Clone)]
pub struct FileWorkflowSource {
    path: PathBuf,
}

impl FileWorkflowSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkflowSource for FileWorkflowSource {
    fn load(&self) -> Result<WorkflowDefinition> {
        if !self.path.exists() {
            return Err(FlowError::config(format!(
                "Workflow file not found: {}",
                self.path.display()
            )));
        }
        WorkflowLoader::new().load_workflow(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{CallMethod, Location, NodeType, ReferType, Role, ENTRY};
    use serde_json::json;
    use std::io::Write;

    const YAML: &str = r#"
name: orders
description: "Order intake"
nodes:
  intake:
    type: rest-api
    location: inner
    connection:
      base_url: "http://localhost:8080"
      headers: { X-Token: "{{ token }}" }
    env: { region: eu }
    services:
      parse:
        role: start
        method: POST
        path: /parse
        inputs:
          - { key: order_id, type: string, required: true }
          - { key: priority, type: int, default: 1 }
        outputs:
          - { key: items, type: list }
        retry: { max_retries: 2, timeout_secs: 1.5, backoff: exponential }
  pricing:
    type: module
    services:
      quote:
        module: { module_path: pricing.engine, class_name: Quoter, function_name: quote }
edges:
  - source: ENTRY
    target: intake.parse
  - source: intake.parse
    target: pricing.quote
    data_mapper:
      - { target_key: items, call_method: refer, source: intake.parse.items, key_required: true }
      - { target_key: currency, source: EUR }
"#;

    #[test]
    fn test_parse_full_definition() {
        let def = WorkflowLoader::parse_yaml(YAML).unwrap();
        assert_eq!(def.name, "orders");
        assert_eq!(def.nodes.len(), 2);

        let intake = &def.nodes["intake"];
        assert_eq!(intake.node_type, NodeType::RestApi);
        assert_eq!(intake.location, Some(Location::Inner));
        assert_eq!(intake.connection.headers["X-Token"], "{{ token }}");

        let parse = &intake.services["parse"];
        assert_eq!(parse.role, Some(Role::Start));
        assert_eq!(parse.inputs.len(), 2);
        assert!(parse.inputs[0].required);
        assert_eq!(parse.inputs[1].default, Some(json!(1)));
        assert_eq!(parse.retry.as_ref().unwrap().max_retries, Some(2));

        assert_eq!(def.nodes["pricing"].node_type, NodeType::Module);
        let module = def.nodes["pricing"].services["quote"].module.as_ref().unwrap();
        assert_eq!(module.id(), "pricing.engine:Quoter.quote");
    }

    #[test]
    fn test_parse_edges_and_mappings() {
        let def = WorkflowLoader::parse_yaml(YAML).unwrap();
        assert_eq!(def.edges.len(), 2);
        assert_eq!(def.edges[0].source, ENTRY);

        let mappings = &def.edges[1].data_mapper;
        assert_eq!(mappings[0].call_method, CallMethod::Refer);
        assert_eq!(mappings[0].refer_type, ReferType::Indirect);
        assert!(mappings[0].key_required);
        assert_eq!(mappings[1].call_method, CallMethod::Value);
        assert_eq!(mappings[1].source, json!("EUR"));
    }

    #[test]
    fn test_parse_json_definition() {
        let content = r#"{
            "name": "tiny",
            "nodes": { "solo": { "services": { "run": { "role": "end" } } } }
        }"#;
        let def = WorkflowLoader::parse_json(content).unwrap();
        assert_eq!(def.name, "tiny");
        assert!(def.edges.is_empty());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = std::env::temp_dir().join(format!("svcgraph-loader-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let yaml_path = dir.join("flow.yml");
        fs::File::create(&yaml_path)
            .unwrap()
            .write_all(YAML.as_bytes())
            .unwrap();
        let json_path = dir.join("flow.json");
        fs::write(&json_path, r#"{"name": "j", "nodes": {}}"#).unwrap();

        let loader = WorkflowLoader::default();
        assert_eq!(loader.load_workflow(&yaml_path).unwrap().name, "orders");
        assert_eq!(loader.load_workflow(&json_path).unwrap().name, "j");

        let source = FileWorkflowSource::new(&yaml_path);
        assert_eq!(source.load().unwrap().nodes.len(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let source = FileWorkflowSource::new("/definitely/not/here.yaml");
        assert!(matches!(source.load(), Err(FlowError::Config(_))));
    }

    #[test]
    fn test_invalid_yaml_returns_error() {
        let yaml = r#"
nodes:
  - not a map
"#;
        assert!(matches!(
            WorkflowLoader::parse_yaml(yaml),
            Err(FlowError::Yaml(_))
        ));
    }
}
