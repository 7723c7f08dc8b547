// SPDX-License-Identifier: MIT

//! Typed error handling for svcgraph
//!
//! `FlowError` is the top-level error returned by the engine. Failures that
//! belong to the workflow model itself (graph validation, input validation,
//! parameter resolution, branch configuration, retries) live in
//! `WorkflowError` so callers can match on them precisely.

use std::time::Duration;
use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, FlowError>;

/// Top-level error type for svcgraph
#[derive(Debug, Error)]
pub enum FlowError {
    /// Workflow-model errors (plan construction, resolution, branching)
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// In-process module not present in the registry
    #[error("Module '{name}' not registered")]
    ModuleNotFound { name: String },

    /// An executor reported a failure for one attempt
    #[error("Executor error in {service}: {message}")]
    Executor { service: String, message: String },

    /// A single attempt exceeded its timeout
    #[error("Service {service} timed out after {after:?}")]
    Timeout { service: String, after: Duration },

    /// Configuration errors (bad config file, bad env override)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Template rendering failed for an env/asset value
    #[error("Template error: {0}")]
    Template(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors from remote-call executors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Invalid URL in a remote-call connection template
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// Generic error wrapper for compatibility
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the workflow model and the execution core
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// An edge references a service key absent from the service pool
    #[error("Edge {source_key} -> {target_key} references unknown service '{missing}'")]
    GraphInvalid {
        source_key: String,
        target_key: String,
        missing: String,
    },

    /// A scope endpoint (from/to) is not part of the service pool
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// A required start-node parameter was not supplied
    #[error("Missing required input '{missing}' for start service {service}")]
    InvalidInput { service: String, missing: String },

    /// No start node could be resolved for the requested scope
    #[error("No start services resolvable for this workflow scope")]
    UndefinedWorkflow,

    /// An input could not be resolved from the value store
    #[error(transparent)]
    ParamResolution(#[from] ParamResolutionError),

    /// Malformed conditional configuration
    #[error("Invalid conditional handler: {0}")]
    ConditionalType(String),

    /// Executor attempts exhausted
    #[error("Service {service} failed after {attempts} attempts: {last_error}")]
    ExceedRetry {
        service: String,
        attempts: u32,
        last_error: String,
    },

    /// No branch of a conditional matched
    #[error("No satisfied branch for conditional service {service}")]
    NoSatisfiedBranch { service: String },

    /// A task was asked to move backwards through its state lattice
    #[error("Invalid transition for {service}: {from} -> {to}")]
    InvalidTransition {
        service: String,
        from: String,
        to: String,
    },
}

/// Parameter resolution failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamResolutionError {
    /// The referenced upstream value has not been written yet
    #[error("Value '{address}' not prepared by previous job")]
    NotPreparedPrevJob { address: String },

    /// The value exists but cannot be coerced to the declared type
    #[error("Cannot coerce '{key}' to {target_type}: {message}")]
    Coercion {
        key: String,
        target_type: String,
        message: String,
    },

    /// The address string is not a well-formed value id
    #[error("Malformed value address: {0}")]
    BadAddress(String),
}

impl FlowError {
    /// Create an executor error
    pub fn executor(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Executor {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a module-not-found error
    pub fn module_not_found(name: impl Into<String>) -> Self {
        Self::ModuleNotFound { name: name.into() }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether another attempt of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::Executor { .. }
                | FlowError::Timeout { .. }
                | FlowError::Http(_)
                | FlowError::Io(_)
                | FlowError::Other(_)
        )
    }
}

impl From<ParamResolutionError> for FlowError {
    fn from(err: ParamResolutionError) -> Self {
        Self::Workflow(WorkflowError::ParamResolution(err))
    }
}

// Allow conversion from &str for backward compatibility
impl From<&str> for FlowError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for FlowError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

// Module implementations return boxed errors, like tools do
impl From<Box<dyn std::error::Error + Send + Sync>> for FlowError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FlowError::executor("a.b", "boom").is_retryable());
        assert!(FlowError::other("transient").is_retryable());
        assert!(!FlowError::from(WorkflowError::ConditionalType("if".into())).is_retryable());
        assert!(!FlowError::from(ParamResolutionError::BadAddress("x".into())).is_retryable());
    }

    #[test]
    fn test_param_resolution_converts_to_workflow_error() {
        let err: FlowError = ParamResolutionError::NotPreparedPrevJob {
            address: "O.a.b.c".to_string(),
        }
        .into();
        match err {
            FlowError::Workflow(WorkflowError::ParamResolution(
                ParamResolutionError::NotPreparedPrevJob { address },
            )) => assert_eq!(address, "O.a.b.c"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_display_messages() {
        let err = WorkflowError::InvalidInput {
            service: "n.start".to_string(),
            missing: "query".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Missing required input 'query' for start service n.start"
        );
        assert_eq!(
            FlowError::module_not_found("pkg:Cls.run").to_string(),
            "Module 'pkg:Cls.run' not registered"
        );
    }
}
