//! The tool surface shared with the external tool registry: descriptors,
//! dynamically typed parameters, and the two-part result shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RlmError;

/// A small sum type for tool parameters. Every coercion below is total:
/// it returns a fallback on mismatch rather than panicking or erroring.
pub type ToolParams = BTreeMap<String, Value>;

/// Coerce a parameter to a string, falling back to `default` on any
/// mismatch (missing key, wrong type).
pub fn coerce_str<'a>(params: &'a ToolParams, key: &str, default: &'a str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or(default)
}

pub fn coerce_bool(params: &ToolParams, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub fn coerce_i64(params: &ToolParams, key: &str, default: i64) -> i64 {
    params.get(key).and_then(Value::as_i64).unwrap_or(default)
}

pub fn coerce_f64(params: &ToolParams, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

pub fn coerce_list<'a>(params: &'a ToolParams, key: &str) -> &'a [Value] {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Outcome of `Tool::execute`. `success=false` is an in-band failure the
/// agent is expected to handle; a framework failure surfaces as
/// `Err(RlmError::ToolFailure)` from `execute` itself instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// One registered tool. Names are unique within a registry and the
/// descriptor is immutable after registration.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema describing `params`.
    fn parameters(&self) -> Value;
    async fn execute(&self, params: &ToolParams) -> Result<ToolOutcome, RlmError>;
}

/// A handle plus the immutable metadata describing one registered tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub executor: Arc<dyn Tool>,
}

impl ToolDescriptor {
    pub fn new(executor: Arc<dyn Tool>) -> Self {
        Self {
            name: executor.name().to_string(),
            description: executor.description().to_string(),
            parameters: executor.parameters(),
            executor,
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}
