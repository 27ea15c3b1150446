//! Typed ADP document model.
//!
//! Every record keeps an ordered `extra` map for fields the model does not
//! name, so a document survives a parse/serialize round trip unchanged.
//! Descriptive fields (`name`, `description`, `owner`, `tags`) are not
//! validated and live in [`AdpDocument::extra`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::validator::ValidationIssue;
use crate::version::SchemaVersion;

/// Ordered bag of fields not modelled explicitly.
pub type Extra = Map<String, Value>;

/// The agent manifest stored at `adp/agent.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdpDocument {
    pub adp_version: String,
    pub id: String,
    pub runtime: Runtime,
    #[serde(default)]
    pub flow: Flow,
    #[serde(default)]
    pub evaluation: Evaluation,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Execution backends and model descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    pub execution: Vec<ExecutionEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelDescriptor>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Execution backend tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Python,
    Docker,
    Wasm,
    Typescript,
    Binary,
    Custom,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Python => "python",
            Backend::Docker => "docker",
            Backend::Wasm => "wasm",
            Backend::Typescript => "typescript",
            Backend::Binary => "binary",
            Backend::Custom => "custom",
        }
    }

    /// The backend-specific field an execution entry must carry.
    ///
    /// Interpreted and native backends need an `entrypoint`, container
    /// backends an `image`, compiled-module backends a `module`. `custom`
    /// entries are opaque.
    pub fn required_field(self) -> Option<&'static str> {
        match self {
            Backend::Python | Backend::Typescript | Backend::Binary => Some("entrypoint"),
            Backend::Docker => Some("image"),
            Backend::Wasm => Some("module"),
            Backend::Custom => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either a single command string or an argv list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entrypoint {
    Command(String),
    Argv(Vec<String>),
}

/// One entry of `runtime.execution`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEntry {
    pub backend: Backend,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Entrypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ExecutionEntry {
    /// Returns the backend-specific field this entry lacks, if any.
    pub fn missing_required_field(&self) -> Option<&'static str> {
        let present = match self.backend {
            Backend::Python | Backend::Typescript | Backend::Binary => self.entrypoint.is_some(),
            Backend::Docker => self.image.is_some(),
            Backend::Wasm => self.module.is_some(),
            Backend::Custom => true,
        };
        if present {
            None
        } else {
            self.backend.required_field()
        }
    }
}

/// A model the flow graph can reference through `model_ref` (0.2.0+).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: String,
    pub model: String,
    /// Name of the environment variable holding the credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Execution graph. An empty `flow: {}` is allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<FlowGraph>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Flow {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.graph.is_none() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
    #[serde(default)]
    pub start_nodes: Vec<String>,
    #[serde(default)]
    pub end_nodes: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl FlowGraph {
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Input,
    Output,
    Llm,
    Tool,
    Router,
    Transform,
    Subflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_ref: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Evaluation suites run against the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suites: Vec<EvaluationSuite>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSuite {
    pub id: String,
    pub metrics: Vec<Metric>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Pass threshold: boolean for pass/fail metrics, numeric for scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Bool(bool),
    Number(f64),
}

impl AdpDocument {
    /// Parse YAML text into an untyped JSON value, preserving key order.
    ///
    /// This is the form the validator consumes.
    pub fn parse_yaml_value(text: &str) -> Result<Value> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Decode a value that already passed validation.
    ///
    /// A failure is reported at the pointer of the first record that does
    /// not fit the typed model, or at the document root.
    pub fn decode(value: &Value) -> std::result::Result<Self, ValidationIssue> {
        Self::deserialize(value)
            .map_err(|e| ValidationIssue::new(misfit_pointer(value), e.to_string()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Self::from_value(Self::parse_yaml_value(text)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the document as YAML to `path`.
    pub fn write_yaml(&self, path: &Path) -> std::io::Result<()> {
        let yaml = self
            .to_yaml_string()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, yaml)
    }

    /// The parsed schema version, or `None` when unsupported.
    pub fn schema_version(&self) -> Option<SchemaVersion> {
        self.adp_version.parse().ok()
    }

    pub fn name(&self) -> Option<&str> {
        self.extra_str("name")
    }

    pub fn description(&self) -> Option<&str> {
        self.extra_str("description")
    }

    pub fn owner(&self) -> Option<&str> {
        self.extra_str("owner")
    }

    /// String entries of `tags`; non-string entries are skipped.
    pub fn tags(&self) -> Vec<&str> {
        self.extra
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.runtime.models.iter().find(|m| m.id == id)
    }

    pub fn execution(&self, id: &str) -> Option<&ExecutionEntry> {
        self.runtime.execution.iter().find(|e| e.id == id)
    }

    fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Pointer to the first array item under `value` that does not decode as its
/// typed record. Records are checked in document order.
fn misfit_pointer(value: &Value) -> String {
    first_misfit::<ExecutionEntry>(value, "/runtime/execution")
        .or_else(|| first_misfit::<ModelDescriptor>(value, "/runtime/models"))
        .or_else(|| first_misfit::<FlowNode>(value, "/flow/graph/nodes"))
        .or_else(|| first_misfit::<FlowEdge>(value, "/flow/graph/edges"))
        .or_else(|| first_misfit::<EvaluationSuite>(value, "/evaluation/suites"))
        .unwrap_or_default()
}

fn first_misfit<T: DeserializeOwned>(value: &Value, pointer: &str) -> Option<String> {
    let items = value.pointer(pointer)?.as_array()?;
    items
        .iter()
        .position(|item| T::deserialize(item).is_err())
        .map(|i| format!("{pointer}/{i}"))
}
