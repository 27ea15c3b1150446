//! Multi-version ADP schema validator.
//!
//! The root schema references the `runtime`, `flow` and `evaluation`
//! sub-schemas by URI. At first use the four embedded documents are bundled
//! into one compound schema (each sub-schema becomes an embedded resource
//! under `$defs`, addressed by its own `$id`) and compiled once for the life
//! of the process.

use std::fmt;

use jsonschema::{Draft, Validator};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, SchemaError};
use crate::pointer;
use crate::semantic;

static ADP_SCHEMA: &str = include_str!("../schemas/adp.schema.json");
static RUNTIME_SCHEMA: &str = include_str!("../schemas/runtime.schema.json");
static FLOW_SCHEMA: &str = include_str!("../schemas/flow.schema.json");
static EVALUATION_SCHEMA: &str = include_str!("../schemas/evaluation.schema.json");

static GLOBAL: OnceCell<AdpValidator> = OnceCell::new();

/// One of the four schema documents shipped with this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaDocument {
    Adp,
    Runtime,
    Flow,
    Evaluation,
}

impl SchemaDocument {
    pub const SUBSCHEMAS: [SchemaDocument; 3] = [
        SchemaDocument::Runtime,
        SchemaDocument::Flow,
        SchemaDocument::Evaluation,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            SchemaDocument::Adp => "adp.schema.json",
            SchemaDocument::Runtime => "runtime.schema.json",
            SchemaDocument::Flow => "flow.schema.json",
            SchemaDocument::Evaluation => "evaluation.schema.json",
        }
    }

    /// Raw JSON text of the schema.
    pub fn source(self) -> &'static str {
        match self {
            SchemaDocument::Adp => ADP_SCHEMA,
            SchemaDocument::Runtime => RUNTIME_SCHEMA,
            SchemaDocument::Flow => FLOW_SCHEMA,
            SchemaDocument::Evaluation => EVALUATION_SCHEMA,
        }
    }

    pub fn parse(self) -> Result<Value> {
        serde_json::from_str(self.source()).map_err(|source| SchemaError::SchemaParse {
            name: self.file_name(),
            source,
        })
    }

    fn defs_key(self) -> &'static str {
        match self {
            SchemaDocument::Adp => "adp",
            SchemaDocument::Runtime => "runtime",
            SchemaDocument::Flow => "flow",
            SchemaDocument::Evaluation => "evaluation",
        }
    }
}

/// A single violated constraint, addressed by JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ValidationIssue {
    /// JSON pointer into the document; empty for the root.
    pub pointer: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pointer.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{} {}", self.pointer, self.message)
        }
    }
}

fn compile(name: &'static str, schema: &Value) -> Result<Validator> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|e| SchemaError::Compile {
            name,
            message: e.to_string(),
        })
}

fn schema_issues(validator: &Validator, instance: &Value) -> Vec<ValidationIssue> {
    validator
        .iter_errors(instance)
        .map(|error| ValidationIssue::new(error.instance_path().to_string(), error.to_string()))
        .collect()
}

/// Stable sort of `issues` into document-traversal order.
fn sort_in_document_order(doc: &Value, issues: Vec<ValidationIssue>) -> Vec<ValidationIssue> {
    let mut keyed: Vec<(Vec<usize>, ValidationIssue)> = issues
        .into_iter()
        .map(|issue| (pointer::document_order_key(doc, &issue.pointer), issue))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, issue)| issue).collect()
}

/// Compiled validator for whole ADP documents.
pub struct AdpValidator {
    root: Validator,
}

impl AdpValidator {
    /// Bundle and compile the embedded schema set.
    pub fn compile() -> Result<Self> {
        let mut root = SchemaDocument::Adp.parse()?;
        let defs = root
            .as_object_mut()
            .ok_or(SchemaError::Compile {
                name: SchemaDocument::Adp.file_name(),
                message: "root schema is not an object".to_string(),
            })?
            .entry("$defs")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let defs = defs.as_object_mut().ok_or(SchemaError::Compile {
            name: SchemaDocument::Adp.file_name(),
            message: "$defs is not an object".to_string(),
        })?;
        for part in SchemaDocument::SUBSCHEMAS {
            defs.insert(part.defs_key().to_string(), part.parse()?);
        }

        let root = compile(SchemaDocument::Adp.file_name(), &root)?;
        tracing::debug!(event = "schema.compiled", schemas = 4, "compiled ADP schema set");
        Ok(Self { root })
    }

    /// The process-wide validator, compiled on first use.
    pub fn global() -> Result<&'static AdpValidator> {
        GLOBAL.get_or_try_init(Self::compile)
    }

    /// Validate `doc`, returning every issue in document order.
    ///
    /// An empty vector means the document is valid.
    pub fn validate(&self, doc: &Value) -> Vec<ValidationIssue> {
        let mut issues = schema_issues(&self.root, doc);
        issues.extend(semantic::check(doc));
        let issues = sort_in_document_order(doc, issues);
        if !issues.is_empty() {
            tracing::debug!(
                event = "schema.invalid",
                issues = issues.len(),
                "ADP document failed validation"
            );
        }
        issues
    }
}

/// Validator for a single sub-schema, used to check one section in isolation.
pub struct SubschemaValidator {
    document: SchemaDocument,
    validator: Validator,
}

impl SubschemaValidator {
    pub fn compile(document: SchemaDocument) -> Result<Self> {
        let schema = document.parse()?;
        let validator = compile(document.file_name(), &schema)?;
        Ok(Self {
            document,
            validator,
        })
    }

    pub fn document(&self) -> SchemaDocument {
        self.document
    }

    /// Structural issues only; pointers are relative to `section`.
    pub fn validate(&self, section: &Value) -> Vec<ValidationIssue> {
        sort_in_document_order(section, schema_issues(&self.validator, section))
    }
}

/// Validate `doc` with the process-wide validator.
pub fn validate_document(doc: &Value) -> Result<Vec<ValidationIssue>> {
    Ok(AdpValidator::global()?.validate(doc))
}

/// Validate `doc`, rendering each issue as `<json-pointer> <message>`.
pub fn validate(doc: &Value) -> Result<Vec<String>> {
    Ok(validate_document(doc)?
        .iter()
        .map(ValidationIssue::to_string)
        .collect())
}
