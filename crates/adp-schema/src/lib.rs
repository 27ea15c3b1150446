//! ADP Schema Library
//!
//! Typed model of the Agent Definition Package (ADP) document and the
//! multi-version validator that gates packaging.
//!
//! Validation returns every violation in one ordered list: structural
//! errors from the embedded JSON Schema set, merged with semantic checks the
//! schemas cannot express (backend-specific fields, cross references),
//! sorted in document order.

pub mod document;
pub mod error;
pub mod pointer;
pub mod semantic;
pub mod validator;
pub mod version;

pub use document::{
    AdpDocument, Backend, Entrypoint, Evaluation, EvaluationSuite, ExecutionEntry, Flow,
    FlowEdge, FlowGraph, FlowNode, Metric, ModelDescriptor, NodeKind, Runtime, Threshold,
};
pub use error::{Result, SchemaError};
pub use validator::{
    validate, validate_document, AdpValidator, SchemaDocument, SubschemaValidator,
    ValidationIssue,
};
pub use version::{SchemaVersion, SUPPORTED_VERSIONS};

/// Conventional location of the ADP document inside a package source tree.
pub const ADP_DOCUMENT_PATH: &str = "adp/agent.yaml";
