//! Checks the JSON Schemas cannot express.
//!
//! - backend-specific required fields of each execution entry
//! - `runtime.models` only for schema versions that support it
//! - unique ids for execution entries, models, flow nodes and suites
//! - flow edges and start/end nodes name declared nodes
//! - `model_ref` names a declared model
//!
//! `tool_ref` is not cross-checked: tools are resolved from catalogs outside
//! the document. Sections with the wrong shape are skipped; the schema pass
//! already reports them.

use std::collections::HashSet;

use serde_json::Value;

use crate::document::ExecutionEntry;
use crate::pointer::join;
use crate::validator::ValidationIssue;
use crate::version::SchemaVersion;

/// Run every semantic check against `doc`.
pub fn check(doc: &Value) -> Vec<ValidationIssue> {
    let version = doc
        .get("adp_version")
        .and_then(Value::as_str)
        .and_then(|v| v.parse::<SchemaVersion>().ok());

    let mut issues = Vec::new();
    check_execution(doc, &mut issues);
    let models = check_models(doc, version, &mut issues);
    check_flow(doc, &models, &mut issues);
    check_evaluation(doc, &mut issues);
    issues
}

fn items<'a>(doc: &'a Value, pointer: &str) -> &'a [Value] {
    doc.pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn id_of(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}

/// Report the second and later occurrences of each id under `base`.
fn check_unique_ids(base: &str, list: &[Value], what: &str, issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for (idx, item) in list.iter().enumerate() {
        if let Some(id) = id_of(item) {
            if !seen.insert(id) {
                issues.push(ValidationIssue::new(
                    join(&join(base, idx.to_string()), "id"),
                    format!("duplicate {what} id {id:?}"),
                ));
            }
        }
    }
}

fn check_execution(doc: &Value, issues: &mut Vec<ValidationIssue>) {
    let base = "/runtime/execution";
    let entries = items(doc, base);
    for (idx, raw) in entries.iter().enumerate() {
        let Ok(entry) = serde_json::from_value::<ExecutionEntry>(raw.clone()) else {
            continue;
        };
        if let Some(field) = entry.missing_required_field() {
            issues.push(ValidationIssue::new(
                join(base, idx.to_string()),
                format!("backend {:?} requires {field:?}", entry.backend.as_str()),
            ));
        }
    }
    check_unique_ids(base, entries, "execution", issues);
}

/// Returns the ids of declared models.
fn check_models<'a>(
    doc: &'a Value,
    version: Option<SchemaVersion>,
    issues: &mut Vec<ValidationIssue>,
) -> HashSet<&'a str> {
    let base = "/runtime/models";
    if doc.pointer(base).is_none() {
        return HashSet::new();
    }
    if let Some(version) = version {
        if !version.supports_models() {
            issues.push(ValidationIssue::new(
                base,
                format!("runtime.models is not supported by adp_version {version}, requires 0.2.0 or later"),
            ));
        }
    }
    let models = items(doc, base);
    check_unique_ids(base, models, "model", issues);
    models.iter().filter_map(id_of).collect()
}

fn check_flow(doc: &Value, models: &HashSet<&str>, issues: &mut Vec<ValidationIssue>) {
    let base = "/flow/graph";
    let nodes = items(doc, "/flow/graph/nodes");
    check_unique_ids(&join(base, "nodes"), nodes, "node", issues);
    let declared: HashSet<&str> = nodes.iter().filter_map(id_of).collect();

    for (idx, node) in nodes.iter().enumerate() {
        if let Some(model_ref) = node.get("model_ref").and_then(Value::as_str) {
            if !models.contains(model_ref) {
                issues.push(ValidationIssue::new(
                    format!("{base}/nodes/{idx}/model_ref"),
                    format!("references undeclared model {model_ref:?}"),
                ));
            }
        }
    }

    for (idx, edge) in items(doc, "/flow/graph/edges").iter().enumerate() {
        for end in ["from", "to"] {
            if let Some(target) = edge.get(end).and_then(Value::as_str) {
                if !declared.contains(target) {
                    issues.push(ValidationIssue::new(
                        format!("{base}/edges/{idx}/{end}"),
                        format!("references undeclared node {target:?}"),
                    ));
                }
            }
        }
    }

    for list in ["start_nodes", "end_nodes"] {
        for (idx, node) in items(doc, &join(base, list)).iter().enumerate() {
            if let Some(target) = node.as_str() {
                if !declared.contains(target) {
                    issues.push(ValidationIssue::new(
                        format!("{base}/{list}/{idx}"),
                        format!("references undeclared node {target:?}"),
                    ));
                }
            }
        }
    }
}

fn check_evaluation(doc: &Value, issues: &mut Vec<ValidationIssue>) {
    let base = "/evaluation/suites";
    let suites = items(doc, base);
    check_unique_ids(base, suites, "suite", issues);
    for (idx, suite) in suites.iter().enumerate() {
        let metrics = suite
            .get("metrics")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        check_unique_ids(&format!("{base}/{idx}/metrics"), metrics, "metric", issues);
    }
}
