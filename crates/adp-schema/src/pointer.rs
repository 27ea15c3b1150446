//! JSON pointer helpers used to order validation issues.
//!
//! Issues are sorted by where their pointer lands in a depth-first, root to
//! leaf walk of the document, so identical input always yields an identical
//! error list.

use serde_json::Value;

/// Escape one reference token (RFC 6901).
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Unescape one reference token (RFC 6901).
pub fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Append `token` to `base`.
pub fn join(base: &str, token: impl AsRef<str>) -> String {
    format!("{}/{}", base, escape_token(token.as_ref()))
}

/// Position of `pointer` in a pre-order walk of `doc`.
///
/// Each path segment maps to the member's position inside its parent (object
/// key order is the document's order). A parent's key is a prefix of its
/// children's keys and therefore sorts first. Segments that do not resolve
/// map to `usize::MAX`, placing them after every resolvable sibling.
pub fn document_order_key(doc: &Value, pointer: &str) -> Vec<usize> {
    let mut key = Vec::new();
    if pointer.is_empty() {
        return key;
    }

    let mut current = Some(doc);
    for raw in pointer.trim_start_matches('/').split('/') {
        let token = unescape_token(raw);
        let (position, next) = match current {
            Some(Value::Object(map)) => match map.keys().position(|k| *k == token) {
                Some(pos) => (pos, map.get(&token)),
                None => (usize::MAX, None),
            },
            Some(Value::Array(items)) => match token.parse::<usize>() {
                Ok(idx) if idx < items.len() => (idx, items.get(idx)),
                _ => (usize::MAX, None),
            },
            _ => (usize::MAX, None),
        };
        key.push(position);
        current = next;
    }
    key
}
